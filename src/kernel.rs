//! # Kernel
//!
//! One [`CoreState`] per processor core holds everything the kernel mutates
//! on that core: the ready queue, task control blocks, resource owners,
//! interrupt locks, counters, alarms and schedule tables. Nothing is global;
//! every service receives the core it runs on.
//!
//! [`Kernel`] owns all cores plus the cross-core queues of the in-process
//! backend and routes requests between them.
//!
//! ## Startup Sequence
//!
//! ```text
//! Kernel::new(config)          ← validate tables, build every core
//!   └─► Kernel::start_os(mode)
//!         ├─► activate autostart tasks      (per core)
//!         ├─► arm autostart alarms
//!         ├─► start autostart schedule tables
//!         ├─► StartupHook
//!         └─► deliver cross-core work queued by the above
//! ```

use crate::arch::{CoreInterrupts, InterruptControl};
use crate::bridge::DirectBridge;
use crate::config::{
    KernelConfig, CROSS_CORE_QUEUE_DEPTH, MAX_ALARMS, MAX_CORES, MAX_COUNTERS, MAX_RESOURCES,
    MAX_SCHEDULE_TABLES, MAX_TASKS,
};
use crate::counter::CounterControl;
use crate::alarm::AlarmControl;
use crate::error::{ConfigError, ErrorInfo, OsError, Panic, ProtectionAction};
use crate::interrupt::{InterruptLocks, InterruptState};
use crate::multicore::{BoundedQueue, CrossCoreMessage, Links};
use crate::queue::ReadyQueue;
use crate::resource::ResourceControl;
use crate::schedule_table::TableControl;
use crate::syscall::{Caller, Hints, HookKind, Reply, Served, ServiceId, SyscallRequest};
use crate::task::{TaskControlBlock, TaskState};
use crate::types::{AppMode, CoreId, IntLevel, Priority, TaskId};

// ---------------------------------------------------------------------------
// Per-core state
// ---------------------------------------------------------------------------

/// Kernel state of one core.
pub struct CoreState {
    id: CoreId,
    config: &'static KernelConfig,
    started: bool,
    shutdown: bool,
    app_mode: AppMode,
    pub(crate) top_priority: Priority,
    pub(crate) queue: ReadyQueue,
    pub(crate) tasks: [TaskControlBlock; MAX_TASKS],
    pub(crate) running: Option<TaskId>,
    /// `Schedule` was called: the next dispatch compares against the
    /// running task's base priority instead of its run priority.
    pub(crate) yield_requested: bool,
    pub(crate) resources: [ResourceControl; MAX_RESOURCES],
    pub(crate) irq: CoreInterrupts,
    /// Lock state of ISR and hook contexts.
    pub(crate) core_locks: InterruptLocks,
    pub(crate) interrupts: InterruptState,
    pub(crate) counters: [CounterControl; MAX_COUNTERS],
    pub(crate) alarms: [AlarmControl; MAX_ALARMS],
    pub(crate) tables: [TableControl; MAX_SCHEDULE_TABLES],
    /// Work for other cores produced by alarms and schedule tables.
    pub(crate) outbox: BoundedQueue<CrossCoreMessage, CROSS_CORE_QUEUE_DEPTH>,
    in_error_hook: bool,
    last_error: Option<ErrorInfo>,
    pub(crate) trusted_depth: u8,
    /// Task killed by a protection action whose pending call must see `Killed`.
    pub(crate) killed_task: Option<TaskId>,
}

impl CoreState {
    pub(crate) fn new(id: CoreId, config: &'static KernelConfig) -> Self {
        let mut tasks = [TaskControlBlock::empty(); MAX_TASKS];
        for (tcb, task) in tasks.iter_mut().zip(config.tasks) {
            tcb.reset(task.priority);
        }
        Self {
            id,
            config,
            started: false,
            shutdown: false,
            app_mode: AppMode::DEFAULT,
            top_priority: config.top_priority(id),
            queue: ReadyQueue::new(config.queue),
            tasks,
            running: None,
            yield_requested: false,
            resources: [ResourceControl::FREE; MAX_RESOURCES],
            irq: CoreInterrupts::new(),
            core_locks: InterruptLocks::new(),
            interrupts: InterruptState::new(),
            counters: [CounterControl::new(); MAX_COUNTERS],
            alarms: [AlarmControl::IDLE; MAX_ALARMS],
            tables: [TableControl::STOPPED; MAX_SCHEDULE_TABLES],
            outbox: BoundedQueue::new(),
            in_error_hook: false,
            last_error: None,
            trusted_depth: 0,
            killed_task: None,
        }
    }

    #[inline]
    pub fn id(&self) -> CoreId {
        self.id
    }

    #[inline]
    pub fn config(&self) -> &'static KernelConfig {
        self.config
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown
    }

    pub fn app_mode(&self) -> AppMode {
        self.app_mode
    }

    pub fn running(&self) -> Option<TaskId> {
        self.running
    }

    pub fn interrupt_level(&self) -> IntLevel {
        self.irq.level()
    }

    pub fn task_state(&self, task: TaskId) -> TaskState {
        self.tasks[task.index()].state
    }

    /// Priority `task` currently runs or waits at.
    pub fn task_priority(&self, task: TaskId) -> Priority {
        self.tasks[task.index()].current_priority
    }

    /// Pending activations of `task`, including a running one.
    pub fn activations(&self, task: TaskId) -> u8 {
        self.tasks[task.index()].activations
    }

    /// Most recent error reported on this core.
    pub fn last_error(&self) -> Option<&ErrorInfo> {
        self.last_error.as_ref()
    }

    /// Follow-up work for whoever drives this core.
    pub fn hints(&self) -> Hints {
        let mut hints = Hints::empty();
        if self.shutdown {
            return hints;
        }
        if self.needs_dispatch() {
            hints |= Hints::DISPATCH;
        }
        let config = self.config;
        let deliverable = self.interrupts.deliverable(self.irq.level(), |isr| {
            config.isr(isr).map_or(IntLevel::ENABLED, |i| i.level)
        });
        if deliverable.is_some() {
            hints |= Hints::INTERRUPT;
        }
        hints
    }

    /// A task other than the running one should run now.
    pub fn needs_dispatch(&self) -> bool {
        if self.interrupts.depth() > 0 {
            return false;
        }
        let Some(task) = self.running else {
            return !self.queue.is_empty();
        };
        // An interrupt-locked task is not preemptable.
        if self.tasks[task.index()].locks.any_held() {
            return false;
        }
        match self.queue.peek_highest() {
            None => false,
            Some((_, head)) => {
                let tcb = &self.tasks[task.index()];
                head > tcb.current_priority
                    || (self.yield_requested && head > self.base_priority(task))
            }
        }
    }

    pub(crate) fn base_priority(&self, task: TaskId) -> Priority {
        self.config.tasks[task.index()].priority
    }

    /// Priority a task runs at once dispatched.
    pub(crate) fn run_priority(&self, task: TaskId) -> Priority {
        let config = &self.config.tasks[task.index()];
        if config.preemptive {
            config.priority
        } else {
            self.top_priority
        }
    }

    // -- Lifecycle -----------------------------------------------------------

    /// `StartOS` for this core.
    pub(crate) fn start(&mut self, mode: AppMode) {
        if self.started {
            return;
        }
        self.started = true;
        self.app_mode = mode;
        log::debug!("{}: starting in mode {:?}", self.id, mode);
        let config = self.config;

        for (i, task) in config.tasks.iter().enumerate() {
            if task.core == self.id && task.autostart.contains(&mode) {
                let id = TaskId::from_index(i);
                if let Err(error) = self.activate(id) {
                    self.report(ServiceId::ActivateTask, error, [i, 0, 0, 0], Caller::Kernel);
                }
            }
        }
        self.autostart_alarms(mode);
        self.autostart_tables(mode);

        self.with_hook(HookKind::Startup, |hooks, ctx| hooks.startup_hook(ctx));
    }

    /// Stop the core. Every later service fails with `State`.
    pub(crate) fn shutdown_os(&mut self, error: Option<OsError>) {
        if self.shutdown {
            return;
        }
        log::debug!("{}: shutdown ({:?})", self.id, error);
        self.with_hook(HookKind::Shutdown, |hooks, ctx| hooks.shutdown_hook(ctx, error));
        self.shutdown = true;
        self.running = None;
    }

    // -- Errors --------------------------------------------------------------

    /// Record a failed service and run the error hook.
    pub(crate) fn report(
        &mut self,
        service: ServiceId,
        error: OsError,
        params: [usize; 4],
        caller: Caller,
    ) {
        let info = ErrorInfo {
            core: self.id,
            service,
            error,
            params,
            caller,
        };
        log::warn!("{}: {:?} failed: {} ({:?})", self.id, service, error, caller);
        self.last_error = Some(info);
        if self.in_error_hook {
            return;
        }
        self.in_error_hook = true;
        self.with_hook(HookKind::Error, |hooks, ctx| hooks.error_hook(ctx, &info));
        self.in_error_hook = false;
    }

    /// An internal inconsistency: ask the protection hook what to do.
    pub(crate) fn fatal(&mut self, fault: Panic) {
        log::error!("{}: {}", self.id, fault);
        let action = self.config.hooks.protection_hook(self.id, fault);
        log::error!("{}: protection action {:?}", self.id, action);
        match action {
            ProtectionAction::Shutdown => self.shutdown_os(None),
            ProtectionAction::TerminateTask => {
                if let Some(task) = self.running {
                    self.kill_task(task);
                    self.killed_task = Some(task);
                }
            }
            ProtectionAction::TerminateApplication => {
                self.killed_task = self.running;
                for i in 0..self.config.tasks.len() {
                    let task = TaskId::from_index(i);
                    if self.config.tasks[i].core == self.id {
                        self.kill_task(task);
                    }
                }
                self.stop_timing();
            }
        }
    }

    /// Remove every trace of `task`: queued activations, held resources and
    /// interrupt locks.
    pub(crate) fn kill_task(&mut self, task: TaskId) {
        log::debug!("{}: killing {}", self.id, task);
        self.release_all_resources(task);
        self.queue.remove_task(task);
        if self.running == Some(task) {
            let mut locks = self.tasks[task.index()].locks;
            locks.force_release(&mut self.irq);
            self.running = None;
            self.yield_requested = false;
        }
        let base = self.base_priority(task);
        self.tasks[task.index()].reset(base);
    }
}

// ---------------------------------------------------------------------------
// All cores
// ---------------------------------------------------------------------------

/// Every core of the system plus the queues between them.
pub struct Kernel {
    config: &'static KernelConfig,
    cores: [CoreState; MAX_CORES],
    links: Links,
}

impl Kernel {
    /// Validate `config` and build all cores. The OS is not started yet.
    pub fn new(config: &'static KernelConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            cores: core::array::from_fn(|i| CoreState::new(CoreId(i as u8), config)),
            links: Links::new(),
        })
    }

    pub fn config(&self) -> &'static KernelConfig {
        self.config
    }

    /// `StartOS` on every configured core.
    pub fn start_os(&mut self, mode: AppMode) {
        for core in self.cores.iter_mut().take(self.config.cores) {
            core.start(mode);
        }
        self.flush_outboxes();
    }

    pub fn core(&self, id: CoreId) -> Option<&CoreState> {
        self.cores[..self.config.cores].get(id.index())
    }

    pub fn core_mut(&mut self, id: CoreId) -> Option<&mut CoreState> {
        self.cores[..self.config.cores].get_mut(id.index())
    }

    /// Serve one request on `core`, routing it to the owning core if needed.
    pub fn call(&mut self, core: CoreId, caller: Caller, request: SyscallRequest) -> Reply {
        let Some(state) = self.core_mut(core) else {
            return Reply {
                status: Err(OsError::Core),
                hints: Hints::empty(),
            };
        };
        let reply = match state.serve(caller, &request) {
            Served::Done(reply) => reply,
            Served::Forward {
                core: owner,
                request: forwarded,
                chained,
            } => {
                let status = self.deliver(core, owner, forwarded);
                let state = &mut self.cores[core.index()];
                let status = state.complete_forwarded(caller, &request, chained, status);
                Reply {
                    status,
                    hints: state.hints(),
                }
            }
        };
        self.flush_outboxes();
        reply
    }

    /// In-process bridge onto this kernel.
    pub fn bridge(&mut self) -> DirectBridge<'_> {
        DirectBridge::new(self)
    }

    /// Hand the cores to another owner, e.g. one thread per core.
    pub fn into_cores(self) -> [CoreState; MAX_CORES] {
        self.cores
    }

    /// Queue `request` on the `from → to` link and serve everything queued
    /// there in order. Returns the status of `request`.
    fn deliver(&mut self, from: CoreId, to: CoreId, request: SyscallRequest) -> Result<usize, OsError> {
        let message = CrossCoreMessage { from, to, request };
        if self.links.push(message).is_err() {
            self.cores[from.index()].fatal(Panic::CrossCoreQueueFull { from, to });
            return Err(OsError::Core);
        }
        log::debug!("{} -> {}: {:?}", from, to, request.service);
        let mut status = Err(OsError::Core);
        while let Some(message) = self.links.pop(from, to) {
            status = match self.cores[to.index()].serve(Caller::Remote(from), &message.request) {
                Served::Done(reply) => reply.status,
                Served::Forward { .. } => Err(OsError::Core),
            };
        }
        status
    }

    fn flush_outboxes(&mut self) {
        loop {
            let mut moved = false;
            for i in 0..self.config.cores {
                while let Some(message) = self.cores[i].outbox.pop() {
                    moved = true;
                    if let Err(error) = self.deliver(message.from, message.to, message.request) {
                        log::warn!(
                            "{} -> {}: {:?} failed: {}",
                            message.from,
                            message.to,
                            message.request.service,
                            error
                        );
                    }
                }
            }
            if !moved {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaskConfig;
    use crate::services::Services;
    use crate::syscall::DispatchOutcome;

    static TASKS: [TaskConfig; 3] = [
        TaskConfig::basic("boot", CoreId(0), Priority(2)).autostart(&[AppMode::DEFAULT]),
        TaskConfig::basic("remote", CoreId(1), Priority(4)),
        TaskConfig::basic("np", CoreId(0), Priority(1)).non_preemptive(),
    ];

    static CONFIG: KernelConfig = KernelConfig {
        cores: 2,
        tasks: &TASKS,
        ..KernelConfig::EMPTY
    };

    fn dispatch(kernel: &mut Kernel, core: CoreId) -> DispatchOutcome {
        let reply = kernel.call(
            core,
            Caller::Kernel,
            SyscallRequest::new(ServiceId::Dispatch, &[]),
        );
        DispatchOutcome::from_word(reply.status.unwrap())
    }

    #[test]
    fn test_autostart_task_is_ready() {
        let mut kernel = Kernel::new(&CONFIG).unwrap();
        kernel.start_os(AppMode::DEFAULT);
        let core = kernel.core(CoreId(0)).unwrap();
        assert_eq!(core.task_state(TaskId(0)), TaskState::Ready);
        assert!(core.hints().contains(Hints::DISPATCH));
        assert_eq!(dispatch(&mut kernel, CoreId(0)), DispatchOutcome::Start(TaskId(0)));
    }

    #[test]
    fn test_activation_routed_to_owner_core() {
        let mut kernel = Kernel::new(&CONFIG).unwrap();
        kernel.start_os(AppMode::DEFAULT);
        assert_eq!(dispatch(&mut kernel, CoreId(0)), DispatchOutcome::Start(TaskId(0)));

        let mut bridge = kernel.bridge();
        let reply = crate::bridge::Bridge::invoke(
            &mut bridge,
            CoreId(0),
            Caller::Task(TaskId(0)),
            SyscallRequest::new(ServiceId::ActivateTask, &[1]),
        );
        assert_eq!(reply.status, Ok(0));
        assert_eq!(
            kernel.core(CoreId(1)).unwrap().task_state(TaskId(1)),
            TaskState::Ready
        );
    }

    #[test]
    fn test_non_preemptive_task_runs_at_top_priority() {
        let mut kernel = Kernel::new(&CONFIG).unwrap();
        kernel.start_os(AppMode::DEFAULT);
        let core = kernel.core_mut(CoreId(0)).unwrap();
        core.activate(TaskId(2)).unwrap();
        assert_eq!(core.run_priority(TaskId(2)), Priority(2));
        assert_eq!(core.run_priority(TaskId(0)), Priority(2));
    }

    #[test]
    fn test_unknown_core_is_rejected() {
        let mut kernel = Kernel::new(&CONFIG).unwrap();
        let reply = kernel.call(
            CoreId(3),
            Caller::Kernel,
            SyscallRequest::new(ServiceId::Dispatch, &[]),
        );
        assert_eq!(reply.status, Err(OsError::Core));
    }

    #[test]
    fn test_shutdown_rejects_services() {
        let mut kernel = Kernel::new(&CONFIG).unwrap();
        kernel.start_os(AppMode::DEFAULT);
        let core = kernel.core_mut(CoreId(0)).unwrap();
        let mut ctx = crate::hooks::HookContext::new(core, HookKind::Startup);
        ctx.shutdown_os(None).unwrap();
        assert!(kernel.core(CoreId(0)).unwrap().is_shut_down());
        assert_eq!(dispatch(&mut kernel, CoreId(0)), DispatchOutcome::Idle);
        let reply = kernel.call(
            CoreId(0),
            Caller::Remote(CoreId(1)),
            SyscallRequest::new(ServiceId::ActivateTask, &[0]),
        );
        assert_eq!(reply.status, Err(OsError::State));
    }

    #[test]
    fn test_application_mode_is_visible_to_hooks() {
        let mut kernel = Kernel::new(&CONFIG).unwrap();
        kernel.start_os(AppMode(3));
        let core = kernel.core_mut(CoreId(0)).unwrap();
        assert_eq!(core.running(), None);
        assert_eq!(core.task_state(TaskId(0)), TaskState::Suspended);
        let mut ctx = crate::hooks::HookContext::new(core, HookKind::Error);
        assert_eq!(ctx.get_active_application_mode(), Ok(AppMode(3)));
    }

    struct Recording {
        errors: core::sync::atomic::AtomicUsize,
        last: core::sync::atomic::AtomicU8,
    }

    impl crate::hooks::OsHooks for Recording {
        fn error_hook(&self, ctx: &mut crate::hooks::HookContext<'_>, info: &ErrorInfo) {
            use core::sync::atomic::Ordering;
            self.errors.fetch_add(1, Ordering::SeqCst);
            self.last.store(info.error.code(), Ordering::SeqCst);
            // Refused in the error hook, and not reported a second time.
            assert_eq!(ctx.activate_task(TaskId(0)), Err(OsError::CallLevel));
        }
    }

    #[test]
    fn test_error_hook_runs_once_per_failed_service() {
        use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

        static HOOKS: Recording = Recording {
            errors: AtomicUsize::new(0),
            last: AtomicU8::new(0),
        };
        static HOOKED: KernelConfig = KernelConfig {
            cores: 2,
            tasks: &TASKS,
            hooks: &HOOKS,
            ..KernelConfig::EMPTY
        };

        let mut kernel = Kernel::new(&HOOKED).unwrap();
        kernel.start_os(AppMode::DEFAULT);
        assert_eq!(dispatch(&mut kernel, CoreId(0)), DispatchOutcome::Start(TaskId(0)));
        let reply = kernel.call(
            CoreId(0),
            Caller::Task(TaskId(0)),
            SyscallRequest::new(ServiceId::ActivateTask, &[7]),
        );
        assert_eq!(reply.status, Err(OsError::Id));
        assert_eq!(HOOKS.errors.load(Ordering::SeqCst), 1);
        assert_eq!(HOOKS.last.load(Ordering::SeqCst), OsError::Id.code());
    }

    struct KillRunning;

    impl crate::hooks::OsHooks for KillRunning {
        fn protection_hook(&self, _core: CoreId, _fault: Panic) -> ProtectionAction {
            ProtectionAction::TerminateTask
        }
    }

    #[test]
    fn test_protection_action_kills_running_task() {
        static KILLING: KernelConfig = KernelConfig {
            cores: 2,
            tasks: &TASKS,
            hooks: &KillRunning,
            ..KernelConfig::EMPTY
        };

        let mut kernel = Kernel::new(&KILLING).unwrap();
        kernel.start_os(AppMode::DEFAULT);
        assert_eq!(dispatch(&mut kernel, CoreId(0)), DispatchOutcome::Start(TaskId(0)));
        let core = kernel.core_mut(CoreId(0)).unwrap();
        core.fatal(Panic::ReadyQueueCorrupted { core: CoreId(0) });
        assert!(!core.is_shut_down());
        assert_eq!(core.running(), None);
        assert_eq!(core.task_state(TaskId(0)), TaskState::Suspended);

        // The killed task's pending call sees `Killed`, once.
        let reply = kernel.call(
            CoreId(0),
            Caller::Task(TaskId(0)),
            SyscallRequest::new(ServiceId::GetTaskId, &[]),
        );
        assert_eq!(reply.status, Err(OsError::Killed));
        assert_eq!(kernel.core(CoreId(0)).unwrap().killed_task, None);
    }

    #[test]
    fn test_default_protection_action_shuts_core_down() {
        let mut kernel = Kernel::new(&CONFIG).unwrap();
        kernel.start_os(AppMode::DEFAULT);
        let core = kernel.core_mut(CoreId(1)).unwrap();
        core.fatal(Panic::CrossCoreQueueFull {
            from: CoreId(1),
            to: CoreId(0),
        });
        assert!(core.is_shut_down());
        assert!(!kernel.core(CoreId(0)).unwrap().is_shut_down());
    }
}
