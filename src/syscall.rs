//! # Syscall Gate
//!
//! Every kernel service enters a core through [`CoreState::serve`]:
//!
//! ```text
//!   SyscallRequest ─► caller check ─► permission ─► lock check ─► route
//!                                                                  │
//!                      Served::Forward(core) ◄── owned elsewhere ──┤
//!                      Served::Done(Reply)   ◄── execute here ─────┘
//! ```
//!
//! A request is a service id plus four word-sized arguments; the reply is a
//! single word or an [`OsError`], plus [`Hints`] telling the calling side
//! that a dispatch or an interrupt is due. Failed services are reported to
//! the error hook on the core that served them.

use bitflags::bitflags;

use crate::config::{IsrCategory, StatusLevel};
use crate::error::OsError;
use crate::interrupt::LockKind;
use crate::kernel::CoreState;
use crate::services::{Services, INVALID_TASK};
use crate::types::{
    AlarmId, CoreId, CounterId, EventMask, IsrId, ResourceId, ScheduleTableId, TaskId, Tick,
    TrustedFunctionId,
};

// ---------------------------------------------------------------------------
// Request and reply
// ---------------------------------------------------------------------------

/// Every service the kernel offers, public and internal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServiceId {
    ActivateTask,
    TerminateTask,
    ChainTask,
    Schedule,
    GetTaskId,
    GetTaskState,
    GetResource,
    ReleaseResource,
    SetEvent,
    ClearEvent,
    GetEvent,
    WaitEvent,
    SuspendOsInterrupts,
    ResumeOsInterrupts,
    SuspendAllInterrupts,
    ResumeAllInterrupts,
    DisableAllInterrupts,
    EnableAllInterrupts,
    IncrementCounter,
    GetCounterValue,
    GetElapsedValue,
    SetRelAlarm,
    SetAbsAlarm,
    CancelAlarm,
    GetAlarm,
    GetAlarmBase,
    StartScheduleTableRel,
    StartScheduleTableAbs,
    StartScheduleTableSynchron,
    StopScheduleTable,
    NextScheduleTable,
    SyncScheduleTable,
    SetScheduleTableAsync,
    GetScheduleTableStatus,
    CallTrustedFunction,
    ShutdownOs,
    GetActiveApplicationMode,
    // Issued by the dispatcher and the simulated hardware only.
    Dispatch,
    TaskReturn,
    TakeInterrupt,
    IsrReturn,
    RaiseInterrupt,
    AdvanceCounter,
}

bitflags! {
    /// Calling contexts, used as a permission mask per service.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Contexts: u16 {
        const TASK = 1 << 0;
        const CAT1 = 1 << 1;
        const CAT2 = 1 << 2;
        const ERROR_HOOK = 1 << 3;
        const TASK_HOOK = 1 << 4;
        const ISR_HOOK = 1 << 5;
        const STARTUP_HOOK = 1 << 6;
        const SHUTDOWN_HOOK = 1 << 7;
        const ALARM_CALLBACK = 1 << 8;
        /// The dispatcher or simulated hardware of the owning core.
        const KERNEL = 1 << 9;
        /// Another core delivering a routed request.
        const REMOTE = 1 << 10;

        const TASK_OR_ISR = Self::TASK.bits() | Self::CAT2.bits();
        const ROUTABLE = Self::TASK_OR_ISR.bits() | Self::REMOTE.bits();
        const INFO = Self::TASK_OR_ISR.bits()
            | Self::ERROR_HOOK.bits()
            | Self::TASK_HOOK.bits()
            | Self::REMOTE.bits();
        const HOOKS = Self::ERROR_HOOK.bits()
            | Self::TASK_HOOK.bits()
            | Self::ISR_HOOK.bits()
            | Self::STARTUP_HOOK.bits()
            | Self::SHUTDOWN_HOOK.bits()
            | Self::ALARM_CALLBACK.bits();
    }
}

impl ServiceId {
    /// Contexts allowed to call the service.
    pub fn allowed(self) -> Contexts {
        use ServiceId::*;
        match self {
            ActivateTask | SetEvent | IncrementCounter | SetRelAlarm | SetAbsAlarm
            | CancelAlarm | StartScheduleTableRel | StartScheduleTableAbs
            | StartScheduleTableSynchron | StopScheduleTable | NextScheduleTable
            | SyncScheduleTable | SetScheduleTableAsync | GetScheduleTableStatus => {
                Contexts::ROUTABLE
            }
            TerminateTask | ChainTask | Schedule | WaitEvent | ClearEvent => Contexts::TASK,
            GetTaskId => Contexts::TASK_OR_ISR | Contexts::ERROR_HOOK | Contexts::TASK_HOOK,
            GetTaskState | GetEvent | GetCounterValue | GetElapsedValue | GetAlarm
            | GetAlarmBase => Contexts::INFO,
            GetResource | ReleaseResource | SuspendOsInterrupts | ResumeOsInterrupts
            | CallTrustedFunction => Contexts::TASK_OR_ISR,
            SuspendAllInterrupts | ResumeAllInterrupts | DisableAllInterrupts
            | EnableAllInterrupts => Contexts::TASK_OR_ISR | Contexts::CAT1 | Contexts::HOOKS,
            ShutdownOs => {
                Contexts::TASK_OR_ISR | Contexts::ERROR_HOOK | Contexts::STARTUP_HOOK
            }
            GetActiveApplicationMode => Contexts::TASK_OR_ISR | Contexts::HOOKS,
            Dispatch | TaskReturn | TakeInterrupt | IsrReturn | RaiseInterrupt
            | AdvanceCounter => Contexts::KERNEL,
        }
    }

    /// Services of the interrupt-lock API; callable with interrupts locked.
    pub fn is_interrupt_api(self) -> bool {
        matches!(
            self,
            ServiceId::SuspendOsInterrupts
                | ServiceId::ResumeOsInterrupts
                | ServiceId::SuspendAllInterrupts
                | ServiceId::ResumeAllInterrupts
                | ServiceId::DisableAllInterrupts
                | ServiceId::EnableAllInterrupts
        )
    }
}

/// One kernel request: service plus up to four word-sized arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallRequest {
    pub service: ServiceId,
    pub args: [usize; 4],
}

impl SyscallRequest {
    /// Build a request; missing arguments are zero.
    pub fn new(service: ServiceId, args: &[usize]) -> Self {
        let mut packed = [0; 4];
        for (slot, &arg) in packed.iter_mut().zip(args) {
            *slot = arg;
        }
        Self {
            service,
            args: packed,
        }
    }
}

bitflags! {
    /// Follow-up work the caller's side must do after a reply.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Hints: u8 {
        /// A higher-priority task is ready, or nothing is running.
        const DISPATCH = 0x01;
        /// An interrupt is pending above the current level.
        const INTERRUPT = 0x02;
    }
}

/// Completed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub status: Result<usize, OsError>,
    pub hints: Hints,
}

/// Who issued a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Caller {
    Task(TaskId),
    Isr(IsrId),
    Hook(HookKind),
    /// The core's own dispatcher or simulated hardware.
    Kernel,
    /// Another core forwarding a request for an object owned here.
    Remote(CoreId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    Error,
    PreTask,
    PostTask,
    PreIsr,
    PostIsr,
    Startup,
    Shutdown,
    AlarmCallback,
}

impl HookKind {
    fn context(self) -> Contexts {
        match self {
            HookKind::Error => Contexts::ERROR_HOOK,
            HookKind::PreTask | HookKind::PostTask => Contexts::TASK_HOOK,
            HookKind::PreIsr | HookKind::PostIsr => Contexts::ISR_HOOK,
            HookKind::Startup => Contexts::STARTUP_HOOK,
            HookKind::Shutdown => Contexts::SHUTDOWN_HOOK,
            HookKind::AlarmCallback => Contexts::ALARM_CALLBACK,
        }
    }
}

/// Outcome of [`CoreState::serve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Served {
    Done(Reply),
    /// The object belongs to `core`; deliver `request` there as
    /// [`Caller::Remote`] and hand its status to
    /// [`CoreState::complete_forwarded`]. `chained` is the task whose
    /// `ChainTask` waits for the activation of its successor.
    Forward {
        core: CoreId,
        request: SyscallRequest,
        chained: Option<TaskId>,
    },
}

enum Gate {
    Done(Result<usize, OsError>),
    Forward {
        core: CoreId,
        request: SyscallRequest,
        chained: Option<TaskId>,
    },
}

// ---------------------------------------------------------------------------
// Dispatch outcome encoding
// ---------------------------------------------------------------------------

/// What the dispatcher should run next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Nothing is ready.
    Idle,
    /// Start a new frame for the task's body.
    Start(TaskId),
    /// Continue the task's existing frame.
    Resume(TaskId),
}

impl DispatchOutcome {
    pub fn to_word(self) -> usize {
        match self {
            DispatchOutcome::Idle => 0,
            DispatchOutcome::Start(t) => (t.index() + 1) << 1,
            DispatchOutcome::Resume(t) => ((t.index() + 1) << 1) | 1,
        }
    }

    pub fn from_word(word: usize) -> Self {
        match word >> 1 {
            0 => DispatchOutcome::Idle,
            n if word & 1 == 0 => DispatchOutcome::Start(TaskId::from_index(n - 1)),
            n => DispatchOutcome::Resume(TaskId::from_index(n - 1)),
        }
    }
}

// ---------------------------------------------------------------------------
// The gate
// ---------------------------------------------------------------------------

impl CoreState {
    /// Serve one request on this core.
    pub fn serve(&mut self, caller: Caller, request: &SyscallRequest) -> Served {
        log::debug!("{}: {:?} from {:?} {:?}", self.id(), request.service, caller, request.args);
        let gate = crate::sync::critical_section(|| self.gate(caller, request));
        match gate {
            Gate::Forward {
                core,
                request,
                chained,
            } => Served::Forward {
                core,
                request,
                chained,
            },
            Gate::Done(status) => {
                let status = self.finish(caller, request, status);
                Served::Done(Reply {
                    status,
                    hints: self.hints(),
                })
            }
        }
    }

    /// Serve a request from a context that already runs on the kernel
    /// context (hooks, alarm callbacks, trusted functions).
    pub(crate) fn serve_inline(
        &mut self,
        caller: Caller,
        request: &SyscallRequest,
    ) -> Result<usize, OsError> {
        match self.gate(caller, request) {
            Gate::Forward { .. } => Err(OsError::Core),
            Gate::Done(status) => self.finish(caller, request, status),
        }
    }

    fn finish(
        &mut self,
        caller: Caller,
        request: &SyscallRequest,
        status: Result<usize, OsError>,
    ) -> Result<usize, OsError> {
        let status = match (caller, self.killed_task) {
            (Caller::Task(t), Some(killed)) if t == killed => {
                self.killed_task = None;
                Err(OsError::Killed)
            }
            _ => status,
        };
        match status {
            Err(OsError::Killed) => {}
            Err(error) => self.report(request.service, error, request.args, caller),
            Ok(_) => {}
        }
        status
    }

    /// Finish a request another core served on our behalf. The owner has
    /// reported its own failures already.
    pub(crate) fn complete_forwarded(
        &mut self,
        caller: Caller,
        request: &SyscallRequest,
        chained: Option<TaskId>,
        status: Result<usize, OsError>,
    ) -> Result<usize, OsError> {
        let Some(task) = chained else {
            return status;
        };
        let status = self.chain_accepted(task, status);
        match status {
            Err(OsError::Killed) | Ok(_) => {}
            Err(error) => self.report(request.service, error, request.args, caller),
        }
        status
    }

    /// `ChainTask` to a task of another core: check that the caller may
    /// end, then have the owner activate the successor. The caller ends
    /// once the owner accepted.
    fn forward_chain(&mut self, caller: Caller, core: CoreId, request: &SyscallRequest) -> Gate {
        let checked = self
            .calling_task(caller)
            .and_then(|task| self.check_task_end(task).map(|_| task));
        match checked {
            Ok(task) => Gate::Forward {
                core,
                request: SyscallRequest::new(ServiceId::ActivateTask, &[request.args[0]]),
                chained: Some(task),
            },
            Err(error) => Gate::Done(Err(error)),
        }
    }

    fn gate(&mut self, caller: Caller, request: &SyscallRequest) -> Gate {
        let service = request.service;
        if self.is_shut_down() {
            return Gate::Done(match service {
                ServiceId::Dispatch => Ok(DispatchOutcome::Idle.to_word()),
                _ => Err(OsError::State),
            });
        }

        let context = match self.context_of(caller) {
            Ok(context) => context,
            Err(error) => return Gate::Done(Err(error)),
        };
        if !service.allowed().intersects(context) {
            return Gate::Done(Err(OsError::CallLevel));
        }
        if self.config().status == StatusLevel::Extended
            && !service.is_interrupt_api()
            && self.locks_held_by(caller)
        {
            return Gate::Done(Err(OsError::DisabledInt));
        }

        match self.owner_of(service, &request.args) {
            Err(error) => return Gate::Done(Err(error)),
            Ok(Some(core)) if core != self.id() => {
                return match caller {
                    Caller::Remote(_) => Gate::Done(Err(OsError::Core)),
                    _ if service == ServiceId::ChainTask => self.forward_chain(caller, core, request),
                    _ => Gate::Forward {
                        core,
                        request: *request,
                        chained: None,
                    },
                };
            }
            Ok(_) => {}
        }

        Gate::Done(self.execute(caller, service, &request.args))
    }

    fn context_of(&self, caller: Caller) -> Result<Contexts, OsError> {
        match caller {
            Caller::Task(task) => {
                let config = self.config().task(task).ok_or(OsError::Id)?;
                if config.core != self.id() {
                    return Err(OsError::Core);
                }
                if self.running() != Some(task) {
                    return Err(OsError::Killed);
                }
                if self.interrupts.depth() > 0 {
                    return Err(OsError::CallLevel);
                }
                Ok(Contexts::TASK)
            }
            Caller::Isr(isr) => {
                let config = self.config().isr(isr).ok_or(OsError::Id)?;
                if self.interrupts.current().map(|f| f.isr) != Some(isr) {
                    return Err(OsError::CallLevel);
                }
                Ok(match config.category {
                    IsrCategory::One => Contexts::CAT1,
                    IsrCategory::Two => Contexts::CAT2,
                })
            }
            Caller::Hook(kind) => Ok(kind.context()),
            Caller::Kernel => Ok(Contexts::KERNEL),
            Caller::Remote(_) => Ok(Contexts::REMOTE),
        }
    }

    fn locks_held_by(&self, caller: Caller) -> bool {
        match caller {
            Caller::Task(task) => self.tasks[task.index()].locks.any_held(),
            Caller::Isr(_) | Caller::Hook(_) => self.core_locks.any_held(),
            Caller::Kernel | Caller::Remote(_) => false,
        }
    }

    /// Core owning the object a routable service targets.
    fn owner_of(&self, service: ServiceId, args: &[usize; 4]) -> Result<Option<CoreId>, OsError> {
        use ServiceId::*;
        let config = self.config();
        let core = match service {
            ActivateTask | ChainTask | SetEvent | GetTaskState | GetEvent => {
                config.task(self.task_arg(args[0])?).map(|t| t.core)
            }
            IncrementCounter | GetCounterValue | GetElapsedValue => {
                config.counter(self.counter_arg(args[0])?).map(|c| c.core)
            }
            SetRelAlarm | SetAbsAlarm | CancelAlarm | GetAlarm | GetAlarmBase => {
                config.alarm_core(self.alarm_arg(args[0])?)
            }
            StartScheduleTableRel | StartScheduleTableAbs | StartScheduleTableSynchron
            | StopScheduleTable | NextScheduleTable | SyncScheduleTable
            | SetScheduleTableAsync | GetScheduleTableStatus => {
                config.schedule_table_core(self.table_arg(args[0])?)
            }
            _ => None,
        };
        Ok(core)
    }

    fn execute(&mut self, caller: Caller, service: ServiceId, args: &[usize; 4]) -> Result<usize, OsError> {
        use ServiceId::*;
        match service {
            ActivateTask => self.activate(self.task_arg(args[0])?).map(|_| 0),
            TerminateTask => {
                let task = self.calling_task(caller)?;
                self.terminate(task).map(|_| 0)
            }
            ChainTask => {
                let task = self.calling_task(caller)?;
                let next = self.task_arg(args[0])?;
                self.chain(task, next).map(|_| 0)
            }
            Schedule => {
                let task = self.calling_task(caller)?;
                self.schedule_point(task).map(|_| 0)
            }
            GetTaskId => Ok(self.running().map_or(INVALID_TASK, |t| t.index())),
            GetTaskState => Ok(self.task_state(self.task_arg(args[0])?).code()),

            GetResource => self.get_resource(caller, self.resource_arg(args[0])?).map(|_| 0),
            ReleaseResource => self.release_resource(caller, self.resource_arg(args[0])?).map(|_| 0),

            SetEvent => {
                let task = self.task_arg(args[0])?;
                self.set_event(task, EventMask(args[1] as u32)).map(|_| 0)
            }
            ClearEvent => {
                let task = self.calling_task(caller)?;
                self.clear_event(task, EventMask(args[0] as u32)).map(|_| 0)
            }
            GetEvent => self.get_event(self.task_arg(args[0])?).map(|m| m.0 as usize),
            WaitEvent => {
                let task = self.calling_task(caller)?;
                self.wait_event(task, EventMask(args[0] as u32)).map(|_| 0)
            }

            SuspendOsInterrupts => self.lock_op(caller, LockKind::Os, true),
            ResumeOsInterrupts => self.lock_op(caller, LockKind::Os, false),
            SuspendAllInterrupts => self.lock_op(caller, LockKind::All, true),
            ResumeAllInterrupts => self.lock_op(caller, LockKind::All, false),
            DisableAllInterrupts => self.lock_op(caller, LockKind::Disable, true),
            EnableAllInterrupts => self.lock_op(caller, LockKind::Disable, false),

            IncrementCounter => self.increment_counter(self.counter_arg(args[0])?).map(|_| 0),
            GetCounterValue => Ok(self.counter_value(self.counter_arg(args[0])?) as usize),
            GetElapsedValue => {
                let counter = self.counter_arg(args[0])?;
                let previous = tick_arg(args[1])?;
                self.elapsed_value(counter, previous).map(|t| t as usize)
            }

            SetRelAlarm => {
                let alarm = self.alarm_arg(args[0])?;
                self.set_rel_alarm(alarm, tick_arg(args[1])?, tick_arg(args[2])?)
                    .map(|_| 0)
            }
            SetAbsAlarm => {
                let alarm = self.alarm_arg(args[0])?;
                self.set_abs_alarm(alarm, tick_arg(args[1])?, tick_arg(args[2])?)
                    .map(|_| 0)
            }
            CancelAlarm => self.cancel_alarm(self.alarm_arg(args[0])?).map(|_| 0),
            GetAlarm => self.get_alarm(self.alarm_arg(args[0])?).map(|t| t as usize),
            GetAlarmBase => self.alarm_base(self.alarm_arg(args[0])?).map(|c| c.index()),

            StartScheduleTableRel => {
                let table = self.table_arg(args[0])?;
                self.start_table_rel(table, tick_arg(args[1])?).map(|_| 0)
            }
            StartScheduleTableAbs => {
                let table = self.table_arg(args[0])?;
                self.start_table_abs(table, tick_arg(args[1])?).map(|_| 0)
            }
            StartScheduleTableSynchron => {
                self.start_table_synchron(self.table_arg(args[0])?).map(|_| 0)
            }
            StopScheduleTable => self.stop_table(self.table_arg(args[0])?).map(|_| 0),
            NextScheduleTable => {
                let from = self.table_arg(args[0])?;
                let to = self.table_arg(args[1])?;
                self.next_table(from, to).map(|_| 0)
            }
            SyncScheduleTable => {
                let table = self.table_arg(args[0])?;
                self.sync_table(table, tick_arg(args[1])?).map(|_| 0)
            }
            SetScheduleTableAsync => self.set_table_async(self.table_arg(args[0])?).map(|_| 0),
            GetScheduleTableStatus => Ok(self.table_status(self.table_arg(args[0])?).code()),

            CallTrustedFunction => {
                let function = self.trusted_arg(args[0])?;
                self.call_trusted(caller, function, args[1])
            }
            ShutdownOs => {
                self.shutdown_os(OsError::from_code(args[0] as u8));
                Ok(0)
            }
            GetActiveApplicationMode => Ok(self.app_mode().0 as usize),

            Dispatch => Ok(self.dispatch().to_word()),
            TaskReturn => {
                let task = self.task_arg(args[0])?;
                self.task_return(task, OsError::from_code(args[1] as u8));
                Ok(0)
            }
            TakeInterrupt => Ok(self.take_interrupt().map_or(0, |isr| isr.index() + 1)),
            IsrReturn => self.isr_return(self.isr_arg(args[0])?).map(|_| 0),
            RaiseInterrupt => self.raise_interrupt(self.isr_arg(args[0])?).map(|_| 0),
            AdvanceCounter => {
                let counter = self.counter_arg(args[0])?;
                self.advance_counter(counter, tick_arg(args[1])?);
                Ok(0)
            }
        }
    }

    fn calling_task(&self, caller: Caller) -> Result<TaskId, OsError> {
        match caller {
            Caller::Task(task) => {
                if self.trusted_depth > 0 {
                    Err(OsError::CallLevel)
                } else {
                    Ok(task)
                }
            }
            _ => Err(OsError::CallLevel),
        }
    }

    fn lock_op(&mut self, caller: Caller, kind: LockKind, suspend: bool) -> Result<usize, OsError> {
        let os_level = self.config().os_level;
        let locks = match caller {
            Caller::Task(task) => &mut self.tasks[task.index()].locks,
            Caller::Isr(_) | Caller::Hook(_) => &mut self.core_locks,
            Caller::Kernel | Caller::Remote(_) => return Err(OsError::CallLevel),
        };
        if suspend {
            locks.suspend(kind, &mut self.irq, os_level)?;
        } else {
            locks.resume(kind, &mut self.irq)?;
        }
        Ok(0)
    }

    fn call_trusted(
        &mut self,
        caller: Caller,
        function: TrustedFunctionId,
        arg: usize,
    ) -> Result<usize, OsError> {
        let entry = self.config().trusted_functions[function.index()];
        log::debug!("{}: trusted function {} for {:?}", self.id(), entry.name, caller);
        self.trusted_depth += 1;
        let result = {
            let mut ctx = TrustedContext { core: self, caller };
            (entry.function)(&mut ctx, arg)
        };
        self.trusted_depth -= 1;
        result
    }

    // -- argument decoding ---------------------------------------------------

    fn task_arg(&self, raw: usize) -> Result<TaskId, OsError> {
        index_arg(raw, self.config().tasks.len()).map(TaskId::from_index)
    }

    fn isr_arg(&self, raw: usize) -> Result<IsrId, OsError> {
        index_arg(raw, self.config().isrs.len()).map(IsrId::from_index)
    }

    fn resource_arg(&self, raw: usize) -> Result<ResourceId, OsError> {
        index_arg(raw, self.config().resources.len()).map(ResourceId::from_index)
    }

    fn counter_arg(&self, raw: usize) -> Result<CounterId, OsError> {
        index_arg(raw, self.config().counters.len()).map(CounterId::from_index)
    }

    fn alarm_arg(&self, raw: usize) -> Result<AlarmId, OsError> {
        index_arg(raw, self.config().alarms.len()).map(AlarmId::from_index)
    }

    fn table_arg(&self, raw: usize) -> Result<ScheduleTableId, OsError> {
        index_arg(raw, self.config().schedule_tables.len()).map(ScheduleTableId::from_index)
    }

    fn trusted_arg(&self, raw: usize) -> Result<TrustedFunctionId, OsError> {
        index_arg(raw, self.config().trusted_functions.len()).map(TrustedFunctionId::from_index)
    }
}

fn index_arg(raw: usize, len: usize) -> Result<usize, OsError> {
    if raw < len {
        Ok(raw)
    } else {
        Err(OsError::Id)
    }
}

fn tick_arg(raw: usize) -> Result<Tick, OsError> {
    Tick::try_from(raw).map_err(|_| OsError::Value)
}

// ---------------------------------------------------------------------------
// Trusted functions
// ---------------------------------------------------------------------------

/// Context of a trusted function. Runs on the kernel context of the core on
/// behalf of the original caller; nested services are served inline.
///
/// Only objects of the calling core are reachable from here: a nested
/// service that targets another core's object fails with `Core`.
pub struct TrustedContext<'k> {
    core: &'k mut CoreState,
    caller: Caller,
}

impl TrustedContext<'_> {
    pub fn caller(&self) -> Caller {
        self.caller
    }
}

impl Services for TrustedContext<'_> {
    fn call(&mut self, request: SyscallRequest) -> Result<usize, OsError> {
        self.core.serve_inline(self.caller, &request)
    }

    fn core_id(&self) -> CoreId {
        self.core.id()
    }

    fn config(&self) -> &'static crate::config::KernelConfig {
        self.core.config()
    }
}
