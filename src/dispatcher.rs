//! # Dispatcher
//!
//! Runs task and ISR bodies on one core on top of any [`Bridge`].
//!
//! Bodies are run-to-completion state machines. Starting an activation
//! calls [`TaskBody::restart`] and then [`TaskBody::run`]; a task that
//! waited for an event is re-entered with `run` alone and picks up from the
//! state it recorded before waiting. Preemption nests: a service call that
//! readies a higher-priority task runs that task's body before the call
//! returns.
//!
//! ```text
//!   settle(hints)
//!     ├─ INTERRUPT → TakeInterrupt → ISR body → IsrReturn   (repeat)
//!     └─ DISPATCH  → Dispatch
//!          ├─ Idle                   → return
//!          ├─ Resume(task on stack)  → return to that body
//!          ├─ Start(task)            → restart + run body
//!          └─ Resume(waiting task)   → run body
//! ```
//!
//! A body can only finish by returning the [`Exit`] that `terminate_task`,
//! `chain_task` or `wait_event` hand out. Returning an error instead is
//! reported as a missing `TerminateTask` and the kernel ends the activation.

use crate::bridge::Bridge;
use crate::config::{KernelConfig, MAX_ISRS, MAX_TASKS};
use crate::error::OsError;
use crate::services::Services;
use crate::syscall::{Caller, DispatchOutcome, Hints, Reply, ServiceId, SyscallRequest};
use crate::types::{CoreId, CounterId, EventMask, IsrId, TaskId, Tick};

/// Proof that a task body left the kernel properly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exit(ExitKind);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Terminated,
    Chained(TaskId),
    Waiting,
}

impl Exit {
    pub fn kind(self) -> ExitKind {
        self.0
    }
}

/// Code of a task.
pub trait TaskBody {
    fn run(&mut self, ctx: &mut TaskContext<'_, '_>) -> Result<Exit, OsError>;

    /// Called before each fresh activation.
    fn restart(&mut self) {}
}

impl<F> TaskBody for F
where
    F: FnMut(&mut TaskContext<'_, '_>) -> Result<Exit, OsError>,
{
    fn run(&mut self, ctx: &mut TaskContext<'_, '_>) -> Result<Exit, OsError> {
        self(ctx)
    }
}

/// Code of an interrupt service routine.
pub trait IsrBody {
    fn run(&mut self, ctx: &mut IsrContext<'_, '_>) -> Result<(), OsError>;
}

impl<F> IsrBody for F
where
    F: FnMut(&mut IsrContext<'_, '_>) -> Result<(), OsError>,
{
    fn run(&mut self, ctx: &mut IsrContext<'_, '_>) -> Result<(), OsError> {
        self(ctx)
    }
}

/// Drives the bodies of one core.
pub struct Dispatcher<'a> {
    bridge: &'a mut dyn Bridge,
    config: &'static KernelConfig,
    core: CoreId,
    tasks: [Option<&'a mut dyn TaskBody>; MAX_TASKS],
    isrs: [Option<&'a mut dyn IsrBody>; MAX_ISRS],
    /// Tasks whose bodies are on the native stack, innermost last.
    frames: [Option<TaskId>; MAX_TASKS],
    depth: usize,
}

impl<'a> Dispatcher<'a> {
    pub fn new(bridge: &'a mut dyn Bridge, config: &'static KernelConfig, core: CoreId) -> Self {
        Self {
            bridge,
            config,
            core,
            tasks: core::array::from_fn(|_| None),
            isrs: core::array::from_fn(|_| None),
            frames: [None; MAX_TASKS],
            depth: 0,
        }
    }

    pub fn core(&self) -> CoreId {
        self.core
    }

    pub fn register_task(&mut self, task: TaskId, body: &'a mut dyn TaskBody) -> Result<(), OsError> {
        let config = self.config.task(task).ok_or(OsError::Id)?;
        if config.core != self.core {
            return Err(OsError::Core);
        }
        self.tasks[task.index()] = Some(body);
        Ok(())
    }

    pub fn register_isr(&mut self, isr: IsrId, body: &'a mut dyn IsrBody) -> Result<(), OsError> {
        let config = self.config.isr(isr).ok_or(OsError::Id)?;
        if config.core != self.core {
            return Err(OsError::Core);
        }
        self.isrs[isr.index()] = Some(body);
        Ok(())
    }

    /// Run ready work until the core is idle.
    pub fn run(&mut self) {
        self.settle(Hints::DISPATCH | Hints::INTERRUPT);
    }

    /// One tick of `counter`, then whatever it made ready.
    pub fn tick(&mut self, counter: CounterId) {
        let reply = self.kernel(ServiceId::AdvanceCounter, &[counter.index(), 1]);
        self.settle(reply.hints);
    }

    /// Advance `counter` by `ticks`, one tick at a time.
    pub fn tick_n(&mut self, counter: CounterId, ticks: Tick) {
        for _ in 0..ticks {
            self.tick(counter);
        }
    }

    /// Request `isr` and serve it if the level allows.
    pub fn raise_interrupt(&mut self, isr: IsrId) -> Result<(), OsError> {
        let reply = self.kernel(ServiceId::RaiseInterrupt, &[isr.index()]);
        reply.status?;
        self.settle(reply.hints);
        Ok(())
    }

    fn kernel(&mut self, service: ServiceId, args: &[usize]) -> Reply {
        self.bridge
            .invoke(self.core, Caller::Kernel, SyscallRequest::new(service, args))
    }

    fn on_stack(&self, task: TaskId) -> bool {
        self.frames[..self.depth].contains(&Some(task))
    }

    fn settle(&mut self, mut hints: Hints) {
        loop {
            if hints.contains(Hints::INTERRUPT) {
                hints = self.take_interrupts();
            }
            if !hints.contains(Hints::DISPATCH) {
                return;
            }
            let reply = self.kernel(ServiceId::Dispatch, &[]);
            let outcome = reply
                .status
                .map_or(DispatchOutcome::Idle, DispatchOutcome::from_word);
            hints = match outcome {
                DispatchOutcome::Start(task) => self.run_task(task, true),
                DispatchOutcome::Resume(task) if !self.on_stack(task) => self.run_task(task, false),
                DispatchOutcome::Idle | DispatchOutcome::Resume(_) => {
                    if reply.hints.contains(Hints::INTERRUPT) {
                        Hints::INTERRUPT
                    } else {
                        return;
                    }
                }
            };
        }
    }

    fn take_interrupts(&mut self) -> Hints {
        loop {
            let reply = self.kernel(ServiceId::TakeInterrupt, &[]);
            let isr = match reply.status {
                Ok(0) | Err(_) => return reply.hints,
                Ok(word) => IsrId::from_index(word - 1),
            };
            match self.isrs[isr.index()].take() {
                Some(body) => {
                    let result = body.run(&mut IsrContext {
                        dispatcher: self,
                        isr,
                    });
                    self.isrs[isr.index()] = Some(body);
                    if let Err(error) = result {
                        log::debug!("{}: {} returned {}", self.core, isr, error);
                    }
                }
                None => log::warn!("{}: no body for {}", self.core, isr),
            }
            let reply = self.kernel(ServiceId::IsrReturn, &[isr.index()]);
            if !reply.hints.contains(Hints::INTERRUPT) {
                return reply.hints;
            }
        }
    }

    fn run_task(&mut self, task: TaskId, fresh: bool) -> Hints {
        let Some(body) = self.tasks[task.index()].take() else {
            log::warn!("{}: no body for {}", self.core, task);
            self.kernel(ServiceId::TaskReturn, &[task.index(), 0]);
            return Hints::DISPATCH;
        };
        if fresh {
            body.restart();
        }
        self.frames[self.depth] = Some(task);
        self.depth += 1;
        let result = body.run(&mut TaskContext {
            dispatcher: self,
            task,
        });
        self.depth -= 1;
        self.frames[self.depth] = None;
        self.tasks[task.index()] = Some(body);

        match result {
            Ok(exit) => log::trace!("{}: {} left with {:?}", self.core, task, exit.kind()),
            Err(OsError::Killed) => log::debug!("{}: {} was killed", self.core, task),
            Err(error) => {
                self.kernel(ServiceId::TaskReturn, &[task.index(), error.code() as usize]);
            }
        }
        Hints::DISPATCH
    }
}

/// Kernel access of a running task.
pub struct TaskContext<'d, 'a> {
    dispatcher: &'d mut Dispatcher<'a>,
    task: TaskId,
}

impl TaskContext<'_, '_> {
    pub fn task(&self) -> TaskId {
        self.task
    }

    /// Issue a request without acting on the hints in the reply.
    fn invoke(&mut self, service: ServiceId, args: &[usize]) -> Result<usize, OsError> {
        let dispatcher = &mut *self.dispatcher;
        dispatcher
            .bridge
            .invoke(
                dispatcher.core,
                Caller::Task(self.task),
                SyscallRequest::new(service, args),
            )
            .status
    }

    /// `TerminateTask`.
    pub fn terminate_task(&mut self) -> Result<Exit, OsError> {
        self.invoke(ServiceId::TerminateTask, &[])?;
        Ok(Exit(ExitKind::Terminated))
    }

    /// `ChainTask`.
    pub fn chain_task(&mut self, next: TaskId) -> Result<Exit, OsError> {
        self.invoke(ServiceId::ChainTask, &[next.index()])?;
        Ok(Exit(ExitKind::Chained(next)))
    }

    /// `WaitEvent`. The body is re-entered once one of `mask` is set; if
    /// one already is, that happens right away.
    pub fn wait_event(&mut self, mask: EventMask) -> Result<Exit, OsError> {
        self.invoke(ServiceId::WaitEvent, &[mask.0 as usize])?;
        Ok(Exit(ExitKind::Waiting))
    }

    /// `Schedule`.
    pub fn schedule(&mut self) -> Result<(), OsError> {
        self.call(SyscallRequest::new(ServiceId::Schedule, &[]))
            .map(drop)
    }

    /// `ClearEvent` on the calling task.
    pub fn clear_event(&mut self, mask: EventMask) -> Result<(), OsError> {
        self.call(SyscallRequest::new(ServiceId::ClearEvent, &[mask.0 as usize]))
            .map(drop)
    }

    /// Simulate an interrupt request from this core's hardware.
    pub fn raise_interrupt(&mut self, isr: IsrId) -> Result<(), OsError> {
        self.dispatcher.raise_interrupt(isr)
    }
}

impl Services for TaskContext<'_, '_> {
    fn call(&mut self, request: SyscallRequest) -> Result<usize, OsError> {
        let dispatcher = &mut *self.dispatcher;
        let reply = dispatcher
            .bridge
            .invoke(dispatcher.core, Caller::Task(self.task), request);
        if reply.status != Err(OsError::Killed) {
            dispatcher.settle(reply.hints);
        }
        reply.status
    }

    fn core_id(&self) -> CoreId {
        self.dispatcher.core
    }

    fn config(&self) -> &'static KernelConfig {
        self.dispatcher.config
    }
}

/// Kernel access of a running ISR.
pub struct IsrContext<'d, 'a> {
    dispatcher: &'d mut Dispatcher<'a>,
    isr: IsrId,
}

impl IsrContext<'_, '_> {
    pub fn isr(&self) -> IsrId {
        self.isr
    }
}

impl Services for IsrContext<'_, '_> {
    fn call(&mut self, request: SyscallRequest) -> Result<usize, OsError> {
        let dispatcher = &mut *self.dispatcher;
        let reply = dispatcher
            .bridge
            .invoke(dispatcher.core, Caller::Isr(self.isr), request);
        // Tasks only run once the outermost ISR has returned.
        if reply.hints.contains(Hints::INTERRUPT) {
            dispatcher.take_interrupts();
        }
        reply.status
    }

    fn core_id(&self) -> CoreId {
        self.dispatcher.core
    }

    fn config(&self) -> &'static KernelConfig {
        self.dispatcher.config
    }
}
