//! # Scheduler
//!
//! Task lifecycle and dispatch on one core.
//!
//! ## Dispatch Rules
//!
//! 1. **Select**: the oldest activation record of the highest priority tier.
//! 2. **Preempt**: a running task is displaced only by a strictly higher
//!    tier. It goes back to the *head* of the tier it currently runs at.
//! 3. **Activate / wake**: new activations and tasks released from
//!    `WaitEvent` go to the *tail* of their base priority tier.
//! 4. **Non-preemptable tasks** run at the highest task priority of the
//!    core. `Schedule` lets them yield to anything above their base
//!    priority; they are queued at the head of that tier.
//!
//! Task bodies never unwind through the kernel. Terminating ends the
//! activation; the next dispatch of the task constructs a fresh frame
//! ([`DispatchOutcome::Start`]) while a preempted or waiting task keeps its
//! frame ([`DispatchOutcome::Resume`]).

use crate::error::{OsError, Panic};
use crate::kernel::CoreState;
use crate::syscall::{Caller, DispatchOutcome, HookKind, ServiceId};
use crate::task::TaskState;
use crate::types::{EventMask, Priority, TaskId};

impl CoreState {
    // -----------------------------------------------------------------------
    // Activation and termination
    // -----------------------------------------------------------------------

    /// `ActivateTask`: queue one more activation of `task`.
    pub(crate) fn activate(&mut self, task: TaskId) -> Result<(), OsError> {
        let config = &self.config().tasks[task.index()];
        let tcb = &mut self.tasks[task.index()];
        if tcb.activations >= config.max_activations {
            return Err(OsError::Limit);
        }
        if tcb.activations == 0 {
            tcb.state = TaskState::Ready;
            tcb.current_priority = config.priority;
            tcb.entered = false;
            tcb.events = EventMask::NONE;
            tcb.wait_mask = EventMask::NONE;
        }
        tcb.activations += 1;
        let pending = tcb.activations;
        log::debug!("{}: activate {} ({} pending)", self.id(), task, pending);
        self.enqueue_back(task, config.priority);
        Ok(())
    }

    /// A task may only end with no interrupt lock and no resource held,
    /// whatever the status level.
    pub(crate) fn check_task_end(&self, task: TaskId) -> Result<(), OsError> {
        let tcb = &self.tasks[task.index()];
        if tcb.locks.any_held() {
            return Err(OsError::DisabledInt);
        }
        if tcb.holds_resources() {
            return Err(OsError::Resource);
        }
        Ok(())
    }

    /// `TerminateTask` for the running task.
    pub(crate) fn terminate(&mut self, task: TaskId) -> Result<(), OsError> {
        self.check_task_end(task)?;
        self.end_activation(task);
        Ok(())
    }

    /// `ChainTask` to a task of this core: terminate `task` and activate
    /// `next`. Either both happen or neither. A successor owned by another
    /// core is activated there first and `task` ends in [`chain_accepted`].
    ///
    /// [`chain_accepted`]: CoreState::chain_accepted
    pub(crate) fn chain(&mut self, task: TaskId, next: TaskId) -> Result<(), OsError> {
        self.check_task_end(task)?;
        let next_config = self.config().tasks.get(next.index()).ok_or(OsError::Id)?;
        if next_config.core != self.id() {
            return Err(OsError::Core);
        }
        if next != task && self.tasks[next.index()].activations >= next_config.max_activations {
            return Err(OsError::Limit);
        }
        self.end_activation(task);
        self.activate(next)
    }

    /// The owning core answered the activation half of a cross-core
    /// `ChainTask`. `task` ends only if the successor was activated.
    pub(crate) fn chain_accepted(
        &mut self,
        task: TaskId,
        status: Result<usize, OsError>,
    ) -> Result<usize, OsError> {
        status?;
        if self.running() != Some(task) {
            return Err(OsError::Killed);
        }
        // The caller was blocked meanwhile; its locks and resources are unchanged.
        self.end_activation(task);
        Ok(0)
    }

    /// `Schedule`: let a non-preemptable task yield to higher priorities.
    pub(crate) fn schedule_point(&mut self, task: TaskId) -> Result<(), OsError> {
        if self.tasks[task.index()].holds_resources() {
            return Err(OsError::Resource);
        }
        self.yield_requested = true;
        Ok(())
    }

    /// A task body ended without `TerminateTask` or `ChainTask`. Report it
    /// and end the activation with everything it held released.
    pub(crate) fn task_return(&mut self, task: TaskId, cause: Option<OsError>) {
        if self.running() != Some(task) {
            return;
        }
        let cause = cause.map_or(0, |e| e.code() as usize);
        self.report(
            ServiceId::TaskReturn,
            OsError::MissingEnd,
            [task.index(), cause, 0, 0],
            Caller::Task(task),
        );
        self.release_all_resources(task);
        let mut locks = self.tasks[task.index()].locks;
        if locks.any_held() {
            locks.force_release(&mut self.irq);
            self.tasks[task.index()].locks = locks;
        }
        self.end_activation(task);
    }

    /// Finish the running activation of `task`.
    fn end_activation(&mut self, task: TaskId) {
        self.leave_running(task);
        let base = self.base_priority(task);
        let tcb = &mut self.tasks[task.index()];
        tcb.activations = tcb.activations.saturating_sub(1);
        tcb.entered = false;
        tcb.current_priority = base;
        tcb.state = if tcb.activations > 0 {
            TaskState::Ready
        } else {
            TaskState::Suspended
        };
        let pending = tcb.activations;
        log::debug!("{}: {} ended ({} pending)", self.id(), task, pending);
    }

    /// The running task stops running: post-task hook, then clear.
    fn leave_running(&mut self, task: TaskId) {
        self.with_hook(HookKind::PostTask, |hooks, ctx| hooks.post_task_hook(ctx, task));
        self.running = None;
        self.yield_requested = false;
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Pick the task to run. The running task is kept unless a strictly
    /// higher tier is ready.
    pub(crate) fn dispatch(&mut self) -> DispatchOutcome {
        if let Some(task) = self.running {
            if !self.needs_dispatch() {
                self.yield_requested = false;
                return DispatchOutcome::Resume(task);
            }
            let requeue_at = if self.yield_requested {
                self.base_priority(task)
            } else {
                self.tasks[task.index()].current_priority
            };
            log::debug!("{}: {} preempted", self.id(), task);
            self.leave_running(task);
            self.tasks[task.index()].state = TaskState::Ready;
            self.enqueue_front(task, requeue_at);
        }

        let Some((task, _)) = self.queue.pop_highest() else {
            return DispatchOutcome::Idle;
        };
        let run_priority = self.run_priority(task);
        let tcb = &mut self.tasks[task.index()];
        if tcb.state != TaskState::Ready {
            self.fatal(Panic::ReadyQueueCorrupted { core: self.id() });
            return DispatchOutcome::Idle;
        }
        tcb.state = TaskState::Running;
        let outcome = if tcb.entered {
            DispatchOutcome::Resume(task)
        } else {
            tcb.entered = true;
            tcb.current_priority = run_priority;
            DispatchOutcome::Start(task)
        };
        self.running = Some(task);
        log::debug!("{}: dispatch {:?}", self.id(), outcome);
        self.with_hook(HookKind::PreTask, |hooks, ctx| hooks.pre_task_hook(ctx, task));
        outcome
    }

    fn enqueue_back(&mut self, task: TaskId, priority: Priority) {
        if self.queue.push_back(task, priority).is_err() {
            self.fatal(Panic::ActivationOverflow { task });
        }
    }

    fn enqueue_front(&mut self, task: TaskId, priority: Priority) {
        if self.queue.push_front(task, priority).is_err() {
            self.fatal(Panic::ActivationOverflow { task });
        }
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    fn extended_task(&self, task: TaskId) -> Result<(), OsError> {
        if self.config().tasks[task.index()].extended {
            Ok(())
        } else {
            Err(OsError::Access)
        }
    }

    pub(crate) fn set_event(&mut self, task: TaskId, mask: EventMask) -> Result<(), OsError> {
        self.extended_task(task)?;
        let run_priority = self.run_priority(task);
        let base = self.base_priority(task);
        let tcb = &mut self.tasks[task.index()];
        if tcb.state == TaskState::Suspended {
            return Err(OsError::State);
        }
        tcb.events |= mask;
        if tcb.state == TaskState::Waiting && tcb.events.intersects(tcb.wait_mask) {
            tcb.state = TaskState::Ready;
            tcb.current_priority = run_priority;
            log::debug!("{}: {} released from wait", self.id(), task);
            self.enqueue_back(task, base);
        }
        Ok(())
    }

    pub(crate) fn clear_event(&mut self, task: TaskId, mask: EventMask) -> Result<(), OsError> {
        self.extended_task(task)?;
        let tcb = &mut self.tasks[task.index()];
        tcb.events = tcb.events & !mask;
        Ok(())
    }

    pub(crate) fn get_event(&self, task: TaskId) -> Result<EventMask, OsError> {
        self.extended_task(task)?;
        let tcb = &self.tasks[task.index()];
        if tcb.state == TaskState::Suspended {
            return Err(OsError::State);
        }
        Ok(tcb.events)
    }

    /// `WaitEvent`: the task keeps running if one of `mask` is already set.
    pub(crate) fn wait_event(&mut self, task: TaskId, mask: EventMask) -> Result<(), OsError> {
        self.extended_task(task)?;
        if self.tasks[task.index()].holds_resources() {
            return Err(OsError::Resource);
        }
        let tcb = &mut self.tasks[task.index()];
        tcb.wait_mask = mask;
        if tcb.events.intersects(mask) {
            return Ok(());
        }
        self.leave_running(task);
        self.tasks[task.index()].state = TaskState::Waiting;
        log::debug!("{}: {} waits for {:#x}", self.id(), task, mask.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KernelConfig, QueueAlgorithm, TaskConfig};
    use crate::types::CoreId;

    static TASKS: [TaskConfig; 4] = [
        TaskConfig::basic("a", CoreId(0), Priority(5)),
        TaskConfig::basic("b", CoreId(0), Priority(3)).activations(2),
        TaskConfig::basic("ext", CoreId(0), Priority(4)).with_events(),
        TaskConfig::basic("np", CoreId(0), Priority(1)).non_preemptive(),
    ];

    static CLZ: KernelConfig = KernelConfig {
        tasks: &TASKS,
        ..KernelConfig::EMPTY
    };

    static LINKED: KernelConfig = KernelConfig {
        tasks: &TASKS,
        queue: QueueAlgorithm::Linked,
        ..KernelConfig::EMPTY
    };

    fn core(config: &'static KernelConfig) -> CoreState {
        CoreState::new(CoreId(0), config)
    }

    #[test]
    fn test_highest_priority_dispatched_first() {
        for config in [&CLZ, &LINKED] {
            let mut core = core(config);
            core.activate(TaskId(1)).unwrap();
            core.activate(TaskId(0)).unwrap();
            assert_eq!(core.dispatch(), DispatchOutcome::Start(TaskId(0)));
            assert_eq!(core.task_state(TaskId(1)), TaskState::Ready);
        }
    }

    #[test]
    fn test_activation_limit() {
        let mut core = core(&CLZ);
        core.activate(TaskId(1)).unwrap();
        core.activate(TaskId(1)).unwrap();
        assert_eq!(core.activate(TaskId(1)), Err(OsError::Limit));
        assert_eq!(core.activations(TaskId(1)), 2);
    }

    #[test]
    fn test_multiple_activations_restart_the_body() {
        let mut core = core(&CLZ);
        core.activate(TaskId(1)).unwrap();
        core.activate(TaskId(1)).unwrap();
        assert_eq!(core.dispatch(), DispatchOutcome::Start(TaskId(1)));
        core.terminate(TaskId(1)).unwrap();
        assert_eq!(core.task_state(TaskId(1)), TaskState::Ready);
        assert_eq!(core.dispatch(), DispatchOutcome::Start(TaskId(1)));
        core.terminate(TaskId(1)).unwrap();
        assert_eq!(core.task_state(TaskId(1)), TaskState::Suspended);
        assert_eq!(core.dispatch(), DispatchOutcome::Idle);
    }

    #[test]
    fn test_preempted_task_resumes_before_equal_priority() {
        static SAME: [TaskConfig; 3] = [
            TaskConfig::basic("first", CoreId(0), Priority(2)),
            TaskConfig::basic("second", CoreId(0), Priority(2)),
            TaskConfig::basic("urgent", CoreId(0), Priority(7)),
        ];
        static CONFIG: KernelConfig = KernelConfig {
            tasks: &SAME,
            ..KernelConfig::EMPTY
        };
        let mut core = core(&CONFIG);
        core.activate(TaskId(0)).unwrap();
        assert_eq!(core.dispatch(), DispatchOutcome::Start(TaskId(0)));
        core.activate(TaskId(1)).unwrap();
        core.activate(TaskId(2)).unwrap();
        assert_eq!(core.dispatch(), DispatchOutcome::Start(TaskId(2)));
        core.terminate(TaskId(2)).unwrap();
        assert_eq!(core.dispatch(), DispatchOutcome::Resume(TaskId(0)));
    }

    #[test]
    fn test_non_preemptive_task_yields_only_at_schedule() {
        let mut core = core(&CLZ);
        core.activate(TaskId(3)).unwrap();
        assert_eq!(core.dispatch(), DispatchOutcome::Start(TaskId(3)));
        assert_eq!(core.task_priority(TaskId(3)), Priority(5));

        core.activate(TaskId(0)).unwrap();
        assert!(!core.needs_dispatch());
        assert_eq!(core.dispatch(), DispatchOutcome::Resume(TaskId(3)));

        core.schedule_point(TaskId(3)).unwrap();
        assert!(core.needs_dispatch());
        assert_eq!(core.dispatch(), DispatchOutcome::Start(TaskId(0)));
        core.terminate(TaskId(0)).unwrap();
        assert_eq!(core.dispatch(), DispatchOutcome::Resume(TaskId(3)));
        assert_eq!(core.task_priority(TaskId(3)), Priority(5));
    }

    #[test]
    fn test_wait_and_set_event() {
        let mut core = core(&CLZ);
        core.activate(TaskId(2)).unwrap();
        assert_eq!(core.dispatch(), DispatchOutcome::Start(TaskId(2)));
        core.wait_event(TaskId(2), EventMask(0b10)).unwrap();
        assert_eq!(core.task_state(TaskId(2)), TaskState::Waiting);
        assert_eq!(core.running(), None);

        core.set_event(TaskId(2), EventMask(0b01)).unwrap();
        assert_eq!(core.task_state(TaskId(2)), TaskState::Waiting);
        core.set_event(TaskId(2), EventMask(0b10)).unwrap();
        assert_eq!(core.task_state(TaskId(2)), TaskState::Ready);
        assert_eq!(core.dispatch(), DispatchOutcome::Resume(TaskId(2)));
        assert_eq!(core.get_event(TaskId(2)), Ok(EventMask(0b11)));
    }

    #[test]
    fn test_wait_with_event_already_set_keeps_running() {
        let mut core = core(&CLZ);
        core.activate(TaskId(2)).unwrap();
        core.dispatch();
        core.set_event(TaskId(2), EventMask(1)).unwrap();
        core.wait_event(TaskId(2), EventMask(1)).unwrap();
        assert_eq!(core.task_state(TaskId(2)), TaskState::Running);
    }

    #[test]
    fn test_events_on_basic_task_rejected() {
        let mut core = core(&CLZ);
        core.activate(TaskId(0)).unwrap();
        assert_eq!(core.set_event(TaskId(0), EventMask(1)), Err(OsError::Access));
        assert_eq!(core.set_event(TaskId(2), EventMask(1)), Err(OsError::State));
    }

    #[test]
    fn test_chain_to_self_requeues() {
        let mut core = core(&CLZ);
        core.activate(TaskId(0)).unwrap();
        core.dispatch();
        core.chain(TaskId(0), TaskId(0)).unwrap();
        assert_eq!(core.activations(TaskId(0)), 1);
        assert_eq!(core.dispatch(), DispatchOutcome::Start(TaskId(0)));
    }

    #[test]
    fn test_chain_respects_target_limit() {
        let mut core = core(&CLZ);
        core.activate(TaskId(1)).unwrap();
        core.activate(TaskId(1)).unwrap();
        core.activate(TaskId(0)).unwrap();
        core.dispatch();
        assert_eq!(core.chain(TaskId(0), TaskId(1)), Err(OsError::Limit));
        assert_eq!(core.running(), Some(TaskId(0)));
    }

    #[test]
    fn test_interrupt_locked_task_keeps_cpu_and_cannot_end() {
        use crate::interrupt::LockKind;
        use crate::types::IntLevel;

        let mut core = core(&CLZ);
        core.activate(TaskId(1)).unwrap();
        assert_eq!(core.dispatch(), DispatchOutcome::Start(TaskId(1)));
        core.tasks[1]
            .locks
            .suspend(LockKind::Os, &mut core.irq, IntLevel(8))
            .unwrap();

        core.activate(TaskId(0)).unwrap();
        assert!(!core.needs_dispatch());
        assert_eq!(core.dispatch(), DispatchOutcome::Resume(TaskId(1)));
        assert_eq!(core.terminate(TaskId(1)), Err(OsError::DisabledInt));
        assert_eq!(core.chain(TaskId(1), TaskId(0)), Err(OsError::DisabledInt));
        assert_eq!(core.running(), Some(TaskId(1)));

        core.tasks[1].locks.resume(LockKind::Os, &mut core.irq).unwrap();
        assert_eq!(core.dispatch(), DispatchOutcome::Start(TaskId(0)));
    }
}
