//! # Service API
//!
//! Typed front-end of the syscall interface. Anything that can issue a
//! raw [`SyscallRequest`] (a task or ISR context on top of a bridge, a hook,
//! a trusted function) implements [`Services::call`] and gets the whole
//! OSEK/AUTOSAR service surface for free. Services only a task may use
//! (terminate, chain, wait, ...) live on the task context itself.

use crate::alarm::AlarmBase;
use crate::config::KernelConfig;
use crate::counter::counter_add;
use crate::error::OsError;
use crate::schedule_table::TableStatus;
use crate::syscall::{ServiceId, SyscallRequest};
use crate::task::TaskState;
use crate::types::{
    AlarmId, AppMode, CoreId, CounterId, EventMask, ResourceId, ScheduleTableId, TaskId, Tick,
    TrustedFunctionId,
};

/// Sentinel returned by `GetTaskID` when no task is running.
pub(crate) const INVALID_TASK: usize = usize::MAX;

pub trait Services {
    /// Issue one request and wait for its result.
    fn call(&mut self, request: SyscallRequest) -> Result<usize, OsError>;

    /// Core the caller runs on.
    fn core_id(&self) -> CoreId;

    fn config(&self) -> &'static KernelConfig;

    // -- Tasks ---------------------------------------------------------------

    fn activate_task(&mut self, task: TaskId) -> Result<(), OsError> {
        self.call(SyscallRequest::new(ServiceId::ActivateTask, &[task.index()]))
            .map(drop)
    }

    /// Task running on this core, if any.
    fn get_task_id(&mut self) -> Result<Option<TaskId>, OsError> {
        let raw = self.call(SyscallRequest::new(ServiceId::GetTaskId, &[]))?;
        Ok((raw != INVALID_TASK).then(|| TaskId::from_index(raw)))
    }

    fn get_task_state(&mut self, task: TaskId) -> Result<TaskState, OsError> {
        let raw = self.call(SyscallRequest::new(ServiceId::GetTaskState, &[task.index()]))?;
        TaskState::from_code(raw).ok_or(OsError::State)
    }

    // -- Resources -----------------------------------------------------------

    fn get_resource(&mut self, resource: ResourceId) -> Result<(), OsError> {
        self.call(SyscallRequest::new(ServiceId::GetResource, &[resource.index()]))
            .map(drop)
    }

    fn release_resource(&mut self, resource: ResourceId) -> Result<(), OsError> {
        self.call(SyscallRequest::new(ServiceId::ReleaseResource, &[resource.index()]))
            .map(drop)
    }

    // -- Events --------------------------------------------------------------

    fn set_event(&mut self, task: TaskId, mask: EventMask) -> Result<(), OsError> {
        self.call(SyscallRequest::new(
            ServiceId::SetEvent,
            &[task.index(), mask.0 as usize],
        ))
        .map(drop)
    }

    fn get_event(&mut self, task: TaskId) -> Result<EventMask, OsError> {
        let raw = self.call(SyscallRequest::new(ServiceId::GetEvent, &[task.index()]))?;
        Ok(EventMask(raw as u32))
    }

    // -- Interrupt locks -----------------------------------------------------

    fn suspend_os_interrupts(&mut self) -> Result<(), OsError> {
        self.call(SyscallRequest::new(ServiceId::SuspendOsInterrupts, &[]))
            .map(drop)
    }

    fn resume_os_interrupts(&mut self) -> Result<(), OsError> {
        self.call(SyscallRequest::new(ServiceId::ResumeOsInterrupts, &[]))
            .map(drop)
    }

    fn suspend_all_interrupts(&mut self) -> Result<(), OsError> {
        self.call(SyscallRequest::new(ServiceId::SuspendAllInterrupts, &[]))
            .map(drop)
    }

    fn resume_all_interrupts(&mut self) -> Result<(), OsError> {
        self.call(SyscallRequest::new(ServiceId::ResumeAllInterrupts, &[]))
            .map(drop)
    }

    fn disable_all_interrupts(&mut self) -> Result<(), OsError> {
        self.call(SyscallRequest::new(ServiceId::DisableAllInterrupts, &[]))
            .map(drop)
    }

    fn enable_all_interrupts(&mut self) -> Result<(), OsError> {
        self.call(SyscallRequest::new(ServiceId::EnableAllInterrupts, &[]))
            .map(drop)
    }

    // -- Counters ------------------------------------------------------------

    fn increment_counter(&mut self, counter: CounterId) -> Result<(), OsError> {
        self.call(SyscallRequest::new(ServiceId::IncrementCounter, &[counter.index()]))
            .map(drop)
    }

    fn get_counter_value(&mut self, counter: CounterId) -> Result<Tick, OsError> {
        let raw = self.call(SyscallRequest::new(ServiceId::GetCounterValue, &[counter.index()]))?;
        Ok(raw as Tick)
    }

    /// Ticks since `value`; `value` is updated to the current count.
    fn get_elapsed_value(&mut self, counter: CounterId, value: &mut Tick) -> Result<Tick, OsError> {
        let raw = self.call(SyscallRequest::new(
            ServiceId::GetElapsedValue,
            &[counter.index(), *value as usize],
        ))?;
        let elapsed = raw as Tick;
        let max = self
            .config()
            .counter(counter)
            .map(|c| c.max_allowed_value)
            .ok_or(OsError::Id)?;
        *value = counter_add(*value, elapsed, max);
        Ok(elapsed)
    }

    // -- Alarms --------------------------------------------------------------

    fn set_rel_alarm(&mut self, alarm: AlarmId, increment: Tick, cycle: Tick) -> Result<(), OsError> {
        self.call(SyscallRequest::new(
            ServiceId::SetRelAlarm,
            &[alarm.index(), increment as usize, cycle as usize],
        ))
        .map(drop)
    }

    fn set_abs_alarm(&mut self, alarm: AlarmId, start: Tick, cycle: Tick) -> Result<(), OsError> {
        self.call(SyscallRequest::new(
            ServiceId::SetAbsAlarm,
            &[alarm.index(), start as usize, cycle as usize],
        ))
        .map(drop)
    }

    fn cancel_alarm(&mut self, alarm: AlarmId) -> Result<(), OsError> {
        self.call(SyscallRequest::new(ServiceId::CancelAlarm, &[alarm.index()]))
            .map(drop)
    }

    /// Ticks until the alarm expires.
    fn get_alarm(&mut self, alarm: AlarmId) -> Result<Tick, OsError> {
        let raw = self.call(SyscallRequest::new(ServiceId::GetAlarm, &[alarm.index()]))?;
        Ok(raw as Tick)
    }

    fn get_alarm_base(&mut self, alarm: AlarmId) -> Result<AlarmBase, OsError> {
        let raw = self.call(SyscallRequest::new(ServiceId::GetAlarmBase, &[alarm.index()]))?;
        self.config()
            .counter(CounterId::from_index(raw))
            .map(AlarmBase::from)
            .ok_or(OsError::Id)
    }

    // -- Schedule tables -----------------------------------------------------

    fn start_schedule_table_rel(&mut self, table: ScheduleTableId, offset: Tick) -> Result<(), OsError> {
        self.call(SyscallRequest::new(
            ServiceId::StartScheduleTableRel,
            &[table.index(), offset as usize],
        ))
        .map(drop)
    }

    fn start_schedule_table_abs(&mut self, table: ScheduleTableId, start: Tick) -> Result<(), OsError> {
        self.call(SyscallRequest::new(
            ServiceId::StartScheduleTableAbs,
            &[table.index(), start as usize],
        ))
        .map(drop)
    }

    fn start_schedule_table_synchron(&mut self, table: ScheduleTableId) -> Result<(), OsError> {
        self.call(SyscallRequest::new(
            ServiceId::StartScheduleTableSynchron,
            &[table.index()],
        ))
        .map(drop)
    }

    fn stop_schedule_table(&mut self, table: ScheduleTableId) -> Result<(), OsError> {
        self.call(SyscallRequest::new(ServiceId::StopScheduleTable, &[table.index()]))
            .map(drop)
    }

    /// Start `to` when the current round of `from` ends.
    fn next_schedule_table(&mut self, from: ScheduleTableId, to: ScheduleTableId) -> Result<(), OsError> {
        self.call(SyscallRequest::new(
            ServiceId::NextScheduleTable,
            &[from.index(), to.index()],
        ))
        .map(drop)
    }

    /// Tell the table that global time is `value` ticks into its round.
    fn sync_schedule_table(&mut self, table: ScheduleTableId, value: Tick) -> Result<(), OsError> {
        self.call(SyscallRequest::new(
            ServiceId::SyncScheduleTable,
            &[table.index(), value as usize],
        ))
        .map(drop)
    }

    fn set_schedule_table_async(&mut self, table: ScheduleTableId) -> Result<(), OsError> {
        self.call(SyscallRequest::new(
            ServiceId::SetScheduleTableAsync,
            &[table.index()],
        ))
        .map(drop)
    }

    fn get_schedule_table_status(&mut self, table: ScheduleTableId) -> Result<TableStatus, OsError> {
        let raw = self.call(SyscallRequest::new(
            ServiceId::GetScheduleTableStatus,
            &[table.index()],
        ))?;
        TableStatus::from_code(raw).ok_or(OsError::State)
    }

    // -- Miscellaneous -------------------------------------------------------

    fn call_trusted_function(&mut self, function: TrustedFunctionId, arg: usize) -> Result<usize, OsError> {
        self.call(SyscallRequest::new(
            ServiceId::CallTrustedFunction,
            &[function.index(), arg],
        ))
    }

    fn shutdown_os(&mut self, error: Option<OsError>) -> Result<(), OsError> {
        let code = error.map_or(0, |e| e.code() as usize);
        self.call(SyscallRequest::new(ServiceId::ShutdownOs, &[code]))
            .map(drop)
    }

    fn get_active_application_mode(&mut self) -> Result<AppMode, OsError> {
        let raw = self.call(SyscallRequest::new(ServiceId::GetActiveApplicationMode, &[]))?;
        Ok(AppMode(raw as u8))
    }
}
