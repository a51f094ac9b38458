//! # Error Types
//!
//! Three families of failures exist in the kernel:
//!
//! | Type          | Returned to caller | Reported to         |
//! |---------------|--------------------|---------------------|
//! | [`OsError`]   | yes                | error hook          |
//! | [`Panic`]     | never              | protection hook     |
//! | [`ConfigError`] | from `Kernel::new` | nobody (boot fails) |
//!
//! A service that returns an [`OsError`] has had no effect on kernel state.

use thiserror::Error;

use crate::syscall::{Caller, ServiceId};
use crate::types::{AlarmId, CoreId, CounterId, IsrId, ResourceId, ScheduleTableId, TaskId};

/// Status of a failed kernel service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum OsError {
    /// The object may not be used by the caller, or the ceiling is violated.
    #[error("access denied")]
    Access,
    /// Service called from a context that may not use it.
    #[error("service not allowed at this call level")]
    CallLevel,
    /// Unknown or unsuitable object handle.
    #[error("invalid object id")]
    Id,
    /// Too many activations of a task.
    #[error("activation limit exceeded")]
    Limit,
    /// Nothing to undo: resume without suspend, cancel of an idle alarm, ...
    #[error("no matching operation")]
    NoFunc,
    /// Resource still held, or released out of order.
    #[error("resource still occupied")]
    Resource,
    /// Object is in the wrong state for the service.
    #[error("object state does not allow the service")]
    State,
    /// Parameter outside its permitted range.
    #[error("value out of range")]
    Value,
    /// Object belongs to a core that cannot serve the request.
    #[error("core mismatch")]
    Core,
    /// Kernel service called with interrupts suspended or disabled.
    #[error("interrupts are disabled")]
    DisabledInt,
    /// Interrupt-lock nesting limit reached or non-nestable lock nested.
    #[error("nesting limit exceeded")]
    Nesting,
    /// Task or ISR body ended without terminating properly.
    #[error("task ended without TerminateTask")]
    MissingEnd,
    /// The calling context was killed by a protection action.
    #[error("calling context was killed")]
    Killed,
}

impl OsError {
    /// OSEK/AUTOSAR `StatusType` value. `E_OK` (0) is never produced here.
    pub const fn code(self) -> u8 {
        match self {
            OsError::Access => 1,
            OsError::CallLevel => 2,
            OsError::Id => 3,
            OsError::Limit => 4,
            OsError::NoFunc => 5,
            OsError::Resource => 6,
            OsError::State => 7,
            OsError::Value => 8,
            OsError::Core => 9,
            OsError::DisabledInt => 10,
            OsError::Nesting => 11,
            OsError::MissingEnd => 12,
            OsError::Killed => 13,
        }
    }

    pub const fn from_code(code: u8) -> Option<OsError> {
        Some(match code {
            1 => OsError::Access,
            2 => OsError::CallLevel,
            3 => OsError::Id,
            4 => OsError::Limit,
            5 => OsError::NoFunc,
            6 => OsError::Resource,
            7 => OsError::State,
            8 => OsError::Value,
            9 => OsError::Core,
            10 => OsError::DisabledInt,
            11 => OsError::Nesting,
            12 => OsError::MissingEnd,
            13 => OsError::Killed,
            _ => return None,
        })
    }
}

/// What the error hook is told about a failed service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorInfo {
    pub core: CoreId,
    pub service: ServiceId,
    pub error: OsError,
    pub params: [usize; 4],
    pub caller: Caller,
}

/// Internal inconsistencies. Never returned to a caller: the protection hook
/// decides what happens to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Panic {
    #[error("{alarm} marked in use but missing from the queue of {counter}")]
    AlarmListCorrupted { counter: CounterId, alarm: AlarmId },
    #[error("ready queue of {core} is inconsistent")]
    ReadyQueueCorrupted { core: CoreId },
    #[error("no free activation record for {task}")]
    ActivationOverflow { task: TaskId },
    #[error("cross-core queue {from} -> {to} is full")]
    CrossCoreQueueFull { from: CoreId, to: CoreId },
}

/// Corrective action requested by the protection hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtectionAction {
    /// Stop the core. Every later service fails.
    #[default]
    Shutdown,
    /// Kill the task that was running when the fault was detected.
    TerminateTask,
    /// Kill every task of the core and stop its alarms and schedule tables.
    TerminateApplication,
}

/// Rejected configuration tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("core count {0} is zero or exceeds the build maximum")]
    CoreCount(usize),
    #[error("{what}: {count} entries exceed the build maximum of {max}")]
    Capacity {
        what: &'static str,
        count: usize,
        max: usize,
    },
    #[error("{0} is assigned to a core that does not exist")]
    TaskCore(TaskId),
    #[error("{0} has a priority outside the configured range")]
    TaskPriority(TaskId),
    #[error("{0} needs at least one activation, and extended tasks exactly one")]
    TaskActivations(TaskId),
    #[error("activation records of core {0} exceed the build maximum")]
    ActivationRecords(CoreId),
    #[error("{0} has an interrupt level that does not fit its category")]
    IsrLevel(IsrId),
    #[error("{0} is assigned to a core that does not exist")]
    IsrCore(IsrId),
    #[error("{0} has a ceiling outside the configured range")]
    ResourceCeiling(ResourceId),
    #[error("{0} has an invalid maximum or minimum cycle")]
    CounterRange(CounterId),
    #[error("{0} refers to an object that does not exist")]
    AlarmTarget(AlarmId),
    #[error("{0} has an invalid expiry-point layout")]
    ScheduleTableLayout(ScheduleTableId),
    #[error("{0} refers to an object that does not exist")]
    ScheduleTableTarget(ScheduleTableId),
    #[error("the OS interrupt level must lie strictly between ENABLED and ALL")]
    OsLevel,
    /// Host backend only.
    #[error("the kernel thread of {0} could not be started")]
    HostThread(CoreId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_distinct_and_reversible() {
        let all = [
            OsError::Access,
            OsError::CallLevel,
            OsError::Id,
            OsError::Limit,
            OsError::NoFunc,
            OsError::Resource,
            OsError::State,
            OsError::Value,
            OsError::Core,
            OsError::DisabledInt,
            OsError::Nesting,
            OsError::MissingEnd,
            OsError::Killed,
        ];
        for error in all {
            assert_ne!(error.code(), 0);
            assert_eq!(OsError::from_code(error.code()), Some(error));
        }
        assert_eq!(OsError::from_code(0), None);
    }
}
