//! # Object Handles and Scalar Types
//!
//! Every kernel object (task, ISR, resource, counter, alarm, schedule table,
//! trusted function) is referenced by an opaque newtype index into the static
//! configuration tables. Handles are validated once at the syscall gate; past
//! that point the kernel indexes its dense per-core arrays directly.

use core::fmt;
use core::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// Counter ticks.
pub type Tick = u32;

macro_rules! object_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u16);

        impl $name {
            #[inline]
            pub const fn new(index: u16) -> Self {
                Self(index)
            }

            /// Position of the object in its configuration table.
            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }

            #[inline]
            pub(crate) const fn from_index(index: usize) -> Self {
                Self(index as u16)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

object_id!(
    /// Handle of a configured task.
    TaskId,
    "task#"
);
object_id!(
    /// Handle of a configured interrupt service routine.
    IsrId,
    "isr#"
);
object_id!(
    /// Handle of a configured resource.
    ResourceId,
    "res#"
);
object_id!(
    /// Handle of a configured counter.
    CounterId,
    "ctr#"
);
object_id!(
    /// Handle of a configured alarm.
    AlarmId,
    "alarm#"
);
object_id!(
    /// Handle of a configured schedule table.
    ScheduleTableId,
    "st#"
);
object_id!(
    /// Index into the trusted-function table.
    TrustedFunctionId,
    "tf#"
);

/// Physical processor core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoreId(pub u8);

impl CoreId {
    pub const BOOT: CoreId = CoreId(0);

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "core{}", self.0)
    }
}

/// Task priority. A larger value is more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Priority(pub u8);

impl Priority {
    pub const LOWEST: Priority = Priority(0);

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Interrupt masking level of a core.
///
/// `ENABLED` lets every interrupt through; an interrupt source is accepted
/// only while its own level is strictly above the current level. `ALL`
/// masks everything, including category-1 sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct IntLevel(pub u8);

impl IntLevel {
    pub const ENABLED: IntLevel = IntLevel(0);
    pub const ALL: IntLevel = IntLevel(u8::MAX);
}

/// Application mode selected at `StartOS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AppMode(pub u8);

impl AppMode {
    pub const DEFAULT: AppMode = AppMode(0);
}

/// Event bits of an extended task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventMask(pub u32);

impl EventMask {
    pub const NONE: EventMask = EventMask(0);

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn intersects(self, other: EventMask) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for EventMask {
    type Output = EventMask;
    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventMask {
    fn bitor_assign(&mut self, rhs: EventMask) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for EventMask {
    type Output = EventMask;
    fn bitand(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 & rhs.0)
    }
}

impl Not for EventMask {
    type Output = EventMask;
    fn not(self) -> EventMask {
        EventMask(!self.0)
    }
}
