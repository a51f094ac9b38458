//! # Architecture Abstraction Layer
//!
//! The kernel only needs one thing from the hardware: reading and writing the
//! interrupt masking level of the current core. On Cortex-M that level lives
//! in BASEPRI/PRIMASK; everywhere else it is a simulated register that the
//! host backend and the tests can inspect.

use crate::types::IntLevel;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m4;

/// Access to a core's interrupt masking level.
pub trait InterruptControl {
    fn level(&self) -> IntLevel;
    fn set_level(&mut self, level: IntLevel);
}

/// Interrupt level held in memory, for host builds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatedLevel {
    level: IntLevel,
}

impl SimulatedLevel {
    pub const fn new() -> Self {
        Self {
            level: IntLevel::ENABLED,
        }
    }
}

impl InterruptControl for SimulatedLevel {
    #[inline]
    fn level(&self) -> IntLevel {
        self.level
    }

    #[inline]
    fn set_level(&mut self, level: IntLevel) {
        self.level = level;
    }
}

/// The interrupt controller each core uses on this target.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub type CoreInterrupts = cortex_m4::BasePriority;

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub type CoreInterrupts = SimulatedLevel;
