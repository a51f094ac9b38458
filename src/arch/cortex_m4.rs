//! # Cortex-M4 Port Layer
//!
//! Maps kernel interrupt levels onto the NVIC masking registers and provides
//! the SysTick time base that drives the system counter.
//!
//! ## Level Mapping
//!
//! With 4 implemented priority bits the NVIC has 16 priorities, where a
//! numerically lower value is more urgent. Kernel levels count the other way:
//!
//! | Kernel level      | Register state                    |
//! |-------------------|-----------------------------------|
//! | `ENABLED` (0)     | BASEPRI = 0 (no masking)          |
//! | `n` in 1..=15     | BASEPRI = (16 - n) << 4           |
//! | `n` in 16..=254   | BASEPRI = 0x10 (all but prio 0)   |
//! | `ALL` (255)       | PRIMASK set                       |
//!
//! An ISR configured at kernel level `n` must be given NVIC priority
//! `(16 - n) << 4` so that raising BASEPRI to level `n` masks it.

use core::sync::atomic::{AtomicBool, Ordering};

use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::register::{basepri, primask};

use super::InterruptControl;
use crate::types::IntLevel;

/// Processor clock feeding SysTick (STM32F4 HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Rate of the system counter.
pub const TICK_HZ: u32 = 1000;

const PRIO_BITS: u8 = 4;

// ---------------------------------------------------------------------------
// Interrupt level
// ---------------------------------------------------------------------------

/// The BASEPRI/PRIMASK pair of the executing core.
#[derive(Debug, Default)]
pub struct BasePriority {
    /// PRIMASK cannot express "was set by us" so the ALL level is tracked here.
    all_masked: bool,
}

impl BasePriority {
    pub const fn new() -> Self {
        Self { all_masked: false }
    }

    fn basepri_for(level: IntLevel) -> u8 {
        let levels = 1u8 << PRIO_BITS;
        match level.0 {
            0 => 0,
            n if n < levels => (levels - n) << (8 - PRIO_BITS),
            _ => 1 << (8 - PRIO_BITS),
        }
    }

    fn level_for(basepri: u8) -> IntLevel {
        if basepri == 0 {
            return IntLevel::ENABLED;
        }
        let levels = 1u8 << PRIO_BITS;
        IntLevel(levels - (basepri >> (8 - PRIO_BITS)))
    }
}

impl InterruptControl for BasePriority {
    fn level(&self) -> IntLevel {
        if self.all_masked && primask::read().is_inactive() {
            IntLevel::ALL
        } else {
            Self::level_for(basepri::read())
        }
    }

    fn set_level(&mut self, level: IntLevel) {
        if level == IntLevel::ALL {
            cortex_m::interrupt::disable();
            self.all_masked = true;
            return;
        }
        // SAFETY: lowering or raising BASEPRI only changes which interrupts
        // may preempt; the kernel state it protects is owned by the caller.
        unsafe { basepri::write(Self::basepri_for(level)) };
        if self.all_masked {
            self.all_masked = false;
            // SAFETY: PRIMASK was set by a previous `set_level(ALL)`.
            unsafe { cortex_m::interrupt::enable() };
        }
    }
}

// ---------------------------------------------------------------------------
// SysTick
// ---------------------------------------------------------------------------

static TICK_PENDING: AtomicBool = AtomicBool::new(false);

/// Configure SysTick to fire at `TICK_HZ`.
pub fn configure_systick(syst: &mut cortex_m::peripheral::SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

/// Consume a pending tick, if SysTick has fired since the last call.
#[inline]
pub fn take_tick() -> bool {
    TICK_PENDING.swap(false, Ordering::AcqRel)
}

/// Sleep until the next interrupt.
#[inline]
pub fn wait_for_interrupt() {
    cortex_m::asm::wfi();
}

/// SysTick exception handler. The counter itself is advanced by the kernel
/// context when it picks the tick up.
#[no_mangle]
pub extern "C" fn SysTick() {
    TICK_PENDING.store(true, Ordering::Release);
}
