//! # Critical Sections
//!
//! Kernel state is only ever mutated by the context that owns the core. On
//! bare metal that context can still be interrupted, so each service runs
//! inside a critical section. Host builds serialise through the per-core
//! kernel thread instead and the section is a plain call.

/// Run `f` with interrupts masked on bare-metal targets.
#[cfg(all(target_arch = "arm", target_os = "none"))]
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    cortex_m::interrupt::free(|_cs| f())
}

/// Run `f`. The caller already owns the core exclusively.
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}
