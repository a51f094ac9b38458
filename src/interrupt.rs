//! # Interrupt Lock Subsystem
//!
//! Three lock kinds share one state machine per kind:
//!
//! ```text
//!   UNLOCKED (n = 0) ── suspend ──► LOCKED(1) ── suspend ──► LOCKED(n+1)
//!          ▲                            │                        │
//!          └────────── resume ──────────┘◄──────── resume ───────┘
//! ```
//!
//! The first lock of a context captures the current level. While any lock is
//! held the level is the highest ceiling among the held kinds (never below
//! the captured one), so kinds may be resumed in any order; releasing the
//! last lock restores the captured level exactly. `Disable` does not nest.
//!
//! `SuspendOSInterrupts` inside an `All` or `Disable` region changes
//! nothing; only its matching resume is remembered, and that resume is a
//! no-op as well.
//!
//! Lock state is kept per task (while a task runs) and per core (for ISRs,
//! hooks and alarm callbacks).

use core::mem;

use crate::arch::InterruptControl;
use crate::config::{IsrCategory, SUSPEND_NEST_LIMIT};
use crate::error::OsError;
use crate::kernel::CoreState;
use crate::syscall::{Caller, HookKind, ServiceId};
use crate::types::{IntLevel, IsrId};

/// The three interrupt lock kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    /// `SuspendOSInterrupts`: masks category-2 sources.
    Os,
    /// `SuspendAllInterrupts`: masks everything, nestable.
    All,
    /// `DisableAllInterrupts`: masks everything, not nestable.
    Disable,
}

impl LockKind {
    fn ceiling(self, os_level: IntLevel) -> IntLevel {
        match self {
            LockKind::Os => os_level,
            LockKind::All | LockKind::Disable => IntLevel::ALL,
        }
    }
}

/// Nesting counters of one execution context plus the level that was
/// current before its first lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterruptLocks {
    os: u8,
    all: u8,
    disable: u8,
    /// `Os` suspends issued inside an `All` or `Disable` region.
    os_skipped: u8,
    /// Ceiling of the `Os` kind, captured when it was taken.
    os_ceiling: IntLevel,
    base: Option<IntLevel>,
}

impl InterruptLocks {
    pub const fn new() -> Self {
        Self {
            os: 0,
            all: 0,
            disable: 0,
            os_skipped: 0,
            os_ceiling: IntLevel::ENABLED,
            base: None,
        }
    }

    fn count(&mut self, kind: LockKind) -> &mut u8 {
        match kind {
            LockKind::Os => &mut self.os,
            LockKind::All => &mut self.all,
            LockKind::Disable => &mut self.disable,
        }
    }

    pub fn nesting(&self, kind: LockKind) -> u8 {
        match kind {
            LockKind::Os => self.os + self.os_skipped,
            LockKind::All => self.all,
            LockKind::Disable => self.disable,
        }
    }

    /// Any lock of any kind is held.
    pub fn any_held(&self) -> bool {
        self.os > 0 || self.all > 0 || self.disable > 0
    }

    /// Level implied by the kinds still held.
    fn held_level(&self) -> Option<IntLevel> {
        let base = self.base?;
        let mut level = base;
        if self.os > 0 {
            level = level.max(self.os_ceiling);
        }
        if self.all > 0 || self.disable > 0 {
            level = IntLevel::ALL;
        }
        Some(level)
    }

    pub fn suspend(
        &mut self,
        kind: LockKind,
        irq: &mut dyn InterruptControl,
        os_level: IntLevel,
    ) -> Result<(), OsError> {
        let nesting = self.nesting(kind);
        if nesting > 0 && (kind == LockKind::Disable || nesting == SUSPEND_NEST_LIMIT) {
            return Err(OsError::Nesting);
        }
        if kind == LockKind::Os && (self.all > 0 || self.disable > 0) {
            self.os_skipped += 1;
            return Ok(());
        }
        let nesting = *self.count(kind);
        if !self.any_held() {
            self.base = Some(irq.level());
        }
        if kind == LockKind::Os && nesting == 0 {
            self.os_ceiling = kind.ceiling(os_level);
        }
        *self.count(kind) += 1;
        if let Some(level) = self.held_level() {
            irq.set_level(level);
        }
        Ok(())
    }

    pub fn resume(&mut self, kind: LockKind, irq: &mut dyn InterruptControl) -> Result<(), OsError> {
        if kind == LockKind::Os && self.os_skipped > 0 {
            self.os_skipped -= 1;
            return Ok(());
        }
        let count = self.count(kind);
        if *count == 0 {
            return Err(OsError::NoFunc);
        }
        *count -= 1;
        let level = if self.any_held() {
            self.held_level()
        } else {
            self.base.take()
        };
        if let Some(level) = level {
            irq.set_level(level);
        }
        Ok(())
    }

    /// Drop every lock, restoring the level that was current before the
    /// outermost one. Used when a task or ISR ends with locks still held.
    pub fn force_release(&mut self, irq: &mut dyn InterruptControl) {
        if let Some(level) = self.base {
            irq.set_level(level);
        }
        *self = Self::new();
    }
}

// ---------------------------------------------------------------------------
// Interrupt delivery
// ---------------------------------------------------------------------------

/// An ISR in progress on a core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsrFrame {
    pub isr: IsrId,
    /// Level before entry, restored on exit.
    pub saved_level: IntLevel,
    /// Most recently taken resource of the ISR.
    pub last_resource: Option<crate::types::ResourceId>,
    /// Lock state of the interrupted context, put back on exit.
    pub outer_locks: InterruptLocks,
}

/// Pending requests and the nesting stack of ISRs on one core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterruptState {
    pending: u32,
    stack: [Option<IsrFrame>; crate::config::MAX_ISRS],
    depth: usize,
}

impl InterruptState {
    pub const fn new() -> Self {
        Self {
            pending: 0,
            stack: [None; crate::config::MAX_ISRS],
            depth: 0,
        }
    }

    pub fn raise(&mut self, isr: IsrId) {
        self.pending |= 1 << isr.index();
    }

    pub fn is_pending(&self, isr: IsrId) -> bool {
        self.pending & (1 << isr.index()) != 0
    }

    /// Pending ISR with the highest level above `current`, if any.
    /// Equal levels go to the lower ISR index.
    pub fn deliverable(
        &self,
        current: IntLevel,
        level_of: impl Fn(IsrId) -> IntLevel,
    ) -> Option<IsrId> {
        let mut best: Option<(IsrId, IntLevel)> = None;
        let mut bits = self.pending;
        while bits != 0 {
            let index = bits.trailing_zeros() as usize;
            bits &= bits - 1;
            let isr = IsrId::from_index(index);
            let level = level_of(isr);
            if level > current && best.map_or(true, |(_, l)| level > l) {
                best = Some((isr, level));
            }
        }
        best.map(|(isr, _)| isr)
    }

    pub fn enter(&mut self, isr: IsrId, saved_level: IntLevel, outer_locks: InterruptLocks) {
        self.pending &= !(1 << isr.index());
        // Every ISR runs above the level it interrupted, so the stack can
        // never hold the same ISR twice.
        self.stack[self.depth] = Some(IsrFrame {
            isr,
            saved_level,
            last_resource: None,
            outer_locks,
        });
        self.depth += 1;
    }

    pub fn leave(&mut self) -> Option<IsrFrame> {
        if self.depth == 0 {
            return None;
        }
        self.depth -= 1;
        self.stack[self.depth].take()
    }

    pub fn current(&self) -> Option<&IsrFrame> {
        self.depth.checked_sub(1).and_then(|top| self.stack[top].as_ref())
    }

    pub fn current_mut(&mut self) -> Option<&mut IsrFrame> {
        match self.depth.checked_sub(1) {
            Some(top) => self.stack[top].as_mut(),
            None => None,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn clear_pending(&mut self) {
        self.pending = 0;
    }
}

// ---------------------------------------------------------------------------
// Kernel glue
// ---------------------------------------------------------------------------

impl CoreState {
    fn isr_level(&self, isr: IsrId) -> IntLevel {
        self.config().isr(isr).map_or(IntLevel::ENABLED, |i| i.level)
    }

    /// Enter the highest pending ISR that the current level lets through.
    pub(crate) fn take_interrupt(&mut self) -> Option<IsrId> {
        let config = self.config();
        let isr = self.interrupts.deliverable(self.irq.level(), |isr| {
            config.isr(isr).map_or(IntLevel::ENABLED, |i| i.level)
        })?;
        let saved = self.irq.level();
        self.irq.set_level(self.isr_level(isr));
        let outer = mem::take(&mut self.core_locks);
        self.interrupts.enter(isr, saved, outer);
        log::trace!("{}: enter {} (level {:?})", self.id(), isr, saved);
        if config.isrs[isr.index()].category == IsrCategory::Two {
            self.with_hook(HookKind::PreIsr, |hooks, ctx| hooks.pre_isr_hook(ctx, isr));
        }
        Some(isr)
    }

    /// Leave `isr`, which must be the innermost one. Locks and resources it
    /// still holds are released and reported.
    pub(crate) fn isr_return(&mut self, isr: IsrId) -> Result<(), OsError> {
        if self.interrupts.current().map(|f| f.isr) != Some(isr) {
            return Err(OsError::State);
        }
        let caller = Caller::Isr(isr);
        if self.core_locks.any_held() {
            self.report(ServiceId::IsrReturn, OsError::DisabledInt, [isr.index(), 0, 0, 0], caller);
            self.core_locks.force_release(&mut self.irq);
        }
        if self.interrupts.current().and_then(|f| f.last_resource).is_some() {
            self.report(ServiceId::IsrReturn, OsError::Resource, [isr.index(), 0, 0, 0], caller);
            self.release_isr_resources(isr);
        }
        if self.config().isrs[isr.index()].category == IsrCategory::Two {
            self.with_hook(HookKind::PostIsr, |hooks, ctx| hooks.post_isr_hook(ctx, isr));
        }
        if let Some(frame) = self.interrupts.leave() {
            self.irq.set_level(frame.saved_level);
            self.core_locks = frame.outer_locks;
        }
        log::trace!("{}: leave {}", self.id(), isr);
        Ok(())
    }

    /// Mark `isr` pending. Only sources of this core can be raised here.
    pub(crate) fn raise_interrupt(&mut self, isr: IsrId) -> Result<(), OsError> {
        if self.config().isrs[isr.index()].core != self.id() {
            return Err(OsError::Core);
        }
        self.interrupts.raise(isr);
        Ok(())
    }
}
