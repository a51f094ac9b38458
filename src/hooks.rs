//! # Hook Routines
//!
//! Configuration-time callbacks. Every method has a no-op default, so a
//! configuration only overrides the hooks it actually wants; [`NoHooks`] is
//! the configuration with none.
//!
//! Hooks run inline on the kernel context of their core. The
//! [`HookContext`] they receive can issue the services permitted in that
//! hook directly, without going through a syscall bridge.

use core::mem;

use crate::error::{ErrorInfo, OsError, Panic, ProtectionAction};
use crate::interrupt::InterruptLocks;
use crate::kernel::CoreState;
use crate::services::Services;
use crate::syscall::{Caller, HookKind, SyscallRequest};
use crate::types::{CoreId, IsrId, TaskId};

/// Callbacks into the system integrator's code.
pub trait OsHooks: Sync {
    /// After autostart objects are set up, before the first dispatch.
    fn startup_hook(&self, _ctx: &mut HookContext<'_>) {}

    /// When a core shuts down. `error` is `None` for an orderly shutdown.
    fn shutdown_hook(&self, _ctx: &mut HookContext<'_>, _error: Option<OsError>) {}

    /// After any service failed. Errors raised inside this hook are not
    /// reported again.
    fn error_hook(&self, _ctx: &mut HookContext<'_>, _info: &ErrorInfo) {}

    fn pre_task_hook(&self, _ctx: &mut HookContext<'_>, _task: TaskId) {}

    fn post_task_hook(&self, _ctx: &mut HookContext<'_>, _task: TaskId) {}

    fn pre_isr_hook(&self, _ctx: &mut HookContext<'_>, _isr: IsrId) {}

    fn post_isr_hook(&self, _ctx: &mut HookContext<'_>, _isr: IsrId) {}

    /// A fatal inconsistency was detected. The kernel state of the core is
    /// not safe to inspect, so no context is passed.
    fn protection_hook(&self, _core: CoreId, _fault: Panic) -> ProtectionAction {
        ProtectionAction::Shutdown
    }
}

/// A configuration without hooks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl OsHooks for NoHooks {}

/// Kernel access handed to a hook or alarm callback.
pub struct HookContext<'k> {
    core: &'k mut CoreState,
    kind: HookKind,
}

impl<'k> HookContext<'k> {
    pub(crate) fn new(core: &'k mut CoreState, kind: HookKind) -> Self {
        Self { core, kind }
    }

    pub fn kind(&self) -> HookKind {
        self.kind
    }

    /// Read-only view of the core, for diagnostics.
    pub fn core(&self) -> &CoreState {
        self.core
    }
}

impl Services for HookContext<'_> {
    fn call(&mut self, request: SyscallRequest) -> Result<usize, OsError> {
        self.core.serve_inline(Caller::Hook(self.kind), &request)
    }

    fn core_id(&self) -> CoreId {
        self.core.id()
    }

    fn config(&self) -> &'static crate::config::KernelConfig {
        self.core.config()
    }
}

impl CoreState {
    /// Run a hook with a fresh interrupt-lock state. Locks the hook forgets
    /// to release are dropped when it returns.
    pub(crate) fn with_hook(
        &mut self,
        kind: HookKind,
        f: impl FnOnce(&dyn crate::hooks::OsHooks, &mut HookContext<'_>),
    ) {
        let hooks = self.config().hooks;
        let outer = mem::replace(&mut self.core_locks, InterruptLocks::new());
        {
            let mut ctx = HookContext::new(self, kind);
            f(hooks, &mut ctx);
        }
        if self.core_locks.any_held() {
            log::warn!("{}: {:?} hook returned with interrupts locked", self.id(), kind);
            self.core_locks.force_release(&mut self.irq);
        }
        self.core_locks = outer;
    }
}
