//! # Syscall Bridge
//!
//! The one seam between code that issues kernel requests and the kernel that
//! serves them. Two backends exist:
//!
//! - [`DirectBridge`]: the kernel is served in-line on the caller's stack.
//!   Used on bare metal and in single-threaded tests.
//! - [`crate::host::HostPort`]: each core's kernel runs on its own thread and
//!   requests are passed over channels (`std` only).
//!
//! Both give the same replies for the same sequence of requests.

use crate::kernel::Kernel;
use crate::syscall::{Caller, Reply, SyscallRequest};
use crate::types::CoreId;

/// Carries a request to the kernel of `core` and waits for the reply.
pub trait Bridge {
    fn invoke(&mut self, core: CoreId, caller: Caller, request: SyscallRequest) -> Reply;
}

/// Serves requests by calling straight into a borrowed [`Kernel`].
pub struct DirectBridge<'k> {
    kernel: &'k mut Kernel,
}

impl<'k> DirectBridge<'k> {
    pub fn new(kernel: &'k mut Kernel) -> Self {
        Self { kernel }
    }

    pub fn kernel(&self) -> &Kernel {
        self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut Kernel {
        self.kernel
    }
}

impl Bridge for DirectBridge<'_> {
    #[inline]
    fn invoke(&mut self, core: CoreId, caller: Caller, request: SyscallRequest) -> Reply {
        self.kernel.call(core, caller, request)
    }
}

impl<B: Bridge + ?Sized> Bridge for &mut B {
    #[inline]
    fn invoke(&mut self, core: CoreId, caller: Caller, request: SyscallRequest) -> Reply {
        (**self).invoke(core, caller, request)
    }
}
