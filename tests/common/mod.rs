//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use ecuos::syscall::DispatchOutcome;
use ecuos::{
    AppMode, Caller, CoreId, CoreState, CounterId, Kernel, KernelConfig, OsError, ServiceId,
    Services, SyscallRequest, TaskId, Tick,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Give a fixture built at run time the `'static` lifetime configuration
/// tables need.
pub fn leak<T>(value: T) -> &'static T {
    Box::leak(Box::new(value))
}

pub fn leak_slice<T>(items: Vec<T>) -> &'static [T] {
    Box::leak(items.into_boxed_slice())
}

/// A started single-core kernel driven request by request, the way a
/// dispatcher would drive it.
pub struct Harness {
    pub kernel: Kernel,
    core: CoreId,
}

impl Harness {
    pub fn start(config: &'static KernelConfig) -> Self {
        init_logging();
        let mut kernel = Kernel::new(config).expect("configuration is valid");
        kernel.start_os(AppMode::DEFAULT);
        Self {
            kernel,
            core: CoreId(0),
        }
    }

    pub fn core(&self) -> &CoreState {
        self.kernel.core(self.core).expect("core 0 exists")
    }

    pub fn dispatch(&mut self) -> DispatchOutcome {
        self.kernel
            .call(self.core, Caller::Kernel, SyscallRequest::new(ServiceId::Dispatch, &[]))
            .status
            .map_or(DispatchOutcome::Idle, DispatchOutcome::from_word)
    }

    /// Advance `counter` one tick at a time.
    pub fn tick(&mut self, counter: CounterId, ticks: Tick) {
        for _ in 0..ticks {
            let request = SyscallRequest::new(ServiceId::AdvanceCounter, &[counter.index(), 1]);
            let reply = self.kernel.call(self.core, Caller::Kernel, request);
            assert!(reply.status.is_ok(), "tick of {counter} failed: {:?}", reply.status);
        }
    }

    /// `TerminateTask` issued by the running `task`.
    pub fn terminate(&mut self, task: TaskId) -> Result<usize, OsError> {
        self.task(task)
            .call(SyscallRequest::new(ServiceId::TerminateTask, &[]))
    }

    /// Services issued by `task`, which must be the running task.
    pub fn task(&mut self, task: TaskId) -> Client<'_> {
        Client {
            kernel: &mut self.kernel,
            core: self.core,
            caller: Caller::Task(task),
        }
    }

    /// Services issued by a layer above the kernel on this core.
    pub fn remote(&mut self) -> Client<'_> {
        Client {
            kernel: &mut self.kernel,
            core: self.core,
            caller: Caller::Remote(self.core),
        }
    }
}

pub struct Client<'h> {
    kernel: &'h mut Kernel,
    core: CoreId,
    caller: Caller,
}

impl Services for Client<'_> {
    fn call(&mut self, request: SyscallRequest) -> Result<usize, OsError> {
        self.kernel.call(self.core, self.caller, request).status
    }

    fn core_id(&self) -> CoreId {
        self.core
    }

    fn config(&self) -> &'static KernelConfig {
        self.kernel.config()
    }
}
