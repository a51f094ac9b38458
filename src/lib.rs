//! # ecuos
//!
//! Scheduling and synchronisation core of a multicore, priority-driven RTOS
//! for automotive ECUs, following the OSEK/AUTOSAR execution model.
//!
//! ## Overview
//!
//! Every core runs its own kernel context over a [`CoreState`]. Tasks, ISRs
//! and hooks never touch that state directly: they issue a
//! [`SyscallRequest`] through a [`Bridge`], and the core that owns the
//! targeted object serves it.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │          Task / ISR bodies   (dispatcher.rs)            │
//! │     TaskBody · IsrBody · TaskContext · IsrContext       │
//! ├────────────────────────────────────────────────────────┤
//! │        Service API (services.rs) · Bridge (bridge.rs)   │
//! │      DirectBridge  ·  HostPort (host.rs, feature std)   │
//! ├────────────────────────────────────────────────────────┤
//! │       Syscall gate (syscall.rs) · Kernel (kernel.rs)    │
//! │   permissions · routing · cross-core queues (multicore) │
//! ├──────────────┬──────────────┬───────────┬──────────────┤
//! │  Scheduler   │  Resources   │ Interrupt │ Timing       │
//! │  scheduler.rs│  resource.rs │ locks     │ counter.rs   │
//! │  queue/      │              │ interrupt │ alarm.rs     │
//! │              │              │ .rs       │ schedule_    │
//! │              │              │           │ table.rs     │
//! ├──────────────┴──────────────┴───────────┴──────────────┤
//! │           Arch Port (arch/, arch/cortex_m4.rs)          │
//! │        interrupt level · SysTick · critical section     │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Memory Model
//!
//! - **No heap in the kernel**: per-core state lives in fixed arrays sized
//!   by the build maxima in [`config`]
//! - **Static configuration**: objects are described by `&'static` tables
//!   in a [`KernelConfig`] and addressed by newtype handles
//! - **No globals**: each service receives the core it runs on
//!
//! ## Example
//!
//! ```
//! use ecuos::{AppMode, CoreId, Dispatcher, Kernel, KernelConfig, Priority, Services};
//! use ecuos::{TaskConfig, TaskContext, TaskId};
//!
//! static TASKS: [TaskConfig; 1] =
//!     [TaskConfig::basic("init", CoreId(0), Priority(1)).autostart(&[AppMode::DEFAULT])];
//! static CONFIG: KernelConfig = KernelConfig { tasks: &TASKS, ..KernelConfig::EMPTY };
//!
//! let mut kernel = Kernel::new(&CONFIG).unwrap();
//! kernel.start_os(AppMode::DEFAULT);
//!
//! let mut init = |ctx: &mut TaskContext<'_, '_>| {
//!     assert_eq!(ctx.get_task_id()?, Some(TaskId(0)));
//!     ctx.terminate_task()
//! };
//! let mut bridge = kernel.bridge();
//! let mut dispatcher = Dispatcher::new(&mut bridge, &CONFIG, CoreId(0));
//! dispatcher.register_task(TaskId(0), &mut init).unwrap();
//! dispatcher.run();
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod alarm;
pub mod arch;
pub mod bridge;
pub mod config;
pub mod counter;
pub mod dispatcher;
pub mod error;
pub mod hooks;
#[cfg(feature = "std")]
pub mod host;
pub mod interrupt;
pub mod kernel;
pub mod multicore;
pub mod queue;
pub mod resource;
pub mod schedule_table;
pub mod scheduler;
pub mod services;
pub mod sync;
pub mod syscall;
pub mod task;
pub mod types;

pub use bridge::{Bridge, DirectBridge};
pub use config::{
    AlarmAction, AlarmAutostart, AlarmConfig, Ceiling, CounterConfig, CounterKind, ExpiryPoint,
    IsrCategory, IsrConfig, KernelConfig, QueueAlgorithm, ResourceConfig, ScheduleTableConfig,
    StartMethod, StatusLevel, TableAutostart, TableFlags, TableStart, TaskConfig,
    TrustedFunctionConfig,
};
pub use dispatcher::{Dispatcher, Exit, ExitKind, IsrBody, IsrContext, TaskBody, TaskContext};
pub use error::{ConfigError, ErrorInfo, OsError, Panic, ProtectionAction};
pub use hooks::{HookContext, NoHooks, OsHooks};
#[cfg(feature = "std")]
pub use host::{HostPort, HostSystem};
pub use kernel::{CoreState, Kernel};
pub use schedule_table::{Adjust, TableStatus};
pub use services::Services;
pub use syscall::{Caller, HookKind, Hints, Reply, ServiceId, SyscallRequest, TrustedContext};
pub use task::TaskState;
pub use types::{
    AlarmId, AppMode, CoreId, CounterId, EventMask, IntLevel, IsrId, Priority, ResourceId,
    ScheduleTableId, TaskId, Tick, TrustedFunctionId,
};
