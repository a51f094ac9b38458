//! # Configuration
//!
//! Build-time capacities plus the static object tables a generator would
//! emit. All kernel storage is sized by the constants below; the tables in a
//! [`KernelConfig`] are checked against them once, by [`KernelConfig::validate`],
//! when the kernel is constructed.

use bitflags::bitflags;
use static_assertions::const_assert;

use crate::error::{ConfigError, OsError};
use crate::hooks::{HookContext, NoHooks, OsHooks};
use crate::syscall::TrustedContext;
use crate::types::{
    AlarmId, AppMode, CoreId, CounterId, EventMask, IntLevel, IsrId, Priority, ResourceId,
    ScheduleTableId, TaskId, Tick,
};

/// Number of processor cores the kernel can manage.
pub const MAX_CORES: usize = 4;

/// Tasks across all cores.
pub const MAX_TASKS: usize = 32;

/// Distinct task priorities. Priorities run from 0 (lowest) upwards.
pub const MAX_PRIORITIES: usize = 64;

/// Queued activation records per core, summed over all tasks of the core.
pub const MAX_ACTIVATION_LINKS: usize = 64;

pub const MAX_ISRS: usize = 16;
pub const MAX_RESOURCES: usize = 32;
pub const MAX_COUNTERS: usize = 8;
pub const MAX_ALARMS: usize = 32;
pub const MAX_SCHEDULE_TABLES: usize = 8;
pub const MAX_TRUSTED_FUNCTIONS: usize = 8;

/// Depth of each per-pair cross-core message queue and of a core's outbox.
pub const CROSS_CORE_QUEUE_DEPTH: usize = 16;

/// Interrupt-lock nesting limit per lock kind.
pub const SUSPEND_NEST_LIMIT: u8 = 255;

// Activation records are addressed with a u8 link index.
const_assert!(MAX_ACTIVATION_LINKS <= u8::MAX as usize);
const_assert!(MAX_ACTIVATION_LINKS >= MAX_TASKS);
// The bitmap queue keeps one bit per priority in u32 words under a u32 master word.
const_assert!(MAX_PRIORITIES % 32 == 0 && MAX_PRIORITIES / 32 <= 32);
const_assert!(MAX_PRIORITIES <= u8::MAX as usize + 1);
// Pending interrupts live in a u32 bit set.
const_assert!(MAX_ISRS <= 32);
const_assert!(MAX_CORES <= u8::MAX as usize);

// ---------------------------------------------------------------------------
// Kernel-wide options
// ---------------------------------------------------------------------------

/// Ready-queue implementation, chosen once per kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueAlgorithm {
    /// Priority bitmap searched with count-leading-zeros.
    #[default]
    Clz,
    /// One priority-sorted linked list of activation records.
    Linked,
}

/// OSEK status level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusLevel {
    /// Only the checks the kernel needs to stay consistent.
    Standard,
    /// Additionally checks calling context, resource ceilings and
    /// services made while interrupts are locked.
    #[default]
    Extended,
}

// ---------------------------------------------------------------------------
// Tasks and ISRs
// ---------------------------------------------------------------------------

/// Static description of a task.
#[derive(Debug, Clone, Copy)]
pub struct TaskConfig {
    pub name: &'static str,
    pub core: CoreId,
    /// Queue priority.
    pub priority: Priority,
    /// Non-preemptable tasks run at the highest task priority.
    pub preemptive: bool,
    /// Total activations that may be pending at once (at least 1).
    pub max_activations: u8,
    /// Extended tasks may wait for events.
    pub extended: bool,
    pub autostart: &'static [AppMode],
}

impl TaskConfig {
    pub const fn basic(name: &'static str, core: CoreId, priority: Priority) -> Self {
        Self {
            name,
            core,
            priority,
            preemptive: true,
            max_activations: 1,
            extended: false,
            autostart: &[],
        }
    }

    /// An extended task: may wait for events, single activation.
    pub const fn with_events(mut self) -> Self {
        self.extended = true;
        self
    }

    pub const fn activations(mut self, max: u8) -> Self {
        self.max_activations = max;
        self
    }

    pub const fn non_preemptive(mut self) -> Self {
        self.preemptive = false;
        self
    }

    pub const fn autostart(mut self, modes: &'static [AppMode]) -> Self {
        self.autostart = modes;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsrCategory {
    /// Runs outside kernel control; may only use the interrupt-lock API.
    One,
    /// Kernel-aware; may call most services.
    Two,
}

#[derive(Debug, Clone, Copy)]
pub struct IsrConfig {
    pub name: &'static str,
    pub core: CoreId,
    pub category: IsrCategory,
    pub level: IntLevel,
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// Ceiling of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ceiling {
    /// Highest priority of the tasks sharing the resource.
    Task(Priority),
    /// Highest task priority on the core (`RES_SCHEDULER`).
    Scheduler,
    /// Shared with category-2 ISRs up to this level. The holder becomes
    /// non-preemptable and the interrupt level is raised while it is held.
    Interrupt(IntLevel),
}

#[derive(Debug, Clone, Copy)]
pub struct ResourceConfig {
    pub name: &'static str,
    pub ceiling: Ceiling,
}

// ---------------------------------------------------------------------------
// Counters and alarms
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    /// Advanced by a timer interrupt through the kernel.
    Hardware,
    /// Advanced with `IncrementCounter`.
    Software,
}

#[derive(Debug, Clone, Copy)]
pub struct CounterConfig {
    pub name: &'static str,
    pub core: CoreId,
    pub kind: CounterKind,
    /// The counter wraps from this value to zero.
    pub max_allowed_value: Tick,
    pub ticks_per_base: Tick,
    /// Smallest cycle a cyclic alarm may use.
    pub min_cycle: Tick,
}

/// Callback run in alarm-callback context.
pub type AlarmCallback = fn(&mut HookContext<'_>);

#[derive(Debug, Clone, Copy)]
pub enum AlarmAction {
    ActivateTask(TaskId),
    SetEvent(TaskId, EventMask),
    Callback(AlarmCallback),
    IncrementCounter(CounterId),
    /// The alarm drives a schedule table and is not available to applications.
    ScheduleTable(ScheduleTableId),
}

/// How an autostarted alarm or schedule table interprets its start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMethod {
    Relative,
    Absolute,
}

#[derive(Debug, Clone, Copy)]
pub struct AlarmAutostart {
    pub modes: &'static [AppMode],
    pub method: StartMethod,
    pub time: Tick,
    pub cycle: Tick,
}

#[derive(Debug, Clone, Copy)]
pub struct AlarmConfig {
    pub name: &'static str,
    pub counter: CounterId,
    pub action: AlarmAction,
    pub autostart: Option<AlarmAutostart>,
}

// ---------------------------------------------------------------------------
// Schedule tables
// ---------------------------------------------------------------------------

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TableFlags: u8 {
        /// The table restarts after its final delay.
        const REPEATING = 0x01;
        /// The table may be synchronised with `SyncScheduleTable`.
        const SYNC_EXPLICIT = 0x02;
        /// The table runs in lock-step with its counter.
        const SYNC_IMPLICIT = 0x04;
    }
}

/// One action point of a schedule table.
#[derive(Debug, Clone, Copy)]
pub struct ExpiryPoint {
    /// Ticks from the start of a round.
    pub offset: Tick,
    /// Most the delay before this point may be stretched per round.
    pub max_lengthen: Tick,
    /// Most the delay before this point may be cut per round.
    pub max_shorten: Tick,
    pub activate: &'static [TaskId],
    pub events: &'static [(TaskId, EventMask)],
}

impl ExpiryPoint {
    pub const fn at(offset: Tick) -> Self {
        Self {
            offset,
            max_lengthen: 0,
            max_shorten: 0,
            activate: &[],
            events: &[],
        }
    }

    pub const fn tolerance(mut self, max_lengthen: Tick, max_shorten: Tick) -> Self {
        self.max_lengthen = max_lengthen;
        self.max_shorten = max_shorten;
        self
    }

    pub const fn activating(mut self, tasks: &'static [TaskId]) -> Self {
        self.activate = tasks;
        self
    }

    pub const fn setting(mut self, events: &'static [(TaskId, EventMask)]) -> Self {
        self.events = events;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStart {
    Relative(Tick),
    Absolute(Tick),
    /// Wait for the first `SyncScheduleTable`.
    Synchron,
}

#[derive(Debug, Clone, Copy)]
pub struct TableAutostart {
    pub modes: &'static [AppMode],
    pub start: TableStart,
}

#[derive(Debug, Clone, Copy)]
pub struct ScheduleTableConfig {
    pub name: &'static str,
    /// Alarm whose action is `AlarmAction::ScheduleTable` for this table.
    pub alarm: AlarmId,
    /// Length of one round.
    pub period: Tick,
    /// Deviation up to which an explicitly synchronised table counts as synchronous.
    pub precision: Tick,
    pub flags: TableFlags,
    pub expiry_points: &'static [ExpiryPoint],
    pub autostart: Option<TableAutostart>,
}

// ---------------------------------------------------------------------------
// Trusted functions
// ---------------------------------------------------------------------------

/// A callable executed by the kernel on behalf of a task or ISR.
pub type TrustedFn = fn(&mut TrustedContext<'_>, usize) -> Result<usize, OsError>;

#[derive(Debug, Clone, Copy)]
pub struct TrustedFunctionConfig {
    pub name: &'static str,
    pub function: TrustedFn,
}

// ---------------------------------------------------------------------------
// Kernel configuration
// ---------------------------------------------------------------------------

/// Everything the kernel needs to know before `StartOS`.
#[derive(Clone, Copy)]
pub struct KernelConfig {
    pub cores: usize,
    pub queue: QueueAlgorithm,
    pub status: StatusLevel,
    /// Interrupt level that `SuspendOSInterrupts` raises to. Category-2 ISRs
    /// sit at or below it.
    pub os_level: IntLevel,
    pub tasks: &'static [TaskConfig],
    pub isrs: &'static [IsrConfig],
    pub resources: &'static [ResourceConfig],
    pub counters: &'static [CounterConfig],
    pub alarms: &'static [AlarmConfig],
    pub schedule_tables: &'static [ScheduleTableConfig],
    pub trusted_functions: &'static [TrustedFunctionConfig],
    pub hooks: &'static dyn OsHooks,
}

impl KernelConfig {
    /// A single-core configuration with no objects and no hooks.
    pub const EMPTY: KernelConfig = KernelConfig {
        cores: 1,
        queue: QueueAlgorithm::Clz,
        status: StatusLevel::Extended,
        os_level: IntLevel(8),
        tasks: &[],
        isrs: &[],
        resources: &[],
        counters: &[],
        alarms: &[],
        schedule_tables: &[],
        trusted_functions: &[],
        hooks: &NoHooks,
    };

    /// Highest task priority on `core`; the run priority of non-preemptable
    /// tasks and the ceiling of `RES_SCHEDULER`.
    pub fn top_priority(&self, core: CoreId) -> Priority {
        self.tasks
            .iter()
            .filter(|t| t.core == core)
            .map(|t| t.priority)
            .max()
            .unwrap_or(Priority::LOWEST)
    }

    pub fn task(&self, id: TaskId) -> Option<&TaskConfig> {
        self.tasks.get(id.index())
    }

    pub fn isr(&self, id: IsrId) -> Option<&IsrConfig> {
        self.isrs.get(id.index())
    }

    pub fn resource(&self, id: ResourceId) -> Option<&ResourceConfig> {
        self.resources.get(id.index())
    }

    pub fn counter(&self, id: CounterId) -> Option<&CounterConfig> {
        self.counters.get(id.index())
    }

    pub fn alarm(&self, id: AlarmId) -> Option<&AlarmConfig> {
        self.alarms.get(id.index())
    }

    pub fn schedule_table(&self, id: ScheduleTableId) -> Option<&ScheduleTableConfig> {
        self.schedule_tables.get(id.index())
    }

    /// Core that owns an alarm: the core of its counter.
    pub fn alarm_core(&self, id: AlarmId) -> Option<CoreId> {
        let alarm = self.alarm(id)?;
        self.counter(alarm.counter).map(|c| c.core)
    }

    pub fn schedule_table_core(&self, id: ScheduleTableId) -> Option<CoreId> {
        self.alarm_core(self.schedule_table(id)?.alarm)
    }

    /// Reject tables the kernel cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cores == 0 || self.cores > MAX_CORES {
            return Err(ConfigError::CoreCount(self.cores));
        }
        if self.os_level == IntLevel::ENABLED || self.os_level == IntLevel::ALL {
            return Err(ConfigError::OsLevel);
        }
        capacity("tasks", self.tasks.len(), MAX_TASKS)?;
        capacity("isrs", self.isrs.len(), MAX_ISRS)?;
        capacity("resources", self.resources.len(), MAX_RESOURCES)?;
        capacity("counters", self.counters.len(), MAX_COUNTERS)?;
        capacity("alarms", self.alarms.len(), MAX_ALARMS)?;
        capacity("schedule tables", self.schedule_tables.len(), MAX_SCHEDULE_TABLES)?;
        capacity(
            "trusted functions",
            self.trusted_functions.len(),
            MAX_TRUSTED_FUNCTIONS,
        )?;

        let mut records = [0usize; MAX_CORES];
        for (i, task) in self.tasks.iter().enumerate() {
            let id = TaskId::from_index(i);
            if task.core.index() >= self.cores {
                return Err(ConfigError::TaskCore(id));
            }
            if task.priority.index() >= MAX_PRIORITIES {
                return Err(ConfigError::TaskPriority(id));
            }
            if task.max_activations == 0 || (task.extended && task.max_activations != 1) {
                return Err(ConfigError::TaskActivations(id));
            }
            records[task.core.index()] += task.max_activations as usize;
        }
        for (core, &count) in records.iter().enumerate().take(self.cores) {
            if count > MAX_ACTIVATION_LINKS {
                return Err(ConfigError::ActivationRecords(CoreId(core as u8)));
            }
        }

        for (i, isr) in self.isrs.iter().enumerate() {
            let id = IsrId::from_index(i);
            if isr.core.index() >= self.cores {
                return Err(ConfigError::IsrCore(id));
            }
            let fits = match isr.category {
                IsrCategory::Two => isr.level > IntLevel::ENABLED && isr.level <= self.os_level,
                IsrCategory::One => isr.level > IntLevel::ENABLED && isr.level < IntLevel::ALL,
            };
            if !fits {
                return Err(ConfigError::IsrLevel(id));
            }
        }

        for (i, resource) in self.resources.iter().enumerate() {
            let ok = match resource.ceiling {
                Ceiling::Task(p) => p.index() < MAX_PRIORITIES,
                Ceiling::Scheduler => true,
                Ceiling::Interrupt(level) => {
                    level > IntLevel::ENABLED && level <= self.os_level
                }
            };
            if !ok {
                return Err(ConfigError::ResourceCeiling(ResourceId::from_index(i)));
            }
        }

        for (i, counter) in self.counters.iter().enumerate() {
            if counter.core.index() >= self.cores
                || counter.max_allowed_value == 0
                || counter.max_allowed_value == Tick::MAX
                || counter.min_cycle == 0
                || counter.min_cycle > counter.max_allowed_value
            {
                return Err(ConfigError::CounterRange(CounterId::from_index(i)));
            }
        }

        for (i, alarm) in self.alarms.iter().enumerate() {
            let id = AlarmId::from_index(i);
            let target_ok = self.counter(alarm.counter).is_some()
                && match alarm.action {
                    AlarmAction::ActivateTask(t) => self.task(t).is_some(),
                    AlarmAction::SetEvent(t, _) => self.task(t).is_some_and(|t| t.extended),
                    AlarmAction::Callback(_) => true,
                    AlarmAction::IncrementCounter(c) => {
                        self.counter(c).is_some_and(|c| c.kind == CounterKind::Software)
                    }
                    AlarmAction::ScheduleTable(st) => self
                        .schedule_table(st)
                        .is_some_and(|table| table.alarm == id),
                };
            if !target_ok {
                return Err(ConfigError::AlarmTarget(id));
            }
        }

        for (i, table) in self.schedule_tables.iter().enumerate() {
            self.validate_table(ScheduleTableId::from_index(i), table)?;
        }
        Ok(())
    }

    fn validate_table(
        &self,
        id: ScheduleTableId,
        table: &ScheduleTableConfig,
    ) -> Result<(), ConfigError> {
        let drives_us = self
            .alarm(table.alarm)
            .is_some_and(|a| matches!(a.action, AlarmAction::ScheduleTable(st) if st == id));
        if !drives_us {
            return Err(ConfigError::ScheduleTableTarget(id));
        }
        for point in table.expiry_points {
            let targets_ok = point.activate.iter().all(|&t| self.task(t).is_some())
                && point
                    .events
                    .iter()
                    .all(|&(t, _)| self.task(t).is_some_and(|t| t.extended));
            if !targets_ok {
                return Err(ConfigError::ScheduleTableTarget(id));
            }
        }

        let points = table.expiry_points;
        let increasing = points.windows(2).all(|w| w[0].offset < w[1].offset);
        let last_fits = points.last().is_some_and(|last| {
            if table.flags.contains(TableFlags::REPEATING) {
                last.offset < table.period
            } else {
                last.offset <= table.period
            }
        });
        let sync_ok = !(table.flags.contains(TableFlags::SYNC_EXPLICIT)
            && table.flags.contains(TableFlags::SYNC_IMPLICIT));
        let period_fits = self
            .alarm(table.alarm)
            .and_then(|a| self.counter(a.counter))
            .is_some_and(|c| table.period <= c.max_allowed_value);
        if !increasing || !last_fits || table.period == 0 || !period_fits || !sync_ok {
            return Err(ConfigError::ScheduleTableLayout(id));
        }
        Ok(())
    }
}

fn capacity(what: &'static str, count: usize, max: usize) -> Result<(), ConfigError> {
    if count > max {
        Err(ConfigError::Capacity { what, count, max })
    } else {
        Ok(())
    }
}
