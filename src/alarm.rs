//! # Alarms
//!
//! Armed alarms of a counter form a delta list: each entry stores the ticks
//! between the previous entry's expiry and its own, so a tick only touches
//! the head.
//!
//! ```text
//!   counter.head ─► A (3) ─► B (0) ─► C (5)
//!                   │        │        └─ expires 8 ticks from now
//!                   │        └─ expires together with A
//!                   └─ expires 3 ticks from now
//! ```
//!
//! An alarm marked in use that cannot be found in its counter's list means
//! the kernel state is corrupt; that is handed to the protection hook.

use crate::config::{AlarmAction, AlarmConfig, CounterConfig, StartMethod};
use crate::counter::counter_sub;
use crate::error::{OsError, Panic};
use crate::kernel::CoreState;
use crate::multicore::CrossCoreMessage;
use crate::syscall::{Caller, HookKind, ServiceId, SyscallRequest};
use crate::types::{AlarmId, AppMode, CoreId, CounterId, EventMask, ScheduleTableId, TaskId, Tick};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmControl {
    /// Ticks after the previous list entry.
    pub delta: Tick,
    /// Re-arm period; 0 for a single shot.
    pub cycle: Tick,
    pub next: Option<AlarmId>,
    pub in_use: bool,
}

impl AlarmControl {
    pub const IDLE: AlarmControl = AlarmControl {
        delta: 0,
        cycle: 0,
        next: None,
        in_use: false,
    };
}

/// Constants of the counter behind an alarm, as `GetAlarmBase` reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmBase {
    pub max_allowed_value: Tick,
    pub ticks_per_base: Tick,
    pub min_cycle: Tick,
}

impl From<&CounterConfig> for AlarmBase {
    fn from(counter: &CounterConfig) -> Self {
        Self {
            max_allowed_value: counter.max_allowed_value,
            ticks_per_base: counter.ticks_per_base,
            min_cycle: counter.min_cycle,
        }
    }
}

impl CoreState {
    // -----------------------------------------------------------------------
    // Delta list
    // -----------------------------------------------------------------------

    /// Link `alarm` into its counter's list to expire after `delay` ticks.
    /// Alarms due at the same tick expire in the order they were armed.
    pub(crate) fn enqueue_alarm(&mut self, counter: CounterId, alarm: AlarmId, delay: Tick) {
        let mut remaining = delay;
        let mut prev: Option<AlarmId> = None;
        let mut cursor = self.counters[counter.index()].head;
        while let Some(at) = cursor {
            let entry = &mut self.alarms[at.index()];
            if remaining < entry.delta {
                entry.delta -= remaining;
                break;
            }
            remaining -= entry.delta;
            prev = Some(at);
            cursor = entry.next;
        }
        self.alarms[alarm.index()].delta = remaining;
        self.alarms[alarm.index()].next = cursor;
        self.alarms[alarm.index()].in_use = true;
        match prev {
            Some(prev) => self.alarms[prev.index()].next = Some(alarm),
            None => self.counters[counter.index()].head = Some(alarm),
        }
    }

    /// Unlink `alarm` from its counter's list.
    pub(crate) fn dequeue_alarm(&mut self, counter: CounterId, alarm: AlarmId) -> Result<(), Panic> {
        let mut prev: Option<AlarmId> = None;
        let mut cursor = self.counters[counter.index()].head;
        while let Some(at) = cursor {
            if at == alarm {
                let entry = self.alarms[at.index()];
                if let Some(next) = entry.next {
                    self.alarms[next.index()].delta += entry.delta;
                }
                match prev {
                    Some(prev) => self.alarms[prev.index()].next = entry.next,
                    None => self.counters[counter.index()].head = entry.next,
                }
                self.alarms[at.index()] = AlarmControl::IDLE;
                return Ok(());
            }
            prev = Some(at);
            cursor = self.alarms[at.index()].next;
        }
        Err(Panic::AlarmListCorrupted { counter, alarm })
    }

    /// Ticks until `alarm` expires.
    pub(crate) fn alarm_remaining(&self, counter: CounterId, alarm: AlarmId) -> Result<Tick, Panic> {
        let mut total: Tick = 0;
        let mut cursor = self.counters[counter.index()].head;
        while let Some(at) = cursor {
            total += self.alarms[at.index()].delta;
            if at == alarm {
                return Ok(total);
            }
            cursor = self.alarms[at.index()].next;
        }
        Err(Panic::AlarmListCorrupted { counter, alarm })
    }

    /// Pop the head of the list and run its action.
    pub(crate) fn expire_alarm(&mut self, counter: CounterId, alarm: AlarmId) {
        let cycle = self.alarms[alarm.index()].cycle;
        if let Err(fault) = self.dequeue_alarm(counter, alarm) {
            self.fatal(fault);
            return;
        }
        if cycle > 0 {
            self.enqueue_alarm(counter, alarm, cycle);
            self.alarms[alarm.index()].cycle = cycle;
        }
        log::trace!("{}: {} expired", self.id(), alarm);

        match self.config().alarms[alarm.index()].action {
            AlarmAction::ActivateTask(task) => self.kernel_activate(task),
            AlarmAction::SetEvent(task, mask) => self.kernel_set_event(task, mask),
            AlarmAction::Callback(callback) => {
                self.with_hook(HookKind::AlarmCallback, |_, ctx| callback(ctx));
            }
            AlarmAction::IncrementCounter(target) => {
                let request = SyscallRequest::new(ServiceId::IncrementCounter, &[target.index()]);
                let owner = self.config().counters[target.index()].core;
                if owner == self.id() {
                    if let Err(error) = self.increment_counter(target) {
                        self.report(ServiceId::IncrementCounter, error, request.args, Caller::Kernel);
                    }
                } else {
                    self.post(owner, request);
                }
            }
            AlarmAction::ScheduleTable(table) => self.expire_table(table),
        }
    }

    // -----------------------------------------------------------------------
    // Actions on behalf of the kernel
    // -----------------------------------------------------------------------

    /// Activate `task` from an alarm or expiry point, on whichever core owns it.
    pub(crate) fn kernel_activate(&mut self, task: TaskId) {
        if self.config().tasks[task.index()].core == self.id() {
            if let Err(error) = self.activate(task) {
                self.report(ServiceId::ActivateTask, error, [task.index(), 0, 0, 0], Caller::Kernel);
            }
        } else {
            self.forward_activation(task);
        }
    }

    pub(crate) fn kernel_set_event(&mut self, task: TaskId, mask: EventMask) {
        let request = SyscallRequest::new(ServiceId::SetEvent, &[task.index(), mask.0 as usize]);
        let owner = self.config().tasks[task.index()].core;
        if owner == self.id() {
            if let Err(error) = self.set_event(task, mask) {
                self.report(ServiceId::SetEvent, error, request.args, Caller::Kernel);
            }
        } else {
            self.post(owner, request);
        }
    }

    /// Queue an activation of a task owned by another core.
    pub(crate) fn forward_activation(&mut self, task: TaskId) {
        let owner = self.config().tasks[task.index()].core;
        self.post(owner, SyscallRequest::new(ServiceId::ActivateTask, &[task.index()]));
    }

    /// Put fire-and-forget work for core `to` into the outbox.
    fn post(&mut self, to: CoreId, request: SyscallRequest) {
        let from = self.id();
        let message = CrossCoreMessage { from, to, request };
        if self.outbox.push(message).is_err() {
            self.fatal(Panic::CrossCoreQueueFull { from, to });
        }
    }

    // -----------------------------------------------------------------------
    // Services
    // -----------------------------------------------------------------------

    /// Configuration of an alarm applications may use.
    fn user_alarm(&self, alarm: AlarmId) -> Result<&'static AlarmConfig, OsError> {
        let config = &self.config().alarms[alarm.index()];
        match config.action {
            AlarmAction::ScheduleTable(_) => Err(OsError::Id),
            _ => Ok(config),
        }
    }

    fn check_cycle(counter: &CounterConfig, cycle: Tick) -> Result<(), OsError> {
        if cycle != 0 && (cycle < counter.min_cycle || cycle > counter.max_allowed_value) {
            return Err(OsError::Value);
        }
        Ok(())
    }

    /// `SetRelAlarm`.
    pub(crate) fn set_rel_alarm(&mut self, alarm: AlarmId, increment: Tick, cycle: Tick) -> Result<(), OsError> {
        let config = self.user_alarm(alarm)?;
        let counter = &self.config().counters[config.counter.index()];
        if self.alarms[alarm.index()].in_use {
            return Err(OsError::State);
        }
        if increment == 0 || increment > counter.max_allowed_value {
            return Err(OsError::Value);
        }
        Self::check_cycle(counter, cycle)?;
        self.enqueue_alarm(config.counter, alarm, increment);
        self.alarms[alarm.index()].cycle = cycle;
        log::debug!("{}: {} set +{} cycle {}", self.id(), alarm, increment, cycle);
        Ok(())
    }

    /// `SetAbsAlarm`. A start equal to the current count means one full
    /// wrap from now.
    pub(crate) fn set_abs_alarm(&mut self, alarm: AlarmId, start: Tick, cycle: Tick) -> Result<(), OsError> {
        let config = self.user_alarm(alarm)?;
        let counter = &self.config().counters[config.counter.index()];
        if self.alarms[alarm.index()].in_use {
            return Err(OsError::State);
        }
        if start > counter.max_allowed_value {
            return Err(OsError::Value);
        }
        Self::check_cycle(counter, cycle)?;
        let max = counter.max_allowed_value;
        let delay = match counter_sub(start, self.counter_value(config.counter), max) {
            0 => max + 1,
            delay => delay,
        };
        self.enqueue_alarm(config.counter, alarm, delay);
        self.alarms[alarm.index()].cycle = cycle;
        log::debug!("{}: {} set at {} cycle {}", self.id(), alarm, start, cycle);
        Ok(())
    }

    /// `CancelAlarm`.
    pub(crate) fn cancel_alarm(&mut self, alarm: AlarmId) -> Result<(), OsError> {
        let config = self.user_alarm(alarm)?;
        if !self.alarms[alarm.index()].in_use {
            return Err(OsError::NoFunc);
        }
        if let Err(fault) = self.dequeue_alarm(config.counter, alarm) {
            self.fatal(fault);
        }
        Ok(())
    }

    /// `GetAlarm`: ticks until expiry.
    pub(crate) fn get_alarm(&mut self, alarm: AlarmId) -> Result<Tick, OsError> {
        let config = self.user_alarm(alarm)?;
        if !self.alarms[alarm.index()].in_use {
            return Err(OsError::NoFunc);
        }
        match self.alarm_remaining(config.counter, alarm) {
            Ok(ticks) => Ok(ticks),
            Err(fault) => {
                self.fatal(fault);
                Err(OsError::NoFunc)
            }
        }
    }

    /// `GetAlarmBase`: the counter behind the alarm.
    pub(crate) fn alarm_base(&self, alarm: AlarmId) -> Result<CounterId, OsError> {
        self.user_alarm(alarm).map(|config| config.counter)
    }

    // -----------------------------------------------------------------------
    // Startup and teardown
    // -----------------------------------------------------------------------

    pub(crate) fn autostart_alarms(&mut self, mode: AppMode) {
        let config = self.config();
        for (i, alarm) in config.alarms.iter().enumerate() {
            let Some(autostart) = alarm.autostart else {
                continue;
            };
            if config.alarm_core(AlarmId::from_index(i)) != Some(self.id())
                || !autostart.modes.contains(&mode)
            {
                continue;
            }
            let id = AlarmId::from_index(i);
            let (service, result) = match autostart.method {
                StartMethod::Relative => (
                    ServiceId::SetRelAlarm,
                    self.set_rel_alarm(id, autostart.time, autostart.cycle),
                ),
                StartMethod::Absolute => (
                    ServiceId::SetAbsAlarm,
                    self.set_abs_alarm(id, autostart.time, autostart.cycle),
                ),
            };
            if let Err(error) = result {
                let params = [i, autostart.time as usize, autostart.cycle as usize, 0];
                self.report(service, error, params, Caller::Kernel);
            }
        }
    }

    /// Disarm every alarm and stop every schedule table of this core.
    pub(crate) fn stop_timing(&mut self) {
        let config = self.config();
        for (i, alarm) in config.alarms.iter().enumerate() {
            let id = AlarmId::from_index(i);
            if config.alarm_core(id) == Some(self.id()) && self.alarms[i].in_use {
                if let Err(fault) = self.dequeue_alarm(alarm.counter, id) {
                    log::error!("{}: {}", self.id(), fault);
                    self.alarms[i] = AlarmControl::IDLE;
                }
            }
        }
        for i in 0..config.schedule_tables.len() {
            let id = ScheduleTableId::from_index(i);
            if config.schedule_table_core(id) == Some(self.id()) {
                self.tables[i] = crate::schedule_table::TableControl::STOPPED;
            }
        }
    }
}
