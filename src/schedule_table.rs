//! # Schedule Tables
//!
//! A schedule table is a list of expiry points at fixed offsets within a
//! round of `period` ticks, driven by one alarm. After processing point `k`
//! the alarm is re-armed for the next target:
//!
//! ```text
//!   k + 1 < n                 → point k+1 after off[k+1] - off[k]
//!   last point, repeating     → point 0   after period - off[k] + off[0]
//!   otherwise                 → END       after period - off[k]
//! ```
//!
//! END finishes the round: a table queued with `NextScheduleTable` starts,
//! a repeating table begins its next round, anything else stops.
//!
//! ## Synchronisation
//!
//! An explicitly synchronised table compares its own position in the round
//! with a global time supplied by `SyncScheduleTable` and corrects the
//! deviation by lengthening or shortening the delays before upcoming expiry
//! points, no more per point than that point's `max_lengthen` /
//! `max_shorten` allow. See [`synchronize`] for the decision itself.

use crate::config::{ExpiryPoint, ScheduleTableConfig, TableFlags, TableStart};
use crate::counter::counter_sub;
use crate::error::OsError;
use crate::kernel::CoreState;
use crate::syscall::{Caller, ServiceId};
use crate::types::{AppMode, ScheduleTableId, Tick};

/// Reported state of a schedule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    Stopped,
    /// Queued to start when another table ends its round.
    Next,
    /// Started with `StartScheduleTableSynchron`, waiting for global time.
    Waiting,
    Running,
    RunningAndSynchronous,
}

impl TableStatus {
    pub const fn code(self) -> usize {
        match self {
            TableStatus::Stopped => 0,
            TableStatus::Next => 1,
            TableStatus::Waiting => 2,
            TableStatus::Running => 3,
            TableStatus::RunningAndSynchronous => 4,
        }
    }

    pub const fn from_code(code: usize) -> Option<TableStatus> {
        match code {
            0 => Some(TableStatus::Stopped),
            1 => Some(TableStatus::Next),
            2 => Some(TableStatus::Waiting),
            3 => Some(TableStatus::Running),
            4 => Some(TableStatus::RunningAndSynchronous),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    Stopped,
    Next,
    Waiting,
    Running,
}

/// Correction still to be applied to upcoming delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjust {
    None,
    /// Table runs early: stretch delays by this many ticks in total.
    Lengthen(Tick),
    /// Table runs late: cut delays by this many ticks in total.
    Shorten(Tick),
    /// The first delay did not fit the counter range; this many ticks are
    /// still to wait before the pending expiry point is due.
    InitialDelay(Tick),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableControl {
    pub state: TableState,
    pub synchronous: bool,
    /// Index of the expiry point the alarm is armed for; `n` means END.
    pub next: usize,
    pub adjust: Adjust,
    /// Table to start when this one ends its round.
    pub chain: Option<ScheduleTableId>,
    /// Table this one is queued behind.
    pub prev: Option<ScheduleTableId>,
}

impl TableControl {
    pub const STOPPED: TableControl = TableControl {
        state: TableState::Stopped,
        synchronous: false,
        next: 0,
        adjust: Adjust::None,
        chain: None,
        prev: None,
    };
}

// ---------------------------------------------------------------------------
// Synchronisation decision
// ---------------------------------------------------------------------------

/// Inputs to one synchronisation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncInput {
    pub period: Tick,
    /// Offset of the pending expiry point (`period` for END).
    pub next_offset: Tick,
    /// Ticks until the driving alarm expires.
    pub remaining: Tick,
    /// Ticks the counter received but has not processed yet.
    pub counter_error: Tick,
    /// Global time within the round.
    pub global: Tick,
    pub precision: Tick,
    pub max_lengthen: Tick,
    pub max_shorten: Tick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncDecision {
    pub adjust: Adjust,
    pub synchronous: bool,
}

/// Decide how to correct a running table so that it converges on `global`.
///
/// 1. `local = next_offset - remaining (mod period) + counter_error`.
/// 2. Equal → synchronous, nothing to do.
/// 3. Otherwise both directions are measured: shortening by
///    `global - local` or lengthening by `local - global` (mod period).
/// 4. A direction with tolerance 0 is disabled. If exactly one direction
///    fits its tolerance in one step it is taken; otherwise the cheaper
///    enabled direction is, ties going to lengthening.
/// 5. The table stays synchronous only if the chosen correction fits its
///    tolerance and is within `precision`.
pub fn synchronize(input: SyncInput) -> SyncDecision {
    let period = input.period;
    let remaining = input.remaining % period;
    let local = ((input.next_offset % period + period - remaining) % period
        + input.counter_error % period)
        % period;
    let global = input.global % period;
    if local == global {
        return SyncDecision {
            adjust: Adjust::None,
            synchronous: true,
        };
    }

    let shorten = (global + period - local) % period;
    let lengthen = (local + period - global) % period;
    let can_shorten = input.max_shorten > 0;
    let can_lengthen = input.max_lengthen > 0;
    let shorten_fits = can_shorten && shorten <= input.max_shorten;
    let lengthen_fits = can_lengthen && lengthen <= input.max_lengthen;

    let adjust = match (shorten_fits, lengthen_fits) {
        (true, false) => Adjust::Shorten(shorten),
        (false, true) => Adjust::Lengthen(lengthen),
        _ if can_lengthen && (!can_shorten || lengthen <= shorten) => Adjust::Lengthen(lengthen),
        _ if can_shorten => Adjust::Shorten(shorten),
        _ => Adjust::None,
    };
    let amount = match adjust {
        Adjust::Lengthen(n) | Adjust::Shorten(n) => n,
        _ => 0,
    };
    let in_tolerance = shorten_fits || lengthen_fits;
    SyncDecision {
        adjust,
        synchronous: in_tolerance && amount <= input.precision,
    }
}

// ---------------------------------------------------------------------------
// Kernel side
// ---------------------------------------------------------------------------

impl CoreState {
    fn table_config(&self, table: ScheduleTableId) -> &'static ScheduleTableConfig {
        &self.config().schedule_tables[table.index()]
    }

    fn table_counter_max(&self, table: ScheduleTableId) -> Tick {
        let alarm = &self.config().alarms[self.table_config(table).alarm.index()];
        self.config().counters[alarm.counter.index()].max_allowed_value
    }

    /// Arm the driving alarm `delay` ticks from now. Delays beyond the
    /// counter range are split; the rest is waited out on the next expiry.
    fn arm_table(&mut self, table: ScheduleTableId, delay: Tick) {
        let config = self.table_config(table);
        let alarm = config.alarm;
        let counter = self.config().alarms[alarm.index()].counter;
        let max = self.table_counter_max(table);
        let delay = if delay > max {
            if self.tables[table.index()].adjust == Adjust::None {
                self.tables[table.index()].adjust = Adjust::InitialDelay(delay - max);
            }
            max
        } else {
            delay
        };
        self.enqueue_alarm(counter, alarm, delay);
        log::trace!("{}: {} armed for {} ticks", self.id(), table, delay);
    }

    fn disarm_table(&mut self, table: ScheduleTableId) {
        let alarm = self.table_config(table).alarm;
        if self.alarms[alarm.index()].in_use {
            let counter = self.config().alarms[alarm.index()].counter;
            if let Err(fault) = self.dequeue_alarm(counter, alarm) {
                self.fatal(fault);
            }
        }
    }

    /// Begin a round at point 0, `delay` ticks from now.
    fn begin_round(&mut self, table: ScheduleTableId, delay: Tick, synchronous: bool) {
        let implicit = self.table_config(table).flags.contains(TableFlags::SYNC_IMPLICIT);
        let prev = self.tables[table.index()].prev.take();
        if let Some(prev) = prev {
            self.tables[prev.index()].chain = None;
        }
        self.tables[table.index()] = TableControl {
            state: TableState::Running,
            synchronous: synchronous || implicit,
            next: 0,
            adjust: Adjust::None,
            chain: None,
            prev: None,
        };
        log::debug!("{}: {} started", self.id(), table);
        if delay == 0 {
            self.run_table(table);
        } else {
            self.arm_table(table, delay);
        }
    }

    /// The driving alarm of `table` expired.
    pub(crate) fn expire_table(&mut self, table: ScheduleTableId) {
        if let Adjust::InitialDelay(rest) = self.tables[table.index()].adjust {
            self.tables[table.index()].adjust = Adjust::None;
            self.arm_table(table, rest);
            return;
        }
        self.run_table(table);
    }

    /// Process due expiry points until the next one lies in the future.
    fn run_table(&mut self, table: ScheduleTableId) {
        let config = self.table_config(table);
        let points = config.expiry_points;
        let n = points.len();
        loop {
            let k = self.tables[table.index()].next;
            if k >= n {
                self.finish_round(table);
                return;
            }

            let point = &points[k];
            log::trace!("{}: {} point {} at offset {}", self.id(), table, k, point.offset);
            for &task in point.activate {
                self.kernel_activate(task);
            }
            for &(task, mask) in point.events {
                self.kernel_set_event(task, mask);
            }

            let repeating = config.flags.contains(TableFlags::REPEATING);
            let (target, delay) = if k + 1 < n {
                (k + 1, points[k + 1].offset - point.offset)
            } else if repeating && self.tables[table.index()].chain.is_none() {
                (0, config.period - point.offset + points[0].offset)
            } else {
                (n, config.period - point.offset)
            };
            let delay = if target < n {
                self.apply_adjustment(table, delay, &points[target])
            } else {
                delay
            };
            self.tables[table.index()].next = target;
            if delay > 0 {
                self.arm_table(table, delay);
                return;
            }
        }
    }

    /// Use up part of the pending correction on a delay toward `point`.
    fn apply_adjustment(&mut self, table: ScheduleTableId, delay: Tick, point: &ExpiryPoint) -> Tick {
        let control = &mut self.tables[table.index()];
        let (delay, left) = match control.adjust {
            Adjust::Lengthen(n) => {
                let step = n.min(point.max_lengthen);
                (delay + step, Adjust::Lengthen(n - step))
            }
            Adjust::Shorten(n) => {
                let step = n.min(point.max_shorten).min(delay);
                (delay - step, Adjust::Shorten(n - step))
            }
            Adjust::None | Adjust::InitialDelay(_) => return delay,
        };
        control.adjust = match left {
            Adjust::Lengthen(0) | Adjust::Shorten(0) => {
                control.synchronous = true;
                Adjust::None
            }
            left => left,
        };
        delay
    }

    /// END of a round.
    fn finish_round(&mut self, table: ScheduleTableId) {
        let config = self.table_config(table);
        if let Some(next) = self.tables[table.index()].chain.take() {
            self.tables[table.index()] = TableControl::STOPPED;
            let first = self.table_config(next).expiry_points[0].offset;
            self.begin_round(next, first, false);
        } else if config.flags.contains(TableFlags::REPEATING) {
            self.tables[table.index()].next = 0;
            let first = config.expiry_points[0].offset;
            if first == 0 {
                self.run_table(table);
            } else {
                self.arm_table(table, first);
            }
        } else {
            log::debug!("{}: {} finished", self.id(), table);
            self.tables[table.index()] = TableControl::STOPPED;
        }
    }

    // -----------------------------------------------------------------------
    // Services
    // -----------------------------------------------------------------------

    /// `StartScheduleTableRel`: first point `offset` ticks after its own
    /// offset from now.
    pub(crate) fn start_table_rel(&mut self, table: ScheduleTableId, offset: Tick) -> Result<(), OsError> {
        let config = self.table_config(table);
        if config.flags.contains(TableFlags::SYNC_IMPLICIT) {
            return Err(OsError::Id);
        }
        if self.tables[table.index()].state != TableState::Stopped {
            return Err(OsError::State);
        }
        let first = config.expiry_points[0].offset;
        let max = self.table_counter_max(table);
        if offset == 0 || offset > max - first.min(max) {
            return Err(OsError::Value);
        }
        self.begin_round(table, offset + first, false);
        Ok(())
    }

    /// `StartScheduleTableAbs`: the round begins when the counter reads
    /// `start`.
    pub(crate) fn start_table_abs(&mut self, table: ScheduleTableId, start: Tick) -> Result<(), OsError> {
        let config = self.table_config(table);
        let max = self.table_counter_max(table);
        if start > max {
            return Err(OsError::Value);
        }
        if self.tables[table.index()].state != TableState::Stopped {
            return Err(OsError::State);
        }
        let counter = self.config().alarms[config.alarm.index()].counter;
        let until_start = match counter_sub(start, self.counter_value(counter), max) {
            0 => max + 1,
            ticks => ticks,
        };
        let delay = until_start + config.expiry_points[0].offset;
        self.begin_round(table, delay, false);
        Ok(())
    }

    /// `StartScheduleTableSynchron`: wait for the first `SyncScheduleTable`.
    pub(crate) fn start_table_synchron(&mut self, table: ScheduleTableId) -> Result<(), OsError> {
        if !self.table_config(table).flags.contains(TableFlags::SYNC_EXPLICIT) {
            return Err(OsError::Id);
        }
        if self.tables[table.index()].state != TableState::Stopped {
            return Err(OsError::State);
        }
        self.tables[table.index()] = TableControl {
            state: TableState::Waiting,
            ..TableControl::STOPPED
        };
        Ok(())
    }

    /// `StopScheduleTable`. A table queued behind this one is dropped too.
    pub(crate) fn stop_table(&mut self, table: ScheduleTableId) -> Result<(), OsError> {
        let control = self.tables[table.index()];
        if control.state == TableState::Stopped {
            return Err(OsError::NoFunc);
        }
        self.disarm_table(table);
        if let Some(next) = control.chain {
            self.tables[next.index()] = TableControl::STOPPED;
        }
        if let Some(prev) = control.prev {
            self.tables[prev.index()].chain = None;
        }
        self.tables[table.index()] = TableControl::STOPPED;
        log::debug!("{}: {} stopped", self.id(), table);
        Ok(())
    }

    /// `NextScheduleTable`: start `to` when `from` ends its round.
    pub(crate) fn next_table(&mut self, from: ScheduleTableId, to: ScheduleTableId) -> Result<(), OsError> {
        let from_config = self.table_config(from);
        let to_config = self.table_config(to);
        let counter_of =
            |config: &ScheduleTableConfig| self.config().alarms[config.alarm.index()].counter;
        let sync_bits = TableFlags::SYNC_EXPLICIT | TableFlags::SYNC_IMPLICIT;
        if counter_of(from_config) != counter_of(to_config)
            || (from_config.flags & sync_bits) != (to_config.flags & sync_bits)
        {
            return Err(OsError::Id);
        }
        if !matches!(
            self.tables[from.index()].state,
            TableState::Running | TableState::Waiting
        ) {
            return Err(OsError::NoFunc);
        }
        if self.tables[to.index()].state != TableState::Stopped {
            return Err(OsError::State);
        }
        if let Some(old) = self.tables[from.index()].chain {
            self.tables[old.index()] = TableControl::STOPPED;
        }
        self.tables[from.index()].chain = Some(to);
        self.tables[to.index()] = TableControl {
            state: TableState::Next,
            prev: Some(from),
            ..TableControl::STOPPED
        };
        Ok(())
    }

    /// `SyncScheduleTable`: global time is `value` ticks into the round.
    pub(crate) fn sync_table(&mut self, table: ScheduleTableId, value: Tick) -> Result<(), OsError> {
        let config = self.table_config(table);
        if !config.flags.contains(TableFlags::SYNC_EXPLICIT) {
            return Err(OsError::Id);
        }
        if value > config.period {
            return Err(OsError::Value);
        }
        match self.tables[table.index()].state {
            TableState::Stopped | TableState::Next => Err(OsError::State),
            TableState::Waiting => {
                let period = config.period;
                let delay = (config.expiry_points[0].offset + period - value % period) % period;
                self.begin_round(table, delay, true);
                Ok(())
            }
            TableState::Running => {
                self.resync_running(table, value);
                Ok(())
            }
        }
    }

    fn resync_running(&mut self, table: ScheduleTableId, value: Tick) {
        let config = self.table_config(table);
        let points = config.expiry_points;
        let control = self.tables[table.index()];
        let alarm = config.alarm;
        let counter = self.config().alarms[alarm.index()].counter;

        // An expired alarm whose table has not advanced yet counts as due now.
        let remaining = if self.alarms[alarm.index()].in_use {
            match self.alarm_remaining(counter, alarm) {
                Ok(ticks) => ticks,
                Err(fault) => {
                    self.fatal(fault);
                    return;
                }
            }
        } else {
            0
        };
        let remaining = match control.adjust {
            Adjust::InitialDelay(rest) => remaining + rest,
            _ => remaining,
        };
        let (next_offset, tolerance) = match points.get(control.next) {
            Some(point) => (point.offset, point),
            None => (config.period, &points[0]),
        };
        let decision = synchronize(SyncInput {
            period: config.period,
            next_offset,
            remaining,
            counter_error: self.counters[counter.index()].error,
            global: value,
            precision: config.precision,
            max_lengthen: tolerance.max_lengthen,
            max_shorten: tolerance.max_shorten,
        });
        log::debug!("{}: {} sync at {} -> {:?}", self.id(), table, value, decision);
        let control = &mut self.tables[table.index()];
        if !matches!(control.adjust, Adjust::InitialDelay(_)) {
            control.adjust = decision.adjust;
        }
        control.synchronous = decision.synchronous;
    }

    /// `SetScheduleTableAsync`.
    pub(crate) fn set_table_async(&mut self, table: ScheduleTableId) -> Result<(), OsError> {
        if !self.table_config(table).flags.contains(TableFlags::SYNC_EXPLICIT) {
            return Err(OsError::Id);
        }
        let control = &mut self.tables[table.index()];
        if control.state != TableState::Running {
            return Err(OsError::State);
        }
        control.synchronous = false;
        if !matches!(control.adjust, Adjust::InitialDelay(_)) {
            control.adjust = Adjust::None;
        }
        Ok(())
    }

    /// `GetScheduleTableStatus`.
    pub fn table_status(&self, table: ScheduleTableId) -> TableStatus {
        let control = &self.tables[table.index()];
        match control.state {
            TableState::Stopped => TableStatus::Stopped,
            TableState::Next => TableStatus::Next,
            TableState::Waiting => TableStatus::Waiting,
            TableState::Running if control.synchronous => TableStatus::RunningAndSynchronous,
            TableState::Running => TableStatus::Running,
        }
    }

    /// Correction still pending on a table.
    pub fn table_adjustment(&self, table: ScheduleTableId) -> Adjust {
        self.tables[table.index()].adjust
    }

    pub(crate) fn autostart_tables(&mut self, mode: AppMode) {
        let config = self.config();
        for (i, table) in config.schedule_tables.iter().enumerate() {
            let id = ScheduleTableId::from_index(i);
            let Some(autostart) = table.autostart else {
                continue;
            };
            if config.schedule_table_core(id) != Some(self.id()) || !autostart.modes.contains(&mode) {
                continue;
            }
            let (service, arg, result) = match autostart.start {
                TableStart::Relative(offset) => (
                    ServiceId::StartScheduleTableRel,
                    offset,
                    self.start_table_rel(id, offset),
                ),
                TableStart::Absolute(start) => (
                    ServiceId::StartScheduleTableAbs,
                    start,
                    self.start_table_abs(id, start),
                ),
                TableStart::Synchron => (
                    ServiceId::StartScheduleTableSynchron,
                    0,
                    self.start_table_synchron(id),
                ),
            };
            if let Err(error) = result {
                self.report(service, error, [i, arg as usize, 0, 0], Caller::Kernel);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(global: Tick) -> SyncInput {
        SyncInput {
            period: 100,
            next_offset: 50,
            remaining: 10,
            counter_error: 0,
            global,
            precision: 0,
            max_lengthen: 10,
            max_shorten: 100,
        }
    }

    #[test]
    fn test_in_step_is_synchronous() {
        let decision = synchronize(input(40));
        assert_eq!(decision.adjust, Adjust::None);
        assert!(decision.synchronous);
    }

    #[test]
    fn test_late_table_shortens() {
        // Local time 40, global 80: 40 late. Lengthening would need 60.
        let decision = synchronize(input(80));
        assert_eq!(decision.adjust, Adjust::Shorten(40));
        assert!(!decision.synchronous);
    }

    #[test]
    fn test_early_table_lengthens_within_tolerance() {
        let decision = synchronize(input(35));
        assert_eq!(decision.adjust, Adjust::Lengthen(5));
    }

    #[test]
    fn test_tie_goes_to_lengthen() {
        let decision = synchronize(SyncInput {
            max_lengthen: 50,
            max_shorten: 50,
            ..input(90)
        });
        assert_eq!(decision.adjust, Adjust::Lengthen(50));
    }

    #[test]
    fn test_disabled_direction_is_never_chosen() {
        let decision = synchronize(SyncInput {
            max_lengthen: 0,
            max_shorten: 5,
            ..input(35)
        });
        assert_eq!(decision.adjust, Adjust::Shorten(95));
        assert!(!decision.synchronous);
    }

    #[test]
    fn test_within_precision_stays_synchronous() {
        let decision = synchronize(SyncInput {
            precision: 3,
            ..input(42)
        });
        assert_eq!(decision.adjust, Adjust::Shorten(2));
        assert!(decision.synchronous);
    }

    #[test]
    fn test_counter_error_moves_local_time() {
        let decision = synchronize(SyncInput {
            counter_error: 5,
            ..input(45)
        });
        assert!(decision.synchronous);
        assert_eq!(decision.adjust, Adjust::None);
    }

    #[test]
    fn test_status_codes() {
        for status in [
            TableStatus::Stopped,
            TableStatus::Next,
            TableStatus::Waiting,
            TableStatus::Running,
            TableStatus::RunningAndSynchronous,
        ] {
            assert_eq!(TableStatus::from_code(status.code()), Some(status));
        }
    }
}
