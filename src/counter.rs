//! # Counters
//!
//! A counter counts ticks from 0 to its `max_allowed_value` and wraps to 0.
//! Alarms hang off their counter in a delta list (see [`crate::alarm`]).
//!
//! Advancing a counter runs alarm actions, and an action may advance the
//! same counter again. Such ticks are not processed recursively: they are
//! added to the counter's `error` and worked off by the advance already in
//! progress before it returns.

use crate::config::CounterKind;
use crate::error::OsError;
use crate::kernel::CoreState;
use crate::types::{AlarmId, CounterId, Tick};

/// `current + increment`, wrapping past `max` to 0.
#[inline]
pub fn counter_add(current: Tick, increment: Tick, max: Tick) -> Tick {
    if max - current < increment {
        increment - (max - current) - 1
    } else {
        current + increment
    }
}

/// Ticks from `earlier` to `later` on a counter wrapping past `max`.
#[inline]
pub fn counter_sub(later: Tick, earlier: Tick, max: Tick) -> Tick {
    if later >= earlier {
        later - earlier
    } else {
        max - (earlier - later) + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterControl {
    pub current: Tick,
    /// Ticks received but not processed yet.
    pub error: Tick,
    /// First alarm of the delta list.
    pub head: Option<AlarmId>,
    /// An advance is in progress.
    pub locked: bool,
}

impl CounterControl {
    pub const fn new() -> Self {
        Self {
            current: 0,
            error: 0,
            head: None,
            locked: false,
        }
    }
}

impl Default for CounterControl {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreState {
    /// Feed `ticks` into a counter and process every alarm that expires.
    pub(crate) fn advance_counter(&mut self, counter: CounterId, ticks: Tick) {
        let control = &mut self.counters[counter.index()];
        control.error = control.error.saturating_add(ticks);
        if control.locked {
            return;
        }
        control.locked = true;
        while self.counters[counter.index()].error > 0 {
            self.counters[counter.index()].error -= 1;
            self.tick(counter);
        }
        self.counters[counter.index()].locked = false;
    }

    fn tick(&mut self, counter: CounterId) {
        let max = self.config().counters[counter.index()].max_allowed_value;
        let control = &mut self.counters[counter.index()];
        control.current = counter_add(control.current, 1, max);
        let Some(head) = control.head else {
            return;
        };
        let alarm = &mut self.alarms[head.index()];
        alarm.delta = alarm.delta.saturating_sub(1);
        log::trace!("{}: {} at {}", self.id(), counter, self.counters[counter.index()].current);

        while let Some(head) = self.counters[counter.index()].head {
            if self.alarms[head.index()].delta > 0 {
                break;
            }
            self.expire_alarm(counter, head);
        }
    }

    /// `IncrementCounter`: software counters only.
    pub(crate) fn increment_counter(&mut self, counter: CounterId) -> Result<(), OsError> {
        if self.config().counters[counter.index()].kind != CounterKind::Software {
            return Err(OsError::Id);
        }
        self.advance_counter(counter, 1);
        Ok(())
    }

    pub(crate) fn counter_value(&self, counter: CounterId) -> Tick {
        self.counters[counter.index()].current
    }

    /// `GetElapsedValue`: ticks since `previous`.
    pub(crate) fn elapsed_value(&self, counter: CounterId, previous: Tick) -> Result<Tick, OsError> {
        let max = self.config().counters[counter.index()].max_allowed_value;
        if previous > max {
            return Err(OsError::Value);
        }
        Ok(counter_sub(self.counter_value(counter), previous, max))
    }
}
