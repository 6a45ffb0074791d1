//! Gridbot - Periodic timer table
//!
//! Software timer events polled against a microsecond clock. Each due
//! event fires at most once per poll; an event that fell more than one
//! period behind is re-anchored to the poll time instead of bursting.

use crate::types::*;
use heapless::Vec;

/// Timer callback over a caller context
pub type TimerCallback<C> = fn(&mut C);

/// Handle returned by [`PeriodicTimer::register_periodic_event`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct TimerHandle(u8);

struct TimerEvent<C> {
    callback: TimerCallback<C>,
    period: TimeUs,
    next_due: TimeUs,
    active: bool,
}

/// Fixed table of periodic events
pub struct PeriodicTimer<C> {
    events: Vec<TimerEvent<C>, MAX_TIMER_EVENTS>,
}

impl<C> PeriodicTimer<C> {
    /// Empty table
    pub const fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Add an event firing every `period` microseconds from `now`
    pub fn register_periodic_event(
        &mut self,
        callback: TimerCallback<C>,
        period: TimeUs,
        active: bool,
        now: TimeUs,
    ) -> Result<TimerHandle> {
        if period == 0 {
            return Err(Error::InvalidArg);
        }
        let handle = TimerHandle(self.events.len() as u8);
        self.events
            .push(TimerEvent {
                callback,
                period,
                next_due: now + period,
                active,
            })
            .map_err(|_| Error::NoMemory)?;
        Ok(handle)
    }

    fn event(&mut self, handle: TimerHandle) -> Result<&mut TimerEvent<C>> {
        self.events.get_mut(handle.0 as usize).ok_or(Error::NotFound)
    }

    /// Start firing; the first shot is one period from `now`
    pub fn activate(&mut self, handle: TimerHandle, now: TimeUs) -> Result<()> {
        let event = self.event(handle)?;
        event.active = true;
        event.next_due = now + event.period;
        Ok(())
    }

    /// Stop firing
    pub fn deactivate(&mut self, handle: TimerHandle) -> Result<()> {
        self.event(handle)?.active = false;
        Ok(())
    }

    /// Restart the period from `now`
    pub fn reset(&mut self, handle: TimerHandle, now: TimeUs) -> Result<()> {
        let event = self.event(handle)?;
        event.next_due = now + event.period;
        Ok(())
    }

    /// Event is firing
    pub fn is_active(&self, handle: TimerHandle) -> bool {
        self.events
            .get(handle.0 as usize)
            .map(|e| e.active)
            .unwrap_or(false)
    }

    /// Fire every due active event once; returns how many fired
    pub fn poll(&mut self, ctx: &mut C, now: TimeUs) -> usize {
        let mut fired = 0;
        for i in 0..self.events.len() {
            let event = &mut self.events[i];
            if !event.active || now < event.next_due {
                continue;
            }
            event.next_due += event.period;
            if event.next_due <= now {
                event.next_due = now + event.period;
            }
            let callback = event.callback;
            callback(ctx);
            fired += 1;
        }
        fired
    }
}

impl<C> Default for PeriodicTimer<C> {
    fn default() -> Self {
        Self::new()
    }
}
