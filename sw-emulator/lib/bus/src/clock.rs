/*++

Licensed under the Apache-2.0 license.

File Name:

    clock.rs

Abstract:

    File contains the simulated cycle counter and the timers device models
    use to schedule deferred work on it. Both are shareable across threads,
    so a model can be stepped from a background thread while another
    thread touches its registers.

--*/
use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::Bus;

/// Peripherals keep a Timer and use it to ask for a [`Bus::poll`] call at a
/// later cycle.
///
/// # Example
///
/// ```
/// use c3_emu_bus::{Bus, BusError, Clock, Timer, ActionHandle};
/// use c3_emu_types::{RvAddr, RvData, RvSize};
/// struct Countdown {
///     timer: Timer,
///     expiry: Option<ActionHandle>,
///     expired: bool,
/// }
/// impl Bus for Countdown {
///     fn read(&mut self, _size: RvSize, _addr: RvAddr) -> Result<RvData, BusError> {
///         Ok(self.expired as u32)
///     }
///     fn write(&mut self, _size: RvSize, _addr: RvAddr, val: RvData) -> Result<(), BusError> {
///         self.expiry = Some(self.timer.schedule_poll_in(val.into()));
///         Ok(())
///     }
///     fn poll(&mut self) {
///         self.expired |= self.timer.fired(&mut self.expiry);
///     }
/// }
///
/// let clock = Clock::new();
/// let mut countdown = Countdown { timer: clock.timer(), expiry: None, expired: false };
/// countdown.write(RvSize::Word, 0, 500).unwrap();
/// assert_eq!(clock.time_to_next_action(), Some(500));
/// clock.increment_and_process_timer_actions(500, &mut countdown);
/// assert!(countdown.expired);
/// ```
#[derive(Clone)]
pub struct Timer {
    shared: Arc<Shared>,
}

impl Timer {
    pub fn new(clock: &Clock) -> Self {
        Self {
            shared: clock.shared.clone(),
        }
    }

    /// Cycles elapsed since the clock was created.
    pub fn now(&self) -> u64 {
        self.shared.state().now
    }

    /// Returns true, and clears `action`, once the cycle `action` was
    /// scheduled for has been reached.
    pub fn fired(&self, action: &mut Option<ActionHandle>) -> bool {
        let due = match action {
            Some(handle) => {
                self.shared.check_owner(handle);
                self.shared.state().now >= handle.at
            }
            None => false,
        };
        if due {
            *action = None;
        }
        due
    }

    /// Schedules a poll of the owning bus at cycle `at`.
    pub fn schedule_poll_at(&self, at: u64) -> ActionHandle {
        let mut state = self.shared.state();
        let id = state.next_id;
        state.next_id += 1;
        state.pending.insert((at, id));
        ActionHandle {
            at,
            id,
            owner: self.shared.owner(),
        }
    }

    /// Schedules a poll of the owning bus `cycles` from now.
    pub fn schedule_poll_in(&self, cycles: u64) -> ActionHandle {
        let at = self.now().saturating_add(cycles);
        self.schedule_poll_at(at)
    }

    /// Drops a scheduled poll.
    ///
    /// # Panics
    ///
    /// Panics if `handle` belongs to another clock.
    pub fn cancel(&self, handle: ActionHandle) {
        self.shared.check_owner(&handle);
        self.shared.state().pending.remove(&(handle.at, handle.id));
    }
}

/// A scheduled poll returned by [`Timer::schedule_poll_in`].
#[derive(Debug)]
pub struct ActionHandle {
    at: u64,
    id: u64,
    owner: usize,
}

#[derive(Default)]
struct State {
    now: u64,
    next_id: u64,
    pending: BTreeSet<(u64, u64)>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn owner(&self) -> usize {
        self as *const Self as usize
    }

    fn check_owner(&self, handle: &ActionHandle) {
        assert_eq!(
            handle.owner,
            self.owner(),
            "action was scheduled on another clock"
        );
    }
}

/// Simulated cycle counter.
#[derive(Default)]
pub struct Clock {
    shared: Arc<Shared>,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timer(&self) -> Timer {
        Timer::new(self)
    }

    /// Cycles elapsed since the clock was created.
    pub fn now(&self) -> u64 {
        self.shared.state().now
    }

    /// Cycles until the earliest scheduled poll, 0 if one is already due,
    /// or None when nothing is scheduled.
    pub fn time_to_next_action(&self) -> Option<u64> {
        let state = self.shared.state();
        let (at, _) = state.pending.first()?;
        Some(at.saturating_sub(state.now))
    }

    /// Advances the clock by `delta` and returns the number of scheduled
    /// polls that came due.
    pub fn increment(&self, delta: u64) -> usize {
        let mut state = self.shared.state();
        state.now = state.now.saturating_add(delta);
        let now = state.now;
        let mut due = 0;
        while state.pending.first().is_some_and(|(at, _)| *at <= now) {
            state.pending.pop_first();
            due += 1;
        }
        due
    }

    /// Advances the clock by `delta` and polls `bus` once if anything came
    /// due. The clock is unlocked during the poll, so the bus may schedule
    /// again from inside it.
    pub fn increment_and_process_timer_actions(&self, delta: u64, bus: &mut impl Bus) -> usize {
        let due = self.increment(delta);
        if due > 0 {
            bus.poll();
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use c3_emu_types::{BusError, RvAddr, RvData, RvSize};

    #[derive(Default)]
    struct PollCounter {
        polls: usize,
    }

    impl Bus for PollCounter {
        fn read(&mut self, _size: RvSize, _addr: RvAddr) -> Result<RvData, BusError> {
            Err(BusError::LoadAccessFault)
        }
        fn write(&mut self, _size: RvSize, _addr: RvAddr, _val: RvData) -> Result<(), BusError> {
            Err(BusError::StoreAccessFault)
        }
        fn poll(&mut self) {
            self.polls += 1;
        }
    }

    #[test]
    fn test_schedule_and_fire() {
        let clock = Clock::new();
        let timer = clock.timer();
        assert_eq!(clock.time_to_next_action(), None);

        let mut first = Some(timer.schedule_poll_in(25));
        let mut second = Some(timer.schedule_poll_in(40));
        assert_eq!(clock.time_to_next_action(), Some(25));

        assert_eq!(clock.increment(24), 0);
        assert!(!timer.fired(&mut first));
        assert_eq!(clock.increment(1), 1);
        assert!(timer.fired(&mut first));
        assert!(first.is_none());
        assert_eq!(clock.time_to_next_action(), Some(15));

        timer.cancel(second.take().unwrap());
        assert_eq!(clock.time_to_next_action(), None);
        assert_eq!(clock.increment(100), 0);
        assert_eq!(clock.now(), 125);
    }

    #[test]
    fn test_same_cycle_polls_once() {
        let clock = Clock::new();
        let timer = clock.timer();
        let mut bus = PollCounter::default();
        let _a = timer.schedule_poll_at(10);
        let _b = timer.schedule_poll_at(10);
        let _c = timer.schedule_poll_at(30);

        assert_eq!(clock.increment_and_process_timer_actions(5, &mut bus), 0);
        assert_eq!(bus.polls, 0);
        assert_eq!(clock.increment_and_process_timer_actions(10, &mut bus), 2);
        assert_eq!(bus.polls, 1);
        assert_eq!(clock.time_to_next_action(), Some(15));
    }

    #[test]
    fn test_overdue_action() {
        let clock = Clock::new();
        clock.increment(50);
        let timer = clock.timer();
        let mut past = Some(timer.schedule_poll_at(10));
        assert_eq!(clock.time_to_next_action(), Some(0));
        assert!(timer.fired(&mut past));
        assert_eq!(clock.increment(0), 1);
    }

    #[test]
    fn test_timer_from_other_thread() {
        let clock = Clock::new();
        let timer = clock.timer();
        let mut action = std::thread::spawn(move || Some(timer.schedule_poll_in(10)))
            .join()
            .unwrap();
        assert_eq!(clock.increment(10), 1);
        assert!(clock.timer().fired(&mut action));
    }

    #[test]
    #[should_panic(expected = "action was scheduled on another clock")]
    fn test_cancel_foreign_action() {
        let action = Clock::new().timer().schedule_poll_at(50);
        Clock::new().timer().cancel(action);
    }
}
