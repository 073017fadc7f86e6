//! Single-threaded timer queue.
//!
//! The session loop owns one `TimerQueue` shared by the reconnect path and the
//! simulator. Timers never fire on their own: the loop calls `take_due` and
//! dispatches the payloads itself, so cancelling a timer is always immediate.

use std::rc::Rc;
use std::time::Duration;

use crate::clock::Clock;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// What a session timer is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionTimer {
    Reconnect,
    SimulationTick,
}

struct Entry<T> {
    id: TimerId,
    deadline: Duration,
    period: Option<Duration>,
    payload: T,
}

pub struct TimerQueue<T> {
    clock: Rc<dyn Clock>,
    next_id: u64,
    entries: Vec<Entry<T>>,
}

impl<T: Clone> TimerQueue<T> {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            clock,
            next_id: 1,
            entries: Vec::new(),
        }
    }

    pub fn clock(&self) -> &Rc<dyn Clock> {
        &self.clock
    }

    /// Fire once after `delay`.
    pub fn schedule_once(&mut self, delay: Duration, payload: T) -> TimerId {
        self.insert(delay, None, payload)
    }

    /// Fire every `period`, first after one period.
    pub fn schedule_repeating(&mut self, period: Duration, payload: T) -> TimerId {
        let period = period.max(Duration::from_millis(1));
        self.insert(period, Some(period), payload)
    }

    fn insert(&mut self, delay: Duration, period: Option<Duration>, payload: T) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.entries.push(Entry {
            id,
            deadline: self.clock.now() + delay,
            period,
            payload,
        });
        id
    }

    /// Returns false if the timer already fired (one-shot) or was cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    pub fn cancel_all(&mut self) {
        self.entries.clear();
    }

    pub fn is_scheduled(&self, id: TimerId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    pub fn pending(&self) -> usize {
        self.entries.len()
    }

    pub fn time_until_next(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.entries
            .iter()
            .map(|e| e.deadline.saturating_sub(now))
            .min()
    }

    /// Remove and return every timer whose deadline has passed, earliest first.
    ///
    /// Repeating timers are re-armed one period later; a repeating timer that
    /// fell several periods behind fires once, not once per missed period.
    pub fn take_due(&mut self) -> Vec<(TimerId, T)> {
        let now = self.clock.now();
        let mut due: Vec<(Duration, TimerId, T)> = Vec::new();
        let mut kept = Vec::with_capacity(self.entries.len());
        for mut entry in self.entries.drain(..) {
            if entry.deadline > now {
                kept.push(entry);
                continue;
            }
            due.push((entry.deadline, entry.id, entry.payload.clone()));
            if let Some(period) = entry.period {
                let mut next = entry.deadline + period;
                if next <= now {
                    next = now + period;
                }
                entry.deadline = next;
                kept.push(entry);
            }
        }
        self.entries = kept;
        due.sort_by_key(|(deadline, id, _)| (*deadline, *id));
        due.into_iter().map(|(_, id, payload)| (id, payload)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn queue() -> (ManualClock, TimerQueue<&'static str>) {
        let clock = ManualClock::default();
        let queue = TimerQueue::new(Rc::new(clock.clone()));
        (clock, queue)
    }

    #[test]
    fn one_shot_fires_once() {
        let (clock, mut timers) = queue();
        let id = timers.schedule_once(Duration::from_secs(3), "reconnect");
        clock.advance(Duration::from_millis(2999));
        assert!(timers.take_due().is_empty());
        clock.advance(Duration::from_millis(1));
        assert_eq!(timers.take_due(), vec![(id, "reconnect")]);
        clock.advance(Duration::from_secs(10));
        assert!(timers.take_due().is_empty());
        assert_eq!(timers.pending(), 0);
    }

    #[test]
    fn repeating_rearms_without_burst() {
        let (clock, mut timers) = queue();
        let id = timers.schedule_repeating(Duration::from_millis(100), "tick");
        clock.advance(Duration::from_millis(100));
        assert_eq!(timers.take_due().len(), 1);
        clock.advance(Duration::from_millis(1000));
        assert_eq!(timers.take_due().len(), 1);
        assert!(timers.is_scheduled(id));
        assert_eq!(timers.time_until_next(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn cancel_removes_pending_timer() {
        let (clock, mut timers) = queue();
        let id = timers.schedule_repeating(Duration::from_millis(100), "tick");
        assert!(timers.cancel(id));
        assert!(!timers.cancel(id));
        clock.advance(Duration::from_secs(1));
        assert!(timers.take_due().is_empty());
        assert_eq!(timers.pending(), 0);
    }

    #[test]
    fn due_timers_come_out_in_deadline_order() {
        let (clock, mut timers) = queue();
        let late = timers.schedule_once(Duration::from_millis(300), "late");
        let early = timers.schedule_once(Duration::from_millis(100), "early");
        clock.advance(Duration::from_millis(500));
        assert_eq!(timers.take_due(), vec![(early, "early"), (late, "late")]);
    }
}
