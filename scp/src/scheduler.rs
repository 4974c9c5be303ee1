//! The discrete-event scheduler.
//!
//! Devices and timers are represented by units, registered once and
//! then referred to by [`UnitId`].  Activating a unit queues it to
//! fire after some number of simulated instructions; the machine
//! counts instructions down with [`Scheduler::consume`] and calls
//! [`Scheduler::process_event`] whenever [`Scheduler::interval`]
//! reaches zero.
//!
//! The queue holds absolute due times.  Units due at the same instant
//! fire in the order in which they were activated.
use std::fmt::{self, Display, Formatter};

use conv::*;
use tracing::{event, Level};

use base::collections::pq::KeyedReversePriorityQueue;

use super::config::ScpConfig;
use super::status::StopReason;

/// Simulated time, counted in instructions.
pub type SimTime = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(usize);

impl Display for UnitId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "unit#{}", self.0)
    }
}

/// Queue ordering key: the due time, then the order of activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Due {
    at: SimTime,
    seq: u64,
}

/// Something which reacts to units firing.
pub trait EventHandler {
    /// Called when `unit` fires.  The handler may re-activate `unit`
    /// (or any other unit) through `scheduler`.
    fn on_event(&mut self, scheduler: &mut Scheduler, unit: UnitId) -> Result<(), StopReason>;
}

impl<F> EventHandler for F
where
    F: FnMut(&mut Scheduler, UnitId) -> Result<(), StopReason>,
{
    fn on_event(&mut self, scheduler: &mut Scheduler, unit: UnitId) -> Result<(), StopReason> {
        self(scheduler, unit)
    }
}

/// One queued unit, as reported by [`Scheduler::queue_entries`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub unit: UnitId,
    pub name: String,
    /// Time between the previous entry firing and this one.
    pub delta: SimTime,
    /// Time from now until this entry fires.
    pub remaining: SimTime,
}

fn clamp_interval(delta: SimTime) -> i32 {
    i32::value_from(delta).unwrap_or(if delta < 0 { i32::MIN } else { i32::MAX })
}

#[derive(Debug)]
pub struct Scheduler {
    config: ScpConfig,
    names: Vec<String>,
    queue: KeyedReversePriorityQueue<UnitId, Due>,
    next_seq: u64,
    /// Simulated time as of the last synchronisation.
    time: SimTime,
    /// Countdown to the next event.
    interval: i32,
    /// The value `interval` had at the last synchronisation.
    base_interval: i32,
    stop_requested: bool,
}

impl Scheduler {
    #[must_use]
    pub fn new(config: &ScpConfig) -> Scheduler {
        Scheduler {
            config: config.clone(),
            names: Vec::new(),
            queue: KeyedReversePriorityQueue::new(),
            next_seq: 0,
            time: 0,
            interval: config.noqueue_wait,
            base_interval: config.noqueue_wait,
            stop_requested: false,
        }
    }

    pub fn register(&mut self, name: &str) -> UnitId {
        let id = UnitId(self.names.len());
        self.names.push(name.to_string());
        event!(Level::DEBUG, "registered unit {} as {}", name, id);
        id
    }

    #[must_use]
    pub fn name(&self, unit: UnitId) -> &str {
        self.names.get(unit.0).map_or("?", String::as_str)
    }

    fn update_time(&mut self) {
        self.time += i64::from(self.base_interval) - i64::from(self.interval);
        self.base_interval = self.interval;
    }

    fn reset_interval(&mut self) {
        self.interval = match self.queue.peek() {
            Some((_, due)) => clamp_interval(due.at - self.time),
            None => self.config.noqueue_wait,
        };
        self.base_interval = self.interval;
    }

    /// The current simulated time.
    #[must_use]
    pub fn gtime(&self) -> SimTime {
        self.time + i64::from(self.base_interval) - i64::from(self.interval)
    }

    /// Instructions remaining until the next event is due.
    #[must_use]
    pub fn interval(&self) -> i32 {
        self.interval
    }

    /// Account for `n` instructions having been executed.
    pub fn consume(&mut self, n: i32) {
        self.interval = self.interval.saturating_sub(n);
    }

    #[must_use]
    pub fn is_active(&self, unit: UnitId) -> bool {
        self.queue.contains(&unit)
    }

    /// Queue `unit` to fire `delay` instructions from now.  If the
    /// unit is already queued, its existing schedule is kept.
    pub fn activate(&mut self, unit: UnitId, delay: i32) {
        if self.is_active(unit) {
            event!(
                Level::TRACE,
                "unit {} is already active, ignoring activation",
                self.name(unit)
            );
            return;
        }
        self.update_time();
        let due = Due {
            at: self.time + i64::from(delay),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        event!(
            Level::TRACE,
            "activating {} at time {} to fire at {}",
            self.name(unit),
            self.time,
            due.at
        );
        self.queue.push(unit, due);
        self.reset_interval();
    }

    /// Queue `unit` to fire `delay` instructions from now, replacing
    /// any existing schedule.
    pub fn activate_abs(&mut self, unit: UnitId, delay: i32) {
        self.cancel(unit);
        self.activate(unit, delay);
    }

    /// Queue `unit` to fire after `usecs` microseconds of simulated
    /// time.
    pub fn activate_after(&mut self, unit: UnitId, usecs: u32) {
        let delay = self.config.usecs_to_instructions(usecs);
        self.activate(unit, delay);
    }

    /// Remove `unit` from the queue.  Cancelling a unit which is not
    /// queued does nothing.
    pub fn cancel(&mut self, unit: UnitId) {
        if !self.is_active(unit) {
            return;
        }
        self.update_time();
        self.queue.remove(&unit);
        if self.queue.contains(&unit) {
            event!(
                Level::ERROR,
                "event queue is inconsistent: {} is still queued after cancellation",
                self.name(unit)
            );
            std::process::abort();
        }
        event!(Level::TRACE, "cancelled {}", self.name(unit));
        self.reset_interval();
    }

    /// One more than the number of instructions until `unit` fires,
    /// or 0 if it is not queued.
    #[must_use]
    pub fn activate_time(&self, unit: UnitId) -> SimTime {
        match self.queue.get_priority(&unit) {
            Some(due) => (due.at - self.gtime()).max(0) + 1,
            None => 0,
        }
    }

    /// Ask the simulation to stop at the next call to
    /// [`Scheduler::process_event`].
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Fire the unit at the head of the queue, together with any
    /// other units due at the same time.
    ///
    /// If this is called before the head unit is due, simulated time
    /// moves forward to its due time.  A unit never fires early.
    ///
    /// # Errors
    ///
    /// Returns the stop reason of the first handler which fails, or
    /// [`StopReason::UserStop`] when a stop had been requested (in
    /// which case nothing fires).
    pub fn process_event<H>(&mut self, handler: &mut H) -> Result<(), StopReason>
    where
        H: EventHandler + ?Sized,
    {
        if self.stop_requested {
            self.stop_requested = false;
            return Err(StopReason::UserStop);
        }
        self.update_time();
        if self.queue.is_empty() {
            self.reset_interval();
            return Ok(());
        }
        while let Some((unit, due)) = self.queue.pop() {
            if due.at > self.time {
                self.time = due.at;
            }
            self.reset_interval();
            event!(
                Level::TRACE,
                "time {}: firing {}",
                self.time,
                self.name(unit)
            );
            handler.on_event(self, unit)?;
            if self.stop_requested {
                break;
            }
            match self.queue.peek() {
                Some((_, next)) if next.at <= self.time => (),
                _ => break,
            }
        }
        Ok(())
    }

    /// Describe the queued units in the order in which they will
    /// fire.  Summing `delta` from the first entry up to any entry
    /// gives that entry's `remaining` time.
    #[must_use]
    pub fn queue_entries(&self) -> Vec<QueueEntry> {
        let now = self.gtime();
        let mut queued: Vec<(UnitId, Due)> = self.queue.iter().map(|(u, d)| (*u, *d)).collect();
        queued.sort_by_key(|(_, due)| *due);
        let mut prev: SimTime = 0;
        queued
            .into_iter()
            .map(|(unit, due)| {
                let remaining = due.at - now;
                let delta = remaining - prev;
                prev = remaining;
                QueueEntry {
                    unit,
                    name: self.name(unit).to_string(),
                    delta,
                    remaining,
                }
            })
            .collect()
    }
}

/// The `SHOW QUEUE` report.
impl Display for Scheduler {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let entries = self.queue_entries();
        if entries.is_empty() {
            return writeln!(f, "Event queue empty, time = {}", self.gtime());
        }
        writeln!(f, "Event queue status, time = {}", self.gtime())?;
        for entry in entries {
            writeln!(f, "  {} at {}", entry.name, entry.remaining)?;
        }
        Ok(())
    }
}

#[cfg(test)]
fn fire_all(sched: &mut Scheduler) -> Vec<(UnitId, SimTime)> {
    let mut fired: Vec<(UnitId, SimTime)> = Vec::new();
    let mut record = |s: &mut Scheduler, unit: UnitId| -> Result<(), StopReason> {
        fired.push((unit, s.gtime()));
        Ok(())
    };
    while !sched.queue.is_empty() {
        sched
            .process_event(&mut record)
            .expect("recording handler never fails");
    }
    fired
}

#[test]
fn test_fires_in_time_order() {
    let mut sched = Scheduler::new(&ScpConfig::default());
    let a = sched.register("A");
    let b = sched.register("B");
    let c = sched.register("C");
    sched.activate(a, 30);
    sched.activate(b, 10);
    sched.activate(c, 20);
    assert_eq!(sched.interval(), 10);
    assert_eq!(fire_all(&mut sched), vec![(b, 10), (c, 20), (a, 30)]);
    assert_eq!(sched.gtime(), 30);
    assert_eq!(sched.interval(), ScpConfig::default().noqueue_wait);
}

#[test]
fn test_ties_fire_in_activation_order_in_one_call() {
    let mut sched = Scheduler::new(&ScpConfig::default());
    let units: Vec<UnitId> = (0..4).map(|i| sched.register(&format!("U{i}"))).collect();
    for u in units.iter().rev() {
        sched.activate(*u, 5);
    }
    let mut fired: Vec<UnitId> = Vec::new();
    let mut record = |_: &mut Scheduler, unit: UnitId| -> Result<(), StopReason> {
        fired.push(unit);
        Ok(())
    };
    sched.consume(5);
    sched.process_event(&mut record).expect("no stop");
    assert!(sched.queue.is_empty());
    let expected: Vec<UnitId> = units.iter().rev().copied().collect();
    assert_eq!(fired, expected);
}

#[test]
fn test_negative_delay_fires_first() {
    let mut sched = Scheduler::new(&ScpConfig::default());
    let a = sched.register("A");
    let b = sched.register("B");
    sched.activate(a, 0);
    sched.activate(b, -3);
    assert_eq!(sched.interval(), -3);
    let fired: Vec<UnitId> = fire_all(&mut sched).into_iter().map(|(u, _)| u).collect();
    assert_eq!(fired, vec![b, a]);
    assert_eq!(sched.gtime(), 0);
}

#[test]
fn test_activate_when_active_keeps_schedule() {
    let mut sched = Scheduler::new(&ScpConfig::default());
    let a = sched.register("A");
    sched.activate(a, 10);
    sched.activate(a, 50);
    assert_eq!(sched.activate_time(a), 11);
    sched.activate_abs(a, 50);
    assert_eq!(sched.activate_time(a), 51);
}

#[test]
fn test_cancel_is_idempotent() {
    let mut sched = Scheduler::new(&ScpConfig::default());
    let a = sched.register("A");
    sched.activate(a, 10);
    sched.cancel(a);
    sched.cancel(a);
    assert!(!sched.is_active(a));
    assert_eq!(sched.activate_time(a), 0);
    assert!(fire_all(&mut sched).is_empty());
    sched
        .process_event(&mut |_: &mut Scheduler, _: UnitId| -> Result<(), StopReason> {
            panic!("nothing should fire")
        })
        .expect("empty queue is not a stop");
}

#[test]
fn test_cancel_keeps_later_units_in_place() {
    let mut sched = Scheduler::new(&ScpConfig::default());
    let a = sched.register("A");
    let b = sched.register("B");
    let c = sched.register("C");
    sched.activate(a, 10);
    sched.activate(b, 25);
    sched.activate(c, 40);
    sched.consume(4);
    sched.cancel(a);
    assert_eq!(sched.gtime(), 4);
    assert_eq!(sched.interval(), 21);
    assert_eq!(sched.activate_time(b), 22);
    assert_eq!(sched.activate_time(c), 37);
}

#[test]
fn test_gtime_tracks_consumption() {
    let mut sched = Scheduler::new(&ScpConfig::default());
    let a = sched.register("A");
    sched.consume(7);
    assert_eq!(sched.gtime(), 7);
    sched.activate(a, 3);
    assert_eq!(sched.gtime(), 7);
    sched.consume(3);
    assert_eq!(sched.interval(), 0);
    let fired = fire_all(&mut sched);
    assert_eq!(fired, vec![(a, 10)]);
}

#[test]
fn test_stop_request() {
    let mut sched = Scheduler::new(&ScpConfig::default());
    let a = sched.register("A");
    sched.activate(a, 1);
    sched.request_stop();
    let mut count = 0;
    let mut handler = |_: &mut Scheduler, _: UnitId| -> Result<(), StopReason> {
        count += 1;
        Ok(())
    };
    assert_eq!(
        sched.process_event(&mut handler),
        Err(StopReason::UserStop)
    );
    assert!(!sched.stop_requested());
    assert!(sched.is_active(a));
    assert_eq!(sched.process_event(&mut handler), Ok(()));
    assert_eq!(count, 1);
}

#[test]
fn test_handler_stop_ends_the_batch() {
    let mut sched = Scheduler::new(&ScpConfig::default());
    let a = sched.register("A");
    let b = sched.register("B");
    sched.activate(a, 2);
    sched.activate(b, 2);
    let mut handler = |s: &mut Scheduler, unit: UnitId| -> Result<(), StopReason> {
        if unit == a {
            Err(StopReason::Device {
                unit: s.name(unit).to_string(),
                message: "failed".to_string(),
            })
        } else {
            Ok(())
        }
    };
    assert_eq!(
        sched.process_event(&mut handler),
        Err(StopReason::Device {
            unit: "A".to_string(),
            message: "failed".to_string()
        })
    );
    assert!(sched.is_active(b));
    assert_eq!(sched.interval(), 0);
}

#[test]
fn test_handler_can_reschedule() {
    let mut sched = Scheduler::new(&ScpConfig::default());
    let tick = sched.register("TICK");
    sched.activate(tick, 4);
    let mut fired = 0;
    let mut handler = |s: &mut Scheduler, unit: UnitId| -> Result<(), StopReason> {
        fired += 1;
        if fired < 3 {
            s.activate(unit, 4);
        }
        Ok(())
    };
    for _ in 0..3 {
        sched.consume(sched.interval());
        sched.process_event(&mut handler).expect("no stop");
    }
    assert_eq!(fired, 3);
    assert_eq!(sched.gtime(), 12);
}

#[test]
fn test_activate_after_converts_microseconds() {
    let config = ScpConfig {
        instructions_per_second: 500_000,
        ..ScpConfig::default()
    };
    let mut sched = Scheduler::new(&config);
    let a = sched.register("A");
    sched.activate_after(a, 100);
    assert_eq!(sched.interval(), 50);
}

#[test]
fn test_queue_entries_and_show() {
    let mut sched = Scheduler::new(&ScpConfig::default());
    assert_eq!(sched.to_string(), "Event queue empty, time = 0\n");
    let a = sched.register("A");
    let b = sched.register("B");
    sched.activate(b, 12);
    sched.activate(a, 5);
    sched.consume(2);
    let entries = sched.queue_entries();
    assert_eq!(
        entries
            .iter()
            .map(|e| (e.unit, e.delta, e.remaining))
            .collect::<Vec<_>>(),
        vec![(a, 3, 3), (b, 7, 10)]
    );
    assert_eq!(
        sched.to_string(),
        "Event queue status, time = 2\n  A at 3\n  B at 10\n"
    );
}

#[cfg(test)]
mod properties {
    use super::*;
    use test_strategy::proptest;

    #[proptest]
    fn units_fire_in_delay_order(
        #[strategy(proptest::collection::vec(1..10_000i32, 1..40))] delays: Vec<i32>,
    ) {
        let mut sched = Scheduler::new(&ScpConfig::default());
        let units: Vec<UnitId> = (0..delays.len())
            .map(|i| sched.register(&format!("U{i}")))
            .collect();
        for (u, d) in units.iter().zip(delays.iter()) {
            sched.activate(*u, *d);
        }
        let fired = fire_all(&mut sched);
        assert_eq!(fired.len(), delays.len());
        let fired_delays: Vec<i32> = fired.iter().map(|(u, _)| delays[u.0]).collect();
        assert!(fired_delays.windows(2).all(|w| w[0] <= w[1]));
        for (u, t) in &fired {
            assert_eq!(*t, i64::from(delays[u.0]));
        }
        let longest = delays.iter().copied().max().unwrap_or(0);
        assert_eq!(sched.gtime(), i64::from(longest));
    }

    #[proptest]
    fn deltas_sum_to_remaining_time(
        #[strategy(proptest::collection::vec((0..5000i32, proptest::bool::ANY), 1..30))]
        ops: Vec<(i32, bool)>,
        #[strategy(0..100i32)] elapsed: i32,
    ) {
        let mut sched = Scheduler::new(&ScpConfig::default());
        let units: Vec<UnitId> = (0..ops.len())
            .map(|i| sched.register(&format!("U{i}")))
            .collect();
        for (u, (delay, _)) in units.iter().zip(ops.iter()) {
            sched.activate(*u, *delay);
        }
        for (u, (_, cancel)) in units.iter().zip(ops.iter()) {
            if *cancel {
                sched.cancel(*u);
            }
        }
        sched.consume(elapsed);
        let mut total: SimTime = 0;
        for entry in sched.queue_entries() {
            total += entry.delta;
            assert_eq!(total, entry.remaining);
            let (delay, cancelled) = ops[entry.unit.0];
            assert!(!cancelled);
            assert_eq!(entry.remaining, i64::from(delay) - i64::from(elapsed));
        }
        let live = ops.iter().filter(|(_, cancelled)| !cancelled).count();
        assert_eq!(sched.queue_entries().len(), live);
    }
}
