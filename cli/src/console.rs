//! The test bench's console output device.
//!
//! Characters typed by the simulated program are queued here and
//! handed over one at a time, paced by a scheduled unit, much as a
//! real teletype would accept them.
use std::collections::VecDeque;

use tracing::{event, Level};

use scp::{EventHandler, Scheduler, StopReason, UnitId};

/// Instructions between successive output characters.
pub const CHARACTER_TIME: i32 = 10;

#[derive(Debug)]
pub struct ConsoleOutput {
    unit: UnitId,
    pending: VecDeque<u8>,
    emitted: Vec<u8>,
}

impl ConsoleOutput {
    pub fn new(scheduler: &mut Scheduler) -> ConsoleOutput {
        ConsoleOutput {
            unit: scheduler.register("CONSOLE"),
            pending: VecDeque::new(),
            emitted: Vec::new(),
        }
    }

    /// Queue `bytes` for output.
    pub fn write(&mut self, scheduler: &mut Scheduler, bytes: &[u8]) {
        self.pending.extend(bytes.iter().copied());
        if !self.pending.is_empty() {
            scheduler.activate(self.unit, CHARACTER_TIME);
        }
    }

    /// Characters which have been output since the last call.
    pub fn take_emitted(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.emitted)
    }

    /// Forget any output not yet emitted.
    pub fn reset(&mut self, scheduler: &mut Scheduler) {
        self.pending.clear();
        scheduler.cancel(self.unit);
    }
}

impl EventHandler for ConsoleOutput {
    fn on_event(&mut self, scheduler: &mut Scheduler, unit: UnitId) -> Result<(), StopReason> {
        if unit != self.unit {
            return Err(StopReason::Device {
                unit: scheduler.name(unit).to_string(),
                message: "unexpected event".to_string(),
            });
        }
        if let Some(byte) = self.pending.pop_front() {
            event!(Level::TRACE, "console output {:#04x}", byte);
            self.emitted.push(byte);
        }
        if !self.pending.is_empty() {
            scheduler.activate(self.unit, CHARACTER_TIME);
        }
        Ok(())
    }
}

#[test]
fn test_output_is_paced() {
    let mut scheduler = Scheduler::new(&scp::ScpConfig::default());
    let mut console = ConsoleOutput::new(&mut scheduler);
    console.write(&mut scheduler, b"ok");
    let mut emitted = Vec::new();
    for _ in 0..(3 * CHARACTER_TIME) {
        if scheduler.interval() <= 0 {
            scheduler
                .process_event(&mut console)
                .expect("console does not stop");
            emitted.push((scheduler.gtime(), console.take_emitted()));
        }
        scheduler.consume(1);
    }
    assert_eq!(
        emitted,
        vec![
            (i64::from(CHARACTER_TIME), b"o".to_vec()),
            (i64::from(2 * CHARACTER_TIME), b"k".to_vec()),
        ]
    );
    assert!(!scheduler.is_active(console.unit));
}
