//! Send queues.
//!
//! A [`SendContext`] holds bytes waiting to be injected into the
//! input of one line.  The machine polls it whenever the simulated
//! device could accept input; one byte is handed over per poll, no
//! sooner than `delay` instructions after the previous one.
use tracing::{event, Level};

use base::prelude::*;

use super::scheduler::SimTime;

/// The result of polling a [`SendContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPoll {
    /// Nothing is queued.
    Idle,
    /// Data is queued but the next byte is not due yet.
    NotYet,
    Injected(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendContext {
    line: String,
    buffer: Vec<u8>,
    /// Offset of the next byte to hand over.
    extoff: usize,
    delay: u32,
    after: u32,
    next_time: SimTime,
}

impl SendContext {
    #[must_use]
    pub fn new(line: &str, default_delay: u32) -> SendContext {
        SendContext {
            line: line.to_string(),
            buffer: Vec::new(),
            extoff: 0,
            delay: default_delay,
            after: 0,
            next_time: 0,
        }
    }

    #[must_use]
    pub fn line(&self) -> &str {
        &self.line
    }

    /// The bytes still waiting to be injected.
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.buffer[self.extoff..]
    }

    #[must_use]
    pub fn delay(&self) -> u32 {
        self.delay
    }

    #[must_use]
    pub fn after(&self) -> u32 {
        self.after
    }

    #[must_use]
    pub fn next_time(&self) -> SimTime {
        self.next_time
    }

    /// Queue `data`.  Nonzero `delay` and `after` replace the current
    /// settings; if no `after` has ever been set, the delay is used.
    /// The first of the new bytes is due `after` instructions from
    /// `now` (but never earlier than a byte already scheduled).
    pub fn input(&mut self, data: &[u8], after: u32, delay: u32, now: SimTime) {
        if self.extoff != 0 {
            self.buffer.drain(..self.extoff);
            self.extoff = 0;
        }
        self.buffer.extend_from_slice(data);
        if delay != 0 {
            self.delay = delay;
        }
        if after != 0 {
            self.after = after;
        }
        if self.after == 0 {
            self.after = self.delay;
        }
        self.next_time = self.next_time.max(now + i64::from(self.after));
        event!(
            Level::DEBUG,
            line = %self.line,
            "queued {} for input, first byte due at {}",
            encode_quoted_string(data),
            self.next_time
        );
    }

    /// Hand over the next byte if it is due.
    pub fn poll(&mut self, now: SimTime) -> SendPoll {
        let Some(&byte) = self.buffer.get(self.extoff) else {
            return SendPoll::Idle;
        };
        if now < self.next_time {
            return SendPoll::NotYet;
        }
        self.extoff += 1;
        self.next_time = now + i64::from(self.delay);
        event!(
            Level::TRACE,
            line = %self.line,
            "injecting {}",
            encode_quoted_string(&[byte])
        );
        SendPoll::Injected(byte)
    }

    /// Discard any queued data.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.extoff = 0;
    }

    /// The `SHOW SEND` report.
    #[must_use]
    pub fn describe(&self, now: SimTime) -> String {
        let pending = self.pending();
        if pending.is_empty() {
            return format!("No pending send data on {}\n", self.line);
        }
        format!(
            concat!(
                "{} send data: {}\n",
                "  Delay: {} instructions\n",
                "  After: {} instructions\n",
                "  Next byte due in {} instructions\n",
            ),
            self.line,
            encode_quoted_string(pending),
            self.delay,
            self.after,
            (self.next_time - now).max(0)
        )
    }
}

#[test]
fn test_fifo_and_pacing() {
    let mut snd = SendContext::new("CONSOLE", 1000);
    snd.input(b"XYZ", 0, 10, 0);
    assert_eq!(snd.after(), 10);
    for now in 0..10 {
        assert_eq!(snd.poll(now), SendPoll::NotYet);
    }
    assert_eq!(snd.poll(10), SendPoll::Injected(b'X'));
    assert_eq!(snd.poll(15), SendPoll::NotYet);
    assert_eq!(snd.poll(20), SendPoll::Injected(b'Y'));
    assert_eq!(snd.poll(29), SendPoll::NotYet);
    assert_eq!(snd.poll(35), SendPoll::Injected(b'Z'));
    assert_eq!(snd.poll(100), SendPoll::Idle);
}

#[test]
fn test_after_gates_first_byte() {
    let mut snd = SendContext::new("CONSOLE", 1000);
    snd.input(b"ab", 50, 0, 100);
    assert_eq!(snd.delay(), 1000);
    assert_eq!(snd.next_time(), 150);
    assert_eq!(snd.poll(149), SendPoll::NotYet);
    assert_eq!(snd.poll(150), SendPoll::Injected(b'a'));
    assert_eq!(snd.poll(1149), SendPoll::NotYet);
    assert_eq!(snd.poll(1150), SendPoll::Injected(b'b'));
}

#[test]
fn test_next_time_never_moves_back() {
    let mut snd = SendContext::new("CONSOLE", 1000);
    snd.input(b"a", 500, 0, 0);
    snd.input(b"b", 10, 0, 5);
    assert_eq!(snd.next_time(), 500);
    assert_eq!(snd.pending(), b"ab");
}

#[test]
fn test_compaction_keeps_order() {
    let mut snd = SendContext::new("CONSOLE", 1);
    snd.input(b"abc", 0, 0, 0);
    assert_eq!(snd.poll(1), SendPoll::Injected(b'a'));
    snd.input(b"d", 0, 0, 1);
    assert_eq!(snd.pending(), b"bcd");
    let mut got = Vec::new();
    for now in 2..20 {
        if let SendPoll::Injected(b) = snd.poll(now) {
            got.push(b);
        }
    }
    assert_eq!(got, b"bcd");
}

#[test]
fn test_clear_and_describe() {
    let mut snd = SendContext::new("CONSOLE", 1000);
    assert_eq!(snd.describe(0), "No pending send data on CONSOLE\n");
    snd.input(b"hi\r", 0, 0, 0);
    assert_eq!(
        snd.describe(400),
        concat!(
            "CONSOLE send data: \"hi\\r\"\n",
            "  Delay: 1000 instructions\n",
            "  After: 1000 instructions\n",
            "  Next byte due in 600 instructions\n",
        )
    );
    snd.clear();
    assert_eq!(snd.poll(5000), SendPoll::Idle);
}
