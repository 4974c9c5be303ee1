//! Settings which the command line (or a test) chooses before the
//! simulation context is created.
use conv::*;

/// Idle countdown used when the event queue is empty.
pub const NOQUEUE_WAIT: i32 = 1_000_000;

/// Default delay between characters injected by `SEND`.
pub const SEND_DEFAULT_DELAY: u32 = 1000;

/// Default instructions-per-second rate used to convert
/// microsecond delays into simulated instruction counts.
pub const DEFAULT_INSTRUCTIONS_PER_SECOND: u32 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScpConfig {
    pub noqueue_wait: i32,
    pub instructions_per_second: u32,
    pub send_default_delay: u32,
}

impl Default for ScpConfig {
    fn default() -> ScpConfig {
        ScpConfig {
            noqueue_wait: NOQUEUE_WAIT,
            instructions_per_second: DEFAULT_INSTRUCTIONS_PER_SECOND,
            send_default_delay: SEND_DEFAULT_DELAY,
        }
    }
}

impl ScpConfig {
    /// Convert a delay in microseconds to a number of simulated
    /// instructions at the configured rate.  Delays too long to
    /// represent saturate.
    #[must_use]
    pub fn usecs_to_instructions(&self, usecs: u32) -> i32 {
        let instructions: u64 =
            u64::from(usecs) * u64::from(self.instructions_per_second) / 1_000_000;
        i32::value_from(instructions).unwrap_or(i32::MAX)
    }
}

#[test]
fn test_usecs_conversion() {
    let config = ScpConfig {
        instructions_per_second: 2_000_000,
        ..ScpConfig::default()
    };
    assert_eq!(config.usecs_to_instructions(0), 0);
    assert_eq!(config.usecs_to_instructions(5), 10);
    assert_eq!(config.usecs_to_instructions(u32::MAX), i32::MAX);
    assert_eq!(ScpConfig::default().usecs_to_instructions(250), 250);
}
