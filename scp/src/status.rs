//! Errors reported by commands, and the reasons for which simulation
//! stops.
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;

use base::prelude::*;

use super::breakpoint::BreakTypes;

/// A user error.  Operations which return one of these have not
/// changed any state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScpError {
    /// The breakpoint types named are not supported by this machine.
    UnknownBreakpointType(Switches),
    /// Step-over and other dynamic breakpoints cannot carry actions.
    ActionOnDynamicBreakpoint,
    InvalidQuotedString(QuotedStringError),
    InvalidSwitch(InvalidSwitch),
    /// Regular expression expect rules are not supported.
    RegexUnsupported,
    /// `-I` only makes sense for regular expression rules.
    CaseInsensitiveNeedsRegex,
    /// A persistent rule with this pattern already exists.
    DuplicatePersistentRule(String),
    /// A nonzero halt-after delay was given while other rules exist.
    HaltAfterConflict,
    /// `GO UNTIL` would have to replace the user's own rule.
    ExpectRuleExists(String),
    /// An address range names more addresses than we will set
    /// breakpoints on at once.
    RangeTooLarge { low: Address, high: Address },
    BadArgument(String),
    MissingArgument(&'static str),
    TooManyArguments(String),
    UnknownLine(String),
    UnknownCommand(String),
    AmbiguousCommand(String),
    /// `DO` files were nested more deeply than we allow.
    NestingTooDeep(usize),
    Io { path: PathBuf, message: String },
}

impl Display for ScpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            ScpError::UnknownBreakpointType(types) => {
                write!(f, "unknown breakpoint type: {types}")
            }
            ScpError::ActionOnDynamicBreakpoint => {
                f.write_str("dynamic breakpoints cannot have actions")
            }
            ScpError::InvalidQuotedString(e) => write!(f, "invalid quoted string: {e}"),
            ScpError::InvalidSwitch(e) => Display::fmt(e, f),
            ScpError::RegexUnsupported => {
                f.write_str("regular expression expect rules are not supported")
            }
            ScpError::CaseInsensitiveNeedsRegex => {
                f.write_str("case independent matching is only valid for regular expressions")
            }
            ScpError::DuplicatePersistentRule(pattern) => {
                write!(f, "persistent expect {pattern} already exists")
            }
            ScpError::HaltAfterConflict => f.write_str(
                "multiple concurrent expect rules are not valid when a HALTAFTER parameter is non-zero",
            ),
            ScpError::ExpectRuleExists(pattern) => {
                write!(f, "expect rule {pattern} already exists")
            }
            ScpError::RangeTooLarge { low, high } => {
                write!(f, "address range {low}-{high} is too large")
            }
            ScpError::BadArgument(arg) => write!(f, "invalid argument '{arg}'"),
            ScpError::MissingArgument(what) => write!(f, "missing argument: {what}"),
            ScpError::TooManyArguments(rest) => write!(f, "too many arguments: '{rest}'"),
            ScpError::UnknownLine(name) => write!(f, "no line named '{name}'"),
            ScpError::UnknownCommand(word) => write!(f, "unknown command '{word}'"),
            ScpError::AmbiguousCommand(word) => write!(f, "ambiguous command '{word}'"),
            ScpError::NestingTooDeep(depth) => {
                write!(f, "DO commands nested more than {depth} deep")
            }
            ScpError::Io { path, message } => write!(f, "{}: {message}", path.display()),
        }
    }
}

impl Error for ScpError {}

impl From<QuotedStringError> for ScpError {
    fn from(e: QuotedStringError) -> ScpError {
        ScpError::InvalidQuotedString(e)
    }
}

impl From<InvalidSwitch> for ScpError {
    fn from(e: InvalidSwitch) -> ScpError {
        ScpError::InvalidSwitch(e)
    }
}

/// Why simulation stopped.  These are not errors as such; the
/// command loop reports them and carries on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// A stop was requested from outside the simulation.
    UserStop,
    /// The requested number of instructions has been executed.
    StepExpired,
    /// An expect rule matched (and its halt-after delay has passed).
    ExpectMatched,
    Breakpoint {
        address: Address,
        types: BreakTypes,
        message: String,
    },
    /// The simulated program executed a halt instruction.
    Halted { address: Address },
    /// A simulated device (or the processor) could not continue.
    Device { unit: String, message: String },
}

impl Display for StopReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            StopReason::UserStop => f.write_str("Simulation stopped"),
            StopReason::StepExpired => f.write_str("Step expired"),
            StopReason::ExpectMatched => f.write_str("Expect matched"),
            StopReason::Breakpoint { message, .. } => f.write_str(message),
            StopReason::Halted { address } => write!(f, "HALT instruction, PC: {address:>08o}"),
            StopReason::Device { unit, message } => write!(f, "{unit}: {message}"),
        }
    }
}

#[test]
fn test_error_messages() {
    assert_eq!(
        ScpError::UnknownBreakpointType(Switches::letter('X') | Switches::letter('Y'))
            .to_string(),
        "unknown breakpoint type: -XY"
    );
    assert_eq!(
        ScpError::from(QuotedStringError::NotQuoted).to_string(),
        "invalid quoted string: string must be quote delimited"
    );
}

#[test]
fn test_stop_messages() {
    assert_eq!(
        StopReason::Halted {
            address: Address::new(0o12)
        }
        .to_string(),
        "HALT instruction, PC: 00000012"
    );
    assert_eq!(StopReason::StepExpired.to_string(), "Step expired");
}
