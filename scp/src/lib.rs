//! The simulator control program: the machinery which sits between
//! the user (or a script) and a simulated machine.  It schedules
//! device events in simulated time, manages breakpoints, watches
//! output for expected strings, injects input, and parses the
//! commands which drive all of these.
#![crate_name = "scp"]

mod action;
mod breakpoint;
mod command;
mod config;
mod context;
mod expect;
mod lexer;
mod scheduler;
mod send;
mod status;

pub use action::ActionQueue;
pub use breakpoint::{
    BreakTypeDesc, BreakTypeTable, BreakTypes, Breakpoint, BreakpointHit, BreakpointTable, SPACES,
};
pub use command::{
    parse_address_list, parse_command, AddressRange, BreakTarget, Command, ShowWhat, Until,
};
pub use config::{ScpConfig, DEFAULT_INSTRUCTIONS_PER_SECOND, NOQUEUE_WAIT, SEND_DEFAULT_DELAY};
pub use context::{Line, LineId, SimulationContext, CONSOLE};
pub use expect::{
    ExpectContext, ExpectMatch, ExpectRule, CASE_INSENSITIVE, CLEAR_ALL, PERSIST, REGEX,
    TIME_IN_USECS,
};
pub use lexer::{tokenize, KeyValue, Lexeme, Span, Token};
pub use scheduler::{EventHandler, QueueEntry, Scheduler, SimTime, UnitId};
pub use send::{SendContext, SendPoll};
pub use status::{ScpError, StopReason};
