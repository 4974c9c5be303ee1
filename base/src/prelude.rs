//! The prelude exports the types which most users of the base crate
//! need.
pub use super::collections::pq::{KeyedReversePriorityQueue, UnknownKeyError};
pub use super::quoting::{decode_quoted_string, encode_quoted_string, QuotedStringError};
pub use super::switches::{InvalidSwitch, Switches, LETTER_MASK};
pub use super::types::*;
