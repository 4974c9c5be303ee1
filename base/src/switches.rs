//! Command switches.
//!
//! Simulator control program commands accept single-letter switches
//! (`-p`, `-RW` and so on).  Each letter A-Z owns one bit of a
//! [`Switches`] mask, bit 0 being `A`.  Breakpoint types use the same
//! letter encoding.
use std::error::Error;
use std::fmt::{self, Debug, Display, Formatter};
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// Mask of all 26 letter bits.
pub const LETTER_MASK: u32 = (1 << 26) - 1;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Switches(u32);

impl Switches {
    pub const NONE: Switches = Switches(0);

    /// The switch for the letter `c` (either case).
    ///
    /// # Panics
    ///
    /// Panics when `c` is not an ASCII letter; this is intended for
    /// constants such as `Switches::letter('P')`.
    #[must_use]
    pub const fn letter(c: char) -> Switches {
        match Switches::try_letter(c) {
            Some(s) => s,
            None => panic!("switches are letters"),
        }
    }

    #[must_use]
    pub const fn try_letter(c: char) -> Option<Switches> {
        let upper = c.to_ascii_uppercase();
        if upper.is_ascii_uppercase() {
            Some(Switches(1 << (upper as u32 - 'A' as u32)))
        } else {
            None
        }
    }

    /// Form a switch mask from raw bits; bits above `Z` are dropped.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Switches {
        Switches(bits & LETTER_MASK)
    }

    #[must_use]
    pub const fn bits(&self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn contains(&self, other: Switches) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn intersects(&self, other: Switches) -> bool {
        self.0 & other.0 != 0
    }

    /// The letters present in the mask, in alphabetical order.
    pub fn letters(&self) -> impl Iterator<Item = char> + '_ {
        ('A'..='Z').filter(move |c| self.contains(Switches::letter(*c)))
    }

    /// Parse a switch token such as `-RW`.  The leading `-` is
    /// required and at least one letter must follow it.
    pub fn parse_token(token: &str) -> Result<Switches, InvalidSwitch> {
        let letters = match token.strip_prefix('-') {
            Some(rest) if !rest.is_empty() => rest,
            _ => return Err(InvalidSwitch(token.to_string())),
        };
        letters.chars().try_fold(Switches::NONE, |acc, c| {
            Switches::try_letter(c)
                .map(|s| acc | s)
                .ok_or_else(|| InvalidSwitch(token.to_string()))
        })
    }
}

impl BitOr for Switches {
    type Output = Switches;
    fn bitor(self, rhs: Switches) -> Switches {
        Switches(self.0 | rhs.0)
    }
}

impl BitOrAssign for Switches {
    fn bitor_assign(&mut self, rhs: Switches) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Switches {
    type Output = Switches;
    fn bitand(self, rhs: Switches) -> Switches {
        Switches(self.0 & rhs.0)
    }
}

impl Not for Switches {
    type Output = Switches;
    fn not(self) -> Switches {
        Switches(!self.0 & LETTER_MASK)
    }
}

impl Debug for Switches {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Switches({self})")
    }
}

/// Displays the mask the way it would be typed, e.g. `-CP`.  An
/// empty mask displays as nothing.
impl Display for Switches {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        f.write_str("-")?;
        for c in self.letters() {
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidSwitch(pub String);

impl Display for InvalidSwitch {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "invalid switch '{}'", self.0)
    }
}

impl Error for InvalidSwitch {}

#[test]
fn test_letter_bits() {
    assert_eq!(Switches::letter('A').bits(), 1);
    assert_eq!(Switches::letter('z').bits(), 1 << 25);
    assert_eq!(Switches::try_letter('3'), None);
}

#[test]
fn test_parse_token() {
    let rw = Switches::parse_token("-rw").expect("valid switches");
    assert!(rw.contains(Switches::letter('R')));
    assert!(rw.contains(Switches::letter('W')));
    assert!(!rw.intersects(Switches::letter('E')));
    assert_eq!(rw.to_string(), "-RW");
    assert!(Switches::parse_token("-").is_err());
    assert!(Switches::parse_token("x").is_err());
    assert!(Switches::parse_token("-r2").is_err());
}

#[test]
fn test_not_stays_within_letters() {
    let not_a = !Switches::letter('A');
    assert_eq!(not_a.bits(), LETTER_MASK & !1);
    assert_eq!(Switches::NONE.to_string(), "");
}
