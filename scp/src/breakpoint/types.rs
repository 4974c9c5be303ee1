//! Breakpoint types.
//!
//! The low 26 bits of [`BreakTypes`] are the user-visible types, one
//! per letter (`E` for execution, `R` for read and so on; bit 0 is
//! `A`).  Above those are the dynamic step-over and user types and
//! the temporary flag.  When testing for a breakpoint, the top three
//! bits select one of eight debounce spaces.
use std::fmt::{self, Debug, Display, Formatter};
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

use base::prelude::*;

/// Number of distinct debounce spaces.
pub const SPACES: usize = 8;

const SPACE_SHIFT: u32 = 29;
const TYPE_MASK: u32 = (1 << SPACE_SHIFT) - 1;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BreakTypes(u32);

impl BreakTypes {
    pub const NONE: BreakTypes = BreakTypes(0);
    /// Planted by `NEXT` to step over subroutine calls.
    pub const STEP_OVER: BreakTypes = BreakTypes(1 << 26);
    /// Planted on behalf of the machine rather than the user.
    pub const USER: BreakTypes = BreakTypes(1 << 27);
    pub const DYNAMIC: BreakTypes = BreakTypes((1 << 26) | (1 << 27));
    /// One-shot; deleted when it fires.
    pub const TEMP: BreakTypes = BreakTypes(1 << 28);

    /// The type for the letter `c`.
    ///
    /// # Panics
    ///
    /// Panics when `c` is not an ASCII letter.
    #[must_use]
    pub const fn letter(c: char) -> BreakTypes {
        BreakTypes(Switches::letter(c).bits())
    }

    #[must_use]
    pub const fn from_switches(sw: Switches) -> BreakTypes {
        BreakTypes(sw.bits())
    }

    /// The letter types, without the dynamic and temporary bits.
    #[must_use]
    pub const fn letters(&self) -> Switches {
        Switches::from_bits(self.0)
    }

    #[must_use]
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// These types, tested in debounce space `space` (modulo
    /// [`SPACES`]).
    #[must_use]
    pub const fn in_space(self, space: usize) -> BreakTypes {
        BreakTypes((self.0 & TYPE_MASK) | (((space % SPACES) as u32) << SPACE_SHIFT))
    }

    #[must_use]
    pub const fn space(&self) -> usize {
        (self.0 >> SPACE_SHIFT) as usize
    }

    #[must_use]
    pub const fn without_space(self) -> BreakTypes {
        BreakTypes(self.0 & TYPE_MASK)
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0 & TYPE_MASK == 0
    }

    #[must_use]
    pub const fn contains(&self, other: BreakTypes) -> bool {
        self.0 & other.0 & TYPE_MASK == other.0 & TYPE_MASK
    }

    #[must_use]
    pub const fn intersects(&self, other: BreakTypes) -> bool {
        self.0 & other.0 & TYPE_MASK != 0
    }
}

impl From<Switches> for BreakTypes {
    fn from(sw: Switches) -> BreakTypes {
        BreakTypes::from_switches(sw)
    }
}

impl BitOr for BreakTypes {
    type Output = BreakTypes;
    fn bitor(self, rhs: BreakTypes) -> BreakTypes {
        BreakTypes(self.0 | rhs.0)
    }
}

impl BitOrAssign for BreakTypes {
    fn bitor_assign(&mut self, rhs: BreakTypes) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for BreakTypes {
    type Output = BreakTypes;
    fn bitand(self, rhs: BreakTypes) -> BreakTypes {
        BreakTypes(self.0 & rhs.0)
    }
}

impl Not for BreakTypes {
    type Output = BreakTypes;
    fn not(self) -> BreakTypes {
        BreakTypes(!self.0 & TYPE_MASK)
    }
}

/// Shows the letters, followed by a marker for each dynamic or
/// temporary bit, for example `E+TEMP`.
impl Display for BreakTypes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for c in self.letters().letters() {
            write!(f, "{c}")?;
        }
        for (flag, name) in [
            (BreakTypes::STEP_OVER, "+STEP"),
            (BreakTypes::USER, "+USER"),
            (BreakTypes::TEMP, "+TEMP"),
        ] {
            if self.intersects(flag) {
                f.write_str(name)?;
            }
        }
        Ok(())
    }
}

impl Debug for BreakTypes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "BreakTypes({self}, space {})", self.space())
    }
}

/// A breakpoint type supported by the machine, with the description
/// used when reporting that a breakpoint of this type was hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakTypeDesc {
    pub letter: char,
    pub description: &'static str,
}

/// The breakpoint types a machine supports, and the default type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakTypeTable {
    entries: Vec<BreakTypeDesc>,
    default: BreakTypes,
}

impl BreakTypeTable {
    /// # Panics
    ///
    /// Panics if any letter (or the default) is not an ASCII letter.
    #[must_use]
    pub fn new(default: char, entries: &[(char, &'static str)]) -> BreakTypeTable {
        BreakTypeTable {
            entries: entries
                .iter()
                .map(|(letter, description)| BreakTypeDesc {
                    letter: letter.to_ascii_uppercase(),
                    description: *description,
                })
                .collect(),
            default: BreakTypes::letter(default),
        }
    }

    #[must_use]
    pub fn default_types(&self) -> BreakTypes {
        self.default
    }

    /// All the supported letter types (the default is always
    /// supported).
    #[must_use]
    pub fn supported(&self) -> BreakTypes {
        self.entries
            .iter()
            .fold(self.default, |acc, e| acc | BreakTypes::letter(e.letter))
    }

    /// The description of a single letter type.
    #[must_use]
    pub fn describe(&self, types: BreakTypes) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|e| types.letters() == Switches::letter(e.letter))
            .map(|e| e.description)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BreakTypeDesc> {
        self.entries.iter()
    }
}

impl Default for BreakTypeTable {
    /// Machines which say nothing else support only execution
    /// breakpoints.
    fn default() -> BreakTypeTable {
        BreakTypeTable::new('E', &[('E', "Execution")])
    }
}

#[test]
fn test_space_encoding() {
    let e = BreakTypes::letter('E');
    let spaced = e.in_space(3);
    assert_eq!(spaced.space(), 3);
    assert_eq!(spaced.without_space(), e);
    assert!(spaced.intersects(e));
    assert_eq!(e.in_space(SPACES + 1).space(), 1);
    assert_eq!(e.space(), 0);
}

#[test]
fn test_letters_exclude_dynamic() {
    let t = BreakTypes::letter('E') | BreakTypes::STEP_OVER | BreakTypes::TEMP;
    assert_eq!(t.letters(), Switches::letter('E'));
    assert_eq!(t.to_string(), "E+STEP+TEMP");
    assert!(!(!BreakTypes::TEMP).intersects(BreakTypes::TEMP));
}

#[test]
fn test_type_table() {
    let table = BreakTypeTable::new('E', &[('e', "Execution"), ('R', "Read")]);
    assert_eq!(table.default_types(), BreakTypes::letter('E'));
    assert_eq!(
        table.supported(),
        BreakTypes::letter('E') | BreakTypes::letter('R')
    );
    assert_eq!(table.describe(BreakTypes::letter('R')), Some("Read"));
    assert_eq!(
        table.describe(BreakTypes::letter('R') | BreakTypes::TEMP),
        Some("Read")
    );
    assert_eq!(
        table.describe(BreakTypes::letter('R') | BreakTypes::letter('E')),
        None
    );
}
