//! Addresses as the simulator control program sees them.
//!
//! The DPS8M forms 24-bit absolute addresses.  Breakpoints, the
//! test-bench machine and the command line all use [`Address`], and
//! (following the convention of the Honeywell documentation) addresses
//! are written and parsed in octal.
use std::error::Error;
use std::fmt::{self, Debug, Display, Formatter, Octal};
use std::str::FromStr;

#[cfg(test)]
use test_strategy::Arbitrary;

/// Number of significant bits in an [`Address`].
pub const ADDRESS_BITS: u32 = 24;

/// A 24-bit absolute address.
#[cfg_attr(test, derive(Arbitrary))]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(#[cfg_attr(test, strategy(0..=Address::MAX.0))] u32);

impl Address {
    pub const ZERO: Address = Address(0);
    pub const MAX: Address = Address((1 << ADDRESS_BITS) - 1);

    /// Form an address from the bottom 24 bits of `value`.
    #[must_use]
    pub const fn new(value: u32) -> Address {
        Address(value & Address::MAX.0)
    }

    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// The following address, wrapping from [`Address::MAX`] to zero.
    #[must_use]
    pub const fn successor(&self) -> Address {
        Address::new(self.0.wrapping_add(1))
    }

    /// `self + delta`, or `None` when the result would not fit in 24
    /// bits.
    #[must_use]
    pub fn checked_add(&self, delta: u32) -> Option<Address> {
        match self.0.checked_add(delta) {
            Some(n) if n <= Address::MAX.0 => Some(Address(n)),
            _ => None,
        }
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:o})", self.0)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Octal::fmt(&self.0, f)
    }
}

impl Octal for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Octal::fmt(&self.0, f)
    }
}

impl From<Address> for u32 {
    fn from(a: Address) -> u32 {
        a.0
    }
}

impl From<Address> for usize {
    fn from(a: Address) -> usize {
        a.0 as usize
    }
}

impl TryFrom<u32> for Address {
    type Error = AddressOutOfRange;
    fn try_from(n: u32) -> Result<Address, AddressOutOfRange> {
        if n > Address::MAX.0 {
            Err(AddressOutOfRange(u64::from(n)))
        } else {
            Ok(Address(n))
        }
    }
}

impl TryFrom<usize> for Address {
    type Error = AddressOutOfRange;
    fn try_from(n: usize) -> Result<Address, AddressOutOfRange> {
        match u32::try_from(n) {
            Ok(n) => Address::try_from(n),
            Err(_) => Err(AddressOutOfRange(n as u64)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressOutOfRange(pub u64);

impl Display for AddressOutOfRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "address {:o} does not fit in {ADDRESS_BITS} bits", self.0)
    }
}

impl Error for AddressOutOfRange {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressParseError {
    Empty,
    NotOctal(String),
    OutOfRange(AddressOutOfRange),
}

impl Display for AddressParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AddressParseError::Empty => f.write_str("missing address"),
            AddressParseError::NotOctal(s) => write!(f, "'{s}' is not an octal address"),
            AddressParseError::OutOfRange(e) => Display::fmt(e, f),
        }
    }
}

impl Error for AddressParseError {}

impl FromStr for Address {
    type Err = AddressParseError;

    /// Parse an octal address.
    fn from_str(s: &str) -> Result<Address, AddressParseError> {
        if s.is_empty() {
            return Err(AddressParseError::Empty);
        }
        match u64::from_str_radix(s, 8) {
            Ok(n) if n <= u64::from(Address::MAX.0) => Ok(Address(n as u32)),
            Ok(n) => Err(AddressParseError::OutOfRange(AddressOutOfRange(n))),
            Err(_) => Err(AddressParseError::NotOctal(s.to_string())),
        }
    }
}

#[test]
fn test_address_parse() {
    assert_eq!("100".parse::<Address>(), Ok(Address::new(0o100)));
    assert_eq!("77777777".parse::<Address>(), Ok(Address::MAX));
    assert!(matches!(
        "100000000".parse::<Address>(),
        Err(AddressParseError::OutOfRange(_))
    ));
    assert!(matches!(
        "19".parse::<Address>(),
        Err(AddressParseError::NotOctal(_))
    ));
    assert_eq!("".parse::<Address>(), Err(AddressParseError::Empty));
}

#[test]
fn test_address_display() {
    assert_eq!(Address::new(0o1234).to_string(), "1234");
    assert_eq!(format!("{:>08o}", Address::new(0o17)), "00000017");
}

#[test]
fn test_address_wraps() {
    assert_eq!(Address::MAX.successor(), Address::ZERO);
    assert_eq!(Address::new(0o7).successor(), Address::new(0o10));
    assert_eq!(Address::MAX.checked_add(1), None);
    assert_eq!(Address::ZERO.checked_add(5), Some(Address::new(5)));
}

#[cfg(test)]
#[test_strategy::proptest]
fn address_display_parse_round_trip(addr: Address) {
    assert_eq!(addr.to_string().parse::<Address>(), Ok(addr));
}
