use super::Address;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// An IPv4 or IPv6 network prefix: an [`Address`] plus a mask length.
///
/// Invariant: host bits below `prefix_len` are always zero -- `Prefix::new`
/// enforces this at construction time so every other operation (hashing,
/// equality, containment) can assume it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Prefix {
    address: Address,
    prefix_len: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefixParseError {
    MissingSlash,
    InvalidAddress,
    InvalidLength,
    LengthOutOfRange,
}

impl Display for PrefixParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PrefixParseError::MissingSlash => write!(f, "missing '/' in prefix string"),
            PrefixParseError::InvalidAddress => write!(f, "invalid address"),
            PrefixParseError::InvalidLength => write!(f, "invalid mask length"),
            PrefixParseError::LengthOutOfRange => write!(f, "mask length out of range for family"),
        }
    }
}

impl std::error::Error for PrefixParseError {}

impl Prefix {
    /// Constructs a prefix, masking host bits below `prefix_len` to zero.
    /// Panics if `prefix_len` exceeds the address family's width.
    pub fn new(address: Address, prefix_len: u8) -> Prefix {
        assert!(
            prefix_len <= address.family_bits(),
            "prefix length {prefix_len} exceeds family width"
        );
        Prefix {
            address: address.masked(prefix_len),
            prefix_len,
        }
    }

    #[inline]
    pub fn address(&self) -> Address {
        self.address
    }

    #[inline]
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    #[inline]
    pub fn is_ipv4(&self) -> bool {
        self.address.is_ipv4()
    }

    #[inline]
    pub fn is_ipv6(&self) -> bool {
        self.address.is_ipv6()
    }

    /// `self` contains `other` iff same family, `self.len <= other.len`, and
    /// `other`'s address masked to `self.len` equals `self`'s address.
    pub fn contains(&self, other: &Prefix) -> bool {
        if self.address.is_ipv4() != other.address.is_ipv4() {
            return false;
        }
        if self.prefix_len > other.prefix_len {
            return false;
        }
        other.address.masked(self.prefix_len) == self.address
    }
}

impl FromStr for Prefix {
    type Err = PrefixParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr_str, len_str) = s.split_once('/').ok_or(PrefixParseError::MissingSlash)?;
        let address = Address::from_str(addr_str).map_err(|_| PrefixParseError::InvalidAddress)?;
        let prefix_len: u8 = len_str.parse().map_err(|_| PrefixParseError::InvalidLength)?;
        if prefix_len > address.family_bits() {
            return Err(PrefixParseError::LengthOutOfRange);
        }
        Ok(Prefix::new(address, prefix_len))
    }
}

impl Display for Prefix {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}
