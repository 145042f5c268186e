//! Flow cookie codec.
//!
//! A cookie is the 64-bit identifier written into every switch rule that
//! belongs to a flow. The low 32 bits hold the *flagless* cookie shared by
//! the forward and reverse halves of a flow; the high bits carry flags.
//!
//! Two flag layouts are understood:
//!
//! ```text
//! new-style (any of bits 63..61 set)     legacy (bits 63..61 clear)
//!   bit 63  default/service rule           bit 55 clear  forward
//!   bit 62  forward                        bit 55 set    reverse
//!   bit 61  reverse
//! ```
//!
//! [`Cookie::encode`] always produces the new-style layout.

use crate::TypeError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of one half of a bidirectional flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    /// Returns the other direction.
    pub const fn opposite(&self) -> Direction {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => write!(f, "forward"),
            Direction::Reverse => write!(f, "reverse"),
        }
    }
}

/// 64-bit switch rule cookie.
///
/// # Examples
///
/// ```
/// use flow_types::{Cookie, Direction};
///
/// let cookie = Cookie::encode(42, Direction::Reverse);
/// assert_eq!(cookie.decode().unwrap(), (42, Direction::Reverse));
/// assert!(cookie.is_reverse().unwrap());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cookie(u64);

impl Cookie {
    /// Mask selecting the new-style flag bits.
    pub const FLAGS_MASK: u64 = 0xE000_0000_0000_0000;

    /// Marks switch default (service) rules.
    pub const DEFAULT_RULE_FLAG: u64 = 0x8000_0000_0000_0000;

    /// New-style forward flag.
    pub const FORWARD_FLAG: u64 = 0x4000_0000_0000_0000;

    /// New-style reverse flag.
    pub const REVERSE_FLAG: u64 = 0x2000_0000_0000_0000;

    /// Legacy reverse flag (forward when clear).
    pub const LEGACY_REVERSE_FLAG: u64 = 0x0080_0000_0000_0000;

    /// Mask selecting the flagless part.
    pub const FLAGLESS_MASK: u64 = 0x0000_0000_FFFF_FFFF;

    /// Wraps a raw cookie value without interpreting it.
    pub const fn new(raw: u64) -> Self {
        Cookie(raw)
    }

    /// Builds a new-style cookie for one direction of a flow.
    pub const fn encode(flagless: u32, direction: Direction) -> Self {
        let flag = match direction {
            Direction::Forward => Self::FORWARD_FLAG,
            Direction::Reverse => Self::REVERSE_FLAG,
        };
        Cookie(flag | flagless as u64)
    }

    /// Splits the cookie into its flagless part and direction.
    ///
    /// # Errors
    ///
    /// Returns [`TypeError::InvalidCookie`] if the cookie is marked as both
    /// forward and reverse.
    pub fn decode(&self) -> Result<(u32, Direction), TypeError> {
        Ok((self.flagless(), self.direction()?))
    }

    /// Returns the raw 64-bit value.
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Returns the low 32 bits shared by both halves of a flow.
    pub const fn flagless(&self) -> u32 {
        (self.0 & Self::FLAGLESS_MASK) as u32
    }

    /// Returns the direction encoded in the cookie flags.
    pub fn direction(&self) -> Result<Direction, TypeError> {
        let forward = self.marked_forward();
        let reverse = self.marked_reverse();
        if forward && reverse {
            return Err(TypeError::InvalidCookie(self.0));
        }
        Ok(if forward {
            Direction::Forward
        } else {
            Direction::Reverse
        })
    }

    /// Returns true if the cookie belongs to a forward flow.
    pub fn is_forward(&self) -> Result<bool, TypeError> {
        Ok(self.direction()? == Direction::Forward)
    }

    /// Returns true if the cookie belongs to a reverse flow.
    pub fn is_reverse(&self) -> Result<bool, TypeError> {
        Ok(self.direction()? == Direction::Reverse)
    }

    /// Returns true for switch default rules, which never belong to a flow.
    pub const fn is_default_rule(&self) -> bool {
        self.0 & Self::DEFAULT_RULE_FLAG != 0
    }

    const fn is_new_style(&self) -> bool {
        self.0 & Self::FLAGS_MASK != 0
    }

    const fn marked_forward(&self) -> bool {
        if self.is_new_style() {
            self.0 & Self::FORWARD_FLAG != 0
        } else {
            self.0 & Self::LEGACY_REVERSE_FLAG == 0
        }
    }

    const fn marked_reverse(&self) -> bool {
        if self.is_new_style() {
            self.0 & Self::REVERSE_FLAG != 0
        } else {
            self.0 & Self::LEGACY_REVERSE_FLAG != 0
        }
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

impl From<u64> for Cookie {
    fn from(raw: u64) -> Self {
        Cookie(raw)
    }
}

impl From<Cookie> for u64 {
    fn from(cookie: Cookie) -> u64 {
        cookie.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_encode_decode_roundtrip() {
        for flagless in [0u32, 1, 42, 0x7FFF_FFFF, u32::MAX] {
            for direction in [Direction::Forward, Direction::Reverse] {
                let cookie = Cookie::encode(flagless, direction);
                assert_eq!(cookie.decode().unwrap(), (flagless, direction));
            }
        }
    }

    #[test]
    fn test_new_style_flags() {
        let forward = Cookie::new(0x4000_0000_0000_0001);
        assert!(forward.is_forward().unwrap());
        assert!(!forward.is_reverse().unwrap());

        let reverse = Cookie::new(0x2000_0000_0000_0001);
        assert!(reverse.is_reverse().unwrap());
        assert_eq!(forward.flagless(), reverse.flagless());
    }

    #[test]
    fn test_legacy_flags() {
        let forward = Cookie::new(0x0000_0000_0000_0007);
        assert_eq!(forward.direction().unwrap(), Direction::Forward);

        let reverse = Cookie::new(0x0080_0000_0000_0007);
        assert_eq!(reverse.direction().unwrap(), Direction::Reverse);
        assert_eq!(reverse.flagless(), 7);
    }

    #[test]
    fn test_both_flags_rejected() {
        let both = Cookie::new(Cookie::FORWARD_FLAG | Cookie::REVERSE_FLAG | 5);
        assert_eq!(both.decode(), Err(TypeError::InvalidCookie(both.value())));
        assert!(both.is_forward().is_err());
        assert!(both.is_reverse().is_err());

        let with_legacy = Cookie::new(both.value() | Cookie::LEGACY_REVERSE_FLAG);
        assert!(with_legacy.decode().is_err());

        let service = Cookie::new(Cookie::FLAGS_MASK | 5);
        assert!(service.decode().is_err());
    }

    #[test]
    fn test_legacy_bit_ignored_under_new_style() {
        // The legacy reverse bit is not a flag once any top bit is set.
        let cookie = Cookie::new(Cookie::FORWARD_FLAG | Cookie::LEGACY_REVERSE_FLAG | 9);
        assert_eq!(cookie.direction().unwrap(), Direction::Forward);
    }

    #[test]
    fn test_default_rule_flag() {
        assert!(Cookie::new(0x8000_0000_0000_0001).is_default_rule());
        assert!(!Cookie::encode(1, Direction::Forward).is_default_rule());
    }

    #[test]
    fn test_display_and_serde() {
        let cookie = Cookie::encode(1, Direction::Forward);
        assert_eq!(cookie.to_string(), "0x4000000000000001");
        assert_eq!(serde_json::to_string(&cookie).unwrap(), "4611686018427387905");
    }
}
