//! VLAN identifiers and VLAN rewrite rules.

use crate::TypeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// VLAN identifier as carried in flow endpoints (0-4095).
///
/// Unlike a port VLAN membership, a flow endpoint may be untagged, so 0 is
/// a valid value meaning "no VLAN".
///
/// # Examples
///
/// ```
/// use flow_types::VlanId;
///
/// let vlan = VlanId::new(100).unwrap();
/// assert_eq!(vlan.as_u16(), 100);
/// assert!(VlanId::new(0).unwrap().is_untagged());
/// assert!(VlanId::new(4096).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct VlanId(u16);

impl VlanId {
    /// Maximum VLAN ID accepted on a flow endpoint.
    pub const MAX: u16 = 4095;

    /// Untagged endpoint.
    pub const UNTAGGED: VlanId = VlanId(0);

    /// Creates a new VLAN ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the VLAN ID is outside 0-4095.
    pub fn new(id: i64) -> Result<Self, TypeError> {
        if (0..=i64::from(Self::MAX)).contains(&id) {
            Ok(VlanId(id as u16))
        } else {
            Err(TypeError::InvalidVlanId(id))
        }
    }

    /// Returns the VLAN ID as a u16.
    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    /// Returns true for the untagged value (0).
    pub const fn is_untagged(&self) -> bool {
        self.0 == 0
    }

    /// Validates a raw VLAN value.
    pub fn validate(id: u16) -> Result<(), TypeError> {
        VlanId::new(i64::from(id)).map(|_| ())
    }
}

impl fmt::Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VlanId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id: i64 = s
            .trim()
            .parse()
            .map_err(|_| TypeError::invalid_argument(format!("not a VLAN ID: {:?}", s)))?;
        VlanId::new(id)
    }
}

impl TryFrom<u16> for VlanId {
    type Error = TypeError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        VlanId::new(i64::from(id))
    }
}

impl From<VlanId> for u16 {
    fn from(vlan: VlanId) -> u16 {
        vlan.0
    }
}

/// What a rule does to the VLAN tag on its output side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputVlanType {
    /// Leave the packet as is.
    None,
    /// Push a new tag.
    Push,
    /// Strip the tag.
    Pop,
    /// Rewrite the existing tag.
    Replace,
}

impl OutputVlanType {
    /// Checks the rewrite against the VLAN matched on input.
    ///
    /// An untagged input can only be left alone or tagged; a tagged input
    /// can only be rewritten or stripped.
    pub fn is_valid_for_input(&self, input_vlan: u16) -> bool {
        if input_vlan == 0 {
            matches!(self, OutputVlanType::None | OutputVlanType::Push)
        } else {
            matches!(self, OutputVlanType::Replace | OutputVlanType::Pop)
        }
    }

    /// Checks the rewrite against the VLAN emitted on output.
    pub fn is_valid_for_output(&self, output_vlan: u16) -> bool {
        if output_vlan == 0 {
            matches!(self, OutputVlanType::None | OutputVlanType::Pop)
        } else {
            matches!(self, OutputVlanType::Push | OutputVlanType::Replace)
        }
    }

    /// Rewrite needed to turn `input_vlan` into `output_vlan` on one switch.
    pub const fn between(input_vlan: u16, output_vlan: u16) -> Self {
        match (input_vlan, output_vlan) {
            (0, 0) => OutputVlanType::None,
            (0, _) => OutputVlanType::Push,
            (_, 0) => OutputVlanType::Pop,
            _ => OutputVlanType::Replace,
        }
    }
}

impl fmt::Display for OutputVlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutputVlanType::None => "NONE",
            OutputVlanType::Push => "PUSH",
            OutputVlanType::Pop => "POP",
            OutputVlanType::Replace => "REPLACE",
        };
        write!(f, "{}", s)
    }
}
