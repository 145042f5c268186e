//! Switch datapath identifiers.

use crate::TypeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Datapath identifier of a switch (e.g. `00:00:00:00:00:00:00:01` or `SW1`).
///
/// The identifier is normalized to lowercase so that the same switch
/// reported by different components compares equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SwitchId(String);

impl SwitchId {
    /// Creates a switch id.
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier is empty or contains whitespace.
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into();
        if id.is_empty() || id.chars().any(char::is_whitespace) {
            return Err(TypeError::InvalidSwitchId(id));
        }
        Ok(SwitchId(id.to_ascii_lowercase()))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SwitchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SwitchId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SwitchId::new(s)
    }
}

impl TryFrom<String> for SwitchId {
    type Error = TypeError;

    fn try_from(id: String) -> Result<Self, Self::Error> {
        SwitchId::new(id)
    }
}

impl From<SwitchId> for String {
    fn from(id: SwitchId) -> String {
        id.0
    }
}
