//! 64-bit identifiers rendered as 16-character base-16 strings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier for organizations, users, tasks, and runs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid id {0:?}: expected 16 base-16 characters")]
pub struct IdError(String);

impl Id {
    /// Parse an id from its 16-character base-16 form.
    pub fn from_base16(s: &str) -> Result<Self, IdError> {
        if s.len() != 16 {
            return Err(IdError(s.to_string()));
        }
        u64::from_str_radix(s, 16)
            .map(Id)
            .map_err(|_| IdError(s.to_string()))
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({:016x})", self.0)
    }
}

impl FromStr for Id {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Id::from_base16(s)
    }
}

impl From<u64> for Id {
    fn from(value: u64) -> Self {
        Id(value)
    }
}
