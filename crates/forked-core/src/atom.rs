//! Scalar values stored in dynamically described aggregates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A totally ordered, hashable scalar.
///
/// Atoms are the element type of registers, sets and sequences inside an
/// [`Aggregate`](crate::Aggregate). Floating point numbers are deliberately
/// absent: they have no total order and cannot be set members.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Atom {
    /// Absent value
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// Signed 64-bit integer
    Int(i64),
    /// UTF-8 string
    Str(String),
}

impl Atom {
    /// Returns `true` for [`Atom::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Atom::Null)
    }

    /// Borrow the string payload, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Atom::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The integer payload, if any.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Atom::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Null => write!(f, "null"),
            Atom::Bool(b) => write!(f, "{b}"),
            Atom::Int(n) => write!(f, "{n}"),
            Atom::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<bool> for Atom {
    fn from(value: bool) -> Self {
        Atom::Bool(value)
    }
}

impl From<i64> for Atom {
    fn from(value: i64) -> Self {
        Atom::Int(value)
    }
}

impl From<i32> for Atom {
    fn from(value: i32) -> Self {
        Atom::Int(i64::from(value))
    }
}

impl From<&str> for Atom {
    fn from(value: &str) -> Self {
        Atom::Str(value.to_string())
    }
}

impl From<String> for Atom {
    fn from(value: String) -> Self {
        Atom::Str(value)
    }
}

impl From<&Atom> for serde_json::Value {
    fn from(atom: &Atom) -> Self {
        match atom {
            Atom::Null => serde_json::Value::Null,
            Atom::Bool(b) => serde_json::Value::Bool(*b),
            Atom::Int(n) => serde_json::Value::from(*n),
            Atom::Str(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl TryFrom<serde_json::Value> for Atom {
    type Error = AtomError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::Null => Ok(Atom::Null),
            serde_json::Value::Bool(b) => Ok(Atom::Bool(b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Atom::Int)
                .ok_or_else(|| AtomError::NonIntegral(n.to_string())),
            serde_json::Value::String(s) => Ok(Atom::Str(s)),
            other @ (serde_json::Value::Array(_) | serde_json::Value::Object(_)) => {
                Err(AtomError::NotScalar(other.to_string()))
            }
        }
    }
}

/// Errors converting external values into atoms.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AtomError {
    /// Number that does not fit a signed 64-bit integer
    #[error("not a 64-bit integer: {0}")]
    NonIntegral(String),
    /// Arrays and objects cannot be atoms
    #[error("not a scalar value: {0}")]
    NotScalar(String),
}
