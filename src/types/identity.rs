//! Opaque identity key naming a client session server-side.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A wallet/account address. One live connection per identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Wrap an address.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// The underlying address.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Identity {
    fn from(address: &str) -> Self {
        Self(address.to_owned())
    }
}

impl From<String> for Identity {
    fn from(address: String) -> Self {
        Self(address)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Identity {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
