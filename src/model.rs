//! Types shared by every component

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Encryption context: authenticated, non-secret key/value pairs bound to a ciphertext
///
/// A `BTreeMap` keeps the pairs sorted, which makes the serialized form canonical.
pub type EncryptionContext = BTreeMap<String, String>;

/// Opaque identity of a caller, supplied by the transport layer
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    /// Creates a Principal from its identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Principal {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for Principal {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Serializes an encryption context into the bytes authenticated alongside a ciphertext
pub(crate) fn canonical_context(context: &EncryptionContext) -> Result<Vec<u8>> {
    serde_json::to_vec(context)
        .map_err(|e| Error::Internal(format!("failed to encode encryption context: {}", e)))
}
