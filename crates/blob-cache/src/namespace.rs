//! Namespace validation

use crate::error::{CacheError, Result};
use std::fmt;

/// Longest namespace accepted; namespaces become directory names.
pub const MAX_NAMESPACE_LEN: usize = 128;

/// A namespace that has passed validation.
///
/// Only `[A-Za-z0-9_-]` is allowed, so a `Namespace` can be joined onto a
/// filesystem path without escaping its parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace(String);

impl Namespace {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() || raw.len() > MAX_NAMESPACE_LEN {
            return Err(CacheError::InvalidNamespace(raw.to_string()));
        }
        let valid = raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if !valid {
            return Err(CacheError::InvalidNamespace(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Namespace {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
