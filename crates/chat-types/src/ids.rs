//! Tenant identifier newtype.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of a well-formed tenant identifier.
pub const TENANT_ID_LEN: usize = 24;

/// Identifier validation error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("tenant id must be {TENANT_ID_LEN} characters, got {0}")]
    BadLength(usize),
    #[error("tenant id must be hexadecimal, got {0:?}")]
    NotHex(String),
}

/// A validated tenant (company) identifier: exactly 24 hex characters.
///
/// Stored lowercased so that equality and hashing are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Parse and validate a tenant id.
    pub fn new(raw: &str) -> Result<Self, IdError> {
        let raw = raw.trim();
        if raw.len() != TENANT_ID_LEN {
            return Err(IdError::BadLength(raw.len()));
        }
        if !raw.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(IdError::NotHex(raw.to_string()));
        }
        Ok(Self(raw.to_ascii_lowercase()))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TenantId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}
