//! Strongly-typed identifiers for tenure

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;
use uuid::Uuid;

/// Accepts six hex octets separated by `:` or `-` (mixed separators allowed).
static MAC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})$").expect("MAC pattern is valid")
});

/// Row identifier of a grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GrantId(i64);

impl GrantId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for GrantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Row identifier of an entitlement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntitlementId(i64);

impl EntitlementId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for EntitlementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a single sweep or alert pass, used to correlate log lines
/// and audit events
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rejected credential identifier
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("'{0}' is not a MAC address (expected XX-XX-XX-XX-XX-XX or XX:XX:XX:XX:XX:XX)")]
pub struct FormatError(pub String);

/// A MAC address in canonical form: uppercase hex octets joined by `-`.
///
/// This is the identifier grants are keyed by. The only way to build one is
/// through [`MacAddress::parse`], so holding a value means it passed the
/// structural check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress(String);

impl MacAddress {
    /// Check the raw text against the MAC pattern and normalize it.
    ///
    /// Surrounding whitespace is ignored; `:` separators become `-` and hex
    /// digits are uppercased.
    pub fn parse(raw: &str) -> Result<Self, FormatError> {
        let trimmed = raw.trim();
        if !is_valid_mac(trimmed) {
            return Err(FormatError(raw.to_string()));
        }
        Ok(Self(trimmed.replace(':', "-").to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Structural check only, no normalization
pub fn is_valid_mac(raw: &str) -> bool {
    MAC_PATTERN.is_match(raw)
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for MacAddress {
    type Error = FormatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.0
    }
}

impl std::str::FromStr for MacAddress {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
