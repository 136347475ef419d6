//! Core type definitions with strong typing and validation

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{LazyLock, Mutex, PoisonError};

use uuid::Uuid;

use crate::{Error, Result};

/// Names handed out by the generators during this run
///
/// Entries are never removed, so a name cannot come back even after its
/// namespace is deflated. The set grows by one short string per generated
/// name for the life of the process.
static ISSUED: LazyLock<Mutex<HashSet<String>>> = LazyLock::new(|| Mutex::new(HashSet::new()));

/// Random characters appended to a generated name (at most)
const SUFFIX_LENGTH: usize = 8;

/// Shortest random suffix a prefix may leave room for
const MIN_SUFFIX_LENGTH: usize = 4;

/// Validate an identifier that ends up in command lines and filesystem paths
fn validate(kind: &str, id: &str, max_length: usize) -> Result<()> {
    if id.is_empty() {
        return Err(Error::precheck(format!("{kind} name cannot be empty")));
    }

    if id.contains('/') || id.contains('.') {
        return Err(Error::precheck(format!(
            "{kind} name {id:?} contains path traversal characters"
        )));
    }

    if id.len() > max_length {
        return Err(Error::precheck(format!(
            "{kind} name too long (max {max_length} chars)"
        )));
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::precheck(format!(
            "{kind} name {id:?} can only contain alphanumeric, dash, and underscore"
        )));
    }

    Ok(())
}

/// Produce a name never issued before in this process
fn unique_name(kind: &str, prefix: &str, max_length: usize) -> Result<String> {
    let room = max_length.saturating_sub(prefix.len());
    if room < MIN_SUFFIX_LENGTH {
        return Err(Error::precheck(format!(
            "{kind} prefix {prefix:?} leaves no room for a unique suffix"
        )));
    }
    let length = room.min(SUFFIX_LENGTH);

    let mut issued = ISSUED.lock().unwrap_or_else(PoisonError::into_inner);
    loop {
        let suffix = Uuid::new_v4().simple().to_string();
        let name = format!("{prefix}{}", &suffix[..length]);
        validate(kind, &name, max_length)?;

        if issued.insert(name.clone()) {
            return Ok(name);
        }
    }
}

/// Network namespace identifier
///
/// The name is the only durable handle to a namespace, so it is validated
/// everywhere it is accepted: no path separators, no dots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(try_from = "String", into = "String")]
pub struct NamespaceName(String);

impl NamespaceName {
    /// Maximum length for namespace names
    pub const MAX_LENGTH: usize = 64;

    /// Default prefix for generated names
    pub const DEFAULT_PREFIX: &'static str = "wgns-";

    /// Create a new `NamespaceName` with validation
    ///
    /// # Errors
    /// Returns a precheck error if the name is empty, too long, or contains
    /// characters outside `[A-Za-z0-9_-]`
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate("Namespace", &name, Self::MAX_LENGTH)?;
        Ok(Self(name))
    }

    /// Generate a name unique within this process
    ///
    /// Every generated name stays reserved until the process exits, which
    /// suits short-lived callers; long-running hosts pay one entry per call.
    ///
    /// # Errors
    /// Returns a precheck error if the prefix is invalid or too long
    pub fn generate(prefix: &str) -> Result<Self> {
        unique_name("Namespace", prefix, Self::MAX_LENGTH).map(Self)
    }

    /// Get the namespace name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NamespaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NamespaceName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for NamespaceName {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<NamespaceName> for String {
    fn from(name: NamespaceName) -> Self {
        name.0
    }
}

impl AsRef<str> for NamespaceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Tunnel interface identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(try_from = "String", into = "String")]
pub struct InterfaceName(String);

impl InterfaceName {
    /// Kernel limit on interface names (`IFNAMSIZ` minus the terminator)
    pub const MAX_LENGTH: usize = 15;

    /// Default prefix for generated names
    pub const DEFAULT_PREFIX: &'static str = "wg-";

    /// Create a new `InterfaceName` with validation
    ///
    /// # Errors
    /// Returns a precheck error if the name is not a valid interface name
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate("Interface", &name, Self::MAX_LENGTH)?;
        Ok(Self(name))
    }

    /// Generate a name unique within this process
    ///
    /// Every generated name stays reserved until the process exits, which
    /// suits short-lived callers; long-running hosts pay one entry per call.
    ///
    /// # Errors
    /// Returns a precheck error if the prefix is invalid or too long
    pub fn generate(prefix: &str) -> Result<Self> {
        unique_name("Interface", prefix, Self::MAX_LENGTH).map(Self)
    }

    /// Get the interface name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InterfaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InterfaceName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for InterfaceName {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<InterfaceName> for String {
    fn from(name: InterfaceName) -> Self {
        name.0
    }
}

impl AsRef<str> for InterfaceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_name_validation() {
        assert!(NamespaceName::new("wgns-1a2b_3c").is_ok());
        assert!(NamespaceName::new("").is_err());
        assert!(NamespaceName::new("a".repeat(65)).is_err());
        assert!(NamespaceName::new("has space").is_err());
        assert!(NamespaceName::new("$(reboot)").is_err());
    }

    #[test]
    fn test_namespace_name_rejects_traversal() {
        for name in ["../etc", "a/b", "/", ".", "..", "x.y"] {
            let err = NamespaceName::new(name).unwrap_err();
            assert!(err.is_precheck(), "{name} should fail the precheck");
        }
    }

    #[test]
    fn test_interface_name_length() {
        assert!(InterfaceName::new("wg-0123456789ab").is_ok());
        assert!(InterfaceName::new("wg-0123456789abc").is_err());
    }

    #[test]
    fn test_generated_names_are_unique() {
        let mut seen = HashSet::new();
        for _ in 0..2000 {
            let name = NamespaceName::generate(NamespaceName::DEFAULT_PREFIX).unwrap();
            assert!(name.as_str().starts_with("wgns-"));
            assert!(seen.insert(name));
        }
    }

    #[test]
    fn test_generated_names_stay_reserved() {
        let name = NamespaceName::generate("wgns-").unwrap();

        let issued = ISSUED.lock().unwrap();
        assert!(issued.contains(name.as_str()));
    }

    #[test]
    fn test_generated_interface_fits_kernel_limit() {
        let name = InterfaceName::generate(InterfaceName::DEFAULT_PREFIX).unwrap();
        assert!(name.as_str().len() <= InterfaceName::MAX_LENGTH);
        assert!(name.as_str().starts_with("wg-"));

        let long = InterfaceName::generate("wgtunnel-");
        assert_eq!(long.unwrap().as_str().len(), 15);

        assert!(InterfaceName::generate("wgtunnel-abcd").is_err());
    }

    #[test]
    fn test_generate_rejects_bad_prefix() {
        assert!(NamespaceName::generate("../").is_err());
    }

    #[test]
    fn test_namespace_name_serde() {
        let name = NamespaceName::new("wgns-test").unwrap();
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"wgns-test\"");
        let deserialized: NamespaceName = serde_json::from_str(&json).unwrap();
        assert_eq!(name, deserialized);

        assert!(serde_json::from_str::<NamespaceName>("\"../x\"").is_err());
    }
}
