//! Strongly-typed identifiers for Stevedore entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a single running unit instance.
///
/// Unit IDs are assigned by the runtime when an instance is created and are
/// never reused; a restarted workload gets a fresh ID. The ordering derives
/// from the underlying UUID bytes and is used as the tie-break when selecting
/// units for termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(Uuid);

impl UnitId {
    /// Create a new random unit ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a unit ID from an existing UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Parse a unit ID from a string (for testing/debugging).
    ///
    /// Returns `None` if the string is not a valid UUID.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for UnitId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit_{}", self.0)
    }
}

/// The kind of a manifest document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ManifestKind {
    /// A replicated workload: the runtime keeps `desired_replicas` units alive.
    Deployment,
    /// A stable virtual address routing to the ready units of a selector.
    Service,
}

// Display is lowercase so identities read as "deployment/web-a" in logs and
// status output, while the YAML wire format keeps the capitalized kind names.
impl fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deployment => write!(f, "deployment"),
            Self::Service => write!(f, "service"),
        }
    }
}

impl std::str::FromStr for ManifestKind {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "deployment" => Ok(Self::Deployment),
            "service" => Ok(Self::Service),
            _ => Err("unknown manifest kind (expected 'deployment' or 'service')"),
        }
    }
}

/// Identity of a manifest document: `(kind, name)`.
///
/// Two manifests with the same identity are versions of the same resource;
/// applying a newer one replaces the older (last-write-wins).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ManifestId {
    /// The manifest kind.
    pub kind: ManifestKind,
    /// The manifest name.
    pub name: String,
}

impl ManifestId {
    /// Create a new manifest identity.
    #[must_use]
    pub fn new(kind: ManifestKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// Shorthand for a deployment identity.
    #[must_use]
    pub fn deployment(name: impl Into<String>) -> Self {
        Self::new(ManifestKind::Deployment, name)
    }

    /// Shorthand for a service identity.
    #[must_use]
    pub fn service(name: impl Into<String>) -> Self {
        Self::new(ManifestKind::Service, name)
    }
}

impl fmt::Display for ManifestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// A stable virtual address assigned to a registered service endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VirtualAddress(String);

impl VirtualAddress {
    /// Create a new virtual address.
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    /// Get the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
