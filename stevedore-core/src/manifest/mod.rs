//! Desired-state manifest documents.
//!
//! A [`ManifestRecord`] is the decoded, validated form of one declarative
//! document: either a `Deployment` (a replicated workload) or a `Service`
//! (a stable virtual address over a label selector). Records are immutable
//! once stored; a newer apply of the same identity replaces the older one
//! wholesale.
//!
//! Wire format (YAML, one or more documents per file):
//!
//! ```yaml
//! kind: Deployment
//! name: web-a
//! desiredReplicas: 2
//! image: registry.local/web-a:v1
//! ports: [8080]
//! selectorLabels:
//!   app: web-a
//! env:
//!   LOG_LEVEL: info
//! updatePolicy: RollingUpdate
//! ---
//! kind: Service
//! name: web-a
//! ports: [8080]
//! selectorLabels:
//!   app: web-a
//! ```

mod source;

pub use source::{load_path, parse_manifests};

use crate::error::{Result, StevedoreError};
use crate::types::{ManifestId, ManifestKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum replica count accepted at validation time.
const MAX_REPLICAS: u32 = 1024;

/// Maximum length of a manifest name (DNS label).
const MAX_NAME_LEN: usize = 63;

/// How image changes are rolled out to existing units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdatePolicy {
    /// Update the image of running units in place, preserving unit identity.
    #[default]
    RollingUpdate,
    /// Terminate outdated units and create replacements.
    Replace,
}

/// A validated desired-state document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRecord {
    /// The manifest kind.
    pub kind: ManifestKind,
    /// The manifest name. Unique per kind.
    pub name: String,
    /// Number of unit replicas to keep alive. Ignored for services.
    #[serde(default = "default_replicas", rename = "desiredReplicas")]
    pub desired_replicas: u32,
    /// Container image reference. Required for deployments.
    #[serde(default)]
    pub image: String,
    /// Exposed ports. A service routes to the first entry.
    #[serde(default)]
    pub ports: Vec<u16>,
    /// Selector labels. A deployment's units carry these labels; a service
    /// routes to units whose labels contain its selector.
    #[serde(default, rename = "selectorLabels")]
    pub selector_labels: BTreeMap<String, String>,
    /// Environment variables for the units.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Rollout policy for image changes.
    #[serde(default, rename = "updatePolicy")]
    pub update_policy: UpdatePolicy,
}

fn default_replicas() -> u32 {
    1
}

impl ManifestRecord {
    /// The identity of this record.
    #[must_use]
    pub fn id(&self) -> ManifestId {
        ManifestId::new(self.kind, self.name.clone())
    }

    /// The port a service routes to.
    ///
    /// Validation guarantees services carry at least one port.
    #[must_use]
    pub fn target_port(&self) -> Option<u16> {
        self.ports.first().copied()
    }

    /// Check whether this record's selector is satisfied by the given label
    /// set (every selector entry present with the same value).
    #[must_use]
    pub fn selects(&self, labels: &BTreeMap<String, String>) -> bool {
        self.selector_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }

    /// Validate the record.
    ///
    /// Called by the store at apply time; an invalid record is never stored.
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name).map_err(|cause| self.invalid(cause))?;

        if self.selector_labels.is_empty() {
            return Err(self.invalid("selectorLabels must not be empty".into()));
        }
        for (key, value) in &self.selector_labels {
            if key.is_empty() || value.is_empty() {
                return Err(self.invalid("selector label keys and values must not be empty".into()));
            }
        }
        for key in self.env.keys() {
            if key.is_empty() {
                return Err(self.invalid("env keys must not be empty".into()));
            }
        }
        if self.ports.iter().any(|p| *p == 0) {
            return Err(self.invalid("port 0 is not valid".into()));
        }

        match self.kind {
            ManifestKind::Deployment => {
                if self.desired_replicas > MAX_REPLICAS {
                    return Err(self.invalid(format!(
                        "desiredReplicas {} exceeds the maximum of {}",
                        self.desired_replicas, MAX_REPLICAS
                    )));
                }
                validate_image_ref(&self.image).map_err(|cause| self.invalid(cause))?;
            }
            ManifestKind::Service => {
                if self.ports.is_empty() {
                    return Err(self.invalid("a service requires at least one port".into()));
                }
            }
        }

        Ok(())
    }

    fn invalid(&self, cause: String) -> StevedoreError {
        StevedoreError::ManifestInvalid {
            name: self.name.clone(),
            cause,
        }
    }
}

/// Validate a manifest name as a DNS label: lowercase alphanumerics and
/// dashes, starting and ending alphanumeric, at most 63 characters.
fn validate_name(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err("name must not be empty".into());
    }
    if name.len() > MAX_NAME_LEN {
        return Err(format!(
            "name exceeds {} characters ({})",
            MAX_NAME_LEN,
            name.len()
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err("name may only contain lowercase alphanumerics and '-'".into());
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err("name must start and end with an alphanumeric character".into());
    }
    Ok(())
}

/// Validate an image reference: `repository[:tag]` with an optional registry
/// prefix. Rejects whitespace, empty segments, and trailing separators.
fn validate_image_ref(image: &str) -> std::result::Result<(), String> {
    if image.is_empty() {
        return Err("a deployment requires an image reference".into());
    }
    if image.chars().any(char::is_whitespace) {
        return Err("image reference must not contain whitespace".into());
    }
    if !image.chars().all(|c| {
        c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '/' | ':' | '@')
    }) {
        return Err(format!("image reference '{}' contains invalid characters", image));
    }
    if image.starts_with(':') || image.ends_with(':') || image.ends_with('/') {
        return Err(format!("image reference '{}' is malformed", image));
    }
    // At most one tag separator after the last path segment.
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    if last_segment.matches(':').count() > 1 {
        return Err(format!("image reference '{}' has multiple tags", image));
    }
    Ok(())
}
