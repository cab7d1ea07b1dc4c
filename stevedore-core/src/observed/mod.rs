//! Observed runtime state: lifecycle events, unit snapshots, and the cache.

mod cache;
mod event;

pub use cache::{ObservedStateCache, UpdateOutcome};
pub use event::{LifecycleEvent, UnitPhase};

use crate::types::{ManifestId, UnitId, VirtualAddress};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The last-observed state of one running unit instance.
///
/// Owned by the [`ObservedStateCache`]; everything else reads cloned
/// snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedUnit {
    /// The unit instance ID.
    pub id: UnitId,
    /// Identity of the owning manifest record.
    pub owner: ManifestId,
    /// Current lifecycle phase.
    pub phase: UnitPhase,
    /// Last-observed image reference.
    pub image: String,
    /// Whether the unit currently passes its readiness check.
    pub ready: bool,
    /// Sequence number of the last applied event for this unit.
    pub sequence: u64,
    /// When the cache first observed this unit. Drives oldest-first
    /// termination ordering.
    pub first_observed_at: DateTime<Utc>,
}

impl ObservedUnit {
    /// Whether the unit counts toward the active replica set.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.phase.is_active()
    }

    /// Whether the unit is serving traffic (Running and ready).
    #[must_use]
    pub fn is_serving(&self) -> bool {
        self.phase == UnitPhase::Running && self.ready
    }
}

/// An observed service endpoint registration.
///
/// Recorded by the action executor after a successful register call and
/// cleared on deregister, so the differ can detect membership changes
/// without calling the network fabric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    /// The service name.
    pub service: String,
    /// Selector labels the endpoint routes for.
    pub selector: BTreeMap<String, String>,
    /// The target port on member units.
    pub port: u16,
    /// The stable virtual address assigned by the network fabric.
    pub address: VirtualAddress,
    /// Unit IDs that were serving when the endpoint was last registered.
    pub members: BTreeSet<UnitId>,
}
