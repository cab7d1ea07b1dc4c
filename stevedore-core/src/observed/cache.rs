//! The observed-state cache: a continuously updated snapshot of what is
//! actually running.
//!
//! Updates arrive asynchronously from the runtime's watch stream and may
//! interleave with any diff read, so the cache exposes only atomic
//! operations: `update` applies one event under the write lock, `snapshot`
//! clones the matching units under the read lock. A snapshot is consistent
//! as of the call; it is never a live view.
//!
//! Out-of-order delivery is handled with per-unit sequence numbers: an event
//! whose sequence is at or below the stored one is dropped and logged at
//! debug level only. Terminated units are removed and tombstoned so a late
//! stale event cannot resurrect them.

use super::event::{LifecycleEvent, UnitPhase};
use super::{ObservedUnit, ServiceEndpoint};
use crate::error::StevedoreError;
use crate::types::{ManifestId, UnitId};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Outcome of applying one lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The event was applied and the unit upserted.
    Applied,
    /// The event was stale or duplicated and dropped.
    Stale,
    /// The event was terminal; the unit was removed and tombstoned.
    Removed,
}

/// Shared cache of observed units and endpoint registrations.
pub struct ObservedStateCache {
    units: RwLock<HashMap<UnitId, ObservedUnit>>,
    /// Last sequence number seen for units that have been terminated.
    tombstones: RwLock<HashMap<UnitId, u64>>,
    endpoints: RwLock<HashMap<String, ServiceEndpoint>>,
}

impl ObservedStateCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            units: RwLock::new(HashMap::new()),
            tombstones: RwLock::new(HashMap::new()),
            endpoints: RwLock::new(HashMap::new()),
        }
    }

    /// Ingest one lifecycle event.
    ///
    /// Never fails: stale events are a normal consequence of watch-stream
    /// reordering and are dropped, not errored.
    pub fn update(&self, event: LifecycleEvent) -> UpdateOutcome {
        if let Some(&last) = self.tombstones.read().get(&event.unit_id) {
            tracing::debug!(
                unit = %event.unit_id,
                sequence = event.sequence,
                tombstone = last,
                "Dropping event for terminated unit"
            );
            return UpdateOutcome::Stale;
        }

        let mut units = self.units.write();
        if let Some(existing) = units.get(&event.unit_id) {
            if event.sequence <= existing.sequence {
                let stale = StevedoreError::StaleEvent {
                    unit_id: event.unit_id,
                    stored: existing.sequence,
                    received: event.sequence,
                };
                tracing::debug!(code = stale.code(), "{}", stale);
                return UpdateOutcome::Stale;
            }
        }

        if event.phase == UnitPhase::Terminated {
            units.remove(&event.unit_id);
            drop(units);
            self.tombstones.write().insert(event.unit_id, event.sequence);
            tracing::debug!(unit = %event.unit_id, owner = %event.owner, "Unit terminated");
            return UpdateOutcome::Removed;
        }

        let first_observed_at = units
            .get(&event.unit_id)
            .map(|u| u.first_observed_at)
            .unwrap_or_else(Utc::now);

        units.insert(
            event.unit_id,
            ObservedUnit {
                id: event.unit_id,
                owner: event.owner,
                phase: event.phase,
                image: event.image,
                ready: event.ready,
                sequence: event.sequence,
                first_observed_at,
            },
        );
        UpdateOutcome::Applied
    }

    /// Snapshot the units owned by one manifest identity.
    ///
    /// Sorted oldest-first with unit-ID ascending tie-break, which is the
    /// order the differ selects terminations in.
    #[must_use]
    pub fn snapshot(&self, owner: &ManifestId) -> Vec<ObservedUnit> {
        let mut units: Vec<_> = self
            .units
            .read()
            .values()
            .filter(|u| u.owner == *owner)
            .cloned()
            .collect();
        units.sort_by(|a, b| {
            a.first_observed_at
                .cmp(&b.first_observed_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        units
    }

    /// Distinct owner identities that currently have units in the cache.
    #[must_use]
    pub fn owners(&self) -> Vec<ManifestId> {
        let mut owners: Vec<_> = self
            .units
            .read()
            .values()
            .map(|u| u.owner.clone())
            .collect();
        owners.sort();
        owners.dedup();
        owners
    }

    /// Record a successful endpoint registration.
    pub fn record_endpoint(&self, endpoint: ServiceEndpoint) {
        self.endpoints
            .write()
            .insert(endpoint.service.clone(), endpoint);
    }

    /// Clear the endpoint for a service. Returns the removed registration.
    pub fn clear_endpoint(&self, service: &str) -> Option<ServiceEndpoint> {
        self.endpoints.write().remove(service)
    }

    /// Get the observed endpoint for a service.
    #[must_use]
    pub fn endpoint(&self, service: &str) -> Option<ServiceEndpoint> {
        self.endpoints.read().get(service).cloned()
    }

    /// Names of all services with a registered endpoint.
    #[must_use]
    pub fn endpoint_services(&self) -> Vec<String> {
        let mut names: Vec<_> = self.endpoints.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ObservedStateCache {
    fn default() -> Self {
        Self::new()
    }
}
