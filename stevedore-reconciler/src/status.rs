//! Per-identity reconciliation status and fleet-wide aggregation.
//!
//! The registry is the operator-facing view of the loop: desired vs.
//! observed counts, the current cycle phase, and the most recent failure
//! reason per identity. It is written by the controller and read by the
//! status API and CLI.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeSet;
use stevedore_core::types::ManifestId;

/// Where an identity currently is in its reconcile cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CyclePhase {
    /// No cycle in flight.
    Idle,
    /// Computing the action list.
    Diffing,
    /// Applying actions.
    Executing,
}

/// Reconciliation status of one manifest identity.
#[derive(Debug, Clone, Serialize)]
pub struct IdentityStatus {
    /// The manifest identity.
    pub identity: ManifestId,
    /// Current cycle phase.
    pub phase: CyclePhase,
    /// Desired replica count. `None` for services, which have no replica
    /// target of their own.
    pub desired: Option<u32>,
    /// Observed units in an active phase (serving members for services).
    pub active: usize,
    /// Observed units that are Running and ready.
    pub ready: usize,
    /// Whether the identity matched its desired state in the last cycle.
    pub converged: bool,
    /// Actions emitted by the last completed cycle.
    pub actions_last_cycle: usize,
    /// Consecutive cycles that ended in a permanent failure.
    pub consecutive_failures: u32,
    /// The most recent failure reason, cleared on the next clean cycle.
    pub last_error: Option<String>,
    /// When the last cycle completed.
    pub last_cycle_at: Option<DateTime<Utc>>,
}

impl IdentityStatus {
    fn new(identity: ManifestId) -> Self {
        Self {
            identity,
            phase: CyclePhase::Idle,
            desired: None,
            active: 0,
            ready: 0,
            converged: false,
            actions_last_cycle: 0,
            consecutive_failures: 0,
            last_error: None,
            last_cycle_at: None,
        }
    }
}

/// Fleet-wide summary across all tracked identities.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FleetSummary {
    /// Total identities tracked.
    pub total: usize,
    /// Identities that matched their desired state in the last cycle.
    pub converged: usize,
    /// Identities whose last cycle ended in a permanent failure.
    pub failing: usize,
}

impl FleetSummary {
    /// Human-readable one-line summary.
    #[must_use]
    pub fn message(&self) -> String {
        if self.total == 0 {
            return "no identities tracked".to_string();
        }
        let mut message = format!("{}/{} identities converged", self.converged, self.total);
        if self.failing > 0 {
            message.push_str(&format!(", {} failing", self.failing));
        }
        message
    }
}

/// Concurrent registry of per-identity statuses.
pub struct StatusRegistry {
    identities: DashMap<ManifestId, IdentityStatus>,
}

impl StatusRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            identities: DashMap::new(),
        }
    }

    /// Mark the start of a cycle for an identity.
    pub fn begin_cycle(&self, identity: &ManifestId) {
        self.identities
            .entry(identity.clone())
            .or_insert_with(|| IdentityStatus::new(identity.clone()))
            .phase = CyclePhase::Diffing;
    }

    /// Mark the transition from diffing to executing.
    pub fn mark_executing(&self, identity: &ManifestId) {
        if let Some(mut status) = self.identities.get_mut(identity) {
            status.phase = CyclePhase::Executing;
        }
    }

    /// Record the completion of a cycle.
    ///
    /// `error` carries the permanent failure reason, if the cycle was cut
    /// short by one.
    pub fn complete_cycle(
        &self,
        identity: ManifestId,
        desired: Option<u32>,
        active: usize,
        ready: usize,
        actions: usize,
        error: Option<String>,
    ) {
        let mut status = self
            .identities
            .entry(identity.clone())
            .or_insert_with(|| IdentityStatus::new(identity));
        status.phase = CyclePhase::Idle;
        status.desired = desired;
        status.active = active;
        status.ready = ready;
        status.actions_last_cycle = actions;
        status.last_cycle_at = Some(Utc::now());
        match error {
            Some(reason) => {
                status.consecutive_failures += 1;
                status.last_error = Some(reason);
                status.converged = false;
            }
            None => {
                status.consecutive_failures = 0;
                status.last_error = None;
                status.converged =
                    actions == 0 && desired.map_or(true, |d| active == d as usize);
            }
        }
    }

    /// Get the status of one identity.
    #[must_use]
    pub fn get(&self, identity: &ManifestId) -> Option<IdentityStatus> {
        self.identities.get(identity).map(|s| s.clone())
    }

    /// Snapshot all statuses, sorted by identity.
    #[must_use]
    pub fn snapshot(&self) -> Vec<IdentityStatus> {
        let mut statuses: Vec<_> = self
            .identities
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        statuses.sort_by(|a, b| a.identity.cmp(&b.identity));
        statuses
    }

    /// Drop statuses for identities that no longer exist anywhere.
    pub fn prune(&self, keep: &BTreeSet<ManifestId>) {
        self.identities.retain(|id, _| keep.contains(id));
    }

    /// Compute the fleet-wide summary.
    #[must_use]
    pub fn summary(&self) -> FleetSummary {
        let mut summary = FleetSummary::default();
        for entry in self.identities.iter() {
            summary.total += 1;
            if entry.converged {
                summary.converged += 1;
            }
            if entry.consecutive_failures > 0 {
                summary.failing += 1;
            }
        }
        summary
    }
}

impl Default for StatusRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_lifecycle_updates_phase() {
        let registry = StatusRegistry::new();
        let id = ManifestId::deployment("web-a");

        registry.begin_cycle(&id);
        assert_eq!(registry.get(&id).unwrap().phase, CyclePhase::Diffing);

        registry.mark_executing(&id);
        assert_eq!(registry.get(&id).unwrap().phase, CyclePhase::Executing);

        registry.complete_cycle(id.clone(), Some(2), 2, 2, 0, None);
        let status = registry.get(&id).unwrap();
        assert_eq!(status.phase, CyclePhase::Idle);
        assert!(status.converged);
        assert!(status.last_cycle_at.is_some());
    }

    #[test]
    fn failures_accumulate_and_clear() {
        let registry = StatusRegistry::new();
        let id = ManifestId::deployment("web-a");

        registry.complete_cycle(id.clone(), Some(1), 0, 0, 1, Some("boom".to_string()));
        registry.complete_cycle(id.clone(), Some(1), 0, 0, 1, Some("boom".to_string()));
        let status = registry.get(&id).unwrap();
        assert_eq!(status.consecutive_failures, 2);
        assert_eq!(status.last_error.as_deref(), Some("boom"));
        assert!(!status.converged);

        registry.complete_cycle(id.clone(), Some(1), 1, 1, 0, None);
        let status = registry.get(&id).unwrap();
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.last_error.is_none());
        assert!(status.converged);
    }

    #[test]
    fn pending_actions_mean_not_converged() {
        let registry = StatusRegistry::new();
        let id = ManifestId::deployment("web-a");
        registry.complete_cycle(id.clone(), Some(3), 1, 1, 2, None);
        assert!(!registry.get(&id).unwrap().converged);
    }

    #[test]
    fn prune_drops_stale_identities() {
        let registry = StatusRegistry::new();
        registry.complete_cycle(ManifestId::deployment("web-a"), Some(1), 1, 1, 0, None);
        registry.complete_cycle(ManifestId::deployment("web-b"), Some(1), 1, 1, 0, None);

        let keep = BTreeSet::from([ManifestId::deployment("web-a")]);
        registry.prune(&keep);
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn summary_counts_and_message() {
        let registry = StatusRegistry::new();
        assert_eq!(registry.summary().message(), "no identities tracked");

        registry.complete_cycle(ManifestId::deployment("web-a"), Some(1), 1, 1, 0, None);
        registry.complete_cycle(
            ManifestId::deployment("web-b"),
            Some(1),
            0,
            0,
            1,
            Some("boom".to_string()),
        );

        let summary = registry.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.converged, 1);
        assert_eq!(summary.failing, 1);
        assert_eq!(summary.message(), "1/2 identities converged, 1 failing");
    }
}
