//! The desired/observed state differ.
//!
//! Both entry points are pure functions of their inputs: they read one
//! manifest record plus an observed snapshot and return an ordered action
//! list, mutating nothing. Calling them twice with unchanged inputs yields
//! an identical list, which is what makes the reconcile decision logic
//! independently testable.
//!
//! Action ordering within one identity's list:
//!
//! 1. terminations (failed-unit reaping, then scale-down oldest-first)
//! 2. in-place image updates, or replace-policy terminations
//! 3. creations (scale-up deficit plus replacements)
//!
//! The executor runs the list serially, so capacity is released before new
//! units are requested.

use crate::manifest::{ManifestRecord, UpdatePolicy};
use crate::observed::{ObservedUnit, ServiceEndpoint, UnitPhase};
use crate::runtime::UnitSpec;
use crate::types::{ManifestId, UnitId};
use std::collections::{BTreeMap, BTreeSet};

/// A single required change, produced by the differ and consumed exactly
/// once by the action executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Start a new unit for the owning record.
    CreateUnit {
        /// The owning manifest identity.
        owner: ManifestId,
        /// The spec the runtime should start the unit from.
        spec: UnitSpec,
    },
    /// Terminate a unit.
    TerminateUnit {
        /// The owning manifest identity.
        owner: ManifestId,
        /// The unit to terminate.
        unit_id: UnitId,
    },
    /// Update a running unit's image in place.
    UpdateUnitImage {
        /// The owning manifest identity.
        owner: ManifestId,
        /// The unit to update.
        unit_id: UnitId,
        /// The image reference to roll to.
        image: String,
    },
    /// Register (or refresh) a service endpoint.
    RegisterEndpoint {
        /// The service name.
        service: String,
        /// Selector labels to route for.
        selector: BTreeMap<String, String>,
        /// Target port on member units.
        port: u16,
        /// The serving units the registration covers; recorded in the cache
        /// so later diffs can detect membership changes.
        members: BTreeSet<UnitId>,
    },
    /// Remove a service endpoint.
    DeregisterEndpoint {
        /// The service name.
        service: String,
    },
}

impl Action {
    /// Short action kind for logs and status reporting.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateUnit { .. } => "create-unit",
            Self::TerminateUnit { .. } => "terminate-unit",
            Self::UpdateUnitImage { .. } => "update-unit-image",
            Self::RegisterEndpoint { .. } => "register-endpoint",
            Self::DeregisterEndpoint { .. } => "deregister-endpoint",
        }
    }

    /// The manifest identity this action belongs to.
    #[must_use]
    pub fn identity(&self) -> ManifestId {
        match self {
            Self::CreateUnit { owner, .. }
            | Self::TerminateUnit { owner, .. }
            | Self::UpdateUnitImage { owner, .. } => owner.clone(),
            Self::RegisterEndpoint { service, .. } | Self::DeregisterEndpoint { service } => {
                ManifestId::service(service.clone())
            }
        }
    }
}

/// Diff one workload identity: replica convergence and image rollout.
///
/// `record` is `None` when the identity has been removed from the store but
/// still has observed units; those orphans are terminated.
#[must_use]
pub fn diff_workload(record: Option<&ManifestRecord>, units: &[ObservedUnit]) -> Vec<Action> {
    let mut actions = Vec::new();

    let Some(record) = record else {
        for unit in units.iter().filter(|u| !u.phase.is_terminal()) {
            actions.push(Action::TerminateUnit {
                owner: unit.owner.clone(),
                unit_id: unit.id,
            });
        }
        return actions;
    };

    let owner = record.id();

    // Failed units no longer count toward the active set; reap the husks so
    // the runtime releases their resources.
    for unit in units.iter().filter(|u| u.phase == UnitPhase::Failed) {
        actions.push(Action::TerminateUnit {
            owner: owner.clone(),
            unit_id: unit.id,
        });
    }

    let mut active: Vec<&ObservedUnit> = units.iter().filter(|u| u.is_active()).collect();
    active.sort_by(|a, b| {
        a.first_observed_at
            .cmp(&b.first_observed_at)
            .then_with(|| a.id.cmp(&b.id))
    });

    let desired = record.desired_replicas as usize;

    // Scale down oldest-first: units that passed readiness longest ago are
    // the cheapest to lose.
    if active.len() > desired {
        let excess = active.len() - desired;
        for unit in active.drain(..excess) {
            actions.push(Action::TerminateUnit {
                owner: owner.clone(),
                unit_id: unit.id,
            });
        }
    }

    // Image drift on the survivors.
    let mut replacements = 0usize;
    for unit in &active {
        if unit.image != record.image {
            match record.update_policy {
                UpdatePolicy::RollingUpdate => actions.push(Action::UpdateUnitImage {
                    owner: owner.clone(),
                    unit_id: unit.id,
                    image: record.image.clone(),
                }),
                UpdatePolicy::Replace => {
                    actions.push(Action::TerminateUnit {
                        owner: owner.clone(),
                        unit_id: unit.id,
                    });
                    replacements += 1;
                }
            }
        }
    }

    // Scale up: the replica deficit plus one replacement per unit the
    // Replace policy terminated above.
    let creates = desired.saturating_sub(active.len()) + replacements;
    for _ in 0..creates {
        actions.push(Action::CreateUnit {
            owner: owner.clone(),
            spec: UnitSpec::from_record(record),
        });
    }

    actions
}

/// Diff one service identity: endpoint registration against the current set
/// of serving units matching the selector.
///
/// `units` is the selector-matched snapshot assembled by the caller (units
/// of every deployment whose labels satisfy the service selector); only
/// Running-and-ready members participate. `endpoint` is the last observed
/// registration, if any.
#[must_use]
pub fn diff_service(
    record: Option<&ManifestRecord>,
    units: &[ObservedUnit],
    endpoint: Option<&ServiceEndpoint>,
) -> Vec<Action> {
    let Some(record) = record else {
        return match endpoint {
            Some(ep) => vec![Action::DeregisterEndpoint {
                service: ep.service.clone(),
            }],
            None => Vec::new(),
        };
    };

    let Some(port) = record.target_port() else {
        return Vec::new();
    };

    let members: BTreeSet<UnitId> = units.iter().filter(|u| u.is_serving()).map(|u| u.id).collect();

    if members.is_empty() {
        return match endpoint {
            Some(_) => vec![Action::DeregisterEndpoint {
                service: record.name.clone(),
            }],
            None => Vec::new(),
        };
    }

    let up_to_date = endpoint.is_some_and(|ep| {
        ep.members == members && ep.port == port && ep.selector == record.selector_labels
    });
    if up_to_date {
        return Vec::new();
    }

    vec![Action::RegisterEndpoint {
        service: record.name.clone(),
        selector: record.selector_labels.clone(),
        port,
        members,
    }]
}
