//! The manifest store: last-applied desired state, keyed by identity.
//!
//! The store owns every [`ManifestRecord`] exclusively. Apply is
//! validate-then-replace with last-write-wins semantics and is idempotent:
//! applying a record identical to the stored one changes nothing and does
//! not advance the revision, so no reconcile cycle is triggered for it.
//!
//! Consumers that want to react to desired-state changes subscribe to the
//! revision watch channel rather than polling.

use crate::error::{Result, StevedoreError};
use crate::manifest::ManifestRecord;
use crate::types::ManifestId;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::watch;

/// Outcome of a store apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A new identity was stored.
    Created,
    /// An existing identity was replaced with different content.
    Updated,
    /// The record was identical to the stored one; nothing changed.
    Unchanged,
}

/// In-memory store of last-applied manifest records.
pub struct ManifestStore {
    records: RwLock<HashMap<ManifestId, ManifestRecord>>,
    revision: watch::Sender<u64>,
}

impl ManifestStore {
    /// Create an empty store at revision 0.
    #[must_use]
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            records: RwLock::new(HashMap::new()),
            revision,
        }
    }

    /// Validate and insert or replace a record by identity.
    ///
    /// Returns [`ApplyOutcome::Unchanged`] without side effects when the
    /// record equals the stored one.
    ///
    /// # Errors
    ///
    /// [`StevedoreError::ManifestInvalid`] if validation fails; the record
    /// is not stored.
    pub fn apply(&self, record: ManifestRecord) -> Result<ApplyOutcome> {
        record.validate()?;
        let id = record.id();

        let outcome = {
            let mut records = self.records.write();
            match records.get(&id) {
                Some(existing) if *existing == record => ApplyOutcome::Unchanged,
                Some(_) => {
                    records.insert(id.clone(), record);
                    ApplyOutcome::Updated
                }
                None => {
                    records.insert(id.clone(), record);
                    ApplyOutcome::Created
                }
            }
        };

        if outcome != ApplyOutcome::Unchanged {
            self.bump_revision();
            tracing::info!(identity = %id, outcome = ?outcome, "Applied manifest");
        } else {
            tracing::debug!(identity = %id, "Manifest unchanged, apply is a no-op");
        }
        Ok(outcome)
    }

    /// Get the current record for an identity.
    ///
    /// # Errors
    ///
    /// [`StevedoreError::ManifestNotFound`] when no record is stored.
    pub fn get(&self, id: &ManifestId) -> Result<ManifestRecord> {
        self.records
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StevedoreError::ManifestNotFound { id: id.clone() })
    }

    /// Snapshot all current records, sorted by identity.
    ///
    /// The snapshot is consistent as of the call and independent of later
    /// mutations, so iteration can be restarted at will.
    #[must_use]
    pub fn list(&self) -> Vec<ManifestRecord> {
        let mut records: Vec<_> = self.records.read().values().cloned().collect();
        records.sort_by(|a, b| a.id().cmp(&b.id()));
        records
    }

    /// Snapshot all stored identities, sorted.
    #[must_use]
    pub fn identities(&self) -> Vec<ManifestId> {
        let mut ids: Vec<_> = self.records.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Remove a record. Returns the removed record, if any.
    ///
    /// Units owned by a removed identity are garbage-collected by the next
    /// reconcile cycle.
    pub fn remove(&self, id: &ManifestId) -> Option<ManifestRecord> {
        let removed = self.records.write().remove(id);
        if removed.is_some() {
            self.bump_revision();
            tracing::info!(identity = %id, "Removed manifest");
        }
        removed
    }

    /// Current store revision. Advances on every effective mutation.
    #[must_use]
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Subscribe to revision changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Verify internal invariants: every record must be stored under the key
    /// matching its own identity.
    ///
    /// # Errors
    ///
    /// [`StevedoreError::StoreCorruption`] on any mismatch. This error is
    /// fatal to the controller loop.
    pub fn verify_integrity(&self) -> Result<()> {
        let records = self.records.read();
        for (key, record) in records.iter() {
            if *key != record.id() {
                return Err(StevedoreError::StoreCorruption {
                    cause: format!(
                        "record stored under key {} has identity {}",
                        key,
                        record.id()
                    ),
                });
            }
        }
        Ok(())
    }

    /// Insert a record under an arbitrary key, bypassing validation and the
    /// key/identity invariant. Test seam for corruption handling; never call
    /// this from production code.
    #[doc(hidden)]
    pub fn insert_unchecked(&self, key: ManifestId, record: ManifestRecord) {
        self.records.write().insert(key, record);
        self.bump_revision();
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}

impl Default for ManifestStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ManifestKind;
    use std::collections::BTreeMap;

    fn record(name: &str, replicas: u32, image: &str) -> ManifestRecord {
        ManifestRecord {
            kind: ManifestKind::Deployment,
            name: name.to_string(),
            desired_replicas: replicas,
            image: image.to_string(),
            ports: vec![8080],
            selector_labels: BTreeMap::from([("app".to_string(), name.to_string())]),
            env: BTreeMap::new(),
            update_policy: Default::default(),
        }
    }

    #[test]
    fn apply_then_get() {
        let store = ManifestStore::new();
        let outcome = store.apply(record("web-a", 2, "web:v1")).unwrap();
        assert_eq!(outcome, ApplyOutcome::Created);

        let fetched = store.get(&ManifestId::deployment("web-a")).unwrap();
        assert_eq!(fetched.desired_replicas, 2);
    }

    #[test]
    fn identical_apply_is_a_noop() {
        let store = ManifestStore::new();
        store.apply(record("web-a", 2, "web:v1")).unwrap();
        let rev = store.revision();

        let outcome = store.apply(record("web-a", 2, "web:v1")).unwrap();
        assert_eq!(outcome, ApplyOutcome::Unchanged);
        assert_eq!(store.revision(), rev, "no-op apply must not bump revision");
    }

    #[test]
    fn newer_apply_wins() {
        let store = ManifestStore::new();
        store.apply(record("web-a", 2, "web:v1")).unwrap();
        let outcome = store.apply(record("web-a", 3, "web:v2")).unwrap();
        assert_eq!(outcome, ApplyOutcome::Updated);

        let fetched = store.get(&ManifestId::deployment("web-a")).unwrap();
        assert_eq!(fetched.desired_replicas, 3);
        assert_eq!(fetched.image, "web:v2");
    }

    #[test]
    fn invalid_record_is_never_stored() {
        let store = ManifestStore::new();
        let err = store.apply(record("web-a", 2, "")).unwrap_err();
        assert_eq!(err.code(), "E001");
        assert!(store.get(&ManifestId::deployment("web-a")).is_err());
        assert_eq!(store.revision(), 0);
    }

    #[test]
    fn get_missing_is_not_found() {
        let store = ManifestStore::new();
        let err = store.get(&ManifestId::deployment("ghost")).unwrap_err();
        assert_eq!(err.code(), "E002");
    }

    #[test]
    fn list_is_sorted_by_identity() {
        let store = ManifestStore::new();
        store.apply(record("web-b", 1, "web:v1")).unwrap();
        store.apply(record("web-a", 1, "web:v1")).unwrap();

        let names: Vec<_> = store.list().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["web-a", "web-b"]);
    }

    #[test]
    fn subscribe_sees_revision_changes() {
        let store = ManifestStore::new();
        let rx = store.subscribe();
        assert_eq!(*rx.borrow(), 0);

        store.apply(record("web-a", 1, "web:v1")).unwrap();
        assert_eq!(*rx.borrow(), 1);

        store.remove(&ManifestId::deployment("web-a"));
        assert_eq!(*rx.borrow(), 2);
    }

    #[test]
    fn integrity_sweep_detects_key_mismatch() {
        let store = ManifestStore::new();
        store.apply(record("web-a", 1, "web:v1")).unwrap();
        assert!(store.verify_integrity().is_ok());

        store.insert_unchecked(ManifestId::deployment("ghost"), record("web-a", 1, "web:v1"));
        let err = store.verify_integrity().unwrap_err();
        assert_eq!(err.code(), "E003");
        assert!(err.is_fatal());
    }
}
