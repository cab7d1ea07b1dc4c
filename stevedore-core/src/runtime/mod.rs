//! Collaborator interfaces for the container runtime and the network fabric.
//!
//! The reconciler never talks to a concrete orchestration backend directly.
//! Everything it needs from the outside world goes through two narrow traits:
//!
//! - [`UnitRuntime`]: create/terminate/update units, plus a subscribe-style
//!   feed of lifecycle events
//! - [`NetworkFabric`]: register/deregister stable service endpoints
//!
//! Both are object-safe and use boxed `Send` futures so implementations can
//! be swapped behind `Arc<dyn ...>` without generics spreading through the
//! controller. The in-memory implementations in [`memory`] are the reference
//! backends for development and testing.

mod memory;

pub use memory::{MemoryNetwork, MemoryRuntime, MemoryRuntimeConfig};

use crate::manifest::ManifestRecord;
use crate::observed::LifecycleEvent;
use crate::types::{ManifestId, UnitId, VirtualAddress};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors returned by runtime and network collaborator calls.
///
/// The transient/permanent split is the contract the executor's retry policy
/// is built on: transient failures are retried with backoff, permanent ones
/// are reported immediately.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// The backend is temporarily unreachable or overloaded. Transient.
    #[error("Runtime unavailable: {0}")]
    Unavailable(String),

    /// The call did not complete within its deadline. Transient.
    #[error("Call timed out after {0}ms")]
    Timeout(u64),

    /// The backend is shutting down and not accepting calls. Transient.
    #[error("Runtime is shutting down")]
    ShuttingDown,

    /// The image reference was rejected by the runtime. Permanent.
    #[error("Image '{image}' rejected: {cause}")]
    ImageRejected {
        /// The offending image reference.
        image: String,
        /// Reason for the rejection.
        cause: String,
    },

    /// The referenced unit does not exist. Permanent.
    #[error("Unit {0} not found")]
    UnitNotFound(UnitId),

    /// The selector label set is already bound to a different endpoint.
    /// Permanent: exactly one endpoint may resolve a given selector set.
    #[error("Endpoint conflict for service '{service}': {cause}")]
    EndpointConflict {
        /// The service that attempted to register.
        service: String,
        /// Description of the conflict.
        cause: String,
    },

    /// Backend-specific failure with no retry semantics. Permanent.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl RuntimeError {
    /// Check if this failure is transient and eligible for retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::Timeout(_) | Self::ShuttingDown
        )
    }
}

/// Result type for collaborator calls.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Type alias for boxed async collaborator futures.
pub type RuntimeFuture<'a, T> = Pin<Box<dyn Future<Output = RuntimeResult<T>> + Send + 'a>>;

/// Everything the runtime needs to start a unit.
///
/// Derived from a deployment manifest; one spec is shared by all replicas of
/// the same record revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSpec {
    /// The owning manifest identity.
    pub owner: ManifestId,
    /// Container image reference to run.
    pub image: String,
    /// Ports the unit exposes.
    pub ports: Vec<u16>,
    /// Environment variables passed to the unit.
    pub env: BTreeMap<String, String>,
    /// Labels the unit carries (used for service selector matching).
    pub labels: BTreeMap<String, String>,
}

impl UnitSpec {
    /// Build a unit spec from a deployment manifest record.
    #[must_use]
    pub fn from_record(record: &ManifestRecord) -> Self {
        Self {
            owner: record.id(),
            image: record.image.clone(),
            ports: record.ports.clone(),
            env: record.env.clone(),
            labels: record.selector_labels.clone(),
        }
    }
}

/// Trait for container runtime backends.
///
/// # Implementation Notes
///
/// - All methods are async and must be `Send`
/// - `create_unit` must assign a fresh [`UnitId`] that is never reused
/// - Every state change must be reported on the event feed with a per-unit
///   monotonically increasing sequence number
/// - Terminating an already-gone unit may return
///   [`RuntimeError::UnitNotFound`]; callers treat that as success
pub trait UnitRuntime: Send + Sync {
    /// Start a new unit from the given spec.
    ///
    /// Returns the ID assigned to the new unit. The unit starts in the
    /// `Pending` phase; progress is reported on the event feed.
    fn create_unit(&self, spec: UnitSpec) -> RuntimeFuture<'_, UnitId>;

    /// Terminate a running unit.
    ///
    /// The runtime reports the `Terminated` phase on the event feed once the
    /// unit is gone.
    fn terminate_unit(&self, unit_id: UnitId) -> RuntimeFuture<'_, ()>;

    /// Replace the image of a running unit in place (rolling update).
    fn update_unit_image(&self, unit_id: UnitId, image: String) -> RuntimeFuture<'_, ()>;

    /// Subscribe to the lifecycle event feed.
    ///
    /// Events may arrive out of order; consumers must respect the per-unit
    /// sequence numbers. A stream yields `None` once the runtime shuts down.
    fn subscribe(&self) -> Box<dyn EventStream>;
}

/// A stream of lifecycle events from the runtime.
pub trait EventStream: Send {
    /// Get the next lifecycle event.
    ///
    /// Returns `None` when the feed is closed.
    fn next(&mut self) -> RuntimeFuture<'_, Option<LifecycleEvent>>;
}

/// Trait for network fabric backends.
pub trait NetworkFabric: Send + Sync {
    /// Register (or refresh) the endpoint for a service.
    ///
    /// Returns the stable virtual address that routes to the ready units
    /// matching the selector. Re-registering an existing service updates its
    /// routing and returns the same address.
    fn register_endpoint(
        &self,
        service: String,
        selector: BTreeMap<String, String>,
        port: u16,
    ) -> RuntimeFuture<'_, VirtualAddress>;

    /// Remove the endpoint for a service.
    ///
    /// Deregistering an unknown service is an acknowledged no-op.
    fn deregister_endpoint(&self, service: String) -> RuntimeFuture<'_, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn error_is_send_sync() {
        _assert_send_sync::<RuntimeError>();
    }

    #[test]
    fn transient_classification() {
        assert!(RuntimeError::Unavailable("down".into()).is_transient());
        assert!(RuntimeError::Timeout(5000).is_transient());
        assert!(RuntimeError::ShuttingDown.is_transient());
        assert!(!RuntimeError::UnitNotFound(UnitId::new()).is_transient());
        assert!(!RuntimeError::Backend("boom".into()).is_transient());
    }
}
