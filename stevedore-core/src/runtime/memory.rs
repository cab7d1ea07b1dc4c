//! In-memory runtime and network backends.
//!
//! These back the reconciler in development and in tests: units are plain
//! map entries, lifecycle transitions are emitted on a channel with real
//! per-unit sequence numbers, and failures are injected deterministically
//! through counters rather than probabilities, so every retry path can be
//! driven without timing dependence.

use super::{EventStream, NetworkFabric, RuntimeError, RuntimeFuture, UnitRuntime, UnitSpec};
use crate::observed::{LifecycleEvent, UnitPhase};
use crate::types::{ManifestId, UnitId, VirtualAddress};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Configuration for the in-memory runtime.
#[derive(Debug, Clone)]
pub struct MemoryRuntimeConfig {
    /// Transition created units straight to Running-and-ready. When false,
    /// units stay Pending until [`MemoryRuntime::make_ready_all`] is called.
    pub auto_ready: bool,
    /// Capacity of the lifecycle event channel.
    pub event_buffer: usize,
}

impl Default for MemoryRuntimeConfig {
    fn default() -> Self {
        Self {
            auto_ready: true,
            event_buffer: 256,
        }
    }
}

#[derive(Debug)]
struct SimUnit {
    spec: UnitSpec,
    phase: UnitPhase,
    image: String,
    ready: bool,
    sequence: u64,
}

/// In-memory unit runtime.
pub struct MemoryRuntime {
    config: MemoryRuntimeConfig,
    units: Mutex<HashMap<UnitId, SimUnit>>,
    created_order: Mutex<Vec<UnitId>>,
    events_tx: mpsc::Sender<LifecycleEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<LifecycleEvent>>>,
    shutting_down: AtomicBool,
    fail_next_creates: AtomicU32,
    fail_next_terminates: AtomicU32,
    fail_next_updates: AtomicU32,
    rejected_images: Mutex<HashSet<String>>,
    create_calls: AtomicU64,
    terminate_calls: AtomicU64,
    update_calls: AtomicU64,
}

impl MemoryRuntime {
    /// Create a new in-memory runtime with the given config.
    #[must_use]
    pub fn new(config: MemoryRuntimeConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer);
        Self {
            config,
            units: Mutex::new(HashMap::new()),
            created_order: Mutex::new(Vec::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            shutting_down: AtomicBool::new(false),
            fail_next_creates: AtomicU32::new(0),
            fail_next_terminates: AtomicU32::new(0),
            fail_next_updates: AtomicU32::new(0),
            rejected_images: Mutex::new(HashSet::new()),
            create_calls: AtomicU64::new(0),
            terminate_calls: AtomicU64::new(0),
            update_calls: AtomicU64::new(0),
        }
    }

    /// Create with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(MemoryRuntimeConfig::default())
    }

    /// Stop accepting calls and close the event feed.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    /// Fail the next `n` create calls with a transient error.
    pub fn inject_create_failures(&self, n: u32) {
        self.fail_next_creates.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` terminate calls with a transient error.
    pub fn inject_terminate_failures(&self, n: u32) {
        self.fail_next_terminates.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` image-update calls with a transient error.
    pub fn inject_update_failures(&self, n: u32) {
        self.fail_next_updates.store(n, Ordering::SeqCst);
    }

    /// Permanently reject an image reference.
    pub fn reject_image(&self, image: impl Into<String>) {
        self.rejected_images.lock().insert(image.into());
    }

    /// Transition all Pending units to Running-and-ready.
    pub fn make_ready_all(&self) {
        let mut units = self.units.lock();
        let mut events = Vec::new();
        for (id, unit) in units.iter_mut() {
            if unit.phase == UnitPhase::Pending {
                unit.phase = UnitPhase::Running;
                unit.ready = true;
                unit.sequence += 1;
                events.push(self.event_for(*id, unit));
            }
        }
        drop(units);
        for event in events {
            self.emit(event);
        }
    }

    /// Simulate a crash of one unit.
    pub fn fail_unit(&self, unit_id: UnitId) {
        let mut units = self.units.lock();
        let Some(unit) = units.get_mut(&unit_id) else {
            return;
        };
        unit.phase = UnitPhase::Failed;
        unit.ready = false;
        unit.sequence += 1;
        let event = self.event_for(unit_id, unit);
        drop(units);
        self.emit(event);
    }

    /// Unit IDs in the order they were created.
    #[must_use]
    pub fn created_order(&self) -> Vec<UnitId> {
        self.created_order.lock().clone()
    }

    /// IDs of units in an active phase for an owner.
    #[must_use]
    pub fn active_units(&self, owner: &ManifestId) -> Vec<UnitId> {
        self.units
            .lock()
            .iter()
            .filter(|(_, u)| u.spec.owner == *owner && u.phase.is_active())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Images of active units for an owner.
    #[must_use]
    pub fn active_images(&self, owner: &ManifestId) -> Vec<String> {
        let mut images: Vec<_> = self
            .units
            .lock()
            .values()
            .filter(|u| u.spec.owner == *owner && u.phase.is_active())
            .map(|u| u.image.clone())
            .collect();
        images.sort();
        images
    }

    /// Total create calls observed (including failed ones).
    #[must_use]
    pub fn create_calls(&self) -> u64 {
        self.create_calls.load(Ordering::Relaxed)
    }

    /// Total terminate calls observed (including failed ones).
    #[must_use]
    pub fn terminate_calls(&self) -> u64 {
        self.terminate_calls.load(Ordering::Relaxed)
    }

    /// Total image-update calls observed (including failed ones).
    #[must_use]
    pub fn update_calls(&self) -> u64 {
        self.update_calls.load(Ordering::Relaxed)
    }

    fn event_for(&self, unit_id: UnitId, unit: &SimUnit) -> LifecycleEvent {
        LifecycleEvent {
            unit_id,
            owner: unit.spec.owner.clone(),
            phase: unit.phase,
            sequence: unit.sequence,
            image: unit.image.clone(),
            ready: unit.ready,
        }
    }

    fn emit(&self, event: LifecycleEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            tracing::warn!(error = %e, "Dropping lifecycle event, feed full or closed");
        }
    }

    fn take_injected(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl UnitRuntime for MemoryRuntime {
    fn create_unit(&self, spec: UnitSpec) -> RuntimeFuture<'_, UnitId> {
        Box::pin(async move {
            self.create_calls.fetch_add(1, Ordering::Relaxed);
            if self.shutting_down.load(Ordering::SeqCst) {
                return Err(RuntimeError::ShuttingDown);
            }
            if Self::take_injected(&self.fail_next_creates) {
                return Err(RuntimeError::Unavailable("injected create failure".into()));
            }
            if self.rejected_images.lock().contains(&spec.image) {
                return Err(RuntimeError::ImageRejected {
                    image: spec.image.clone(),
                    cause: "image reference rejected by runtime".into(),
                });
            }

            let unit_id = UnitId::new();
            let image = spec.image.clone();
            let mut unit = SimUnit {
                spec,
                phase: UnitPhase::Pending,
                image,
                ready: false,
                sequence: 1,
            };
            let pending = self.event_for(unit_id, &unit);

            let running = if self.config.auto_ready {
                unit.phase = UnitPhase::Running;
                unit.ready = true;
                unit.sequence = 2;
                Some(self.event_for(unit_id, &unit))
            } else {
                None
            };

            self.units.lock().insert(unit_id, unit);
            self.created_order.lock().push(unit_id);

            self.emit(pending);
            if let Some(event) = running {
                self.emit(event);
            }

            tracing::debug!(unit = %unit_id, "Created unit");
            Ok(unit_id)
        })
    }

    fn terminate_unit(&self, unit_id: UnitId) -> RuntimeFuture<'_, ()> {
        Box::pin(async move {
            self.terminate_calls.fetch_add(1, Ordering::Relaxed);
            if self.shutting_down.load(Ordering::SeqCst) {
                return Err(RuntimeError::ShuttingDown);
            }
            if Self::take_injected(&self.fail_next_terminates) {
                return Err(RuntimeError::Unavailable(
                    "injected terminate failure".into(),
                ));
            }

            let mut units = self.units.lock();
            let Some(unit) = units.get_mut(&unit_id) else {
                return Err(RuntimeError::UnitNotFound(unit_id));
            };
            if unit.phase == UnitPhase::Terminated {
                return Err(RuntimeError::UnitNotFound(unit_id));
            }
            unit.phase = UnitPhase::Terminated;
            unit.ready = false;
            unit.sequence += 1;
            let event = self.event_for(unit_id, unit);
            drop(units);

            self.emit(event);
            tracing::debug!(unit = %unit_id, "Terminated unit");
            Ok(())
        })
    }

    fn update_unit_image(&self, unit_id: UnitId, image: String) -> RuntimeFuture<'_, ()> {
        Box::pin(async move {
            self.update_calls.fetch_add(1, Ordering::Relaxed);
            if self.shutting_down.load(Ordering::SeqCst) {
                return Err(RuntimeError::ShuttingDown);
            }
            if Self::take_injected(&self.fail_next_updates) {
                return Err(RuntimeError::Unavailable("injected update failure".into()));
            }
            if self.rejected_images.lock().contains(&image) {
                return Err(RuntimeError::ImageRejected {
                    image,
                    cause: "image reference rejected by runtime".into(),
                });
            }

            let mut units = self.units.lock();
            let Some(unit) = units.get_mut(&unit_id) else {
                return Err(RuntimeError::UnitNotFound(unit_id));
            };
            if unit.phase == UnitPhase::Terminated {
                return Err(RuntimeError::UnitNotFound(unit_id));
            }
            unit.image = image;
            unit.sequence += 1;
            let event = self.event_for(unit_id, unit);
            drop(units);

            self.emit(event);
            tracing::debug!(unit = %unit_id, "Updated unit image");
            Ok(())
        })
    }

    fn subscribe(&self) -> Box<dyn EventStream> {
        Box::new(MemoryEventStream {
            rx: self.events_rx.lock().take(),
        })
    }
}

/// Event stream over the runtime's channel. Single-subscriber: a second
/// `subscribe` yields a closed stream.
struct MemoryEventStream {
    rx: Option<mpsc::Receiver<LifecycleEvent>>,
}

impl EventStream for MemoryEventStream {
    fn next(&mut self) -> RuntimeFuture<'_, Option<LifecycleEvent>> {
        Box::pin(async move {
            match self.rx.as_mut() {
                Some(rx) => Ok(rx.recv().await),
                None => Ok(None),
            }
        })
    }
}

#[derive(Debug, Clone)]
struct RegisteredEndpoint {
    selector: BTreeMap<String, String>,
    port: u16,
    host_octet: u32,
}

impl RegisteredEndpoint {
    fn address(&self) -> VirtualAddress {
        VirtualAddress::new(format!("10.96.0.{}:{}", self.host_octet, self.port))
    }
}

/// In-memory network fabric.
///
/// Assigns virtual addresses from a private range and enforces the
/// one-endpoint-per-selector invariant.
pub struct MemoryNetwork {
    endpoints: Mutex<HashMap<String, RegisteredEndpoint>>,
    next_host_octet: AtomicU32,
    fail_next_registers: AtomicU32,
    register_calls: AtomicU64,
}

impl MemoryNetwork {
    /// Create a new in-memory network fabric.
    #[must_use]
    pub fn new() -> Self {
        Self {
            endpoints: Mutex::new(HashMap::new()),
            next_host_octet: AtomicU32::new(1),
            fail_next_registers: AtomicU32::new(0),
            register_calls: AtomicU64::new(0),
        }
    }

    /// Fail the next `n` register calls with a transient error.
    pub fn inject_register_failures(&self, n: u32) {
        self.fail_next_registers.store(n, Ordering::SeqCst);
    }

    /// The virtual address currently assigned to a service.
    #[must_use]
    pub fn address_of(&self, service: &str) -> Option<VirtualAddress> {
        self.endpoints.lock().get(service).map(|e| e.address())
    }

    /// Number of registered endpoints.
    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.lock().len()
    }

    /// Total register calls observed (including failed ones).
    #[must_use]
    pub fn register_calls(&self) -> u64 {
        self.register_calls.load(Ordering::Relaxed)
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkFabric for MemoryNetwork {
    fn register_endpoint(
        &self,
        service: String,
        selector: BTreeMap<String, String>,
        port: u16,
    ) -> RuntimeFuture<'_, VirtualAddress> {
        Box::pin(async move {
            self.register_calls.fetch_add(1, Ordering::Relaxed);
            if MemoryRuntime::take_injected(&self.fail_next_registers) {
                return Err(RuntimeError::Unavailable(
                    "injected register failure".into(),
                ));
            }

            let mut endpoints = self.endpoints.lock();

            // Exactly one endpoint may resolve a given selector set.
            if let Some((other, _)) = endpoints
                .iter()
                .find(|(name, ep)| **name != service && ep.selector == selector)
            {
                return Err(RuntimeError::EndpointConflict {
                    service,
                    cause: format!("selector already bound to service '{}'", other),
                });
            }

            let endpoint = match endpoints.get(&service) {
                Some(existing) => RegisteredEndpoint {
                    selector,
                    port,
                    host_octet: existing.host_octet,
                },
                None => RegisteredEndpoint {
                    selector,
                    port,
                    host_octet: self.next_host_octet.fetch_add(1, Ordering::SeqCst),
                },
            };
            let address = endpoint.address();
            endpoints.insert(service.clone(), endpoint);

            tracing::debug!(service = %service, address = %address, "Registered endpoint");
            Ok(address)
        })
    }

    fn deregister_endpoint(&self, service: String) -> RuntimeFuture<'_, ()> {
        Box::pin(async move {
            // Removing an unknown endpoint is acknowledged; the desired end
            // state is the same.
            self.endpoints.lock().remove(&service);
            tracing::debug!(service = %service, "Deregistered endpoint");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, image: &str) -> UnitSpec {
        UnitSpec {
            owner: ManifestId::deployment(name),
            image: image.to_string(),
            ports: vec![8080],
            env: BTreeMap::new(),
            labels: BTreeMap::from([("app".to_string(), name.to_string())]),
        }
    }

    #[tokio::test]
    async fn create_emits_pending_then_running() {
        let runtime = MemoryRuntime::with_defaults();
        let mut events = runtime.subscribe();

        let unit_id = runtime.create_unit(spec("web-a", "web:v1")).await.unwrap();

        let first = events.next().await.unwrap().unwrap();
        assert_eq!(first.unit_id, unit_id);
        assert_eq!(first.phase, UnitPhase::Pending);
        assert_eq!(first.sequence, 1);

        let second = events.next().await.unwrap().unwrap();
        assert_eq!(second.phase, UnitPhase::Running);
        assert!(second.ready);
        assert_eq!(second.sequence, 2);
    }

    #[tokio::test]
    async fn units_stay_pending_without_auto_ready() {
        let runtime = MemoryRuntime::new(MemoryRuntimeConfig {
            auto_ready: false,
            ..Default::default()
        });
        let mut events = runtime.subscribe();

        runtime.create_unit(spec("web-a", "web:v1")).await.unwrap();
        let first = events.next().await.unwrap().unwrap();
        assert_eq!(first.phase, UnitPhase::Pending);

        runtime.make_ready_all();
        let second = events.next().await.unwrap().unwrap();
        assert_eq!(second.phase, UnitPhase::Running);
        assert!(second.ready);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let runtime = MemoryRuntime::with_defaults();
        runtime.inject_create_failures(2);

        for _ in 0..2 {
            let err = runtime.create_unit(spec("web-a", "web:v1")).await.unwrap_err();
            assert!(err.is_transient());
        }
        assert!(runtime.create_unit(spec("web-a", "web:v1")).await.is_ok());
        assert_eq!(runtime.create_calls(), 3);
    }

    #[tokio::test]
    async fn rejected_image_is_permanent() {
        let runtime = MemoryRuntime::with_defaults();
        runtime.reject_image("bad:tag");

        let err = runtime.create_unit(spec("web-a", "bad:tag")).await.unwrap_err();
        assert!(matches!(err, RuntimeError::ImageRejected { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn terminate_unknown_unit_is_not_found() {
        let runtime = MemoryRuntime::with_defaults();
        let err = runtime.terminate_unit(UnitId::new()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::UnitNotFound(_)));
    }

    #[tokio::test]
    async fn terminate_emits_terminal_event() {
        let runtime = MemoryRuntime::with_defaults();
        let mut events = runtime.subscribe();

        let unit_id = runtime.create_unit(spec("web-a", "web:v1")).await.unwrap();
        events.next().await.unwrap();
        events.next().await.unwrap();

        runtime.terminate_unit(unit_id).await.unwrap();
        let event = events.next().await.unwrap().unwrap();
        assert_eq!(event.phase, UnitPhase::Terminated);
        assert_eq!(event.sequence, 3);
        assert!(runtime.active_units(&ManifestId::deployment("web-a")).is_empty());
    }

    #[tokio::test]
    async fn update_image_in_place_keeps_unit_id() {
        let runtime = MemoryRuntime::with_defaults();
        let unit_id = runtime.create_unit(spec("web-a", "web:v1")).await.unwrap();

        runtime
            .update_unit_image(unit_id, "web:v2".to_string())
            .await
            .unwrap();

        let owner = ManifestId::deployment("web-a");
        assert_eq!(runtime.active_units(&owner), vec![unit_id]);
        assert_eq!(runtime.active_images(&owner), vec!["web:v2".to_string()]);
    }

    #[tokio::test]
    async fn second_subscribe_is_closed() {
        let runtime = MemoryRuntime::with_defaults();
        let _first = runtime.subscribe();
        let mut second = runtime.subscribe();
        assert!(second.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn network_assigns_stable_addresses() {
        let network = MemoryNetwork::new();
        let selector = BTreeMap::from([("app".to_string(), "web-a".to_string())]);

        let addr = network
            .register_endpoint("web-a".to_string(), selector.clone(), 80)
            .await
            .unwrap();
        assert_eq!(addr.as_str(), "10.96.0.1:80");

        // Re-registration keeps the address.
        let addr2 = network
            .register_endpoint("web-a".to_string(), selector, 80)
            .await
            .unwrap();
        assert_eq!(addr, addr2);
        assert_eq!(network.endpoint_count(), 1);
    }

    #[tokio::test]
    async fn selector_conflict_is_rejected() {
        let network = MemoryNetwork::new();
        let selector = BTreeMap::from([("app".to_string(), "web-a".to_string())]);

        network
            .register_endpoint("web-a".to_string(), selector.clone(), 80)
            .await
            .unwrap();
        let err = network
            .register_endpoint("web-b".to_string(), selector, 80)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::EndpointConflict { .. }));
    }

    #[tokio::test]
    async fn deregister_is_idempotent() {
        let network = MemoryNetwork::new();
        assert!(network.deregister_endpoint("ghost".to_string()).await.is_ok());
    }
}
