//! Shared harness for controller integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use stevedore_core::config::ReconcilerConfig;
use stevedore_core::manifest::{ManifestRecord, UpdatePolicy};
use stevedore_core::observed::ObservedStateCache;
use stevedore_core::runtime::{MemoryNetwork, MemoryRuntime};
use stevedore_core::store::ManifestStore;
use stevedore_core::types::ManifestKind;
use stevedore_reconciler::controller::{Controller, ControllerHandle};

/// A running controller with handles to every collaborating piece.
pub struct Harness {
    pub store: Arc<ManifestStore>,
    pub cache: Arc<ObservedStateCache>,
    pub runtime: Arc<MemoryRuntime>,
    pub network: Arc<MemoryNetwork>,
    pub handle: ControllerHandle,
    pub task: tokio::task::JoinHandle<stevedore_core::Result<()>>,
}

/// Tight intervals so convergence tests finish in milliseconds.
pub fn fast_config() -> ReconcilerConfig {
    ReconcilerConfig::builder()
        .tick_interval_ms(20)
        .max_concurrent_identities(4)
        .action_timeout_ms(200)
        .max_attempts(3)
        .backoff_ms(2, 10)
        .build()
        .unwrap()
}

/// Config whose tick never fires within a test; cycles only run when the
/// store changes or a trigger arrives. Used for call-count assertions.
pub fn manual_config() -> ReconcilerConfig {
    ReconcilerConfig::builder()
        .tick_interval_ms(600_000)
        .max_concurrent_identities(4)
        .action_timeout_ms(200)
        .max_attempts(3)
        .backoff_ms(2, 10)
        .build()
        .unwrap()
}

pub fn start() -> Harness {
    start_with(fast_config())
}

pub fn start_with(config: ReconcilerConfig) -> Harness {
    let store = Arc::new(ManifestStore::new());
    let cache = Arc::new(ObservedStateCache::new());
    let runtime = Arc::new(MemoryRuntime::with_defaults());
    let network = Arc::new(MemoryNetwork::new());
    let controller = Controller::new(
        store.clone(),
        cache.clone(),
        runtime.clone(),
        network.clone(),
        config,
    );
    let handle = controller.handle();
    let task = tokio::spawn(controller.run());
    Harness {
        store,
        cache,
        runtime,
        network,
        handle,
        task,
    }
}

pub fn deployment(name: &str, replicas: u32, image: &str) -> ManifestRecord {
    ManifestRecord {
        kind: ManifestKind::Deployment,
        name: name.to_string(),
        desired_replicas: replicas,
        image: image.to_string(),
        ports: vec![8080],
        selector_labels: BTreeMap::from([("app".to_string(), name.to_string())]),
        env: BTreeMap::new(),
        update_policy: UpdatePolicy::RollingUpdate,
    }
}

pub fn service(name: &str, app: &str, port: u16) -> ManifestRecord {
    ManifestRecord {
        kind: ManifestKind::Service,
        name: name.to_string(),
        desired_replicas: 1,
        image: String::new(),
        ports: vec![port],
        selector_labels: BTreeMap::from([("app".to_string(), app.to_string())]),
        env: BTreeMap::new(),
        update_policy: UpdatePolicy::RollingUpdate,
    }
}

/// Poll a condition until it holds or the deadline passes.
pub async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}
