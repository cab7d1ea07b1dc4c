//! The controller loop.
//!
//! The loop turns desired state into runtime calls: on every tick (fixed
//! interval, store-change notification, or operator trigger) it collects all
//! known identities, diffs each one, and executes the resulting action lists
//! through the [`ActionExecutor`].
//!
//! Concurrency model:
//!
//! - identities reconcile concurrently, bounded by a semaphore
//! - actions within one identity run serially, in diff order
//! - a per-identity async mutex guarantees no two cycles overlap for the
//!   same identity; an identity whose previous cycle is still in flight is
//!   skipped, not queued
//! - a permanently failed identity is recorded in the status registry and
//!   picked up again on the next tick; other identities are unaffected
//!
//! Shutdown stops accepting ticks, then drains in-flight cycles up to a
//! bounded window before aborting what remains. A failed store integrity
//! check is the one fatal path: the loop returns the error and the process
//! exits non-zero.

use crate::executor::ActionExecutor;
use crate::status::StatusRegistry;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use stevedore_core::config::ReconcilerConfig;
use stevedore_core::diff;
use stevedore_core::manifest::ManifestRecord;
use stevedore_core::observed::{ObservedStateCache, ObservedUnit, UpdateOutcome};
use stevedore_core::runtime::{EventStream, NetworkFabric, UnitRuntime};
use stevedore_core::store::ManifestStore;
use stevedore_core::types::{ManifestId, ManifestKind};
use stevedore_core::Result;
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

/// The reconciliation driver.
pub struct Controller {
    store: Arc<ManifestStore>,
    cache: Arc<ObservedStateCache>,
    runtime: Arc<dyn UnitRuntime>,
    executor: Arc<ActionExecutor>,
    status: Arc<StatusRegistry>,
    config: ReconcilerConfig,
    locks: DashMap<ManifestId, Arc<tokio::sync::Mutex<()>>>,
    limiter: Arc<Semaphore>,
    trigger: Arc<Notify>,
    shutdown: Arc<watch::Sender<bool>>,
}

/// Cloneable handle for interacting with a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    trigger: Arc<Notify>,
    shutdown: Arc<watch::Sender<bool>>,
    status: Arc<StatusRegistry>,
}

impl ControllerHandle {
    /// Start a reconcile cycle immediately instead of waiting for the tick.
    pub fn trigger_reconcile(&self) {
        self.trigger.notify_one();
    }

    /// Request a clean shutdown.
    pub fn shutdown(&self) {
        // send_replace so the signal sticks even when no receiver is
        // subscribed yet.
        self.shutdown.send_replace(true);
    }

    /// The shared status registry.
    #[must_use]
    pub fn status(&self) -> Arc<StatusRegistry> {
        self.status.clone()
    }

    /// Subscribe to the shutdown signal (used by the status API server).
    #[must_use]
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

impl Controller {
    /// Create a controller over the given stores and collaborators.
    #[must_use]
    pub fn new(
        store: Arc<ManifestStore>,
        cache: Arc<ObservedStateCache>,
        runtime: Arc<dyn UnitRuntime>,
        network: Arc<dyn NetworkFabric>,
        config: ReconcilerConfig,
    ) -> Arc<Self> {
        let executor = Arc::new(ActionExecutor::new(
            runtime.clone(),
            network,
            cache.clone(),
            config.action.clone(),
        ));
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            store,
            cache,
            runtime,
            executor,
            status: Arc::new(StatusRegistry::new()),
            limiter: Arc::new(Semaphore::new(config.max_concurrent_identities)),
            config,
            locks: DashMap::new(),
            trigger: Arc::new(Notify::new()),
            shutdown: Arc::new(shutdown),
        })
    }

    /// Get a handle for triggering, shutdown, and status queries.
    #[must_use]
    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            trigger: self.trigger.clone(),
            shutdown: self.shutdown.clone(),
            status: self.status.clone(),
        }
    }

    /// Run the loop until shutdown or a fatal store error.
    ///
    /// # Errors
    ///
    /// Returns [`stevedore_core::StevedoreError::StoreCorruption`] when the
    /// manifest store fails its integrity sweep; all other failures are
    /// per-identity and surface through the status registry instead.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let events = self.runtime.subscribe();
        let pump = tokio::spawn(Self::pump_events(
            events,
            self.cache.clone(),
            self.trigger.clone(),
            self.shutdown.subscribe(),
        ));

        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut store_rx = self.store.subscribe();
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut inflight: JoinSet<()> = JoinSet::new();

        // Shutdown may have been requested before this task was first polled.
        if *shutdown_rx.borrow_and_update() {
            pump.abort();
            return Ok(());
        }

        tracing::info!(
            tick_ms = self.config.tick_interval_ms,
            workers = self.config.max_concurrent_identities,
            "Controller loop started"
        );

        let result = loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.trigger.notified() => {}
                changed = store_rx.changed() => {
                    if changed.is_err() {
                        // Store dropped; nothing left to reconcile toward.
                        break Ok(());
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break Ok(());
                    }
                }
            }

            if let Err(e) = self.store.verify_integrity() {
                tracing::error!(code = e.code(), error = %e, "Store integrity check failed, shutting down");
                break Err(e);
            }

            // Let the event pump drain already-reported lifecycle events so
            // the diff runs against the freshest observed state.
            tokio::task::yield_now().await;

            Self::spawn_cycles(&self, &mut inflight).await;

            while let Some(joined) = inflight.try_join_next() {
                if let Err(e) = joined {
                    if e.is_panic() {
                        tracing::error!(error = %e, "Reconcile cycle panicked");
                    }
                }
            }
        };

        match &result {
            Ok(()) => self.drain(&mut inflight).await,
            Err(_) => {
                // Fatal path: abort outstanding cycles instead of draining.
                inflight.shutdown().await;
            }
        }
        pump.abort();
        tracing::info!("Controller loop stopped");
        result
    }

    /// Wait for in-flight cycles to finish, bounded by the worst-case time
    /// one action can legally take.
    async fn drain(&self, inflight: &mut JoinSet<()>) {
        if inflight.is_empty() {
            return;
        }
        let window = Duration::from_millis(
            self.config.action.timeout_ms * u64::from(self.config.action.max_attempts) + 1_000,
        );
        tracing::info!(in_flight = inflight.len(), "Draining in-flight cycles");
        let drained = tokio::time::timeout(window, async {
            while inflight.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!("Drain window elapsed, aborting remaining cycles");
            inflight.shutdown().await;
        }
    }

    /// Forward runtime events into the cache; effective updates trigger an
    /// early reconcile so readiness changes propagate to endpoints without
    /// waiting for the tick.
    async fn pump_events(
        mut events: Box<dyn EventStream>,
        cache: Arc<ObservedStateCache>,
        trigger: Arc<Notify>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                next = events.next() => match next {
                    Ok(Some(event)) => {
                        match cache.update(event) {
                            UpdateOutcome::Applied | UpdateOutcome::Removed => {
                                trigger.notify_one();
                            }
                            UpdateOutcome::Stale => {}
                        }
                    }
                    Ok(None) => {
                        tracing::debug!("Runtime event feed closed");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Runtime event feed error");
                        break;
                    }
                }
            }
        }
    }

    /// Spawn one reconcile task per identity that is not already in flight.
    async fn spawn_cycles(this: &Arc<Self>, inflight: &mut JoinSet<()>) {
        let mut identities: BTreeSet<ManifestId> = this.store.identities().into_iter().collect();
        identities.extend(this.cache.owners());
        identities.extend(
            this.cache
                .endpoint_services()
                .into_iter()
                .map(ManifestId::service),
        );
        this.status.prune(&identities);

        for identity in identities {
            let lock = this
                .locks
                .entry(identity.clone())
                .or_default()
                .value()
                .clone();
            let Ok(guard) = lock.try_lock_owned() else {
                tracing::debug!(identity = %identity, "Cycle still in flight, skipping");
                continue;
            };
            let Ok(permit) = this.limiter.clone().acquire_owned().await else {
                return;
            };
            let controller = Arc::clone(this);
            inflight.spawn(async move {
                let _guard = guard;
                let _permit = permit;
                controller.reconcile_identity(identity).await;
            });
        }
    }

    /// One diff-and-execute cycle for a single identity.
    async fn reconcile_identity(self: Arc<Self>, identity: ManifestId) {
        self.status.begin_cycle(&identity);
        let record = self.store.get(&identity).ok();

        let (actions, desired) = match identity.kind {
            ManifestKind::Deployment => {
                let units = self.cache.snapshot(&identity);
                let actions = diff::diff_workload(record.as_ref(), &units);
                (actions, record.as_ref().map(|r| r.desired_replicas))
            }
            ManifestKind::Service => {
                let units = record
                    .as_ref()
                    .map(|r| self.selector_snapshot(r))
                    .unwrap_or_default();
                let endpoint = self.cache.endpoint(&identity.name);
                let actions = diff::diff_service(record.as_ref(), &units, endpoint.as_ref());
                (actions, None)
            }
        };

        let total = actions.len();
        let mut error = None;

        if total > 0 {
            tracing::debug!(identity = %identity, actions = total, "Executing action list");
            self.status.mark_executing(&identity);

            for action in &actions {
                if let Err(e) = self.executor.execute(action).await {
                    tracing::error!(
                        identity = %identity,
                        action = action.kind(),
                        code = e.code(),
                        error = %e,
                        "Action failed permanently, identity requeued for next cycle"
                    );
                    error = Some(e.to_string());
                    break;
                }
            }
        }

        let (active, ready) = self.observed_counts(&identity, record.as_ref());
        self.status
            .complete_cycle(identity, desired, active, ready, total, error);
    }

    /// Units of every deployment whose labels satisfy the service selector.
    fn selector_snapshot(&self, service: &ManifestRecord) -> Vec<ObservedUnit> {
        let mut units = Vec::new();
        for record in self.store.list() {
            if record.kind == ManifestKind::Deployment && service.selects(&record.selector_labels) {
                units.extend(self.cache.snapshot(&record.id()));
            }
        }
        units
    }

    /// Current (active, ready) counts for status reporting.
    fn observed_counts(
        &self,
        identity: &ManifestId,
        record: Option<&ManifestRecord>,
    ) -> (usize, usize) {
        let units = match identity.kind {
            ManifestKind::Deployment => self.cache.snapshot(identity),
            ManifestKind::Service => record
                .map(|r| self.selector_snapshot(r))
                .unwrap_or_default(),
        };
        let active = units.iter().filter(|u| u.is_active()).count();
        let ready = units.iter().filter(|u| u.is_serving()).count();
        (active, ready)
    }
}
