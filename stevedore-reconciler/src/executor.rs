//! The action executor.
//!
//! Executes one [`Action`] at a time against the runtime or network
//! collaborator: exactly one external call per action, wrapped in a bounded
//! deadline. Transient failures (including deadline overruns) are retried
//! with exponential backoff and jitter up to the configured attempt count;
//! permanent failures are reported immediately and never retried. After the
//! retry budget is spent, the action is reported as failed-permanently and
//! the controller requeues the owning identity for a later cycle.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use stevedore_core::config::ActionConfig;
use stevedore_core::diff::Action;
use stevedore_core::observed::{ObservedStateCache, ServiceEndpoint};
use stevedore_core::runtime::{NetworkFabric, RuntimeError, UnitRuntime};
use stevedore_core::{Result, StevedoreError};

/// Applies diff actions against the collaborator backends.
pub struct ActionExecutor {
    runtime: Arc<dyn UnitRuntime>,
    network: Arc<dyn NetworkFabric>,
    cache: Arc<ObservedStateCache>,
    config: ActionConfig,
}

impl ActionExecutor {
    /// Create a new executor.
    pub fn new(
        runtime: Arc<dyn UnitRuntime>,
        network: Arc<dyn NetworkFabric>,
        cache: Arc<ObservedStateCache>,
        config: ActionConfig,
    ) -> Self {
        Self {
            runtime,
            network,
            cache,
            config,
        }
    }

    /// Execute one action to completion or permanent failure.
    ///
    /// # Errors
    ///
    /// - [`StevedoreError::Runtime`] for a non-transient collaborator failure
    /// - [`StevedoreError::RetriesExhausted`] when transient failures outlast
    ///   the retry budget
    pub async fn execute(&self, action: &Action) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.config.timeout(), self.dispatch(action))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(RuntimeError::Timeout(self.config.timeout_ms)),
            };

            match result {
                Ok(()) => {
                    if attempt > 1 {
                        tracing::debug!(
                            action = action.kind(),
                            attempt,
                            "Action succeeded after retry"
                        );
                    }
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    if attempt >= self.config.max_attempts {
                        return Err(StevedoreError::RetriesExhausted {
                            action: action.kind(),
                            attempts: attempt,
                            cause: e.to_string(),
                        });
                    }
                    let delay = self.backoff_delay(attempt);
                    tracing::debug!(
                        action = action.kind(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(StevedoreError::Runtime(e)),
            }
        }
    }

    /// Delay before the next attempt: `base * 2^(attempt-1)` capped, plus
    /// jitter of up to half the base to spread synchronized retries.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base_ms;
        let exp = base.saturating_mul(1u64 << (attempt.min(16) - 1));
        let capped = exp.min(self.config.backoff_cap_ms);
        let jitter = rand::thread_rng().gen_range(0..=base / 2);
        Duration::from_millis(capped + jitter)
    }

    /// The single external call for an action, plus endpoint bookkeeping.
    async fn dispatch(&self, action: &Action) -> std::result::Result<(), RuntimeError> {
        match action {
            Action::CreateUnit { spec, .. } => {
                self.runtime.create_unit(spec.clone()).await?;
                Ok(())
            }
            Action::TerminateUnit { unit_id, .. } => {
                match self.runtime.terminate_unit(*unit_id).await {
                    // The unit vanished on its own; the desired end state
                    // already holds.
                    Err(RuntimeError::UnitNotFound(_)) => Ok(()),
                    other => other,
                }
            }
            Action::UpdateUnitImage { unit_id, image, .. } => {
                self.runtime.update_unit_image(*unit_id, image.clone()).await
            }
            Action::RegisterEndpoint {
                service,
                selector,
                port,
                members,
            } => {
                let address = self
                    .network
                    .register_endpoint(service.clone(), selector.clone(), *port)
                    .await?;
                tracing::info!(service = %service, address = %address, members = members.len(), "Endpoint registered");
                self.cache.record_endpoint(ServiceEndpoint {
                    service: service.clone(),
                    selector: selector.clone(),
                    port: *port,
                    address,
                    members: members.clone(),
                });
                Ok(())
            }
            Action::DeregisterEndpoint { service } => {
                self.network.deregister_endpoint(service.clone()).await?;
                self.cache.clear_endpoint(service);
                tracing::info!(service = %service, "Endpoint deregistered");
                Ok(())
            }
        }
    }
}
