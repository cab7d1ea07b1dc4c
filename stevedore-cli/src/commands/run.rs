//! The `run` command: load manifests and drive the reconciler.

use anyhow::{anyhow, Context, Result};
use notify::{RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use stevedore_core::config::ReconcilerConfig;
use stevedore_core::manifest;
use stevedore_core::observed::ObservedStateCache;
use stevedore_core::runtime::{MemoryNetwork, MemoryRuntime};
use stevedore_core::store::ManifestStore;
use stevedore_reconciler::api::{ApiServer, ServerConfig};
use stevedore_reconciler::controller::Controller;

/// Run the reconciler until ctrl-c or a fatal store error.
///
/// Uses the in-process simulated runtime and network backends; real
/// collaborators plug in through the library API instead of the CLI.
pub async fn run(
    manifests: &Path,
    watch: bool,
    host: &str,
    port: u16,
    tick_interval_ms: Option<u64>,
) -> Result<()> {
    let mut config = ReconcilerConfig::from_env();
    if let Some(ms) = tick_interval_ms {
        config.tick_interval_ms = ms;
    }
    config.validate().map_err(|e| anyhow!(e))?;

    let store = Arc::new(ManifestStore::new());
    let cache = Arc::new(ObservedStateCache::new());
    let runtime = Arc::new(MemoryRuntime::with_defaults());
    let network = Arc::new(MemoryNetwork::new());

    let applied = apply_path(&store, manifests)?;
    tracing::info!(count = applied, path = %manifests.display(), "Applied manifests");

    let controller = Controller::new(
        store.clone(),
        cache,
        runtime.clone(),
        network,
        config,
    );
    let handle = controller.handle();

    let api = ApiServer::new(ServerConfig::new(host, port), handle.clone());
    let api_task = tokio::spawn(api.run(handle.shutdown_signal()));

    // Keep the watcher alive for the lifetime of the loop.
    let _watcher = if watch {
        Some(spawn_watcher(manifests, store.clone())?)
    } else {
        None
    };

    let mut loop_task = tokio::spawn(controller.run());

    let result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received, draining");
            handle.shutdown();
            loop_task.await.context("controller task failed")?
        }
        joined = &mut loop_task => {
            // The loop only exits on its own for a fatal store error.
            handle.shutdown();
            joined.context("controller task failed")?
        }
    };
    runtime.shutdown();

    api_task
        .await
        .context("status API task failed")?
        .context("status API error")?;

    result.map_err(|e| anyhow!(e).context("reconciler terminated with an unrecoverable error"))
}

/// Load and apply every manifest under `path`. Returns the number applied.
fn apply_path(store: &ManifestStore, path: &Path) -> Result<usize> {
    let records = manifest::load_path(path)?;
    if records.is_empty() {
        tracing::warn!(path = %path.display(), "No manifest documents found");
    }
    let count = records.len();
    for record in records {
        store.apply(record)?;
    }
    Ok(count)
}

/// Watch the manifest path and resynchronize the store on file changes:
/// changed documents are re-applied and identities that disappeared from the
/// files are removed.
fn spawn_watcher(path: &Path, store: Arc<ManifestStore>) -> Result<notify::RecommendedWatcher> {
    let root = path.to_path_buf();
    let mut watcher =
        notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                if !(event.kind.is_create() || event.kind.is_modify() || event.kind.is_remove()) {
                    return;
                }
                match manifest::load_path(&root) {
                    Ok(records) => {
                        let loaded: BTreeSet<_> = records.iter().map(|r| r.id()).collect();
                        for record in records {
                            if let Err(e) = store.apply(record) {
                                tracing::warn!(error = %e, "Rejected manifest on reload");
                            }
                        }
                        for id in store.identities() {
                            if !loaded.contains(&id) {
                                store.remove(&id);
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to reload manifests");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Manifest watch error");
            }
        })?;
    watcher.watch(path, RecursiveMode::NonRecursive)?;
    tracing::info!(path = %path.display(), "Watching manifests for changes");
    Ok(watcher)
}
