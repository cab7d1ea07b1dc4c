//! The `reconcile` command: trigger an immediate cycle.

use anyhow::{bail, Context, Result};

/// Ask a running reconciler to start a cycle now.
pub async fn run(host: &str, port: u16) -> Result<()> {
    let url = format!("http://{}:{}/api/v1/reconcile", host, port);
    let client = reqwest::Client::new();
    let response = client
        .post(&url)
        .send()
        .await
        .with_context(|| format!("Failed to reach reconciler at {}:{}", host, port))?;

    if !response.status().is_success() {
        bail!("Trigger failed ({})", response.status());
    }
    println!("Reconcile cycle triggered");
    Ok(())
}
