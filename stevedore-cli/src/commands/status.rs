//! The `status` command: query a running reconciler's status API.

use anyhow::{bail, Context, Result};

/// Fetch and print reconciliation status.
pub async fn run(identity: Option<&str>, host: &str, port: u16) -> Result<()> {
    let url = match identity {
        Some(identity) => format!("http://{}:{}/api/v1/status/{}", host, port, identity),
        None => format!("http://{}:{}/api/v1/status", host, port),
    };

    let response = reqwest::get(&url)
        .await
        .with_context(|| format!("Failed to reach reconciler at {}:{}", host, port))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        bail!("Status query failed ({}): {}", status, body);
    }

    let body: serde_json::Value = response.json().await.context("Invalid status response")?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
