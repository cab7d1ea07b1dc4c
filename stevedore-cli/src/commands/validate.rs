//! The `validate` command: parse and validate manifests without applying.

use anyhow::Result;
use std::path::Path;
use stevedore_core::manifest;

/// Validate every manifest under `path`.
pub fn run(path: &Path) -> Result<()> {
    let records = manifest::load_path(path)?;
    for record in &records {
        println!("{}: ok", record.id());
    }
    println!(
        "{} document(s) valid in {}",
        records.len(),
        path.display()
    );
    Ok(())
}
