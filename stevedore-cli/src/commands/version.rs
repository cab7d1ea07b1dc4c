//! The `version` command.

use anyhow::Result;

/// Print version information.
pub fn run() -> Result<()> {
    println!("stevedore {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
