//! Add command for the flsdk CLI.
//!
//! Registers a Flutter installation flsdk did not download. flsdk never
//! deletes the files of such an SDK.
//!
//! ## Usage
//!
//! ```bash
//! flsdk add /opt/flutter
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use super::open_manager;

/// Arguments for the add command.
#[derive(Args)]
pub struct AddArgs {
    /// Root directory of the Flutter SDK (the one containing `bin/`).
    pub path: PathBuf,
}

/// Executes the add command.
///
/// # Errors
///
/// Returns an error if the directory is not a Flutter SDK.
pub async fn execute(args: &AddArgs) -> Result<()> {
    let manager = open_manager()?;
    let record = manager.add_manual(&args.path).await?;

    println!(
        "Registered Flutter {} ({}) at {}.",
        record.version,
        record.channel,
        record.path.display()
    );
    if !record.is_default {
        println!(
            "Run 'flsdk default {}' to make it the default SDK.",
            record.path.display()
        );
    }
    Ok(())
}
