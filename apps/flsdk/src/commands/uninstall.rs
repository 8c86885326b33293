//! Uninstall command for the flsdk CLI.
//!
//! Unregisters an SDK. Managed SDKs are deleted from disk; manually added
//! ones are left in place.
//!
//! ## Usage
//!
//! ```bash
//! flsdk uninstall 3.22.0
//! flsdk uninstall /opt/flutter
//! ```

use anyhow::Result;
use clap::Args;

use super::open_manager;

/// Arguments for the uninstall command.
#[derive(Args)]
pub struct UninstallArgs {
    /// Version or path of a registered SDK.
    pub target: String,
}

/// Executes the uninstall command.
///
/// # Errors
///
/// Returns an error if the target is not registered.
pub async fn execute(args: &UninstallArgs) -> Result<()> {
    let manager = open_manager()?;
    let path = manager.resolve_target(&args.target)?;
    let record = manager.remove(&path).await?;

    println!("Removed Flutter {}.", record.version);
    if !record.is_managed {
        println!("Files at {} were left in place.", record.path.display());
    }
    if record.is_default {
        println!("No default SDK is set now. Run 'flsdk default <version>' to set one.");
    }
    Ok(())
}
