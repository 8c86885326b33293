//! Command modules for the flsdk CLI.
//!
//! Each subcommand builds an [`SdkManager`] and calls one facade operation.
//!
//! ## Discovery
//!
//! - [`versions`] - List releases from the catalog
//!
//! ## SDK Management Commands
//!
//! - [`install`] - Download and install a version
//! - [`list`] - List registered SDKs
//! - [`add`] - Register an existing installation
//! - [`default`] - Show or switch the default SDK
//! - [`uninstall`] - Unregister and delete an SDK
//! - [`doctor`] - Check installation health
//!
//! ## Other
//!
//! - [`version`] - Display version information

pub mod add;
pub mod default;
pub mod doctor;
pub mod install;
pub mod list;
pub mod uninstall;
pub mod version;
pub mod versions;

use anyhow::Result;

use crate::config::Settings;
use crate::sdk::registry::SdkRecord;
use crate::sdk::{Binding, SdkManager, SdkPaths};

/// Builds a manager for the configured tool root.
///
/// # Errors
///
/// Returns an error if the tool root cannot be created or `config.toml` is malformed.
pub(crate) fn open_manager() -> Result<SdkManager> {
    let paths = SdkPaths::new()?;
    paths.ensure_directories()?;
    let settings = Settings::load(&paths.config_file())?;
    SdkManager::new(paths, &settings)
}

/// Prints what happened to the user's environment after a default change.
pub(crate) fn report_binding(manager: &SdkManager, record: &SdkRecord, binding: &Binding) {
    match binding {
        Binding::Applied(outcome) if outcome.changed() => {
            println!("Updated {} to put {} on PATH.", outcome.target(), record.bin_dir().display());
            if let Some(hint) = manager.binder().reload_hint() {
                println!("To use it now, {hint}.");
            }
        }
        Binding::Applied(_) | Binding::NotAttempted => {}
        Binding::Failed(err) => {
            eprintln!("Warning: Could not configure PATH automatically: {err}");
            #[cfg(unix)]
            {
                println!("To use this SDK, add to your shell profile:");
                println!("  export PATH=\"{}:$PATH\"", record.bin_dir().display());
            }
            #[cfg(windows)]
            {
                println!("To use this SDK, add to your PATH environment variable:");
                println!("  {}", record.bin_dir().display());
            }
        }
    }
}
