//! Default command for the flsdk CLI.
//!
//! Shows the default SDK, or switches it and binds it into the environment.
//!
//! ## Usage
//!
//! ```bash
//! flsdk default                # Print the current default
//! flsdk default 3.24.0         # Switch to a registered version
//! flsdk default /opt/flutter   # Switch to a registered path
//! ```

use anyhow::{Context, Result};
use clap::Args;

use super::{open_manager, report_binding};
use crate::errors::SdkError;

/// Arguments for the default command.
#[derive(Args)]
pub struct DefaultArgs {
    /// Version or path of a registered SDK. Omit to print the current default.
    pub target: Option<String>,
}

/// Executes the default command.
///
/// # Errors
///
/// Returns an error if no default is set (without a target), or if the
/// target is not registered or its directory is missing.
pub async fn execute(args: &DefaultArgs) -> Result<()> {
    let manager = open_manager()?;

    let Some(target) = args.target.as_deref() else {
        let record = manager.default_sdk()?;
        println!("{} ({})", record.version, record.path.display());
        return Ok(());
    };

    let path = match manager.resolve_target(target) {
        Err(err @ SdkError::SdkNotFound { .. }) => {
            return Err(err).with_context(|| {
                format!(
                    "Flutter {target} is not installed. Run 'flsdk install {target}' to install it first"
                )
            });
        }
        other => other?,
    };

    let report = manager.switch_to(&path).await?;
    println!("Default Flutter SDK set to {}.", report.record.version);
    report_binding(&manager, &report.record, &report.binding);
    Ok(())
}
