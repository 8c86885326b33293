//! List command for the flsdk CLI.
//!
//! Displays registered SDKs, most recently installed first, and marks the
//! default.
//!
//! ## Output Format
//!
//! ```text
//! Installed Flutter SDKs:
//!
//! * 3.24.0    (default, stable, /home/u/.flsdk/sdks/3.24.0)
//!   3.19.6    (stable, manual, /opt/flutter)
//!   3.22.0    (stable, /home/u/.flsdk/sdks/3.22.0) (missing)
//! ```

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use super::open_manager;
use crate::sdk::registry::SdkRecord;

/// Arguments for the list command.
#[derive(Args)]
pub struct ListArgs {
    /// Show SDKs in JSON format.
    #[clap(long, short = 'j')]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct ListedSdk<'a> {
    #[serde(flatten)]
    record: &'a SdkRecord,
    healthy: bool,
}

/// Executes the list command.
///
/// # Errors
///
/// Returns an error if the registry cannot be read.
pub fn execute(args: &ListArgs) -> Result<()> {
    let manager = open_manager()?;
    let sdks = manager.list_installed()?;

    if args.json {
        let listed: Vec<ListedSdk<'_>> = sdks
            .iter()
            .map(|s| ListedSdk {
                record: &s.record,
                healthy: s.healthy,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&listed)?);
        return Ok(());
    }

    if sdks.is_empty() {
        println!("No Flutter SDKs installed.");
        println!();
        println!("Run 'flsdk install' to install the latest stable release.");
        return Ok(());
    }

    println!("Installed Flutter SDKs:");
    println!();

    for sdk in &sdks {
        let record = &sdk.record;
        let mut info = Vec::new();
        if record.is_default {
            info.push("default".to_string());
        }
        info.push(record.channel.as_str().to_string());
        if !record.is_managed {
            info.push("manual".to_string());
        }
        info.push(record.path.display().to_string());

        let marker = if record.is_default { "*" } else { " " };
        let missing = if sdk.healthy { "" } else { " (missing)" };
        println!("{marker} {:<9} ({}){missing}", record.version, info.join(", "));
    }

    if !sdks.iter().any(|s| s.record.is_default) {
        println!();
        println!("No default SDK set. Run 'flsdk default <version>' to set one.");
    }
    Ok(())
}
