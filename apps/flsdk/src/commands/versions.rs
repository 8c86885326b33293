//! Versions command for the flsdk CLI.
//!
//! Lists Flutter releases from the catalog, newest first.
//!
//! ## Usage
//!
//! ```bash
//! flsdk versions                  # All channels
//! flsdk versions --channel beta   # One channel
//! flsdk versions --refresh        # Ignore the cache
//! flsdk versions --json           # Machine-readable output
//! ```
//!
//! ## Output Format
//!
//! ```text
//! Available Flutter releases (linux-x64):
//!
//!   3.24.0          stable  2024-08-06 *
//!   3.25.0-0.1.pre  beta    2024-07-30
//!
//!   * = installed
//! ```

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use super::open_manager;
use crate::sdk::{Channel, ReleaseInfo};

/// Arguments for the versions command.
#[derive(Args)]
pub struct VersionsArgs {
    /// Show only one channel (stable, beta or dev).
    #[clap(long, short = 'c')]
    pub channel: Option<Channel>,

    /// Re-fetch the release feed even if the cache is fresh.
    #[clap(long, short = 'r')]
    pub refresh: bool,

    /// Show versions in JSON format.
    #[clap(long, short = 'j')]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct VersionInfo<'a> {
    #[serde(flatten)]
    release: &'a ReleaseInfo,
    installed: bool,
}

/// Executes the versions command.
///
/// # Errors
///
/// Returns an error if the catalog is unavailable and no usable cache exists.
pub async fn execute(args: &VersionsArgs) -> Result<()> {
    let manager = open_manager()?;
    let releases = manager.discover(args.channel, args.refresh).await?;
    let installed: Vec<String> = manager
        .list_installed()
        .map(|sdks| sdks.into_iter().map(|s| s.record.version).collect())
        .unwrap_or_default();

    if args.json {
        let infos: Vec<VersionInfo<'_>> = releases
            .iter()
            .map(|release| VersionInfo {
                release,
                installed: installed.contains(&release.version),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(());
    }

    if releases.is_empty() {
        match args.channel {
            Some(channel) => println!("No {channel} releases available."),
            None => println!("No releases available."),
        }
        return Ok(());
    }

    println!("Available Flutter releases ({}):", manager.platform());
    println!();

    let width = releases.iter().map(|r| r.version.len()).max().unwrap_or(0);
    let mut any_installed = false;
    for release in &releases {
        let date = release
            .release_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let marker = if installed.contains(&release.version) {
            any_installed = true;
            " *"
        } else {
            ""
        };
        println!(
            "  {:<width$}  {:<6}  {date}{marker}",
            release.version,
            release.channel.as_str()
        );
    }

    println!();
    if any_installed {
        println!("  * = installed");
    }
    println!("  Source: {}", manager.catalog().releases_url());
    Ok(())
}
