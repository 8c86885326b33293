//! Install command for the flsdk CLI.
//!
//! Downloads and installs a Flutter SDK version. If no version is given,
//! installs the newest stable release.
//!
//! ## Usage
//!
//! ```bash
//! flsdk install          # Install latest stable version
//! flsdk install 3.24.0   # Install specific version
//! flsdk install beta     # Newest release on the beta channel
//! ```
//!
//! Ctrl-C cancels the download; the partial file is kept and the next
//! `install` of the same version resumes it.

use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;

use super::{open_manager, report_binding};
use crate::sdk::{
    CancelToken, InstallKind, ProgressCallback, ProgressEvent, format_bytes, format_speed,
};

/// Arguments for the install command.
#[derive(Args)]
pub struct InstallArgs {
    /// Version to install (e.g., "3.24.0"), or "latest", "stable", "beta", "dev".
    #[clap(default_value = "latest")]
    pub version: String,
}

/// Executes the install command.
///
/// # Errors
///
/// Returns an error if the version cannot be resolved, downloaded, verified
/// or installed, or if the download is cancelled.
pub async fn execute(args: &InstallArgs) -> Result<()> {
    let manager = open_manager()?;

    let cancel = CancelToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    println!("Installing Flutter {} for {}...", args.version, manager.platform());
    let result = manager
        .install_version(&args.version, Some(progress_printer()), &cancel)
        .await;
    interrupt.abort();
    let report = result?;
    let version = &report.record.version;

    match report.kind {
        InstallKind::AlreadyInstalled => {
            println!("Flutter {version} is already installed.");
        }
        InstallKind::Adopted => {
            println!(
                "Registered existing Flutter {version} at {}.",
                report.record.path.display()
            );
        }
        InstallKind::Downloaded => {
            println!(
                "Flutter {version} installed into {}.",
                report.record.path.display()
            );
        }
    }

    if report.record.is_default {
        if report.kind != InstallKind::AlreadyInstalled {
            println!("Flutter {version} is now the default SDK.");
        }
        report_binding(&manager, &report.record, &report.binding);
    } else {
        println!("Run 'flsdk default {version}' to make it the default SDK.");
    }

    Ok(())
}

/// Renders download progress on a single stdout line.
fn progress_printer() -> ProgressCallback {
    Arc::new(|event: ProgressEvent| match event {
        ProgressEvent::Started {
            url, resumed_from, ..
        } => {
            if resumed_from > 0 {
                println!("Resuming {url} at {}", format_bytes(resumed_from));
            } else {
                println!("Downloading {url}");
            }
        }
        ProgressEvent::Progress {
            downloaded,
            total,
            speed,
        } => {
            let line = match total {
                Some(total) if total > 0 => format!(
                    "\r  {} / {} ({}%)  {}   ",
                    format_bytes(downloaded),
                    format_bytes(total),
                    downloaded.saturating_mul(100) / total,
                    format_speed(speed)
                ),
                _ => format!("\r  {}  {}   ", format_bytes(downloaded), format_speed(speed)),
            };
            print!("{line}");
            let _ = std::io::stdout().flush();
        }
        ProgressEvent::Retrying {
            attempt,
            max_attempts,
            error,
        } => {
            println!();
            eprintln!("Download interrupted ({error}); retrying ({attempt}/{max_attempts})...");
        }
        ProgressEvent::Completed => println!(),
        ProgressEvent::Failed { .. } | ProgressEvent::Cancelled => println!(),
    })
}
