#![warn(clippy::pedantic)]

//! # Flutter SDK manager (flsdk)
//!
//! `flsdk` discovers Flutter releases, installs them side by side under one
//! managed root, and switches which SDK the `flutter` command resolves to.
//!
//! ## Subcommands
//!
//! - `versions` - List available releases
//! - `install` - Download and install a version
//! - `list` - List installed SDKs
//! - `add` - Register an existing installation
//! - `default` - Show or switch the default SDK
//! - `uninstall` - Remove an SDK
//! - `doctor` - Check installation health
//! - `version` - Display version information
//!
//! ## Examples
//!
//! Install the latest stable release:
//! ```bash
//! flsdk install
//! ```
//!
//! Switch to another installed version:
//! ```bash
//! flsdk default 3.22.0
//! ```

mod commands;
mod config;
mod errors;
mod sdk;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{add, default, doctor, install, list, uninstall, version, versions};
use errors::SdkError;
use tracing_subscriber::EnvFilter;

/// Environment variable holding a `tracing` filter directive.
const LOG_ENV: &str = "FLSDK_LOG";

/// Flutter SDK lifecycle manager.
#[derive(Parser)]
#[command(
    name = "flsdk",
    author,
    version,
    about = "Install, switch and remove Flutter SDK versions",
    long_about = "The 'flsdk' command manages side-by-side Flutter SDK installations. \
    Use 'install' to add a version and 'default' to choose which one 'flutter' runs.",
    after_help = "\
ENVIRONMENT VARIABLES:
    FLSDK_HOME              Tool root (default: ~/.flsdk, %APPDATA%\\flsdk on Windows)
    FLSDK_RELEASES_URL      Release feed URL (default: official per-OS feed)
    FLSDK_ARCHIVE_BASE_URL  Prefix for relative archive paths in the feed
    FLSDK_TAGS_URL          Tag listing used when the feed is unreachable
    FLSDK_LOG               Log filter, e.g. 'debug' or 'flsdk=trace'"
)]
pub struct Cli {
    /// Print debug logs to stderr.
    #[clap(long = "verbose", short = 'v', global = true, action = clap::ArgAction::SetTrue)]
    pub verbose: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands for the flsdk CLI.
#[derive(Subcommand)]
pub enum Commands {
    /// List available Flutter releases.
    ///
    /// Reads the release catalog (cached for 24 hours by default) and prints
    /// releases newest first.
    Versions(versions::VersionsArgs),

    /// Install a Flutter SDK version.
    ///
    /// Downloads, verifies and extracts a release into the managed root. If
    /// no version is given, installs the newest stable release. The first
    /// SDK installed becomes the default.
    Install(install::InstallArgs),

    /// List installed Flutter SDKs.
    ///
    /// Marks the default with an asterisk and flags SDKs whose directory is gone.
    List(list::ListArgs),

    /// Register an existing Flutter installation.
    ///
    /// The SDK is tracked but never deleted by flsdk.
    Add(add::AddArgs),

    /// Show or set the default Flutter SDK.
    ///
    /// With a target, makes it the default and puts its bin directory on PATH.
    Default(default::DefaultArgs),

    /// Uninstall a Flutter SDK.
    ///
    /// Managed SDKs are deleted; manually added ones are only unregistered.
    Uninstall(uninstall::UninstallArgs),

    /// Check installation health.
    ///
    /// Verifies the registry, managed directories and PATH binding, and
    /// suggests fixes for anything that looks wrong.
    Doctor,

    /// Display version information.
    Version,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        std::process::exit(handle_error(&e));
    }
}

/// Prints the error chain and returns the exit code.
///
/// Transient failures (network, checksum, environment) get a hint that
/// running the command again may succeed.
fn handle_error(e: &anyhow::Error) -> i32 {
    eprintln!("Error: {e:?}");
    if e.downcast_ref::<SdkError>().is_some_and(SdkError::is_recoverable) {
        eprintln!();
        eprintln!("This may be temporary. Run the command again to retry.");
    }
    1
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Versions(args) => versions::execute(&args).await,
        Commands::Install(args) => install::execute(&args).await,
        Commands::List(args) => list::execute(&args),
        Commands::Add(args) => add::execute(&args).await,
        Commands::Default(args) => default::execute(&args).await,
        Commands::Uninstall(args) => uninstall::execute(&args).await,
        Commands::Doctor => doctor::execute(),
        Commands::Version => version::execute(cli.verbose),
    }
}
