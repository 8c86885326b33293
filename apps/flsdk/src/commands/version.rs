//! Version command for the flsdk CLI.
//!
//! Displays version information. With the global `--verbose` flag it also
//! shows the commit, platform and tool root.

use anyhow::Result;
use crate::sdk::{Platform, SdkPaths};

/// Executes the version command.
///
/// Prints the package version; verbose mode adds build and platform details.
#[allow(clippy::unnecessary_wraps)]
pub fn execute(verbose: bool) -> Result<()> {
    if verbose {
        print_verbose_version();
    } else {
        println!("flsdk {}", env!("CARGO_PKG_VERSION"));
    }
    Ok(())
}

/// Prints detailed version information.
fn print_verbose_version() {
    println!("flsdk {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Build Information:");
    println!("  Version:  {}", env!("CARGO_PKG_VERSION"));
    println!("  Commit:   {}", git_commit());
    println!("  Target:   {}", option_env!("FLSDK_BUILD_TARGET").unwrap_or("unknown"));
    println!("  Platform: {}", platform_string());
    if let Ok(paths) = SdkPaths::new() {
        println!("  Root:     {}", paths.root.display());
    }
}

/// Returns the git commit hash from environment or a fallback.
fn git_commit() -> &'static str {
    option_env!("FLSDK_GIT_COMMIT").unwrap_or("unknown")
}

/// Returns the managed platform name, or the raw OS and architecture.
fn platform_string() -> String {
    Platform::detect().map_or_else(
        |_| format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
        |p| p.to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_plain_succeeds() {
        assert!(execute(false).is_ok());
    }

    #[test]
    fn execute_verbose_succeeds() {
        assert!(execute(true).is_ok());
    }

    #[test]
    fn platform_string_is_not_empty() {
        let platform = platform_string();
        assert!(!platform.is_empty());
        assert!(platform.contains('-'));
    }

    #[test]
    fn git_commit_returns_value() {
        let commit = git_commit();
        assert!(!commit.is_empty());
    }
}
