//! Doctor command for the flsdk CLI.
//!
//! Reports on the health of the SDK installation with suggested fixes.
//! Findings never make the command fail.

use anyhow::Result;

use super::open_manager;
use crate::sdk::doctor::{DoctorCheckStatus, run_all_checks};

/// Executes the doctor command.
///
/// # Errors
///
/// Returns an error only if the manager cannot be created.
pub fn execute() -> Result<()> {
    println!("Checking Flutter SDK installation...");
    println!();

    let manager = open_manager()?;
    let checks = run_all_checks(&manager);

    let mut has_errors = false;
    let mut has_warnings = false;
    for check in &checks {
        println!("  {} {}: {}", check.prefix(), check.name, check.message);
        match check.status {
            DoctorCheckStatus::Ok => {}
            DoctorCheckStatus::Warning => has_warnings = true,
            DoctorCheckStatus::Error => has_errors = true,
        }
    }

    println!();
    if has_errors {
        println!("Some checks failed. Follow the suggestions above to repair the installation.");
    } else if has_warnings {
        println!("Some warnings were found. Flutter may work but could pick the wrong SDK.");
    } else {
        println!("All checks passed.");
    }
    Ok(())
}
