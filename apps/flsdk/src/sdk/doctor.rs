//! Health checks for the SDK installation.
//!
//! ## Checks Performed
//!
//! - Platform detection
//! - Tool root existence
//! - Registry readability and default SDK
//! - Managed SDK directories present on disk
//! - Unregistered directories under the managed root
//! - Environment binding of the default SDK
//! - `flutter` resolution on the current `PATH`

use std::path::{Path, PathBuf};

use super::manager::SdkManager;
use super::registry::SdkRecord;
use crate::errors::SdkError;

/// Status of a doctor check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoctorCheckStatus {
    Ok,
    Warning,
    Error,
}

/// Result of a single doctor check.
#[derive(Debug, Clone)]
pub struct DoctorCheck {
    pub name: String,
    pub status: DoctorCheckStatus,
    pub message: String,
}

impl DoctorCheck {
    #[must_use]
    pub fn ok(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: DoctorCheckStatus::Ok,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn warning(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: DoctorCheckStatus::Warning,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: DoctorCheckStatus::Error,
            message: message.into(),
        }
    }

    /// Returns the CLI prefix for this check status.
    #[must_use]
    pub fn prefix(&self) -> &'static str {
        match self.status {
            DoctorCheckStatus::Ok => "[OK]",
            DoctorCheckStatus::Warning => "[WARN]",
            DoctorCheckStatus::Error => "[FAIL]",
        }
    }
}

/// Runs every check against the manager's state.
///
/// Registry-dependent checks are skipped when the registry cannot be read;
/// the registry check itself reports the failure.
#[must_use]
pub fn run_all_checks(manager: &SdkManager) -> Vec<DoctorCheck> {
    let mut checks = vec![check_platform(manager), check_root(manager)];

    match manager.registry().list() {
        Ok(records) => {
            checks.push(check_registry(&records));
            checks.push(check_managed_dirs(manager, &records));
            checks.push(check_unregistered_dirs(manager, &records));
            let default = records.iter().find(|r| r.is_default);
            checks.push(check_binding(manager, default));
            checks.push(check_path_resolution(default, which::which("flutter").ok()));
        }
        Err(err) => checks.push(registry_failure(&err)),
    }
    checks
}

fn check_platform(manager: &SdkManager) -> DoctorCheck {
    DoctorCheck::ok("Platform", format!("Detected {}", manager.platform()))
}

fn check_root(manager: &SdkManager) -> DoctorCheck {
    let root = &manager.paths().root;
    if root.is_dir() {
        DoctorCheck::ok("SDK directory", format!("Found at {}", root.display()))
    } else {
        DoctorCheck::warning(
            "SDK directory",
            format!(
                "Not found at {}. Run 'flsdk install' to create it.",
                root.display()
            ),
        )
    }
}

fn registry_failure(err: &SdkError) -> DoctorCheck {
    DoctorCheck::error("Registry", err.to_string())
}

fn check_registry(records: &[SdkRecord]) -> DoctorCheck {
    let defaults: Vec<&SdkRecord> = records.iter().filter(|r| r.is_default).collect();
    match (records.len(), defaults.as_slice()) {
        (0, _) => DoctorCheck::warning(
            "Registry",
            "No SDKs registered. Run 'flsdk install' first.",
        ),
        (n, []) => DoctorCheck::warning(
            "Registry",
            format!("{n} SDK(s) registered but no default. Run 'flsdk default <version>'."),
        ),
        (n, [default]) => DoctorCheck::ok(
            "Registry",
            format!("{n} SDK(s) registered, default {}", default.version),
        ),
        (_, many) => DoctorCheck::error(
            "Registry",
            format!("{} SDKs are marked as default", many.len()),
        ),
    }
}

fn check_managed_dirs(manager: &SdkManager, records: &[SdkRecord]) -> DoctorCheck {
    let platform = manager.platform();
    let broken: Vec<String> = records
        .iter()
        .filter(|r| !platform.has_entry_point(&r.path))
        .map(|r| format!("{} ({})", r.version, r.path.display()))
        .collect();

    if broken.is_empty() {
        DoctorCheck::ok("SDK directories", "All registered SDKs are present")
    } else {
        DoctorCheck::error(
            "SDK directories",
            format!(
                "Missing or incomplete: {}. Run 'flsdk uninstall <version>' to unregister.",
                broken.join(", ")
            ),
        )
    }
}

fn check_unregistered_dirs(manager: &SdkManager, records: &[SdkRecord]) -> DoctorCheck {
    let dirs = manager.paths().list_sdk_dirs().unwrap_or_default();
    let orphans: Vec<String> = dirs
        .iter()
        .filter(|dir| !records.iter().any(|r| &r.path == *dir))
        .filter_map(|dir| dir.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();

    if orphans.is_empty() {
        DoctorCheck::ok("Unregistered SDKs", "None")
    } else {
        DoctorCheck::warning(
            "Unregistered SDKs",
            format!(
                "{}. Run 'flsdk install <version>' to adopt them.",
                orphans.join(", ")
            ),
        )
    }
}

fn check_binding(manager: &SdkManager, default: Option<&SdkRecord>) -> DoctorCheck {
    let binder = manager.binder();
    let Some(default) = default else {
        return DoctorCheck::ok("Environment", format!("Nothing bound ({})", binder.describe()));
    };

    match binder.is_active(&default.bin_dir()) {
        Ok(true) => DoctorCheck::ok(
            "Environment",
            format!("{} is bound in {}", default.version, binder.describe()),
        ),
        Ok(false) => DoctorCheck::warning(
            "Environment",
            format!(
                "{} is not bound in {}. Run 'flsdk default {}' to fix.",
                default.version,
                binder.describe(),
                default.version
            ),
        ),
        Err(err) => DoctorCheck::warning("Environment", err.to_string()),
    }
}

fn check_path_resolution(default: Option<&SdkRecord>, found: Option<PathBuf>) -> DoctorCheck {
    match (default, found) {
        (_, None) => DoctorCheck::warning(
            "flutter on PATH",
            "Not found. Open a new shell after 'flsdk default'.",
        ),
        (None, Some(found)) => DoctorCheck::ok(
            "flutter on PATH",
            format!("Resolves to {} (not managed by flsdk)", found.display()),
        ),
        (Some(default), Some(found)) if is_inside(&found, &default.bin_dir()) => {
            DoctorCheck::ok("flutter on PATH", format!("Resolves to {}", found.display()))
        }
        (Some(default), Some(found)) => DoctorCheck::warning(
            "flutter on PATH",
            format!(
                "Resolves to {} instead of {}. Open a new shell or check PATH order.",
                found.display(),
                default.bin_dir().display()
            ),
        ),
    }
}

fn is_inside(file: &Path, dir: &Path) -> bool {
    let canonical = |p: &Path| std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf());
    canonical(file).starts_with(canonical(dir))
}
