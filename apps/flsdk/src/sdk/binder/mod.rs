//! Environment binding: putting the default SDK's `bin/` on the user's PATH.
//!
//! Every binder only edits content it inserted itself, recognised by a
//! sentinel (a marker comment in shell profiles, a companion registry value
//! on Windows). Activating the same directory twice leaves the environment
//! unchanged the second time.
//!
//! Binding is best effort. Callers log `EnvironmentUpdateFailed` and keep
//! going; the registry default stays authoritative.

mod shell;
#[cfg_attr(not(windows), allow(dead_code))]
mod windows;

use std::path::Path;

use shell::ShellProfileBinder;
#[cfg(windows)]
use windows::RegistryPathBinder;

use super::paths::SdkPaths;
use crate::errors::SdkError;

/// What a bind operation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// The target was rewritten.
    Updated { target: String },
    /// The target already had the requested content.
    Unchanged { target: String },
}

impl BindOutcome {
    /// The profile file or registry key that was examined.
    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            Self::Updated { target } | Self::Unchanged { target } => target,
        }
    }

    #[must_use]
    pub fn changed(&self) -> bool {
        matches!(self, Self::Updated { .. })
    }
}

/// Makes an SDK's executables resolve first on the command search path.
pub trait EnvironmentBinder: Send + Sync {
    /// Points the environment at `bin_dir`, replacing any previous binding.
    ///
    /// # Errors
    ///
    /// Returns `EnvironmentUpdateFailed` if the target cannot be read or written.
    fn activate(&self, bin_dir: &Path) -> Result<BindOutcome, SdkError>;

    /// Removes the binding for `bin_dir`, if it is the current one.
    ///
    /// # Errors
    ///
    /// Returns `EnvironmentUpdateFailed` if the target cannot be read or written.
    fn deactivate(&self, bin_dir: &Path) -> Result<BindOutcome, SdkError>;

    /// Returns `true` if the environment currently points at `bin_dir`.
    ///
    /// # Errors
    ///
    /// Returns `EnvironmentUpdateFailed` if the target cannot be read.
    fn is_active(&self, bin_dir: &Path) -> Result<bool, SdkError>;

    /// Human-readable name of the target, for reports.
    fn describe(&self) -> String;

    /// What the user must do for a change to reach open terminals.
    fn reload_hint(&self) -> Option<String> {
        None
    }
}

/// Used when no environment target can be determined.
#[derive(Debug, Clone)]
pub struct DetachedBinder {
    reason: String,
}

impl DetachedBinder {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl EnvironmentBinder for DetachedBinder {
    fn activate(&self, bin_dir: &Path) -> Result<BindOutcome, SdkError> {
        Err(SdkError::environment_update_failed(
            "none",
            format!(
                "{}; add {} to PATH manually",
                self.reason,
                bin_dir.display()
            ),
        ))
    }

    fn deactivate(&self, _bin_dir: &Path) -> Result<BindOutcome, SdkError> {
        Err(SdkError::environment_update_failed("none", self.reason.clone()))
    }

    fn is_active(&self, _bin_dir: &Path) -> Result<bool, SdkError> {
        Ok(false)
    }

    fn describe(&self) -> String {
        format!("none ({})", self.reason)
    }
}

/// Picks the binder for the current platform.
///
/// Windows edits the user `Path` in the registry. Elsewhere the shell is taken
/// from `SHELL` and its profile is edited.
#[must_use]
pub fn platform_binder(paths: &SdkPaths) -> Box<dyn EnvironmentBinder> {
    #[cfg(windows)]
    {
        Box::new(RegistryPathBinder::new(paths.sdks.clone()))
    }

    #[cfg(not(windows))]
    {
        let _ = paths;
        let Some(home) = dirs::home_dir() else {
            return Box::new(DetachedBinder::new("home directory is unknown"));
        };
        let shell = std::env::var("SHELL").ok();
        ShellProfileBinder::detect(&home, shell.as_deref())
    }
}
