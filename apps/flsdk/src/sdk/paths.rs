//! Path management for flsdk.
//!
//! The default root directory is `~/.flsdk/` (`%APPDATA%\flsdk` on Windows),
//! which can be overridden by setting the `FLSDK_HOME` environment variable.
//!
//! ## Directory Structure
//!
//! ```text
//! ~/.flsdk/                   # Root directory (or FLSDK_HOME)
//!   sdks/                     # Managed install root
//!     3.24.0/                 # One directory per installed version
//!       bin/flutter
//!     .3.27.0.staging-1a2b/   # Private extraction target, never listed
//!   downloads/                # Archives and their `.part` temporaries
//!   cache/releases.json       # Release catalog cache
//!   registry.json             # Installed SDK records
//!   registry.lock             # Cross-process writer lock
//!   config.toml               # Optional settings
//! ```

use anyhow::{Context, Result};
use std::path::{Component, Path, PathBuf};

/// Environment variable to override the default root directory.
pub const FLSDK_HOME_ENV: &str = "FLSDK_HOME";

/// Prefix of hidden directories under `sdks/` used for staging and removal.
pub const HIDDEN_PREFIX: char = '.';

/// Manages paths for SDK installations.
#[derive(Debug, Clone)]
pub struct SdkPaths {
    /// Root directory for all flsdk data (`~/.flsdk` or `FLSDK_HOME`).
    pub root: PathBuf,
    /// Managed install root; every child directory is one SDK version.
    pub sdks: PathBuf,
    /// Directory for downloaded archives.
    pub downloads: PathBuf,
    /// Directory for cached data.
    pub cache: PathBuf,
}

impl SdkPaths {
    /// Creates a new `SdkPaths` instance.
    ///
    /// The root directory is determined by:
    /// 1. The `FLSDK_HOME` environment variable if set and not blank
    /// 2. On Windows: `%APPDATA%\flsdk`
    /// 3. On Unix: `~/.flsdk` in the user's home directory
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new() -> Result<Self> {
        let root = if let Some(home) = std::env::var(FLSDK_HOME_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
        {
            PathBuf::from(home.trim())
        } else {
            #[cfg(windows)]
            {
                dirs::data_dir()
                    .context("Cannot determine AppData directory. Set FLSDK_HOME environment variable.")?
                    .join("flsdk")
            }
            #[cfg(not(windows))]
            {
                dirs::home_dir()
                    .context("Cannot determine home directory. Set FLSDK_HOME environment variable.")?
                    .join(".flsdk")
            }
        };

        Ok(Self::with_root(root))
    }

    /// Creates a new `SdkPaths` instance with a specific root directory.
    #[must_use = "returns new paths instance without side effects"]
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            sdks: root.join("sdks"),
            downloads: root.join("downloads"),
            cache: root.join("cache"),
            root,
        }
    }

    /// Returns the managed directory for a version.
    ///
    /// `None` if `version` is not usable as a single directory name: empty,
    /// hidden, or containing separators, `..` or a root.
    #[must_use = "returns the path without side effects"]
    pub fn sdk_dir(&self, version: &str) -> Option<PathBuf> {
        is_version_dir_name(version).then(|| self.sdks.join(version))
    }

    /// Returns the path for a downloaded archive file.
    #[must_use = "returns the path without side effects"]
    pub fn download_path(&self, filename: &str) -> PathBuf {
        self.downloads.join(filename)
    }

    /// Release catalog cache file.
    #[must_use = "returns the path without side effects"]
    pub fn catalog_cache_file(&self) -> PathBuf {
        self.cache.join("releases.json")
    }

    /// Registry document.
    #[must_use = "returns the path without side effects"]
    pub fn registry_file(&self) -> PathBuf {
        self.root.join("registry.json")
    }

    /// Lock file guarding registry writes across processes.
    #[must_use = "returns the path without side effects"]
    pub fn registry_lock_file(&self) -> PathBuf {
        self.root.join("registry.lock")
    }

    /// Optional settings file.
    #[must_use = "returns the path without side effects"]
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Returns `true` if `path` is inside the managed install root.
    ///
    /// Paths with `..` or `.` components are never managed, so lexical
    /// containment is also real containment.
    #[must_use]
    pub fn is_managed_path(&self, path: &Path) -> bool {
        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::CurDir))
        {
            return false;
        }
        path.strip_prefix(&self.sdks)
            .is_ok_and(|rest| rest.components().next().is_some())
    }

    /// Lists directory names under the managed root, skipping hidden
    /// staging and removal directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the managed root exists but cannot be read.
    pub fn list_sdk_dirs(&self) -> Result<Vec<PathBuf>> {
        if !self.sdks.exists() {
            return Ok(Vec::new());
        }

        let mut dirs = Vec::new();
        let entries = std::fs::read_dir(&self.sdks)
            .with_context(|| format!("Failed to read SDK directory: {}", self.sdks.display()))?;

        for entry in entries {
            let entry = entry.with_context(|| "Failed to read directory entry")?;
            let path = entry.path();
            if path.is_dir()
                && let Some(name) = path.file_name().and_then(|n| n.to_str())
                && !name.starts_with(HIDDEN_PREFIX)
            {
                dirs.push(path);
            }
        }

        dirs.sort();
        Ok(dirs)
    }

    /// Ensures all required directories exist.
    ///
    /// # Errors
    ///
    /// Returns an error if any directory cannot be created.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.root, &self.sdks, &self.downloads, &self.cache] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }
}

/// A version string that names exactly one visible child of the managed root.
#[must_use]
pub fn is_version_dir_name(version: &str) -> bool {
    if version.is_empty() || version.starts_with(HIDDEN_PREFIX) || version.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(version).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Replaces `path` with `contents` via a sibling temporary file and a rename,
/// so readers observe either the old or the new document, never a mix.
///
/// # Errors
///
/// Returns an error if the temporary file cannot be written or renamed.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    use std::io::Write;

    let parent = path
        .parent()
        .with_context(|| format!("No parent directory for {}", path.display()))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document");
    let temp = parent.join(format!(
        ".{file_name}.{}.{:x}.tmp",
        std::process::id(),
        rand::random::<u32>()
    ));

    let result = (|| -> Result<()> {
        let mut file = std::fs::File::create(&temp)
            .with_context(|| format!("Failed to create {}", temp.display()))?;
        file.write_all(contents)
            .with_context(|| format!("Failed to write {}", temp.display()))?;
        file.sync_all()
            .with_context(|| format!("Failed to sync {}", temp.display()))?;
        std::fs::rename(&temp, path).with_context(|| {
            format!("Failed to rename {} to {}", temp.display(), path.display())
        })
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&temp);
    }
    result
}
