//! Materializes a downloaded archive as a managed SDK directory.
//!
//! Extraction happens in a hidden sibling staging directory
//! (`sdks/.<version>.staging-<rand>`). Only after the archive is fully
//! extracted and the entry point is found is the staging directory renamed
//! onto `sdks/<version>`, so listing the managed root never shows a
//! half-extracted SDK. Any failure removes the staging directory.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use super::Platform;
use super::archive;
use super::catalog::Channel;
use super::paths::HIDDEN_PREFIX;
use super::registry::SdkRecord;
use crate::errors::SdkError;

/// Attempts made to delete the archive after a successful install.
const ARCHIVE_DELETE_ATTEMPTS: u32 = 5;

const ARCHIVE_DELETE_DELAY: Duration = Duration::from_millis(500);

/// Hidden directories older than this are leftovers of an interrupted run.
const STALE_AFTER: Duration = Duration::from_secs(60 * 60);

/// Extracts, verifies and publishes SDK archives.
#[derive(Debug, Clone, Copy)]
pub struct Installer {
    platform: Platform,
    archive_delete_delay: Duration,
}

impl Installer {
    #[must_use]
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            archive_delete_delay: ARCHIVE_DELETE_DELAY,
        }
    }

    /// Installs `archive_path` into `target_dir` and returns a draft record.
    ///
    /// The archive is deleted afterwards whether the install succeeds or not;
    /// a failed install always needs a fresh download.
    ///
    /// # Errors
    ///
    /// Returns `InstallationFailed` naming the stage that failed: `prepare`
    /// (target already exists or staging cannot be created), `extract`,
    /// `verify` (entry point missing) or `publish` (final rename).
    pub fn install(
        &self,
        archive_path: &Path,
        target_dir: &Path,
        version: &str,
        channel: Channel,
    ) -> Result<SdkRecord, SdkError> {
        if target_dir.exists() {
            return Err(SdkError::installation_failed(
                version,
                "prepare",
                format!("{} already exists", target_dir.display()),
            ));
        }

        let staging = self.create_staging(target_dir, version)?;
        tracing::debug!("Extracting {} into {}", archive_path.display(), staging.display());

        if let Err(err) = self.stage(archive_path, &staging, version) {
            remove_dir_quietly(&staging);
            self.delete_archive(archive_path);
            return Err(err);
        }

        if let Err(e) = std::fs::rename(&staging, target_dir) {
            remove_dir_quietly(&staging);
            self.delete_archive(archive_path);
            return Err(SdkError::installation_failed_with_source(
                version,
                "publish",
                format!("could not move SDK into {}", target_dir.display()),
                e,
            ));
        }

        tracing::info!("Installed Flutter {version} into {}", target_dir.display());
        self.delete_archive(archive_path);
        Ok(SdkRecord::managed(target_dir, version, channel))
    }

    fn create_staging(&self, target_dir: &Path, version: &str) -> Result<PathBuf, SdkError> {
        let parent = target_dir.parent().ok_or_else(|| {
            SdkError::installation_failed(
                version,
                "prepare",
                format!("{} has no parent directory", target_dir.display()),
            )
        })?;
        let name = target_dir
            .file_name()
            .map_or_else(|| version.to_string(), |n| n.to_string_lossy().into_owned());
        let staging = parent.join(format!(
            "{HIDDEN_PREFIX}{name}.staging-{:08x}",
            rand::random::<u32>()
        ));

        std::fs::create_dir_all(&staging).map_err(|e| {
            SdkError::installation_failed_with_source(
                version,
                "prepare",
                format!("could not create {}", staging.display()),
                e,
            )
        })?;
        Ok(staging)
    }

    /// Extracts and checks the staging directory.
    fn stage(&self, archive_path: &Path, staging: &Path, version: &str) -> Result<(), SdkError> {
        archive::extract_archive(archive_path, staging).map_err(|e| {
            SdkError::installation_failed_with_source(
                version,
                "extract",
                format!("could not extract {}", archive_path.display()),
                e,
            )
        })?;

        if !self.platform.has_entry_point(staging) {
            return Err(SdkError::installation_failed(
                version,
                "verify",
                format!(
                    "unexpected archive layout: {} not found in {}",
                    self.platform.entry_point().display(),
                    archive_path.display()
                ),
            ));
        }

        archive::set_executable_permissions(staging).map_err(|e| {
            SdkError::installation_failed_with_source(
                version,
                "verify",
                "could not mark SDK executables",
                e,
            )
        })
    }

    /// Deletes the archive, retrying a few times; failure is only logged.
    fn delete_archive(&self, archive_path: &Path) {
        for attempt in 1..=ARCHIVE_DELETE_ATTEMPTS {
            match std::fs::remove_file(archive_path) {
                Ok(()) => return,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
                Err(e) if attempt == ARCHIVE_DELETE_ATTEMPTS => {
                    tracing::warn!(
                        "Could not delete archive {} after {attempt} attempts: {e}",
                        archive_path.display()
                    );
                }
                Err(_) => std::thread::sleep(self.archive_delete_delay),
            }
        }
    }
}

/// Removes hidden leftovers under `sdks_root` older than an hour: staging
/// and removal directories, and decompressed tarballs from crashed installs.
pub fn sweep_stale_entries(sdks_root: &Path) {
    let Ok(entries) = std::fs::read_dir(sdks_root) else {
        return;
    };
    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        let hidden = entry
            .file_name()
            .to_string_lossy()
            .starts_with(HIDDEN_PREFIX);
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let stale = metadata
            .modified()
            .ok()
            .and_then(|t| SystemTime::now().duration_since(t).ok())
            .is_some_and(|age| age > STALE_AFTER);
        if !(hidden && stale) {
            continue;
        }
        tracing::debug!("Removing leftover {}", path.display());
        if metadata.is_dir() {
            remove_dir_quietly(&path);
        } else if let Err(e) = std::fs::remove_file(&path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!("Could not remove {}: {e}", path.display());
        }
    }
}

fn remove_dir_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_dir_all(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!("Could not remove {}: {e}", path.display());
    }
}
