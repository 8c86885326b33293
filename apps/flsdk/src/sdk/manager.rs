//! The SDK manager facade.
//!
//! `SdkManager` is the only entry point the commands use. It orchestrates
//! catalog, download engine, installer, registry and environment binder:
//!
//! ```text
//! Discovered -> Downloading -> Installing -> Registered -> Active | Inactive
//!                                            (any of the last three) -> Removed
//! ```
//!
//! Registry and environment mutations run under one async mutex. Downloads
//! run outside it, so a long transfer never blocks a `switch` or `remove`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::Mutex;

use super::binder::{BindOutcome, EnvironmentBinder, platform_binder};
use super::catalog::{Channel, ReleaseCatalog, ReleaseInfo};
use super::download::{CancelToken, DownloadEngine, ProgressCallback};
use super::installer::{Installer, sweep_stale_entries};
use super::paths::{HIDDEN_PREFIX, SdkPaths, is_version_dir_name};
use super::registry::{Registry, SdkRecord};
use super::verify::verify_checksum;
use super::Platform;
use crate::config::Settings;
use crate::errors::SdkError;

/// Lifecycle state of one install attempt, logged at each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    Discovered,
    Downloading,
    Installing,
    Registered,
    Active,
    Inactive,
    Removed,
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discovered => "discovered",
            Self::Downloading => "downloading",
            Self::Installing => "installing",
            Self::Registered => "registered",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Removed => "removed",
        };
        f.write_str(name)
    }
}

fn transition(version: &str, state: InstallState) {
    tracing::debug!(version, %state, "SDK state transition");
}

/// How `install_version` obtained the SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallKind {
    /// Already registered; nothing was downloaded.
    AlreadyInstalled,
    /// A valid unregistered directory under the managed root was registered.
    Adopted,
    /// Downloaded and extracted.
    Downloaded,
}

/// Result of the best-effort environment step.
#[derive(Debug)]
pub enum Binding {
    Applied(BindOutcome),
    /// The SDK did not become the default, so nothing was bound.
    NotAttempted,
    /// Binding failed; the registry change still stands.
    Failed(SdkError),
}

#[derive(Debug)]
pub struct InstallReport {
    pub record: SdkRecord,
    pub kind: InstallKind,
    pub binding: Binding,
}

#[derive(Debug)]
pub struct SwitchReport {
    pub record: SdkRecord,
    pub binding: Binding,
}

/// A registered SDK as seen by `list_installed`.
#[derive(Debug, Clone)]
pub struct InstalledSdk {
    pub record: SdkRecord,
    /// `false` when the directory or its entry point is gone.
    pub healthy: bool,
}

/// Facade over the SDK lifecycle.
pub struct SdkManager {
    paths: SdkPaths,
    platform: Platform,
    catalog: ReleaseCatalog,
    downloader: DownloadEngine,
    installer: Installer,
    registry: Registry,
    binder: Arc<dyn EnvironmentBinder>,
    mutation: Mutex<()>,
}

impl SdkManager {
    /// Creates a manager for the host platform with the platform's binder.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform is unsupported or a client cannot be built.
    pub fn new(paths: SdkPaths, settings: &Settings) -> anyhow::Result<Self> {
        let platform = Platform::detect()?;
        let binder: Arc<dyn EnvironmentBinder> = Arc::from(platform_binder(&paths));
        let registry = Registry::open(&paths);
        Self::with_parts(paths, settings, platform, registry, binder)
            .context("Failed to initialise the SDK manager")
    }

    /// Creates a manager from explicit parts.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built.
    pub fn with_parts(
        paths: SdkPaths,
        settings: &Settings,
        platform: Platform,
        registry: Registry,
        binder: Arc<dyn EnvironmentBinder>,
    ) -> Result<Self, SdkError> {
        Ok(Self {
            catalog: ReleaseCatalog::new(&paths, &settings.catalog, platform)?,
            downloader: DownloadEngine::new(&settings.download)?,
            installer: Installer::new(platform),
            paths,
            platform,
            registry,
            binder,
            mutation: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn paths(&self) -> &SdkPaths {
        &self.paths
    }

    #[must_use]
    pub fn platform(&self) -> Platform {
        self.platform
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn binder(&self) -> &dyn EnvironmentBinder {
        self.binder.as_ref()
    }

    #[must_use]
    pub fn catalog(&self) -> &ReleaseCatalog {
        &self.catalog
    }

    /// Lists available releases, newest first.
    ///
    /// # Errors
    ///
    /// Returns `CatalogUnavailable` if neither network nor cache can answer.
    pub async fn discover(
        &self,
        channel: Option<Channel>,
        refresh: bool,
    ) -> Result<Vec<ReleaseInfo>, SdkError> {
        if refresh {
            self.catalog.refresh().await?;
        }
        self.catalog.list_releases(channel).await
    }

    /// Installs a version or selector (`latest`, `stable`, `beta`, `dev`).
    ///
    /// An already registered version is returned without any download. The
    /// first SDK installed into an empty registry becomes the default and is
    /// bound into the environment.
    ///
    /// # Errors
    ///
    /// Returns `VersionNotFound`, `CatalogUnavailable`, `DownloadFailed`,
    /// `DownloadCancelled`, `ChecksumMismatch`, `InstallationFailed`,
    /// `SdkDirectoryMissing` or a registry error.
    pub async fn install_version(
        &self,
        selector: &str,
        progress: Option<ProgressCallback>,
        cancel: &CancelToken,
    ) -> Result<InstallReport, SdkError> {
        let selector = selector.trim();

        // Exact versions already on disk need no catalog round trip.
        if !is_selector(selector)
            && let Some(report) = self.existing_install(selector).await?
        {
            return Ok(report);
        }

        let release = self.catalog.resolve(selector).await?;
        let version = release.version.clone();
        transition(&version, InstallState::Discovered);

        let target = self.paths.sdk_dir(&version).ok_or_else(|| {
            SdkError::installation_failed(
                &version,
                "prepare",
                "release version is not a valid directory name",
            )
        })?;

        if let Some(report) = self.existing_install(&version).await? {
            return Ok(report);
        }

        let filename = release.archive_filename();
        if !is_version_dir_name(filename) {
            return Err(SdkError::download_failed(
                &release.download_url,
                "archive URL does not end in a file name",
            ));
        }
        let archive = self.paths.download_path(filename);
        transition(&version, InstallState::Downloading);
        self.downloader
            .download(&release.download_url, &archive, progress, cancel)
            .await?;

        if let Some(expected) = release.sha256.clone() {
            let path = archive.clone();
            let verified = tokio::task::spawn_blocking(move || verify_checksum(&path, &expected))
                .await
                .map_err(|e| {
                    SdkError::download_failed_with_source(
                        &release.download_url,
                        "checksum task failed",
                        e,
                    )
                })?;
            if let Err(err) = verified {
                let _ = std::fs::remove_file(&archive);
                return Err(err);
            }
        }

        let _guard = self.mutation.lock().await;

        // A concurrent call may have finished the same version meanwhile.
        if let Some(record) = self.registered_at(&target)? {
            let _ = std::fs::remove_file(&archive);
            return Ok(InstallReport {
                record,
                kind: InstallKind::AlreadyInstalled,
                binding: Binding::NotAttempted,
            });
        }

        transition(&version, InstallState::Installing);
        sweep_stale_entries(&self.paths.sdks);
        let installer = self.installer;
        let (task_version, channel) = (version.clone(), release.channel);
        let mut record = tokio::task::spawn_blocking(move || {
            installer.install(&archive, &target, &task_version, channel)
        })
        .await
        .map_err(|e| {
            SdkError::installation_failed_with_source(&version, "extract", "installer task failed", e)
        })??;

        record.metadata = serde_json::json!({
            "download_url": release.download_url,
            "sha256": release.sha256,
            "hash": release.hash,
        });
        self.register(record, InstallKind::Downloaded)
    }

    /// Returns a report for `version` if it is registered or adoptable.
    ///
    /// Names that cannot be a managed directory never match anything here.
    async fn existing_install(&self, version: &str) -> Result<Option<InstallReport>, SdkError> {
        let Some(dir) = self.paths.sdk_dir(version) else {
            return Ok(None);
        };

        if let Some(record) = self.registered_at(&dir)? {
            if !dir.is_dir() {
                return Err(SdkError::sdk_directory_missing(dir));
            }
            tracing::debug!("Flutter {version} is already installed");
            return Ok(Some(InstallReport {
                record,
                kind: InstallKind::AlreadyInstalled,
                binding: Binding::NotAttempted,
            }));
        }

        if dir.is_dir() {
            if !self.platform.has_entry_point(&dir) {
                return Err(SdkError::installation_failed(
                    version,
                    "prepare",
                    format!(
                        "{} exists but is not a Flutter SDK; remove it and retry",
                        dir.display()
                    ),
                ));
            }
            let _guard = self.mutation.lock().await;
            if let Some(record) = self.registered_at(&dir)? {
                return Ok(Some(InstallReport {
                    record,
                    kind: InstallKind::AlreadyInstalled,
                    binding: Binding::NotAttempted,
                }));
            }
            tracing::info!("Adopting unregistered SDK at {}", dir.display());
            let version_file = read_version_file(&dir).unwrap_or_else(|| version.to_string());
            let record =
                SdkRecord::managed(&dir, &version_file, Channel::infer_from_version(&version_file));
            return self.register(record, InstallKind::Adopted).map(Some);
        }

        Ok(None)
    }

    fn registered_at(&self, path: &Path) -> Result<Option<SdkRecord>, SdkError> {
        Ok(self.registry.list()?.into_iter().find(|r| r.path == path))
    }

    /// Registers a new record; must run under the mutation lock.
    fn register(&self, mut record: SdkRecord, kind: InstallKind) -> Result<InstallReport, SdkError> {
        record.is_default = self.registry.list()?.is_empty();
        let record = self.registry.add(record)?;
        transition(&record.version, InstallState::Registered);

        let binding = if record.is_default {
            transition(&record.version, InstallState::Active);
            self.bind(&record)
        } else {
            transition(&record.version, InstallState::Inactive);
            Binding::NotAttempted
        };

        Ok(InstallReport {
            record,
            kind,
            binding,
        })
    }

    fn bind(&self, record: &SdkRecord) -> Binding {
        match self.binder.activate(&record.bin_dir()) {
            Ok(outcome) => Binding::Applied(outcome),
            Err(err) => {
                tracing::warn!("Environment not updated: {err}");
                Binding::Failed(err)
            }
        }
    }

    /// Lists registered SDKs, most recently installed first.
    ///
    /// # Errors
    ///
    /// Returns a registry error.
    pub fn list_installed(&self) -> Result<Vec<InstalledSdk>, SdkError> {
        let mut records = self.registry.list()?;
        records.sort_by(|a, b| b.installed_at.cmp(&a.installed_at));
        Ok(records
            .into_iter()
            .map(|record| InstalledSdk {
                healthy: self.platform.has_entry_point(&record.path),
                record,
            })
            .collect())
    }

    /// Registers an existing Flutter installation that flsdk does not manage.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSdk` if `path` is missing or lacks the entry point.
    pub async fn add_manual(&self, path: &Path) -> Result<SdkRecord, SdkError> {
        let root = std::fs::canonicalize(path)
            .map_err(|e| SdkError::invalid_sdk(path, format!("cannot access directory: {e}")))?;
        if !self.platform.has_entry_point(&root) {
            return Err(SdkError::invalid_sdk(
                &root,
                format!("{} not found", self.platform.entry_point().display()),
            ));
        }

        let version = read_version_file(&root).unwrap_or_else(|| "unknown".to_string());
        let channel = Channel::infer_from_version(&version);
        let mut record = if self.paths.is_managed_path(&root) {
            SdkRecord::managed(&root, &version, channel)
        } else {
            SdkRecord::manual(&root, &version, channel)
        };

        let _guard = self.mutation.lock().await;
        if let Some(existing) = self.registered_at(&root)? {
            record.is_default = existing.is_default;
        }
        let record = self.registry.add(record)?;
        transition(&record.version, InstallState::Registered);
        Ok(record)
    }

    /// Makes the SDK at `path` the default and binds it into the environment.
    ///
    /// Binding failures are reported in the result, not as an error.
    ///
    /// # Errors
    ///
    /// Returns `SdkNotFound` if `path` is not registered, or
    /// `SdkDirectoryMissing` if a managed SDK's directory is gone.
    pub async fn switch_to(&self, path: &Path) -> Result<SwitchReport, SdkError> {
        let _guard = self.mutation.lock().await;

        let record = self.registry.get(path)?;
        if record.is_managed && !record.path.is_dir() {
            return Err(SdkError::sdk_directory_missing(&record.path));
        }

        let record = self.registry.set_default(path)?;
        transition(&record.version, InstallState::Active);
        let binding = self.bind(&record);
        Ok(SwitchReport { record, binding })
    }

    /// Unregisters the SDK at `path` and, if flsdk manages it, deletes it.
    ///
    /// Removing the default leaves no default and unbinds it from the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns `SdkNotFound` if `path` is not registered.
    pub async fn remove(&self, path: &Path) -> Result<SdkRecord, SdkError> {
        let _guard = self.mutation.lock().await;

        let record = self.registry.remove(path)?;
        transition(&record.version, InstallState::Removed);

        if record.is_default
            && let Err(err) = self.binder.deactivate(&record.bin_dir())
        {
            tracing::warn!("Environment not updated: {err}");
        }

        if record.is_managed && self.paths.is_managed_path(&record.path) {
            delete_managed_dir(&record.path);
        }
        Ok(record)
    }

    /// The current default SDK.
    ///
    /// # Errors
    ///
    /// Returns `NoDefaultSdk` if none is set.
    pub fn default_sdk(&self) -> Result<SdkRecord, SdkError> {
        self.registry.get_default()
    }

    /// Maps a CLI target (a registered version or a path) to a registry path.
    ///
    /// # Errors
    ///
    /// Returns `SdkNotFound` if nothing matches.
    pub fn resolve_target(&self, target: &str) -> Result<PathBuf, SdkError> {
        let records = self.registry.list()?;

        if let Some(managed) = self.paths.sdk_dir(target)
            && records.iter().any(|r| r.path == managed)
        {
            return Ok(managed);
        }
        if let Some(record) = records.iter().find(|r| r.version == target) {
            return Ok(record.path.clone());
        }

        // Records keep the path they were registered with; compare both
        // sides canonicalized so symlinked roots still match.
        let candidate = PathBuf::from(target);
        let canonical = std::fs::canonicalize(&candidate).unwrap_or_else(|_| candidate.clone());
        records
            .iter()
            .find(|r| {
                r.path == candidate
                    || r.path == canonical
                    || std::fs::canonicalize(&r.path).is_ok_and(|p| p == canonical)
            })
            .map(|r| r.path.clone())
            .ok_or_else(|| SdkError::sdk_not_found(canonical))
    }
}

fn is_selector(selector: &str) -> bool {
    matches!(
        selector.to_lowercase().as_str(),
        "latest" | "stable" | "beta" | "dev"
    )
}

/// Reads the `version` file Flutter ships at the SDK root.
fn read_version_file(root: &Path) -> Option<String> {
    std::fs::read_to_string(root.join("version"))
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Hides the directory with a rename, then deletes it.
fn delete_managed_dir(path: &Path) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let hidden = path.with_file_name(format!(
        "{HIDDEN_PREFIX}{name}.removing-{:08x}",
        rand::random::<u32>()
    ));

    let doomed = match std::fs::rename(path, &hidden) {
        Ok(()) => hidden,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => {
            tracing::warn!("Could not hide {} before deletion: {e}", path.display());
            path.to_path_buf()
        }
    };
    if let Err(e) = std::fs::remove_dir_all(&doomed) {
        tracing::warn!("Could not delete {}: {e}", doomed.display());
    }
}
