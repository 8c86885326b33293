//! Error types for the flsdk SDK manager.
//!
//! `SdkError` is the single error taxonomy surfaced by every component
//! boundary (catalog, download engine, installer, registry, environment
//! binder and the facade). Each variant names the version, path, URL or
//! stage it concerns so that the message is actionable on its own.
//!
//! Leaf helpers (archive extraction, hashing, raw file I/O) keep using
//! `anyhow::Result` with context; their errors are attached as the
//! `source` of the typed variant at the boundary.

use std::path::PathBuf;
use thiserror::Error;

/// Boxed underlying cause carried by several variants.
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Consolidated error type for SDK lifecycle operations.
#[derive(Debug, Error)]
pub enum SdkError {
    /// The release catalog could not be fetched and no usable cache exists.
    #[error("release catalog unavailable: {message}")]
    CatalogUnavailable {
        /// What went wrong while fetching or reading the catalog.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxedSource>,
    },

    /// The requested version (or selector) is not in the release catalog.
    #[error("version {version} not found in the release catalog")]
    VersionNotFound {
        /// The version or selector that was requested.
        version: String,
    },

    /// A download exhausted its retries or hit a non-retryable response.
    #[error("download failed for {url}: {message}")]
    DownloadFailed {
        /// The URL being downloaded.
        url: String,
        /// Description of the failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxedSource>,
    },

    /// A download was cancelled through its cancellation token.
    #[error("download cancelled: {url}")]
    DownloadCancelled {
        /// The URL that was being downloaded.
        url: String,
    },

    /// The downloaded archive does not match the published checksum.
    #[error("checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    ChecksumMismatch {
        /// The archive that was verified.
        path: PathBuf,
        /// The published SHA-256.
        expected: String,
        /// The computed SHA-256.
        actual: String,
    },

    /// Extraction, verification or publishing of an SDK failed.
    #[error("installation of {version} failed during {stage}: {message}")]
    InstallationFailed {
        /// The version being installed.
        version: String,
        /// The installer stage (`prepare`, `extract`, `verify`, `publish`).
        stage: &'static str,
        /// Description of the failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxedSource>,
    },

    /// The referenced path is not registered.
    #[error("no SDK registered at {}", path.display())]
    SdkNotFound {
        /// The path that was looked up.
        path: PathBuf,
    },

    /// No SDK is marked as the default.
    #[error("no default SDK is set; run 'flsdk default <version|path>' to choose one")]
    NoDefaultSdk,

    /// The path does not contain a usable SDK.
    #[error("not a valid SDK at {}: {message}", path.display())]
    InvalidSdk {
        /// The path that was inspected.
        path: PathBuf,
        /// What is missing or wrong.
        message: String,
    },

    /// A managed SDK is registered but its directory is gone.
    #[error("managed SDK directory is missing: {}", path.display())]
    SdkDirectoryMissing {
        /// The registered path.
        path: PathBuf,
    },

    /// The persisted registry violates one of its invariants.
    #[error("SDK registry is inconsistent: {message}")]
    RegistryCorrupted {
        /// Which invariant is violated.
        message: String,
    },

    /// The persisted registry could not be read, locked or written.
    #[error("SDK registry I/O error: {message}")]
    RegistryIo {
        /// Description of the operation that failed.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxedSource>,
    },

    /// The user environment could not be updated. Never fatal to a switch.
    #[error("could not update environment ({target}): {message}")]
    EnvironmentUpdateFailed {
        /// The profile file or registry key that was targeted.
        target: String,
        /// Description of the failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxedSource>,
    },
}

impl SdkError {
    /// Creates a new `CatalogUnavailable` error.
    #[must_use]
    pub fn catalog_unavailable(message: impl Into<String>) -> Self {
        Self::CatalogUnavailable {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new `CatalogUnavailable` error with a source error.
    #[must_use]
    pub fn catalog_unavailable_with_source(
        message: impl Into<String>,
        source: impl Into<BoxedSource>,
    ) -> Self {
        Self::CatalogUnavailable {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates a new `VersionNotFound` error.
    #[must_use]
    pub fn version_not_found(version: impl Into<String>) -> Self {
        Self::VersionNotFound {
            version: version.into(),
        }
    }

    /// Creates a new `DownloadFailed` error.
    #[must_use]
    pub fn download_failed(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DownloadFailed {
            url: url.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new `DownloadFailed` error with a source error.
    #[must_use]
    pub fn download_failed_with_source(
        url: impl Into<String>,
        message: impl Into<String>,
        source: impl Into<BoxedSource>,
    ) -> Self {
        Self::DownloadFailed {
            url: url.into(),
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates a new `DownloadCancelled` error.
    #[must_use]
    pub fn download_cancelled(url: impl Into<String>) -> Self {
        Self::DownloadCancelled { url: url.into() }
    }

    /// Creates a new `ChecksumMismatch` error.
    #[must_use]
    pub fn checksum_mismatch(
        path: impl Into<PathBuf>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::ChecksumMismatch {
            path: path.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a new `InstallationFailed` error.
    #[must_use]
    pub fn installation_failed(
        version: impl Into<String>,
        stage: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::InstallationFailed {
            version: version.into(),
            stage,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new `InstallationFailed` error with a source error.
    #[must_use]
    pub fn installation_failed_with_source(
        version: impl Into<String>,
        stage: &'static str,
        message: impl Into<String>,
        source: impl Into<BoxedSource>,
    ) -> Self {
        Self::InstallationFailed {
            version: version.into(),
            stage,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates a new `SdkNotFound` error.
    #[must_use]
    pub fn sdk_not_found(path: impl Into<PathBuf>) -> Self {
        Self::SdkNotFound { path: path.into() }
    }

    /// Creates a new `InvalidSdk` error.
    #[must_use]
    pub fn invalid_sdk(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InvalidSdk {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `SdkDirectoryMissing` error.
    #[must_use]
    pub fn sdk_directory_missing(path: impl Into<PathBuf>) -> Self {
        Self::SdkDirectoryMissing { path: path.into() }
    }

    /// Creates a new `RegistryCorrupted` error.
    #[must_use]
    pub fn registry_corrupted(message: impl Into<String>) -> Self {
        Self::RegistryCorrupted {
            message: message.into(),
        }
    }

    /// Creates a new `RegistryIo` error with a source error.
    #[must_use]
    pub fn registry_io(message: impl Into<String>, source: impl Into<BoxedSource>) -> Self {
        Self::RegistryIo {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates a new `EnvironmentUpdateFailed` error.
    #[must_use]
    pub fn environment_update_failed(
        target: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::EnvironmentUpdateFailed {
            target: target.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new `EnvironmentUpdateFailed` error with a source error.
    #[must_use]
    pub fn environment_update_failed_with_source(
        target: impl Into<String>,
        message: impl Into<String>,
        source: impl Into<BoxedSource>,
    ) -> Self {
        Self::EnvironmentUpdateFailed {
            target: target.into(),
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Returns `true` for conditions a user can clear by retrying later.
    ///
    /// Caller errors (`SdkNotFound`, `NoDefaultSdk`, `VersionNotFound`,
    /// `InvalidSdk`) and invariant violations are not recoverable by retry.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::CatalogUnavailable { .. }
                | Self::DownloadFailed { .. }
                | Self::DownloadCancelled { .. }
                | Self::ChecksumMismatch { .. }
                | Self::InstallationFailed { .. }
                | Self::EnvironmentUpdateFailed { .. }
        )
    }
}
