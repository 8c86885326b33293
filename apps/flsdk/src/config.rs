//! User settings for flsdk.
//!
//! Settings live in `config.toml` at the tool root. Every key is optional;
//! a missing file means all defaults. Two environment variables override the
//! file so that tests and mirrors can redirect the release feed:
//!
//! - `FLSDK_RELEASES_URL` - full URL of the release feed JSON
//! - `FLSDK_ARCHIVE_BASE_URL` - prefix joined onto relative archive paths
//! - `FLSDK_TAGS_URL` - tag listing used when the feed is unreachable
//!
//! ```toml
//! [catalog]
//! releases_url = "https://mirror.example.com/releases_linux.json"
//! tags_url = ""            # empty disables the tag fallback
//! cache_ttl_hours = 24
//! staleness_bound_hours = 720
//! timeout_secs = 15
//!
//! [download]
//! max_attempts = 5
//! base_delay_ms = 1000
//! max_delay_ms = 30000
//! connect_timeout_secs = 30
//! chunk_timeout_secs = 60
//! progress_interval_ms = 100
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding `catalog.releases_url`.
pub const RELEASES_URL_ENV: &str = "FLSDK_RELEASES_URL";

/// Environment variable overriding `catalog.archive_base_url`.
pub const ARCHIVE_BASE_URL_ENV: &str = "FLSDK_ARCHIVE_BASE_URL";

/// Environment variable overriding `catalog.tags_url`.
pub const TAGS_URL_ENV: &str = "FLSDK_TAGS_URL";

/// Paginated tag listing of the Flutter repository.
pub const DEFAULT_TAGS_URL: &str = "https://api.github.com/repos/flutter/flutter/tags";

/// Where official Flutter archives and feeds are published.
pub const DEFAULT_ARCHIVE_BASE_URL: &str =
    "https://storage.googleapis.com/flutter_infra_release/releases";

/// Top-level settings document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Release catalog settings.
    pub catalog: CatalogSettings,
    /// Download engine settings.
    pub download: DownloadSettings,
}

/// `[catalog]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CatalogSettings {
    /// Release feed URL. `None` selects the official per-OS feed.
    pub releases_url: Option<String>,
    /// Prefix for archive paths that are not absolute URLs.
    pub archive_base_url: String,
    /// Tag listing consulted when the feed fails. Empty disables it.
    pub tags_url: String,
    /// How long a cached catalog is served without contacting the network.
    pub cache_ttl_hours: u64,
    /// Oldest cache still acceptable as a fallback when the network fails.
    pub staleness_bound_hours: u64,
    /// Timeout for a single feed request.
    pub timeout_secs: u64,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            releases_url: None,
            archive_base_url: DEFAULT_ARCHIVE_BASE_URL.to_string(),
            tags_url: DEFAULT_TAGS_URL.to_string(),
            cache_ttl_hours: 24,
            staleness_bound_hours: 24 * 30,
            timeout_secs: 15,
        }
    }
}

impl CatalogSettings {
    /// Cache time-to-live.
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_hours * 3600)
    }

    /// Staleness bound for the offline fallback.
    #[must_use]
    pub fn staleness_bound(&self) -> Duration {
        Duration::from_secs(self.staleness_bound_hours * 3600)
    }

    /// The tag listing URL, unless the fallback is disabled.
    #[must_use]
    pub fn tags_url(&self) -> Option<&str> {
        Some(self.tags_url.trim()).filter(|url| !url.is_empty())
    }

    /// Feed request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// `[download]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DownloadSettings {
    /// Attempt ceiling, counting the first attempt.
    pub max_attempts: u32,
    /// Backoff base; the delay doubles with every retry.
    pub base_delay_ms: u64,
    /// Backoff cap.
    pub max_delay_ms: u64,
    /// TCP/TLS connect timeout.
    pub connect_timeout_secs: u64,
    /// Longest wait for a single body chunk before the transfer counts as stalled.
    pub chunk_timeout_secs: u64,
    /// Minimum spacing between progress notifications.
    pub progress_interval_ms: u64,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            connect_timeout_secs: 30,
            chunk_timeout_secs: 60,
            progress_interval_ms: 100,
        }
    }
}

impl Settings {
    /// Loads settings from `path`, then applies environment overrides.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read settings: {}", path.display()))?;
            toml::from_str::<Settings>(&content)
                .with_context(|| format!("Failed to parse settings: {}", path.display()))?
        } else {
            Settings::default()
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(url) = env_override(RELEASES_URL_ENV) {
            self.catalog.releases_url = Some(url);
        }
        if let Some(url) = env_override(ARCHIVE_BASE_URL_ENV) {
            self.catalog.archive_base_url = url;
        }
        if let Some(url) = env_override(TAGS_URL_ENV) {
            self.catalog.tags_url = url;
        }
    }
}

/// Reads an environment variable, ignoring blank values and trimming the rest.
fn env_override(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear_env() {
        unsafe {
            std::env::remove_var(RELEASES_URL_ENV);
            std::env::remove_var(ARCHIVE_BASE_URL_ENV);
            std::env::remove_var(TAGS_URL_ENV);
        }
    }

    #[test]
    #[serial_test::serial]
    fn missing_file_yields_defaults() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.download.max_attempts, 5);
        assert_eq!(settings.catalog.cache_ttl(), Duration::from_secs(24 * 3600));
    }

    #[test]
    #[serial_test::serial]
    fn partial_file_keeps_other_defaults() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[download]\nmax_attempts = 2\nbase_delay_ms = 10\n").unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.download.max_attempts, 2);
        assert_eq!(settings.download.base_delay_ms, 10);
        assert_eq!(settings.download.max_delay_ms, 30_000);
        assert_eq!(settings.catalog, CatalogSettings::default());
    }

    #[test]
    #[serial_test::serial]
    fn malformed_file_names_the_path() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[download\nmax_attempts = ").unwrap();

        let err = Settings::load(&path).unwrap_err();
        assert!(format!("{err}").contains("config.toml"));
    }

    #[test]
    #[serial_test::serial]
    fn unknown_keys_are_rejected() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[download]\nretries = 3\n").unwrap();

        assert!(Settings::load(&path).is_err());
    }

    #[test]
    #[serial_test::serial]
    fn env_overrides_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[catalog]\nreleases_url = \"https://file.example/releases.json\"\n",
        )
        .unwrap();

        unsafe { std::env::set_var(RELEASES_URL_ENV, "  http://127.0.0.1:9/feed.json  ") };
        let settings = Settings::load(&path).unwrap();
        clear_env();

        assert_eq!(
            settings.catalog.releases_url.as_deref(),
            Some("http://127.0.0.1:9/feed.json")
        );
    }

    #[test]
    #[serial_test::serial]
    fn blank_env_override_is_ignored() {
        unsafe { std::env::set_var(ARCHIVE_BASE_URL_ENV, "   ") };
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("config.toml")).unwrap();
        clear_env();

        assert_eq!(settings.catalog.archive_base_url, DEFAULT_ARCHIVE_BASE_URL);
    }

    #[test]
    #[serial_test::serial]
    fn empty_tags_url_disables_fallback() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[catalog]\ntags_url = \"\"\n").unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.catalog.tags_url(), None);
        assert_eq!(CatalogSettings::default().tags_url(), Some(DEFAULT_TAGS_URL));

        unsafe { std::env::set_var(TAGS_URL_ENV, "http://127.0.0.1:9/tags") };
        let settings = Settings::load(&path).unwrap();
        clear_env();
        assert_eq!(settings.catalog.tags_url(), Some("http://127.0.0.1:9/tags"));
    }
}
