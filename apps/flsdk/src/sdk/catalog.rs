//! Release catalog for Flutter SDK versions.
//!
//! The catalog reads the per-OS release feed and keeps a local cache of it.
//!
//! ## Feed Format
//!
//! ```json
//! {
//!   "base_url": "https://storage.googleapis.com/flutter_infra_release/releases",
//!   "releases": [
//!     {
//!       "version": "3.24.0",
//!       "channel": "stable",
//!       "release_date": "2024-08-06T22:11:43.427795Z",
//!       "archive": "stable/linux/flutter_linux_3.24.0-stable.tar.xz",
//!       "hash": "80c2e84975bbd28ecf5f8d4bd4ca5a2490bfc819",
//!       "sha256": "..."
//!     }
//!   ]
//! }
//! ```
//!
//! ## Caching
//!
//! The cache at `cache/releases.json` is served without network access while
//! it is younger than the configured TTL. When a refresh fails, a cache up to
//! the staleness bound old is served instead. Refreshes merge into the cached
//! set, so a release never disappears from history once seen. The cache file
//! is replaced with an atomic rename and the in-memory snapshot is swapped
//! behind a lock, so readers never observe a half-updated catalog.
//!
//! When the feed itself is down, the Flutter repository's tag listing is
//! walked page by page and archive URLs are derived from the usual layout.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Platform;
use super::paths::{SdkPaths, is_version_dir_name, write_atomic};
use crate::config::CatalogSettings;
use crate::errors::SdkError;

/// Official feed location; `releases_<os>.json` lives under it.
const DEFAULT_FEED_BASE: &str = "https://storage.googleapis.com/flutter_infra_release/releases";

/// Release notes are published per tag.
const CHANGELOG_BASE: &str = "https://github.com/flutter/flutter/releases/tag";

/// User-Agent header for HTTP requests.
const USER_AGENT: &str = concat!("flsdk/", env!("CARGO_PKG_VERSION"));

/// Tags requested per page of the tag listing.
const TAGS_PER_PAGE: usize = 100;

/// Page ceiling for one walk of the tag listing.
const MAX_TAG_PAGES: usize = 50;

/// Release stability track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Stable,
    Beta,
    Dev,
}

impl Channel {
    /// Returns the lowercase channel name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Beta => "beta",
            Self::Dev => "dev",
        }
    }

    /// Parses a channel name, falling back to inference from the version string
    /// when the name is not one of the three known tracks.
    #[must_use]
    pub fn from_feed(channel: &str, version: &str) -> Self {
        channel
            .parse()
            .unwrap_or_else(|_| Self::infer_from_version(version))
    }

    /// Guesses the channel of a version string.
    ///
    /// `beta` wins over `dev`; any pre-release marker (`-`, `.pre`, `dev`)
    /// without `beta` means dev; everything else is stable.
    #[must_use]
    pub fn infer_from_version(version: &str) -> Self {
        let lower = version.to_lowercase();
        if lower.contains("beta") {
            Self::Beta
        } else if lower.contains("dev") || lower.contains('-') || lower.contains(".pre") {
            Self::Dev
        } else {
            Self::Stable
        }
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stable" => Ok(Self::Stable),
            "beta" => Ok(Self::Beta),
            "dev" => Ok(Self::Dev),
            other => Err(format!("unknown channel '{other}' (expected stable, beta or dev)")),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One downloadable release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub version: String,
    pub channel: Channel,
    pub release_date: Option<DateTime<Utc>>,
    pub download_url: String,
    pub changelog_url: String,
    /// Framework commit the release was cut from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Published SHA-256 of the archive, when the feed provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl ReleaseInfo {
    /// Archive file name (last URL path segment).
    #[must_use]
    pub fn archive_filename(&self) -> &str {
        self.download_url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(self.download_url.as_str())
    }
}

/// A cached view of the feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub fetched_at: DateTime<Utc>,
    pub source: String,
    pub releases: Vec<ReleaseInfo>,
}

impl CatalogSnapshot {
    fn age(&self) -> std::time::Duration {
        (Utc::now() - self.fetched_at)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}

#[derive(Debug, Deserialize)]
struct ReleaseFeed {
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    releases: Vec<FeedEntry>,
}

/// One entry of the repository tag listing.
#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
    #[serde(default)]
    commit: Option<TagCommit>,
}

#[derive(Debug, Deserialize)]
struct TagCommit {
    #[serde(default)]
    sha: String,
}

#[derive(Debug, Deserialize)]
struct FeedEntry {
    #[serde(default)]
    version: String,
    #[serde(default)]
    channel: String,
    #[serde(default)]
    release_date: String,
    #[serde(default)]
    archive: String,
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    sha256: Option<String>,
    #[serde(default)]
    dart_sdk_arch: Option<String>,
}

/// Fetches, caches and orders releases.
pub struct ReleaseCatalog {
    releases_url: String,
    settings: CatalogSettings,
    platform: Platform,
    cache_file: PathBuf,
    client: reqwest::Client,
    current: RwLock<Option<Arc<CatalogSnapshot>>>,
}

impl ReleaseCatalog {
    /// Creates a catalog reading the configured feed for `platform`.
    ///
    /// # Errors
    ///
    /// Returns `CatalogUnavailable` if the HTTP client cannot be built.
    pub fn new(
        paths: &SdkPaths,
        settings: &CatalogSettings,
        platform: Platform,
    ) -> Result<Self, SdkError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SdkError::catalog_unavailable_with_source("Failed to create HTTP client", e))?;

        let releases_url = settings
            .releases_url
            .clone()
            .unwrap_or_else(|| default_releases_url(platform));

        Ok(Self {
            releases_url,
            settings: settings.clone(),
            platform,
            cache_file: paths.catalog_cache_file(),
            client,
            current: RwLock::new(None),
        })
    }

    /// URL of the feed this catalog reads.
    #[must_use]
    pub fn releases_url(&self) -> &str {
        &self.releases_url
    }

    /// Lists releases newest first, optionally restricted to one channel.
    ///
    /// # Errors
    ///
    /// Returns `CatalogUnavailable` if neither the network nor a
    /// sufficiently fresh cache can provide the feed.
    pub async fn list_releases(
        &self,
        channel: Option<Channel>,
    ) -> Result<Vec<ReleaseInfo>, SdkError> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot
            .releases
            .iter()
            .filter(|r| channel.is_none_or(|c| r.channel == c))
            .cloned()
            .collect())
    }

    /// Resolves an exact version or a selector (`latest`, `stable`, `beta`, `dev`).
    ///
    /// `latest` is the newest stable release.
    ///
    /// # Errors
    ///
    /// Returns `VersionNotFound` if nothing matches, or the catalog error.
    pub async fn resolve(&self, selector: &str) -> Result<ReleaseInfo, SdkError> {
        let selector = selector.trim();
        let releases = self.list_releases(None).await?;

        let channel = match selector.to_lowercase().as_str() {
            "latest" => Some(Channel::Stable),
            other => other.parse::<Channel>().ok(),
        };

        let found = match channel {
            Some(channel) => releases.into_iter().find(|r| r.channel == channel),
            None => releases.into_iter().find(|r| r.version == selector),
        };

        found.ok_or_else(|| SdkError::version_not_found(selector))
    }

    /// Re-fetches the feed, merges it into the cached history and atomically
    /// replaces both the cache file and the in-memory snapshot.
    ///
    /// If the feed fails, the repository's tags are listed instead. Those
    /// releases carry no dates or checksums, so known entries keep their
    /// cached data and the result is not written to the cache file.
    ///
    /// # Errors
    ///
    /// Returns `CatalogUnavailable` if neither the feed nor the tag listing
    /// can be fetched and parsed.
    pub async fn refresh(&self) -> Result<Arc<CatalogSnapshot>, SdkError> {
        let previous = self.load_cache().map(|s| s.releases).unwrap_or_default();

        let snapshot = match self.fetch_from_feed().await {
            Ok(fetched) => {
                let snapshot = Arc::new(CatalogSnapshot {
                    fetched_at: Utc::now(),
                    source: self.releases_url.clone(),
                    releases: merge_releases(previous, fetched),
                });
                if let Err(e) = self.save_cache(&snapshot) {
                    tracing::warn!("Failed to write release cache: {e:#}");
                }
                snapshot
            }
            Err(feed_error) => {
                let Some(tags_url) = self.settings.tags_url() else {
                    return Err(feed_error);
                };
                tracing::warn!("{feed_error}; listing releases from {tags_url}");
                match self.fetch_from_tags(tags_url).await {
                    Ok(tagged) if !tagged.is_empty() => Arc::new(CatalogSnapshot {
                        fetched_at: Utc::now(),
                        source: tags_url.to_string(),
                        releases: merge_releases(tagged, previous),
                    }),
                    Ok(_) => {
                        tracing::warn!("Tag listing at {tags_url} had no releases");
                        return Err(feed_error);
                    }
                    Err(e) => {
                        tracing::warn!("Tag listing failed: {e:#}");
                        return Err(feed_error);
                    }
                }
            }
        };

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
        tracing::debug!(
            releases = snapshot.releases.len(),
            "Release catalog refreshed from {}",
            snapshot.source
        );
        Ok(snapshot)
    }

    async fn fetch_from_feed(&self) -> Result<Vec<ReleaseInfo>, SdkError> {
        let body = self.fetch_text(&self.releases_url).await.map_err(|e| {
            SdkError::catalog_unavailable_with_source(
                format!("could not fetch {}", self.releases_url),
                e,
            )
        })?;

        parse_feed(&body, self.platform, &self.settings.archive_base_url).map_err(|e| {
            SdkError::catalog_unavailable_with_source(
                format!("could not parse {}", self.releases_url),
                e,
            )
        })
    }

    /// Walks the paginated tag listing. A failure after the first page keeps
    /// the tags gathered so far.
    async fn fetch_from_tags(&self, tags_url: &str) -> Result<Vec<ReleaseInfo>> {
        let separator = if tags_url.contains('?') { '&' } else { '?' };
        let mut tags = Vec::new();

        for page in 1..=MAX_TAG_PAGES {
            let url = format!("{tags_url}{separator}per_page={TAGS_PER_PAGE}&page={page}");
            let batch = match self.fetch_text(&url).await.and_then(|body| {
                serde_json::from_str::<Vec<TagEntry>>(&body)
                    .with_context(|| format!("Tag listing is not valid JSON: {url}"))
            }) {
                Ok(batch) => batch,
                Err(e) if page > 1 => {
                    tracing::warn!("Stopping tag listing at page {page}: {e:#}");
                    break;
                }
                Err(e) => return Err(e),
            };
            let last_page = batch.len() < TAGS_PER_PAGE;
            tags.extend(batch);
            if last_page {
                break;
            }
        }

        Ok(releases_from_tags(
            tags,
            self.platform,
            &self.settings.archive_base_url,
        ))
    }

    async fn snapshot(&self) -> Result<Arc<CatalogSnapshot>, SdkError> {
        let ttl = self.settings.cache_ttl();

        let in_memory = self
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(snapshot) = in_memory.filter(|s| s.age() < ttl) {
            return Ok(snapshot);
        }

        let cached = self.load_cache().map(Arc::new);
        if let Some(snapshot) = cached.as_ref().filter(|s| s.age() < ttl) {
            tracing::debug!("Using cached release catalog ({} releases)", snapshot.releases.len());
            *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
            return Ok(snapshot.clone());
        }

        match self.refresh().await {
            Ok(snapshot) => Ok(snapshot),
            Err(err) => match cached.filter(|s| s.age() < self.settings.staleness_bound()) {
                Some(stale) => {
                    tracing::warn!(
                        "Release feed unreachable, serving cache from {}: {err}",
                        stale.fetched_at
                    );
                    *self.current.write().unwrap_or_else(PoisonError::into_inner) =
                        Some(stale.clone());
                    Ok(stale)
                }
                None => Err(err),
            },
        }
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {url}"))?;

        if !response.status().is_success() {
            return Err(handle_http_error(response.status(), url));
        }

        response
            .text()
            .await
            .with_context(|| format!("Failed to read response from {url}"))
    }

    /// Loads the cache file. A corrupt cache is deleted so the next refresh
    /// starts clean.
    fn load_cache(&self) -> Option<CatalogSnapshot> {
        let content = std::fs::read_to_string(&self.cache_file).ok()?;
        match serde_json::from_str::<CatalogSnapshot>(&content) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!("Discarding unreadable release cache: {e}");
                let _ = std::fs::remove_file(&self.cache_file);
                None
            }
        }
    }

    fn save_cache(&self, snapshot: &CatalogSnapshot) -> Result<()> {
        let content =
            serde_json::to_vec_pretty(snapshot).context("Failed to serialize release cache")?;
        write_atomic(&self.cache_file, &content)
    }
}

/// Official feed URL for a platform.
#[must_use]
pub fn default_releases_url(platform: Platform) -> String {
    format!("{DEFAULT_FEED_BASE}/releases_{}.json", platform.os())
}

/// Handles HTTP errors with user-friendly messages.
fn handle_http_error(status: reqwest::StatusCode, url: &str) -> anyhow::Error {
    match status.as_u16() {
        404 => anyhow::anyhow!("Not found: {url}"),
        code if code >= 500 => anyhow::anyhow!("Server error ({code}): {url}"),
        code => anyhow::anyhow!("HTTP error {code}: {url}"),
    }
}

/// Parses a feed document into ordered releases applicable to `platform`.
fn parse_feed(body: &str, platform: Platform, fallback_base: &str) -> Result<Vec<ReleaseInfo>> {
    let feed: ReleaseFeed = serde_json::from_str(body).context("Release feed is not valid JSON")?;
    let base = feed
        .base_url
        .as_deref()
        .filter(|b| !b.trim().is_empty())
        .unwrap_or(fallback_base)
        .trim_end_matches('/')
        .to_string();

    let mut releases: Vec<ReleaseInfo> = feed
        .releases
        .into_iter()
        .filter(|e| is_version_dir_name(e.version.trim()))
        .filter(|e| {
            e.dart_sdk_arch
                .as_deref()
                .is_none_or(|arch| arch == platform.arch())
        })
        .map(|e| {
            let version = e.version.trim().to_string();
            let channel = Channel::from_feed(&e.channel, &version);
            let download_url = if e.archive.starts_with("http://") || e.archive.starts_with("https://") {
                e.archive
            } else if e.archive.is_empty() {
                fallback_archive_url(&base, platform, &version, channel)
            } else {
                format!("{base}/{}", e.archive.trim_start_matches('/'))
            };
            ReleaseInfo {
                release_date: parse_release_date(&e.release_date),
                changelog_url: format!("{CHANGELOG_BASE}/{version}"),
                hash: e.hash.filter(|h| !h.is_empty()),
                sha256: e.sha256.filter(|h| !h.is_empty()).map(|h| h.to_lowercase()),
                version,
                channel,
                download_url,
            }
        })
        .collect();

    sort_releases(&mut releases);
    Ok(releases)
}

/// Turns release-looking tags into releases with conventional archive URLs.
fn releases_from_tags(tags: Vec<TagEntry>, platform: Platform, base: &str) -> Vec<ReleaseInfo> {
    let base = base.trim_end_matches('/');
    let mut releases: Vec<ReleaseInfo> = tags
        .into_iter()
        .filter_map(|tag| {
            let version = version_from_tag(&tag.name)?;
            let channel = channel_from_tag(&version);
            Some(ReleaseInfo {
                download_url: fallback_archive_url(base, platform, &version, channel),
                changelog_url: format!("{CHANGELOG_BASE}/{version}"),
                release_date: None,
                hash: tag.commit.map(|c| c.sha).filter(|sha| !sha.is_empty()),
                sha256: None,
                version,
                channel,
            })
        })
        .collect();
    sort_releases(&mut releases);
    releases.dedup_by(|a, b| a.version == b.version && a.channel == b.channel);
    releases
}

/// `v3.24.0` and `3.25.0-0.1.pre` are releases; `flutter-3.0-candidate.0` is not.
fn version_from_tag(name: &str) -> Option<String> {
    let version = name.trim().trim_start_matches('v');
    let core = version.split(['-', '+']).next()?;
    let parts: Vec<&str> = core.split('.').collect();
    let numeric = parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    let clean = version
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+'));
    (numeric && clean && is_version_dir_name(version)).then(|| version.to_string())
}

/// Tags carry no channel. `-N.M.pre` suffixes are beta builds.
fn channel_from_tag(version: &str) -> Channel {
    let beta_pre = version.split_once('-').is_some_and(|(_, suffix)| {
        suffix.strip_suffix(".pre").is_some_and(|numbers| {
            let mut parts = numbers.split('.');
            matches!(
                (parts.next(), parts.next(), parts.next()),
                (Some(a), Some(b), None)
                    if [a, b].iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
            )
        })
    });
    if beta_pre {
        Channel::Beta
    } else {
        Channel::infer_from_version(version)
    }
}

/// Builds the conventional archive location when the feed omits one.
fn fallback_archive_url(base: &str, platform: Platform, version: &str, channel: Channel) -> String {
    let os = platform.os();
    let ext = if os == "linux" { "tar.xz" } else { "zip" };
    let arch = if platform == Platform::MacosArm64 { "arm64_" } else { "" };
    format!("{base}/{channel}/{os}/flutter_{os}_{arch}{version}-{channel}.{ext}")
}

fn parse_release_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Merges a fresh fetch into the previously known set, keyed by version and channel.
/// Fresh entries win; entries absent from the fresh fetch are kept.
fn merge_releases(previous: Vec<ReleaseInfo>, fresh: Vec<ReleaseInfo>) -> Vec<ReleaseInfo> {
    let mut by_key: HashMap<(String, Channel), ReleaseInfo> = previous
        .into_iter()
        .map(|r| ((r.version.clone(), r.channel), r))
        .collect();
    for release in fresh {
        by_key.insert((release.version.clone(), release.channel), release);
    }
    let mut merged: Vec<ReleaseInfo> = by_key.into_values().collect();
    sort_releases(&mut merged);
    merged
}

/// Orders by release date (newest first, undated last), then by version.
fn sort_releases(releases: &mut [ReleaseInfo]) {
    releases.sort_by(|a, b| {
        let by_date = match (a.release_date, b.release_date) {
            (Some(a), Some(b)) => b.cmp(&a),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_date.then_with(|| compare_versions(&b.version, &a.version))
    });
}

/// Compares two version strings; semver when both parse, otherwise the
/// leading `major.minor.patch` numbers.
fn compare_versions(a: &str, b: &str) -> Ordering {
    match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => numeric_prefix(a).cmp(&numeric_prefix(b)).then_with(|| a.cmp(b)),
    }
}

fn numeric_prefix(version: &str) -> (u64, u64, u64) {
    let mut parts = version
        .trim_start_matches('v')
        .split(|c: char| !c.is_ascii_digit())
        .take(3)
        .map(|p| p.parse::<u64>().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}
