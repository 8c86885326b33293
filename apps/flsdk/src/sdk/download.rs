//! HTTP download engine for SDK archives.
//!
//! Downloads stream into a `<destination>.part` file that is renamed onto the
//! destination only after the body is complete, so a destination path that
//! exists is always a whole file. A `.part` left behind by a failed or
//! cancelled transfer is resumed with a `Range` request on the next attempt.
//!
//! ## Features
//!
//! - Streaming downloads with throttled progress events
//! - Retry with exponential backoff and jitter for transient failures
//! - Resume from a partial file when the server answers `206 Partial Content`
//! - Cooperative cancellation through [`CancelToken`]
//! - One transfer per destination: concurrent callers attach to it
//!
//! Transient failures are connection errors, stalled bodies, truncated bodies,
//! `408`, `416`, `429` and `5xx`. Other `4xx` responses fail at once.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::anyhow;
use futures_util::StreamExt;
use rand::Rng;
use reqwest::StatusCode;
use reqwest::header::RANGE;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

use crate::config::DownloadSettings;
use crate::errors::SdkError;

/// User-Agent header for archive requests.
const USER_AGENT: &str = concat!("flsdk/", env!("CARGO_PKG_VERSION"));

/// How often waiters and backoff sleeps look at their cancel token.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Buffered progress events per transfer; slow listeners skip ahead.
const EVENT_CAPACITY: usize = 64;

/// Progress event emitted during downloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// An attempt received its response headers.
    Started {
        url: String,
        /// Full archive size, when the server reports it.
        total: Option<u64>,
        /// Bytes already on disk from an earlier attempt.
        resumed_from: u64,
    },
    /// Download progress update.
    Progress {
        downloaded: u64,
        total: Option<u64>,
        /// Bytes per second over the current attempt.
        speed: u64,
    },
    /// An attempt failed and another one is scheduled.
    Retrying {
        attempt: u32,
        max_attempts: u32,
        error: String,
    },
    Completed,
    Failed {
        error: String,
    },
    Cancelled,
}

/// Callback type for receiving progress updates during downloads.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Lifecycle of a download task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadStatus {
    Pending,
    InProgress,
    /// Waiting out a retry backoff.
    Paused,
    Completed,
    Failed {
        error: String,
    },
    Cancelled,
}

impl DownloadStatus {
    /// Returns `true` once no further transitions can happen.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed { .. } | Self::Cancelled
        )
    }
}

/// Observable state of one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub source_url: String,
    pub destination: PathBuf,
    pub total_bytes: Option<u64>,
    pub bytes_transferred: u64,
    /// 1-based attempt number; 0 before the first attempt.
    pub attempt: u32,
    pub resumed_from: u64,
    /// Bytes per second over the current attempt.
    pub speed: u64,
    pub status: DownloadStatus,
}

impl DownloadTask {
    fn new(url: &str, destination: &Path) -> Self {
        Self {
            source_url: url.to_string(),
            destination: destination.to_path_buf(),
            total_bytes: None,
            bytes_transferred: 0,
            attempt: 0,
            resumed_from: 0,
            speed: 0,
            status: DownloadStatus::Pending,
        }
    }
}

/// Cooperative cancellation flag shared between a caller and its transfer.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Exponential backoff with jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempt ceiling, counting the first attempt.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn from_settings(settings: &DownloadSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    ///
    /// The delay doubles with each attempt with +/- 25% jitter and never
    /// exceeds `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        let exponent = attempt.saturating_sub(1).min(20);
        let delay = base_ms.saturating_mul(1 << exponent).min(max_ms);
        let jitter_range = delay / 4;
        let jitter = rand::rng().random_range(0..=jitter_range * 2);
        Duration::from_millis((delay - jitter_range + jitter).min(max_ms))
    }
}

#[derive(Clone)]
struct ActiveDownload {
    state: watch::Receiver<DownloadTask>,
    events: broadcast::Sender<ProgressEvent>,
}

type ActiveMap = Arc<Mutex<HashMap<PathBuf, ActiveDownload>>>;

/// Streams archives to disk with retry, resume and deduplication.
pub struct DownloadEngine {
    client: reqwest::Client,
    policy: RetryPolicy,
    chunk_timeout: Duration,
    progress_interval: Duration,
    active: ActiveMap,
}

impl DownloadEngine {
    /// Creates an engine from download settings.
    ///
    /// # Errors
    ///
    /// Returns `DownloadFailed` if the HTTP client cannot be built.
    pub fn new(settings: &DownloadSettings) -> Result<Self, SdkError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                SdkError::download_failed_with_source("-", "Failed to create HTTP client", e)
            })?;

        Ok(Self {
            client,
            policy: RetryPolicy::from_settings(settings),
            chunk_timeout: Duration::from_secs(settings.chunk_timeout_secs.max(1)),
            progress_interval: Duration::from_millis(settings.progress_interval_ms),
            active: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Current state of the transfer targeting `destination`, if one is running.
    #[must_use]
    pub fn status(&self, destination: &Path) -> Option<DownloadTask> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(destination)
            .map(|a| a.state.borrow().clone())
    }

    /// Downloads `url` to `destination`.
    ///
    /// If `destination` already exists it is returned untouched. If another
    /// caller is already downloading to `destination`, this call attaches to
    /// that transfer and shares its outcome; cancelling an attached call only
    /// detaches it.
    ///
    /// # Errors
    ///
    /// Returns `DownloadCancelled` when `cancel` fires, or `DownloadFailed`
    /// on a non-retryable response or once retries are exhausted.
    pub async fn download(
        &self,
        url: &str,
        destination: &Path,
        progress: Option<ProgressCallback>,
        cancel: &CancelToken,
    ) -> Result<PathBuf, SdkError> {
        if destination.is_file() {
            tracing::debug!("Archive already present: {}", destination.display());
            if let Some(callback) = &progress {
                callback(ProgressEvent::Completed);
            }
            return Ok(destination.to_path_buf());
        }

        let (state, events, owner) = {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            let running = active
                .get(destination)
                .filter(|a| !a.state.borrow().status.is_terminal())
                .cloned();
            match running {
                Some(existing) => {
                    tracing::debug!("Attaching to running download of {}", destination.display());
                    (existing.state, existing.events.subscribe(), false)
                }
                None => {
                    let (state_tx, state_rx) =
                        watch::channel(DownloadTask::new(url, destination));
                    let (events_tx, events_rx) = broadcast::channel(EVENT_CAPACITY);
                    active.insert(
                        destination.to_path_buf(),
                        ActiveDownload {
                            state: state_rx.clone(),
                            events: events_tx.clone(),
                        },
                    );
                    let transfer = Transfer {
                        client: self.client.clone(),
                        url: url.to_string(),
                        destination: destination.to_path_buf(),
                        temp: part_path(destination),
                        policy: self.policy,
                        chunk_timeout: self.chunk_timeout,
                        progress_interval: self.progress_interval,
                        cancel: cancel.clone(),
                        state: state_tx,
                        events: events_tx,
                        active: self.active.clone(),
                    };
                    tokio::spawn(transfer.run());
                    (state_rx, events_rx, true)
                }
            }
        };

        follow(url, state, events, progress, cancel, owner).await
    }
}

/// Path of the partial file for `destination`.
#[must_use]
pub fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Waits for a transfer to finish, forwarding its events to `progress`.
async fn follow(
    url: &str,
    mut state: watch::Receiver<DownloadTask>,
    mut events: broadcast::Receiver<ProgressEvent>,
    progress: Option<ProgressCallback>,
    cancel: &CancelToken,
    owner: bool,
) -> Result<PathBuf, SdkError> {
    let forward = |event: ProgressEvent| {
        if let Some(callback) = &progress {
            callback(event);
        }
    };
    let mut events_open = true;

    loop {
        if state.borrow_and_update().status.is_terminal() {
            break;
        }

        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            event = events.recv(), if events_open => match event {
                Ok(event) => forward(event),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => events_open = false,
            },
            () = tokio::time::sleep(CANCEL_POLL), if !owner => {
                if cancel.is_cancelled() {
                    tracing::debug!("Detached from shared download of {url}");
                    forward(ProgressEvent::Cancelled);
                    return Err(SdkError::download_cancelled(url));
                }
            }
        }
    }

    // Terminal events are published before the terminal status.
    while let Ok(event) = events.try_recv() {
        forward(event);
    }

    let task = state.borrow().clone();
    match task.status {
        DownloadStatus::Completed => Ok(task.destination),
        DownloadStatus::Cancelled => Err(SdkError::download_cancelled(url)),
        DownloadStatus::Failed { error } => Err(SdkError::download_failed(url, error)),
        _ => Err(SdkError::download_failed(url, "transfer ended unexpectedly")),
    }
}

/// Why a single attempt ended early.
enum AttemptError {
    /// Worth another attempt after a backoff.
    Transient(anyhow::Error),
    /// Retrying cannot help.
    Fatal(String),
    Cancelled,
}

/// One running transfer, owned by a spawned task.
struct Transfer {
    client: reqwest::Client,
    url: String,
    destination: PathBuf,
    temp: PathBuf,
    policy: RetryPolicy,
    chunk_timeout: Duration,
    progress_interval: Duration,
    cancel: CancelToken,
    state: watch::Sender<DownloadTask>,
    events: broadcast::Sender<ProgressEvent>,
    active: ActiveMap,
}

impl Transfer {
    async fn run(self) {
        let (status, event) = match self.attempts().await {
            Ok(()) => {
                tracing::info!("Downloaded {} to {}", self.url, self.destination.display());
                (DownloadStatus::Completed, ProgressEvent::Completed)
            }
            Err(AttemptError::Cancelled) => {
                tracing::info!("Download of {} cancelled", self.url);
                (DownloadStatus::Cancelled, ProgressEvent::Cancelled)
            }
            Err(failure) => {
                let error = match failure {
                    AttemptError::Transient(e) => format!("{e:#}"),
                    AttemptError::Fatal(message) => message,
                    AttemptError::Cancelled => "cancelled".to_string(),
                };
                tracing::warn!("Download of {} failed: {error}", self.url);
                (
                    DownloadStatus::Failed {
                        error: error.clone(),
                    },
                    ProgressEvent::Failed { error },
                )
            }
        };

        {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            let ours = active
                .get(&self.destination)
                .is_some_and(|a| a.state.same_channel(&self.state.subscribe()));
            if ours {
                active.remove(&self.destination);
            }
        }

        self.emit(event);
        self.state.send_modify(|task| task.status = status);
    }

    async fn attempts(&self) -> Result<(), AttemptError> {
        if let Some(parent) = self.destination.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AttemptError::Fatal(format!(
                    "Failed to create directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let max_attempts = self.policy.max_attempts;
        for attempt in 1..=max_attempts {
            if self.cancel.is_cancelled() {
                return Err(AttemptError::Cancelled);
            }
            self.state.send_modify(|task| {
                task.attempt = attempt;
                task.status = DownloadStatus::InProgress;
            });

            match self.fetch_once().await {
                Ok(()) => {
                    tokio::fs::rename(&self.temp, &self.destination)
                        .await
                        .map_err(|e| {
                            AttemptError::Fatal(format!(
                                "Failed to rename {} to {}: {e}",
                                self.temp.display(),
                                self.destination.display()
                            ))
                        })?;
                    return Ok(());
                }
                Err(AttemptError::Transient(error)) if attempt < max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    tracing::warn!(
                        "Download attempt {attempt}/{max_attempts} for {} failed: {error:#}; retrying in {delay:?}",
                        self.url
                    );
                    self.state
                        .send_modify(|task| task.status = DownloadStatus::Paused);
                    self.emit(ProgressEvent::Retrying {
                        attempt,
                        max_attempts,
                        error: format!("{error:#}"),
                    });
                    if !self.sleep_unless_cancelled(delay).await {
                        return Err(AttemptError::Cancelled);
                    }
                }
                Err(AttemptError::Transient(error)) => {
                    return Err(AttemptError::Fatal(format!(
                        "gave up after {max_attempts} attempts: {error:#}"
                    )));
                }
                Err(other) => return Err(other),
            }
        }

        Err(AttemptError::Fatal(format!(
            "gave up after {max_attempts} attempts"
        )))
    }

    async fn fetch_once(&self) -> Result<(), AttemptError> {
        let existing = tokio::fs::metadata(&self.temp)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        let mut request = self.client.get(&self.url);
        if existing > 0 {
            request = request.header(RANGE, format!("bytes={existing}-"));
        }

        let response = tokio::time::timeout(self.chunk_timeout, request.send())
            .await
            .map_err(|_| AttemptError::Transient(anyhow!("no response within {:?}", self.chunk_timeout)))?
            .map_err(|e| AttemptError::Transient(anyhow::Error::new(e).context(format!("Failed to connect to {}", self.url))))?;

        let status = response.status();
        let resume = match status {
            StatusCode::PARTIAL_CONTENT => true,
            StatusCode::OK => false,
            StatusCode::RANGE_NOT_SATISFIABLE => {
                let _ = tokio::fs::remove_file(&self.temp).await;
                return Err(AttemptError::Transient(anyhow!(
                    "server rejected resume offset {existing}"
                )));
            }
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                let _ = tokio::fs::remove_file(&self.temp).await;
                return Err(AttemptError::Fatal(format!("HTTP {status}: archive not found")));
            }
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
                return Err(AttemptError::Transient(anyhow!("HTTP {status}")));
            }
            s if s.is_server_error() => {
                return Err(AttemptError::Transient(anyhow!("HTTP {status}")));
            }
            _ => return Err(AttemptError::Fatal(format!("HTTP {status}"))),
        };

        let offset = if resume { existing } else { 0 };
        let total = response.content_length().map(|len| len + offset);
        if resume {
            tracing::info!("Resuming {} at byte {offset}", self.url);
        }

        self.emit(ProgressEvent::Started {
            url: self.url.clone(),
            total,
            resumed_from: offset,
        });
        self.state.send_modify(|task| {
            task.total_bytes = total;
            task.resumed_from = offset;
            task.bytes_transferred = offset;
            task.speed = 0;
        });

        let mut options = tokio::fs::OpenOptions::new();
        options.create(true);
        if resume {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }
        let mut file = options.open(&self.temp).await.map_err(|e| {
            AttemptError::Fatal(format!("Failed to open {}: {e}", self.temp.display()))
        })?;

        let mut stream = response.bytes_stream();
        let mut downloaded = offset;
        let started = Instant::now();
        let mut last_report = Instant::now();

        loop {
            let next = tokio::time::timeout(self.chunk_timeout, stream.next())
                .await
                .map_err(|_| {
                    AttemptError::Transient(anyhow!(
                        "no data received for {:?}",
                        self.chunk_timeout
                    ))
                })?;
            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(|e| {
                AttemptError::Transient(
                    anyhow::Error::new(e).context(format!("Failed to read chunk from {}", self.url)),
                )
            })?;

            file.write_all(&chunk).await.map_err(|e| {
                AttemptError::Fatal(format!("Failed to write to {}: {e}", self.temp.display()))
            })?;
            downloaded += chunk.len() as u64;

            if self.cancel.is_cancelled() {
                let _ = file.flush().await;
                return Err(AttemptError::Cancelled);
            }

            if last_report.elapsed() >= self.progress_interval {
                self.report(downloaded, total, offset, started);
                last_report = Instant::now();
            }
        }

        file.flush().await.map_err(|e| {
            AttemptError::Fatal(format!("Failed to flush {}: {e}", self.temp.display()))
        })?;
        self.report(downloaded, total, offset, started);

        match total {
            Some(total) if downloaded < total => Err(AttemptError::Transient(anyhow!(
                "connection closed after {downloaded} of {total} bytes"
            ))),
            _ => Ok(()),
        }
    }

    fn report(&self, downloaded: u64, total: Option<u64>, offset: u64, started: Instant) {
        let elapsed_secs = started.elapsed().as_secs_f64();
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let speed = if elapsed_secs > 0.0 {
            ((downloaded - offset) as f64 / elapsed_secs) as u64
        } else {
            0
        };

        self.state.send_modify(|task| {
            task.bytes_transferred = downloaded;
            task.speed = speed;
        });
        self.emit(ProgressEvent::Progress {
            downloaded,
            total,
            speed,
        });
    }

    /// Sleeps for `delay`, returning `false` early if cancellation is requested.
    async fn sleep_unless_cancelled(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            tokio::time::sleep(CANCEL_POLL.min(deadline - now)).await;
        }
    }

    fn emit(&self, event: ProgressEvent) {
        // No subscribers left is fine; the transfer still completes.
        let _ = self.events.send(event);
    }
}

/// Formats bytes into a human-readable string (KB, MB, GB).
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    #[allow(clippy::cast_precision_loss)]
    let bytes_f = bytes as f64;

    if bytes_f >= GB {
        format!("{:.2} GB", bytes_f / GB)
    } else if bytes_f >= MB {
        format!("{:.2} MB", bytes_f / MB)
    } else if bytes_f >= KB {
        format!("{:.2} KB", bytes_f / KB)
    } else {
        format!("{bytes} B")
    }
}

/// Formats speed (bytes/sec) into a human-readable string.
#[must_use]
pub fn format_speed(bytes_per_sec: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode as HttpStatus, header};
    use axum::routing::get;
    use std::sync::atomic::AtomicUsize;

    fn payload() -> Vec<u8> {
        (0..64 * 1024).map(|i| (i % 251) as u8).collect()
    }

    fn fast_settings() -> DownloadSettings {
        DownloadSettings {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 40,
            chunk_timeout_secs: 5,
            progress_interval_ms: 0,
            ..DownloadSettings::default()
        }
    }

    async fn spawn_server(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// Serves the payload at `/sdk.zip`, honouring `Range: bytes=N-`.
    async fn range_server(hits: Arc<AtomicUsize>) -> String {
        let data = Arc::new(payload());
        let app = Router::new().route(
            "/sdk.zip",
            get(move |headers: HeaderMap| {
                let data = data.clone();
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    let start = headers
                        .get(header::RANGE)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.strip_prefix("bytes="))
                        .and_then(|v| v.trim_end_matches('-').parse::<usize>().ok());
                    match start {
                        Some(start) => (HttpStatus::PARTIAL_CONTENT, data[start..].to_vec()),
                        None => (HttpStatus::OK, data.to_vec()),
                    }
                }
            }),
        );
        spawn_server(app).await
    }

    fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<ProgressEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let callback: ProgressCallback = Arc::new(move |e: ProgressEvent| sink.lock().unwrap().push(e));
        (callback, events)
    }

    #[test]
    fn retry_delay_grows_and_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(3000),
        };
        let first = policy.delay_for(1);
        assert!(first >= Duration::from_millis(750) && first <= Duration::from_millis(1250));
        let second = policy.delay_for(2);
        assert!(second >= Duration::from_millis(1500) && second <= Duration::from_millis(2500));
        for attempt in 3..10 {
            assert!(policy.delay_for(attempt) <= Duration::from_millis(3000));
        }
    }

    #[test]
    fn status_terminality() {
        assert!(!DownloadStatus::Pending.is_terminal());
        assert!(!DownloadStatus::Paused.is_terminal());
        assert!(DownloadStatus::Completed.is_terminal());
        assert!(DownloadStatus::Cancelled.is_terminal());
        assert!(
            DownloadStatus::Failed {
                error: "x".to_string()
            }
            .is_terminal()
        );
    }

    #[test]
    fn part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/d/flutter.tar.xz")),
            PathBuf::from("/d/flutter.tar.xz.part")
        );
    }

    #[test]
    fn formats_sizes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_speed(1024), "1.00 KB/s");
    }

    #[tokio::test]
    async fn downloads_whole_file_and_reports_progress() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = range_server(hits.clone()).await;
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("downloads").join("sdk.zip");
        let engine = DownloadEngine::new(&fast_settings()).unwrap();
        let (callback, events) = recorder();

        let path = engine
            .download(&format!("{base}/sdk.zip"), &dest, Some(callback), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(path, dest);
        assert_eq!(std::fs::read(&dest).unwrap(), payload());
        assert!(!part_path(&dest).exists());
        let events = events.lock().unwrap();
        assert!(matches!(
            events.first(),
            Some(ProgressEvent::Started { total: Some(65536), resumed_from: 0, .. })
        ));
        assert_eq!(events.last(), Some(&ProgressEvent::Completed));
        assert!(engine.status(&dest).is_none());
    }

    #[tokio::test]
    async fn existing_destination_is_returned_without_network() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("sdk.zip");
        std::fs::write(&dest, b"cached").unwrap();
        let engine = DownloadEngine::new(&fast_settings()).unwrap();

        let path = engine
            .download("http://127.0.0.1:1/sdk.zip", &dest, None, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"cached");
    }

    #[tokio::test]
    async fn resumes_from_partial_file() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = range_server(hits.clone()).await;
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("sdk.zip");
        std::fs::write(part_path(&dest), &payload()[..1000]).unwrap();
        let engine = DownloadEngine::new(&fast_settings()).unwrap();
        let (callback, events) = recorder();

        engine
            .download(&format!("{base}/sdk.zip"), &dest, Some(callback), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), payload());
        assert!(events.lock().unwrap().iter().any(|e| matches!(
            e,
            ProgressEvent::Started { resumed_from: 1000, total: Some(65536), .. }
        )));
    }

    #[tokio::test]
    async fn missing_archive_fails_without_retry() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/missing.zip",
            get(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { HttpStatus::NOT_FOUND }
            }),
        );
        let base = spawn_server(app).await;
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("missing.zip");
        let engine = DownloadEngine::new(&fast_settings()).unwrap();

        let err = engine
            .download(&format!("{base}/missing.zip"), &dest, None, &CancelToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SdkError::DownloadFailed { .. }));
        assert!(err.to_string().contains("404"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn transient_server_error_is_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/flaky.zip",
            get(move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        (HttpStatus::SERVICE_UNAVAILABLE, Vec::new())
                    } else {
                        (HttpStatus::OK, b"archive".to_vec())
                    }
                }
            }),
        );
        let base = spawn_server(app).await;
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("flaky.zip");
        let engine = DownloadEngine::new(&fast_settings()).unwrap();
        let (callback, events) = recorder();

        engine
            .download(&format!("{base}/flaky.zip"), &dest, Some(callback), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"archive");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(events.lock().unwrap().iter().any(|e| matches!(
            e,
            ProgressEvent::Retrying { attempt: 1, max_attempts: 3, .. }
        )));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/down.zip",
            get(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { HttpStatus::INTERNAL_SERVER_ERROR }
            }),
        );
        let base = spawn_server(app).await;
        let temp = tempfile::tempdir().unwrap();
        let engine = DownloadEngine::new(&fast_settings()).unwrap();

        let err = engine
            .download(
                &format!("{base}/down.zip"),
                &temp.path().join("down.zip"),
                None,
                &CancelToken::new(),
            )
            .await
            .unwrap_err();

        assert!(err.to_string().contains("gave up after 3 attempts"));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_transfer() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = range_server(hits.clone()).await;
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("sdk.zip");
        let engine = DownloadEngine::new(&fast_settings()).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = engine
            .download(&format!("{base}/sdk.zip"), &dest, None, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, SdkError::DownloadCancelled { .. }));
        assert!(!dest.exists());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancelling_mid_transfer_keeps_part_file_only() {
        let app = Router::new().route(
            "/slow.zip",
            get(|| async {
                let chunks = futures_util::stream::unfold(0u32, |n| async move {
                    if n == 40 {
                        return None;
                    }
                    if n > 0 {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                    let chunk = axum::body::Bytes::from(vec![7u8; 1024]);
                    Some((Ok::<_, std::io::Error>(chunk), n + 1))
                });
                axum::body::Body::from_stream(chunks)
            }),
        );
        let base = spawn_server(app).await;
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("slow.zip");
        let engine = DownloadEngine::new(&fast_settings()).unwrap();
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let callback: ProgressCallback = Arc::new(move |e: ProgressEvent| {
            if matches!(e, ProgressEvent::Progress { .. }) {
                trigger.cancel();
            }
        });

        let err = engine
            .download(&format!("{base}/slow.zip"), &dest, Some(callback), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, SdkError::DownloadCancelled { .. }));
        assert!(!dest.exists());
        let kept = std::fs::metadata(part_path(&dest)).unwrap().len();
        assert!(kept > 0 && kept < 40 * 1024);
        assert!(engine.status(&dest).is_none());
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn resume_offset_is_logged_at_info() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let base = range_server(Arc::new(AtomicUsize::new(0))).await;
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("sdk.zip");
        std::fs::write(part_path(&dest), &payload()[..4096]).unwrap();
        let engine = DownloadEngine::new(&fast_settings()).unwrap();

        engine
            .download(&format!("{base}/sdk.zip"), &dest, None, &CancelToken::new())
            .await
            .unwrap();

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(
            output
                .lines()
                .any(|line| line.contains("INFO") && line.contains("at byte 4096")),
            "{output}"
        );
    }

    #[tokio::test]
    async fn concurrent_downloads_to_same_destination_share_one_transfer() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = range_server(hits.clone()).await;
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("sdk.zip");
        let engine = DownloadEngine::new(&fast_settings()).unwrap();
        let url = format!("{base}/sdk.zip");
        let (first_cancel, second_cancel) = (CancelToken::new(), CancelToken::new());

        let (a, b) = tokio::join!(
            engine.download(&url, &dest, None, &first_cancel),
            engine.download(&url, &dest, None, &second_cancel),
        );

        assert_eq!(a.unwrap(), dest);
        assert_eq!(b.unwrap(), dest);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read(&dest).unwrap(), payload());
    }
}
