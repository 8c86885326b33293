//! Durable record of installed SDKs.
//!
//! The registry is the single source of truth for what is installed. Records
//! are keyed by path and at most one of them is the default. Every mutation
//! runs as one read-modify-write transaction on the backing [`RecordStore`],
//! behind an in-process writer lock, so concurrent installs, switches and
//! removals can never leave two defaults or a default pointing at a removed
//! record.
//!
//! The default store keeps `registry.json` under the tool root:
//!
//! ```json
//! {
//!   "version": 1,
//!   "sdks": [
//!     {
//!       "path": "/home/u/.flsdk/sdks/3.24.0",
//!       "version": "3.24.0",
//!       "channel": "stable",
//!       "is_default": true,
//!       "is_managed": true,
//!       "installed_at": "2024-08-07T10:00:00Z"
//!     }
//!   ]
//! }
//! ```
//!
//! Writers also take an exclusive lock on `registry.lock` so that two
//! `flsdk` processes serialize as well, and replace the document with an
//! atomic rename so readers never see a half-written file.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::catalog::Channel;
use super::paths::{SdkPaths, write_atomic};
use crate::errors::SdkError;

/// Current on-disk document version.
const DOCUMENT_VERSION: u32 = 1;

/// How long a writer waits for another process to release the registry.
const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// One installed SDK.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdkRecord {
    /// Unique key: the SDK root directory.
    pub path: PathBuf,
    pub version: String,
    pub channel: Channel,
    #[serde(default)]
    pub is_default: bool,
    /// `true` when flsdk created the directory under the managed root.
    #[serde(default)]
    pub is_managed: bool,
    pub installed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl SdkRecord {
    /// Draft record for an SDK installed under the managed root.
    #[must_use]
    pub fn managed(path: impl Into<PathBuf>, version: impl Into<String>, channel: Channel) -> Self {
        Self {
            path: path.into(),
            version: version.into(),
            channel,
            is_default: false,
            is_managed: true,
            installed_at: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Draft record for an installation the user pointed flsdk at.
    #[must_use]
    pub fn manual(path: impl Into<PathBuf>, version: impl Into<String>, channel: Channel) -> Self {
        Self {
            is_managed: false,
            ..Self::managed(path, version, channel)
        }
    }

    /// Directory holding the SDK executables.
    #[must_use]
    pub fn bin_dir(&self) -> PathBuf {
        self.path.join("bin")
    }
}

/// Persistence behind the registry.
///
/// `transact` must run `apply` against the current records and persist the
/// result atomically, or persist nothing if `apply` fails.
pub trait RecordStore: Send + Sync {
    /// Reads every record.
    ///
    /// # Errors
    ///
    /// Returns `RegistryIo` or `RegistryCorrupted` if the records cannot be read.
    fn load(&self) -> Result<Vec<SdkRecord>, SdkError>;

    /// Applies a read-modify-write update.
    ///
    /// # Errors
    ///
    /// Returns the error from `apply`, or `RegistryIo` if persisting fails.
    fn transact(
        &self,
        apply: &mut dyn FnMut(&mut Vec<SdkRecord>) -> Result<(), SdkError>,
    ) -> Result<(), SdkError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistryDocument {
    version: u32,
    #[serde(default)]
    sdks: Vec<SdkRecord>,
}

/// `registry.json` guarded by a cross-process lock file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    file: PathBuf,
    lock_file: PathBuf,
}

impl JsonFileStore {
    #[must_use]
    pub fn new(paths: &SdkPaths) -> Self {
        Self {
            file: paths.registry_file(),
            lock_file: paths.registry_lock_file(),
        }
    }

    fn read(&self) -> Result<Vec<SdkRecord>, SdkError> {
        let content = match std::fs::read_to_string(&self.file) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(SdkError::registry_io(
                    format!("Failed to read {}", self.file.display()),
                    e,
                ));
            }
        };

        let document: RegistryDocument = serde_json::from_str(&content).map_err(|e| {
            SdkError::registry_corrupted(format!("{} is not valid: {e}", self.file.display()))
        })?;
        if document.version > DOCUMENT_VERSION {
            return Err(SdkError::registry_corrupted(format!(
                "{} has version {}, newer than this flsdk understands",
                self.file.display(),
                document.version
            )));
        }
        Ok(document.sdks)
    }

    fn write(&self, records: &[SdkRecord]) -> Result<(), SdkError> {
        let document = RegistryDocument {
            version: DOCUMENT_VERSION,
            sdks: records.to_vec(),
        };
        let content = serde_json::to_vec_pretty(&document)
            .map_err(|e| SdkError::registry_io("Failed to serialize registry", e))?;
        write_atomic(&self.file, &content)
            .map_err(|e| SdkError::registry_io(format!("Failed to write {}", self.file.display()), e))
    }

    /// Takes the exclusive writer lock, waiting up to [`LOCK_TIMEOUT`].
    /// The lock is released when the returned file is dropped.
    fn lock(&self) -> Result<File, SdkError> {
        if let Some(parent) = self.lock_file.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SdkError::registry_io(format!("Failed to create {}", parent.display()), e)
            })?;
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_file)
            .map_err(|e| {
                SdkError::registry_io(format!("Failed to open {}", self.lock_file.display()), e)
            })?;

        let start = Instant::now();
        loop {
            match fs2::FileExt::try_lock_exclusive(&lock_file) {
                Ok(()) => return Ok(lock_file),
                Err(e) if is_contended(&e) => {
                    if start.elapsed() >= LOCK_TIMEOUT {
                        return Err(SdkError::registry_io(
                            format!(
                                "Timed out after {LOCK_TIMEOUT:?} waiting for {}; another flsdk may be running",
                                self.lock_file.display()
                            ),
                            e,
                        ));
                    }
                    std::thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => {
                    return Err(SdkError::registry_io(
                        format!("Failed to lock {}", self.lock_file.display()),
                        e,
                    ));
                }
            }
        }
    }
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl RecordStore for JsonFileStore {
    fn load(&self) -> Result<Vec<SdkRecord>, SdkError> {
        self.read()
    }

    fn transact(
        &self,
        apply: &mut dyn FnMut(&mut Vec<SdkRecord>) -> Result<(), SdkError>,
    ) -> Result<(), SdkError> {
        let _lock = self.lock()?;
        let mut records = self.read()?;
        apply(&mut records)?;
        self.write(&records)
    }
}

/// Installed-SDK bookkeeping with the single-default invariant.
pub struct Registry {
    store: Box<dyn RecordStore>,
    writer: Mutex<()>,
}

impl Registry {
    #[must_use]
    pub fn new(store: impl RecordStore + 'static) -> Self {
        Self {
            store: Box::new(store),
            writer: Mutex::new(()),
        }
    }

    /// Opens the JSON registry under the tool root.
    #[must_use]
    pub fn open(paths: &SdkPaths) -> Self {
        Self::new(JsonFileStore::new(paths))
    }

    /// Inserts `record`, or updates the record with the same path.
    ///
    /// An updated record keeps its original `installed_at`. If `record` is
    /// the default, every other record loses the flag in the same update.
    ///
    /// # Errors
    ///
    /// Returns `RegistryCorrupted` if the stored records already violate an
    /// invariant, or `RegistryIo` if they cannot be persisted.
    pub fn add(&self, record: SdkRecord) -> Result<SdkRecord, SdkError> {
        let mut stored = None;
        self.mutate(&mut |records: &mut Vec<SdkRecord>| {
            let mut record = record.clone();
            if record.is_default {
                for other in records.iter_mut() {
                    other.is_default = false;
                }
            }
            match records.iter_mut().find(|r| r.path == record.path) {
                Some(existing) => {
                    record.installed_at = existing.installed_at;
                    *existing = record.clone();
                }
                None => records.push(record.clone()),
            }
            stored = Some(record);
            Ok(())
        })?;
        tracing::debug!("Registered SDK at {}", record.path.display());
        stored.ok_or_else(|| SdkError::registry_corrupted("record was not stored"))
    }

    /// All records, in storage order.
    ///
    /// # Errors
    ///
    /// Returns `RegistryCorrupted` if more than one default is stored, or the
    /// store's read error.
    pub fn list(&self) -> Result<Vec<SdkRecord>, SdkError> {
        let records = self.store.load()?;
        check_invariants(&records)?;
        Ok(records)
    }

    /// Looks up a record by path.
    ///
    /// # Errors
    ///
    /// Returns `SdkNotFound` if no record has this path.
    pub fn get(&self, path: &Path) -> Result<SdkRecord, SdkError> {
        self.list()?
            .into_iter()
            .find(|r| r.path == path)
            .ok_or_else(|| SdkError::sdk_not_found(path))
    }

    /// The single default record.
    ///
    /// # Errors
    ///
    /// Returns `NoDefaultSdk` if no record is the default.
    pub fn get_default(&self) -> Result<SdkRecord, SdkError> {
        self.list()?
            .into_iter()
            .find(|r| r.is_default)
            .ok_or(SdkError::NoDefaultSdk)
    }

    /// Makes the record at `path` the only default.
    ///
    /// # Errors
    ///
    /// Returns `SdkNotFound` if `path` is not registered.
    pub fn set_default(&self, path: &Path) -> Result<SdkRecord, SdkError> {
        let mut chosen = None;
        self.mutate(&mut |records: &mut Vec<SdkRecord>| {
            if !records.iter().any(|r| r.path == path) {
                return Err(SdkError::sdk_not_found(path));
            }
            for record in records.iter_mut() {
                record.is_default = record.path == path;
                if record.is_default {
                    chosen = Some(record.clone());
                }
            }
            Ok(())
        })?;
        tracing::debug!("Default SDK is now {}", path.display());
        chosen.ok_or_else(|| SdkError::sdk_not_found(path))
    }

    /// Removes the record at `path` and returns it.
    ///
    /// Removing the default leaves the registry without one; no other record
    /// is promoted.
    ///
    /// # Errors
    ///
    /// Returns `SdkNotFound` if `path` is not registered.
    pub fn remove(&self, path: &Path) -> Result<SdkRecord, SdkError> {
        let mut removed = None;
        self.mutate(&mut |records: &mut Vec<SdkRecord>| {
            let index = records
                .iter()
                .position(|r| r.path == path)
                .ok_or_else(|| SdkError::sdk_not_found(path))?;
            removed = Some(records.remove(index));
            Ok(())
        })?;
        tracing::debug!("Unregistered SDK at {}", path.display());
        removed.ok_or_else(|| SdkError::sdk_not_found(path))
    }

    fn mutate(
        &self,
        apply: &mut dyn FnMut(&mut Vec<SdkRecord>) -> Result<(), SdkError>,
    ) -> Result<(), SdkError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        self.store.transact(&mut |records: &mut Vec<SdkRecord>| {
            check_invariants(records)?;
            apply(records)?;
            check_invariants(records)
        })
    }
}

/// Fails on duplicate paths or more than one default.
fn check_invariants(records: &[SdkRecord]) -> Result<(), SdkError> {
    let defaults: Vec<&SdkRecord> = records.iter().filter(|r| r.is_default).collect();
    if defaults.len() > 1 {
        let paths: Vec<String> = defaults.iter().map(|r| r.path.display().to_string()).collect();
        return Err(SdkError::registry_corrupted(format!(
            "{} records are marked default: {}",
            defaults.len(),
            paths.join(", ")
        )));
    }

    let mut seen = HashSet::new();
    for record in records {
        if !seen.insert(&record.path) {
            return Err(SdkError::registry_corrupted(format!(
                "{} is registered more than once",
                record.path.display()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;

    /// In-memory store for tests.
    #[derive(Default)]
    pub(crate) struct MemoryStore {
        records: Mutex<Vec<SdkRecord>>,
    }

    impl MemoryStore {
        pub(crate) fn with_records(records: Vec<SdkRecord>) -> Self {
            Self {
                records: Mutex::new(records),
            }
        }
    }

    impl RecordStore for MemoryStore {
        fn load(&self) -> Result<Vec<SdkRecord>, SdkError> {
            Ok(self.records.lock().unwrap().clone())
        }

        fn transact(
            &self,
            apply: &mut dyn FnMut(&mut Vec<SdkRecord>) -> Result<(), SdkError>,
        ) -> Result<(), SdkError> {
            let mut guard = self.records.lock().unwrap();
            let mut working = guard.clone();
            apply(&mut working)?;
            *guard = working;
            Ok(())
        }
    }

    fn record(path: &str, version: &str) -> SdkRecord {
        SdkRecord::managed(path, version, Channel::Stable)
    }

    fn default_count(registry: &Registry) -> usize {
        registry.list().unwrap().iter().filter(|r| r.is_default).count()
    }

    #[test]
    fn empty_registry_has_no_default() {
        let registry = Registry::new(MemoryStore::default());
        assert!(matches!(registry.get_default(), Err(SdkError::NoDefaultSdk)));
        assert!(registry.list().unwrap().is_empty());
    }

    #[test]
    fn add_upserts_by_path_and_keeps_install_time() {
        let registry = Registry::new(MemoryStore::default());
        let first = registry.add(record("/sdks/3.24.0", "3.24.0")).unwrap();

        let mut update = record("/sdks/3.24.0", "3.24.0");
        update.metadata = serde_json::json!({"note": "re-registered"});
        registry.add(update).unwrap();

        let records = registry.list().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].installed_at, first.installed_at);
        assert_eq!(records[0].metadata["note"], "re-registered");
    }

    #[test]
    fn adding_a_default_clears_other_defaults() {
        let registry = Registry::new(MemoryStore::default());
        let mut a = record("/a", "3.22.0");
        a.is_default = true;
        registry.add(a).unwrap();
        let mut b = record("/b", "3.24.0");
        b.is_default = true;
        registry.add(b).unwrap();

        assert_eq!(default_count(&registry), 1);
        assert_eq!(registry.get_default().unwrap().path, PathBuf::from("/b"));
    }

    #[test]
    fn set_default_flips_flag_atomically() {
        let registry = Registry::new(MemoryStore::default());
        registry.add(record("/a", "1")).unwrap();
        registry.add(record("/b", "2")).unwrap();

        registry.set_default(Path::new("/a")).unwrap();
        registry.set_default(Path::new("/b")).unwrap();

        assert_eq!(default_count(&registry), 1);
        assert_eq!(registry.get_default().unwrap().version, "2");
    }

    #[test]
    fn set_default_unknown_path_fails_without_change() {
        let registry = Registry::new(MemoryStore::default());
        let mut a = record("/a", "1");
        a.is_default = true;
        registry.add(a).unwrap();

        let err = registry.set_default(Path::new("/nope")).unwrap_err();
        assert!(matches!(err, SdkError::SdkNotFound { .. }));
        assert_eq!(registry.get_default().unwrap().path, PathBuf::from("/a"));
    }

    #[test]
    fn removing_default_leaves_no_default() {
        let registry = Registry::new(MemoryStore::default());
        registry.add(record("/a", "1")).unwrap();
        let mut b = record("/b", "2");
        b.is_default = true;
        registry.add(b).unwrap();

        let removed = registry.remove(Path::new("/b")).unwrap();
        assert!(removed.is_default);
        assert!(matches!(registry.get_default(), Err(SdkError::NoDefaultSdk)));
        assert_eq!(registry.list().unwrap().len(), 1);
    }

    #[test]
    fn remove_unknown_path_is_not_found() {
        let registry = Registry::new(MemoryStore::default());
        assert!(matches!(
            registry.remove(Path::new("/missing")),
            Err(SdkError::SdkNotFound { .. })
        ));
    }

    #[test]
    fn stored_double_default_is_reported_not_repaired() {
        let mut a = record("/a", "1");
        a.is_default = true;
        let mut b = record("/b", "2");
        b.is_default = true;
        let registry = Registry::new(MemoryStore::with_records(vec![a, b]));

        assert!(matches!(registry.list(), Err(SdkError::RegistryCorrupted { .. })));
        assert!(matches!(
            registry.add(record("/c", "3")),
            Err(SdkError::RegistryCorrupted { .. })
        ));
    }

    #[test]
    fn random_operation_sequences_keep_at_most_one_default() {
        let registry = Registry::new(MemoryStore::default());
        let paths = ["/a", "/b", "/c", "/d"];
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..500 {
            let path = paths[rng.random_range(0..paths.len())];
            match rng.random_range(0..3) {
                0 => {
                    let mut r = record(path, "1.0.0");
                    r.is_default = rng.random_bool(0.5);
                    registry.add(r).unwrap();
                }
                1 => {
                    let _ = registry.remove(Path::new(path));
                }
                _ => {
                    let _ = registry.set_default(Path::new(path));
                }
            }
            assert!(default_count(&registry) <= 1);
        }
    }

    #[test]
    fn json_store_round_trips_and_survives_reopen() {
        let temp = tempfile::tempdir().unwrap();
        let paths = SdkPaths::with_root(temp.path().to_path_buf());

        let registry = Registry::open(&paths);
        let mut a = record("/sdks/3.24.0", "3.24.0");
        a.is_default = true;
        registry.add(a).unwrap();
        registry.add(SdkRecord::manual("/opt/flutter", "3.19.6", Channel::Stable)).unwrap();
        drop(registry);

        let reopened = Registry::open(&paths);
        let records = reopened.list().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(reopened.get_default().unwrap().version, "3.24.0");
        assert!(!reopened.get(Path::new("/opt/flutter")).unwrap().is_managed);
    }

    #[test]
    fn json_store_rejects_malformed_document() {
        let temp = tempfile::tempdir().unwrap();
        let paths = SdkPaths::with_root(temp.path().to_path_buf());
        std::fs::write(paths.registry_file(), "{ not json").unwrap();

        let registry = Registry::open(&paths);
        assert!(matches!(registry.list(), Err(SdkError::RegistryCorrupted { .. })));
    }

    #[test]
    fn concurrent_switches_keep_a_single_default() {
        let temp = tempfile::tempdir().unwrap();
        let paths = SdkPaths::with_root(temp.path().to_path_buf());
        let registry = Arc::new(Registry::open(&paths));
        for p in ["/a", "/b", "/c"] {
            registry.add(record(p, "1")).unwrap();
        }

        let handles: Vec<_> = (0..12)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let target = ["/a", "/b", "/c"][i % 3];
                    registry.set_default(Path::new(target)).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(default_count(&registry), 1);
    }

    #[test]
    fn separate_handles_on_one_file_serialize_through_the_lock() {
        let temp = tempfile::tempdir().unwrap();
        let paths = SdkPaths::with_root(temp.path().to_path_buf());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let paths = paths.clone();
                std::thread::spawn(move || {
                    let registry = Registry::open(&paths);
                    registry.add(record(&format!("/sdk/{i}"), "1")).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(Registry::open(&paths).list().unwrap().len(), 8);
    }
}
