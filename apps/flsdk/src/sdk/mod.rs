//! Flutter SDK lifecycle management.
//!
//! ## Module Structure
//!
//! - [`platform`] - OS and architecture detection
//! - [`paths`] - Tool root layout and atomic writes
//! - [`catalog`] - Release feed fetching, caching and resolution
//! - [`download`] - Resumable, deduplicated HTTP downloads
//! - [`verify`] - SHA256 checksum verification
//! - [`archive`] - ZIP, tar.gz and tar.xz extraction
//! - [`installer`] - Staged extraction into the managed root
//! - [`registry`] - Persistent record of installed SDKs
//! - [`binder`] - Putting the default SDK on `PATH`
//! - [`manager`] - The facade the commands use
//! - [`doctor`] - Health checks

pub mod archive;
pub mod binder;
pub mod catalog;
pub mod doctor;
pub mod download;
pub mod installer;
pub mod manager;
pub mod paths;
pub mod platform;
pub mod registry;
pub mod verify;

pub use catalog::{Channel, ReleaseInfo};
pub use download::{CancelToken, ProgressCallback, ProgressEvent, format_bytes, format_speed};
pub use manager::{Binding, InstallKind, SdkManager};
pub use paths::SdkPaths;
pub use platform::Platform;
