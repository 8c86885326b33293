//! Host platform detection.
//!
//! Flutter publishes one release feed per OS and, on macOS, separate
//! archives per CPU architecture. The platform decides which feed is read,
//! which feed entries apply and what the SDK entry point is called.

use anyhow::{Result, bail};
use std::fmt;
use std::path::{Path, PathBuf};

/// A host OS and architecture combination flsdk can manage SDKs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    /// Linux on `x86_64`
    LinuxX64,
    /// Linux on ARM64 (manual SDKs only; no official archives)
    LinuxArm64,
    /// macOS on `x86_64`
    MacosX64,
    /// macOS on ARM64 (Apple Silicon)
    MacosArm64,
    /// Windows on `x86_64`
    WindowsX64,
}

impl Platform {
    /// Detects the current platform from compile-time configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the current OS/architecture combination is not supported.
    pub fn detect() -> Result<Self> {
        #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
        {
            return Ok(Self::LinuxX64);
        }

        #[cfg(all(target_os = "linux", target_arch = "aarch64"))]
        {
            return Ok(Self::LinuxArm64);
        }

        #[cfg(all(target_os = "macos", target_arch = "x86_64"))]
        {
            return Ok(Self::MacosX64);
        }

        #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
        {
            return Ok(Self::MacosArm64);
        }

        #[cfg(all(target_os = "windows", target_arch = "x86_64"))]
        {
            return Ok(Self::WindowsX64);
        }

        #[allow(unreachable_code)]
        {
            bail!(
                "Unsupported platform: {} on {}. \
                 Supported platforms are: linux-x64, linux-arm64, macos-x64, macos-arm64, windows-x64",
                std::env::consts::OS,
                std::env::consts::ARCH
            );
        }
    }

    /// Returns the `os-arch` identifier used in messages.
    #[must_use = "returns the platform string without side effects"]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LinuxX64 => "linux-x64",
            Self::LinuxArm64 => "linux-arm64",
            Self::MacosX64 => "macos-x64",
            Self::MacosArm64 => "macos-arm64",
            Self::WindowsX64 => "windows-x64",
        }
    }

    /// Returns the OS name used in release feed file names (`releases_<os>.json`).
    #[must_use = "returns the OS string without side effects"]
    pub fn os(self) -> &'static str {
        match self {
            Self::LinuxX64 | Self::LinuxArm64 => "linux",
            Self::MacosX64 | Self::MacosArm64 => "macos",
            Self::WindowsX64 => "windows",
        }
    }

    /// Returns the architecture as spelled in the feed's `dart_sdk_arch` field.
    #[must_use = "returns the architecture string without side effects"]
    pub fn arch(self) -> &'static str {
        match self {
            Self::LinuxX64 | Self::MacosX64 | Self::WindowsX64 => "x64",
            Self::LinuxArm64 | Self::MacosArm64 => "arm64",
        }
    }

    /// Returns whether this platform is Windows.
    #[must_use = "returns platform check result without side effects"]
    pub fn is_windows(self) -> bool {
        matches!(self, Self::WindowsX64)
    }

    /// Path of the SDK entry point relative to the SDK root.
    #[must_use]
    pub fn entry_point(self) -> PathBuf {
        if self.is_windows() {
            Path::new("bin").join("flutter.bat")
        } else {
            Path::new("bin").join("flutter")
        }
    }

    /// Returns `true` if `sdk_root` contains this platform's entry point.
    #[must_use]
    pub fn has_entry_point(self, sdk_root: &Path) -> bool {
        sdk_root.join(self.entry_point()).is_file()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
