//! Windows user `Path` binding through `HKCU\Environment`.
//!
//! Activation rewrites the `;`-separated list in one write: segments
//! inside the managed root and the segment recorded in [`ACTIVE_BIN_VALUE`]
//! are dropped, then the new `bin` directory is prepended. The companion
//! value remembers what was inserted so a manual SDK outside the managed
//! root can be unbound later. Comparisons ignore case and trailing slashes.
//!
//! `Path` keeps its registry type. It is usually `REG_EXPAND_SZ`, and
//! rewriting it as `REG_SZ` would stop entries like `%USERPROFILE%\bin`
//! from expanding. No `WM_SETTINGCHANGE` is broadcast, so running programs
//! keep their environment and new terminals pick the change up.

use std::path::Path;

/// Registry value next to `Path` holding the directory flsdk inserted.
pub const ACTIVE_BIN_VALUE: &str = "FlsdkActiveBin";

fn normalize(segment: &str) -> String {
    segment
        .trim()
        .replace('/', "\\")
        .trim_end_matches('\\')
        .to_lowercase()
}

fn is_within(segment: &str, root: &str) -> bool {
    !root.is_empty() && (segment == root || segment.starts_with(&format!("{root}\\")))
}

/// Returns `current` with `new_bin` first and no stale flsdk entries.
///
/// Dropped segments: anything inside `managed_root`, the `previous` entry
/// flsdk inserted, duplicates of `new_bin`, and empty segments.
#[must_use]
pub fn rewrite_path_list(
    current: &str,
    managed_root: &Path,
    previous: Option<&str>,
    new_bin: &Path,
) -> String {
    let root = normalize(&managed_root.to_string_lossy());
    let previous = previous.map(normalize).filter(|p| !p.is_empty());
    let new_bin_str = new_bin.to_string_lossy().to_string();
    let new_norm = normalize(&new_bin_str);

    let kept = current.split(';').filter(|segment| {
        let norm = normalize(segment);
        !norm.is_empty()
            && !is_within(&norm, &root)
            && previous.as_deref() != Some(norm.as_str())
            && norm != new_norm
    });

    std::iter::once(new_bin_str.as_str())
        .chain(kept)
        .collect::<Vec<_>>()
        .join(";")
}

/// Returns `current` without any segment equal to `bin`.
#[must_use]
pub fn strip_path_entry(current: &str, bin: &Path) -> String {
    let target = normalize(&bin.to_string_lossy());
    current
        .split(';')
        .filter(|segment| {
            let norm = normalize(segment);
            !norm.is_empty() && norm != target
        })
        .collect::<Vec<_>>()
        .join(";")
}

/// Returns `true` if `current` has `bin` as its first segment.
#[must_use]
pub fn leads_with(current: &str, bin: &Path) -> bool {
    current
        .split(';')
        .map(normalize)
        .find(|s| !s.is_empty())
        .is_some_and(|first| first == normalize(&bin.to_string_lossy()))
}

#[cfg(windows)]
mod registry {
    use std::path::{Path, PathBuf};

    use winreg::RegKey;
    use winreg::enums::RegType::REG_EXPAND_SZ;
    use winreg::enums::{HKEY_CURRENT_USER, KEY_READ, KEY_WRITE, RegType};
    use winreg::types::ToRegValue;

    use super::{ACTIVE_BIN_VALUE, leads_with, rewrite_path_list, strip_path_entry};
    use crate::errors::SdkError;
    use crate::sdk::binder::{BindOutcome, EnvironmentBinder};

    const TARGET: &str = r"HKCU\Environment\Path";

    /// Binds by editing the per-user `Path` registry value.
    #[derive(Debug, Clone)]
    pub struct RegistryPathBinder {
        managed_root: PathBuf,
        subkey: String,
    }

    impl RegistryPathBinder {
        #[must_use]
        pub fn new(managed_root: PathBuf) -> Self {
            Self::with_subkey(managed_root, "Environment")
        }

        /// Binder over `HKCU\<subkey>` instead of `HKCU\Environment`.
        #[must_use]
        pub fn with_subkey(managed_root: PathBuf, subkey: impl Into<String>) -> Self {
            Self {
                managed_root,
                subkey: subkey.into(),
            }
        }

        fn open(&self) -> Result<RegKey, SdkError> {
            RegKey::predef(HKEY_CURRENT_USER)
                .open_subkey_with_flags(&self.subkey, KEY_READ | KEY_WRITE)
                .map_err(|e| {
                    SdkError::environment_update_failed_with_source(
                        TARGET,
                        "could not open HKCU\\Environment",
                        e,
                    )
                })
        }

        /// Type of the existing `Path` value; `REG_EXPAND_SZ` when absent.
        fn path_type(env: &RegKey) -> RegType {
            env.get_raw_value("Path")
                .map_or(REG_EXPAND_SZ, |value| value.vtype)
        }

        fn write(env: &RegKey, path: &str, active: Option<&str>) -> Result<(), SdkError> {
            let text = path.to_string();
            let mut value = text.to_reg_value();
            value.vtype = Self::path_type(env);
            env.set_raw_value("Path", &value).map_err(|e| {
                SdkError::environment_update_failed_with_source(TARGET, "could not write Path", e)
            })?;
            let sentinel = match active {
                Some(bin) => env.set_value(ACTIVE_BIN_VALUE, &bin.to_string()),
                None => match env.delete_value(ACTIVE_BIN_VALUE) {
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    other => other,
                },
            };
            sentinel.map_err(|e| {
                SdkError::environment_update_failed_with_source(
                    TARGET,
                    format!("could not update {ACTIVE_BIN_VALUE}"),
                    e,
                )
            })
        }
    }

    impl EnvironmentBinder for RegistryPathBinder {
        fn activate(&self, bin_dir: &Path) -> Result<BindOutcome, SdkError> {
            let env = self.open()?;
            let current: String = env.get_value("Path").unwrap_or_default();
            let previous: Option<String> = env.get_value(ACTIVE_BIN_VALUE).ok();

            let updated =
                rewrite_path_list(&current, &self.managed_root, previous.as_deref(), bin_dir);
            let bin = bin_dir.to_string_lossy().to_string();
            if updated == current && previous.as_deref() == Some(bin.as_str()) {
                return Ok(BindOutcome::Unchanged {
                    target: TARGET.to_string(),
                });
            }

            Self::write(&env, &updated, Some(&bin))?;
            tracing::debug!("Bound {} in {TARGET}", bin_dir.display());
            Ok(BindOutcome::Updated {
                target: TARGET.to_string(),
            })
        }

        fn deactivate(&self, bin_dir: &Path) -> Result<BindOutcome, SdkError> {
            let env = self.open()?;
            let current: String = env.get_value("Path").unwrap_or_default();
            let updated = strip_path_entry(&current, bin_dir);
            if updated == current {
                return Ok(BindOutcome::Unchanged {
                    target: TARGET.to_string(),
                });
            }

            Self::write(&env, &updated, None)?;
            Ok(BindOutcome::Updated {
                target: TARGET.to_string(),
            })
        }

        fn is_active(&self, bin_dir: &Path) -> Result<bool, SdkError> {
            let env = self.open()?;
            let current: String = env.get_value("Path").unwrap_or_default();
            Ok(leads_with(&current, bin_dir))
        }

        fn describe(&self) -> String {
            format!("user environment ({TARGET})")
        }

        fn reload_hint(&self) -> Option<String> {
            Some("open a new terminal for the change to take effect".to_string())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        struct ScratchKey(String);

        impl Drop for ScratchKey {
            fn drop(&mut self) {
                let _ = RegKey::predef(HKEY_CURRENT_USER).delete_subkey_all(&self.0);
            }
        }

        #[test]
        fn activate_keeps_expandable_path_type() {
            let scratch = ScratchKey(format!(r"Software\flsdk-tests-{:08x}", rand::random::<u32>()));
            let (key, _) = RegKey::predef(HKEY_CURRENT_USER).create_subkey(&scratch.0).unwrap();
            let text = r"%USERPROFILE%\bin;C:\Windows".to_string();
            let mut original = text.to_reg_value();
            original.vtype = REG_EXPAND_SZ;
            key.set_raw_value("Path", &original).unwrap();

            let binder = RegistryPathBinder::with_subkey(PathBuf::from(r"C:\flsdk\sdks"), &scratch.0);
            let bin = Path::new(r"C:\flsdk\sdks\3.24.0\bin");
            binder.activate(bin).unwrap();

            let raw = key.get_raw_value("Path").unwrap();
            assert_eq!(raw.vtype, REG_EXPAND_SZ);
            let path: String = key.get_value("Path").unwrap();
            assert_eq!(path, r"C:\flsdk\sdks\3.24.0\bin;%USERPROFILE%\bin;C:\Windows");

            binder.deactivate(bin).unwrap();
            assert_eq!(key.get_raw_value("Path").unwrap().vtype, REG_EXPAND_SZ);
        }
    }
}

#[cfg(windows)]
pub use registry::RegistryPathBinder;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_prepends_and_drops_managed_segments() {
        let current = r"C:\Windows;C:\Users\u\AppData\Roaming\flsdk\sdks\3.22.0\bin;C:\Tools";
        let out = rewrite_path_list(
            current,
            Path::new(r"C:\Users\u\AppData\Roaming\flsdk\sdks"),
            None,
            Path::new(r"C:\Users\u\AppData\Roaming\flsdk\sdks\3.24.0\bin"),
        );
        assert_eq!(
            out,
            r"C:\Users\u\AppData\Roaming\flsdk\sdks\3.24.0\bin;C:\Windows;C:\Tools"
        );
    }

    #[test]
    fn rewrite_is_idempotent_and_case_insensitive() {
        let root = Path::new(r"C:\flsdk\sdks");
        let bin = Path::new(r"C:\flsdk\sdks\3.24.0\bin");
        let once = rewrite_path_list(r"C:\Windows", root, None, bin);
        let twice = rewrite_path_list(&once, root, Some(r"c:\FLSDK\sdks\3.24.0\bin\"), bin);
        assert_eq!(once, twice);
    }

    #[test]
    fn rewrite_removes_previous_manual_entry_only() {
        let out = rewrite_path_list(
            r"D:\flutter\bin;C:\Windows;D:\other\bin",
            Path::new(r"C:\flsdk\sdks"),
            Some(r"D:\flutter\bin"),
            Path::new(r"C:\flsdk\sdks\3.24.0\bin"),
        );
        assert_eq!(out, r"C:\flsdk\sdks\3.24.0\bin;C:\Windows;D:\other\bin");
    }

    #[test]
    fn managed_root_prefix_does_not_match_siblings() {
        let out = rewrite_path_list(
            r"C:\flsdk\sdks-old\bin",
            Path::new(r"C:\flsdk\sdks"),
            None,
            Path::new(r"C:\flsdk\sdks\3.24.0\bin"),
        );
        assert_eq!(out, r"C:\flsdk\sdks\3.24.0\bin;C:\flsdk\sdks-old\bin");
    }

    #[test]
    fn switching_back_restores_identical_list() {
        let root = Path::new(r"C:\flsdk\sdks");
        let a = Path::new(r"C:\flsdk\sdks\3.24.0\bin");
        let b = Path::new(r"C:\flsdk\sdks\3.22.0\bin");
        let base = r"C:\Windows;C:\Tools";

        let after_a = rewrite_path_list(base, root, None, a);
        let after_b = rewrite_path_list(&after_a, root, Some(&a.to_string_lossy()), b);
        let after_a_again = rewrite_path_list(&after_b, root, Some(&b.to_string_lossy()), a);

        assert_eq!(after_a, after_a_again);
    }

    #[test]
    fn strip_and_lead_checks() {
        let bin = Path::new(r"C:\flsdk\sdks\3.24.0\bin");
        let list = r"C:\flsdk\sdks\3.24.0\bin;C:\Windows;;";
        assert!(leads_with(list, bin));
        assert_eq!(strip_path_entry(list, bin), r"C:\Windows");
        assert!(!leads_with(r"C:\Windows", bin));
    }
}
