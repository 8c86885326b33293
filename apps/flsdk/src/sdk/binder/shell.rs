//! Shell profile binding.
//!
//! The managed block is two lines appended to the profile:
//!
//! ```bash
//! # Flutter SDK (managed by flsdk)
//! export PATH="/home/u/.flsdk/sdks/3.24.0/bin:$PATH"
//! ```
//!
//! For fish:
//!
//! ```fish
//! # Flutter SDK (managed by flsdk)
//! fish_add_path /home/u/.flsdk/sdks/3.24.0/bin
//! ```
//!
//! Activation removes any earlier managed block (with the blank line that
//! precedes it) and appends a fresh one. Nothing else in the file is touched.

use std::path::{Path, PathBuf};

use super::{BindOutcome, DetachedBinder, EnvironmentBinder};
use crate::errors::SdkError;

/// Sentinel comment that opens a managed block.
pub const MARKER: &str = "# Flutter SDK (managed by flsdk)";

/// Supported shell families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    /// Any other Bourne-compatible shell (`sh`, `dash`, `ksh`).
    Posix,
}

impl Shell {
    /// Parses a shell from a path string (e.g., "/bin/bash").
    ///
    /// `csh`-family shells are not supported and return `None`.
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        let shell_name = Path::new(path).file_name()?.to_str()?;
        match shell_name {
            "bash" => Some(Self::Bash),
            "zsh" => Some(Self::Zsh),
            "fish" => Some(Self::Fish),
            "sh" | "dash" | "ksh" | "mksh" | "ash" => Some(Self::Posix),
            _ => None,
        }
    }

    /// Profile files to try, in order. The first existing one wins; when none
    /// exists, the first candidate is created.
    #[must_use]
    pub fn profile_candidates(self, home_dir: &Path) -> Vec<PathBuf> {
        match self {
            Self::Bash => vec![
                home_dir.join(".bashrc"),
                home_dir.join(".bash_profile"),
                home_dir.join(".profile"),
            ],
            Self::Zsh => vec![home_dir.join(".zshrc"), home_dir.join(".zprofile")],
            Self::Fish => vec![home_dir.join(".config").join("fish").join("config.fish")],
            Self::Posix => vec![home_dir.join(".profile")],
        }
    }

    /// The PATH line for `bin_path`, escaped for this shell.
    ///
    /// - Bash/Zsh/Posix: escapes `$`, backticks, `"` and `\` inside double quotes
    /// - Fish: single-quotes paths containing shell metacharacters
    #[must_use]
    pub fn path_line(self, bin_path: &Path) -> String {
        let path_str = bin_path.display().to_string();
        match self {
            Self::Bash | Self::Zsh | Self::Posix => {
                let escaped_path = path_str
                    .replace('\\', "\\\\")
                    .replace('$', "\\$")
                    .replace('`', "\\`")
                    .replace('"', "\\\"");
                format!("export PATH=\"{escaped_path}:$PATH\"")
            }
            Self::Fish => {
                let needs_quotes = path_str.chars().any(|c| {
                    matches!(
                        c,
                        ' ' | '$' | '\\' | '\'' | '*' | '?' | '(' | ')' | '[' | ']' | '{' | '}'
                    )
                });
                if needs_quotes {
                    format!("fish_add_path '{}'", path_str.replace('\'', "\\'"))
                } else {
                    format!("fish_add_path {path_str}")
                }
            }
        }
    }
}

/// Removes every managed block from `content`.
///
/// A block is the marker line plus the line after it. One blank line directly
/// before the marker is removed too, since activation inserts it.
#[must_use]
pub fn strip_managed_blocks(content: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut lines = content.lines();

    while let Some(line) = lines.next() {
        if line.trim_end() == MARKER {
            if kept.last().is_some_and(|l| l.trim().is_empty()) {
                kept.pop();
            }
            lines.next();
            continue;
        }
        kept.push(line);
    }

    if kept.is_empty() {
        String::new()
    } else {
        let mut out = kept.join("\n");
        out.push('\n');
        out
    }
}

/// `content` with its managed block replaced by one for `path_line`.
#[must_use]
pub fn rewrite_profile(content: &str, path_line: &str) -> String {
    let mut out = strip_managed_blocks(content);
    out.push('\n');
    out.push_str(MARKER);
    out.push('\n');
    out.push_str(path_line);
    out.push('\n');
    out
}

/// Returns the path line of the managed block, if any.
fn managed_line(content: &str) -> Option<&str> {
    let mut lines = content.lines();
    while let Some(line) = lines.next() {
        if line.trim_end() == MARKER {
            return lines.next();
        }
    }
    None
}

/// Binds by editing a shell profile file.
#[derive(Debug, Clone)]
pub struct ShellProfileBinder {
    shell: Shell,
    profile: PathBuf,
}

impl ShellProfileBinder {
    #[must_use]
    pub fn new(shell: Shell, profile: PathBuf) -> Self {
        Self { shell, profile }
    }

    /// Chooses the shell from the `SHELL` value and its first existing profile
    /// under `home`. An unset `SHELL` is treated as a POSIX shell.
    ///
    /// Returns a [`DetachedBinder`] for unsupported shells.
    #[must_use]
    pub fn detect(home: &Path, shell_env: Option<&str>) -> Box<dyn EnvironmentBinder> {
        let shell = match shell_env.filter(|s| !s.trim().is_empty()) {
            None => Shell::Posix,
            Some(value) => match Shell::from_path(value.trim()) {
                Some(shell) => shell,
                None => {
                    return Box::new(DetachedBinder::new(format!(
                        "unsupported shell '{value}'"
                    )));
                }
            },
        };

        let candidates = shell.profile_candidates(home);
        let profile = candidates
            .iter()
            .find(|p| p.exists())
            .or_else(|| candidates.first())
            .cloned()
            .unwrap_or_else(|| home.join(".profile"));
        Box::new(Self::new(shell, profile))
    }

    #[must_use]
    pub fn profile(&self) -> &Path {
        &self.profile
    }

    fn target(&self) -> String {
        self.profile.display().to_string()
    }

    fn read(&self) -> Result<String, SdkError> {
        match std::fs::read_to_string(&self.profile) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(SdkError::environment_update_failed_with_source(
                self.target(),
                "could not read shell profile",
                e,
            )),
        }
    }

    /// Writes through symlinks so dotfile managers keep working.
    fn write(&self, content: &str) -> Result<(), SdkError> {
        if let Some(parent) = self.profile.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SdkError::environment_update_failed_with_source(
                    self.target(),
                    "could not create profile directory",
                    e,
                )
            })?;
        }
        std::fs::write(&self.profile, content).map_err(|e| {
            SdkError::environment_update_failed_with_source(
                self.target(),
                "could not write shell profile",
                e,
            )
        })
    }
}

impl EnvironmentBinder for ShellProfileBinder {
    fn activate(&self, bin_dir: &Path) -> Result<BindOutcome, SdkError> {
        let content = self.read()?;
        let updated = rewrite_profile(&content, &self.shell.path_line(bin_dir));
        if updated == content {
            return Ok(BindOutcome::Unchanged {
                target: self.target(),
            });
        }

        self.write(&updated)?;
        tracing::debug!("Bound {} in {}", bin_dir.display(), self.profile.display());
        Ok(BindOutcome::Updated {
            target: self.target(),
        })
    }

    fn deactivate(&self, bin_dir: &Path) -> Result<BindOutcome, SdkError> {
        let content = self.read()?;
        if managed_line(&content) != Some(self.shell.path_line(bin_dir).as_str()) {
            return Ok(BindOutcome::Unchanged {
                target: self.target(),
            });
        }

        self.write(&strip_managed_blocks(&content))?;
        tracing::debug!("Unbound {} from {}", bin_dir.display(), self.profile.display());
        Ok(BindOutcome::Updated {
            target: self.target(),
        })
    }

    fn is_active(&self, bin_dir: &Path) -> Result<bool, SdkError> {
        let content = self.read()?;
        Ok(managed_line(&content) == Some(self.shell.path_line(bin_dir).as_str()))
    }

    fn describe(&self) -> String {
        format!("{:?} profile {}", self.shell, self.profile.display())
    }

    fn reload_hint(&self) -> Option<String> {
        Some(format!("source {}", self.profile.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binder_in(dir: &Path, shell: Shell, name: &str) -> ShellProfileBinder {
        ShellProfileBinder::new(shell, dir.join(name))
    }

    #[test]
    fn shell_from_path_variants() {
        assert_eq!(Shell::from_path("/bin/bash"), Some(Shell::Bash));
        assert_eq!(Shell::from_path("/usr/local/bin/zsh"), Some(Shell::Zsh));
        assert_eq!(Shell::from_path("/usr/bin/fish"), Some(Shell::Fish));
        assert_eq!(Shell::from_path("/bin/dash"), Some(Shell::Posix));
        assert_eq!(Shell::from_path("/bin/tcsh"), None);
        assert_eq!(Shell::from_path(""), None);
    }

    #[test]
    fn profile_candidates_bash_in_order() {
        let home = PathBuf::from("/home/user");
        assert_eq!(
            Shell::Bash.profile_candidates(&home),
            vec![
                PathBuf::from("/home/user/.bashrc"),
                PathBuf::from("/home/user/.bash_profile"),
                PathBuf::from("/home/user/.profile"),
            ]
        );
    }

    #[test]
    fn path_line_escapes_for_posix_shells() {
        let line = Shell::Bash.path_line(Path::new("/home/user/$HOME/`x`/bin"));
        assert_eq!(line, r#"export PATH="/home/user/\$HOME/\`x\`/bin:$PATH""#);
    }

    #[test]
    fn path_line_quotes_for_fish() {
        assert_eq!(
            Shell::Fish.path_line(Path::new("/home/u/.flsdk/sdks/3.24.0/bin")),
            "fish_add_path /home/u/.flsdk/sdks/3.24.0/bin"
        );
        assert_eq!(
            Shell::Fish.path_line(Path::new("/home/u/My SDKs/bin")),
            "fish_add_path '/home/u/My SDKs/bin'"
        );
    }

    #[test]
    fn strip_preserves_user_content() {
        let content = format!(
            "alias ll='ls -l'\n\n{MARKER}\nexport PATH=\"/old/bin:$PATH\"\nexport EDITOR=vim\n"
        );
        assert_eq!(
            strip_managed_blocks(&content),
            "alias ll='ls -l'\nexport EDITOR=vim\n"
        );
    }

    #[test]
    fn rewrite_normalizes_missing_trailing_newline() {
        let out = rewrite_profile("export A=1", "export PATH=\"/x/bin:$PATH\"");
        assert_eq!(
            out,
            format!("export A=1\n\n{MARKER}\nexport PATH=\"/x/bin:$PATH\"\n")
        );
    }

    #[test]
    fn activate_twice_is_a_no_op() {
        let temp = tempfile::tempdir().unwrap();
        let binder = binder_in(temp.path(), Shell::Bash, ".bashrc");
        std::fs::write(binder.profile(), "export EDITOR=vim\n").unwrap();
        let bin = Path::new("/sdks/3.24.0/bin");

        assert!(binder.activate(bin).unwrap().changed());
        let once = std::fs::read_to_string(binder.profile()).unwrap();
        assert!(!binder.activate(bin).unwrap().changed());
        let twice = std::fs::read_to_string(binder.profile()).unwrap();

        assert_eq!(once, twice);
        assert_eq!(once.matches(MARKER).count(), 1);
        assert!(binder.is_active(bin).unwrap());
    }

    #[test]
    fn switching_back_restores_identical_content() {
        let temp = tempfile::tempdir().unwrap();
        let binder = binder_in(temp.path(), Shell::Zsh, ".zshrc");
        std::fs::write(binder.profile(), "# my zshrc\nsetopt autocd").unwrap();
        let a = Path::new("/sdks/3.24.0/bin");
        let b = Path::new("/sdks/3.22.0/bin");

        binder.activate(a).unwrap();
        let after_a = std::fs::read_to_string(binder.profile()).unwrap();
        binder.activate(b).unwrap();
        assert!(binder.is_active(b).unwrap());
        assert!(!binder.is_active(a).unwrap());
        binder.activate(a).unwrap();
        let after_a_again = std::fs::read_to_string(binder.profile()).unwrap();

        assert_eq!(after_a, after_a_again);
    }

    #[test]
    fn activate_creates_missing_profile() {
        let temp = tempfile::tempdir().unwrap();
        let binder = binder_in(temp.path(), Shell::Fish, ".config/fish/config.fish");

        binder.activate(Path::new("/sdks/3.24.0/bin")).unwrap();

        let content = std::fs::read_to_string(binder.profile()).unwrap();
        assert_eq!(
            content,
            format!("\n{MARKER}\nfish_add_path /sdks/3.24.0/bin\n")
        );
    }

    #[test]
    fn deactivate_removes_only_matching_block() {
        let temp = tempfile::tempdir().unwrap();
        let binder = binder_in(temp.path(), Shell::Bash, ".bashrc");
        std::fs::write(binder.profile(), "export EDITOR=vim\n").unwrap();
        let bin = Path::new("/sdks/3.24.0/bin");
        binder.activate(bin).unwrap();

        let other = binder.deactivate(Path::new("/sdks/other/bin")).unwrap();
        assert!(!other.changed());
        assert!(binder.is_active(bin).unwrap());

        assert!(binder.deactivate(bin).unwrap().changed());
        assert_eq!(
            std::fs::read_to_string(binder.profile()).unwrap(),
            "export EDITOR=vim\n"
        );
        assert!(!binder.is_active(bin).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn unwritable_profile_reports_environment_failure() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().unwrap();
        let binder = binder_in(temp.path(), Shell::Bash, ".bashrc");
        std::fs::write(binder.profile(), "x\n").unwrap();
        std::fs::set_permissions(binder.profile(), std::fs::Permissions::from_mode(0o444))
            .unwrap();

        let result = binder.activate(Path::new("/sdks/3.24.0/bin"));
        std::fs::set_permissions(binder.profile(), std::fs::Permissions::from_mode(0o644))
            .unwrap();

        // Root ignores file modes, so only check the error shape when it fails.
        if let Err(err) = result {
            assert!(matches!(err, SdkError::EnvironmentUpdateFailed { .. }));
            assert!(err.to_string().contains(".bashrc"));
        }
    }

    #[test]
    fn detect_prefers_first_existing_profile() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join(".bash_profile"), "").unwrap();

        let binder = ShellProfileBinder::detect(temp.path(), Some("/bin/bash"));
        assert!(binder.describe().contains(".bash_profile"));

        let binder = ShellProfileBinder::detect(temp.path(), Some("/bin/zsh"));
        assert!(binder.describe().contains(".zshrc"));

        let binder = ShellProfileBinder::detect(temp.path(), Some("/bin/tcsh"));
        assert!(binder.describe().starts_with("none"));
    }
}
