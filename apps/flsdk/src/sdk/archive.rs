//! Archive extraction for Flutter SDK bundles.
//!
//! Flutter publishes `.zip` bundles for macOS and Windows and `.tar.xz`
//! bundles for Linux; `.tar.gz` is accepted for mirrors. Every bundle wraps
//! the SDK in a single `flutter/` folder, which is stripped so the SDK root
//! lands directly in the destination.

use anyhow::{Context, Result, bail};
use flate2::read::GzDecoder;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tar::Archive;

/// Archive formats understood by the installer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
    TarXz,
}

impl ArchiveKind {
    /// Picks the format from the file name.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Some(Self::TarXz)
        } else {
            None
        }
    }
}

/// Extracts any supported archive into `dest_dir`, choosing the format
/// from the file extension.
///
/// # Errors
///
/// Returns an error if the extension is unknown or extraction fails.
pub fn extract_archive(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    match ArchiveKind::from_path(archive_path) {
        Some(ArchiveKind::Zip) => extract_zip(archive_path, dest_dir),
        Some(ArchiveKind::TarGz) => extract_tar_gz(archive_path, dest_dir),
        Some(ArchiveKind::TarXz) => extract_tar_xz(archive_path, dest_dir),
        None => bail!("Unsupported archive format: {}", archive_path.display()),
    }
}

/// Extracts a ZIP archive, stripping a shared root folder.
///
/// Unix permission bits stored in the archive are applied to extracted files.
///
/// # Errors
///
/// Returns an error if the archive is unreadable or an entry escapes `dest_dir`.
pub fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let file = std::fs::File::open(archive_path)
        .with_context(|| format!("Failed to open archive: {}", archive_path.display()))?;

    let mut archive = zip::ZipArchive::new(BufReader::new(file))
        .with_context(|| format!("Failed to read ZIP archive: {}", archive_path.display()))?;

    std::fs::create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create directory: {}", dest_dir.display()))?;

    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive
            .by_index_raw(i)
            .with_context(|| format!("Failed to read archive entry {i}"))?;
        let path = entry
            .enclosed_name()
            .with_context(|| format!("Refusing to extract unsafe path: {}", entry.name()))?;
        names.push(path);
    }
    let strip_prefix = common_root(&names);

    for (i, entry_path) in names.iter().enumerate() {
        let Some(relative_path) = strip_root(entry_path, strip_prefix.as_deref())? else {
            continue;
        };
        let output_path = dest_dir.join(&relative_path);

        let mut entry = archive
            .by_index(i)
            .with_context(|| format!("Failed to read archive entry {i}"))?;

        if entry.is_dir() {
            std::fs::create_dir_all(&output_path).with_context(|| {
                format!("Failed to create directory: {}", output_path.display())
            })?;
            continue;
        }

        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let mut outfile = std::fs::File::create(&output_path)
            .with_context(|| format!("Failed to create file: {}", output_path.display()))?;
        std::io::copy(&mut entry, &mut outfile)
            .with_context(|| format!("Failed to extract: {}", output_path.display()))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&output_path, std::fs::Permissions::from_mode(mode & 0o777))
                .with_context(|| format!("Failed to set permissions: {}", output_path.display()))?;
        }
    }

    Ok(())
}

/// Extracts a gzip-compressed tarball, stripping a shared root folder.
///
/// # Errors
///
/// Returns an error if the archive is unreadable or an entry escapes `dest_dir`.
pub fn extract_tar_gz(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let open = || -> Result<GzDecoder<BufReader<std::fs::File>>> {
        let file = std::fs::File::open(archive_path)
            .with_context(|| format!("Failed to open archive: {}", archive_path.display()))?;
        Ok(GzDecoder::new(BufReader::new(file)))
    };
    extract_tar(archive_path, &open, dest_dir)
}

/// Extracts an xz-compressed tarball, stripping a shared root folder.
///
/// The tarball is decompressed next to `dest_dir` first, then unpacked.
///
/// # Errors
///
/// Returns an error if decompression fails or an entry escapes `dest_dir`.
pub fn extract_tar_xz(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let parent = dest_dir
        .parent()
        .with_context(|| format!("No parent directory for {}", dest_dir.display()))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    let tar_path = parent.join(format!(
        ".{}.{:x}.tar",
        dest_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        rand::random::<u32>()
    ));

    let result = (|| -> Result<()> {
        let mut input = BufReader::new(
            std::fs::File::open(archive_path)
                .with_context(|| format!("Failed to open archive: {}", archive_path.display()))?,
        );
        let mut output = std::io::BufWriter::new(
            std::fs::File::create(&tar_path)
                .with_context(|| format!("Failed to create {}", tar_path.display()))?,
        );
        lzma_rs::xz_decompress(&mut input, &mut output)
            .map_err(|e| anyhow::anyhow!("{e:?}"))
            .with_context(|| format!("Failed to decompress {}", archive_path.display()))?;
        std::io::Write::flush(&mut output)
            .with_context(|| format!("Failed to write {}", tar_path.display()))?;
        drop(output);

        let open = || -> Result<BufReader<std::fs::File>> {
            Ok(BufReader::new(std::fs::File::open(&tar_path).with_context(
                || format!("Failed to open {}", tar_path.display()),
            )?))
        };
        extract_tar(archive_path, &open, dest_dir)
    })();

    let _ = std::fs::remove_file(&tar_path);
    result
}

/// Unpacks a tar stream in two passes: one to find the shared root, one to
/// write entries.
fn extract_tar<R: Read>(
    archive_path: &Path,
    open: &dyn Fn() -> Result<R>,
    dest_dir: &Path,
) -> Result<()> {
    std::fs::create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create directory: {}", dest_dir.display()))?;

    let mut names = Vec::new();
    let mut archive = Archive::new(open()?);
    for entry in archive
        .entries()
        .with_context(|| format!("Failed to read tar entries: {}", archive_path.display()))?
    {
        let entry = entry
            .with_context(|| format!("Failed to read tar entry: {}", archive_path.display()))?;
        let path = entry.path().context("Failed to get entry path")?;
        ensure_relative(&path)?;
        names.push(path.into_owned());
    }
    let strip_prefix = common_root(&names);

    let mut archive = Archive::new(open()?);
    for entry in archive
        .entries()
        .with_context(|| format!("Failed to read tar entries: {}", archive_path.display()))?
    {
        let mut entry = entry
            .with_context(|| format!("Failed to read tar entry: {}", archive_path.display()))?;
        let entry_path = entry
            .path()
            .context("Failed to get entry path")?
            .into_owned();

        let Some(relative_path) = strip_root(&entry_path, strip_prefix.as_deref())? else {
            continue;
        };
        ensure_no_symlink_on_path(dest_dir, &relative_path)?;
        let output_path = dest_dir.join(&relative_path);
        let entry_type = entry.header().entry_type();

        if entry_type.is_dir() {
            std::fs::create_dir_all(&output_path).with_context(|| {
                format!("Failed to create directory: {}", output_path.display())
            })?;
            continue;
        }

        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        if entry_type.is_symlink() {
            let target = entry
                .link_name()
                .context("Failed to read link target")?
                .with_context(|| format!("Symlink without target: {}", entry_path.display()))?;
            ensure_link_inside(&relative_path, &target)?;
        } else if entry_type.is_hard_link() {
            // `unpack` resolves hard link targets against the working
            // directory, so they are mapped into `dest_dir` here.
            let target = entry
                .link_name()
                .context("Failed to read link target")?
                .with_context(|| format!("Hard link without target: {}", entry_path.display()))?;
            let source = strip_root(&target, strip_prefix.as_deref())?
                .with_context(|| format!("Hard link to archive root: {}", entry_path.display()))?;
            ensure_no_symlink_on_path(dest_dir, &source)?;
            std::fs::hard_link(dest_dir.join(&source), &output_path)
                .with_context(|| format!("Failed to link: {}", output_path.display()))?;
            continue;
        }

        entry
            .unpack(&output_path)
            .with_context(|| format!("Failed to extract: {}", output_path.display()))?;
    }

    Ok(())
}

/// Rejects absolute paths and `..` components.
fn ensure_relative(path: &Path) -> Result<()> {
    if path.is_absolute()
        || path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_) | Component::RootDir))
    {
        bail!(
            "Refusing to extract path with parent directory or absolute reference: {}",
            path.display()
        );
    }
    Ok(())
}

/// Rejects a symlink whose target leaves the extraction root.
///
/// `relative_path` is where the link itself lands, relative to the root.
fn ensure_link_inside(relative_path: &Path, target: &Path) -> Result<()> {
    let escapes = || {
        anyhow::anyhow!(
            "Refusing to extract link {} pointing outside the archive: {}",
            relative_path.display(),
            target.display()
        )
    };
    let mut depth = relative_path
        .parent()
        .map_or(0, |p| p.components().filter(|c| matches!(c, Component::Normal(_))).count());
    for component in target.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => depth = depth.checked_sub(1).ok_or_else(escapes)?,
            Component::RootDir | Component::Prefix(_) => return Err(escapes()),
        }
    }
    Ok(())
}

/// Rejects writing through a symlink an earlier entry created.
fn ensure_no_symlink_on_path(dest_dir: &Path, relative_path: &Path) -> Result<()> {
    let mut current = dest_dir.to_path_buf();
    for component in relative_path.components() {
        current.push(component);
        if std::fs::symlink_metadata(&current).is_ok_and(|m| m.file_type().is_symlink()) {
            bail!(
                "Refusing to extract {} through symlink {}",
                relative_path.display(),
                current.display()
            );
        }
    }
    Ok(())
}

/// Maps an entry path to its output path relative to the destination.
/// Returns `None` for the root folder entry itself.
fn strip_root(entry_path: &Path, prefix: Option<&Path>) -> Result<Option<PathBuf>> {
    ensure_relative(entry_path)?;
    let relative = match prefix.map(|p| entry_path.strip_prefix(p)) {
        Some(Ok(p)) => p.to_path_buf(),
        Some(Err(_)) | None => entry_path.to_path_buf(),
    };
    if relative.as_os_str().is_empty() || relative == Path::new(".") {
        return Ok(None);
    }
    Ok(Some(relative))
}

/// Finds a root folder shared by every entry.
///
/// Returns `None` for flat archives, so a lone top-level file is never
/// mistaken for a wrapping folder.
fn common_root(paths: &[PathBuf]) -> Option<PathBuf> {
    let mut common: Option<PathBuf> = None;
    let mut nested = false;

    for path in paths {
        let mut components = path
            .components()
            .filter(|c| !matches!(c, Component::CurDir));
        let first = components.next()?;
        if components.next().is_some() {
            nested = true;
        }
        let root = PathBuf::from(first.as_os_str());
        match &common {
            None => common = Some(root),
            Some(existing) if existing != &root => return None,
            Some(_) => {}
        }
    }

    if nested { common } else { None }
}

/// Marks every file under `bin/` executable (Unix only).
///
/// # Errors
///
/// Returns an error if `bin/` cannot be read or permissions cannot be set.
#[cfg(unix)]
pub fn set_executable_permissions(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let bin_dir = dir.join("bin");
    if !bin_dir.exists() {
        return Ok(());
    }

    let entries = std::fs::read_dir(&bin_dir)
        .with_context(|| format!("Failed to read bin directory: {}", bin_dir.display()))?;
    for entry in entries {
        let path = entry.context("Failed to read directory entry")?.path();
        if path.is_file() {
            let mut perms = std::fs::metadata(&path)
                .with_context(|| format!("Failed to get metadata: {}", path.display()))?
                .permissions();
            perms.set_mode(perms.mode() | 0o755);
            std::fs::set_permissions(&path, perms)
                .with_context(|| format!("Failed to set permissions: {}", path.display()))?;
        }
    }

    Ok(())
}

/// Sets executable permissions (no-op on Windows).
#[cfg(windows)]
#[allow(clippy::unnecessary_wraps)]
pub fn set_executable_permissions(_dir: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    /// Builds a zip holding `files` (path, content) under the archive root.
    pub(crate) fn write_zip(archive_path: &Path, files: &[(&str, &str)]) {
        let file = std::fs::File::create(archive_path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default().unix_permissions(0o755);
        for (name, content) in files {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    fn tar_bytes(files: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder
                .append_data(&mut header, name, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap()
    }

    pub(crate) fn write_tar_gz(archive_path: &Path, files: &[(&str, &str)]) {
        let file = std::fs::File::create(archive_path).unwrap();
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::fast());
        encoder.write_all(&tar_bytes(files)).unwrap();
        encoder.finish().unwrap();
    }

    pub(crate) fn write_tar_xz(archive_path: &Path, files: &[(&str, &str)]) {
        let tar = tar_bytes(files);
        let mut output = std::fs::File::create(archive_path).unwrap();
        lzma_rs::xz_compress(&mut std::io::Cursor::new(tar), &mut output).unwrap();
    }

    fn flutter_files() -> Vec<(&'static str, &'static str)> {
        vec![
            ("flutter/bin/flutter", "#!/bin/sh\necho flutter\n"),
            ("flutter/bin/flutter.bat", "@echo flutter\n"),
            ("flutter/version", "3.24.0\n"),
        ]
    }

    #[test]
    fn archive_kind_from_extension() {
        assert_eq!(ArchiveKind::from_path(Path::new("a/f.zip")), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::from_path(Path::new("f.tar.gz")), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::from_path(Path::new("f.TAR.XZ")), Some(ArchiveKind::TarXz));
        assert_eq!(ArchiveKind::from_path(Path::new("f.rar")), None);
    }

    #[test]
    fn extract_zip_strips_flutter_root() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("sdk.zip");
        write_zip(&archive, &flutter_files());
        let dest = temp.path().join("out");

        extract_archive(&archive, &dest).unwrap();

        assert!(dest.join("bin").join("flutter").is_file());
        assert_eq!(std::fs::read_to_string(dest.join("version")).unwrap(), "3.24.0\n");
        assert!(!dest.join("flutter").exists());
    }

    #[cfg(unix)]
    #[test]
    fn extract_zip_applies_unix_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("sdk.zip");
        write_zip(&archive, &flutter_files());
        let dest = temp.path().join("out");

        extract_zip(&archive, &dest).unwrap();

        let mode = std::fs::metadata(dest.join("bin/flutter")).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[test]
    fn extract_zip_keeps_flat_layout() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("flat.zip");
        write_zip(&archive, &[("README", "x"), ("LICENSE", "y")]);
        let dest = temp.path().join("out");

        extract_zip(&archive, &dest).unwrap();

        assert!(dest.join("README").is_file());
        assert!(dest.join("LICENSE").is_file());
    }

    #[test]
    fn extract_tar_gz_strips_flutter_root() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("sdk.tar.gz");
        write_tar_gz(&archive, &flutter_files());
        let dest = temp.path().join("out");

        extract_archive(&archive, &dest).unwrap();

        assert!(dest.join("bin").join("flutter").is_file());
        assert!(dest.join("version").is_file());
    }

    #[test]
    fn extract_tar_xz_strips_flutter_root_and_cleans_up() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("flutter_linux_3.24.0-stable.tar.xz");
        write_tar_xz(&archive, &flutter_files());
        let dest = temp.path().join("out");

        extract_archive(&archive, &dest).unwrap();

        assert!(dest.join("bin").join("flutter").is_file());
        let leftovers: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tar"))
            .collect();
        assert!(leftovers.is_empty());
    }

    /// Tarball with `(path, link target)` symlinks followed by regular files.
    fn write_tar_gz_with_links(archive_path: &Path, links: &[(&str, &str)], files: &[(&str, &str)]) {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, target) in links {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            header.set_mode(0o777);
            builder.append_link(&mut header, name, target).unwrap();
        }
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, content.as_bytes())
                .unwrap();
        }
        let file = std::fs::File::create(archive_path).unwrap();
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::fast());
        encoder.write_all(&builder.into_inner().unwrap()).unwrap();
        encoder.finish().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn tar_symlink_escaping_destination_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("evil.tar.gz");
        write_tar_gz_with_links(
            &archive,
            &[("flutter/link", "../..")],
            &[("flutter/link/escaped", "pwned"), ("flutter/version", "1\n")],
        );
        let dest = temp.path().join("stage").join("out");

        let err = extract_archive(&archive, &dest).unwrap_err();

        assert!(err.to_string().contains("outside the archive"), "{err:#}");
        assert!(!temp.path().join("escaped").exists());
        assert!(!dest.join("link").exists());
    }

    #[cfg(unix)]
    #[test]
    fn tar_write_through_inner_symlink_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("sneaky.tar.gz");
        write_tar_gz_with_links(
            &archive,
            &[("flutter/alias", "bin")],
            &[("flutter/bin/flutter", "#!/bin/sh\n"), ("flutter/alias/extra", "x")],
        );
        let dest = temp.path().join("out");

        let err = extract_archive(&archive, &dest).unwrap_err();

        assert!(err.to_string().contains("through symlink"), "{err:#}");
        assert!(!dest.join("bin/extra").exists());
    }

    #[cfg(unix)]
    #[test]
    fn tar_symlink_inside_destination_is_kept() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("ok.tar.gz");
        write_tar_gz_with_links(
            &archive,
            &[("flutter/bin/dart", "cache/dart-sdk/bin/dart")],
            &[("flutter/bin/flutter", "#!/bin/sh\n")],
        );
        let dest = temp.path().join("out");

        extract_archive(&archive, &dest).unwrap();

        let link = std::fs::read_link(dest.join("bin/dart")).unwrap();
        assert_eq!(link, PathBuf::from("cache/dart-sdk/bin/dart"));
    }

    #[test]
    fn link_targets_are_checked_against_their_depth() {
        assert!(ensure_link_inside(Path::new("bin/dart"), Path::new("../version")).is_ok());
        assert!(ensure_link_inside(Path::new("bin/dart"), Path::new("../../etc")).is_err());
        assert!(ensure_link_inside(Path::new("link"), Path::new("..")).is_err());
        assert!(ensure_link_inside(Path::new("link"), Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn corrupt_archive_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("bad.zip");
        std::fs::write(&archive, b"definitely not a zip").unwrap();

        assert!(extract_archive(&archive, &temp.path().join("out")).is_err());
    }

    #[test]
    fn unsupported_extension_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("sdk.7z");
        std::fs::write(&archive, b"x").unwrap();

        let err = extract_archive(&archive, &temp.path().join("out")).unwrap_err();
        assert!(err.to_string().contains("Unsupported archive format"));
    }

    #[test]
    fn strip_root_rejects_traversal() {
        assert!(strip_root(Path::new("../etc/passwd"), None).is_err());
        assert!(strip_root(Path::new("flutter/../../x"), Some(Path::new("flutter"))).is_err());
        assert!(strip_root(Path::new("/abs"), None).is_err());
    }

    #[test]
    fn common_root_requires_nesting_and_agreement() {
        let nested = vec![PathBuf::from("flutter/bin/flutter"), PathBuf::from("flutter/version")];
        assert_eq!(common_root(&nested), Some(PathBuf::from("flutter")));

        let flat = vec![PathBuf::from("flutter")];
        assert_eq!(common_root(&flat), None);

        let mixed = vec![PathBuf::from("a/x"), PathBuf::from("b/y")];
        assert_eq!(common_root(&mixed), None);
    }

    #[cfg(unix)]
    #[test]
    fn set_executable_permissions_marks_bin_files() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().unwrap();
        let bin = temp.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join("flutter"), "#!/bin/sh").unwrap();
        std::fs::set_permissions(bin.join("flutter"), std::fs::Permissions::from_mode(0o644))
            .unwrap();

        set_executable_permissions(temp.path()).unwrap();

        let mode = std::fs::metadata(bin.join("flutter")).unwrap().permissions().mode();
        assert_eq!(mode & 0o755, 0o755);
    }
}
