//! Plugin archive extraction (`.tar.gz`, `.tgz`, `.tar`, `.zip`).

use flate2::read::GzDecoder;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::{PluginError, Result};

/// Entries that archivers add and that never belong to a plugin.
const IGNORED_ENTRIES: &[&str] = &["__MACOSX", ".DS_Store"];

/// Supported archive formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    Tar,
    Zip,
}

impl ArchiveFormat {
    /// Detect the format from a file name or URL path.
    pub fn detect(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if lower.ends_with(".tar") {
            Some(Self::Tar)
        } else if lower.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }
}

/// Extract `archive` into `dest` and return the plugin root: `dest`
/// itself, or the single top-level directory when the archive wraps its
/// contents in one.
pub fn extract(archive: &Path, dest: &Path) -> Result<PathBuf> {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let format = ArchiveFormat::detect(&name)
        .ok_or_else(|| PluginError::Archive(format!("unsupported archive format: {}", name)))?;

    hangar_common_fs::ensure_dir(dest)?;
    debug!(archive = %archive.display(), format = ?format, "extracting");

    let file = File::open(archive)?;
    match format {
        ArchiveFormat::TarGz => unpack_tar(tar::Archive::new(GzDecoder::new(file)), dest)?,
        ArchiveFormat::Tar => unpack_tar(tar::Archive::new(file), dest)?,
        ArchiveFormat::Zip => unpack_zip(file, dest)?,
    }

    normalize_root(dest)
}

fn unpack_tar<R: io::Read>(mut archive: tar::Archive<R>, dest: &Path) -> Result<()> {
    archive.set_preserve_permissions(true);
    // `unpack` refuses entries that would land outside `dest`.
    archive
        .unpack(dest)
        .map_err(|e| PluginError::Archive(format!("failed to unpack tarball: {}", e)))
}

fn unpack_zip(file: File, dest: &Path) -> Result<()> {
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| PluginError::Archive(format!("invalid zip: {}", e)))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| PluginError::Archive(format!("invalid zip entry: {}", e)))?;
        let Some(rel) = entry.enclosed_name().map(Path::to_path_buf) else {
            return Err(PluginError::Archive(format!(
                "zip entry escapes the archive root: {}",
                entry.name()
            )));
        };
        let out = dest.join(rel);

        if entry.is_dir() {
            hangar_common_fs::ensure_dir(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            hangar_common_fs::ensure_dir(parent)?;
        }
        let mut target = File::create(&out)?;
        io::copy(&mut entry, &mut target)?;

        if let Some(mode) = entry.unix_mode() {
            hangar_common_fs::set_permissions(&out, mode & 0o777)?;
        }
    }
    Ok(())
}

/// The effective plugin root inside an extraction directory.
pub fn normalize_root(dir: &Path) -> Result<PathBuf> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if IGNORED_ENTRIES.iter().any(|i| name == *i) {
            continue;
        }
        entries.push(entry.path());
    }

    match entries.as_slice() {
        [only] if only.is_dir() => Ok(only.clone()),
        _ => Ok(dir.to_path_buf()),
    }
}
