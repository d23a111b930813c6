//! File system utilities for Hangar.

use hangar_common_core::{Error, ErrorCode, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

pub mod lock;
pub mod path;

pub use lock::FileLock;

/// Read a file to string with size limit.
pub fn read_to_string(path: impl AsRef<Path>, max_size: usize) -> Result<String> {
    let path = path.as_ref();

    let metadata = fs::metadata(path).map_err(|e| {
        Error::io(
            ErrorCode::FILE_READ_ERROR,
            format!("failed to read metadata: {}", path.display()),
            path,
            e,
        )
    })?;

    if metadata.len() as usize > max_size {
        return Err(Error::FileSystem {
            code: ErrorCode::FILE_READ_ERROR,
            message: format!("file too large: {} bytes (max: {})", metadata.len(), max_size),
            path: Some(path.to_string_lossy().to_string()),
            source: None,
        });
    }

    fs::read_to_string(path).map_err(|e| {
        Error::io(
            ErrorCode::FILE_READ_ERROR,
            format!("failed to read file: {}", path.display()),
            path,
            e,
        )
    })
}

/// Write to a file atomically (write to temp, then rename).
///
/// A crash at any point leaves either the previous contents or the new
/// contents at `path`, never a mix.
pub fn write_atomic(path: impl AsRef<Path>, contents: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let parent = path.parent().unwrap_or(Path::new("."));
    ensure_dir(parent)?;

    let mut temp_path = path.to_path_buf();
    match path.file_name() {
        Some(name) => temp_path.set_file_name(format!(".{}.tmp", name.to_string_lossy())),
        None => temp_path.push(".tmp"),
    }

    {
        let mut file = File::create(&temp_path).map_err(|e| {
            Error::io(
                ErrorCode::FILE_WRITE_ERROR,
                format!("failed to create temporary file: {}", temp_path.display()),
                &temp_path,
                e,
            )
        })?;

        file.write_all(contents)
            .and_then(|_| file.sync_all())
            .map_err(|e| {
                let _ = fs::remove_file(&temp_path);
                Error::io(
                    ErrorCode::FILE_WRITE_ERROR,
                    format!("failed to write temporary file: {}", temp_path.display()),
                    &temp_path,
                    e,
                )
            })?;
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        Error::io(
            ErrorCode::FILE_WRITE_ERROR,
            format!("failed to rename temporary file to target: {}", path.display()),
            path,
            e,
        )
    })?;

    Ok(())
}

/// Write string to file atomically.
pub fn write_string_atomic(path: impl AsRef<Path>, contents: &str) -> Result<()> {
    write_atomic(path, contents.as_bytes())
}

/// Ensure a directory exists (safe directory creation).
pub fn ensure_dir(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if !path.is_dir() {
        fs::create_dir_all(path).map_err(|e| {
            Error::io(
                ErrorCode::FILE_WRITE_ERROR,
                format!("failed to create directory: {}", path.display()),
                path,
                e,
            )
        })?;
    }
    Ok(())
}

/// Recursively remove a directory if it exists. Returns whether anything was removed.
pub fn remove_dir_if_exists(path: impl AsRef<Path>) -> Result<bool> {
    let path = path.as_ref();
    if path.symlink_metadata().is_err() {
        return Ok(false);
    }
    fs::remove_dir_all(path).map_err(|e| {
        Error::io(
            ErrorCode::FILE_WRITE_ERROR,
            format!("failed to remove directory: {}", path.display()),
            path,
            e,
        )
    })?;
    Ok(true)
}

/// Remove `path` only if it is a directory with no entries. Returns
/// whether it was removed.
pub fn remove_dir_if_empty(path: impl AsRef<Path>) -> Result<bool> {
    let path = path.as_ref();
    let mut entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => {
            return Err(Error::io(
                ErrorCode::FILE_READ_ERROR,
                format!("failed to read directory: {}", path.display()),
                path,
                e,
            ))
        }
    };
    if entries.next().is_some() {
        return Ok(false);
    }
    fs::remove_dir(path).map_err(|e| {
        Error::io(
            ErrorCode::FILE_WRITE_ERROR,
            format!("failed to remove directory: {}", path.display()),
            path,
            e,
        )
    })?;
    Ok(true)
}

/// Recursively copy `src` into `dst`, returning the number of files
/// copied and skipping any entry whose file name is
/// listed in `excluded` (e.g. `.git`).
///
/// File permissions are preserved; symlinks are recreated on unix.
pub fn copy_dir_excluding(
    src: impl AsRef<Path>,
    dst: impl AsRef<Path>,
    excluded: &[&str],
) -> Result<u64> {
    let src = src.as_ref();
    let dst = dst.as_ref();
    ensure_dir(dst)?;

    let mut copied = 0;
    let walker = walkdir::WalkDir::new(src)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| !excluded.contains(&name))
                .unwrap_or(true)
        });

    for entry in walker {
        let entry = entry.map_err(|e| Error::FileSystem {
            code: ErrorCode::FILE_READ_ERROR,
            message: format!("failed to walk directory: {}", src.display()),
            path: Some(src.to_string_lossy().to_string()),
            source: Some(Box::new(e)),
        })?;

        let relative = entry.path().strip_prefix(src).map_err(|_| {
            Error::new(format!("entry escaped source tree: {}", entry.path().display()))
        })?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            ensure_dir(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| {
                Error::io(
                    ErrorCode::FILE_WRITE_ERROR,
                    format!("failed to copy {} to {}", entry.path().display(), target.display()),
                    &target,
                    e,
                )
            })?;
            copied += 1;
        }
    }

    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let link = fs::read_link(src).map_err(|e| {
        Error::io(
            ErrorCode::FILE_READ_ERROR,
            format!("failed to read symlink: {}", src.display()),
            src,
            e,
        )
    })?;
    std::os::unix::fs::symlink(&link, dst).map_err(|e| {
        Error::io(
            ErrorCode::FILE_WRITE_ERROR,
            format!("failed to create symlink: {}", dst.display()),
            dst,
            e,
        )
    })
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst).map(|_| ()).map_err(|e| {
        Error::io(
            ErrorCode::FILE_WRITE_ERROR,
            format!("failed to copy {} to {}", src.display(), dst.display()),
            dst,
            e,
        )
    })
}

/// Set file permissions.
#[cfg(unix)]
pub fn set_permissions(path: impl AsRef<Path>, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let path = path.as_ref();
    let permissions = std::fs::Permissions::from_mode(mode);
    fs::set_permissions(path, permissions).map_err(|e| {
        Error::io(
            ErrorCode::FILE_WRITE_ERROR,
            format!("failed to set permissions for: {}", path.display()),
            path,
            e,
        )
    })
}

/// Set file permissions (no-op on Windows).
#[cfg(not(unix))]
pub fn set_permissions(_path: impl AsRef<Path>, _mode: u32) -> Result<()> {
    Ok(())
}

/// Make a file executable.
pub fn make_executable(path: impl AsRef<Path>) -> Result<()> {
    set_permissions(path, 0o755)
}

/// Whether `path` is a regular file with at least one execute bit set.
#[cfg(unix)]
pub fn is_executable(path: impl AsRef<Path>) -> bool {
    use std::os::unix::fs::PermissionsExt;

    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Whether `path` is a regular file (execute bits do not exist on Windows).
#[cfg(not(unix))]
pub fn is_executable(path: impl AsRef<Path>) -> bool {
    path.as_ref().is_file()
}

/// List directories in a directory, sorted by name.
pub fn list_dirs(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let read_dir = fs::read_dir(dir).map_err(|e| {
        Error::io(
            ErrorCode::FILE_READ_ERROR,
            format!("failed to read directory: {}", dir.display()),
            dir,
            e,
        )
    })?;

    let mut dirs = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|e| {
            Error::io(
                ErrorCode::FILE_READ_ERROR,
                format!("failed to read directory entry: {}", dir.display()),
                dir,
                e,
            )
        })?;
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }

    dirs.sort();
    Ok(dirs)
}
