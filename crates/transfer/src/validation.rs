use std::fs::{self, File};
use std::io;
use std::path::{Component, Path};

use crate::XferError;
use crate::types::XferRole;

/// Outcome of [`check_local_path`] for a usable path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalFileCheck {
    /// Readable source file of `size` bytes.
    Source { size: u64 },
    /// Existing regular file that will be overwritten.
    Overwrite,
    /// New file in a writable directory.
    Create,
}

/// Rejects local paths containing parent-directory traversal.
pub fn validate_local_filename(path: &Path) -> Result<(), XferError> {
    let has_parent = path.components().any(|c| c == Component::ParentDir)
        || path.to_string_lossy().contains("..\\");
    if has_parent || path.as_os_str().is_empty() {
        return Err(XferError::InvalidPath(format!(
            "{} is not a valid filename.",
            path.display()
        )));
    }
    Ok(())
}

/// Validates a file name announced by a peer.
///
/// Only a bare name is accepted: no directories, no absolute paths, no
/// `..`, no Windows prefixes or separators.
pub fn validate_remote_filename(name: &str) -> Result<(), XferError> {
    if name.is_empty() {
        return Err(XferError::InvalidPath("empty file name".into()));
    }
    if name.contains('\\') || name.contains('\0') {
        return Err(XferError::InvalidPath(format!(
            "illegal character in file name: {name}"
        )));
    }

    if name.len() >= 2 && name.as_bytes()[1] == b':' {
        return Err(XferError::InvalidPath(format!(
            "drive prefix not allowed: {name}"
        )));
    }

    let path = Path::new(name);
    if path.is_absolute() {
        return Err(XferError::InvalidPath(format!(
            "absolute path not allowed: {name}"
        )));
    }

    let mut normal = 0;
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(XferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {name}"
                )));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(XferError::InvalidPath(format!(
                    "absolute path not allowed: {name}"
                )));
            }
            Component::CurDir => {}
            Component::Normal(_) => normal += 1,
        }
    }

    if normal != 1 || name.contains('/') {
        return Err(XferError::InvalidPath(format!(
            "directories not allowed in file name: {name}"
        )));
    }
    Ok(())
}

/// Permission bits do not say whether this process may create files
/// there, so try it.
fn dir_is_writable(dir: &Path) -> bool {
    tempfile::NamedTempFile::new_in(dir).is_ok()
}

/// Filesystem checks run when a local path is chosen.
///
/// Send: the path must be a readable, non-empty regular file.
/// Receive: the path must not be a directory; a new file needs a
/// writable parent directory.
pub fn check_local_path(role: XferRole, path: &Path) -> Result<LocalFileCheck, XferError> {
    match role {
        XferRole::Send => {
            let meta = fs::metadata(path)?;
            if meta.is_dir() {
                return Err(XferError::IsDirectory(path.to_path_buf()));
            }
            if meta.len() == 0 {
                return Err(XferError::EmptyFile(path.to_path_buf()));
            }
            match File::open(path) {
                Ok(_) => Ok(LocalFileCheck::Source { size: meta.len() }),
                Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                    Err(XferError::NotReadable(path.to_path_buf()))
                }
                Err(e) => Err(e.into()),
            }
        }
        XferRole::Receive => match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => Err(XferError::NotRegularFile(path.to_path_buf())),
            Ok(_) => Ok(LocalFileCheck::Overwrite),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let dir = match path.parent() {
                    Some(p) if !p.as_os_str().is_empty() => p,
                    _ => Path::new("."),
                };
                match fs::metadata(dir) {
                    Ok(meta) if meta.is_dir() && dir_is_writable(dir) => Ok(LocalFileCheck::Create),
                    _ => Err(XferError::DirectoryNotWritable(dir.to_path_buf())),
                }
            }
            Err(e) => Err(e.into()),
        },
    }
}
