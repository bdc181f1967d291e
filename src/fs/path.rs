//! Absolute path resolution.

use super::ExtentFs;
use crate::disk::{FileKind, NAME_MAX, PATH_MAX, ROOT_INO};
use crate::error::FsError;

/// Splits `path` into its parent directory and final component.
pub(crate) fn split_path(path: &str) -> Result<(&str, &str), FsError> {
    if path.len() >= PATH_MAX {
        return Err(FsError::NameTooLong);
    }
    let idx = path.rfind('/').ok_or(FsError::NotFound)?;
    let name = &path[idx + 1..];
    if name.is_empty() {
        return Err(FsError::NotFound);
    }
    let parent = if idx == 0 { "/" } else { &path[..idx] };
    Ok((parent, name))
}

impl ExtentFs {
    /// Walks `path` from the root directory and returns the inode number it
    /// names.
    pub(crate) fn resolve(&self, path: &str) -> Result<u32, FsError> {
        if path.len() >= PATH_MAX {
            return Err(FsError::NameTooLong);
        }
        let mut current = ROOT_INO;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            if component.len() >= NAME_MAX {
                return Err(FsError::NameTooLong);
            }
            if self.inode(current).file_kind() != FileKind::Directory {
                return Err(FsError::NotDirectory);
            }
            let (blk, slot) = self
                .lookup_dentry(current, component.as_bytes())
                .ok_or(FsError::NotFound)?;
            current = self.dentry(blk, slot).ino.get();
        }
        Ok(current)
    }
}
