//! Errors surfaced by the filesystem core.

use thiserror::Error;

/// An error returned by a filesystem operation.
///
/// Structural errors (`BadMagic`, `BadGeometry`, ...) can only occur while
/// opening or formatting an image; the remaining variants map one-to-one to
/// the errno a mounted filesystem hands back to the kernel.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum FsError {
    /// The path exceeds `PATH_MAX`, or a component exceeds the maximum name
    /// length.
    #[error("file name too long")]
    NameTooLong,
    /// A component of the path does not exist.
    #[error("no such file or directory")]
    NotFound,
    /// A component of the path prefix is not a directory.
    #[error("not a directory")]
    NotDirectory,
    /// A file-only operation was applied to a directory.
    #[error("is a directory")]
    IsDirectory,
    /// The directory is not empty.
    #[error("directory not empty")]
    NotEmpty,
    /// Not enough free inodes, blocks or extent slots.
    #[error("no space left on device")]
    NoSpace,
    /// Not enough memory.
    #[error("cannot allocate memory")]
    NoMemory,
    /// The superblock magic does not match.
    #[error("bad magic number in superblock")]
    BadMagic,
    /// The superblock geometry is inconsistent with the image.
    #[error("superblock geometry does not match the image")]
    BadGeometry,
    /// The requested number of inodes cannot make a valid filesystem.
    #[error("invalid number of inodes")]
    BadInodeCount,
    /// The image cannot hold the metadata regions plus at least one data
    /// block.
    #[error("image too small for the requested geometry")]
    ImageTooSmall,
}

impl FsError {
    /// Returns the errno equivalent of the error.
    pub fn errno(self) -> i32 {
        match self {
            Self::NameTooLong => libc::ENAMETOOLONG,
            Self::NotFound => libc::ENOENT,
            Self::NotDirectory => libc::ENOTDIR,
            Self::IsDirectory => libc::EISDIR,
            Self::NotEmpty => libc::ENOTEMPTY,
            Self::NoSpace => libc::ENOSPC,
            Self::NoMemory => libc::ENOMEM,
            Self::BadMagic
            | Self::BadGeometry
            | Self::BadInodeCount
            | Self::ImageTooSmall => libc::EINVAL,
        }
    }
}
