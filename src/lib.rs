//! extentfs is an extent-based, block-structured filesystem stored in a
//! fixed-size disk image.
//!
//! The image is mapped into memory as a whole and divided into 4096-byte
//! blocks: a superblock, an inode bitmap, a block bitmap, an inode table
//! and a data region. Each inode owns one extent block of up to 512
//! (start, count) runs describing its content; directories are dense
//! arrays of 256-byte entries stored the same way as file bodies.
//!
//! The [`ExtentFs`] type exposes the path-based operations the
//! `mount.extentfs` tool binds to FUSE; `mkfs.extentfs` lays out a fresh
//! image.

mod disk;
mod error;
mod fs;
mod image;

pub use disk::{BLOCK_SIZE, FileKind, MAGIC, NAME_MAX, PATH_MAX, ROOT_INO};
pub use error::FsError;
pub use fs::{DirEntry, ExtentFs, FileStat, StatFs};
pub use image::Image;
