//! On-disk structures.
//!
//! The image is divided into fixed 4096-byte blocks:
//! - block 0: superblock
//! - inode bitmap, then block bitmap (bit-packed, LSB first within a byte)
//! - inode table (64-byte records in index order)
//! - data region: extent blocks, directory bodies and file content
//!
//! Every record is a plain little-endian byte layout; the [`zerocopy`]
//! derives let the core reinterpret slices of the mapped image as typed
//! records without copying.

use std::mem::size_of;
use zerocopy::byteorder::little_endian::{I64, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Block size in bytes. The unit of space allocation: every metadata region
/// and every file or directory body occupies an integral number of blocks.
pub const BLOCK_SIZE: usize = 4096;

/// Magic value identifying a formatted image.
pub const MAGIC: u64 = 0xC5C369A1C5C369A1;

/// Maximum file name (path component) length, including the null terminator.
pub const NAME_MAX: usize = 252;

/// Maximum path length, including the null terminator.
pub const PATH_MAX: usize = 4096;

/// Number of extent records in an inode's extent block.
pub const EXTENTS_PER_BLOCK: usize = BLOCK_SIZE / size_of::<Extent>();

/// Number of directory entries in a full block.
pub const DENTRIES_PER_BLOCK: usize = BLOCK_SIZE / size_of::<Dentry>();

/// Inode number of the root directory.
pub const ROOT_INO: u32 = 0;

/// The superblock, stored at the beginning of block 0.
#[derive(FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned)]
#[repr(C)]
pub struct Superblock {
    /// Must match [`MAGIC`].
    pub magic: U64,
    /// Filesystem size in bytes.
    pub size: U64,
    /// Total number of inodes.
    pub inodes_count: U64,
    /// Number of free inodes.
    pub free_inodes_count: U64,
    /// Total number of blocks.
    pub blocks_count: U64,
    /// Number of free blocks.
    pub free_blocks_count: U64,
    /// Number of bytes used in the inode bitmap.
    pub ino_bitmap_bytes: U64,
    /// Number of bytes used in the block bitmap.
    pub blk_bitmap_bytes: U64,
    /// Starting block of the block bitmap.
    pub block_bitmap_start: U32,
    /// Starting block of the inode bitmap.
    pub inode_bitmap_start: U32,
    /// Starting block of the inode table.
    pub inode_table_start: U32,
    /// Starting block of the data region.
    pub data_start: U32,
}

/// Superblock size in bytes.
pub const SUPERBLOCK_SIZE: usize = size_of::<Superblock>();

// The superblock must fit into a single block
const _: () = assert!(SUPERBLOCK_SIZE <= BLOCK_SIZE);

/// The type of the file referenced by an inode.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileKind {
    /// A directory.
    Directory,
    /// A regular file.
    Regular,
}

impl FileKind {
    /// Decodes the on-disk tag.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::Directory,
            _ => Self::Regular,
        }
    }

    /// Returns the on-disk tag.
    pub fn as_raw(self) -> u32 {
        match self {
            Self::Directory => 0,
            Self::Regular => 1,
        }
    }
}

/// An inode, one 64-byte record of the inode table.
#[derive(FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned)]
#[repr(C)]
pub struct Inode {
    /// File permission bits.
    pub mode: U32,
    /// Reference count. A directory is referenced by its parent, itself
    /// (via `.`) and each subdirectory (via `..`); a regular file only by
    /// its parent.
    pub links: U32,
    /// File size in bytes.
    pub size: U64,
    /// File type tag, see [`FileKind`].
    pub kind: U32,
    _reserved: [u8; 4],
    /// Last modification time, seconds since the epoch.
    pub mtime_sec: I64,
    /// Nanoseconds part of the modification time.
    pub mtime_nsec: I64,
    /// Number of unused slots in the extent block.
    pub free_extents: U32,
    /// Block number of the extent block.
    pub extent_block: U32,
    /// Inode number of the parent directory. The root is its own parent.
    pub parent: U32,
    _padding: [u8; 12],
}

/// Inode record size in bytes.
pub const INODE_SIZE: usize = size_of::<Inode>();

// A block must fit an integral number of inodes
const _: () = assert!(INODE_SIZE == 64);
const _: () = assert!(BLOCK_SIZE % INODE_SIZE == 0);

impl Inode {
    /// Returns the file type.
    pub fn file_kind(&self) -> FileKind {
        FileKind::from_raw(self.kind.get())
    }

    /// Returns the number of extent slots in use.
    pub fn used_extents(&self) -> usize {
        EXTENTS_PER_BLOCK - self.free_extents.get() as usize
    }
}

/// A contiguous run of data blocks.
#[derive(Clone, Copy, Debug, Eq, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq, Unaligned)]
#[repr(C)]
pub struct Extent {
    /// Starting block of the extent.
    pub start: U32,
    /// Number of blocks in the extent.
    pub count: U32,
}

impl Extent {
    /// Tells whether the extent slot is unused.
    pub fn is_empty(&self) -> bool {
        self.count.get() == 0
    }

    /// Returns the block right after the extent.
    pub fn end(&self) -> u32 {
        self.start.get() + self.count.get()
    }
}

/// A fixed-size directory entry.
#[derive(FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned)]
#[repr(C)]
pub struct Dentry {
    /// Inode number of the entry.
    pub ino: U32,
    /// Null-terminated file name.
    pub name: [u8; NAME_MAX],
}

/// Directory entry size in bytes.
pub const DENTRY_SIZE: usize = size_of::<Dentry>();

const _: () = assert!(DENTRY_SIZE == 256);

impl Dentry {
    /// Returns the name, without the null terminator.
    pub fn name_bytes(&self) -> &[u8] {
        let end = self.name.iter().position(|b| *b == 0).unwrap_or(NAME_MAX);
        &self.name[..end]
    }

    /// Sets the name. `name` must be at most `NAME_MAX - 1` bytes.
    pub fn set_name(&mut self, name: &[u8]) {
        self.name.fill(0);
        self.name[..name.len()].copy_from_slice(name);
    }

    /// Tells whether the entry slot is vacant, which terminates a scan of
    /// the enclosing extent.
    pub fn is_vacant(&self) -> bool {
        self.ino.get() == 0 && self.name[0] == 0
    }
}
