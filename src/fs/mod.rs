//! The filesystem core.
//!
//! [`ExtentFs`] owns the mapped image and exposes the path-based operation
//! surface the mount bridge dispatches to. All on-disk access goes through
//! typed accessors over block-number arithmetic; no structure ever stores a
//! raw pointer into the image.

mod alloc;
mod dir;
mod extent;
mod inode;
mod io;
mod path;

use crate::disk::{
    BLOCK_SIZE, DENTRY_SIZE, Dentry, Extent, FileKind, INODE_SIZE, Inode, MAGIC, NAME_MAX,
    ROOT_INO, SUPERBLOCK_SIZE, Superblock,
};
use crate::error::FsError;
use crate::image::Image;
use alloc::BitmapKind;
use log::{debug, info};
use std::io as stdio;
use zerocopy::{FromBytes, IntoBytes};

/// File or directory attributes, as reported by [`ExtentFs::getattr`].
#[derive(Clone, Copy, Debug)]
pub struct FileStat {
    /// Inode number.
    pub ino: u32,
    /// File type.
    pub kind: FileKind,
    /// Permission bits.
    pub mode: u32,
    /// Number of hard links.
    pub links: u32,
    /// Size in bytes.
    pub size: u64,
    /// Number of 512-byte sectors.
    pub blocks: u64,
    /// Modification time, seconds since the epoch.
    pub mtime_sec: i64,
    /// Nanoseconds part of the modification time.
    pub mtime_nsec: i64,
}

/// One entry returned by [`ExtentFs::readdir`].
#[derive(Clone, Debug)]
pub struct DirEntry {
    /// Inode number of the entry.
    pub ino: u32,
    /// Entry name.
    pub name: String,
    /// File type of the entry.
    pub kind: FileKind,
}

/// Filesystem-wide statistics, as reported by [`ExtentFs::statfs`].
#[derive(Clone, Copy, Debug)]
pub struct StatFs {
    /// Block size in bytes.
    pub block_size: u32,
    /// Total number of blocks.
    pub blocks: u64,
    /// Number of free blocks.
    pub free_blocks: u64,
    /// Total number of inodes.
    pub inodes: u64,
    /// Number of free inodes.
    pub free_inodes: u64,
    /// Maximum file name length.
    pub name_max: u32,
}

/// An extent-based filesystem over a mapped image.
#[derive(Debug)]
pub struct ExtentFs {
    img: Image,
}

impl ExtentFs {
    /// Opens a formatted image, validating its magic and geometry.
    pub fn open(img: Image) -> Result<Self, FsError> {
        let fs = Self { img };
        let sb = fs.sb();
        if sb.magic.get() != MAGIC {
            return Err(FsError::BadMagic);
        }
        let size = fs.img.len() as u64;
        let blocks_count = size / BLOCK_SIZE as u64;
        let expected_data_start = 1
            + ceil_division(sb.inodes_count.get(), (BLOCK_SIZE * 8) as u64)
            + ceil_division(blocks_count, (BLOCK_SIZE * 8) as u64)
            + ceil_division(sb.inodes_count.get() * INODE_SIZE as u64, BLOCK_SIZE as u64);
        let geometry_ok = sb.size.get() == size
            && sb.blocks_count.get() == blocks_count
            && sb.inode_bitmap_start.get() == 1
            && sb.inode_bitmap_start.get() < sb.block_bitmap_start.get()
            && sb.block_bitmap_start.get() < sb.inode_table_start.get()
            && sb.inode_table_start.get() < sb.data_start.get()
            && sb.data_start.get() as u64 == expected_data_start
            && (sb.data_start.get() as u64) < blocks_count
            && sb.free_inodes_count.get() <= sb.inodes_count.get()
            && sb.free_blocks_count.get() <= sb.blocks_count.get();
        if !geometry_ok {
            return Err(FsError::BadGeometry);
        }
        Ok(fs)
    }

    /// Formats `img` into a fresh filesystem with `n_inodes` inodes and an
    /// empty root directory, and opens it.
    pub fn format(mut img: Image, n_inodes: u64) -> Result<Self, FsError> {
        if n_inodes <= 1 {
            return Err(FsError::BadInodeCount);
        }
        let size = img.len() as u64;
        let inode_table_blocks = ceil_division(n_inodes * INODE_SIZE as u64, BLOCK_SIZE as u64);
        let ino_bitmap_blocks = ceil_division(n_inodes, (BLOCK_SIZE * 8) as u64);
        let blocks_count = size / BLOCK_SIZE as u64;
        let blk_bitmap_blocks = ceil_division(blocks_count, (BLOCK_SIZE * 8) as u64);
        let min_size =
            (2 + ino_bitmap_blocks + blk_bitmap_blocks + inode_table_blocks) * BLOCK_SIZE as u64;
        if size <= min_size {
            return Err(FsError::ImageTooSmall);
        }
        img.fill(0);
        let data_start = 1 + ino_bitmap_blocks + blk_bitmap_blocks + inode_table_blocks;
        let mut fs = Self { img };
        {
            let sb = fs.sb_mut();
            sb.magic.set(MAGIC);
            sb.size.set(size);
            sb.inodes_count.set(n_inodes);
            sb.free_inodes_count.set(n_inodes);
            sb.blocks_count.set(blocks_count);
            sb.free_blocks_count.set(blocks_count);
            sb.ino_bitmap_bytes.set(ceil_division(n_inodes, 8));
            sb.blk_bitmap_bytes.set(ceil_division(blocks_count, 8));
            sb.inode_bitmap_start.set(1);
            sb.block_bitmap_start.set((1 + ino_bitmap_blocks) as u32);
            sb.inode_table_start
                .set((1 + ino_bitmap_blocks + blk_bitmap_blocks) as u32);
            sb.data_start.set(data_start as u32);
        }
        // Everything below the data region is permanently in use
        for blk in 0..data_start as u32 {
            fs.set_bit(BitmapKind::Block, blk, true);
        }
        let root = fs.create_inode(0o755, ROOT_INO, FileKind::Directory)?;
        debug_assert_eq!(root, ROOT_INO);
        info!(
            "formatted {} blocks, {} inodes, data region starts at block {}",
            blocks_count, n_inodes, data_start
        );
        Ok(fs)
    }

    /// Tells whether `img` already contains a formatted filesystem.
    pub fn is_present(img: &Image) -> bool {
        u64::from_le_bytes(img[..8].try_into().unwrap()) == MAGIC
    }

    /// Synchronously flushes the whole image to stable storage.
    pub fn flush(&self) -> stdio::Result<()> {
        self.img.flush()
    }

    /// Returns filesystem-wide statistics.
    pub fn statfs(&self) -> StatFs {
        let sb = self.sb();
        StatFs {
            block_size: BLOCK_SIZE as u32,
            blocks: sb.blocks_count.get(),
            free_blocks: sb.free_blocks_count.get(),
            inodes: sb.inodes_count.get(),
            free_inodes: sb.free_inodes_count.get(),
            name_max: NAME_MAX as u32,
        }
    }

    /// Returns the attributes of the file or directory at `path`.
    pub fn getattr(&self, path: &str) -> Result<FileStat, FsError> {
        let ino = self.resolve(path)?;
        Ok(self.stat(ino))
    }

    /// Lists the entries of the directory at `path`, including `.` and `..`.
    pub fn readdir(&self, path: &str) -> Result<Vec<DirEntry>, FsError> {
        let ino = self.resolve(path)?;
        if self.inode(ino).file_kind() != FileKind::Directory {
            return Err(FsError::NotDirectory);
        }
        Ok(self
            .entries(ino)
            .into_iter()
            .map(|(ino, name)| DirEntry {
                ino,
                name: String::from_utf8_lossy(&name).into_owned(),
                kind: self.inode(ino).file_kind(),
            })
            .collect())
    }

    /// Creates a directory at `path`.
    ///
    /// The bridge has already verified that `path` does not exist and that
    /// its parent is a directory.
    pub fn mkdir(&mut self, path: &str, mode: u32) -> Result<(), FsError> {
        let (parent_path, name) = path::split_path(path)?;
        let parent = self.resolve(parent_path)?;
        if self.inode(parent).file_kind() != FileKind::Directory {
            return Err(FsError::NotDirectory);
        }
        // extent block + first directory block + possibly a new block for
        // the parent's entry table
        self.check_space(1, 2 + self.dentry_block_needed(parent))?;
        let ino = self.create_inode(mode, parent, FileKind::Directory)?;
        if let Err(e) = self.insert_dentry(parent, name.as_bytes(), ino) {
            self.destroy_inode(ino);
            return Err(e);
        }
        let links = self.inode(parent).links.get() + 1;
        self.inode_mut(parent).links.set(links);
        debug!("mkdir {path}: inode {ino}, parent {parent}");
        Ok(())
    }

    /// Removes the empty directory at `path`.
    pub fn rmdir(&mut self, path: &str) -> Result<(), FsError> {
        let (parent_path, name) = path::split_path(path)?;
        let parent = self.resolve(parent_path)?;
        let (blk, slot) = self
            .lookup_dentry(parent, name.as_bytes())
            .ok_or(FsError::NotFound)?;
        let target = self.dentry(blk, slot).ino.get();
        if self.inode(target).file_kind() != FileKind::Directory {
            return Err(FsError::NotDirectory);
        }
        // An empty directory holds exactly `.` and `..`
        if self.inode(target).size.get() > 2 * DENTRY_SIZE as u64 {
            return Err(FsError::NotEmpty);
        }
        self.destroy_inode(target);
        self.remove_dentry(parent, blk, slot);
        let links = self.inode(parent).links.get() - 1;
        self.inode_mut(parent).links.set(links);
        debug!("rmdir {path}: inode {target}, parent {parent}");
        Ok(())
    }

    /// Creates a regular file at `path`.
    ///
    /// The bridge has already verified that `path` does not exist and that
    /// its parent is a directory.
    pub fn create(&mut self, path: &str, mode: u32) -> Result<(), FsError> {
        let (parent_path, name) = path::split_path(path)?;
        let parent = self.resolve(parent_path)?;
        if self.inode(parent).file_kind() != FileKind::Directory {
            return Err(FsError::NotDirectory);
        }
        self.check_space(1, 1 + self.dentry_block_needed(parent))?;
        let ino = self.create_inode(mode, parent, FileKind::Regular)?;
        if let Err(e) = self.insert_dentry(parent, name.as_bytes(), ino) {
            self.destroy_inode(ino);
            return Err(e);
        }
        debug!("create {path}: inode {ino}, parent {parent}");
        Ok(())
    }

    /// Removes the file at `path`, freeing its inode, its data blocks and
    /// its extent block.
    pub fn unlink(&mut self, path: &str) -> Result<(), FsError> {
        let (parent_path, name) = path::split_path(path)?;
        let parent = self.resolve(parent_path)?;
        let (blk, slot) = self
            .lookup_dentry(parent, name.as_bytes())
            .ok_or(FsError::NotFound)?;
        let target = self.dentry(blk, slot).ino.get();
        self.destroy_inode(target);
        self.remove_dentry(parent, blk, slot);
        debug!("unlink {path}: inode {target}, parent {parent}");
        Ok(())
    }

    /// Moves the file or directory at `from` to `to`, replacing an existing
    /// destination (a file, or an empty directory).
    pub fn rename(&mut self, from: &str, to: &str) -> Result<(), FsError> {
        if from == to {
            return Ok(());
        }
        let (src_parent_path, src_name) = path::split_path(from)?;
        let (dst_parent_path, dst_name) = path::split_path(to)?;
        let src_parent = self.resolve(src_parent_path)?;
        let (src_blk, src_slot) = self
            .lookup_dentry(src_parent, src_name.as_bytes())
            .ok_or(FsError::NotFound)?;
        let src_ino = self.dentry(src_blk, src_slot).ino.get();
        let src_kind = self.inode(src_ino).file_kind();
        let dst_parent = self.resolve(dst_parent_path)?;
        if self.inode(dst_parent).file_kind() != FileKind::Directory {
            return Err(FsError::NotDirectory);
        }
        match self.lookup_dentry(dst_parent, dst_name.as_bytes()) {
            None => {
                self.check_space(0, self.dentry_block_needed(dst_parent))?;
                self.insert_dentry(dst_parent, dst_name.as_bytes(), src_ino)?;
                self.remove_dentry(src_parent, src_blk, src_slot);
                if src_kind == FileKind::Directory && src_parent != dst_parent {
                    self.reparent(src_ino, src_parent, dst_parent);
                    let links = self.inode(dst_parent).links.get() + 1;
                    self.inode_mut(dst_parent).links.set(links);
                }
            }
            Some((dst_blk, dst_slot)) => {
                let dst_ino = self.dentry(dst_blk, dst_slot).ino.get();
                if dst_ino == src_ino {
                    return Ok(());
                }
                // Checked before any mutation
                if src_kind == FileKind::Directory
                    && self.inode(dst_ino).size.get() > 2 * DENTRY_SIZE as u64
                {
                    return Err(FsError::NotEmpty);
                }
                self.dentry_mut(dst_blk, dst_slot).ino.set(src_ino);
                self.remove_dentry(src_parent, src_blk, src_slot);
                self.touch(dst_parent);
                // The replaced directory vanishes from its parent, so the
                // destination parent's link count is already balanced
                if src_kind == FileKind::Directory {
                    self.reparent(src_ino, src_parent, dst_parent);
                }
                self.destroy_inode(dst_ino);
            }
        }
        debug!("rename {from} -> {to}");
        Ok(())
    }

    /// Sets the modification time of the file or directory at `path`.
    pub fn utimens(&mut self, path: &str, sec: i64, nsec: i64) -> Result<(), FsError> {
        let ino = self.resolve(path)?;
        let inode = self.inode_mut(ino);
        inode.mtime_sec.set(sec);
        inode.mtime_nsec.set(nsec);
        Ok(())
    }

    /// Returns the attributes of inode `ino`.
    pub(crate) fn stat(&self, ino: u32) -> FileStat {
        let inode = self.inode(ino);
        FileStat {
            ino,
            kind: inode.file_kind(),
            mode: inode.mode.get(),
            links: inode.links.get(),
            size: inode.size.get(),
            blocks: ceil_division(inode.size.get(), 512),
            mtime_sec: inode.mtime_sec.get(),
            mtime_nsec: inode.mtime_nsec.get(),
        }
    }

    /// Fails with `NoSpace` unless at least `inodes` inodes and `blocks`
    /// blocks are free.
    fn check_space(&self, inodes: u64, blocks: u64) -> Result<(), FsError> {
        let sb = self.sb();
        if sb.free_inodes_count.get() < inodes || sb.free_blocks_count.get() < blocks {
            return Err(FsError::NoSpace);
        }
        Ok(())
    }

    /// Number of blocks a new entry in `dir` would require: one when its
    /// entry table currently ends on a block boundary.
    fn dentry_block_needed(&self, dir: u32) -> u64 {
        (self.inode(dir).size.get() % BLOCK_SIZE as u64 == 0) as u64
    }

    /// Frees everything belonging to inode `ino`: data blocks, extent block
    /// and the inode itself.
    fn destroy_inode(&mut self, ino: u32) {
        self.free_data(ino);
        let extent_block = self.inode(ino).extent_block.get();
        self.set_bit(BitmapKind::Block, extent_block, false);
        self.set_bit(BitmapKind::Inode, ino, false);
    }

    /// Attaches a moved directory to its new parent: rewrites `..`, the
    /// parent field, and drops the old parent's link to it.
    fn reparent(&mut self, ino: u32, old_parent: u32, new_parent: u32) {
        if let Some((blk, slot)) = self.lookup_dentry(ino, b"..") {
            self.dentry_mut(blk, slot).ino.set(new_parent);
        }
        self.inode_mut(ino).parent.set(new_parent);
        let links = self.inode(old_parent).links.get() - 1;
        self.inode_mut(old_parent).links.set(links);
    }

    // Typed accessors. The records are alignment-1 little-endian layouts,
    // so the casts below cannot fail on correctly sized slices.

    pub(crate) fn sb(&self) -> &Superblock {
        Superblock::ref_from_bytes(&self.img[..SUPERBLOCK_SIZE]).unwrap()
    }

    pub(crate) fn sb_mut(&mut self) -> &mut Superblock {
        Superblock::mut_from_bytes(&mut self.img[..SUPERBLOCK_SIZE]).unwrap()
    }

    fn inode_offset(&self, ino: u32) -> usize {
        debug_assert!((ino as u64) < self.sb().inodes_count.get());
        self.sb().inode_table_start.get() as usize * BLOCK_SIZE + ino as usize * INODE_SIZE
    }

    pub(crate) fn inode(&self, ino: u32) -> &Inode {
        let off = self.inode_offset(ino);
        Inode::ref_from_bytes(&self.img[off..off + INODE_SIZE]).unwrap()
    }

    pub(crate) fn inode_mut(&mut self, ino: u32) -> &mut Inode {
        let off = self.inode_offset(ino);
        Inode::mut_from_bytes(&mut self.img[off..off + INODE_SIZE]).unwrap()
    }

    pub(crate) fn block(&self, blk: u32) -> &[u8] {
        let off = blk as usize * BLOCK_SIZE;
        &self.img[off..off + BLOCK_SIZE]
    }

    pub(crate) fn block_mut(&mut self, blk: u32) -> &mut [u8] {
        let off = blk as usize * BLOCK_SIZE;
        &mut self.img[off..off + BLOCK_SIZE]
    }

    /// Reads the extent record in `slot` of `ino`'s extent block.
    pub(crate) fn extent(&self, ino: u32, slot: usize) -> Extent {
        let off = self.inode(ino).extent_block.get() as usize * BLOCK_SIZE
            + slot * size_of::<Extent>();
        Extent::read_from_bytes(&self.img[off..off + size_of::<Extent>()]).unwrap()
    }

    /// Writes the extent record in `slot` of `ino`'s extent block.
    pub(crate) fn set_extent(&mut self, ino: u32, slot: usize, extent: Extent) {
        let off = self.inode(ino).extent_block.get() as usize * BLOCK_SIZE
            + slot * size_of::<Extent>();
        extent
            .write_to(&mut self.img[off..off + size_of::<Extent>()])
            .unwrap();
    }

    /// Reads the dentry in `slot` of block `blk`.
    pub(crate) fn dentry(&self, blk: u32, slot: usize) -> &Dentry {
        let off = blk as usize * BLOCK_SIZE + slot * DENTRY_SIZE;
        Dentry::ref_from_bytes(&self.img[off..off + DENTRY_SIZE]).unwrap()
    }

    /// Mutable access to the dentry in `slot` of block `blk`.
    pub(crate) fn dentry_mut(&mut self, blk: u32, slot: usize) -> &mut Dentry {
        let off = blk as usize * BLOCK_SIZE + slot * DENTRY_SIZE;
        Dentry::mut_from_bytes(&mut self.img[off..off + DENTRY_SIZE]).unwrap()
    }
}

/// Integer division, rounding up.
pub(crate) fn ceil_division(a: u64, b: u64) -> u64 {
    a.div_ceil(b)
}
