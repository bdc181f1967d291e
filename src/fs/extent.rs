//! Per-inode extent bookkeeping.
//!
//! Each inode owns a single extent block: a dense prefix of in-use
//! (start, count) records followed by zeroed free slots. The last used
//! extent always ends at the logical tail of the file, so growth first
//! tries to extend it in place.

use super::alloc::BitmapKind;
use super::{ExtentFs, ceil_division};
use crate::disk::{BLOCK_SIZE, DENTRY_SIZE, Extent};
use crate::error::FsError;
use zerocopy::byteorder::little_endian::U32;

/// Builds an extent record.
fn extent(start: u32, count: u32) -> Extent {
    Extent {
        start: U32::new(start),
        count: U32::new(count),
    }
}

impl ExtentFs {
    /// Sum of the block counts of all used extents.
    pub(crate) fn allocated_blocks(&self, ino: u32) -> u64 {
        let used = self.inode(ino).used_extents();
        (0..used)
            .map(|slot| self.extent(ino, slot).count.get() as u64)
            .sum()
    }

    /// Physical block number of the `n`th data block of `ino`.
    pub(crate) fn nth_block(&self, ino: u32, n: u64) -> u32 {
        let used = self.inode(ino).used_extents();
        let mut remaining = n;
        for slot in 0..used {
            let e = self.extent(ino, slot);
            if remaining < e.count.get() as u64 {
                return e.start.get() + remaining as u32;
            }
            remaining -= e.count.get() as u64;
        }
        unreachable!("block {n} beyond the extents of inode {ino}");
    }

    /// Attaches `new_blk` as the logical tail of `ino`: the last extent
    /// grows when the block is contiguous with it, otherwise a free slot is
    /// consumed.
    pub(crate) fn append_block(&mut self, ino: u32, new_blk: u32) -> Result<(), FsError> {
        let used = self.inode(ino).used_extents();
        if used > 0 {
            let mut last = self.extent(ino, used - 1);
            if last.end() == new_blk {
                last.count.set(last.count.get() + 1);
                self.set_extent(ino, used - 1, last);
                return Ok(());
            }
        }
        let free = self.inode(ino).free_extents.get();
        if free == 0 {
            return Err(FsError::NoSpace);
        }
        self.set_extent(ino, used, extent(new_blk, 1));
        self.inode_mut(ino).free_extents.set(free - 1);
        Ok(())
    }

    /// Returns the (block, slot) position for a new entry in directory
    /// `ino`, allocating a fresh block when the entry table ends on a block
    /// boundary.
    pub(crate) fn dir_vacancy(&mut self, ino: u32) -> Result<(u32, usize), FsError> {
        let size = self.inode(ino).size.get();
        if size % BLOCK_SIZE as u64 != 0 {
            // The tail block still has room
            let blk = self.nth_block(ino, size / BLOCK_SIZE as u64);
            let slot = (size % BLOCK_SIZE as u64) as usize / DENTRY_SIZE;
            return Ok((blk, slot));
        }
        let new_blk = self.alloc_block()?;
        // A recycled block may still hold stale entries; scans rely on
        // zeroed vacancies
        self.block_mut(new_blk).fill(0);
        let used = self.inode(ino).used_extents();
        for slot in 0..used {
            let mut e = self.extent(ino, slot);
            if e.end() != new_blk {
                continue;
            }
            e.count.set(e.count.get() + 1);
            if slot != used - 1 {
                // The absorbing extent now holds the tail: swap it into the
                // last position
                let last = self.extent(ino, used - 1);
                self.set_extent(ino, slot, last);
                self.set_extent(ino, used - 1, e);
            } else {
                self.set_extent(ino, slot, e);
            }
            return Ok((new_blk, 0));
        }
        let free = self.inode(ino).free_extents.get();
        if free == 0 {
            self.set_bit(BitmapKind::Block, new_blk, false);
            return Err(FsError::NoSpace);
        }
        self.set_extent(ino, used, extent(new_blk, 1));
        self.inode_mut(ino).free_extents.set(free - 1);
        Ok((new_blk, 0))
    }

    /// Allocates `ceil(bytes / BLOCK_SIZE)` zero-filled blocks and appends
    /// them to `ino`'s tail.
    pub(crate) fn extend_data(&mut self, ino: u32, bytes: u64) -> Result<(), FsError> {
        let blocks = ceil_division(bytes, BLOCK_SIZE as u64);
        for _ in 0..blocks {
            let blk = self.alloc_block()?;
            self.block_mut(blk).fill(0);
            if let Err(e) = self.append_block(ino, blk) {
                self.set_bit(BitmapKind::Block, blk, false);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Releases every data block past `ceil(new_size / BLOCK_SIZE)`,
    /// trimming the boundary extent and returning emptied slots to the free
    /// pool.
    pub(crate) fn shrink_data(&mut self, ino: u32, new_size: u64) {
        let keep = ceil_division(new_size, BLOCK_SIZE as u64);
        let used = self.inode(ino).used_extents();
        let mut seen = 0u64;
        let mut freed_slots = 0u32;
        for slot in 0..used {
            let e = self.extent(ino, slot);
            let start = e.start.get();
            let count = e.count.get();
            if seen >= keep {
                for i in 0..count {
                    self.set_bit(BitmapKind::Block, start + i, false);
                }
                self.set_extent(ino, slot, extent(0, 0));
                freed_slots += 1;
            } else if seen + count as u64 > keep {
                let keep_here = (keep - seen) as u32;
                for i in keep_here..count {
                    self.set_bit(BitmapKind::Block, start + i, false);
                }
                let mut e = e;
                e.count.set(keep_here);
                self.set_extent(ino, slot, e);
            }
            seen += count as u64;
        }
        let free = self.inode(ino).free_extents.get();
        self.inode_mut(ino).free_extents.set(free + freed_slots);
    }

    /// Releases all data blocks of `ino`. The extent block itself stays
    /// allocated.
    pub(crate) fn free_data(&mut self, ino: u32) {
        let used = self.inode(ino).used_extents();
        for slot in 0..used {
            let e = self.extent(ino, slot);
            let start = e.start.get();
            for i in 0..e.count.get() {
                self.set_bit(BitmapKind::Block, start + i, false);
            }
        }
    }
}
