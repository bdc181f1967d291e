//! Directory entry tables.
//!
//! A directory body is a dense array of fixed-size entries stored in the
//! inode's extents; the entry at logical index `size / 256 - 1` is the
//! tail. Deletion swaps the tail into the hole so the array never has
//! gaps.

use super::ExtentFs;
use super::alloc::BitmapKind;
use crate::disk::{DENTRIES_PER_BLOCK, DENTRY_SIZE, NAME_MAX};
use crate::error::FsError;
use zerocopy::byteorder::little_endian::U32;

impl ExtentFs {
    /// Finds the entry named `name` in directory `dir` and returns its
    /// (block, slot) position.
    ///
    /// Within an extent the scan stops at the first vacant slot; entries
    /// never follow a hole.
    pub(crate) fn lookup_dentry(&self, dir: u32, name: &[u8]) -> Option<(u32, usize)> {
        let used = self.inode(dir).used_extents();
        for ext_slot in 0..used {
            let e = self.extent(dir, ext_slot);
            'extent: for b in 0..e.count.get() {
                let blk = e.start.get() + b;
                for slot in 0..DENTRIES_PER_BLOCK {
                    let dentry = self.dentry(blk, slot);
                    if dentry.is_vacant() {
                        break 'extent;
                    }
                    if dentry.name_bytes() == name {
                        return Some((blk, slot));
                    }
                }
            }
        }
        None
    }

    /// Writes a new entry for `ino` at the tail of directory `dir`.
    pub(crate) fn insert_dentry(&mut self, dir: u32, name: &[u8], ino: u32) -> Result<(), FsError> {
        if name.len() >= NAME_MAX {
            return Err(FsError::NameTooLong);
        }
        let (blk, slot) = self.dir_vacancy(dir)?;
        let dentry = self.dentry_mut(blk, slot);
        dentry.ino = U32::new(ino);
        dentry.set_name(name);
        let size = self.inode(dir).size.get() + DENTRY_SIZE as u64;
        self.inode_mut(dir).size.set(size);
        self.touch(dir);
        Ok(())
    }

    /// Removes the entry at `(blk, slot)` from directory `dir` by moving
    /// the logical tail into its place, releasing the tail block and its
    /// extent slot when they empty out.
    pub(crate) fn remove_dentry(&mut self, dir: u32, blk: u32, slot: usize) {
        let size = self.inode(dir).size.get();
        let count = size / DENTRY_SIZE as u64;
        let in_last = match (count % DENTRIES_PER_BLOCK as u64) as usize {
            0 => DENTRIES_PER_BLOCK,
            partial => partial,
        };
        let used = self.inode(dir).used_extents();
        let mut last_extent = self.extent(dir, used - 1);
        let tail_blk = last_extent.end() - 1;
        let tail_slot = in_last - 1;
        if (tail_blk, tail_slot) != (blk, slot) {
            let (tail_ino, tail_name) = {
                let tail = self.dentry(tail_blk, tail_slot);
                (tail.ino, tail.name)
            };
            let vacancy = self.dentry_mut(blk, slot);
            vacancy.ino = tail_ino;
            vacancy.name = tail_name;
        }
        let tail = self.dentry_mut(tail_blk, tail_slot);
        tail.ino = U32::new(0);
        tail.name.fill(0);
        self.inode_mut(dir).size.set(size - DENTRY_SIZE as u64);
        if in_last == 1 {
            // The tail block emptied out
            self.set_bit(BitmapKind::Block, tail_blk, false);
            last_extent.count.set(last_extent.count.get() - 1);
            if last_extent.count.get() == 0 {
                last_extent.start.set(0);
                let free = self.inode(dir).free_extents.get();
                self.inode_mut(dir).free_extents.set(free + 1);
            }
            self.set_extent(dir, used - 1, last_extent);
        }
        self.touch(dir);
    }

    /// Returns every entry of directory `dir` in logical order.
    pub(crate) fn entries(&self, dir: u32) -> Vec<(u32, Vec<u8>)> {
        let count = (self.inode(dir).size.get() / DENTRY_SIZE as u64) as usize;
        let mut out = Vec::with_capacity(count);
        let used = self.inode(dir).used_extents();
        'walk: for ext_slot in 0..used {
            let e = self.extent(dir, ext_slot);
            for b in 0..e.count.get() {
                let blk = e.start.get() + b;
                for slot in 0..DENTRIES_PER_BLOCK {
                    if out.len() == count {
                        break 'walk;
                    }
                    let dentry = self.dentry(blk, slot);
                    out.push((dentry.ino.get(), dentry.name_bytes().to_vec()));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::ROOT_INO;
    use crate::image::Image;

    fn fs() -> ExtentFs {
        ExtentFs::format(Image::anonymous(1 << 20).unwrap(), 64).unwrap()
    }

    #[test]
    fn insert_then_lookup() {
        let mut fs = fs();
        fs.create("/hello", 0o644).unwrap();
        let ino = fs.resolve("/hello").unwrap();
        let (blk, slot) = fs.lookup_dentry(ROOT_INO, b"hello").unwrap();
        assert_eq!(fs.dentry(blk, slot).ino.get(), ino);
        assert!(fs.lookup_dentry(ROOT_INO, b"nope").is_none());
    }

    #[test]
    fn names_at_the_limit() {
        let mut fs = fs();
        let long = "x".repeat(NAME_MAX - 1);
        fs.create(&format!("/{long}"), 0o644).unwrap();
        assert!(fs.getattr(&format!("/{long}")).is_ok());
        let too_long = "x".repeat(NAME_MAX);
        assert_eq!(
            fs.create(&format!("/{too_long}"), 0o644).unwrap_err(),
            FsError::NameTooLong
        );
    }

    #[test]
    fn removal_compacts_by_promoting_the_tail() {
        let mut fs = fs();
        fs.create("/a", 0o644).unwrap();
        fs.create("/b", 0o644).unwrap();
        fs.create("/c", 0o644).unwrap();
        fs.unlink("/a").unwrap();
        // `c` moved into `a`'s slot; logical order reflects the swap
        let names: Vec<_> = fs
            .entries(ROOT_INO)
            .into_iter()
            .map(|(_, name)| name)
            .collect();
        assert_eq!(names, vec![b".".to_vec(), b"..".to_vec(), b"c".to_vec(), b"b".to_vec()]);
        assert!(fs.getattr("/c").is_ok());
        assert!(fs.getattr("/b").is_ok());
    }

    #[test]
    fn entry_table_grows_and_shrinks_by_whole_blocks() {
        let mut fs = fs();
        // `.` and `..` plus 14 files fill the first block
        for i in 0..14 {
            fs.create(&format!("/f{i}"), 0o644).unwrap();
        }
        assert_eq!(fs.inode(ROOT_INO).size.get(), 4096);
        assert_eq!(fs.allocated_blocks(ROOT_INO), 1);
        let free_before = fs.sb().free_blocks_count.get();
        fs.create("/overflow", 0o644).unwrap();
        assert_eq!(fs.allocated_blocks(ROOT_INO), 2);
        // one block for the new file's extents, one for the entry table
        assert_eq!(fs.sb().free_blocks_count.get(), free_before - 2);
        fs.unlink("/overflow").unwrap();
        assert_eq!(fs.allocated_blocks(ROOT_INO), 1);
        assert_eq!(fs.sb().free_blocks_count.get(), free_before);
    }
}
