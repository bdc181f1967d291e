//! Inode allocation and timestamp management.

use super::ExtentFs;
use super::alloc::BitmapKind;
use crate::disk::{EXTENTS_PER_BLOCK, FileKind, ROOT_INO};
use crate::error::FsError;
use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current realtime clock as (seconds, nanoseconds).
fn timestamp_now() -> (i64, i64) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (now.as_secs() as i64, now.subsec_nanos() as i64)
}

impl ExtentFs {
    /// Allocates and initializes a new inode of the given kind.
    ///
    /// The extent block is allocated immediately; a directory also gets its
    /// first data block, holding the `.` and `..` entries. The caller has
    /// already checked the free counters.
    pub(crate) fn create_inode(
        &mut self,
        mode: u32,
        parent: u32,
        kind: FileKind,
    ) -> Result<u32, FsError> {
        let ino = self
            .find_free_bit(BitmapKind::Inode)
            .ok_or(FsError::NoSpace)?;
        self.set_bit(BitmapKind::Inode, ino, true);
        let extent_block = match self.alloc_block() {
            Ok(blk) => blk,
            Err(e) => {
                self.set_bit(BitmapKind::Inode, ino, false);
                return Err(e);
            }
        };
        self.block_mut(extent_block).fill(0);
        let (sec, nsec) = timestamp_now();
        let inode = self.inode_mut(ino);
        inode.mode.set(mode);
        inode.kind.set(kind.as_raw());
        inode.parent.set(parent);
        inode.mtime_sec.set(sec);
        inode.mtime_nsec.set(nsec);
        inode.free_extents.set(EXTENTS_PER_BLOCK as u32);
        inode.extent_block.set(extent_block);
        inode.size.set(0);
        match kind {
            FileKind::Directory => {
                inode.links.set(2);
                self.insert_dentry(ino, b".", ino)?;
                self.insert_dentry(ino, b"..", parent)?;
            }
            FileKind::Regular => inode.links.set(1),
        }
        Ok(ino)
    }

    /// Stamps `ino` with the current time and propagates the new timestamp
    /// up the parent chain to the root.
    pub(crate) fn touch(&mut self, ino: u32) {
        let (sec, nsec) = timestamp_now();
        let mut current = ino;
        loop {
            let inode = self.inode_mut(current);
            inode.mtime_sec.set(sec);
            inode.mtime_nsec.set(nsec);
            if current == ROOT_INO {
                break;
            }
            current = self.inode(current).parent.get();
        }
    }
}
