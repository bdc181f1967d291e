//! File content read, write and truncate.

use super::{ExtentFs, ceil_division};
use crate::disk::{BLOCK_SIZE, FileKind};
use crate::error::FsError;
use log::debug;
use std::ops::Range;

impl ExtentFs {
    /// Reads from the file at `path` into `buf`, starting at `offset`.
    ///
    /// Returns the number of bytes actually read; when the request reaches
    /// past end-of-file the remainder of `buf` is zero-filled. An offset at
    /// or beyond end-of-file reads zero bytes.
    pub fn read(&self, path: &str, buf: &mut [u8], offset: u64) -> Result<usize, FsError> {
        let ino = self.resolve(path)?;
        if self.inode(ino).file_kind() != FileKind::Regular {
            return Err(FsError::IsDirectory);
        }
        let size = self.inode(ino).size.get();
        if offset >= size {
            return Ok(0);
        }
        let n = buf.len().min((size - offset) as usize);
        let mut copied = 0;
        for range in self.data_ranges(ino, offset, n) {
            let len = range.len();
            buf[copied..copied + len].copy_from_slice(&self.img[range]);
            copied += len;
        }
        // The rest of the request reads as zeros
        buf[n..].fill(0);
        Ok(n)
    }

    /// Writes `data` into the file at `path` at `offset`, growing it (and
    /// zero-filling any gap) when the write reaches past end-of-file.
    ///
    /// Returns the number of bytes written, always `data.len()` on success.
    pub fn write(&mut self, path: &str, data: &[u8], offset: u64) -> Result<usize, FsError> {
        let ino = self.resolve(path)?;
        if self.inode(ino).file_kind() != FileKind::Regular {
            return Err(FsError::IsDirectory);
        }
        let end = offset + data.len() as u64;
        if end > self.inode(ino).size.get() {
            self.truncate_ino(ino, end)?;
        }
        let mut copied = 0;
        for range in self.data_ranges(ino, offset, data.len()) {
            let len = range.len();
            self.img[range].copy_from_slice(&data[copied..copied + len]);
            copied += len;
        }
        self.touch(ino);
        debug!("write {path}: {} bytes at offset {offset}", data.len());
        Ok(data.len())
    }

    /// Sets the size of the file at `path`, zero-filling on growth.
    pub fn truncate(&mut self, path: &str, new_size: u64) -> Result<(), FsError> {
        let ino = self.resolve(path)?;
        self.truncate_ino(ino, new_size)?;
        debug!("truncate {path}: {new_size} bytes");
        Ok(())
    }

    /// Truncate by inode number. Fails on directories.
    pub(crate) fn truncate_ino(&mut self, ino: u32, new_size: u64) -> Result<(), FsError> {
        if self.inode(ino).file_kind() != FileKind::Regular {
            return Err(FsError::IsDirectory);
        }
        let size = self.inode(ino).size.get();
        let capacity = self.allocated_blocks(ino) * BLOCK_SIZE as u64;
        if new_size > capacity {
            self.check_space(0, ceil_division(new_size - capacity, BLOCK_SIZE as u64))?;
        }
        if new_size > size {
            // Bytes between the old and new size may hold stale data from
            // before an earlier shrink; they must read back as zeros
            self.zero_range(ino, size, new_size.min(capacity));
        }
        if new_size > capacity {
            self.extend_data(ino, new_size - capacity)?;
        } else if new_size < size {
            self.shrink_data(ino, new_size);
        }
        self.inode_mut(ino).size.set(new_size);
        self.touch(ino);
        Ok(())
    }

    /// Zero-fills the byte range `[from, to)` of `ino`'s content. The range
    /// must lie within the allocated blocks.
    fn zero_range(&mut self, ino: u32, from: u64, to: u64) {
        if from >= to {
            return;
        }
        for range in self.data_ranges(ino, from, (to - from) as usize) {
            self.img[range].fill(0);
        }
    }

    /// Maps a byte range of the file onto image byte ranges, one per
    /// contiguous run, by walking the used extents in order.
    fn data_ranges(&self, ino: u32, offset: u64, len: usize) -> Vec<Range<usize>> {
        let mut ranges = Vec::new();
        let mut skip = offset / BLOCK_SIZE as u64;
        let mut in_off = (offset % BLOCK_SIZE as u64) as usize;
        let mut remaining = len;
        let used = self.inode(ino).used_extents();
        for slot in 0..used {
            if remaining == 0 {
                break;
            }
            let e = self.extent(ino, slot);
            let count = e.count.get() as u64;
            if skip >= count {
                skip -= count;
                continue;
            }
            let base = (e.start.get() as u64 + skip) as usize * BLOCK_SIZE + in_off;
            let avail = (count - skip) as usize * BLOCK_SIZE - in_off;
            let chunk = remaining.min(avail);
            ranges.push(base..base + chunk);
            remaining -= chunk;
            skip = 0;
            in_off = 0;
        }
        debug_assert_eq!(remaining, 0, "range beyond allocated blocks");
        ranges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Image;

    fn fs() -> ExtentFs {
        ExtentFs::format(Image::anonymous(1 << 20).unwrap(), 32).unwrap()
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut fs = fs();
        fs.create("/f", 0o644).unwrap();
        assert_eq!(fs.write("/f", b"hello", 0).unwrap(), 5);
        let mut buf = [0u8; 5];
        assert_eq!(fs.read("/f", &mut buf, 0).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(fs.getattr("/f").unwrap().size, 5);
    }

    #[test]
    fn read_past_eof_pads_with_zeros() {
        let mut fs = fs();
        fs.create("/f", 0o644).unwrap();
        fs.write("/f", b"abc", 0).unwrap();
        let mut buf = [0xffu8; 8];
        assert_eq!(fs.read("/f", &mut buf, 0).unwrap(), 3);
        assert_eq!(&buf, b"abc\0\0\0\0\0");
        assert_eq!(fs.read("/f", &mut buf, 3).unwrap(), 0);
        assert_eq!(fs.read("/f", &mut buf, 100).unwrap(), 0);
    }

    #[test]
    fn write_across_a_block_boundary() {
        let mut fs = fs();
        fs.create("/f", 0o644).unwrap();
        fs.truncate("/f", 8192).unwrap();
        fs.write("/f", b"X", 4095).unwrap();
        fs.write("/f", b"Y", 4096).unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(fs.read("/f", &mut buf, 4095).unwrap(), 2);
        assert_eq!(&buf, b"XY");
        let mut last = [0xffu8; 1];
        assert_eq!(fs.read("/f", &mut last, 8191).unwrap(), 1);
        assert_eq!(last, [0]);
    }

    #[test]
    fn write_past_eof_zero_fills_the_gap() {
        let mut fs = fs();
        fs.create("/f", 0o644).unwrap();
        fs.write("/f", b"start", 0).unwrap();
        fs.write("/f", b"end", 5000).unwrap();
        assert_eq!(fs.getattr("/f").unwrap().size, 5003);
        let mut buf = vec![0xffu8; 5003];
        assert_eq!(fs.read("/f", &mut buf, 0).unwrap(), 5003);
        assert_eq!(&buf[..5], b"start");
        assert!(buf[5..5000].iter().all(|b| *b == 0));
        assert_eq!(&buf[5000..], b"end");
    }

    #[test]
    fn writing_at_the_size_appends() {
        let mut fs = fs();
        fs.create("/f", 0o644).unwrap();
        fs.write("/f", b"abc", 0).unwrap();
        fs.write("/f", b"def", 3).unwrap();
        assert_eq!(fs.getattr("/f").unwrap().size, 6);
        let mut buf = [0u8; 6];
        fs.read("/f", &mut buf, 0).unwrap();
        assert_eq!(&buf, b"abcdef");
    }

    #[test]
    fn truncate_shrinks_without_moving_data() {
        let mut fs = fs();
        fs.create("/f", 0o644).unwrap();
        fs.write("/f", &[b'A'; 4096], 0).unwrap();
        fs.truncate("/f", 1).unwrap();
        let mut buf = vec![0xffu8; 4096];
        assert_eq!(fs.read("/f", &mut buf, 0).unwrap(), 1);
        assert_eq!(buf[0], b'A');
        assert!(buf[1..].iter().all(|b| *b == 0));
    }

    #[test]
    fn truncate_up_zeroes_resurfaced_bytes() {
        let mut fs = fs();
        fs.create("/f", 0o644).unwrap();
        fs.write("/f", &[b'A'; 4096], 0).unwrap();
        fs.truncate("/f", 1).unwrap();
        fs.truncate("/f", 4096).unwrap();
        let mut buf = vec![0xffu8; 4096];
        assert_eq!(fs.read("/f", &mut buf, 0).unwrap(), 4096);
        assert_eq!(buf[0], b'A');
        assert!(buf[1..].iter().all(|b| *b == 0));
    }

    #[test]
    fn truncate_to_zero_frees_all_data_blocks() {
        let mut fs = fs();
        fs.create("/f", 0o644).unwrap();
        let after_create = fs.statfs().free_blocks;
        fs.write("/f", &[7u8; 3 * 4096], 0).unwrap();
        fs.truncate("/f", 0).unwrap();
        assert_eq!(fs.statfs().free_blocks, after_create);
        assert_eq!(fs.getattr("/f").unwrap().size, 0);
    }

    #[test]
    fn truncate_rejects_directories() {
        let mut fs = fs();
        fs.mkdir("/d", 0o755).unwrap();
        assert_eq!(fs.truncate("/d", 0).unwrap_err(), FsError::IsDirectory);
    }

    #[test]
    fn fragmented_file_reads_across_extents() {
        let mut fs = fs();
        fs.create("/a", 0o644).unwrap();
        fs.create("/b", 0o644).unwrap();
        // Interleave growth so /a's blocks cannot stay contiguous
        fs.truncate("/a", 4096).unwrap();
        fs.truncate("/b", 4096).unwrap();
        fs.truncate("/a", 8192).unwrap();
        let a = fs.resolve("/a").unwrap();
        assert_eq!(fs.inode(a).used_extents(), 2);
        let payload: Vec<u8> = (0..100u8).collect();
        fs.write("/a", &payload, 4090).unwrap();
        let mut buf = vec![0u8; 100];
        assert_eq!(fs.read("/a", &mut buf, 4090).unwrap(), 100);
        assert_eq!(buf, payload);
    }
}
