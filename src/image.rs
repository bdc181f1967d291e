//! Mapping of the backing image into memory.

use crate::disk::BLOCK_SIZE;
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::io;
use std::ops::{Deref, DerefMut};
use std::path::Path;

/// A filesystem image mapped read-write into memory.
///
/// The whole filesystem lives in this byte region; the core addresses it
/// with block-number arithmetic only. Dropping the image unmaps it, without
/// flushing unless [`Image::flush`] was called.
#[derive(Debug)]
pub struct Image {
    map: MmapMut,
}

impl Image {
    /// Maps the image file at `path`.
    ///
    /// The file must exist and its size must be a positive multiple of the
    /// block size.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len == 0 || len % BLOCK_SIZE as u64 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("image size must be a positive multiple of {BLOCK_SIZE} bytes"),
            ));
        }
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { map })
    }

    /// Creates an anonymous image of `len` bytes, not backed by a file.
    ///
    /// `len` must be a positive multiple of the block size. The test suite
    /// formats these instead of scratch files.
    pub fn anonymous(len: usize) -> io::Result<Self> {
        if len == 0 || len % BLOCK_SIZE != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("image size must be a positive multiple of {BLOCK_SIZE} bytes"),
            ));
        }
        let map = MmapMut::map_anon(len)?;
        Ok(Self { map })
    }

    /// Returns the size of the image in bytes.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Tells whether the image is empty. Never true for a mapped image.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Synchronously flushes the whole region to stable storage.
    pub fn flush(&self) -> io::Result<()> {
        self.map.flush()
    }
}

impl Deref for Image {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.map
    }
}

impl DerefMut for Image {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn anonymous_must_be_block_aligned() {
        assert!(Image::anonymous(0).is_err());
        assert!(Image::anonymous(BLOCK_SIZE + 1).is_err());
        let img = Image::anonymous(4 * BLOCK_SIZE).unwrap();
        assert_eq!(img.len(), 4 * BLOCK_SIZE);
    }

    #[test]
    fn open_rejects_unaligned_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 100]).unwrap();
        file.flush().unwrap();
        assert!(Image::open(file.path()).is_err());
    }

    #[test]
    fn open_maps_aligned_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(2 * BLOCK_SIZE as u64).unwrap();
        let img = Image::open(file.path()).unwrap();
        assert_eq!(img.len(), 2 * BLOCK_SIZE);
    }
}
