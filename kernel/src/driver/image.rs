use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::info;
use parking_lot::Mutex;

use super::BlockDevice;
use crate::define::fs::BSIZE;
use crate::error::{FsError, Result};

/// Disk backed by an image file, one file system block per `BSIZE` bytes.
pub struct ImageDisk {
    file: Mutex<File>,
    nblocks: u32,
}

impl ImageDisk {
    /// Create (or truncate) an image of `nblocks` zeroed blocks.
    pub fn create(path: impl AsRef<Path>, nblocks: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())
            .map_err(FsError::Image)?;
        file.set_len(nblocks as u64 * BSIZE as u64).map_err(FsError::Image)?;
        info!("image {}: created with {} blocks", path.as_ref().display(), nblocks);
        Ok(Self { file: Mutex::new(file), nblocks })
    }

    /// Open an existing image; its length must be a whole number of blocks.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())
            .map_err(FsError::Image)?;
        let len = file.metadata().map_err(FsError::Image)?.len();
        if len % BSIZE as u64 != 0 {
            return Err(FsError::Image(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "image length is not a multiple of the block size",
            )));
        }
        let nblocks = (len / BSIZE as u64) as u32;
        info!("image {}: opened with {} blocks", path.as_ref().display(), nblocks);
        Ok(Self { file: Mutex::new(file), nblocks })
    }

    pub fn nblocks(&self) -> u32 {
        self.nblocks
    }

    fn seek_to(&self, file: &mut File, blockno: u32) -> Result<()> {
        if blockno >= self.nblocks {
            return Err(FsError::BadBlock(blockno));
        }
        let offset = blockno as u64 * BSIZE as u64;
        file.seek(SeekFrom::Start(offset))
            .map_err(|source| FsError::Io { blockno, source })?;
        Ok(())
    }
}

impl BlockDevice for ImageDisk {
    fn read_block(&self, _dev: u32, blockno: u32, buf: &mut [u8; BSIZE]) -> Result<()> {
        let mut file = self.file.lock();
        self.seek_to(&mut file, blockno)?;
        file.read_exact(buf).map_err(|source| FsError::Io { blockno, source })
    }

    fn write_block(&self, _dev: u32, blockno: u32, buf: &[u8; BSIZE]) -> Result<()> {
        let mut file = self.file.lock();
        self.seek_to(&mut file, blockno)?;
        file.write_all(buf).map_err(|source| FsError::Io { blockno, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_survive_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fs.img");
        let mut buf = [0u8; BSIZE];
        buf[0] = 1;
        buf[BSIZE - 1] = 2;
        {
            let disk = ImageDisk::create(&path, 8).unwrap();
            disk.write_block(1, 5, &buf).unwrap();
        }
        let disk = ImageDisk::open(&path).unwrap();
        assert_eq!(disk.nblocks(), 8);
        let mut back = [0u8; BSIZE];
        disk.read_block(1, 5, &mut back).unwrap();
        assert_eq!(back, buf);
        assert!(matches!(disk.read_block(1, 8, &mut back), Err(FsError::BadBlock(8))));
    }

    #[test]
    fn ragged_images_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ragged.img");
        std::fs::write(&path, vec![0u8; BSIZE + 3]).unwrap();
        assert!(matches!(ImageDisk::open(&path), Err(FsError::Image(_))));
    }
}
