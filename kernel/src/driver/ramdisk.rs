use core::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::BlockDevice;
use crate::define::fs::BSIZE;
use crate::error::{FsError, Result};

/// Memory-backed disk. Every device number maps onto the same blocks.
/// Counts the requests it serves, so callers can tell cache hits from
/// disk traffic.
pub struct RamDisk {
    blocks: Mutex<Vec<[u8; BSIZE]>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl RamDisk {
    /// A zero-filled disk of `nblocks` blocks.
    pub fn new(nblocks: u32) -> Self {
        Self {
            blocks: Mutex::new(vec![[0; BSIZE]; nblocks as usize]),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// Copy of a block as it is on the disk, bypassing any cache.
    pub fn peek(&self, blockno: u32) -> Option<[u8; BSIZE]> {
        self.blocks.lock().get(blockno as usize).copied()
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, _dev: u32, blockno: u32, buf: &mut [u8; BSIZE]) -> Result<()> {
        let blocks = self.blocks.lock();
        let block = blocks.get(blockno as usize).ok_or(FsError::BadBlock(blockno))?;
        buf.copy_from_slice(block);
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_block(&self, _dev: u32, blockno: u32, buf: &[u8; BSIZE]) -> Result<()> {
        let mut blocks = self.blocks.lock();
        let block = blocks.get_mut(blockno as usize).ok_or(FsError::BadBlock(blockno))?;
        block.copy_from_slice(buf);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_beyond_the_disk_are_rejected() {
        let disk = RamDisk::new(4);
        let mut buf = [0u8; BSIZE];
        assert!(matches!(disk.read_block(1, 4, &mut buf), Err(FsError::BadBlock(4))));
        assert!(matches!(disk.write_block(1, 9, &buf), Err(FsError::BadBlock(9))));
        assert_eq!(disk.reads() + disk.writes(), 0);
    }

    #[test]
    fn writes_land_on_the_disk() {
        let disk = RamDisk::new(4);
        let mut buf = [0u8; BSIZE];
        buf[3] = 0xaa;
        disk.write_block(1, 2, &buf).unwrap();
        let mut back = [0u8; BSIZE];
        disk.read_block(1, 2, &mut back).unwrap();
        assert_eq!(back[3], 0xaa);
        assert_eq!(disk.peek(2).unwrap()[3], 0xaa);
        assert_eq!((disk.reads(), disk.writes()), (1, 1));
    }
}
