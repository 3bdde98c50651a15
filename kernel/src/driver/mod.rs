//! Block devices underneath the buffer cache.

mod image;
mod ramdisk;

pub use image::ImageDisk;
pub use ramdisk::RamDisk;

use crate::define::fs::BSIZE;
use crate::error::Result;

/// Synchronous whole-block I/O.
///
/// Both calls may sleep; the buffer cache only issues them while holding the
/// buffer's sleeplock and no spinlock.
pub trait BlockDevice: Send + Sync {
    fn read_block(&self, dev: u32, blockno: u32, buf: &mut [u8; BSIZE]) -> Result<()>;
    fn write_block(&self, dev: u32, blockno: u32, buf: &[u8; BSIZE]) -> Result<()>;
}
