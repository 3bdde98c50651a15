use std::sync::Arc;

use bit_field::BitField;
use fs_lib::RawSuperBlock;
use log::{debug, error};

use super::{Bcache, LogWrite};
use crate::define::fs::BPB;
use crate::error::{FsError, Result};

/// Hands out and takes back physical blocks.
/// Block 0 is never returned; it means "no block" in address tables.
pub trait BlockAlloc: Send + Sync {
    fn balloc(&self, dev: u32) -> Result<u32>;
    fn bfree(&self, dev: u32, blockno: u32) -> Result<()>;
}

/// Free-block bitmap kept in the bitmap region of the disk,
/// one bit per block, read and written through the buffer cache.
pub struct BitmapAllocator {
    bcache: Arc<Bcache>,
    log: Arc<dyn LogWrite>,
    sb: RawSuperBlock,
}

impl BitmapAllocator {
    pub fn new(bcache: Arc<Bcache>, log: Arc<dyn LogWrite>, sb: RawSuperBlock) -> Self {
        Self { bcache, log, sb }
    }

    /// Zero a block.
    fn bzero(&self, dev: u32, blockno: u32) -> Result<()> {
        let buf = self.bcache.bget_zeroed(dev, blockno)?;
        self.log.write(buf)
    }
}

impl BlockAlloc for BitmapAllocator {
    /// Allocate a zeroed disk block, first fit.
    fn balloc(&self, dev: u32) -> Result<u32> {
        let size = self.sb.size;
        let mut b = 0;
        while b < size {
            let mut buf = self.bcache.bread(dev, self.sb.bitmap_blockno(b))?;
            let mut bi = 0;
            while bi < BPB && b + bi < size {
                let byte = &mut buf.data_mut()[(bi / 8) as usize];
                let bit = (bi % 8) as usize;
                if !byte.get_bit(bit) { // Is block free?
                    byte.set_bit(bit, true);
                    self.log.write(buf)?;
                    self.bzero(dev, b + bi)?;
                    debug!("balloc: block {}", b + bi);
                    return Ok(b + bi);
                }
                bi += 1;
            }
            drop(buf);
            b += BPB;
        }
        error!("balloc: all {} blocks in use", size);
        Err(FsError::NoSpace)
    }

    /// Free a block in the disk by setting the relevant bit in bitmap to 0.
    fn bfree(&self, dev: u32, blockno: u32) -> Result<()> {
        if blockno < self.sb.data_start() || blockno >= self.sb.size {
            error!("bfree: block {} outside the data region", blockno);
            return Err(FsError::BadBlock(blockno));
        }
        let mut buf = self.bcache.bread(dev, self.sb.bitmap_blockno(blockno))?;
        let bi = blockno % BPB;
        let byte = &mut buf.data_mut()[(bi / 8) as usize];
        let bit = (bi % 8) as usize;
        if !byte.get_bit(bit) {
            error!("bfree: block {} already free", blockno);
            return Err(FsError::DoubleFree(blockno));
        }
        byte.set_bit(bit, false);
        self.log.write(buf)?;
        debug!("bfree: block {}", blockno);
        Ok(())
    }
}

/// Write a fresh bitmap: everything before the data region in use,
/// the data region free. Goes straight to disk, bypassing the log.
pub(super) fn format_bitmap(bcache: &Bcache, dev: u32, sb: &RawSuperBlock) -> Result<()> {
    let used = sb.data_start();
    for (i, blockno) in (sb.bmapstart..sb.data_start()).enumerate() {
        let first = i as u32 * BPB;
        let mut buf = bcache.bget_zeroed(dev, blockno)?;
        for b in first..used.min(first + BPB) {
            let bi = b - first;
            buf.data_mut()[(bi / 8) as usize].set_bit((bi % 8) as usize, true);
        }
        buf.bwrite()?;
    }
    Ok(())
}
