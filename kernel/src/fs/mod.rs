//! File system
//!
//! Layers, bottom up:
//! + Blocks: allocator for raw disk blocks.
//! + Log: collects modified blocks and writes them home on commit.
//! + Files: inode allocator, reading, writing, metadata.
//!
//! The buffer cache sits underneath all of them and is the only way any
//! layer touches the disk.

use std::sync::Arc;

use fs_lib::{DiskInode, InodeType, RawSuperBlock};

mod bio;
mod bitmap;
mod inode;
mod log;

pub use bio::{Bcache, BcacheConfig, Buf, BufSnapshot, RefState};
pub use bitmap::{BitmapAllocator, BlockAlloc};
pub use inode::InodeData;
pub use log::{Log, LogWrite};

use crate::define::fs::{FSMAGIC, IPB};
use crate::error::{FsError, Result};

/// Block holding the super block.
const SUPERBLOCK_NO: u32 = 1;

/// A mounted file system: one device, its layout, and the collaborators
/// every inode operation goes through.
pub struct FileSystem {
    dev: u32,
    sb: RawSuperBlock,
    bcache: Arc<Bcache>,
    log: Arc<dyn LogWrite>,
    alloc: Arc<dyn BlockAlloc>,
}

impl FileSystem {
    pub fn new(
        dev: u32,
        sb: RawSuperBlock,
        bcache: Arc<Bcache>,
        log: Arc<dyn LogWrite>,
        alloc: Arc<dyn BlockAlloc>,
    ) -> Self {
        Self { dev, sb, bcache, log, alloc }
    }

    /// Lay down an empty file system on `dev`: super block, cleared log and
    /// inode regions, and a bitmap with every metadata block marked used.
    /// Writes go straight to disk.
    pub fn format(bcache: &Bcache, dev: u32, sb: &RawSuperBlock) -> Result<()> {
        let mut buf = bcache.bget_zeroed(dev, SUPERBLOCK_NO)?;
        sb.encode_into(&mut buf.data_mut()[..]);
        buf.bwrite()?;
        drop(buf);

        for blockno in sb.logstart..sb.bmapstart {
            let mut buf = bcache.bget_zeroed(dev, blockno)?;
            buf.bwrite()?;
        }
        bitmap::format_bitmap(bcache, dev, sb)?;
        ::log::info!(
            "mkfs: dev {} size {} data blocks {} inodes {} log {}",
            dev, sb.size, sb.nblocks, sb.ninodes, sb.nlog
        );
        Ok(())
    }

    /// Read the super block of `dev` and set up the log and the block
    /// allocator on top of `bcache`.
    pub fn mount(dev: u32, bcache: Arc<Bcache>) -> Result<Self> {
        let buf = bcache.bread(dev, SUPERBLOCK_NO)?;
        let sb = RawSuperBlock::decode(&buf.data()[..]);
        drop(buf);
        if sb.magic != FSMAGIC {
            ::log::error!("mount: dev {} has magic {:#x}", dev, sb.magic);
            return Err(FsError::BadMagic(sb.magic));
        }

        let log: Arc<dyn LogWrite> = Arc::new(Log::new(bcache.clone()));
        let alloc = Arc::new(BitmapAllocator::new(bcache.clone(), log.clone(), sb));
        ::log::info!("file system: dev {} mounted, {} data blocks", dev, sb.nblocks);
        Ok(Self::new(dev, sb, bcache, log, alloc))
    }

    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn superblock(&self) -> &RawSuperBlock {
        &self.sb
    }

    pub fn bcache(&self) -> &Bcache {
        &self.bcache
    }

    pub fn balloc(&self) -> Result<u32> {
        self.alloc.balloc(self.dev)
    }

    pub fn bfree(&self, blockno: u32) -> Result<()> {
        self.alloc.bfree(self.dev, blockno)
    }

    pub fn log_write(&self, buf: Buf<'_>) -> Result<()> {
        self.log.write(buf)
    }

    /// Entries the log still takes before it must be committed.
    pub fn log_room(&self) -> usize {
        self.log.room()
    }

    /// Make room for an operation that logs up to `nblocks` blocks,
    /// committing what is pending if it would not fit.
    /// Must be called without holding any buffer.
    pub fn begin_op(&self, nblocks: usize) -> Result<()> {
        if self.log.room() < nblocks {
            ::log::debug!("begin_op: {} blocks wanted, committing", nblocks);
            self.sync()?;
        }
        Ok(())
    }

    /// Commit every logged block to its home location.
    pub fn sync(&self) -> Result<()> {
        self.log.commit()
    }

    /// Allocate an inode on the device.
    /// Mark it as allocated by giving it type `itype`.
    /// Returns the new in-memory copy.
    pub fn ialloc(&self, itype: InodeType) -> Result<InodeData> {
        self.begin_op(1)?;
        for inum in 1..self.sb.ninodes {
            let blockno = self.sb.locate_inode(inum).ok_or(FsError::BadInode(inum))?;
            let mut buf = self.bcache.bread(self.dev, blockno)?;
            let offset = (inum as usize % IPB) * DiskInode::SIZE;
            let slot = &mut buf.data_mut()[offset..offset + DiskInode::SIZE];
            if DiskInode::decode(slot).is_free() { // a free inode
                let mut dinode = DiskInode::new();
                dinode.itype = itype as u16;
                dinode.encode_into(slot);
                self.log_write(buf)?;
                ::log::debug!("ialloc: inode {} type {:?}", inum, itype);
                return Ok(InodeData::new(self.dev, inum, dinode));
            }
        }
        ::log::error!("ialloc: no inodes on dev {}", self.dev);
        Err(FsError::NoInodes)
    }
}
