use core::cmp::min;

use fs_lib::{DiskInode, InodeType};
use log::{debug, error};

use super::FileSystem;
use crate::define::fs::{
    BSIZE, DINDIRECT_SLOT, INDIRECT_SLOT, IPB, MAXFILE, NDIRECT, ND_INDIRECT,
    NINDIRECT,
};
use crate::error::{FsError, Result};

/// Log entries needed to write one more data block: the block itself, its
/// bitmap block, up to two new indirect blocks, and the inode.
const BLOCK_WRITE_SLOTS: usize = 5;

/// In-memory copy of an inode.
///
/// Whoever holds a `&mut InodeData` has the inode to itself, which stands in
/// for holding the inode's sleeplock.
#[derive(Clone, Debug)]
pub struct InodeData {
    dev: u32,
    inum: u32,
    dinode: DiskInode,
}

impl InodeData {
    pub fn new(dev: u32, inum: u32, dinode: DiskInode) -> Self {
        Self { dev, inum, dinode }
    }

    /// Read inode `inum` from its inode block.
    pub fn load(fs: &FileSystem, inum: u32) -> Result<Self> {
        let blockno = fs.superblock().locate_inode(inum).ok_or(FsError::BadInode(inum))?;
        let buf = fs.bcache().bread(fs.dev(), blockno)?;
        let offset = locate_inode_offset(inum);
        let dinode = DiskInode::decode(&buf.data()[offset..]);
        drop(buf);
        Ok(Self::new(fs.dev(), inum, dinode))
    }

    pub fn inum(&self) -> u32 {
        self.inum
    }

    pub fn size(&self) -> u32 {
        self.dinode.size
    }

    pub fn itype(&self) -> Option<InodeType> {
        InodeType::from_raw(self.dinode.itype)
    }

    pub fn dinode(&self) -> &DiskInode {
        &self.dinode
    }

    /// Update a modified in-memory inode to disk.
    /// Typically called after changing the content of inode info.
    pub fn update(&self, fs: &FileSystem) -> Result<()> {
        let blockno = fs.superblock().locate_inode(self.inum).ok_or(FsError::BadInode(self.inum))?;
        let mut buf = fs.bcache().bread(self.dev, blockno)?;
        let offset = locate_inode_offset(self.inum);
        self.dinode.encode_into(&mut buf.data_mut()[offset..]);
        fs.log_write(buf)
    }

    /// The content (data) associated with each inode is stored
    /// in blocks on the disk. The first NDIRECT block numbers
    /// are listed in self.dinode.addrs. The next NINDIRECT blocks are
    /// listed in block self.dinode.addrs[NDIRECT], and the next
    /// NINDIRECT * NINDIRECT through the two levels hanging off
    /// self.dinode.addrs[NDIRECT + 1].
    ///
    /// Return the disk block address of the nth block in inode.
    /// If there is no such block, bmap allocates one.
    pub fn bmap(&mut self, fs: &FileSystem, offset_bn: u32) -> Result<u32> {
        let mut bn = offset_bn as usize;
        if bn < NDIRECT {
            return self.slot(fs, bn);
        }
        bn -= NDIRECT;

        if bn < NINDIRECT {
            // Load indirect block, allocating if necessary.
            let indirect = self.slot(fs, INDIRECT_SLOT)?;
            return self.entry(fs, indirect, bn);
        }
        bn -= NINDIRECT;

        if bn < ND_INDIRECT {
            let dindirect = self.slot(fs, DINDIRECT_SLOT)?;
            let indirect = self.entry(fs, dindirect, bn / NINDIRECT)?;
            return self.entry(fs, indirect, bn % NINDIRECT);
        }

        error!("bmap: inode {} block {} out of range", self.inum, offset_bn);
        Err(FsError::OutOfRange(offset_bn))
    }

    /// Address held in the inode itself, allocated on first use.
    fn slot(&mut self, fs: &FileSystem, slot: usize) -> Result<u32> {
        let mut addr = self.dinode.addrs[slot];
        if addr == 0 {
            addr = fs.balloc()?;
            self.dinode.addrs[slot] = addr;
        }
        Ok(addr)
    }

    /// Entry `index` of the indirect block `blockno`, allocated on first use.
    /// The indirect block is logged only if the entry was filled in here.
    fn entry(&self, fs: &FileSystem, blockno: u32, index: usize) -> Result<u32> {
        let mut buf = fs.bcache().bread(self.dev, blockno)?;
        let addr = buf.read_u32(index);
        if addr != 0 {
            return Ok(addr);
        }
        let addr = fs.balloc()?;
        buf.write_u32(index, addr);
        fs.log_write(buf)?;
        Ok(addr)
    }

    /// Discard the inode data/content.
    /// Frees every block reachable from the address table, leaves the table
    /// zeroed and the size 0, and writes the inode back.
    pub fn truncate(&mut self, fs: &FileSystem) -> Result<()> {
        // every bitmap block plus the inode
        fs.begin_op(fs.superblock().bitmap_blocks() as usize + 1)?;
        let mut freed = 0;

        // direct block
        for i in 0..NDIRECT {
            let addr = self.dinode.addrs[i];
            if addr != 0 {
                fs.bfree(addr)?;
                self.dinode.addrs[i] = 0;
                freed += 1;
            }
        }

        // indirect block
        let indirect = self.dinode.addrs[INDIRECT_SLOT];
        if indirect != 0 {
            freed += self.free_entries(fs, indirect)?;
            fs.bfree(indirect)?;
            self.dinode.addrs[INDIRECT_SLOT] = 0;
            freed += 1;
        }

        // double-indirect block
        let dindirect = self.dinode.addrs[DINDIRECT_SLOT];
        if dindirect != 0 {
            let buf = fs.bcache().bread(self.dev, dindirect)?;
            for i in 0..NINDIRECT {
                let indirect = buf.read_u32(i);
                if indirect != 0 {
                    freed += self.free_entries(fs, indirect)?;
                    fs.bfree(indirect)?;
                    freed += 1;
                }
            }
            drop(buf);
            fs.bfree(dindirect)?;
            self.dinode.addrs[DINDIRECT_SLOT] = 0;
            freed += 1;
        }

        self.dinode.size = 0;
        self.update(fs)?;
        debug!("itrunc: inode {} released {} blocks", self.inum, freed);
        Ok(())
    }

    /// Free every block listed in indirect block `blockno`.
    fn free_entries(&self, fs: &FileSystem, blockno: u32) -> Result<usize> {
        let buf = fs.bcache().bread(self.dev, blockno)?;
        let mut freed = 0;
        for j in 0..NINDIRECT {
            let addr = buf.read_u32(j);
            if addr != 0 {
                fs.bfree(addr)?;
                freed += 1;
            }
        }
        Ok(freed)
    }

    /// Read up to `dst.len()` bytes starting at `offset`.
    /// Returns the number of bytes read, short at end of file.
    pub fn read(&mut self, fs: &FileSystem, offset: u32, dst: &mut [u8]) -> Result<usize> {
        if offset > self.dinode.size {
            return Ok(0);
        }
        let n = min(dst.len(), (self.dinode.size - offset) as usize);
        let mut total = 0;
        let mut off = offset as usize;
        while total < n {
            let addr = self.bmap(fs, (off / BSIZE) as u32)?;
            let buf = fs.bcache().bread(self.dev, addr)?;
            let start = off % BSIZE;
            let len = min(n - total, BSIZE - start);
            dst[total..total + len].copy_from_slice(&buf.data()[start..start + len]);
            drop(buf);
            total += len;
            off += len;
        }
        Ok(n)
    }

    /// Write `src` at `offset`, growing the file as needed.
    /// Returns the number of bytes written.
    pub fn write(&mut self, fs: &FileSystem, offset: u32, src: &[u8]) -> Result<usize> {
        if offset > self.dinode.size {
            return Err(FsError::BadOffset(offset));
        }
        match (offset as usize).checked_add(src.len()) {
            Some(end) if end <= MAXFILE * BSIZE => {}
            _ => return Err(FsError::FileTooLarge),
        }

        let mut total = 0;
        let mut off = offset as usize;
        while total < src.len() {
            if fs.log_room() < BLOCK_WRITE_SLOTS {
                // the inode goes into the same commit as the blocks it maps
                if total > 0 {
                    self.update(fs)?;
                }
                fs.sync()?;
            }
            let addr = self.bmap(fs, (off / BSIZE) as u32)?;
            let mut buf = fs.bcache().bread(self.dev, addr)?;
            let start = off % BSIZE;
            let len = min(src.len() - total, BSIZE - start);
            buf.data_mut()[start..start + len].copy_from_slice(&src[total..total + len]);
            fs.log_write(buf)?;
            total += len;
            off += len;
            if off as u32 > self.dinode.size {
                self.dinode.size = off as u32;
            }
        }

        // write the i-node back to disk even if the size didn't change
        // because bmap may have added a new block to self.dinode.addrs.
        if total == 0 {
            fs.begin_op(1)?;
        }
        self.update(fs)?;
        Ok(total)
    }
}

/// Given an inode number.
/// Calculate the byte offset of this inode inside its block.
#[inline]
fn locate_inode_offset(inum: u32) -> usize {
    (inum as usize % IPB) * DiskInode::SIZE
}
