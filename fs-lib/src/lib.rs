#![cfg_attr(not(test), no_std)]
use core::mem::size_of;

mod inode;
mod superblock;

pub use inode::{ DiskInode, InodeType };
pub use superblock::RawSuperBlock;

/// magic number indentifying this specific file system
pub const FSMAGIC: u32 = 0x10203040;
/// size of disk block
pub const BSIZE: usize = 1024;

/// direct block addresses held in the inode itself
pub const NDIRECT: usize = 11;
/// block addresses held by one indirect block
pub const NINDIRECT: usize = BSIZE / size_of::<u32>();
/// block addresses reachable through the double-indirect block
pub const ND_INDIRECT: usize = NINDIRECT * NINDIRECT;
/// largest file, in blocks
pub const MAXFILE: usize = NDIRECT + NINDIRECT + ND_INDIRECT;

/// slot of the single-indirect block in `DiskInode::addrs`
pub const INDIRECT_SLOT: usize = NDIRECT;
/// slot of the double-indirect block in `DiskInode::addrs`
pub const DINDIRECT_SLOT: usize = NDIRECT + 1;

/// Inodes per block.
pub const IPB: usize = BSIZE / DiskInode::SIZE;

/// Bitmap bits per block
pub const BPB: u32 = (BSIZE * 8) as u32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_partition_the_index_space() {
        assert_eq!(NINDIRECT, 256);
        assert_eq!(MAXFILE, 11 + 256 + 256 * 256);
        assert_eq!(DINDIRECT_SLOT + 1, DiskInode::new().addrs.len());
    }

    #[test]
    fn inodes_fill_blocks_exactly() {
        assert_eq!(BSIZE % DiskInode::SIZE, 0);
        assert_eq!(IPB, 16);
    }
}
