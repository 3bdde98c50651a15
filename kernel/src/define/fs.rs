pub use fs_lib::{
    BSIZE, BPB, DINDIRECT_SLOT, FSMAGIC, INDIRECT_SLOT, IPB, MAXFILE, NDIRECT, ND_INDIRECT,
    NINDIRECT,
};

/// Maxinum of blocks an FS op can write
pub const MAXOPBLOCKS: usize = 10;
/// size of log space in disk
pub const LOGSIZE: usize = MAXOPBLOCKS * 3;

/// number of hash buckets in the buffer cache
pub const NBUCKET: usize = 13;
/// buffers each bucket starts out with
pub const NBUF_PER_BUCKET: usize = 5;
/// size of buffer cache for block
pub const NBUF: usize = NBUCKET * NBUF_PER_BUCKET;

/// device number of file system root disk
pub const ROOTDEV: u32 = 1;
/// size of file system in blocks
pub const FSSIZE: u32 = 2000;
/// number of on-disk inodes
pub const NINODES: u32 = 200;
