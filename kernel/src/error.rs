//! Error kinds surfaced by the file system core.
//!
//! Every variant is unrecoverable for the operation that produced it; the
//! caller decides whether that halts the whole system. The only condition the
//! core retries on its own is losing an eviction victim to a concurrent
//! acquirer, which never reaches this type.

use thiserror::Error;

pub type Result<T> = core::result::Result<T, FsError>;

#[derive(Debug, Error)]
pub enum FsError {
    /// Every buffer in the pool is held; the pool is too small for the
    /// live concurrency.
    #[error("bget: no buffers")]
    NoBuffers,

    /// A buffer operation ran without its sleeplock held.
    #[error("{0}: buffer lock not held")]
    NotHolding(&'static str),

    #[error("bmap: logical block {0} out of range")]
    OutOfRange(u32),

    #[error("balloc: out of blocks")]
    NoSpace,

    #[error("bfree: double freeing block {0}")]
    DoubleFree(u32),

    #[error("unpin of block {0} without matching pin")]
    UnbalancedPin(u32),

    #[error("log: not enough space for ongoing transactions")]
    LogFull,

    #[error("ialloc: no free inodes")]
    NoInodes,

    #[error("inode {0} out of range")]
    BadInode(u32),

    #[error("block {0} beyond end of device")]
    BadBlock(u32),

    #[error("invalid file system magic {0:#x}")]
    BadMagic(u32),

    #[error("invalid cache geometry: {0}")]
    Geometry(&'static str),

    #[error("offset {0} past end of file")]
    BadOffset(u32),

    #[error("write exceeds maximum file size")]
    FileTooLarge,

    #[error("disk image: {0}")]
    Image(#[source] std::io::Error),

    #[error("disk I/O error on block {blockno}: {source}")]
    Io {
        blockno: u32,
        #[source]
        source: std::io::Error,
    },
}
