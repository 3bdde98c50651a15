//! Block-level core of an xv6-style file system: a bucketed buffer cache
//! with global LRU recycling, a pinning write log, a bitmap block allocator
//! and inode block mapping, running over any [`driver::BlockDevice`].

pub mod define;
pub mod driver;
pub mod error;
pub mod fs;
pub mod lock;

pub use error::{FsError, Result};
