//! Log-relevant operations
//!
//! Buffers changed by a file system operation are handed to the log instead
//! of being written straight away. The log pins each of them in the buffer
//! cache so the modified contents cannot be evicted, and writes them to their
//! home location on commit.

use std::sync::Arc;

use log::{debug, error};

use super::{Bcache, Buf};
use crate::define::fs::LOGSIZE;
use crate::error::{FsError, Result};
use crate::lock::Spinlock;

/// Sink for modified buffers. Must be called before a changed buffer is
/// released; the buffer is released by the call.
pub trait LogWrite: Send + Sync {
    fn write(&self, buf: Buf<'_>) -> Result<()>;

    /// How many more distinct blocks `write` accepts before a commit.
    fn room(&self) -> usize {
        usize::MAX
    }

    /// Make every recorded write durable.
    fn commit(&self) -> Result<()> {
        Ok(())
    }
}

pub struct Log {
    bcache: Arc<Bcache>,
    lh: Spinlock<LogHeader>,
}

struct LogHeader {
    /// (dev, blockno) of every recorded block, in arrival order
    blocks: Vec<(u32, u32)>,
    /// one slot stays reserved for the header block itself
    capacity: usize,
}

impl Log {
    pub fn new(bcache: Arc<Bcache>) -> Self {
        Self::with_capacity(bcache, LOGSIZE - 1)
    }

    pub fn with_capacity(bcache: Arc<Bcache>, capacity: usize) -> Self {
        Self {
            bcache,
            lh: Spinlock::new(
                LogHeader {
                    blocks: Vec::with_capacity(capacity),
                    capacity,
                },
                "log",
            ),
        }
    }

    /// Number of blocks waiting for commit.
    pub fn pending(&self) -> usize {
        self.lh.acquire().blocks.len()
    }

    /// Write every recorded block to its home location, then drop the pin
    /// taken by `write`. A block leaves the header only once it is home, so
    /// a failed commit keeps the rest for the next one.
    fn install(&self) -> Result<usize> {
        let blocks = self.lh.acquire().blocks.clone();
        for &(dev, blockno) in blocks.iter() {
            let mut buf = self.bcache.bread(dev, blockno)?;
            buf.bwrite()?;
            buf.unpin()?;
            // still holding the buffer, so nobody can log it again meanwhile
            let mut lh = self.lh.acquire();
            if let Some(pos) = lh.blocks.iter().position(|key| *key == (dev, blockno)) {
                lh.blocks.remove(pos);
            }
            drop(lh);
            drop(buf);
        }
        Ok(blocks.len())
    }

}

impl LogWrite for Log {
    /// Record the buf's block and release the buffer.
    /// A block already recorded is absorbed; a new one is pinned in the cache
    /// until the log commits.
    fn write(&self, buf: Buf<'_>) -> Result<()> {
        let key = (buf.dev(), buf.blockno());
        let mut lh = self.lh.acquire();
        if lh.blocks.contains(&key) {
            return Ok(());
        }
        if lh.blocks.len() >= lh.capacity {
            error!("log: {} blocks recorded, no room for block {}", lh.blocks.len(), key.1);
            return Err(FsError::LogFull);
        }
        buf.pin();
        lh.blocks.push(key);
        Ok(())
    }

    fn room(&self) -> usize {
        let lh = self.lh.acquire();
        lh.capacity - lh.blocks.len()
    }

    fn commit(&self) -> Result<()> {
        let n = self.install()?;
        if n > 0 {
            debug!("log: committed {} blocks", n);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    use crate::define::fs::BSIZE;
    use crate::driver::{BlockDevice, RamDisk};
    use crate::fs::{BcacheConfig, RefState};

    /// Ram disk that refuses writes to one block until healed.
    struct FailingDisk {
        inner: RamDisk,
        bad: AtomicU32,
    }

    impl FailingDisk {
        fn heal(&self) {
            self.bad.store(u32::MAX, Ordering::SeqCst);
        }
    }

    impl BlockDevice for FailingDisk {
        fn read_block(&self, dev: u32, blockno: u32, buf: &mut [u8; BSIZE]) -> Result<()> {
            self.inner.read_block(dev, blockno, buf)
        }

        fn write_block(&self, dev: u32, blockno: u32, buf: &[u8; BSIZE]) -> Result<()> {
            if blockno == self.bad.load(Ordering::SeqCst) {
                return Err(FsError::BadBlock(blockno));
            }
            self.inner.write_block(dev, blockno, buf)
        }
    }

    fn setup(capacity: usize) -> (Arc<RamDisk>, Arc<Bcache>, Log) {
        let disk = Arc::new(RamDisk::new(32));
        let config = BcacheConfig { nbucket: 2, nbuf_per_bucket: 2 };
        let bcache = Arc::new(Bcache::new(config, disk.clone()).unwrap());
        let log = Log::with_capacity(bcache.clone(), capacity);
        (disk, bcache, log)
    }

    fn refs(bcache: &Bcache, blockno: u32) -> Option<RefState> {
        bcache
            .snapshot()
            .into_iter()
            .find(|s| s.key == Some((1, blockno)))
            .map(|s| s.refs)
    }

    #[test]
    fn recorded_blocks_stay_pinned_until_commit() {
        let (disk, bcache, log) = setup(4);
        let mut buf = bcache.bread(1, 3).unwrap();
        buf.data_mut()[0] = 0x5a;
        log.write(buf).unwrap();

        assert_eq!(refs(&bcache, 3), Some(RefState::InUse(1)));
        assert_eq!(disk.writes(), 0);
        assert_eq!(log.pending(), 1);

        log.commit().unwrap();
        assert_eq!(refs(&bcache, 3), Some(RefState::Free));
        assert_eq!(disk.peek(3).unwrap()[0], 0x5a);
        assert_eq!(log.pending(), 0);
    }

    #[test]
    fn rewriting_a_block_is_absorbed() {
        let (disk, bcache, log) = setup(4);
        for value in [1u8, 2, 3] {
            let mut buf = bcache.bread(1, 6).unwrap();
            buf.data_mut()[10] = value;
            log.write(buf).unwrap();
        }
        assert_eq!(log.pending(), 1);
        assert_eq!(refs(&bcache, 6), Some(RefState::InUse(1)));
        log.commit().unwrap();
        assert_eq!(disk.writes(), 1);
        assert_eq!(disk.peek(6).unwrap()[10], 3);
    }

    #[test]
    fn full_log_refuses_new_blocks() {
        let (_disk, bcache, log) = setup(1);
        log.write(bcache.bread(1, 2).unwrap()).unwrap();
        assert!(matches!(log.write(bcache.bread(1, 4).unwrap()), Err(FsError::LogFull)));
        // the refused buffer was still released
        assert_eq!(refs(&bcache, 4), Some(RefState::Free));
    }

    #[test]
    fn empty_commit_touches_nothing() {
        let (disk, _bcache, log) = setup(2);
        log.commit().unwrap();
        assert_eq!(disk.writes() + disk.reads(), 0);
    }

    #[test]
    fn failed_commit_keeps_unwritten_blocks() {
        let disk = Arc::new(FailingDisk { inner: RamDisk::new(32), bad: AtomicU32::new(3) });
        let config = BcacheConfig { nbucket: 2, nbuf_per_bucket: 2 };
        let bcache = Arc::new(Bcache::new(config, disk.clone()).unwrap());
        let log = Log::with_capacity(bcache.clone(), 4);
        for blockno in [6, 3] {
            let mut buf = bcache.bread(1, blockno).unwrap();
            buf.data_mut()[0] = blockno as u8;
            log.write(buf).unwrap();
        }

        assert!(matches!(log.commit(), Err(FsError::BadBlock(3))));
        // block 6 made it home, block 3 is still logged and pinned
        assert_eq!(log.pending(), 1);
        assert_eq!(log.room(), 3);
        assert_eq!(refs(&bcache, 6), Some(RefState::Free));
        assert_eq!(disk.inner.peek(6).unwrap()[0], 6);
        assert_eq!(refs(&bcache, 3), Some(RefState::InUse(1)));
        assert_eq!(disk.inner.peek(3).unwrap()[0], 0);

        disk.heal();
        log.commit().unwrap();
        assert_eq!(log.pending(), 0);
        assert_eq!(refs(&bcache, 3), Some(RefState::Free));
        assert_eq!(disk.inner.peek(3).unwrap()[0], 3);
    }

    #[test]
    fn room_shrinks_with_each_new_block() {
        let (_disk, bcache, log) = setup(3);
        assert_eq!(log.room(), 3);
        log.write(bcache.bread(1, 2).unwrap()).unwrap();
        log.write(bcache.bread(1, 2).unwrap()).unwrap();
        assert_eq!(log.room(), 2);
        log.commit().unwrap();
        assert_eq!(log.room(), 3);
    }
}
