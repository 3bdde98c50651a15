//! buffer cache layer
//!
//! The cache holds a fixed pool of buffers split across hash buckets. Each
//! bucket has its own spinlock guarding the metadata of the buffers it
//! currently owns; a buffer's contents are guarded by its own sleeplock.
//!
//! Interface:
//! * To get a buffer for a particular disk block, call bread.
//! * After changing buffer data, call bwrite to write it to disk.
//! * When done with the buffer, drop it.
//! * Only one thread at a time can use a buffer,
//!     so do not keep them longer than necessary.
//!
//! When a bucket has no free buffer, the least recently used free buffer of
//! the whole pool is stolen from another bucket. Only that steal takes the
//! global eviction lock.

use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, error, info, trace, warn};

use crate::define::fs::{BSIZE, NBUCKET, NBUF_PER_BUCKET};
use crate::driver::BlockDevice;
use crate::error::{FsError, Result};
use crate::lock::{SleepLock, SleepLockGuard, Spinlock};

/// Shape of the buffer pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BcacheConfig {
    pub nbucket: usize,
    pub nbuf_per_bucket: usize,
}

impl Default for BcacheConfig {
    fn default() -> Self {
        Self {
            nbucket: NBUCKET,
            nbuf_per_bucket: NBUF_PER_BUCKET,
        }
    }
}

impl BcacheConfig {
    fn validate(&self) -> Result<()> {
        if self.nbucket == 0 {
            return Err(FsError::Geometry("no buckets"));
        }
        if self.nbuf_per_bucket == 0 {
            return Err(FsError::Geometry("empty buckets"));
        }
        Ok(())
    }

    pub fn nbuf(&self) -> usize {
        self.nbucket * self.nbuf_per_bucket
    }
}

/// Reference state of one buffer, guarded by its bucket's lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefState {
    /// Nobody holds it; it may be recycled or stolen.
    Free,
    /// Picked as an eviction victim and on its way to another bucket.
    /// Not a valid cache entry.
    Reserved,
    /// Held by this many handles and pins.
    InUse(usize),
}

/// Point-in-time view of one buffer, see [`Bcache::snapshot`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufSnapshot {
    pub bucket: usize,
    pub index: usize,
    pub key: Option<(u32, u32)>,
    pub refs: RefState,
    pub last_used: u64,
}

pub struct Bcache {
    disk: Arc<dyn BlockDevice>,
    buckets: Box<[Spinlock<Bucket>]>,
    bufs: Box<[BufInner]>,
    /// serializes cross-bucket steals
    evict: Spinlock<()>,
    /// logical clock stamping every acquisition
    ticks: AtomicU64,
    config: BcacheConfig,
}

impl Bcache {
    /// Build the pool. Buffers start out spread evenly over the buckets,
    /// unlabelled and free.
    pub fn new(config: BcacheConfig, disk: Arc<dyn BlockDevice>) -> Result<Self> {
        config.validate()?;
        let nbuf = config.nbuf();
        let bufs = (0..nbuf).map(|_| BufInner::new()).collect();
        let buckets = (0..config.nbucket)
            .map(|id| {
                let mut lru = Vec::with_capacity(nbuf);
                let first = id * config.nbuf_per_bucket;
                lru.extend((first..first + config.nbuf_per_bucket).map(BufCtrl::new));
                Spinlock::new(Bucket { lru }, "bcache.bucket")
            })
            .collect();
        info!(
            "binit: {} buckets x {} buffers",
            config.nbucket, config.nbuf_per_bucket
        );
        Ok(Self {
            disk,
            buckets,
            bufs,
            evict: Spinlock::new((), "bcache.evict"),
            ticks: AtomicU64::new(0),
            config,
        })
    }

    pub fn geometry(&self) -> BcacheConfig {
        self.config
    }

    fn hash(&self, blockno: u32) -> usize {
        blockno as usize % self.buckets.len()
    }

    fn tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Look through the cache for block `blockno` on device `dev`.
    /// If not found, recycle a buffer. Either way return it locked.
    fn bget(&self, dev: u32, blockno: u32) -> Result<Buf<'_>> {
        let id = self.hash(blockno);
        let mut bucket = self.buckets[id].acquire();

        // Is the block already cached?
        if let Some(ctrl) = bucket.find_cached(dev, blockno) {
            ctrl.hold();
            ctrl.last_used = self.tick();
            let index = ctrl.index;
            drop(bucket);
            trace!("bget: hit ({}, {}) in bucket {}", dev, blockno, id);
            return Ok(self.lock_buf(index, dev, blockno));
        }

        // Not cached. Recycle the least recently used free buffer of this bucket.
        if let Some(ctrl) = bucket.recycle() {
            ctrl.relabel(dev, blockno, self.tick());
            let index = ctrl.index;
            self.bufs[index].valid.store(false, Ordering::Release);
            drop(bucket);
            trace!("bget: miss ({}, {}), reusing buffer {}", dev, blockno, index);
            return Ok(self.lock_buf(index, dev, blockno));
        }
        drop(bucket);

        // The bucket is full, steal from the others.
        let victim = {
            let _evict = self.evict.acquire();
            loop {
                if let Some(victim) = self.select_victim(id)? {
                    break victim;
                }
                warn!("bget: eviction victim claimed concurrently, rescanning");
            }
        };

        let ctrl = self.unlink_victim(victim);
        debug!("bget: stole buffer {} from bucket {}", victim.index, victim.bucket);
        Ok(self.install_stolen(id, ctrl, dev, blockno))
    }

    /// Take a reserved victim out of the bucket it was found in.
    fn unlink_victim(&self, victim: Victim) -> BufCtrl {
        let mut src = self.buckets[victim.bucket].acquire();
        match src.unlink(victim.index) {
            Some(ctrl) => ctrl,
            None => panic!("bget: reserved buffer {} left bucket {}", victim.index, victim.bucket),
        }
    }

    /// Link a stolen buffer into bucket `id` for (dev, blockno) and lock it.
    /// If the block got cached while the buffer was in transit, the stolen
    /// buffer is parked keyless at the LRU end and the cached one is used.
    fn install_stolen(&self, id: usize, mut ctrl: BufCtrl, dev: u32, blockno: u32) -> Buf<'_> {
        let mut dst = self.buckets[id].acquire();
        if let Some(cached) = dst.find_cached(dev, blockno) {
            cached.hold();
            cached.last_used = self.tick();
            let index = cached.index;
            debug!("bget: ({}, {}) cached during steal, parking buffer {}", dev, blockno, ctrl.index);
            ctrl.discard();
            dst.lru.push(ctrl);
            drop(dst);
            return self.lock_buf(index, dev, blockno);
        }
        ctrl.relabel(dev, blockno, self.tick());
        let index = ctrl.index;
        self.bufs[index].valid.store(false, Ordering::Release);
        dst.lru.insert(0, ctrl);
        drop(dst);
        trace!("bget: buffer {} now holds ({}, {}) in bucket {}", index, dev, blockno, id);
        self.lock_buf(index, dev, blockno)
    }

    /// Find the free buffer with the oldest stamp outside bucket `target`
    /// and reserve it. Must be called with the eviction lock held.
    ///
    /// Returns None if the chosen buffer got claimed between the scan and
    /// the reservation; the caller scans again.
    fn select_victim(&self, target: usize) -> Result<Option<Victim>> {
        let mut best: Option<(Victim, u64)> = None;
        for (id, bucket) in self.buckets.iter().enumerate() {
            if id == target {
                continue;
            }
            let bucket = bucket.acquire();
            for ctrl in bucket.lru.iter().filter(|c| c.refs == RefState::Free) {
                if best.map_or(true, |(_, stamp)| ctrl.last_used < stamp) {
                    best = Some((Victim { bucket: id, index: ctrl.index }, ctrl.last_used));
                }
            }
        }

        let (victim, stamp) = match best {
            Some(best) => best,
            None => {
                error!("bget: no free buffer in any of {} buckets", self.buckets.len());
                return Err(FsError::NoBuffers);
            }
        };

        let mut bucket = self.buckets[victim.bucket].acquire();
        match bucket.get_mut(victim.index) {
            Some(ctrl) if ctrl.refs == RefState::Free && ctrl.last_used == stamp => {
                ctrl.refs = RefState::Reserved;
                Ok(Some(victim))
            }
            _ => Ok(None),
        }
    }

    fn lock_buf(&self, index: usize, dev: u32, blockno: u32) -> Buf<'_> {
        Buf {
            bcache: self,
            index,
            dev,
            blockno,
            data: Some(self.bufs[index].data.lock()),
        }
    }

    /// Return a locked buf with the contents of the indicated block.
    pub fn bread(&self, dev: u32, blockno: u32) -> Result<Buf<'_>> {
        let mut buf = self.bget(dev, blockno)?;
        if !self.bufs[buf.index].valid.load(Ordering::Acquire) {
            self.disk.read_block(dev, blockno, buf.data_mut())?;
            self.bufs[buf.index].valid.store(true, Ordering::Release);
        }
        Ok(buf)
    }

    /// Like bread, but the caller overwrites the whole block,
    /// so the disk is not consulted.
    pub fn bget_zeroed(&self, dev: u32, blockno: u32) -> Result<Buf<'_>> {
        let mut buf = self.bget(dev, blockno)?;
        buf.data_mut().fill(0);
        self.bufs[buf.index].valid.store(true, Ordering::Release);
        Ok(buf)
    }

    /// Drop one reference. The sleeplock must already be released.
    /// A buffer nobody holds anymore moves to the most recently used end.
    fn brelse(&self, index: usize, blockno: u32) {
        let mut bucket = self.buckets[self.hash(blockno)].acquire();
        let pos = match bucket.position(index) {
            Some(pos) => pos,
            None => panic!("brelse: buffer {} not in its bucket", index),
        };
        match bucket.lru[pos].refs {
            RefState::InUse(1) => {
                bucket.lru[pos].refs = RefState::Free;
                let ctrl = bucket.lru.remove(pos);
                bucket.lru.insert(0, ctrl);
            }
            RefState::InUse(n) => bucket.lru[pos].refs = RefState::InUse(n - 1),
            state => panic!("brelse: buffer {} in state {:?}", index, state),
        }
    }

    fn pin(&self, index: usize, blockno: u32) {
        let mut bucket = self.buckets[self.hash(blockno)].acquire();
        match bucket.get_mut(index) {
            Some(ctrl) => ctrl.hold(),
            None => panic!("bpin: buffer {} not in its bucket", index),
        }
    }

    fn unpin(&self, index: usize, blockno: u32) -> Result<()> {
        let mut bucket = self.buckets[self.hash(blockno)].acquire();
        match bucket.get_mut(index) {
            Some(ctrl) => match ctrl.refs {
                // the handle itself accounts for one reference
                RefState::InUse(n) if n > 1 => {
                    ctrl.refs = RefState::InUse(n - 1);
                    Ok(())
                }
                _ => Err(FsError::UnbalancedPin(blockno)),
            },
            None => panic!("bunpin: buffer {} not in its bucket", index),
        }
    }

    /// Metadata of every buffer, bucket by bucket. Each bucket is read under
    /// its own lock, so the view is only consistent per bucket.
    pub fn snapshot(&self) -> Vec<BufSnapshot> {
        let mut out = Vec::with_capacity(self.bufs.len());
        for (id, bucket) in self.buckets.iter().enumerate() {
            let bucket = bucket.acquire();
            out.extend(bucket.lru.iter().map(|ctrl| BufSnapshot {
                bucket: id,
                index: ctrl.index,
                key: ctrl.key,
                refs: ctrl.refs,
                last_used: ctrl.last_used,
            }));
        }
        out
    }
}

#[derive(Clone, Copy, Debug)]
struct Victim {
    bucket: usize,
    index: usize,
}

/// One shard of the cache. `lru` is ordered from most to least recently
/// released.
struct Bucket {
    lru: Vec<BufCtrl>,
}

impl Bucket {
    /// Find if the requested block is cached. Reserved buffers do not count.
    fn find_cached(&mut self, dev: u32, blockno: u32) -> Option<&mut BufCtrl> {
        self.lru
            .iter_mut()
            .find(|c| c.key == Some((dev, blockno)) && c.refs != RefState::Reserved)
    }

    /// Least recently used free buffer of this bucket.
    fn recycle(&mut self) -> Option<&mut BufCtrl> {
        self.lru.iter_mut().rev().find(|c| c.refs == RefState::Free)
    }

    fn position(&self, index: usize) -> Option<usize> {
        self.lru.iter().position(|c| c.index == index)
    }

    fn get_mut(&mut self, index: usize) -> Option<&mut BufCtrl> {
        self.lru.iter_mut().find(|c| c.index == index)
    }

    fn unlink(&mut self, index: usize) -> Option<BufCtrl> {
        let pos = self.position(index)?;
        Some(self.lru.remove(pos))
    }
}

struct BufCtrl {
    /// slot in `Bcache::bufs`, never changes
    index: usize,
    /// (dev, blockno), None until first use
    key: Option<(u32, u32)>,
    refs: RefState,
    last_used: u64,
}

impl BufCtrl {
    const fn new(index: usize) -> Self {
        Self {
            index,
            key: None,
            refs: RefState::Free,
            last_used: 0,
        }
    }

    fn hold(&mut self) {
        self.refs = match self.refs {
            RefState::Free => RefState::InUse(1),
            RefState::InUse(n) => RefState::InUse(n + 1),
            RefState::Reserved => panic!("bget: holding reserved buffer {}", self.index),
        };
    }

    fn relabel(&mut self, dev: u32, blockno: u32, now: u64) {
        self.key = Some((dev, blockno));
        self.refs = RefState::InUse(1);
        self.last_used = now;
    }

    /// Forget the identity; the buffer becomes the first pick for reuse.
    fn discard(&mut self) {
        self.key = None;
        self.refs = RefState::Free;
        self.last_used = 0;
    }
}

struct BufInner {
    // valid is written under the bucket lock when relabelling and under the
    // buf sleeplock when filling from disk
    valid: AtomicBool,
    data: SleepLock<BufData>,
}

impl BufInner {
    const fn new() -> Self {
        Self {
            valid: AtomicBool::new(false),
            data: SleepLock::new(BufData::new(), "buffer"),
        }
    }
}

/// Alignment of BufData should suffice for other structs
/// that might converts from this struct.
#[repr(C, align(8))]
pub struct BufData([u8; BSIZE]);

impl BufData {
    const fn new() -> Self {
        Self([0; BSIZE])
    }
}

/// A locked buffer handed out by the cache.
/// Dropping it releases the sleeplock and then the reference.
pub struct Buf<'a> {
    bcache: &'a Bcache,
    index: usize,
    dev: u32,
    blockno: u32,
    /// Guaranteed to be Some during Buf's lifetime.
    /// Introduced to let the sleeplock guard drop before the whole struct.
    data: Option<SleepLockGuard<'a, BufData>>,
}

impl<'a> Buf<'a> {
    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn blockno(&self) -> u32 {
        self.blockno
    }

    fn guard(&self) -> &SleepLockGuard<'a, BufData> {
        match self.data {
            Some(ref guard) => guard,
            None => unreachable!("buf {} used after release", self.index),
        }
    }

    pub fn data(&self) -> &[u8; BSIZE] {
        &self.guard().deref().0
    }

    pub fn data_mut(&mut self) -> &mut [u8; BSIZE] {
        match self.data {
            Some(ref mut guard) => &mut guard.deref_mut().0,
            None => unreachable!("buf {} used after release", self.index),
        }
    }

    /// Little-endian u32 at slot `i`, for blocks holding block numbers.
    pub fn read_u32(&self, i: usize) -> u32 {
        let at = i * 4;
        let raw = &self.data()[at..at + 4];
        u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])
    }

    pub fn write_u32(&mut self, i: usize, value: u32) {
        let at = i * 4;
        self.data_mut()[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Write the contents to disk. The buffer must be locked by the caller.
    pub fn bwrite(&mut self) -> Result<()> {
        if !self.data.as_ref().map_or(false, |guard| guard.holding()) {
            error!("bwrite: buffer {} not locked by caller", self.index);
            return Err(FsError::NotHolding("bwrite"));
        }
        self.bcache.disk.write_block(self.dev, self.blockno, self.data())
    }

    /// Keep the buffer in the cache beyond this handle,
    /// until a matching unpin.
    pub fn pin(&self) {
        self.bcache.pin(self.index, self.blockno);
    }

    pub fn unpin(&self) -> Result<()> {
        self.bcache.unpin(self.index, self.blockno)
    }
}

impl<'a> Drop for Buf<'a> {
    fn drop(&mut self) {
        drop(self.data.take());
        self.bcache.brelse(self.index, self.blockno);
    }
}
