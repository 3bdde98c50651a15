use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use kernel_fs::driver::RamDisk;
use kernel_fs::fs::{Bcache, BcacheConfig, RefState};

const DEV: u32 = 1;
const NBLOCKS: u32 = 24;
const NTHREADS: usize = 4;
const ROUNDS: usize = 300;

/// Pool half the size of the disk, so misses keep stealing across buckets.
fn small_cache() -> (Arc<RamDisk>, Arc<Bcache>) {
    let disk = Arc::new(RamDisk::new(NBLOCKS));
    let config = BcacheConfig { nbucket: 3, nbuf_per_bucket: 4 };
    let bcache = Arc::new(Bcache::new(config, disk.clone()).unwrap());
    // word 0 counts increments, word 1 names the block
    for blockno in 0..NBLOCKS {
        let mut buf = bcache.bget_zeroed(DEV, blockno).unwrap();
        buf.write_u32(1, blockno);
        buf.bwrite().unwrap();
    }
    (disk, bcache)
}

/// Cheap deterministic block sequence per thread.
fn pick(seed: usize, round: usize) -> u32 {
    ((seed * 7919 + round * 104729) % NBLOCKS as usize) as u32
}

#[test]
fn concurrent_increments_are_not_lost() {
    let (_disk, bcache) = small_cache();

    let handles: Vec<_> = (0..NTHREADS)
        .map(|t| {
            let bcache = bcache.clone();
            thread::spawn(move || {
                let mut done = vec![0u32; NBLOCKS as usize];
                for round in 0..ROUNDS {
                    let blockno = pick(t + 1, round);
                    let mut buf = bcache.bread(DEV, blockno).unwrap();
                    assert_eq!(buf.read_u32(1), blockno, "buffer carries another block");
                    let count = buf.read_u32(0);
                    thread::yield_now();
                    buf.write_u32(0, count + 1);
                    buf.bwrite().unwrap();
                    done[blockno as usize] += 1;
                }
                done
            })
        })
        .collect();

    let mut expected = vec![0u32; NBLOCKS as usize];
    for handle in handles {
        for (total, n) in expected.iter_mut().zip(handle.join().unwrap()) {
            *total += n;
        }
    }

    for blockno in 0..NBLOCKS {
        let buf = bcache.bread(DEV, blockno).unwrap();
        assert_eq!(buf.read_u32(0), expected[blockno as usize], "block {}", blockno);
    }
}

#[test]
fn holders_of_one_block_never_overlap() {
    let (_disk, bcache) = small_cache();
    let inside = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..NTHREADS)
        .map(|_| {
            let bcache = bcache.clone();
            let inside = inside.clone();
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    let buf = bcache.bread(DEV, 5).unwrap();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0, "two holders of block 5");
                    thread::yield_now();
                    inside.fetch_sub(1, Ordering::SeqCst);
                    drop(buf);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn every_key_is_cached_at_most_once_after_steal_pressure() {
    let (_disk, bcache) = small_cache();

    let handles: Vec<_> = (0..NTHREADS)
        .map(|t| {
            let bcache = bcache.clone();
            thread::spawn(move || {
                for round in 0..ROUNDS {
                    // all threads chase a handful of hot blocks
                    let blockno = pick(t + 1, round) % 8;
                    let buf = bcache.bread(DEV, blockno).unwrap();
                    assert_eq!(buf.read_u32(1), blockno);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let snapshot = bcache.snapshot();
    assert_eq!(snapshot.len(), bcache.geometry().nbuf());

    let indexes: BTreeSet<usize> = snapshot.iter().map(|s| s.index).collect();
    assert_eq!(indexes.len(), snapshot.len(), "a buffer sits in two buckets");

    let mut keys = BTreeSet::new();
    for s in snapshot.iter() {
        assert_eq!(s.refs, RefState::Free);
        if let Some((_, blockno)) = s.key {
            assert!(keys.insert(s.key), "block {} cached twice", blockno);
            assert_eq!(s.bucket, blockno as usize % 3, "block {} in the wrong bucket", blockno);
        }
    }
}

#[test]
fn pinned_blocks_survive_concurrent_eviction() {
    let (_disk, bcache) = small_cache();

    let mut pinned = bcache.bread(DEV, 2).unwrap();
    pinned.write_u32(0, 0xfeed);
    pinned.pin();
    drop(pinned);

    let handles: Vec<_> = (0..NTHREADS)
        .map(|t| {
            let bcache = bcache.clone();
            thread::spawn(move || {
                for round in 0..ROUNDS {
                    let blockno = pick(t + 1, round);
                    if blockno != 2 {
                        drop(bcache.bread(DEV, blockno).unwrap());
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // never written back, so the change can only come from the cache
    let buf = bcache.bread(DEV, 2).unwrap();
    assert_eq!(buf.read_u32(0), 0xfeed);
    buf.unpin().unwrap();
}
