//! sleeplock

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut, Drop};
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

/// Long-term lock: a waiter is put to sleep instead of spinning.
/// The lock remembers its owner so that callers can check `holding`.
pub struct SleepLock<T: ?Sized> {
    owner: Mutex<Option<ThreadId>>,
    chan: Condvar,
    name: &'static str,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Sync for SleepLock<T> {}
unsafe impl<T: ?Sized + Send> Send for SleepLock<T> {}

impl<T> SleepLock<T> {
    pub const fn new(data: T, name: &'static str) -> Self {
        Self {
            owner: parking_lot::const_mutex(None),
            chan: Condvar::new(),
            name,
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> SleepLock<T> {
    /// Sleep until the lock is free, then take it.
    /// Panics if the calling thread already holds it.
    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        let me = thread::current().id();
        let mut owner = self.owner.lock();
        if *owner == Some(me) {
            panic!("sleeplock {} acquire", self.name);
        }
        while owner.is_some() {
            self.chan.wait(&mut owner);
        }
        *owner = Some(me);
        drop(owner);
        SleepLockGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Whether the calling thread holds this lock.
    pub fn holding(&self) -> bool {
        *self.owner.lock() == Some(thread::current().id())
    }

    /// Called by its guard when dropped
    fn unlock(&self) {
        let mut owner = self.owner.lock();
        if *owner != Some(thread::current().id()) {
            panic!("sleeplock {} release", self.name);
        }
        *owner = None;
        drop(owner);
        self.chan.notify_one();
    }
}

/// The guard is pinned to the thread that took the lock.
pub struct SleepLockGuard<'a, T: ?Sized + 'a> {
    lock: &'a SleepLock<T>,
    _not_send: PhantomData<*const ()>,
}

impl<'a, T: ?Sized> SleepLockGuard<'a, T> {
    pub fn holding(&self) -> bool {
        self.lock.holding()
    }
}

impl<'a, T: ?Sized> Deref for SleepLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: the guard proves exclusive ownership of the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T: ?Sized> DerefMut for SleepLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves exclusive ownership of the lock.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T: ?Sized> Drop for SleepLockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn holding_follows_the_guard() {
        let lock = SleepLock::new(0u32, "test");
        assert!(!lock.holding());
        let mut guard = lock.lock();
        *guard = 7;
        assert!(lock.holding());
        assert!(guard.holding());
        drop(guard);
        assert!(!lock.holding());
        assert_eq!(*lock.lock(), 7);
    }

    #[test]
    fn other_threads_do_not_hold_it() {
        let lock = Arc::new(SleepLock::new((), "test"));
        let _guard = lock.lock();
        let other = Arc::clone(&lock);
        assert!(!thread::spawn(move || other.holding()).join().unwrap());
    }

    #[test]
    #[should_panic(expected = "sleeplock test acquire")]
    fn relocking_on_the_same_thread_panics() {
        let lock = SleepLock::new((), "test");
        let _a = lock.lock();
        let _b = lock.lock();
    }

    #[test]
    fn waiters_sleep_until_release() {
        let lock = Arc::new(SleepLock::new(0usize, "counter"));
        let inside = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let mut guard = lock.lock();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        *guard += 1;
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), 1600);
    }
}
