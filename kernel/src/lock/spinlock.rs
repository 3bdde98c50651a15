//! spinlock

use core::fmt;

pub type SpinlockGuard<'a, T> = spin::MutexGuard<'a, T>;

/// Non-suspending lock for short critical sections.
/// Never hold one across disk I/O or a sleeplock acquisition.
pub struct Spinlock<T: ?Sized> {
    name: &'static str,
    lock: spin::Mutex<T>,
}

impl<T> Spinlock<T> {
    pub const fn new(data: T, name: &'static str) -> Self {
        Self {
            name,
            lock: spin::Mutex::new(data),
        }
    }
}

impl<T: ?Sized> Spinlock<T> {
    /// Spin until the lock is ours.
    pub fn acquire(&self) -> SpinlockGuard<'_, T> {
        self.lock.lock()
    }
}

impl<T: ?Sized> fmt::Debug for Spinlock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spinlock")
            .field("name", &self.name)
            .field("locked", &self.lock.is_locked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_shows_name_and_state() {
        let lock = Spinlock::new(5u32, "bcache.bucket");
        let guard = lock.acquire();
        assert_eq!(format!("{:?}", lock), "Spinlock { name: \"bcache.bucket\", locked: true }");
        drop(guard);
        *lock.acquire() += 1;
        assert_eq!(*lock.acquire(), 6);
        assert!(format!("{:?}", lock).ends_with("locked: false }"));
    }
}
