pub mod spinlock;
pub mod sleeplock;

pub use spinlock::{Spinlock, SpinlockGuard};
pub use sleeplock::{SleepLock, SleepLockGuard};
