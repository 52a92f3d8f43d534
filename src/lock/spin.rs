use core::fmt;
use core::sync::atomic::{AtomicI64, Ordering};

use crate::lock::Lock;

////////////////////////////////////////////////////////////////////////////////////////////////////
// SpinLock
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A non-waiting lock that only tracks a signed acquisition depth.
///
/// [`lock`][Lock::lock] atomically decrements the counter and
/// [`unlock`][Lock::unlock] atomically increments it.
/// Neither operation ever waits: a second caller acquiring the lock while the
/// counter is already negative proceeds immediately.
/// A `SpinLock` is therefore a counted signal and does **not** provide mutual
/// exclusion under contention.
/// Use [`ExclusiveSpinLock`][crate::ExclusiveSpinLock] where exclusion is
/// required.
///
/// # Examples
///
/// ```
/// use resident::{Lock, SpinLock};
///
/// let lock = SpinLock::new();
/// assert_eq!(lock.ref_count(), 0);
/// lock.lock();
/// assert_eq!(lock.ref_count(), -1);
/// lock.unlock();
/// assert_eq!(lock.ref_count(), 0);
/// ```
#[derive(Default)]
pub struct SpinLock {
    count: AtomicI64,
}

/********** impl inherent *************************************************************************/

impl SpinLock {
    /// Creates a new `SpinLock` with a counter of zero.
    #[inline]
    pub const fn new() -> Self {
        Self { count: AtomicI64::new(0) }
    }

    /// Atomically reads the current counter without modifying it.
    ///
    /// The read is performed as an atomic addition of zero.
    #[inline]
    pub fn ref_count(&self) -> i64 {
        self.count.fetch_add(0, Ordering::SeqCst)
    }
}

/********** impl Lock *****************************************************************************/

impl Lock for SpinLock {
    #[inline]
    fn lock(&self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }

    #[inline]
    fn unlock(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/********** impl Debug ****************************************************************************/

impl fmt::Debug for SpinLock {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SpinLock").field("ref_count", &self.ref_count()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::SpinLock;
    use crate::lock::Lock;

    #[test]
    fn counter_semantics() {
        let lock = SpinLock::new();
        assert_eq!(lock.ref_count(), 0);
        lock.lock();
        assert_eq!(lock.ref_count(), -1);
        lock.unlock();
        assert_eq!(lock.ref_count(), 0);
    }

    #[test]
    fn nested_acquisitions_do_not_wait() {
        let lock = SpinLock::new();
        lock.lock();
        lock.lock();
        assert_eq!(lock.ref_count(), -2);
        lock.unlock();
        lock.unlock();
        assert_eq!(lock.ref_count(), 0);
    }

    #[test]
    fn concurrent_balanced_pairs() {
        const THREADS: usize = 4;
        const ITERS: usize = 10_000;

        let lock = Arc::new(SpinLock::new());
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    for _ in 0..ITERS {
                        lock.lock();
                        lock.unlock();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(lock.ref_count(), 0);
    }
}
