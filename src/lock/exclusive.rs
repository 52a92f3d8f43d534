use core::fmt;
use core::sync::atomic::{AtomicI64, Ordering};

use crossbeam_utils::Backoff;

use crate::lock::Lock;

const UNLOCKED: i64 = 0;
const LOCKED: i64 = -1;

////////////////////////////////////////////////////////////////////////////////////////////////////
// ExclusiveSpinLock
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A spin lock that actually excludes concurrent acquirers.
///
/// The counter uses the same encoding as [`SpinLock`][crate::SpinLock]
/// (`0` when free, `-1` when held), but [`lock`][Lock::lock] waits with a
/// bounded exponential back-off until its compare-and-swap from `0` to `-1`
/// succeeds.
/// The lock is not reentrant.
#[derive(Default)]
pub struct ExclusiveSpinLock {
    count: AtomicI64,
}

/********** impl inherent *************************************************************************/

impl ExclusiveSpinLock {
    /// Creates a new unlocked `ExclusiveSpinLock`.
    #[inline]
    pub const fn new() -> Self {
        Self { count: AtomicI64::new(UNLOCKED) }
    }

    /// Attempts to acquire the lock without waiting.
    #[inline]
    pub fn try_lock(&self) -> bool {
        self.count
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Returns `true` if the lock is currently held.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.count.load(Ordering::Relaxed) != UNLOCKED
    }

    /// Atomically reads the current counter.
    #[inline]
    pub fn ref_count(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }
}

/********** impl Lock *****************************************************************************/

impl Lock for ExclusiveSpinLock {
    #[inline]
    fn lock(&self) {
        let backoff = Backoff::new();
        loop {
            if self
                .count
                .compare_exchange_weak(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }

            while self.is_locked() {
                backoff.snooze();
            }
        }
    }

    #[inline]
    fn unlock(&self) {
        let prev = self.count.fetch_add(1, Ordering::Release);
        debug_assert_eq!(prev, LOCKED, "unlock of an exclusive spin lock that was not held");
    }
}

/********** impl Debug ****************************************************************************/

impl fmt::Debug for ExclusiveSpinLock {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ExclusiveSpinLock").field("locked", &self.is_locked()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::UnsafeCell;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::ExclusiveSpinLock;
    use crate::lock::{Lock, ScopedLock};

    struct Guarded {
        lock: ExclusiveSpinLock,
        value: UnsafeCell<u64>,
    }

    unsafe impl Sync for Guarded {}

    #[test]
    fn try_lock() {
        let lock = ExclusiveSpinLock::new();
        assert!(lock.try_lock());
        assert!(lock.is_locked());
        assert_eq!(lock.ref_count(), -1);
        assert!(!lock.try_lock());
        lock.unlock();
        assert!(!lock.is_locked());
        assert!(lock.try_lock());
        lock.unlock();
    }

    #[test]
    fn lock_waits_for_release() {
        let lock = Arc::new(ExclusiveSpinLock::new());
        let acquired = Arc::new(AtomicBool::new(false));
        lock.lock();

        let handle = {
            let lock = Arc::clone(&lock);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                let _guard = ScopedLock::new(&*lock);
                acquired.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!acquired.load(Ordering::SeqCst));
        lock.unlock();

        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
        assert!(!lock.is_locked());
    }

    #[test]
    fn mutual_exclusion() {
        const THREADS: usize = 4;
        const ITERS: u64 = 5_000;

        let guarded = Arc::new(Guarded { lock: ExclusiveSpinLock::new(), value: UnsafeCell::new(0) });
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let guarded = Arc::clone(&guarded);
                thread::spawn(move || {
                    for _ in 0..ITERS {
                        let _guard = ScopedLock::new(&guarded.lock);
                        unsafe { *guarded.value.get() += 1 };
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(unsafe { *guarded.value.get() }, THREADS as u64 * ITERS);
        assert!(!guarded.lock.is_locked());
    }
}
