//! The [`Lock`] contract and the [`ScopedLock`] guard.

mod exclusive;
mod spin;

pub use self::exclusive::ExclusiveSpinLock;
pub use self::spin::SpinLock;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Lock (trait)
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A polymorphic acquire/release contract.
///
/// Calls to [`lock`][Lock::lock] and [`unlock`][Lock::unlock] must be balanced
/// around a critical section.
/// Whether the implementation actually excludes concurrent acquirers is up to
/// the type, see [`SpinLock`] and [`ExclusiveSpinLock`].
pub trait Lock {
    /// Acquires the lock.
    fn lock(&self);

    /// Releases the lock.
    fn unlock(&self);
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ScopedLock
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A guard that acquires a [`Lock`] on construction and releases it when it
/// goes out of scope.
///
/// The release happens on every exit path of the enclosing scope, including
/// early returns and unwinding.
///
/// # Examples
///
/// ```
/// use resident::{ScopedLock, SpinLock};
///
/// let lock = SpinLock::new();
/// {
///     let _guard = ScopedLock::new(&lock);
///     assert_eq!(lock.ref_count(), -1);
/// }
/// assert_eq!(lock.ref_count(), 0);
/// ```
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ScopedLock<'a, L: Lock + ?Sized> {
    lock: Option<&'a L>,
}

/********** impl inherent *************************************************************************/

impl<'a, L: Lock + ?Sized> ScopedLock<'a, L> {
    /// Acquires `lock` and returns a guard that releases it when dropped.
    #[inline]
    pub fn new(lock: &'a L) -> Self {
        lock.lock();
        Self { lock: Some(lock) }
    }

    /// Acquires `lock` if it is `Some`.
    ///
    /// A guard over `None` neither acquires nor releases anything.
    #[inline]
    pub fn from_option(lock: Option<&'a L>) -> Self {
        match lock {
            Some(lock) => Self::new(lock),
            None => {
                log::debug!("scoped lock created without a lock");
                Self { lock: None }
            }
        }
    }

    /// Returns `true` if the guard holds an acquisition.
    #[inline]
    pub fn is_held(&self) -> bool {
        self.lock.is_some()
    }
}

/********** impl Drop *****************************************************************************/

impl<L: Lock + ?Sized> Drop for ScopedLock<'_, L> {
    #[inline]
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            lock.unlock();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{self, AssertUnwindSafe};

    use super::{Lock, ScopedLock, SpinLock};
    use crate::test::CountingLock;

    fn early_return(lock: &CountingLock, bail: bool) -> usize {
        let _guard = ScopedLock::new(lock);
        if bail {
            return 0;
        }

        lock.locks.get()
    }

    #[test]
    fn balanced_on_fall_through() {
        let lock = CountingLock::default();
        {
            let guard = ScopedLock::new(&lock);
            assert!(guard.is_held());
            assert_eq!((lock.locks.get(), lock.unlocks.get()), (1, 0));
        }
        assert_eq!((lock.locks.get(), lock.unlocks.get()), (1, 1));
    }

    #[test]
    fn balanced_on_early_return() {
        let lock = CountingLock::default();
        assert_eq!(early_return(&lock, true), 0);
        assert_eq!((lock.locks.get(), lock.unlocks.get()), (1, 1));
        assert_eq!(early_return(&lock, false), 2);
        assert_eq!((lock.locks.get(), lock.unlocks.get()), (2, 2));
    }

    #[test]
    fn balanced_on_unwind() {
        let lock = SpinLock::new();
        let res = panic::catch_unwind(AssertUnwindSafe(|| {
            let _guard = ScopedLock::new(&lock);
            assert_eq!(lock.ref_count(), -1);
            panic!("unwinding through the critical section");
        }));

        assert!(res.is_err());
        assert_eq!(lock.ref_count(), 0);
    }

    #[test]
    fn without_lock() {
        let guard = ScopedLock::<CountingLock>::from_option(None);
        assert!(!guard.is_held());
        drop(guard);

        let lock = CountingLock::default();
        drop(ScopedLock::from_option(Some(&lock)));
        assert_eq!((lock.locks.get(), lock.unlocks.get()), (1, 1));
    }

    #[test]
    fn dyn_lock() {
        let lock = CountingLock::default();
        {
            let dyn_lock: &dyn Lock = &lock;
            let _guard = ScopedLock::new(dyn_lock);
        }
        assert_eq!((lock.locks.get(), lock.unlocks.get()), (1, 1));
    }
}
