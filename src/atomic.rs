//! A non-owning, atomically swappable pointer cell.

use core::fmt;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

////////////////////////////////////////////////////////////////////////////////////////////////////
// Atomic
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A raw pointer cell that can be shared between threads, similar to
/// [`AtomicPtr`].
///
/// An `Atomic` does not own the pointed-to value.
/// Keeping the value alive for as long as it can be observed through the cell
/// is the caller's responsibility, and dropping the cell does not free it.
///
/// Two ways of replacing the stored pointer are provided:
/// [`exchange`][Atomic::exchange] performs a single compare-and-swap against
/// the value it has just read and gives up if a concurrent writer got in
/// between (a *lost update*), while [`swap`][Atomic::swap] always replaces the
/// pointer.
pub struct Atomic<T> {
    inner: AtomicPtr<T>,
}

/********** impl inherent (const) *****************************************************************/

impl<T> Atomic<T> {
    /// Creates a new `null` pointer cell.
    #[inline]
    pub const fn null() -> Self {
        Self { inner: AtomicPtr::new(ptr::null_mut()) }
    }

    /// Creates a new pointer cell storing `ptr`.
    #[inline]
    pub const fn new(ptr: *mut T) -> Self {
        Self { inner: AtomicPtr::new(ptr) }
    }
}

/********** impl inherent *************************************************************************/

impl<T> Atomic<T> {
    /// Consumes the cell and returns the stored pointer.
    #[inline]
    pub fn into_inner(self) -> *mut T {
        self.inner.into_inner()
    }

    /// Loads the stored pointer.
    ///
    /// # Panics
    ///
    /// Panics if `order` is [`Release`][Ordering::Release] or
    /// [`AcqRel`][Ordering::AcqRel].
    #[inline]
    pub fn load(&self, order: Ordering) -> *mut T {
        self.inner.load(order)
    }

    /// Loads the stored pointer and converts it to a shared reference.
    ///
    /// # Safety
    ///
    /// The caller has to ensure that the stored pointer is either `null` or
    /// points to a valid value that outlives `'a` and is not mutated during
    /// `'a`.
    #[inline]
    pub unsafe fn as_ref<'a>(&self, order: Ordering) -> Option<&'a T> {
        self.load(order).as_ref()
    }

    /// Stores `ptr` unconditionally.
    ///
    /// # Panics
    ///
    /// Panics if `order` is [`Acquire`][Ordering::Acquire] or
    /// [`AcqRel`][Ordering::AcqRel].
    #[inline]
    pub fn store(&self, ptr: *mut T, order: Ordering) {
        self.inner.store(ptr, order);
    }

    /// Replaces the stored pointer with `ptr` unconditionally and returns the
    /// previous pointer.
    #[inline]
    pub fn swap(&self, ptr: *mut T, order: Ordering) -> *mut T {
        self.inner.swap(ptr, order)
    }

    /// Attempts to replace the stored pointer with `ptr` using a single
    /// compare-and-swap against the value observed right before.
    ///
    /// There is no retry: if a concurrent writer changes the pointer between
    /// the read and the compare-and-swap, the update is dropped and
    /// [`LostUpdate`] is returned.
    /// Callers that require the replacement to happen must retry themselves or
    /// use [`swap`][Atomic::swap].
    ///
    /// `order` is used for the successful compare-and-swap, the initial read
    /// uses the strongest load ordering compatible with it.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::atomic::Ordering;
    ///
    /// use resident::Atomic;
    ///
    /// let (mut a, mut b) = (1, 2);
    /// let atomic = Atomic::new(&mut a as *mut i32);
    ///
    /// let prev = atomic.exchange(&mut b, Ordering::SeqCst).unwrap();
    /// assert_eq!(unsafe { *prev }, 1);
    /// assert_eq!(atomic.load(Ordering::SeqCst), &mut b as *mut i32);
    /// ```
    #[inline]
    pub fn exchange(&self, ptr: *mut T, order: Ordering) -> Result<*mut T, LostUpdate<T>> {
        let current = self.inner.load(failure_ordering(order));
        self.exchange_from(current, ptr, order)
    }

    /// Stores `new` if the stored pointer is equal to `current`.
    ///
    /// Returns the previous pointer on success and the actually stored
    /// pointer on failure.
    #[inline]
    pub fn compare_exchange(
        &self,
        current: *mut T,
        new: *mut T,
        success: Ordering,
        failure: Ordering,
    ) -> Result<*mut T, *mut T> {
        self.inner.compare_exchange(current, new, success, failure)
    }
}

/********** helper methods ************************************************************************/

impl<T> Atomic<T> {
    /// Performs the single compare-and-swap of [`exchange`][Atomic::exchange]
    /// against the previously observed pointer `current`.
    #[inline]
    fn exchange_from(
        &self,
        current: *mut T,
        ptr: *mut T,
        order: Ordering,
    ) -> Result<*mut T, LostUpdate<T>> {
        let failure = failure_ordering(order);
        self.inner.compare_exchange(current, ptr, order, failure).map_err(|loaded| {
            log::trace!("lost update of {:p} (expected {:p}, found {:p})", ptr, current, loaded);
            LostUpdate { loaded, input: ptr }
        })
    }
}

/********** impl Default **************************************************************************/

impl<T> Default for Atomic<T> {
    #[inline]
    fn default() -> Self {
        Self::null()
    }
}

/********** impl From *****************************************************************************/

impl<T> From<*mut T> for Atomic<T> {
    #[inline]
    fn from(ptr: *mut T) -> Self {
        Self::new(ptr)
    }
}

/********** impl Debug & Pointer ******************************************************************/

impl<T> fmt::Debug for Atomic<T> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Atomic").field("ptr", &self.load(Ordering::SeqCst)).finish()
    }
}

impl<T> fmt::Pointer for Atomic<T> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Pointer::fmt(&self.load(Ordering::SeqCst), f)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// LostUpdate
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The pointers involved in an [`exchange`][Atomic::exchange] that lost a
/// race against a concurrent writer.
pub struct LostUpdate<T> {
    /// The pointer found in the cell by the failed compare-and-swap.
    pub loaded: *mut T,
    /// The pointer that was not stored.
    pub input: *mut T,
}

/********** impl Clone & Copy *********************************************************************/

impl<T> Clone for LostUpdate<T> {
    #[inline]
    fn clone(&self) -> Self {
        Self { loaded: self.loaded, input: self.input }
    }
}

impl<T> Copy for LostUpdate<T> {}

/********** impl PartialEq ************************************************************************/

impl<T> PartialEq for LostUpdate<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.loaded == other.loaded && self.input == other.input
    }
}

impl<T> Eq for LostUpdate<T> {}

/********** impl Debug & Display ******************************************************************/

impl<T> fmt::Debug for LostUpdate<T> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("LostUpdate")
            .field("loaded", &self.loaded)
            .field("input", &self.input)
            .finish()
    }
}

impl<T> fmt::Display for LostUpdate<T> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "update to {:p} lost against concurrent store of {:p}", self.input, self.loaded)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// helper functions
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Returns the strongest ordering that is valid for the load or failure
/// case of an operation with the given `order`.
#[inline]
fn failure_ordering(order: Ordering) -> Ordering {
    match order {
        Ordering::Release | Ordering::Relaxed => Ordering::Relaxed,
        Ordering::Acquire | Ordering::AcqRel => Ordering::Acquire,
        _ => Ordering::SeqCst,
    }
}
