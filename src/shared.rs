//! Atomically reference counted, hook-allocated values.

use core::alloc::Layout;
use core::fmt;
use core::marker::PhantomData;
use core::mem;
use core::ops::Deref;
use core::ptr::{self, NonNull};
use core::sync::atomic::{self, AtomicI64, Ordering};

use crate::hook::{self, AllocError, AllocHook, AllocRequest, Residency};
use crate::unique::{Extent, UniquePtr};

////////////////////////////////////////////////////////////////////////////////////////////////////
// SharedPtrState
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The control block shared by all [`SharedPtr`] handles to the same value.
///
/// The state is the sole owner of the value and carries a signed reference
/// count that starts at `1`.
/// The value is freed together with the state when the count drops from `1`
/// to `0`.
pub struct SharedPtrState<T, A: AllocHook> {
    count: AtomicI64,
    data: UniquePtr<T, A>,
}

/********** impl inherent *************************************************************************/

impl<T, A: AllocHook> SharedPtrState<T, A> {
    /// Returns the raw pointer to the (first) owned value.
    #[inline]
    pub fn ptr(&self) -> *mut T {
        self.data.ptr()
    }

    /// Returns the current reference count.
    #[inline]
    pub fn ref_count(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }

    /// Returns the owning pointer to the value.
    #[inline]
    pub fn data(&self) -> &UniquePtr<T, A> {
        &self.data
    }

    #[inline]
    fn new(data: UniquePtr<T, A>) -> Self {
        Self { count: AtomicI64::new(1), data }
    }

    #[inline]
    fn inc_ref(&self) {
        let prev = self.count.fetch_add(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "reference count incremented after the last release");
        assert!(prev < i64::MAX, "reference count overflow");
    }

    /// Returns `true` if this call released the last reference.
    #[inline]
    fn dec_ref(&self) -> bool {
        let prev = self.count.fetch_sub(1, Ordering::Release);
        debug_assert!(prev > 0, "reference count decremented below zero");
        if prev != 1 {
            return false;
        }

        atomic::fence(Ordering::Acquire);
        true
    }

    #[inline]
    fn request(residency: Residency) -> AllocRequest {
        AllocRequest::scalar(Layout::new::<Self>(), residency)
    }
}

/********** impl Debug ****************************************************************************/

impl<T: fmt::Debug, A: AllocHook> fmt::Debug for SharedPtrState<T, A> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SharedPtrState")
            .field("ref_count", &self.ref_count())
            .field("data", &self.data)
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// SharedPtr
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A handle holding one reference to a [`SharedPtrState`].
///
/// Cloning a handle increments the count of the shared state, dropping it
/// decrements the count.
/// The handle that observes the count reaching zero frees the value and the
/// state, both through the hook `A` and with the residency class chosen at
/// construction.
///
/// The count is the only synchronization, there are no weak references.
pub struct SharedPtr<T, A: AllocHook> {
    state: NonNull<SharedPtrState<T, A>>,
    _marker: PhantomData<SharedPtrState<T, A>>,
}

unsafe impl<T: Send + Sync, A: AllocHook> Send for SharedPtr<T, A> {}
unsafe impl<T: Send + Sync, A: AllocHook> Sync for SharedPtr<T, A> {}

/********** impl inherent (T: Default) ************************************************************/

impl<T: Default, A: AllocHook> SharedPtr<T, A> {
    /// Allocates a default-initialized value in a new control block.
    ///
    /// # Panics
    ///
    /// Panics if an allocation fails.
    #[inline]
    pub fn new(residency: Residency) -> Self {
        Self::try_new(residency).unwrap_or_else(|err| hook::alloc_failed(err))
    }

    /// Allocates a default-initialized value in a new control block or
    /// returns an error if an allocation fails.
    #[inline]
    pub fn try_new(residency: Residency) -> Result<Self, AllocError> {
        Self::try_from_unique(UniquePtr::try_new(residency)?)
    }

    /// Allocates an array of `len` default-initialized values in a new
    /// control block.
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero or an allocation fails.
    #[inline]
    pub fn new_array(len: usize, residency: Residency) -> Self {
        Self::try_new_array(len, residency).unwrap_or_else(|err| hook::alloc_failed(err))
    }

    /// Allocates an array of `len` default-initialized values in a new
    /// control block or returns an error if an allocation fails.
    #[inline]
    pub fn try_new_array(len: usize, residency: Residency) -> Result<Self, AllocError> {
        Self::try_from_unique(UniquePtr::try_new_array(len, residency)?)
    }
}

/********** impl inherent *************************************************************************/

impl<T, A: AllocHook> SharedPtr<T, A> {
    /// Allocates `value` in a new control block.
    ///
    /// # Panics
    ///
    /// Panics if an allocation fails.
    #[inline]
    pub fn from_value(value: T, residency: Residency) -> Self {
        Self::try_from_value(value, residency).unwrap_or_else(|err| hook::alloc_failed(err))
    }

    /// Allocates `value` in a new control block or returns an error if an
    /// allocation fails.
    #[inline]
    pub fn try_from_value(value: T, residency: Residency) -> Result<Self, AllocError> {
        Self::try_from_unique(UniquePtr::try_from_value(value, residency)?)
    }

    /// Allocates `size` bytes in scalar form, moves `value` to the start of
    /// the allocation and places it in a new control block.
    ///
    /// # Panics
    ///
    /// Panics if `size` is less than the size of `T` or an allocation fails.
    #[inline]
    pub fn with_size(size: usize, value: T, residency: Residency) -> Self {
        Self::try_with_size(size, value, residency).unwrap_or_else(|err| hook::alloc_failed(err))
    }

    /// Fallible version of [`with_size`][SharedPtr::with_size].
    #[inline]
    pub fn try_with_size(size: usize, value: T, residency: Residency) -> Result<Self, AllocError> {
        Self::try_from_unique(UniquePtr::try_with_size(size, value, residency)?)
    }

    /// Allocates an array of `len` values initialized by `init` in a new
    /// control block.
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero or an allocation fails.
    #[inline]
    pub fn new_array_with(len: usize, residency: Residency, init: impl FnMut(usize) -> T) -> Self {
        Self::try_new_array_with(len, residency, init).unwrap_or_else(|err| hook::alloc_failed(err))
    }

    /// Fallible version of [`new_array_with`][SharedPtr::new_array_with].
    #[inline]
    pub fn try_new_array_with(
        len: usize,
        residency: Residency,
        init: impl FnMut(usize) -> T,
    ) -> Result<Self, AllocError> {
        Self::try_from_unique(UniquePtr::try_new_array_with(len, residency, init)?)
    }

    /// Moves an exclusively owned value into a new control block.
    ///
    /// The control block is allocated with the same residency class as the
    /// value.
    /// If that allocation fails, `unique` is dropped and the error returned.
    #[inline]
    pub fn try_from_unique(unique: UniquePtr<T, A>) -> Result<Self, AllocError> {
        let request = SharedPtrState::<T, A>::request(unique.residency());
        let state = hook::allocate::<SharedPtrState<T, A>, A>(request)?;
        unsafe { ptr::write(state.as_ptr(), SharedPtrState::new(unique)) };

        Ok(Self { state, _marker: PhantomData })
    }

    /// Returns the raw pointer to the (first) owned value without affecting
    /// the reference count.
    #[inline]
    pub fn ptr(&self) -> *mut T {
        self.state().ptr()
    }

    /// Returns the shared control block.
    #[inline]
    pub fn state(&self) -> &SharedPtrState<T, A> {
        unsafe { self.state.as_ref() }
    }

    /// Returns the current reference count of the shared control block.
    #[inline]
    pub fn ref_count(&self) -> i64 {
        self.state().ref_count()
    }

    /// Returns the extent of the owned allocation.
    #[inline]
    pub fn extent(&self) -> Extent {
        self.state().data.extent()
    }

    /// Returns the number of owned values.
    #[inline]
    pub fn element_count(&self) -> usize {
        self.state().data.element_count()
    }

    /// Returns the residency class of the value and its control block.
    #[inline]
    pub fn residency(&self) -> Residency {
        self.state().data.residency()
    }

    /// Returns all owned values as a slice.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        self.state().data.as_slice()
    }

    /// Returns a mutable reference to the (first) owned value if this is the
    /// only handle to it.
    #[inline]
    pub fn get_mut(&mut self) -> Option<&mut T> {
        if self.state().count.load(Ordering::Acquire) == 1 {
            // this is safe because no other handle can observe the value
            Some(unsafe { &mut *self.ptr() })
        } else {
            None
        }
    }

    /// Returns `true` if both handles refer to the same control block.
    #[inline]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.state == other.state
    }
}

/********** impl From *****************************************************************************/

impl<T, A: AllocHook> From<UniquePtr<T, A>> for SharedPtr<T, A> {
    /// # Panics
    ///
    /// Panics if the control block can not be allocated.
    #[inline]
    fn from(unique: UniquePtr<T, A>) -> Self {
        Self::try_from_unique(unique).unwrap_or_else(|err| hook::alloc_failed(err))
    }
}

/********** impl Clone ****************************************************************************/

impl<T, A: AllocHook> Clone for SharedPtr<T, A> {
    #[inline]
    fn clone(&self) -> Self {
        self.state().inc_ref();
        Self { state: self.state, _marker: PhantomData }
    }

    /// Copies `source` by cloning it first and then swapping the clone into
    /// `self`, so the previous reference of `self` is released last.
    #[inline]
    fn clone_from(&mut self, source: &Self) {
        let mut temp = source.clone();
        mem::swap(self, &mut temp);
    }
}

/********** impl Deref ****************************************************************************/

impl<T, A: AllocHook> Deref for SharedPtr<T, A> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &*self.state().data
    }
}

/********** impl AsRef ****************************************************************************/

impl<T, A: AllocHook> AsRef<T> for SharedPtr<T, A> {
    #[inline]
    fn as_ref(&self) -> &T {
        &**self
    }
}

/********** impl Drop *****************************************************************************/

impl<T, A: AllocHook> Drop for SharedPtr<T, A> {
    #[inline]
    fn drop(&mut self) {
        if !self.state().dec_ref() {
            return;
        }

        let request = SharedPtrState::<T, A>::request(self.residency());
        log::debug!("releasing last reference to shared state at {:p}", self.state);
        unsafe {
            ptr::drop_in_place(self.state.as_ptr());
            hook::deallocate::<_, A>(self.state, request);
        }
    }
}

/********** impl Debug & Pointer ******************************************************************/

impl<T: fmt::Debug, A: AllocHook> fmt::Debug for SharedPtr<T, A> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SharedPtr").field("state", self.state()).finish()
    }
}

impl<T, A: AllocHook> fmt::Pointer for SharedPtr<T, A> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Pointer::fmt(&self.ptr(), f)
    }
}
