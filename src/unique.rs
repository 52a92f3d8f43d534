//! Exclusively owned, hook-allocated values and arrays.

use core::alloc::Layout;
use core::borrow::{Borrow, BorrowMut};
use core::fmt;
use core::marker::PhantomData;
use core::mem::{self, ManuallyDrop, MaybeUninit};
use core::ops::{Deref, DerefMut};
use core::ptr::{self, NonNull};
use core::slice;

use crate::hook::{self, AllocError, AllocHook, AllocRequest, Residency};

////////////////////////////////////////////////////////////////////////////////////////////////////
// Extent
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The shape of an owned allocation.
///
/// The extent decides which [`AllocForm`][crate::AllocForm] is used:
/// arrays are allocated and de-allocated in array form, everything else in
/// scalar form.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum Extent {
    /// A single value.
    Single,
    /// An array of the given (non-zero) number of values.
    Array(usize),
    /// A single value at the start of an allocation of the given size in
    /// bytes, followed by uninitialized trailing bytes.
    Bytes(usize),
}

/********** impl inherent *************************************************************************/

impl Extent {
    /// Returns the number of values covered by the extent.
    #[inline]
    pub const fn element_count(self) -> usize {
        match self {
            Extent::Array(len) => len,
            Extent::Single | Extent::Bytes(_) => 1,
        }
    }

    /// Returns `true` if the extent describes an array.
    #[inline]
    pub const fn is_array(self) -> bool {
        match self {
            Extent::Array(_) => true,
            Extent::Single | Extent::Bytes(_) => false,
        }
    }

    /// Builds the allocation request for values of type `T`.
    #[inline]
    fn request<T>(self, residency: Residency) -> Result<AllocRequest, AllocError> {
        match self {
            Extent::Single => Ok(AllocRequest::scalar(Layout::new::<T>(), residency)),
            Extent::Array(0) => Err(AllocError::ZeroLength),
            Extent::Array(len) => Layout::array::<T>(len)
                .map(|layout| AllocRequest::array(layout, residency))
                .map_err(|_| AllocError::CapacityOverflow),
            Extent::Bytes(size) => {
                let required = mem::size_of::<T>();
                if size < required {
                    return Err(AllocError::Undersized { requested: size, required });
                }

                Layout::from_size_align(size, mem::align_of::<T>())
                    .map(|layout| AllocRequest::scalar(layout, residency))
                    .map_err(|_| AllocError::CapacityOverflow)
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// UniquePtr
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An exclusively owned value or array allocated through the hook `A`.
///
/// The memory is requested with a caller-chosen [`Residency`] class and is
/// released exactly once, when the `UniquePtr` is dropped, using the same
/// request (and hence the same scalar or array form) it was allocated with.
///
/// A `UniquePtr` can not be copied or cloned.
/// Moving it transfers the ownership, the moved-from binding can no longer be
/// used.
pub struct UniquePtr<T, A: AllocHook> {
    inner: NonNull<T>,
    extent: Extent,
    request: AllocRequest,
    _marker: PhantomData<(T, A)>,
}

unsafe impl<T: Send, A: AllocHook> Send for UniquePtr<T, A> {}
unsafe impl<T: Sync, A: AllocHook> Sync for UniquePtr<T, A> {}

/********** impl inherent (T: Default) ************************************************************/

impl<T: Default, A: AllocHook> UniquePtr<T, A> {
    /// Allocates a default-initialized value.
    ///
    /// # Panics
    ///
    /// Panics if the allocation fails.
    #[inline]
    pub fn new(residency: Residency) -> Self {
        Self::try_new(residency).unwrap_or_else(|err| hook::alloc_failed(err))
    }

    /// Allocates a default-initialized value or returns an error if the
    /// allocation fails.
    #[inline]
    pub fn try_new(residency: Residency) -> Result<Self, AllocError> {
        Self::try_from_value(T::default(), residency)
    }

    /// Allocates an array of `len` default-initialized values.
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero or the allocation fails.
    #[inline]
    pub fn new_array(len: usize, residency: Residency) -> Self {
        Self::new_array_with(len, residency, |_| T::default())
    }

    /// Allocates an array of `len` default-initialized values or returns an
    /// error if the allocation fails.
    #[inline]
    pub fn try_new_array(len: usize, residency: Residency) -> Result<Self, AllocError> {
        Self::try_new_array_with(len, residency, |_| T::default())
    }
}

/********** impl inherent *************************************************************************/

impl<T, A: AllocHook> UniquePtr<T, A> {
    /// Allocates memory for `value` and moves it there.
    ///
    /// # Panics
    ///
    /// Panics if the allocation fails.
    #[inline]
    pub fn from_value(value: T, residency: Residency) -> Self {
        Self::try_from_value(value, residency).unwrap_or_else(|err| hook::alloc_failed(err))
    }

    /// Allocates memory for `value` and moves it there or returns an error if
    /// the allocation fails.
    #[inline]
    pub fn try_from_value(value: T, residency: Residency) -> Result<Self, AllocError> {
        Self::try_with_extent(Extent::Single, value, residency)
    }

    /// Allocates `size` bytes in scalar form and moves `value` to the start of
    /// the allocation.
    ///
    /// The bytes following the value can be accessed through
    /// [`trailing_bytes`][UniquePtr::trailing_bytes].
    ///
    /// # Panics
    ///
    /// Panics if `size` is less than the size of `T` or the allocation fails.
    #[inline]
    pub fn with_size(size: usize, value: T, residency: Residency) -> Self {
        Self::try_with_size(size, value, residency).unwrap_or_else(|err| hook::alloc_failed(err))
    }

    /// Allocates `size` bytes in scalar form and moves `value` to the start of
    /// the allocation or returns an error if the allocation fails.
    #[inline]
    pub fn try_with_size(size: usize, value: T, residency: Residency) -> Result<Self, AllocError> {
        Self::try_with_extent(Extent::Bytes(size), value, residency)
    }

    /// Allocates an array of `len` values, each initialized by calling `init`
    /// with its index.
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero or the allocation fails.
    #[inline]
    pub fn new_array_with(len: usize, residency: Residency, init: impl FnMut(usize) -> T) -> Self {
        Self::try_new_array_with(len, residency, init).unwrap_or_else(|err| hook::alloc_failed(err))
    }

    /// Allocates an array of `len` values, each initialized by calling `init`
    /// with its index, or returns an error if the allocation fails.
    ///
    /// If `init` panics, the values created so far are leaked but the memory
    /// is still returned to the hook.
    #[inline]
    pub fn try_new_array_with(
        len: usize,
        residency: Residency,
        mut init: impl FnMut(usize) -> T,
    ) -> Result<Self, AllocError> {
        let mut uninit = Self::try_new_uninit_array(len, residency)?;
        for (idx, elem) in uninit.as_mut_slice().iter_mut().enumerate() {
            *elem = MaybeUninit::new(init(idx));
        }

        // this is safe because every element has been written above
        Ok(unsafe { uninit.assume_init() })
    }

    /// Allocates an array of `len` uninitialized values.
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero or the allocation fails.
    #[inline]
    pub fn new_uninit_array(len: usize, residency: Residency) -> UniquePtr<MaybeUninit<T>, A> {
        Self::try_new_uninit_array(len, residency).unwrap_or_else(|err| hook::alloc_failed(err))
    }

    /// Allocates an array of `len` uninitialized values or returns an error if
    /// the allocation fails.
    #[inline]
    pub fn try_new_uninit_array(
        len: usize,
        residency: Residency,
    ) -> Result<UniquePtr<MaybeUninit<T>, A>, AllocError> {
        let extent = Extent::Array(len);
        let request = extent.request::<T>(residency)?;
        let inner = hook::allocate::<MaybeUninit<T>, A>(request)?;

        Ok(UniquePtr { inner, extent, request, _marker: PhantomData })
    }

    /// Returns the raw pointer to the (first) owned value without giving up
    /// ownership.
    #[inline]
    pub fn ptr(&self) -> *mut T {
        self.inner.as_ptr()
    }

    /// Returns the extent of the allocation.
    #[inline]
    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// Returns the number of owned values.
    #[inline]
    pub fn element_count(&self) -> usize {
        self.extent.element_count()
    }

    /// Returns `true` if the pointer owns an array.
    #[inline]
    pub fn is_array(&self) -> bool {
        self.extent.is_array()
    }

    /// Returns the residency class the memory was allocated with.
    #[inline]
    pub fn residency(&self) -> Residency {
        self.request.residency
    }

    /// Returns the request the memory was allocated with, which will also be
    /// used for its de-allocation.
    #[inline]
    pub fn request(&self) -> AllocRequest {
        self.request
    }

    /// Returns all owned values as a slice.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        unsafe { slice::from_raw_parts(self.inner.as_ptr(), self.element_count()) }
    }

    /// Returns all owned values as a mutable slice.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        unsafe { slice::from_raw_parts_mut(self.inner.as_ptr(), self.element_count()) }
    }

    /// Returns the bytes following the value of an allocation created with
    /// [`with_size`][UniquePtr::with_size].
    ///
    /// For all other allocations the returned slice is empty.
    #[inline]
    pub fn trailing_bytes(&self) -> &[MaybeUninit<u8>] {
        let (ptr, len) = self.trailing_parts();
        unsafe { slice::from_raw_parts(ptr, len) }
    }

    /// Returns the mutable bytes following the value of an allocation created
    /// with [`with_size`][UniquePtr::with_size].
    #[inline]
    pub fn trailing_bytes_mut(&mut self) -> &mut [MaybeUninit<u8>] {
        let (ptr, len) = self.trailing_parts();
        unsafe { slice::from_raw_parts_mut(ptr, len) }
    }

    #[inline]
    fn trailing_parts(&self) -> (*mut MaybeUninit<u8>, usize) {
        match self.extent {
            Extent::Bytes(size) => {
                let offset = mem::size_of::<T>();
                // the allocation is at least `offset` bytes large
                let ptr = unsafe { self.inner.cast::<MaybeUninit<u8>>().as_ptr().add(offset) };
                (ptr, size - offset)
            }
            Extent::Single | Extent::Array(_) => (NonNull::dangling().as_ptr(), 0),
        }
    }

    #[inline]
    fn try_with_extent(extent: Extent, value: T, residency: Residency) -> Result<Self, AllocError> {
        let request = extent.request::<T>(residency)?;
        let inner = hook::allocate::<T, A>(request)?;
        unsafe { ptr::write(inner.as_ptr(), value) };

        Ok(Self { inner, extent, request, _marker: PhantomData })
    }
}

impl<T, A: AllocHook> UniquePtr<MaybeUninit<T>, A> {
    /// Converts to a `UniquePtr` of initialized values.
    ///
    /// # Safety
    ///
    /// The caller has to ensure every owned value is initialized.
    #[inline]
    pub unsafe fn assume_init(self) -> UniquePtr<T, A> {
        let this = ManuallyDrop::new(self);
        UniquePtr {
            inner: this.inner.cast(),
            extent: this.extent,
            request: this.request,
            _marker: PhantomData,
        }
    }
}

/********** impl AsRef & AsMut ********************************************************************/

impl<T, A: AllocHook> AsRef<T> for UniquePtr<T, A> {
    #[inline]
    fn as_ref(&self) -> &T {
        &**self
    }
}

impl<T, A: AllocHook> AsMut<T> for UniquePtr<T, A> {
    #[inline]
    fn as_mut(&mut self) -> &mut T {
        &mut **self
    }
}

/********** impl Borrow & BorrowMut ***************************************************************/

impl<T, A: AllocHook> Borrow<T> for UniquePtr<T, A> {
    #[inline]
    fn borrow(&self) -> &T {
        &**self
    }
}

impl<T, A: AllocHook> BorrowMut<T> for UniquePtr<T, A> {
    #[inline]
    fn borrow_mut(&mut self) -> &mut T {
        &mut **self
    }
}

/********** impl Deref & DerefMut *****************************************************************/

impl<T, A: AllocHook> Deref for UniquePtr<T, A> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        unsafe { self.inner.as_ref() }
    }
}

impl<T, A: AllocHook> DerefMut for UniquePtr<T, A> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { self.inner.as_mut() }
    }
}

/********** impl Drop *****************************************************************************/

impl<T, A: AllocHook> Drop for UniquePtr<T, A> {
    #[inline]
    fn drop(&mut self) {
        unsafe {
            ptr::drop_in_place(self.as_mut_slice() as *mut [T]);
            hook::deallocate::<T, A>(self.inner, self.request);
        }
    }
}

/********** impl Debug & Pointer ******************************************************************/

impl<T: fmt::Debug, A: AllocHook> fmt::Debug for UniquePtr<T, A> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut dbg = f.debug_struct("UniquePtr");
        if self.is_array() {
            dbg.field("values", &self.as_slice());
        } else {
            dbg.field("value", &**self);
        }

        dbg.field("extent", &self.extent).field("residency", &self.residency()).finish()
    }
}

impl<T, A: AllocHook> fmt::Pointer for UniquePtr<T, A> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Pointer::fmt(&self.inner.as_ptr(), f)
    }
}

#[cfg(test)]
mod tests {
    use std::mem::{self, MaybeUninit};

    use matches::assert_matches;

    use crate::hook::{AllocError, AllocForm, Residency};
    use crate::test::{array_layout, CountingHook, DropCount, FailingHook};

    use super::Extent;

    type UniquePtr<T> = super::UniquePtr<T, CountingHook>;

    #[repr(C)]
    #[derive(Debug, Default)]
    struct Header {
        len: u32,
        kind: u32,
    }

    #[test]
    fn new_scalar() {
        let mut unique = UniquePtr::<u64>::new(Residency::Resident);
        assert_eq!(*unique, 0);
        *unique = 42;
        assert_eq!(*unique.as_ref(), 42);
        assert_eq!(unsafe { *unique.ptr() }, 42);
        assert_eq!(unique.extent(), Extent::Single);
        assert!(!unique.is_array());
        assert_eq!(unique.request().form, AllocForm::Scalar);
        drop(unique);

        let stats = CountingHook::stats();
        assert_eq!((stats.allocs, stats.deallocs), (1, 1));
        assert_eq!((stats.array_allocs, stats.array_deallocs), (0, 0));
        assert!(CountingHook::live().is_empty());
    }

    #[test]
    fn array_of_ten() {
        let unique = UniquePtr::<i32>::new_array(10, Residency::Pageable);
        assert_eq!(unique.element_count(), 10);
        assert!(unique.is_array());
        assert_eq!(unique.residency(), Residency::Pageable);
        assert_eq!(unique.as_slice(), &[0; 10]);

        let stats = CountingHook::stats();
        assert_eq!(stats.array_allocs, 1);
        assert_eq!(stats.allocs, 0);
        assert_eq!(stats.bytes, 10 * mem::size_of::<i32>());
        assert_eq!(CountingHook::live()[0].layout, array_layout::<i32>(10));

        drop(unique);
        let stats = CountingHook::stats();
        assert_eq!((stats.array_deallocs, stats.deallocs), (1, 0));
    }

    #[test]
    fn array_with() {
        let mut unique = UniquePtr::new_array_with(4, Residency::Resident, |idx| idx * 2);
        assert_eq!(unique.as_slice(), &[0, 2, 4, 6]);
        unique.as_mut_slice()[3] = 7;
        assert_eq!(*unique, 0);
        assert_eq!(unique.as_slice()[3], 7);
    }

    #[test]
    fn uninit_array() {
        let mut uninit = UniquePtr::<u16>::new_uninit_array(3, Residency::Resident);
        for (idx, elem) in uninit.as_mut_slice().iter_mut().enumerate() {
            *elem = MaybeUninit::new(idx as u16 + 1);
        }

        let init = unsafe { uninit.assume_init() };
        assert_eq!(init.as_slice(), &[1, 2, 3]);
        drop(init);

        let stats = CountingHook::stats();
        assert_eq!((stats.array_allocs, stats.array_deallocs), (1, 1));
    }

    #[test]
    fn explicit_size() {
        let size = mem::size_of::<Header>() + 24;
        let mut unique = UniquePtr::with_size(size, Header { len: 24, kind: 1 }, Residency::Resident);
        assert_eq!(unique.extent(), Extent::Bytes(size));
        assert!(!unique.is_array());
        assert_eq!(unique.len, 24);
        assert_eq!(unique.trailing_bytes().len(), 24);

        for byte in unique.trailing_bytes_mut() {
            *byte = MaybeUninit::new(0xAB);
        }
        assert_eq!(unsafe { unique.trailing_bytes()[23].assume_init() }, 0xAB);

        let live = CountingHook::live();
        assert_eq!(live[0].form, AllocForm::Scalar);
        assert_eq!(live[0].layout.size(), size);
        drop(unique);

        let stats = CountingHook::stats();
        assert_eq!((stats.allocs, stats.deallocs, stats.array_allocs), (1, 1, 0));
    }

    #[test]
    fn explicit_size_too_small() {
        let res = UniquePtr::try_with_size(2, Header::default(), Residency::Resident);
        assert_matches!(res, Err(AllocError::Undersized { requested: 2, required: 8 }));
        assert_eq!(CountingHook::stats().allocs, 0);
    }

    #[test]
    fn zero_length_array() {
        assert_matches!(
            UniquePtr::<u8>::try_new_array(0, Residency::Resident),
            Err(AllocError::ZeroLength)
        );
        assert_matches!(
            UniquePtr::<u8>::try_new_array(usize::MAX, Residency::Resident),
            Err(AllocError::CapacityOverflow)
        );
    }

    #[test]
    fn exhausted_hook() {
        let res = super::UniquePtr::<u32, FailingHook>::try_new(Residency::Pageable);
        assert_matches!(
            res,
            Err(AllocError::Exhausted { size: 4, residency: Residency::Pageable })
        );
    }

    #[test]
    #[should_panic(expected = "failed to allocate")]
    fn exhausted_hook_is_fatal() {
        let _ = super::UniquePtr::<u32, FailingHook>::new(Residency::Resident);
    }

    #[test]
    fn drops_values_once() {
        let counter = DropCount::default();
        let unique = UniquePtr::from_value(counter.clone(), Residency::Resident);
        assert_eq!(counter.count(), 0);
        drop(unique);
        assert_eq!(counter.count(), 1);

        let unique = UniquePtr::new_array_with(5, Residency::Resident, |_| counter.clone());
        drop(unique);
        assert_eq!(counter.count(), 6);
    }

    #[test]
    fn moves_transfer_ownership() {
        let unique = UniquePtr::from_value(String::from("owned"), Residency::Resident);
        let ptr = unique.ptr();
        let moved = unique;
        assert_eq!(moved.ptr(), ptr);
        assert_eq!(&*moved, "owned");
        drop(moved);

        assert_eq!(CountingHook::stats().deallocs, 1);
    }

    #[test]
    fn zero_sized_values() {
        let unique = UniquePtr::<()>::new(Residency::Resident);
        assert_eq!(*unique, ());
        drop(unique);
        assert_eq!(CountingHook::stats().allocs, 0);
    }
}
