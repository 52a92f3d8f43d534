//! The allocation hook contract consumed by all owning pointer types.
//!
//! This crate does not allocate memory on its own.
//! Every allocation and de-allocation is routed through a type implementing
//! [`AllocHook`], which receives the requested [`Layout`], the [`Residency`]
//! class chosen by the caller and the [`AllocForm`] (scalar or array) of the
//! request.
//! The request passed to [`deallocate`][AllocHook::deallocate] is always
//! identical to the one that was passed to [`allocate`][AllocHook::allocate]
//! for the same pointer, so hooks may use it for their own accounting.

use core::alloc::Layout;
use core::fmt;
use core::ptr::NonNull;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Residency
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The residency class of an allocation.
///
/// Memory that is [`Pageable`][Residency::Pageable] may be moved out to backing
/// storage by the environment and must never be accessed from a context in
/// which a page fault can not be serviced.
/// The crate itself does not enforce access-context legality, it only passes
/// the class through to the [`AllocHook`] unchanged.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Residency {
    /// The memory must remain resident at all times.
    Resident,
    /// The memory may be paged out.
    Pageable,
}

/********** impl inherent *************************************************************************/

impl Residency {
    /// Returns `true` if the residency class is [`Pageable`][Residency::Pageable].
    #[inline]
    pub const fn is_pageable(self) -> bool {
        match self {
            Residency::Pageable => true,
            Residency::Resident => false,
        }
    }
}

/********** impl From *****************************************************************************/

impl From<bool> for Residency {
    /// Converts a boolean `paged` flag, where `true` means pageable.
    #[inline]
    fn from(paged: bool) -> Self {
        if paged {
            Residency::Pageable
        } else {
            Residency::Resident
        }
    }
}

/********** impl Display **************************************************************************/

impl fmt::Display for Residency {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Residency::Resident => f.write_str("resident"),
            Residency::Pageable => f.write_str("pageable"),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// AllocForm
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The form of an allocation, which must match between allocation and
/// de-allocation.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum AllocForm {
    /// A single object, possibly followed by trailing bytes.
    Scalar,
    /// A contiguous array of objects.
    Array,
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// AllocRequest
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A request passed to an [`AllocHook`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AllocRequest {
    /// The size and alignment of the requested memory.
    pub layout: Layout,
    /// The residency class the memory must be allocated with.
    pub residency: Residency,
    /// Whether a single object or an array is requested.
    pub form: AllocForm,
}

/********** impl inherent *************************************************************************/

impl AllocRequest {
    /// Creates a new request for a single object.
    #[inline]
    pub const fn scalar(layout: Layout, residency: Residency) -> Self {
        Self { layout, residency, form: AllocForm::Scalar }
    }

    /// Creates a new request for an array.
    #[inline]
    pub const fn array(layout: Layout, residency: Residency) -> Self {
        Self { layout, residency, form: AllocForm::Array }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// AllocHook (trait)
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A stateless allocator that honors residency classes.
///
/// # Safety
///
/// Implementors must return memory that is valid for reads and writes of
/// `request.layout.size()` bytes, is aligned to `request.layout.align()` and
/// satisfies `request.residency`.
/// The memory must stay valid until it is passed back to
/// [`deallocate`][AllocHook::deallocate].
/// The core never issues requests of size zero.
pub unsafe trait AllocHook {
    /// Allocates memory as described by `request`.
    fn allocate(request: AllocRequest) -> Result<NonNull<u8>, AllocError>;

    /// De-allocates memory previously returned by [`allocate`][AllocHook::allocate].
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by a call to `allocate` with a request
    /// equal to `request` and must not have been de-allocated before.
    unsafe fn deallocate(ptr: NonNull<u8>, request: AllocRequest);
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// AllocError
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The error type for failed allocations.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AllocError {
    /// The hook could not provide the requested memory.
    Exhausted {
        /// The requested size in bytes.
        size: usize,
        /// The requested residency class.
        residency: Residency,
    },
    /// The total size of an array exceeds `isize::MAX` bytes.
    CapacityOverflow,
    /// An array with no elements was requested.
    ZeroLength,
    /// An explicit allocation size is too small to hold the object.
    Undersized {
        /// The requested size in bytes.
        requested: usize,
        /// The minimum size in bytes.
        required: usize,
    },
}

/********** impl Display **************************************************************************/

impl fmt::Display for AllocError {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AllocError::Exhausted { size, residency } => {
                write!(f, "failed to allocate {} bytes of {} memory", size, residency)
            }
            AllocError::CapacityOverflow => f.write_str("array capacity overflow"),
            AllocError::ZeroLength => f.write_str("arrays must have at least one element"),
            AllocError::Undersized { requested, required } => write!(
                f,
                "explicit size of {} bytes is smaller than the required {} bytes",
                requested, required
            ),
        }
    }
}

/********** impl Error ****************************************************************************/

#[cfg(feature = "std")]
impl std::error::Error for AllocError {}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Global
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An [`AllocHook`] backed by the process-wide global allocator.
///
/// Hosted processes have no notion of paging classes, so the residency class
/// is only recorded in trace logs.
/// Zero-sized requests are answered with an aligned dangling pointer and never
/// reach the global allocator.
#[cfg(feature = "std")]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Global;

/********** impl AllocHook ************************************************************************/

#[cfg(feature = "std")]
unsafe impl AllocHook for Global {
    #[inline]
    fn allocate(request: AllocRequest) -> Result<NonNull<u8>, AllocError> {
        if request.layout.size() == 0 {
            return Ok(dangling(request.layout));
        }

        // this is safe because the layout has a non-zero size
        let ptr = unsafe { std::alloc::alloc(request.layout) };
        log::trace!(
            "global: allocated {} {:?} bytes ({}) at {:p}",
            request.layout.size(),
            request.form,
            request.residency,
            ptr
        );

        NonNull::new(ptr).ok_or(AllocError::Exhausted {
            size: request.layout.size(),
            residency: request.residency,
        })
    }

    #[inline]
    unsafe fn deallocate(ptr: NonNull<u8>, request: AllocRequest) {
        if request.layout.size() == 0 {
            return;
        }

        log::trace!(
            "global: de-allocating {} {:?} bytes ({}) at {:p}",
            request.layout.size(),
            request.form,
            request.residency,
            ptr
        );
        std::alloc::dealloc(ptr.as_ptr(), request.layout);
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// helper functions
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Allocates memory for `request` through the hook `A`, or returns a dangling
/// pointer if the request is zero-sized.
#[inline]
pub(crate) fn allocate<T, A: AllocHook>(request: AllocRequest) -> Result<NonNull<T>, AllocError> {
    if request.layout.size() == 0 {
        return Ok(NonNull::dangling());
    }

    A::allocate(request).map(NonNull::cast)
}

/// De-allocates memory for `request` through the hook `A` unless the request
/// is zero-sized.
///
/// # Safety
///
/// `ptr` must have been returned by [`allocate`] for the same `request`.
#[inline]
pub(crate) unsafe fn deallocate<T, A: AllocHook>(ptr: NonNull<T>, request: AllocRequest) {
    if request.layout.size() != 0 {
        A::deallocate(ptr.cast(), request);
    }
}

/// Returns a non-null pointer that is aligned for `layout` but must never be
/// dereferenced.
#[cfg(feature = "std")]
#[inline]
fn dangling(layout: Layout) -> NonNull<u8> {
    // alignments are never zero
    unsafe { NonNull::new_unchecked(layout.align() as *mut u8) }
}

/// Terminates the current context after a failed allocation.
#[cold]
#[inline(never)]
pub(crate) fn alloc_failed(err: AllocError) -> ! {
    log::error!("fatal allocation failure: {}", err);
    panic!("{}", err)
}

#[cfg(test)]
mod tests {
    use core::alloc::Layout;

    use matches::assert_matches;

    use super::{AllocError, AllocForm, AllocHook, AllocRequest, Residency};
    use crate::test::{CountingHook, FailingHook};

    #[test]
    fn residency_from_bool() {
        assert_eq!(Residency::from(true), Residency::Pageable);
        assert_eq!(Residency::from(false), Residency::Resident);
        assert!(Residency::Pageable.is_pageable());
        assert!(!Residency::Resident.is_pageable());
    }

    #[test]
    fn zero_sized_requests_bypass_hook() {
        let request = AllocRequest::scalar(Layout::new::<()>(), Residency::Resident);
        let ptr = super::allocate::<(), CountingHook>(request).unwrap();
        unsafe { super::deallocate::<(), CountingHook>(ptr, request) };

        let stats = CountingHook::stats();
        assert_eq!(stats.allocs, 0);
        assert_eq!(stats.deallocs, 0);
    }

    #[test]
    fn requests_reach_hook_unchanged() {
        let request = AllocRequest::array(Layout::array::<u32>(4).unwrap(), Residency::Pageable);
        let ptr = super::allocate::<u32, CountingHook>(request).unwrap();
        assert_eq!(CountingHook::live(), vec![request]);

        unsafe { super::deallocate::<u32, CountingHook>(ptr, request) };
        let stats = CountingHook::stats();
        assert_eq!(stats.array_allocs, 1);
        assert_eq!(stats.array_deallocs, 1);
        assert_eq!(stats.bytes, 16);
        assert!(CountingHook::live().is_empty());
    }

    #[test]
    fn failing_hook() {
        let request = AllocRequest::scalar(Layout::new::<u64>(), Residency::Resident);
        assert_matches!(
            FailingHook::allocate(request),
            Err(AllocError::Exhausted { size: 8, residency: Residency::Resident })
        );
        assert_eq!(request.form, AllocForm::Scalar);
    }

    #[cfg(feature = "std")]
    #[test]
    fn global_handles_zero_sized_requests() {
        use super::Global;

        let layout = Layout::from_size_align(0, 16).unwrap();
        let request = AllocRequest::array(layout, Residency::Pageable);
        let ptr = Global::allocate(request).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 16, 0);
        unsafe { Global::deallocate(ptr, request) };

        let request = AllocRequest::scalar(Layout::new::<u64>(), Residency::Resident);
        let ptr = Global::allocate(request).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 8, 0);
        unsafe { Global::deallocate(ptr, request) };
    }

    #[test]
    fn display() {
        let err = AllocError::Exhausted { size: 64, residency: Residency::Pageable };
        assert_eq!(err.to_string(), "failed to allocate 64 bytes of pageable memory");
        let err = AllocError::Undersized { requested: 2, required: 8 };
        assert_eq!(
            err.to_string(),
            "explicit size of 2 bytes is smaller than the required 8 bytes"
        );
    }
}
