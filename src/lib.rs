//! Residency-aware ownership and synchronization primitives for code that
//! manages memory and mutual exclusion manually.
//!
//! All memory is obtained through a caller-supplied [`AllocHook`], and every
//! allocation carries a [`Residency`] class telling the hook whether the memory
//! may be paged out or must stay resident.
//! The crate provides:
//!
//! - [`UniquePtr`]: an exclusively owned value, array or value with trailing
//!   bytes
//! - [`SharedPtr`]: an atomically reference counted handle to a detached
//!   [`SharedPtrState`] control block
//! - [`Atomic`]: a non-owning pointer cell with atomic load and store
//! - the [`Lock`] contract, the counting [`SpinLock`], the waiting
//!   [`ExclusiveSpinLock`] and the [`ScopedLock`] guard
//!
//! # Examples
//!
//! ```
//! use resident::{Residency, ScopedLock, SharedPtr, SpinLock};
//!
//! let lock = SpinLock::new();
//! let shared: SharedPtr<u64> = SharedPtr::from_value(42, Residency::Resident);
//! let copy = shared.clone();
//!
//! {
//!     let _guard = ScopedLock::new(&lock);
//!     assert_eq!(*copy, 42);
//!     assert_eq!(shared.ref_count(), 2);
//! }
//!
//! drop(copy);
//! assert_eq!(shared.ref_count(), 1);
//! assert_eq!(lock.ref_count(), 0);
//! ```
//!
//! # Features
//!
//! The `std` feature is enabled by default and provides the [`Global`] hook,
//! which is used as default hook for the [`UniquePtr`] and [`SharedPtr`] type
//! aliases.
//! Without it the crate is `no_std` and the hook has to be named explicitly.

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![warn(missing_docs)]

use cfg_if::cfg_if;

mod atomic;
mod hook;
mod lock;
mod shared;
mod unique;


pub use crate::atomic::{Atomic, LostUpdate};
pub use crate::hook::{AllocError, AllocForm, AllocHook, AllocRequest, Residency};
pub use crate::lock::{ExclusiveSpinLock, Lock, ScopedLock, SpinLock};
pub use crate::unique::Extent;

cfg_if! {
    if #[cfg(feature = "std")] {
        pub use crate::hook::Global;

        /// An exclusively owned value allocated through the hook `A`, which
        /// defaults to [`Global`].
        pub type UniquePtr<T, A = Global> = crate::unique::UniquePtr<T, A>;
        /// A reference counted value allocated through the hook `A`, which
        /// defaults to [`Global`].
        pub type SharedPtr<T, A = Global> = crate::shared::SharedPtr<T, A>;
        /// The control block of a [`SharedPtr`].
        pub type SharedPtrState<T, A = Global> = crate::shared::SharedPtrState<T, A>;
    } else {
        pub use crate::unique::UniquePtr;
        pub use crate::shared::{SharedPtr, SharedPtrState};
    }
}
