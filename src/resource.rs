//! Scoped ownership of native entry-point objects.
//!
//! Every opaque object handed out by the native layer is paired with a
//! release entry point. `Owned<T>` ties the two together: the pointer is
//! released exactly once, when the wrapper drops. Validity for the duration
//! of a call falls out of the borrow rules, so no separate pinning step
//! exists.

use std::ptr::NonNull;

use crate::error::{HeifError, Result};

/// Implemented by opaque native types that have a release entry point.
pub(crate) unsafe trait NativeResource {
    /// Releases the object. Must tolerate null.
    unsafe fn release(ptr: *mut Self);
}

/// Owning wrapper around a pointer returned by a native alloc entry point.
#[derive(Debug)]
pub(crate) struct Owned<T: NativeResource> {
    ptr: NonNull<T>,
}

impl<T: NativeResource> Owned<T> {
    /// Takes ownership of `ptr`. A null pointer means the native layer could
    /// not allocate the object; `what` names it in the resulting error.
    pub(crate) fn acquire(ptr: *mut T, what: &'static str) -> Result<Self> {
        match NonNull::new(ptr) {
            Some(ptr) => Ok(Owned { ptr }),
            None => Err(HeifError::Allocation(what)),
        }
    }

    pub(crate) fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }
}

impl<T: NativeResource> Drop for Owned<T> {
    fn drop(&mut self) {
        unsafe { T::release(self.ptr.as_ptr()) };
    }
}
