//! Destroy actions for separately allocated objects.
//!
//! A deleter is stored inline next to the pointer it destroys. Zero-sized
//! deleters (`DefaultDelete`, non-capturing `FnDeleter`s) take no space, so
//! a `UniqueHandle<T>` is exactly one pointer wide.

use core::fmt;
use core::ptr::NonNull;

/// Action that destroys an object and releases its storage.
pub trait Deleter<T: ?Sized> {
    /// Destroy the object at `ptr`.
    ///
    /// # Safety
    /// `ptr` must point to a live object that this deleter knows how to
    /// release, and nothing may use it afterwards.
    unsafe fn delete(&mut self, ptr: NonNull<T>);
}

/// Drops the `Box<T>` the pointer was obtained from.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DefaultDelete;

impl<T: ?Sized> Deleter<T> for DefaultDelete {
    #[inline]
    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        drop(Box::from_raw(ptr.as_ptr()));
    }
}

/// Adapts a closure into a deleter.
#[derive(Clone, Default)]
pub struct FnDeleter<F>(pub F);

impl<T: ?Sized, F> Deleter<T> for FnDeleter<F>
where
    F: FnMut(NonNull<T>),
{
    #[inline]
    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        (self.0)(ptr)
    }
}

impl<F> fmt::Debug for FnDeleter<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnDeleter")
    }
}
