//! `UniqueHandle`: single owner, no counters.
//!
//! The destroy action lives inline next to the pointer; with a zero-sized
//! deleter the handle is exactly one pointer wide.

use crate::deleter::{DefaultDelete, Deleter};
use core::fmt;
use core::marker::PhantomData;
use core::mem::{self, ManuallyDrop};
use core::ops::{Deref, DerefMut};
use core::ptr::{self, NonNull};

/// Exclusive ownership of a separately allocated object.
pub struct UniqueHandle<T: ?Sized, D: Deleter<T> = DefaultDelete> {
    ptr: Option<NonNull<T>>,
    deleter: D,
    _owns: PhantomData<T>,
}

impl<T> UniqueHandle<T> {
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }
}

impl<T: ?Sized> UniqueHandle<T> {
    pub const fn empty() -> Self {
        Self {
            ptr: None,
            deleter: DefaultDelete,
            _owns: PhantomData,
        }
    }

    pub fn from_box(value: Box<T>) -> Self {
        Self {
            ptr: Some(NonNull::from(Box::leak(value))),
            deleter: DefaultDelete,
            _owns: PhantomData,
        }
    }

    /// # Safety
    /// A non-null `ptr` must come from `Box::into_raw` and be owned by
    /// nothing else.
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        Self::with_deleter(ptr, DefaultDelete)
    }
}

impl<T: ?Sized, D: Deleter<T>> UniqueHandle<T, D> {
    /// # Safety
    /// A non-null `ptr` must be valid for `deleter` and owned by nothing
    /// else.
    pub unsafe fn with_deleter(ptr: *mut T, deleter: D) -> Self {
        Self {
            ptr: NonNull::new(ptr),
            deleter,
            _owns: PhantomData,
        }
    }

    /// Give up ownership without destroying the object.
    pub fn release(&mut self) -> Option<NonNull<T>> {
        self.ptr.take()
    }

    /// Destroy the owned object, if any, and leave the handle empty.
    pub fn reset(&mut self) {
        if let Some(p) = self.ptr.take() {
            // SAFETY: the handle owned `p` exclusively.
            unsafe { self.deleter.delete(p) };
        }
    }

    /// Take ownership of `ptr`, destroying the previously owned object.
    /// No-op if `ptr` is already the owned pointer.
    ///
    /// # Safety
    /// Same as `with_deleter`, for this handle's deleter.
    pub unsafe fn reset_raw(&mut self, ptr: *mut T) {
        let new = NonNull::new(ptr);
        if new == self.ptr {
            return;
        }
        if let Some(old) = mem::replace(&mut self.ptr, new) {
            self.deleter.delete(old);
        }
    }

    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    #[inline]
    pub fn get(&self) -> Option<&T> {
        self.ptr.map(|p| unsafe { &*p.as_ptr() })
    }

    #[inline]
    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.ptr.map(|p| unsafe { &mut *p.as_ptr() })
    }

    #[inline]
    pub fn as_ptr(&self) -> Option<NonNull<T>> {
        self.ptr
    }

    pub fn deleter(&self) -> &D {
        &self.deleter
    }

    pub fn deleter_mut(&mut self) -> &mut D {
        &mut self.deleter
    }

    #[inline]
    pub fn is_some(&self) -> bool {
        self.ptr.is_some()
    }

    /// Split into the owned pointer and the deleter, destroying nothing.
    pub fn into_parts(self) -> (Option<NonNull<T>>, D) {
        let this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so the deleter is moved out once.
        let deleter = unsafe { ptr::read(&this.deleter) };
        (this.ptr, deleter)
    }
}

impl<T: ?Sized, D: Deleter<T>> Drop for UniqueHandle<T, D> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized> Default for UniqueHandle<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: ?Sized> From<Box<T>> for UniqueHandle<T> {
    fn from(value: Box<T>) -> Self {
        Self::from_box(value)
    }
}

impl<T: ?Sized, D: Deleter<T>> Deref for UniqueHandle<T, D> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.get() {
            Some(v) => v,
            None => panic!("dereferenced an empty UniqueHandle"),
        }
    }
}

impl<T: ?Sized, D: Deleter<T>> DerefMut for UniqueHandle<T, D> {
    fn deref_mut(&mut self) -> &mut T {
        match self.get_mut() {
            Some(v) => v,
            None => panic!("dereferenced an empty UniqueHandle"),
        }
    }
}

impl<T: ?Sized + fmt::Debug, D: Deleter<T>> fmt::Debug for UniqueHandle<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(v) => f.debug_tuple("UniqueHandle").field(&v).finish(),
            None => f.write_str("UniqueHandle(empty)"),
        }
    }
}
