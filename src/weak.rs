//! `WeakHandle`: observes a managed object without keeping it alive.

use crate::control_block::BlockHeader;
use crate::error::HandleError;
use crate::shared::{BlockPtr, SharedHandle};
use core::fmt;
use core::mem;
use core::ptr::NonNull;

/// A weak reference to an object managed by a control block.
///
/// Only ever touches the weak counter: it keeps the block allocated but
/// never the object, and never destroys anything but the block storage.
/// Use `lock` or `promote` to get a usable `SharedHandle`.
pub struct WeakHandle<T: ?Sized> {
    ptr: Option<NonNull<T>>,
    block: Option<NonNull<BlockHeader>>,
}

impl<T: ?Sized> WeakHandle<T> {
    /// A handle that observes nothing; always expired.
    pub const fn new() -> Self {
        Self {
            ptr: None,
            block: None,
        }
    }

    /// Stop observing and leave the handle empty. Frees the block if this
    /// was its last reference of any kind.
    pub fn reset(&mut self) {
        drop(mem::take(self));
    }

    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    /// Strong count of the observed block, 0 if empty.
    pub fn use_count(&self) -> usize {
        self.block.map_or(0, |b| unsafe { b.as_ref() }.strong())
    }

    /// Weak count of the observed block, 0 if empty.
    pub fn weak_count(&self) -> usize {
        self.block.map_or(0, |b| unsafe { b.as_ref() }.weak())
    }

    /// True iff the object is gone (or was never observed).
    #[inline]
    pub fn expired(&self) -> bool {
        self.use_count() == 0
    }

    /// A strong handle to the object, or `HandleError::Expired`.
    pub fn promote(&self) -> Result<SharedHandle<T>, HandleError> {
        match self.block {
            Some(b) if unsafe { b.as_ref() }.strong() > 0 => {
                unsafe { b.as_ref() }.add_strong();
                Ok(SharedHandle::from_parts(self.ptr, self.block))
            }
            _ => {
                tracing::debug!(block = ?self.block, "promotion of expired weak handle");
                Err(HandleError::Expired)
            }
        }
    }

    /// A strong handle to the object, or an empty one if it is gone. Never
    /// fails and has no side effects when expired.
    pub fn lock(&self) -> SharedHandle<T> {
        match self.block {
            Some(b) if unsafe { b.as_ref() }.strong() > 0 => {
                unsafe { b.as_ref() }.add_strong();
                SharedHandle::from_parts(self.ptr, self.block)
            }
            _ => SharedHandle::empty(),
        }
    }

    /// The observed address. It may dangle once the handle has expired.
    pub fn as_ptr(&self) -> Option<NonNull<T>> {
        self.ptr
    }

    pub fn block_ptr(&self) -> Option<BlockPtr> {
        self.block.map(BlockPtr)
    }
}

impl<T: ?Sized> From<&SharedHandle<T>> for WeakHandle<T> {
    fn from(shared: &SharedHandle<T>) -> Self {
        if let Some(b) = shared.block {
            unsafe { b.as_ref() }.add_weak();
        }
        Self {
            ptr: shared.ptr,
            block: shared.block,
        }
    }
}

/// Trade a strong reference for a weak one. If it was the last strong
/// reference the object is destroyed and the returned handle is expired.
impl<T: ?Sized> From<SharedHandle<T>> for WeakHandle<T> {
    fn from(shared: SharedHandle<T>) -> Self {
        let weak = Self::from(&shared);
        drop(shared);
        weak
    }
}

impl<T: ?Sized> Clone for WeakHandle<T> {
    fn clone(&self) -> Self {
        if let Some(b) = self.block {
            unsafe { b.as_ref() }.add_weak();
        }
        Self {
            ptr: self.ptr,
            block: self.block,
        }
    }

    fn clone_from(&mut self, source: &Self) {
        if self.block == source.block && self.ptr == source.ptr {
            return;
        }
        *self = source.clone();
    }
}

impl<T: ?Sized> Drop for WeakHandle<T> {
    fn drop(&mut self) {
        if let Some(b) = self.block.take() {
            // SAFETY: this handle owns one weak reference on `b`.
            unsafe { BlockHeader::release_weak(b) };
        }
    }
}

impl<T: ?Sized> Default for WeakHandle<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for WeakHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(Weak)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::make_shared;

    #[test]
    fn empty_weak_is_expired() {
        let w: WeakHandle<u8> = WeakHandle::new();
        assert!(w.expired());
        assert_eq!(w.use_count(), 0);
        assert!(w.lock().is_empty());
        assert_eq!(w.promote().unwrap_err(), HandleError::Expired);
    }

    #[test]
    fn clone_and_reset_track_weak_count() {
        let s = make_shared(1u8);
        let mut w1 = s.downgrade();
        let w2 = w1.clone();
        assert_eq!(s.weak_count(), 2);
        w1.reset();
        assert_eq!(s.weak_count(), 1);
        assert!(w1.expired());
        drop(w2);
        assert_eq!(s.weak_count(), 0);
    }

    #[test]
    fn from_owned_shared_gives_up_strong() {
        let s = make_shared(String::from("kept"));
        let keep = s.clone();
        let w = WeakHandle::from(s);
        assert_eq!((keep.use_count(), keep.weak_count()), (1, 1));
        assert_eq!(w.lock().as_str(), "kept");

        drop(keep);
        assert!(w.expired());
        assert_eq!(w.weak_count(), 1);

        let last = WeakHandle::from(make_shared(3u8));
        assert!(last.expired());
        assert!(last.lock().is_empty());
    }

    #[test]
    fn debug_is_opaque() {
        let s = make_shared(1u8);
        assert_eq!(format!("{:?}", s.downgrade()), "(Weak)");
    }

    #[test]
    fn clone_from_same_block_is_noop() {
        let s = make_shared(1u8);
        let w1 = s.downgrade();
        let mut w2 = s.downgrade();
        w2.clone_from(&w1);
        assert_eq!(s.weak_count(), 2);
    }

    #[test]
    fn swap_exchanges_without_counting() {
        let a = make_shared(1u8);
        let b = make_shared(2u8);
        let mut wa = a.downgrade();
        let mut wb = b.downgrade();
        wa.swap(&mut wb);
        assert_eq!(*wa.lock(), 2);
        assert_eq!(*wb.lock(), 1);
        assert_eq!((a.weak_count(), b.weak_count()), (1, 1));
    }
}
