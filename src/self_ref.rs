//! Objects that can hand out handles to themselves.
//!
//! The object embeds a `SelfRef<Self>`, which holds a weak back-reference
//! installed by `make_shared_linked` / `SharedHandle::new_linked` /
//! `SharedHandle::from_box_linked` when the first control block is
//! associated with the object. The back-reference is never upgraded
//! except on request through `SharedFromThis`.

use crate::error::HandleError;
use crate::shared::SharedHandle;
use crate::weak::WeakHandle;
use core::cell::OnceCell;
use core::fmt;

/// Slot for an object's weak back-reference to itself.
pub struct SelfRef<T> {
    weak: OnceCell<WeakHandle<T>>,
}

impl<T> SelfRef<T> {
    pub const fn new() -> Self {
        Self {
            weak: OnceCell::new(),
        }
    }

    /// Install the back-reference. Only the first link sticks; returns
    /// whether this call installed it.
    pub(crate) fn link(&self, weak: WeakHandle<T>) -> bool {
        self.weak.set(weak).is_ok()
    }

    /// True once the object is under management of a linked handle.
    pub fn is_linked(&self) -> bool {
        self.weak.get().is_some()
    }
}

impl<T> Default for SelfRef<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SelfRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelfRef")
            .field("linked", &self.is_linked())
            .finish()
    }
}

/// Access to handles of `self` for objects managed through a linked
/// constructor.
pub trait SharedFromThis: Sized {
    fn self_ref(&self) -> &SelfRef<Self>;

    /// A weak handle to `self`; empty (expired) before linking.
    fn weak_from_this(&self) -> WeakHandle<Self> {
        self.self_ref().weak.get().cloned().unwrap_or_default()
    }

    /// A strong handle to `self`, or `Expired` if the object is not (or no
    /// longer) owned by a linked `SharedHandle`.
    fn try_shared_from_this(&self) -> Result<SharedHandle<Self>, HandleError> {
        match self.self_ref().weak.get() {
            Some(w) => w.promote(),
            None => Err(HandleError::Expired),
        }
    }

    /// A strong handle to `self`.
    ///
    /// # Panics
    /// If the object was not created by a linked constructor, or is being
    /// destroyed.
    fn shared_from_this(&self) -> SharedHandle<Self> {
        match self.try_shared_from_this() {
            Ok(h) => h,
            Err(e) => {
                tracing::error!(linked = self.self_ref().is_linked(), "shared_from_this: {e}");
                panic!("shared_from_this on an object without a live SharedHandle: {e}");
            }
        }
    }
}
