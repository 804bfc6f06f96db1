//! `SharedHandle`: shared ownership through a control block.

use crate::control_block::{BlockHeader, EmplacedBlock, PointerBlock};
use crate::deleter::{DefaultDelete, Deleter};
use crate::error::HandleError;
use crate::self_ref::SharedFromThis;
use crate::unique::UniqueHandle;
use crate::weak::WeakHandle;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;
use core::mem::{self, ManuallyDrop};
use core::ops::Deref;
use core::ptr::{self, NonNull};

/// Opaque address of a control block, as exposed by `block_ptr`.
///
/// Two handles share ownership of the same object iff their `BlockPtr`s are
/// equal.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct BlockPtr(pub(crate) NonNull<BlockHeader>);

impl BlockPtr {
    /// Current strong count of the block.
    ///
    /// # Safety
    /// The block must still be allocated, i.e. some handle to it is alive.
    pub unsafe fn strong_count(self) -> usize {
        self.0.as_ref().strong()
    }

    /// Current weak count of the block.
    ///
    /// # Safety
    /// Same as `strong_count`.
    pub unsafe fn weak_count(self) -> usize {
        self.0.as_ref().weak()
    }
}

/// A strong reference to an object managed by a control block.
///
/// Cloning adds a strong reference; dropping or `reset` removes one. The
/// object is destroyed when the last strong reference goes away, and the
/// block is freed once no weak handle observes it either.
///
/// The exposed pointer usually addresses the block's own object, but an
/// aliasing handle (`alias`, `project`) may expose any sub-object while
/// still keeping the whole aggregate alive.
///
/// Single-threaded: `!Send` and `!Sync`.
pub struct SharedHandle<T: ?Sized> {
    pub(crate) ptr: Option<NonNull<T>>,
    pub(crate) block: Option<NonNull<BlockHeader>>,
    _owns: PhantomData<T>,
}

/// Construct `value` inside a freshly allocated control block. Exactly one
/// heap allocation backs the object for its whole lifetime.
pub fn make_shared<T>(value: T) -> SharedHandle<T> {
    make_shared_with(move || value)
}

/// Like `make_shared`, but builds the object from `init` after the block has
/// been allocated.
pub fn make_shared_with<T, F>(init: F) -> SharedHandle<T>
where
    F: FnOnce() -> T,
{
    let (block, value) = EmplacedBlock::allocate_with(init);
    SharedHandle::from_parts(Some(value), Some(block))
}

/// `make_shared` for objects that can hand out handles to themselves; the
/// self back-reference is installed before the handle is returned.
pub fn make_shared_linked<T: SharedFromThis>(value: T) -> SharedHandle<T> {
    let h = make_shared(value);
    h.link_self();
    h
}

impl<T> SharedHandle<T> {
    /// Same as `make_shared`.
    pub fn new(value: T) -> Self {
        make_shared(value)
    }
}

impl<T: ?Sized> SharedHandle<T> {
    /// A handle that owns nothing.
    pub const fn empty() -> Self {
        Self {
            ptr: None,
            block: None,
            _owns: PhantomData,
        }
    }

    /// Adopt a pointer/block pair without touching the counters.
    #[inline]
    pub(crate) fn from_parts(ptr: Option<NonNull<T>>, block: Option<NonNull<BlockHeader>>) -> Self {
        Self {
            ptr,
            block,
            _owns: PhantomData,
        }
    }

    /// Take ownership of a separately allocated object. Allocates a
    /// pointer block; `use_count() == 1`.
    pub fn from_box(value: Box<T>) -> Self {
        let ptr = NonNull::from(Box::leak(value));
        // SAFETY: the pointer came from a Box, which DefaultDelete releases.
        let block = unsafe { PointerBlock::allocate(ptr, DefaultDelete) };
        Self::from_parts(Some(ptr), Some(block))
    }

    /// Take ownership of a raw pointer. A null pointer yields an empty
    /// handle and allocates nothing.
    ///
    /// # Safety
    /// A non-null `ptr` must come from `Box::into_raw` and be owned by
    /// nothing else.
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        Self::with_deleter(ptr, DefaultDelete)
    }

    /// Take ownership of a raw pointer destroyed by `deleter` once the last
    /// strong reference is gone. A null pointer yields an empty handle.
    ///
    /// # Safety
    /// A non-null `ptr` must be valid for `deleter` and owned by nothing
    /// else.
    pub unsafe fn with_deleter<D>(ptr: *mut T, deleter: D) -> Self
    where
        D: Deleter<T> + 'static,
    {
        match NonNull::new(ptr) {
            Some(p) => Self::from_parts(Some(p), Some(PointerBlock::allocate(p, deleter))),
            None => Self::empty(),
        }
    }

    /// A handle that shares `other`'s ownership but exposes `ptr`.
    ///
    /// The block stays alive (and its object undestroyed) for as long as the
    /// alias lives, whatever happens to `other`.
    ///
    /// # Safety
    /// `ptr` must stay valid for as long as the object owned by `other`'s
    /// block is alive (typically it points inside that object). If `other`
    /// is empty the returned handle owns nothing and `ptr` must outlive it.
    pub unsafe fn alias<U: ?Sized>(other: &SharedHandle<U>, ptr: *const T) -> Self {
        if let Some(b) = other.block {
            b.as_ref().add_strong();
        }
        Self::from_parts(NonNull::new(ptr as *mut T), other.block)
    }

    /// Safe aliasing: a handle to a part of this object that keeps the
    /// whole object alive. An empty handle projects to an empty handle.
    pub fn project<U, F>(&self, f: F) -> SharedHandle<U>
    where
        U: ?Sized,
        F: FnOnce(&T) -> &U,
    {
        match self.get() {
            // SAFETY: `f` can only return a reference derived from the
            // object (or a 'static one), which lives while the block does.
            Some(v) => unsafe { SharedHandle::alias(self, f(v) as *const U) },
            None => SharedHandle::empty(),
        }
    }

    /// Give up this handle without releasing its strong reference.
    pub fn into_raw_parts(self) -> (Option<NonNull<T>>, Option<BlockPtr>) {
        let this = ManuallyDrop::new(self);
        (this.ptr, this.block.map(BlockPtr))
    }

    /// Rebuild a handle from `into_raw_parts`.
    ///
    /// # Safety
    /// The caller transfers exactly one strong reference on `block` (if
    /// any) to the returned handle, and `ptr` must satisfy the same
    /// contract as for `alias`.
    pub unsafe fn from_raw_parts(ptr: Option<NonNull<T>>, block: Option<BlockPtr>) -> Self {
        Self::from_parts(ptr, block.map(|b| b.0))
    }

    /// Release this handle's strong reference and leave it empty.
    ///
    /// On the last strong reference the object is destroyed; if no weak
    /// handle remains the block is freed as well.
    pub fn reset(&mut self) {
        drop(mem::take(self));
    }

    /// Release the current reference, then take ownership of `value`.
    pub fn reset_box(&mut self, value: Box<T>) {
        self.reset();
        *self = Self::from_box(value);
    }

    /// Release the current reference, then take ownership of `ptr`. No-op
    /// if `ptr` is the pointer already held.
    ///
    /// # Safety
    /// Same as `from_raw`.
    pub unsafe fn reset_raw(&mut self, ptr: *mut T) {
        if !ptr.is_null() && ptr::addr_eq(ptr as *const T, self.addr()) {
            return;
        }
        self.reset();
        *self = Self::from_raw(ptr);
    }

    /// Release the current reference and adopt `(ptr, block)` directly.
    ///
    /// # Safety
    /// Same as `from_raw_parts`.
    pub unsafe fn reset_parts(&mut self, ptr: *const T, block: BlockPtr) {
        // Adopt first: if `block` is the one already held, the count never
        // touches zero in between.
        let old = mem::replace(
            self,
            Self::from_parts(NonNull::new(ptr as *mut T), Some(block.0)),
        );
        drop(old);
    }

    /// Exchange contents with `other`. Counters are untouched.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    #[inline]
    pub fn get(&self) -> Option<&T> {
        // SAFETY: a held strong reference keeps the object alive; aliases
        // carry the same guarantee by contract.
        self.ptr.map(|p| unsafe { &*p.as_ptr() })
    }

    /// Mutable access when this is the only handle of any kind to the
    /// block and it exposes the block's own object.
    ///
    /// Aliasing handles get `None`: the exposed memory need not be owned by
    /// the block at all.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        let (p, block) = (self.ptr?, self.block?);
        let header = unsafe { block.as_ref() };
        if header.strong() != 1 || header.weak() != 0 {
            return None;
        }
        // SAFETY: the block is live while this handle holds its strong
        // reference.
        let object = unsafe { BlockHeader::object(block) };
        if !ptr::addr_eq(p.as_ptr() as *const T, object) {
            return None;
        }
        // SAFETY: sole handle, and `p` is the block's own object.
        Some(unsafe { &mut *p.as_ptr() })
    }

    #[inline]
    pub fn as_ptr(&self) -> Option<NonNull<T>> {
        self.ptr
    }

    #[inline]
    fn addr(&self) -> *const () {
        self.ptr.map_or(ptr::null(), |p| p.as_ptr().cast::<()>())
    }

    /// True if the handle exposes an object.
    #[inline]
    pub fn is_some(&self) -> bool {
        self.ptr.is_some()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ptr.is_none()
    }

    /// Current strong count of the block, 0 if empty.
    pub fn use_count(&self) -> usize {
        self.block.map_or(0, |b| unsafe { b.as_ref() }.strong())
    }

    /// Current weak count of the block, 0 if empty.
    pub fn weak_count(&self) -> usize {
        self.block.map_or(0, |b| unsafe { b.as_ref() }.weak())
    }

    pub fn block_ptr(&self) -> Option<BlockPtr> {
        self.block.map(BlockPtr)
    }

    /// A weak observer of this handle's object.
    pub fn downgrade(&self) -> WeakHandle<T> {
        WeakHandle::from(self)
    }
}

impl<T: SharedFromThis> SharedHandle<T> {
    /// `make_shared_linked` as an associated function.
    pub fn new_linked(value: T) -> Self {
        make_shared_linked(value)
    }

    /// `from_box` that also installs the object's self back-reference.
    pub fn from_box_linked(value: Box<T>) -> Self {
        let h = Self::from_box(value);
        h.link_self();
        h
    }

    fn link_self(&self) {
        if let Some(v) = self.get() {
            if v.self_ref().link(self.downgrade()) {
                tracing::trace!(object = ?self.ptr, "installed self back-reference");
            }
        }
    }
}

impl<T: ?Sized> TryFrom<&WeakHandle<T>> for SharedHandle<T> {
    type Error = HandleError;

    fn try_from(weak: &WeakHandle<T>) -> Result<Self, Self::Error> {
        weak.promote()
    }
}

impl<T: ?Sized> Clone for SharedHandle<T> {
    fn clone(&self) -> Self {
        if let Some(b) = self.block {
            unsafe { b.as_ref() }.add_strong();
        }
        Self::from_parts(self.ptr, self.block)
    }

    /// Assigning a handle that already refers to the same object is a
    /// no-op.
    fn clone_from(&mut self, source: &Self) {
        if self.block == source.block && self.addr() == source.addr() {
            return;
        }
        *self = source.clone();
    }
}

impl<T: ?Sized> Drop for SharedHandle<T> {
    fn drop(&mut self) {
        if let Some(b) = self.block.take() {
            // SAFETY: this handle owns one strong reference on `b`.
            unsafe { BlockHeader::release_strong(b) };
        }
    }
}

impl<T: ?Sized> Default for SharedHandle<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: ?Sized> Deref for SharedHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.get() {
            Some(v) => v,
            None => panic!("dereferenced an empty SharedHandle"),
        }
    }
}

impl<T: ?Sized> From<Box<T>> for SharedHandle<T> {
    fn from(value: Box<T>) -> Self {
        Self::from_box(value)
    }
}

impl<T: ?Sized, D> From<UniqueHandle<T, D>> for SharedHandle<T>
where
    D: Deleter<T> + 'static,
{
    fn from(unique: UniqueHandle<T, D>) -> Self {
        let (ptr, deleter) = unique.into_parts();
        match ptr {
            // SAFETY: the unique handle owned `p` and its deleter.
            Some(p) => Self::from_parts(Some(p), Some(unsafe { PointerBlock::allocate(p, deleter) })),
            None => Self::empty(),
        }
    }
}

// Identity is the exposed address, like comparing raw pointers.
impl<T: ?Sized, U: ?Sized> PartialEq<SharedHandle<U>> for SharedHandle<T> {
    fn eq(&self, other: &SharedHandle<U>) -> bool {
        self.addr() == other.addr()
    }
}

impl<T: ?Sized> Eq for SharedHandle<T> {}

impl<T: ?Sized> Hash for SharedHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.addr() as usize).hash(state);
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SharedHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(v) => f.debug_tuple("SharedHandle").field(&v).finish(),
            None => f.write_str("SharedHandle(empty)"),
        }
    }
}

impl<T: ?Sized> fmt::Pointer for SharedHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.addr(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn empty_handle_reports_zero() {
        let s: SharedHandle<u32> = SharedHandle::empty();
        assert!(s.is_empty());
        assert_eq!(s.use_count(), 0);
        assert_eq!(s.weak_count(), 0);
        assert!(s.get().is_none());
        assert!(s.block_ptr().is_none());
    }

    #[test]
    fn from_raw_null_is_empty() {
        let s: SharedHandle<u32> = unsafe { SharedHandle::from_raw(ptr::null_mut()) };
        assert!(s.is_empty());
        assert_eq!(s.use_count(), 0);
    }

    #[test]
    fn clone_from_same_object_is_noop() {
        let a = make_shared(5);
        let mut b = a.clone();
        assert_eq!(a.use_count(), 2);
        b.clone_from(&a);
        assert_eq!(a.use_count(), 2);
        assert_eq!(a, b);
    }

    #[test]
    fn clone_from_other_object_releases_old() {
        let drops = Rc::new(Cell::new(0));
        struct D(Rc<Cell<u32>>);
        impl Drop for D {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }
        let a = make_shared(D(drops.clone()));
        let mut b = make_shared(D(drops.clone()));
        b.clone_from(&a);
        assert_eq!(drops.get(), 1);
        assert_eq!(a.use_count(), 2);
    }

    #[test]
    fn reset_raw_same_pointer_is_noop() {
        let raw = Box::into_raw(Box::new(3u8));
        let mut s = unsafe { SharedHandle::from_raw(raw) };
        unsafe { s.reset_raw(raw) };
        assert_eq!(s.use_count(), 1);
        assert_eq!(*s, 3);
    }

    #[test]
    fn raw_parts_round_trip_keeps_count() {
        let s = make_shared(String::from("x"));
        let keep = s.clone();
        let (p, b) = s.into_raw_parts();
        assert_eq!(keep.use_count(), 2);
        let back = unsafe { SharedHandle::from_raw_parts(p, b) };
        assert_eq!(back, keep);
        drop(back);
        assert_eq!(keep.use_count(), 1);
    }

    #[test]
    fn reset_parts_with_same_block_keeps_object() {
        let mut s = make_shared(7u32);
        let extra = s.clone();
        let (p, b) = extra.into_raw_parts();
        unsafe { s.reset_parts(p.unwrap().as_ptr(), b.unwrap()) };
        assert_eq!(s.use_count(), 1);
        assert_eq!(*s, 7);
    }

    // The old block is released (object destroyed, storage kept for its
    // weak handle) and the new one adopted without an extra increment.
    #[test]
    fn reset_parts_switches_blocks() {
        let drops = Rc::new(Cell::new(0));
        struct D(u32, Rc<Cell<u32>>);
        impl Drop for D {
            fn drop(&mut self) {
                self.1.set(self.1.get() + 1);
            }
        }
        let mut s = make_shared(D(1, drops.clone()));
        let old = s.downgrade();
        let other = make_shared(D(2, drops.clone()));
        let watch = other.downgrade();
        let (p, b) = other.into_raw_parts();
        unsafe { s.reset_parts(p.unwrap().as_ptr(), b.unwrap()) };

        assert_eq!(drops.get(), 1);
        assert!(old.expired());
        assert_eq!(old.weak_count(), 1);
        assert_eq!(s.use_count(), 1);
        assert_eq!(s.block_ptr(), watch.block_ptr());
        assert_eq!(s.0, 2);
        drop(s);
        assert_eq!(drops.get(), 2);
        assert!(watch.expired());
    }

    // Projections may expose memory the block does not own; they never
    // hand out `&mut`.
    #[test]
    fn get_mut_refuses_projections() {
        static OUTSIDE: u32 = 5;
        let s = make_shared(0u32);
        let mut p = s.project(|_| &OUTSIDE);
        drop(s);
        assert_eq!(p.use_count(), 1);
        assert!(p.get_mut().is_none());
        assert_eq!(*p, 5);

        let shared = Rc::new(10u32);
        let s = make_shared(shared.clone());
        let mut inner = s.project(|r| &**r);
        drop(s);
        assert!(inner.get_mut().is_none());
        assert_eq!(*shared, 10);

        let mut whole = make_shared(vec![1u8]);
        whole.get_mut().unwrap().push(2);
        assert_eq!(whole.len(), 2);
    }

    #[test]
    fn get_mut_requires_sole_ownership() {
        let mut s = make_shared(1);
        *s.get_mut().unwrap() += 1;
        let w = s.downgrade();
        assert!(s.get_mut().is_none());
        drop(w);
        let c = s.clone();
        assert!(s.get_mut().is_none());
        drop(c);
        assert_eq!(*s, 2);
    }

    #[test]
    fn deref_empty_panics() {
        let s: SharedHandle<u32> = SharedHandle::empty();
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| *s));
        assert!(res.is_err());
    }

    #[test]
    fn unsized_from_box() {
        let s: SharedHandle<[u32]> = SharedHandle::from_box(vec![1, 2, 3].into_boxed_slice());
        assert_eq!(s.len(), 3);
        let d: SharedHandle<dyn fmt::Debug> = SharedHandle::from_box(Box::new(5u8));
        assert_eq!(format!("{:?}", d.get().unwrap()), "5");
    }
}
