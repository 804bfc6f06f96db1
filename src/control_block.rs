//! Control blocks: the shared bookkeeping behind every `SharedHandle` and
//! `WeakHandle`.
//!
//! Every block starts with a `BlockHeader` (`#[repr(C)]`, first field), so a
//! `NonNull<BlockHeader>` addresses the whole block. The header carries the
//! strong/weak counters and a static vtable:
//! - `on_zero_strong`: destroy the managed object, keep the storage.
//! - `release`: free the block's storage.
//! - `object`: address of the managed object while it is alive.
//!
//! The vtable is the only dynamic dispatch in the crate; handles never
//! learn which allocation strategy produced their block.
//!
//! Two-phase destruction:
//! - the object is destroyed exactly once, when `strong` goes 1 -> 0;
//! - the storage is freed exactly once, when `strong + weak` reaches 0,
//!   which may be later than the object if weak handles remain.

use crate::count::Counter;
use crate::deleter::Deleter;
use crate::reentrancy::HookGuard;
use core::cell::{Cell, UnsafeCell};
use core::mem::MaybeUninit;
use core::ptr::{self, NonNull};

/// Type-erased operations of one concrete block type.
pub struct BlockVTable {
    on_zero_strong: unsafe fn(NonNull<BlockHeader>),
    release: unsafe fn(NonNull<BlockHeader>),
    object: unsafe fn(NonNull<BlockHeader>) -> *const (),
}

/// Counters shared by all handles of one managed object.
#[repr(C)]
pub struct BlockHeader {
    strong: Counter,
    weak: Counter,
    vtable: &'static BlockVTable,
    hook: HookGuard,
}

impl BlockHeader {
    /// A fresh header: one strong owner, no observers.
    fn new(vtable: &'static BlockVTable) -> Self {
        Self {
            strong: Counter::new(1),
            weak: Counter::new(0),
            vtable,
            hook: HookGuard::new(),
        }
    }

    #[inline]
    pub fn strong(&self) -> usize {
        self.strong.get()
    }

    #[inline]
    pub fn weak(&self) -> usize {
        self.weak.get()
    }

    #[inline]
    pub fn add_strong(&self) {
        self.strong.inc();
    }

    #[inline]
    pub fn add_weak(&self) {
        self.weak.inc();
    }

    #[inline]
    fn unreferenced(&self) -> bool {
        self.strong.get() == 0 && self.weak.get() == 0
    }

    /// Drop one strong reference. Runs the zero-strong hook on the 1 -> 0
    /// transition. Returns true when the block itself may now be freed.
    ///
    /// # Safety
    /// `this` must come from one of the block constructors in this module,
    /// must not have been released, and the caller must own the strong
    /// reference being dropped.
    pub unsafe fn remove_strong(this: NonNull<Self>) -> bool {
        let header = this.as_ref();
        if header.strong.dec() == 0 {
            // The object's own Drop may release weak handles to this block
            // (a self back-reference, for instance). Pin the storage until
            // the hook has returned.
            header.weak.inc();
            {
                let _e = header.hook.enter();
                (header.vtable.on_zero_strong)(this);
            }
            header.weak.dec();
        }
        header.unreferenced()
    }

    /// Drop one weak reference. Returns true when the block itself may now
    /// be freed.
    pub fn remove_weak(&self) -> bool {
        self.weak.dec();
        self.unreferenced()
    }

    /// Free the block's storage.
    ///
    /// # Safety
    /// `strong + weak` must have reached zero and no handle may refer to
    /// the block anymore.
    pub unsafe fn dealloc(this: NonNull<Self>) {
        tracing::trace!(block = ?this, "releasing control block");
        let release = this.as_ref().vtable.release;
        release(this);
    }

    /// Address of the object this block manages; null once it has been
    /// destroyed. Aliasing handles may expose a different address.
    ///
    /// # Safety
    /// `this` must be live.
    #[inline]
    pub unsafe fn object(this: NonNull<Self>) -> *const () {
        (this.as_ref().vtable.object)(this)
    }

    /// `remove_strong` followed by `dealloc` when it reports zero.
    ///
    /// # Safety
    /// Same as `remove_strong`.
    #[inline]
    pub unsafe fn release_strong(this: NonNull<Self>) {
        if Self::remove_strong(this) {
            Self::dealloc(this);
        }
    }

    /// `remove_weak` followed by `dealloc` when it reports zero.
    ///
    /// # Safety
    /// `this` must be live and the caller must own the weak reference being
    /// dropped.
    #[inline]
    pub unsafe fn release_weak(this: NonNull<Self>) {
        if this.as_ref().remove_weak() {
            Self::dealloc(this);
        }
    }
}

/// A concrete block layout. Implementors are `#[repr(C)]` with a
/// `BlockHeader` as their first field and are allocated with `Box`.
pub trait ControlBlock: Sized {
    const VTABLE: BlockVTable = BlockVTable {
        on_zero_strong: erased_on_zero_strong::<Self>,
        release: erased_release::<Self>,
        object: erased_object::<Self>,
    };

    /// Destroy the managed object without freeing the block.
    ///
    /// # Safety
    /// Called once, by `BlockHeader::remove_strong`, with the block's
    /// original pointer.
    unsafe fn on_zero_strong(this: NonNull<Self>);

    /// Address of the managed object, null once destroyed.
    ///
    /// # Safety
    /// `this` must be live.
    unsafe fn object(this: NonNull<Self>) -> *const ();
}

unsafe fn erased_on_zero_strong<B: ControlBlock>(this: NonNull<BlockHeader>) {
    B::on_zero_strong(this.cast::<B>())
}

unsafe fn erased_release<B: ControlBlock>(this: NonNull<BlockHeader>) {
    drop(Box::from_raw(this.cast::<B>().as_ptr()));
}

unsafe fn erased_object<B: ControlBlock>(this: NonNull<BlockHeader>) -> *const () {
    B::object(this.cast::<B>())
}

/// Block for an object allocated separately; the block owns a pointer and
/// the deleter that destroys it.
#[repr(C)]
pub struct PointerBlock<T: ?Sized, D: Deleter<T>> {
    header: BlockHeader,
    ptr: Cell<Option<NonNull<T>>>,
    deleter: UnsafeCell<D>,
}

impl<T: ?Sized, D: Deleter<T>> PointerBlock<T, D> {
    /// Allocate a block taking ownership of `ptr`.
    ///
    /// # Safety
    /// `ptr` must be valid for `deleter` and owned by nothing else.
    pub unsafe fn allocate(ptr: NonNull<T>, deleter: D) -> NonNull<BlockHeader> {
        let block = Box::new(Self {
            header: BlockHeader::new(&Self::VTABLE),
            ptr: Cell::new(Some(ptr)),
            deleter: UnsafeCell::new(deleter),
        });
        NonNull::from(Box::leak(block)).cast()
    }

    /// The owned pointer; `None` once the object has been destroyed.
    ///
    /// # Safety
    /// `this` must be a live block allocated by `PointerBlock::<T, D>::allocate`.
    #[cfg(any(test, feature = "bench_internal"))]
    pub unsafe fn get(this: NonNull<BlockHeader>) -> Option<NonNull<T>> {
        this.cast::<Self>().as_ref().ptr.get()
    }
}

impl<T: ?Sized, D: Deleter<T>> ControlBlock for PointerBlock<T, D> {
    unsafe fn on_zero_strong(this: NonNull<Self>) {
        let block = this.as_ref();
        if let Some(p) = block.ptr.take() {
            (*block.deleter.get()).delete(p);
        }
    }

    unsafe fn object(this: NonNull<Self>) -> *const () {
        this.as_ref()
            .ptr
            .get()
            .map_or(ptr::null(), |p| p.cast::<()>().as_ptr() as *const ())
    }
}

/// Block whose storage embeds the managed object: one allocation for
/// both.
#[repr(C)]
pub struct EmplacedBlock<T> {
    header: BlockHeader,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> EmplacedBlock<T> {
    /// Allocate a block and construct the object inside it from `init`.
    /// Returns the block and the address of the embedded object.
    ///
    /// If `init` panics the storage is freed and nothing is constructed.
    pub fn allocate_with<F>(init: F) -> (NonNull<BlockHeader>, NonNull<T>)
    where
        F: FnOnce() -> T,
    {
        let mut block = Box::new(Self {
            header: BlockHeader::new(&Self::VTABLE),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        });
        block.value.get_mut().write(init());
        let raw = NonNull::from(Box::leak(block));
        // SAFETY: `raw` is a live allocation; the slot is non-null.
        let value = unsafe { NonNull::new_unchecked(Self::slot(raw)) };
        (raw.cast(), value)
    }

    #[inline]
    unsafe fn slot(this: NonNull<Self>) -> *mut T {
        UnsafeCell::raw_get(ptr::addr_of!((*this.as_ptr()).value)).cast::<T>()
    }
}

impl<T> ControlBlock for EmplacedBlock<T> {
    unsafe fn on_zero_strong(this: NonNull<Self>) {
        ptr::drop_in_place(Self::slot(this));
    }

    unsafe fn object(this: NonNull<Self>) -> *const () {
        Self::slot(this) as *const ()
    }
}
