// Allocation accounting.
//
// A counting global allocator records allocations and deallocations per
// thread, so tests running in parallel do not see each other's traffic.
// Verifies:
// - make_shared performs exactly one allocation for block + object.
// - The block is freed exactly once, when strong + weak reaches zero, and
//   never before the object's destructor.
// - Clones, weak handles, aliases and promotions never allocate.
use shared_handle::{make_shared, SharedHandle};
use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;

struct CountingAlloc;

thread_local! {
    static ALLOCS: Cell<usize> = const { Cell::new(0) };
    static DEALLOCS: Cell<usize> = const { Cell::new(0) };
}

unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let _ = ALLOCS.try_with(|c| c.set(c.get() + 1));
        System.alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let _ = DEALLOCS.try_with(|c| c.set(c.get() + 1));
        System.dealloc(ptr, layout)
    }
}

#[global_allocator]
static GLOBAL: CountingAlloc = CountingAlloc;

fn allocs() -> usize {
    ALLOCS.with(|c| c.get())
}

fn deallocs() -> usize {
    DEALLOCS.with(|c| c.get())
}

// Records its destruction against the dealloc counter at that moment.
struct Probe<'a> {
    seen_deallocs: &'a Cell<Option<usize>>,
}

impl Drop for Probe<'_> {
    fn drop(&mut self) {
        self.seen_deallocs.set(Some(deallocs()));
    }
}

#[test]
fn make_shared_allocates_once() {
    let a0 = allocs();
    let d0 = deallocs();
    let s = make_shared(42u64);
    assert_eq!(allocs() - a0, 1);

    let s2 = s.clone();
    let w = s.downgrade();
    let p = w.lock();
    let alias = s.project(|v| v);
    assert_eq!(allocs() - a0, 1);

    drop((s, s2, p, alias, w));
    assert_eq!(allocs() - a0, 1);
    assert_eq!(deallocs() - d0, 1);
}

#[test]
fn block_outlives_object_while_weak_remains() {
    let seen = Cell::new(None);
    let d0 = deallocs();
    let s = make_shared(Probe {
        seen_deallocs: &seen,
    });
    let w = s.downgrade();

    drop(s);
    // Object destroyed, storage still held by the weak handle.
    assert_eq!(seen.get(), Some(d0));
    assert_eq!(deallocs() - d0, 0);

    drop(w);
    assert_eq!(deallocs() - d0, 1);
}

#[test]
fn pointer_block_frees_object_then_block() {
    let a0 = allocs();
    let d0 = deallocs();
    let s = SharedHandle::from_box(Box::new([0u8; 32]));
    // The boxed object plus its control block.
    assert_eq!(allocs() - a0, 2);

    let w = s.downgrade();
    drop(s);
    // Only the object's allocation is gone.
    assert_eq!(deallocs() - d0, 1);
    assert!(w.expired());

    drop(w);
    assert_eq!(deallocs() - d0, 2);
}

#[test]
fn reset_raw_allocates_one_block() {
    let mut s = make_shared(1u64);
    let raw = Box::into_raw(Box::new(2u64));
    let a0 = allocs();
    let d0 = deallocs();
    unsafe { s.reset_raw(raw) };
    // A fresh pointer block; the emplaced block of the old object is freed.
    assert_eq!(allocs() - a0, 1);
    assert_eq!(deallocs() - d0, 1);
    assert_eq!(*s, 2);

    let a1 = allocs();
    unsafe { s.reset_raw(std::ptr::null_mut()) };
    assert_eq!(allocs() - a1, 0);
    assert!(s.is_empty());
    // Object and its pointer block.
    assert_eq!(deallocs() - d0, 3);
}

#[test]
fn expired_lock_has_no_side_effects() {
    let s = make_shared(1u8);
    let w = s.downgrade();
    drop(s);
    let a0 = allocs();
    let d0 = deallocs();
    let l = w.lock();
    assert!(l.is_empty());
    assert_eq!(w.use_count(), 0);
    assert_eq!(w.weak_count(), 1);
    assert_eq!((allocs() - a0, deallocs() - d0), (0, 0));
}
