//! shared-handle: single-threaded shared and weak ownership handles built
//! on explicit control blocks.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: deterministic lifetime management for heap objects, with the
//!   bookkeeping split into small layers that can be reasoned about
//!   independently.
//! - Layers:
//!   - Counter: non-atomic counter; aborts on overflow, panics on
//!     underflow.
//!   - Control blocks: a `#[repr(C)]` header (strong, weak, vtable) at the
//!     start of every block, plus two layouts behind it:
//!     `PointerBlock<T, D>` owns a separately allocated object through a
//!     deleter; `EmplacedBlock<T>` embeds the object in its own storage.
//!   - Handles: `SharedHandle<T>` (strong) and `WeakHandle<T>` (weak) each
//!     hold an exposed pointer and a block pointer. All counting goes
//!     through the block.
//!
//! Two-phase destruction
//! - The object is destroyed exactly once, on the strong 1 -> 0
//!   transition, through the block's zero-strong hook.
//! - The block's storage is freed exactly once, when strong + weak
//!   reaches 0. Weak handles can keep the storage alive after the object
//!   is gone; `expired()`/`lock()` read the strong count from it.
//! - While the hook runs the block pins itself with a temporary weak
//!   reference, so weak handles dropped by the dying object (for example
//!   its self back-reference) cannot free the block under the hook.
//!
//! Allocation
//! - `make_shared` / `SharedHandle::new`: one allocation for block and
//!   object together.
//! - `SharedHandle::from_box` / `from_raw` / `with_deleter` and
//!   conversion from `UniqueHandle`: the object's allocation plus one
//!   block.
//! - Clones, weak handles, aliases and promotions never allocate.
//!
//! Aliasing
//! - `SharedHandle::alias` (unsafe) and `project` (safe) expose a pointer
//!   other than the block's object while sharing its strong count, so a
//!   handle to a field keeps the whole aggregate alive.
//! - An alias may expose memory the block does not own, so `get_mut` only
//!   hands out `&mut` for the block's own object.
//!
//! Moves
//! - Rust moves are bitwise and leave the source dead, so moving a handle
//!   never touches the counters. `std::mem::take` moves out and leaves an
//!   empty handle behind.
//!
//! Constraints and non-goals
//! - Single-threaded: handles are `!Send`/`!Sync` (no atomics).
//! - Cycles of strong handles are never collected; break them with
//!   `WeakHandle`.
//! - No custom allocators; every block is a `Box`.
//! - Safe `Deref` of an empty handle panics. The raw entry points are
//!   `unsafe fn` and document their contracts.
//!
//! Overflow semantics
//! - Overflowing a counter aborts the process, matching `Rc`.

#[cfg(feature = "bench_internal")]
pub mod control_block;
#[cfg(not(feature = "bench_internal"))]
mod control_block;
mod count;
mod deleter;
mod error;
mod reentrancy;
mod self_ref;
mod shared;
mod unique;
mod weak;

// Public surface
pub use deleter::{DefaultDelete, Deleter, FnDeleter};
pub use error::HandleError;
pub use self_ref::{SelfRef, SharedFromThis};
pub use shared::{make_shared, make_shared_linked, make_shared_with, BlockPtr, SharedHandle};
pub use unique::UniqueHandle;
pub use weak::WeakHandle;
