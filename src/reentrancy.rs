//! Debug-only guard around the zero-strong hook.
//!
//! The managed object must be destroyed exactly once. In debug builds a
//! control block records when its hook is running and panics if the hook
//! is entered again for the same block (for example from the object's own
//! `Drop` releasing a strong reference it does not hold). In release builds
//! this compiles to nothing.

use core::cell::Cell;
use core::marker::PhantomData;

/// Per-block tracker. Embedded in every control block header.
#[derive(Debug)]
pub struct HookGuard {
    #[cfg(debug_assertions)]
    fired: Cell<bool>,
    #[cfg(debug_assertions)]
    running: Cell<bool>,
    _nosend: PhantomData<*mut ()>,
}

impl HookGuard {
    pub const fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            fired: Cell::new(false),
            #[cfg(debug_assertions)]
            running: Cell::new(false),
            _nosend: PhantomData,
        }
    }

    /// Mark the hook as running. Panics in debug builds if it already ran
    /// or is running.
    #[inline]
    pub fn enter(&self) -> HookEntry<'_> {
        #[cfg(debug_assertions)]
        {
            assert!(!self.running.get(), "zero-strong hook re-entered");
            assert!(!self.fired.get(), "zero-strong hook fired twice");
            self.running.set(true);
            return HookEntry { owner: self };
        }

        #[cfg(not(debug_assertions))]
        {
            return HookEntry { _z: PhantomData };
        }
    }
}

impl Default for HookGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII marker returned by `HookGuard::enter`.
pub struct HookEntry<'a> {
    #[cfg(debug_assertions)]
    owner: &'a HookGuard,
    #[cfg(not(debug_assertions))]
    _z: PhantomData<&'a ()>,
}

impl<'a> Drop for HookEntry<'a> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            debug_assert!(self.owner.running.get());
            self.owner.running.set(false);
            self.owner.fired.set(true);
        }
    }
}
