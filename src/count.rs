//! Non-atomic reference counter shared by the strong and weak sides of a
//! control block.
//!
//! Overflow follows `Rc`: the process aborts instead of wrapping. Underflow
//! means a release without a matching acquire and panics.

use core::cell::Cell;
use core::marker::PhantomData;

/// Single-threaded counter.
#[derive(Debug)]
pub struct Counter {
    count: Cell<usize>,
    // !Send + !Sync: plain Cell arithmetic, no atomics.
    _nosend: PhantomData<*mut ()>,
}

impl Counter {
    pub const fn new(initial: usize) -> Self {
        Self {
            count: Cell::new(initial),
            _nosend: PhantomData,
        }
    }

    #[inline]
    pub fn get(&self) -> usize {
        self.count.get()
    }

    /// Acquire one unit.
    #[inline]
    pub fn inc(&self) {
        let n = self.count.get().wrapping_add(1);
        self.count.set(n);
        if n == 0 {
            std::process::abort();
        }
    }

    /// Release one unit and return the count left behind.
    #[inline]
    pub fn dec(&self) -> usize {
        let c = self.count.get();
        assert!(c > 0, "Counter underflow");
        let n = c - 1;
        self.count.set(n);
        n
    }
}
