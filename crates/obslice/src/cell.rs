#![forbid(unsafe_code)]

//! The state cell: the single source of truth for a slice.
//!
//! # Invariants
//!
//! 1. Exactly one live state value exists at any instant.
//! 2. `commit` swaps the whole `Rc<S>`; a reader holding an earlier snapshot
//!    keeps seeing that snapshot, never a half-applied mutation.
//! 3. The version increments exactly once per commit.
//! 4. No borrow of the cell is held after `read` or `commit` return, so user
//!    code may re-enter the slice freely.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Holds the current immutable state value of a slice.
pub struct StateCell<S> {
    current: RefCell<Rc<S>>,
    version: Cell<u64>,
}

impl<S> StateCell<S> {
    /// Create a cell holding `init` at version 0.
    #[must_use]
    pub fn new(init: S) -> Self {
        Self {
            current: RefCell::new(Rc::new(init)),
            version: Cell::new(0),
        }
    }

    /// Snapshot of the current state (Rc clone, no data copy).
    #[must_use]
    pub fn read(&self) -> Rc<S> {
        Rc::clone(&self.current.borrow())
    }

    /// Number of commits since construction.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.get()
    }

    /// Replace the held value and return the new snapshot.
    ///
    /// Only the publish path calls this.
    pub(crate) fn commit(&self, next: S) -> Rc<S> {
        let next = Rc::new(next);
        let previous = self.current.replace(Rc::clone(&next));
        self.version.set(self.version.get() + 1);
        // The old value is dropped outside the borrow.
        drop(previous);
        next
    }
}

impl<S: std::fmt::Debug> std::fmt::Debug for StateCell<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCell")
            .field("current", &self.current.borrow())
            .field("version", &self.version.get())
            .finish()
    }
}
