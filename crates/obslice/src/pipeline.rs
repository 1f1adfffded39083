#![forbid(unsafe_code)]

//! Notification pipeline: decides *when* a slice runs its notify cycle.
//!
//! The raw trigger ("fire") runs one notify cycle synchronously. A
//! [`NotifyMiddleware`] wraps it into a replacement trigger with the same
//! effect but different timing:
//!
//! - no middleware: every publish notifies synchronously;
//! - [`Debounce`]: trailing-edge debounce on a [`TaskQueue`];
//! - [`Coalesce`]: all triggers raised before the next queue drain collapse
//!   into one cycle;
//! - any `Fn(Notify) -> Notify` closure.
//!
//! Independently of the middleware, [`BatchScope`] holds triggers while a
//! scope is open and releases one trigger when the outermost scope closes.
//!
//! # Invariants
//!
//! 1. A strategy changes only when and how often a cycle runs, never what
//!    it computes. Selectors always read the state committed at the time
//!    the cycle runs.
//! 2. No commit is ever dropped: after the window elapses, the queue drains
//!    or the batch closes, at least one cycle observes the latest state.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use crate::schedule::{TaskHandle, TaskQueue};

/// Zero-argument notification trigger.
pub type Notify = Rc<dyn Fn()>;

/// Decorator over the raw notify trigger.
pub trait NotifyMiddleware {
    /// Produce the trigger the slice will call after each commit.
    fn wrap(&self, fire: Notify) -> Notify;
}

impl<F> NotifyMiddleware for F
where
    F: Fn(Notify) -> Notify,
{
    fn wrap(&self, fire: Notify) -> Notify {
        self(fire)
    }
}

/// Trailing-edge debounce.
///
/// Each trigger cancels the pending cycle and schedules a fresh one
/// `window` later, so a burst of publishes closer together than `window`
/// produces exactly one cycle, which runs against the last committed state.
///
/// One `Debounce` debounces one slice; clones share the pending task.
#[derive(Clone)]
pub struct Debounce {
    queue: TaskQueue,
    window: Duration,
    pending: Rc<RefCell<Option<TaskHandle>>>,
}

impl Debounce {
    #[must_use]
    pub fn new(queue: &TaskQueue, window: Duration) -> Self {
        Self {
            queue: queue.clone(),
            window,
            pending: Rc::new(RefCell::new(None)),
        }
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether a cycle is scheduled and not yet run.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending
            .borrow()
            .as_ref()
            .is_some_and(|handle| !handle.is_cancelled())
    }

    /// Cancel the scheduled cycle, if any. Returns whether one was pending.
    ///
    /// Committed state is unaffected; the next publish schedules again.
    pub fn cancel_pending(&self) -> bool {
        let pending = self.pending.borrow_mut().take();
        match pending {
            Some(handle) if !handle.is_cancelled() => {
                handle.cancel();
                true
            }
            _ => false,
        }
    }
}

impl NotifyMiddleware for Debounce {
    fn wrap(&self, fire: Notify) -> Notify {
        let queue = self.queue.clone();
        let window = self.window;
        let pending = Rc::clone(&self.pending);
        Rc::new(move || {
            let previous = pending.borrow_mut().take();
            if let Some(handle) = previous {
                handle.cancel();
            }
            let fire = Rc::clone(&fire);
            let slot = Rc::clone(&pending);
            let handle = queue.schedule(window, move || {
                slot.borrow_mut().take();
                fire();
            });
            *pending.borrow_mut() = Some(handle);
        })
    }
}

impl fmt::Debug for Debounce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debounce")
            .field("window", &self.window)
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// Collapse every trigger raised before the host next drains `queue` into a
/// single zero-delay cycle.
#[derive(Clone)]
pub struct Coalesce {
    queue: TaskQueue,
}

impl Coalesce {
    #[must_use]
    pub fn new(queue: &TaskQueue) -> Self {
        Self {
            queue: queue.clone(),
        }
    }
}

impl NotifyMiddleware for Coalesce {
    fn wrap(&self, fire: Notify) -> Notify {
        let queue = self.queue.clone();
        let scheduled = Rc::new(Cell::new(false));
        Rc::new(move || {
            if scheduled.replace(true) {
                return;
            }
            let fire = Rc::clone(&fire);
            let flag = Rc::clone(&scheduled);
            queue.schedule(Duration::ZERO, move || {
                flag.set(false);
                fire();
            });
        })
    }
}

impl fmt::Debug for Coalesce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coalesce").finish_non_exhaustive()
    }
}

/// Trigger plus batch bookkeeping owned by one slice.
pub(crate) struct Pipeline {
    trigger: Notify,
    depth: Cell<u32>,
    held: Cell<bool>,
}

impl Pipeline {
    pub(crate) fn new(trigger: Notify) -> Self {
        Self {
            trigger,
            depth: Cell::new(0),
            held: Cell::new(false),
        }
    }

    /// Called by the publish path after every commit.
    pub(crate) fn trigger(&self) {
        if self.depth.get() > 0 {
            self.held.set(true);
        } else {
            (self.trigger)();
        }
    }

    fn enter(&self) {
        self.depth.set(self.depth.get() + 1);
    }

    fn exit(&self) {
        let depth = self.depth.get().saturating_sub(1);
        self.depth.set(depth);
        if depth == 0 && self.held.replace(false) {
            (self.trigger)();
        }
    }

    pub(crate) fn batch_depth(&self) -> u32 {
        self.depth.get()
    }
}

/// RAII guard that holds notifications until the outermost scope closes.
///
/// State is committed immediately inside the scope; only the notify
/// trigger is deferred. Nested scopes are supported and only the outermost
/// one releases the held trigger.
#[must_use = "dropping a BatchScope releases held notifications immediately"]
pub struct BatchScope {
    pipeline: Rc<Pipeline>,
}

impl BatchScope {
    pub(crate) fn enter(pipeline: &Rc<Pipeline>) -> Self {
        pipeline.enter();
        Self {
            pipeline: Rc::clone(pipeline),
        }
    }

    /// Number of open scopes on this slice, including this one.
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.pipeline.batch_depth()
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        self.pipeline.exit();
    }
}

impl fmt::Debug for BatchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchScope")
            .field("depth", &self.depth())
            .finish()
    }
}
