#![forbid(unsafe_code)]

//! Host task queue used by deferred notification strategies.
//!
//! The core never spawns threads or timers. Deferred work is parked on a
//! [`TaskQueue`] that the host drains from its own event loop via
//! [`run_due`](TaskQueue::run_due). A queue runs on either the system clock
//! or a manual clock that only moves through [`advance`](TaskQueue::advance),
//! which keeps debounce behavior deterministic under test.
//!
//! # Invariants
//!
//! 1. Tasks run in deadline order; ties run in scheduling order.
//! 2. A cancelled task never runs.
//! 3. No borrow of the queue is held while a task runs, so tasks may
//!    schedule further tasks.
//! 4. Cancelled tasks are pruned once they could make up half the heap, so
//!    a debounced burst between drains does not grow the queue.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use web_time::Instant;

enum Clock {
    System,
    Manual(Cell<Instant>),
}

impl Clock {
    fn now(&self) -> Instant {
        match self {
            Self::System => Instant::now(),
            Self::Manual(now) => now.get(),
        }
    }
}

struct Scheduled {
    deadline: Instant,
    seq: u64,
    cancelled: Rc<Cell<bool>>,
    task: Box<dyn FnOnce()>,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Reversed so the max-heap pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueInner {
    clock: Clock,
    tasks: RefCell<BinaryHeap<Scheduled>>,
    next_seq: Cell<u64>,
    prune_at: Cell<usize>,
}

const MIN_PRUNE_AT: usize = 32;

/// Cancellation handle for one scheduled task.
#[derive(Clone)]
pub struct TaskHandle {
    cancelled: Rc<Cell<bool>>,
}

impl TaskHandle {
    /// Prevent the task from running. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("cancelled", &self.cancelled.get())
            .finish()
    }
}

/// Single-threaded queue of deferred tasks, drained by the host.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Rc<QueueInner>,
}

impl TaskQueue {
    /// Queue driven by the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Clock::System)
    }

    /// Queue driven by a manual clock starting at the current instant.
    #[must_use]
    pub fn manual() -> Self {
        Self::with_clock(Clock::Manual(Cell::new(Instant::now())))
    }

    fn with_clock(clock: Clock) -> Self {
        Self {
            inner: Rc::new(QueueInner {
                clock,
                tasks: RefCell::new(BinaryHeap::new()),
                next_seq: Cell::new(0),
                prune_at: Cell::new(MIN_PRUNE_AT),
            }),
        }
    }

    /// Whether time only moves through [`advance`](Self::advance).
    #[must_use]
    pub fn is_manual(&self) -> bool {
        matches!(self.inner.clock, Clock::Manual(_))
    }

    /// Current time according to the queue's clock.
    #[must_use]
    pub fn now(&self) -> Instant {
        self.inner.clock.now()
    }

    /// Schedule `task` to run once `delay` has elapsed.
    pub fn schedule(&self, delay: Duration, task: impl FnOnce() + 'static) -> TaskHandle {
        let seq = self.inner.next_seq.get();
        self.inner.next_seq.set(seq + 1);
        let cancelled = Rc::new(Cell::new(false));
        self.prune_cancelled();
        self.inner.tasks.borrow_mut().push(Scheduled {
            deadline: self.now() + delay,
            seq,
            cancelled: Rc::clone(&cancelled),
            task: Box::new(task),
        });
        TaskHandle { cancelled }
    }

    /// Run every task whose deadline has passed. Returns how many ran.
    ///
    /// Tasks scheduled by a running task are picked up in the same drain if
    /// they are already due.
    pub fn run_due(&self) -> usize {
        let mut ran = 0;
        while let Some(task) = self.pop_due(self.now()) {
            (task.task)();
            ran += 1;
        }
        ran
    }

    /// Move a manual clock forward by `by`, then run whatever became due.
    ///
    /// On a system-clock queue this only runs due tasks.
    pub fn advance(&self, by: Duration) -> usize {
        if let Clock::Manual(now) = &self.inner.clock {
            now.set(now.get() + by);
        }
        self.run_due()
    }

    /// Run every pending task regardless of deadline, in deadline order.
    pub fn flush(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.inner.tasks.borrow_mut().pop();
            let Some(task) = next else { break };
            if task.cancelled.get() {
                continue;
            }
            (task.task)();
            ran += 1;
        }
        ran
    }

    /// Deadline of the earliest live task.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.discard_cancelled_head();
        self.inner.tasks.borrow().peek().map(|t| t.deadline)
    }

    /// Number of tasks that have not been cancelled.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .tasks
            .borrow()
            .iter()
            .filter(|t| !t.cancelled.get())
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pop_due(&self, now: Instant) -> Option<Scheduled> {
        let mut tasks = self.inner.tasks.borrow_mut();
        loop {
            let head = tasks.peek()?;
            if head.cancelled.get() {
                tasks.pop();
                continue;
            }
            if head.deadline > now {
                return None;
            }
            return tasks.pop();
        }
    }

    /// Drop cancelled entries once the heap reaches `prune_at`, then move
    /// the threshold to twice the surviving size. Amortized O(1) per task.
    fn prune_cancelled(&self) {
        let mut tasks = self.inner.tasks.borrow_mut();
        if tasks.len() < self.inner.prune_at.get() {
            return;
        }
        tasks.retain(|t| !t.cancelled.get());
        self.inner
            .prune_at
            .set((tasks.len() * 2).max(MIN_PRUNE_AT));
    }

    fn discard_cancelled_head(&self) {
        let mut tasks = self.inner.tasks.borrow_mut();
        while tasks.peek().is_some_and(|t| t.cancelled.get()) {
            tasks.pop();
        }
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("manual", &self.is_manual())
            .field("pending", &self.len())
            .finish()
    }
}
