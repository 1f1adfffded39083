#![forbid(unsafe_code)]

//! Lifecycle events and counters for observing a slice.
//!
//! Every event is traced at `TRACE` level. A user-supplied [`Logger`] sees
//! the same events together with the state current at that moment. Loggers
//! receive the state by shared reference only and their return value is
//! ignored, so they cannot steer control flow.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// Named lifecycle events emitted by a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SliceEvent {
    /// `get()` was called.
    Get,
    /// A subscription was registered.
    AddSub,
    /// A subscription was removed.
    RmSub,
    /// A new state was committed and the pipeline is about to be triggered.
    NotifySubs,
    /// A single subscriber is about to receive a changed projection.
    NotifySub,
}

impl SliceEvent {
    /// All events, in lifecycle order.
    pub const ALL: [Self; 5] = [
        Self::Get,
        Self::AddSub,
        Self::RmSub,
        Self::NotifySubs,
        Self::NotifySub,
    ];

    /// Stable event name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::AddSub => "add-sub",
            Self::RmSub => "rm-sub",
            Self::NotifySubs => "notify-subs",
            Self::NotifySub => "notify-sub",
        }
    }
}

impl fmt::Display for SliceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side-channel invoked with each lifecycle event.
pub type Logger<S> = Rc<dyn Fn(SliceEvent, &S)>;

/// Hook invoked with every newly committed state.
pub type OnPub<S> = Rc<dyn Fn(&S)>;

/// Point-in-time counters for a slice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SliceStats {
    /// Successful commits.
    pub publishes: u64,
    /// Publishes whose mutation failed (nothing committed).
    pub failed_publishes: u64,
    /// Notify cycles that actually ran.
    pub notify_cycles: u64,
    /// Callbacks invoked across all cycles.
    pub callbacks_fired: u64,
    /// Subscribers that panicked during a cycle and were skipped.
    pub subscriber_panics: u64,
    /// Subscriptions currently registered.
    pub live_subscriptions: usize,
}

/// Interior-mutable counters owned by a slice.
#[derive(Debug, Default)]
pub(crate) struct StatsCell {
    publishes: Cell<u64>,
    failed_publishes: Cell<u64>,
    notify_cycles: Cell<u64>,
    callbacks_fired: Cell<u64>,
    subscriber_panics: Cell<u64>,
}

impl StatsCell {
    pub(crate) fn record_publish(&self) {
        bump(&self.publishes, 1);
    }

    pub(crate) fn record_failed_publish(&self) {
        bump(&self.failed_publishes, 1);
    }

    pub(crate) fn record_cycle(&self, fired: u64, panicked: u64) {
        bump(&self.notify_cycles, 1);
        bump(&self.callbacks_fired, fired);
        bump(&self.subscriber_panics, panicked);
    }

    pub(crate) fn snapshot(&self, live_subscriptions: usize) -> SliceStats {
        SliceStats {
            publishes: self.publishes.get(),
            failed_publishes: self.failed_publishes.get(),
            notify_cycles: self.notify_cycles.get(),
            callbacks_fired: self.callbacks_fired.get(),
            subscriber_panics: self.subscriber_panics.get(),
            live_subscriptions,
        }
    }
}

fn bump(counter: &Cell<u64>, by: u64) {
    counter.set(counter.get().saturating_add(by));
}
