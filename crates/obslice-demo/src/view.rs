#![forbid(unsafe_code)]

//! Headless view host.
//!
//! Stands in for a UI framework: bindings call the invalidator handed out
//! by [`ViewHost::invalidator`], and the app re-renders whatever is dirty on
//! its next frame. Every render is recorded so the demo can report how many
//! times each view actually drew.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use obslice::{SliceStats, TaskQueue};

#[derive(Default)]
struct HostState {
    dirty: BTreeSet<String>,
    renders: BTreeMap<String, u64>,
    frames: Vec<String>,
}

/// Dirty tracking and render log for a set of named views.
#[derive(Clone, Default)]
pub struct ViewHost {
    state: Rc<RefCell<HostState>>,
}

impl ViewHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-render request for `view`, suitable for `Binding::attach`.
    pub fn invalidator(&self, view: impl Into<String>) -> impl Fn() + 'static {
        let state = Rc::clone(&self.state);
        let view = view.into();
        move || {
            state.borrow_mut().dirty.insert(view.clone());
        }
    }

    /// Views invalidated since the last call, in name order.
    pub fn take_dirty(&self) -> Vec<String> {
        let dirty = std::mem::take(&mut self.state.borrow_mut().dirty);
        dirty.into_iter().collect()
    }

    /// Record that `view` drew `line`.
    pub fn record(&self, view: &str, line: String) {
        tracing::debug!(view, "{line}");
        let mut state = self.state.borrow_mut();
        *state.renders.entry(view.to_string()).or_default() += 1;
        state.frames.push(line);
    }

    pub fn render_counts(&self) -> BTreeMap<String, u64> {
        self.state.borrow().renders.clone()
    }

    #[cfg(test)]
    pub fn frames(&self) -> Vec<String> {
        self.state.borrow().frames.clone()
    }

    pub fn last_frame(&self) -> Option<String> {
        self.state.borrow().frames.last().cloned()
    }
}

impl fmt::Debug for ViewHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("ViewHost")
            .field("dirty", &state.dirty)
            .field("renders", &state.renders)
            .finish()
    }
}

/// Drain `queue` the way a host event loop would: run what is due, then
/// sleep until the next deadline, until nothing is left.
///
/// A manual-clock queue is flushed instead, since sleeping never moves it.
pub fn settle(queue: &TaskQueue) -> usize {
    if queue.is_manual() {
        return queue.flush();
    }
    let mut ran = 0;
    loop {
        ran += queue.run_due();
        let Some(deadline) = queue.next_deadline() else {
            return ran;
        };
        let wait = deadline.saturating_duration_since(queue.now());
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
    }
}

/// What one scripted app run did.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub app: &'static str,
    pub final_state: String,
    pub last_frame: Option<String>,
    pub renders: BTreeMap<String, u64>,
    pub stats: SliceStats,
}

impl RunSummary {
    pub fn total_renders(&self) -> u64 {
        self.renders.values().sum()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "== {} ==", self.app)?;
        writeln!(f, "final state: {}", self.final_state)?;
        if let Some(frame) = &self.last_frame {
            writeln!(f, "last frame: {frame}")?;
        }
        writeln!(
            f,
            "publishes: {}  notify cycles: {}  callbacks: {}  live subscriptions: {}",
            self.stats.publishes,
            self.stats.notify_cycles,
            self.stats.callbacks_fired,
            self.stats.live_subscriptions
        )?;
        if self.renders.len() <= 8 {
            for (view, count) in &self.renders {
                writeln!(f, "  {view:<12} rendered {count}x")?;
            }
        } else {
            writeln!(
                f,
                "  {} views rendered {} times in total",
                self.renders.len(),
                self.total_renders()
            )?;
        }
        Ok(())
    }
}
