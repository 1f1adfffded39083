#![forbid(unsafe_code)]

//! Scripted counter app.
//!
//! Three views observe one counter: a static view built from the `count`
//! template, a dynamic view built with `use_sub`, and a `count_by_5` view
//! whose policy skips multiples of five. A button publishes `increment(1)`.

use obslice::{
    AccessorBinding, Binding, ChangePolicy, NotifyConfig, Publisher, Result, Slice, SliceBuilder,
    SubTemplate, TaskQueue,
};

use crate::view::{RunSummary, ViewHost, settle};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountState {
    pub count: u32,
}

pub fn count_slice(config: &NotifyConfig, queue: &TaskQueue) -> Result<Slice<CountState>> {
    Slice::builder(CountState::default())
        .label("count")
        .edit_publisher("increment", |s: &mut CountState, by: u32| s.count += by)
        .template("count", |(): ()| SubTemplate::new(|s: &CountState| s.count))
        .template("count_by_5", |(): ()| {
            SubTemplate::custom(
                |s: &CountState| s.count,
                ChangePolicy::from_fn(|_prev: &u32, next: &u32| next % 5 != 0),
            )
        })
        .config(config, queue)
        .map(SliceBuilder::build)
}

pub struct CountApp {
    slice: Slice<CountState>,
    host: ViewHost,
    static_sub: AccessorBinding<CountState, (), u32>,
    dynamic_sub: Binding<CountState, u32>,
    by_five: AccessorBinding<CountState, (), u32>,
    increment: Publisher<CountState, u32>,
}

impl CountApp {
    /// Build the slice and mount every view.
    pub fn new(config: &NotifyConfig, queue: &TaskQueue) -> Result<Self> {
        let slice = count_slice(config, queue)?;
        let host = ViewHost::new();

        let mut static_sub = slice.accessor::<(), u32>("count")?.bind(());
        let mut dynamic_sub = slice.use_sub(|s: &CountState| s.count);
        let mut by_five = slice.accessor::<(), u32>("count_by_5")?.bind(());
        static_sub.attach(host.invalidator("static"));
        dynamic_sub.attach(host.invalidator("dynamic"));
        by_five.attach(host.invalidator("by_five"));

        let increment = slice.publisher::<u32>("increment")?;
        let app = Self {
            slice,
            host,
            static_sub,
            dynamic_sub,
            by_five,
            increment,
        };
        for view in ["static", "dynamic", "by_five"] {
            app.render(view);
        }
        Ok(app)
    }

    /// The button.
    pub fn click(&self) -> Result<()> {
        self.increment.publish(1)
    }

    /// Re-render every invalidated view. Returns how many drew.
    pub fn frame(&self) -> usize {
        let dirty = self.host.take_dirty();
        for view in &dirty {
            self.render(view);
        }
        dirty.len()
    }

    fn render(&self, view: &str) {
        let line = match view {
            "static" => format!("static sub {}", self.static_sub.get()),
            "dynamic" => format!("dynamic sub {}", self.dynamic_sub.get()),
            "by_five" => format!("static sub by 5 {}", self.by_five.get()),
            other => format!("unknown view {other}"),
        };
        self.host.record(view, line);
    }

    /// Click `clicks` times, drawing a frame after each click, then let any
    /// deferred notifications land.
    pub fn run(clicks: u32, config: &NotifyConfig, queue: &TaskQueue) -> Result<RunSummary> {
        let app = Self::new(config, queue)?;
        for _ in 0..clicks {
            app.click()?;
            queue.run_due();
            app.frame();
        }
        settle(queue);
        app.frame();

        Ok(RunSummary {
            app: "count",
            final_state: format!("count = {}", app.slice.get().count),
            last_frame: app.host.last_frame(),
            renders: app.host.render_counts(),
            stats: app.slice.stats(),
        })
    }
}
