#![forbid(unsafe_code)]

//! Observable state slices with selector-based subscriptions.
//!
//! A [`Slice`] holds one immutable state value. Publishers replace it
//! (by returning a new value, or by editing a draft copy) and subscribers
//! register a selector plus a [`ChangePolicy`]. After each commit the
//! selectors are re-run and a subscriber's callback fires only when its
//! policy says the projection changed.
//!
//! - [`Slice`] / [`SliceBuilder`]: the container, its named publishers and
//!   named subscription templates.
//! - [`Subscription`]: RAII guard that unsubscribes on drop.
//! - [`Binding`], [`Accessor`], [`BindingScope`]: host-facing handles with
//!   a local snapshot and a re-render hook.
//! - [`Debounce`], [`Coalesce`], [`BatchScope`]: control when a notify
//!   cycle runs, never what it computes.
//! - [`TaskQueue`]: the host-owned queue deferred notifications run on.
//!
//! # Architecture
//!
//! Everything is single-threaded and `Rc`-based. No `RefCell` borrow is held
//! while user code runs, so callbacks may publish into the slice they
//! observe; the nested publish runs to completion before the callback
//! returns. A subscriber that panics is logged and skipped; the others still
//! run.
//!
//! # Invariants
//!
//! 1. A publish either commits a complete new state or leaves the state
//!    untouched; a failed mutation notifies nobody.
//! 2. No callback fires during `sub` itself.
//! 3. A callback fires for a cycle iff its policy returns `true` for
//!    `(prev, next)`, and `prev` then becomes `next`.
//! 4. Unsubscribing is idempotent.
//!
//! # Example
//!
//! ```
//! use obslice::Slice;
//!
//! #[derive(Clone, Debug, PartialEq)]
//! struct Counter {
//!     count: u32,
//! }
//!
//! let slice = Slice::builder(Counter { count: 0 })
//!     .edit_publisher("increment", |s: &mut Counter, by: u32| s.count += by)
//!     .build();
//!
//! let seen = std::rc::Rc::new(std::cell::Cell::new(0));
//! let sink = seen.clone();
//! let _sub = slice.sub(|s| s.count, move |c| sink.set(*c));
//!
//! slice.publish("increment", 2u32).unwrap();
//! assert_eq!(seen.get(), 2);
//! ```

pub mod binding;
pub mod cell;
pub mod config;
pub mod error;
pub mod event;
pub mod pipeline;
pub mod policy;
pub mod registry;
pub mod schedule;
pub mod slice;

pub use binding::{Accessor, AccessorBinding, Binding, BindingScope, SubTemplate};
pub use cell::StateCell;
pub use config::{NotifyConfig, NotifyMode};
pub use error::{BoxError, Result, SliceError};
pub use event::{Logger, OnPub, SliceEvent, SliceStats};
pub use pipeline::{BatchScope, Coalesce, Debounce, Notify, NotifyMiddleware};
pub use policy::ChangePolicy;
pub use registry::{Subscription, SubscriptionId};
pub use schedule::{TaskHandle, TaskQueue};
pub use slice::{Publisher, Slice, SliceBuilder, WeakSlice};
