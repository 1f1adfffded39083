#![forbid(unsafe_code)]

//! The slice container: state cell, registry and pipeline behind one handle.
//!
//! # Publish path
//!
//! 1. Read the current state (an `Rc` clone; no borrow is kept).
//! 2. Run the mutation against it.
//! 3. Commit the result.
//! 4. Run the `on_pub` hook and emit `notify-subs`.
//! 5. Trigger the notification pipeline.
//!
//! A mutation that returns `Err` or panics stops before step 3: the state
//! is unchanged and nothing is notified. A panicking `logger` or `on_pub`
//! hook is logged and ignored; it never changes what is committed or
//! delivered.
//!
//! # Re-entrancy
//!
//! Mutations, selectors, policies, callbacks and loggers all run with no
//! borrow of the slice held, so a callback may publish. The nested publish
//! runs to completion (commit and notify) before control returns to the
//! callback.
//!
//! # Ownership
//!
//! Every [`Slice::builder`] call produces an independent container. Cloning
//! a `Slice` yields another handle to the same container. A callback that
//! needs to publish back into its own slice should capture a [`WeakSlice`]
//! so the registry does not keep the slice alive.

use std::any::{Any, type_name};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::binding::{Accessor, Binding, SubTemplate, TemplateFn};
use crate::cell::StateCell;
use crate::config::NotifyConfig;
use crate::error::{BoxError, Result, SliceError};
use crate::event::{Logger, OnPub, SliceEvent, SliceStats, StatsCell};
use crate::pipeline::{BatchScope, Coalesce, Debounce, Notify, NotifyMiddleware, Pipeline};
use crate::policy::ChangePolicy;
use crate::registry::{
    Registry, Selector, Subscription, SubscriptionId, Unsubscribe, panic_message,
};
use crate::schedule::TaskQueue;

/// Named mutation template in replace form.
type Template<S, P> = Rc<dyn Fn(&S, P) -> std::result::Result<S, BoxError>>;

struct NamedPublisher {
    payload: &'static str,
    template: Box<dyn Any>,
}

struct NamedTemplate {
    arg: &'static str,
    projection: &'static str,
    builder: Box<dyn Any>,
}

// ---------------------------------------------------------------------------
// SliceBuilder
// ---------------------------------------------------------------------------

/// Configuration for a new [`Slice`].
///
/// Named publishers and templates are registered here once; the lookup
/// tables are immutable after [`build`](Self::build).
pub struct SliceBuilder<S: 'static> {
    init: S,
    label: String,
    publishers: BTreeMap<String, NamedPublisher>,
    templates: BTreeMap<String, NamedTemplate>,
    middleware: Option<Box<dyn NotifyMiddleware>>,
    logger: Option<Logger<S>>,
    on_pub: Option<OnPub<S>>,
}

impl<S: 'static> SliceBuilder<S> {
    fn new(init: S) -> Self {
        Self {
            init,
            label: String::from("slice"),
            publishers: BTreeMap::new(),
            templates: BTreeMap::new(),
            middleware: None,
            logger: None,
            on_pub: None,
        }
    }

    /// Name used in log records.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Register `name(payload)` as `publish(|s| f(s, payload))`.
    #[must_use]
    pub fn publisher<P: 'static>(
        self,
        name: impl Into<String>,
        f: impl Fn(&S, P) -> S + 'static,
    ) -> Self {
        let template: Template<S, P> =
            Rc::new(move |state: &S, payload: P| -> std::result::Result<S, BoxError> {
                Ok(f(state, payload))
            });
        self.register_publisher(name.into(), template)
    }

    /// Register a fallible publisher. An `Err` leaves the state unchanged
    /// and reaches the caller as [`SliceError::Mutation`].
    #[must_use]
    pub fn try_publisher<P, E>(
        self,
        name: impl Into<String>,
        f: impl Fn(&S, P) -> std::result::Result<S, E> + 'static,
    ) -> Self
    where
        P: 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let template: Template<S, P> =
            Rc::new(move |state: &S, payload: P| -> std::result::Result<S, BoxError> {
                f(state, payload).map_err(|err| Box::new(err) as BoxError)
            });
        self.register_publisher(name.into(), template)
    }

    fn register_publisher<P: 'static>(mut self, name: String, template: Template<S, P>) -> Self {
        if self.publishers.contains_key(&name) {
            tracing::warn!(slice = %self.label, publisher = %name, "publisher registered twice; keeping the last one");
        }
        self.publishers.insert(
            name,
            NamedPublisher {
                payload: type_name::<P>(),
                template: Box::new(template),
            },
        );
        self
    }

    /// Register a named subscription template, exposed through
    /// [`Slice::accessor`].
    #[must_use]
    pub fn template<A: 'static, T: Clone + 'static>(
        mut self,
        name: impl Into<String>,
        builder: impl Fn(A) -> SubTemplate<S, T> + 'static,
    ) -> Self {
        let name = name.into();
        if self.templates.contains_key(&name) {
            tracing::warn!(slice = %self.label, template = %name, "template registered twice; keeping the last one");
        }
        let builder: TemplateFn<S, A, T> = Rc::new(builder);
        self.templates.insert(
            name,
            NamedTemplate {
                arg: type_name::<A>(),
                projection: type_name::<T>(),
                builder: Box::new(builder),
            },
        );
        self
    }

    /// Wrap the notify trigger. Replaces any earlier middleware.
    #[must_use]
    pub fn notify_middleware(mut self, middleware: impl NotifyMiddleware + 'static) -> Self {
        self.middleware = Some(Box::new(middleware));
        self
    }

    /// Trailing-edge debounce of notifications on `queue`.
    #[must_use]
    pub fn debounce(self, queue: &TaskQueue, window: Duration) -> Self {
        self.notify_middleware(Debounce::new(queue, window))
    }

    /// Collapse notifications until `queue` is next drained.
    #[must_use]
    pub fn coalesce(self, queue: &TaskQueue) -> Self {
        self.notify_middleware(Coalesce::new(queue))
    }

    /// Apply a [`NotifyConfig`], replacing any earlier middleware.
    ///
    /// # Errors
    ///
    /// [`SliceError::Config`] when the configuration fails
    /// [`NotifyConfig::validate`]; nothing is applied.
    pub fn config(mut self, config: &NotifyConfig, queue: &TaskQueue) -> Result<Self> {
        config.validate()?;
        if let Some(label) = &config.label {
            self.label.clone_from(label);
        }
        self.middleware = config.middleware(queue);
        Ok(self)
    }

    /// Side channel invoked with every lifecycle event.
    #[must_use]
    pub fn logger(mut self, logger: impl Fn(SliceEvent, &S) + 'static) -> Self {
        self.logger = Some(Rc::new(logger));
        self
    }

    /// Hook invoked with each newly committed state.
    #[must_use]
    pub fn on_pub(mut self, hook: impl Fn(&S) + 'static) -> Self {
        self.on_pub = Some(Rc::new(hook));
        self
    }

    pub fn build(self) -> Slice<S> {
        let Self {
            init,
            label,
            publishers,
            templates,
            middleware,
            logger,
            on_pub,
        } = self;

        let inner = Rc::new_cyclic(|weak: &Weak<SliceInner<S>>| {
            let weak = weak.clone();
            let fire: Notify = Rc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.notify_all();
                }
            });
            let trigger = match &middleware {
                Some(middleware) => middleware.wrap(fire),
                None => fire,
            };
            SliceInner {
                label,
                cell: StateCell::new(init),
                registry: Registry::new(),
                pipeline: Rc::new(Pipeline::new(trigger)),
                publishers,
                templates,
                logger,
                on_pub,
                stats: StatsCell::default(),
            }
        });

        tracing::debug!(
            slice = %inner.label,
            publishers = inner.publishers.len(),
            templates = inner.templates.len(),
            "slice created"
        );
        Slice { inner }
    }
}

impl<S: Clone + 'static> SliceBuilder<S> {
    /// Register a publisher in edit form: `f` mutates a draft copy of the
    /// current state, which is then committed whole.
    #[must_use]
    pub fn edit_publisher<P: 'static>(
        self,
        name: impl Into<String>,
        f: impl Fn(&mut S, P) + 'static,
    ) -> Self {
        let template: Template<S, P> =
            Rc::new(move |state: &S, payload: P| -> std::result::Result<S, BoxError> {
                let mut draft = state.clone();
                f(&mut draft, payload);
                Ok(draft)
            });
        self.register_publisher(name.into(), template)
    }

    /// Fallible edit-form publisher. The draft is discarded on `Err`.
    #[must_use]
    pub fn try_edit_publisher<P, E>(
        self,
        name: impl Into<String>,
        f: impl Fn(&mut S, P) -> std::result::Result<(), E> + 'static,
    ) -> Self
    where
        P: 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let template: Template<S, P> =
            Rc::new(move |state: &S, payload: P| -> std::result::Result<S, BoxError> {
                let mut draft = state.clone();
                f(&mut draft, payload).map_err(|err| Box::new(err) as BoxError)?;
                Ok(draft)
            });
        self.register_publisher(name.into(), template)
    }
}

impl<S: 'static> fmt::Debug for SliceBuilder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SliceBuilder")
            .field("label", &self.label)
            .field("publishers", &self.publishers.keys().collect::<Vec<_>>())
            .field("templates", &self.templates.keys().collect::<Vec<_>>())
            .field("middleware", &self.middleware.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Slice
// ---------------------------------------------------------------------------

pub(crate) struct SliceInner<S: 'static> {
    label: String,
    cell: StateCell<S>,
    registry: Registry<S>,
    pipeline: Rc<Pipeline>,
    publishers: BTreeMap<String, NamedPublisher>,
    templates: BTreeMap<String, NamedTemplate>,
    logger: Option<Logger<S>>,
    on_pub: Option<OnPub<S>>,
    stats: StatsCell,
}

impl<S: 'static> SliceInner<S> {
    fn emit(&self, event: SliceEvent, state: &S) {
        tracing::trace!(
            target: "obslice",
            slice = %self.label,
            event = event.as_str(),
            version = self.cell.version(),
            "slice event"
        );
        if let Some(logger) = &self.logger {
            self.run_side_channel("logger", event.as_str(), || logger(event, state));
        }
    }

    /// Run a user logger or hook. A panic is logged and swallowed so the
    /// publish path and the notify loop continue.
    fn run_side_channel(&self, channel: &str, event: &str, f: impl FnOnce()) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
            tracing::error!(
                slice = %self.label,
                channel,
                event,
                panic = panic_message(payload.as_ref()),
                "side channel panicked; ignoring"
            );
        }
    }

    fn commit(&self, next: S) {
        let state = self.cell.commit(next);
        self.stats.record_publish();
        if let Some(hook) = &self.on_pub {
            self.run_side_channel("on_pub", "publish", || hook(&state));
        }
        self.emit(SliceEvent::NotifySubs, &state);
        drop(state);
        self.pipeline.trigger();
    }

    fn notify_all(&self) {
        let report = self.registry.notify_all(&self.cell, &|state: &S| {
            self.emit(SliceEvent::NotifySub, state);
        });
        self.stats.record_cycle(report.fired, report.panicked);
    }

    fn template<P: 'static>(&self, name: &str) -> Result<Template<S, P>> {
        let entry = self
            .publishers
            .get(name)
            .ok_or_else(|| SliceError::UnknownPublisher(name.to_string()))?;
        entry
            .template
            .downcast_ref::<Template<S, P>>()
            .cloned()
            .ok_or_else(|| SliceError::PayloadMismatch {
                name: name.to_string(),
                expected: entry.payload,
            })
    }

    fn run_template<P>(&self, name: &str, template: &Template<S, P>, payload: P) -> Result<()> {
        let current = self.cell.read();
        match template(&*current, payload) {
            Ok(next) => {
                drop(current);
                self.commit(next);
                Ok(())
            }
            Err(source) => {
                self.stats.record_failed_publish();
                tracing::debug!(slice = %self.label, publisher = name, error = %source, "publish failed; state unchanged");
                Err(SliceError::mutation(name, source))
            }
        }
    }
}

impl<S: 'static> Unsubscribe for SliceInner<S> {
    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        if !self.registry.remove(id) {
            return false;
        }
        let state = self.cell.read();
        self.emit(SliceEvent::RmSub, &state);
        true
    }

    fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.registry.contains(id)
    }
}

/// A single observable slice of application state.
pub struct Slice<S: 'static> {
    inner: Rc<SliceInner<S>>,
}

impl<S: 'static> Clone for Slice<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S: 'static> Slice<S> {
    /// Start configuring a slice holding `init`.
    pub fn builder(init: S) -> SliceBuilder<S> {
        SliceBuilder::new(init)
    }

    /// A slice with no publishers, templates or middleware.
    pub fn new(init: S) -> Self {
        Self::builder(init).build()
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Current state.
    #[must_use]
    pub fn get(&self) -> Rc<S> {
        let state = self.inner.cell.read();
        self.inner.emit(SliceEvent::Get, &state);
        state
    }

    /// Current state without emitting a `get` event.
    pub(crate) fn read_state(&self) -> Rc<S> {
        self.inner.cell.read()
    }

    /// Number of commits so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.cell.version()
    }

    /// Publish a total-replacement mutation.
    pub fn pub_replace(&self, replace: impl FnOnce(&S) -> S) {
        let current = self.inner.cell.read();
        let next = replace(&*current);
        drop(current);
        self.inner.commit(next);
    }

    /// Publish a fallible total-replacement mutation.
    ///
    /// # Errors
    ///
    /// Returns the mutation's own error; the state is unchanged and nothing
    /// is notified.
    pub fn try_pub<E>(
        &self,
        replace: impl FnOnce(&S) -> std::result::Result<S, E>,
    ) -> std::result::Result<(), E> {
        let current = self.inner.cell.read();
        match replace(&*current) {
            Ok(next) => {
                drop(current);
                self.inner.commit(next);
                Ok(())
            }
            Err(err) => {
                self.inner.stats.record_failed_publish();
                Err(err)
            }
        }
    }

    /// Invoke a named publisher.
    ///
    /// # Errors
    ///
    /// [`SliceError::UnknownPublisher`], [`SliceError::PayloadMismatch`], or
    /// [`SliceError::Mutation`] when a fallible template fails.
    pub fn publish<P: 'static>(&self, name: &str, payload: P) -> Result<()> {
        let template = self.inner.template::<P>(name)?;
        self.inner.run_template(name, &template, payload)
    }

    /// Typed handle to a named publisher.
    ///
    /// # Errors
    ///
    /// [`SliceError::UnknownPublisher`] or [`SliceError::PayloadMismatch`].
    pub fn publisher<P: 'static>(&self, name: &str) -> Result<Publisher<S, P>> {
        let template = self.inner.template::<P>(name)?;
        Ok(Publisher {
            name: Rc::from(name),
            label: Rc::from(self.inner.label.as_str()),
            slice: Rc::downgrade(&self.inner),
            template,
        })
    }

    /// Names of all registered publishers, sorted.
    #[must_use]
    pub fn publisher_names(&self) -> Vec<&str> {
        self.inner.publishers.keys().map(String::as_str).collect()
    }

    /// Subscribe with the default change policy (`prev != next`).
    ///
    /// The baseline projection is captured now; the callback only fires on
    /// a later cycle whose projection differs from it.
    pub fn sub<T: Clone + PartialEq + 'static>(
        &self,
        select: impl Fn(&S) -> T + 'static,
        callback: impl Fn(&T) + 'static,
    ) -> Subscription {
        self.sub_with(select, callback, ChangePolicy::changed())
    }

    /// Subscribe with an explicit change policy.
    pub fn sub_with<T: Clone + 'static>(
        &self,
        select: impl Fn(&S) -> T + 'static,
        callback: impl Fn(&T) + 'static,
        policy: ChangePolicy<T>,
    ) -> Subscription {
        self.register(Rc::new(select), policy, Box::new(callback)).0
    }

    /// Register a record and return its guard together with the baseline.
    pub(crate) fn register<T: Clone + 'static>(
        &self,
        select: Selector<S, T>,
        policy: ChangePolicy<T>,
        callback: Box<dyn Fn(&T)>,
    ) -> (Subscription, T) {
        let state = self.inner.cell.read();
        let baseline = select(&*state);
        self.inner.emit(SliceEvent::AddSub, &state);
        let id = self
            .inner
            .registry
            .insert(select, policy, callback, baseline.clone());
        let weak: Weak<SliceInner<S>> = Rc::downgrade(&self.inner);
        let owner: Weak<dyn Unsubscribe> = weak;
        (Subscription::new(id, owner), baseline)
    }

    /// Remove a registration by id. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.unsubscribe(id)
    }

    #[must_use]
    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.inner.registry.contains(id)
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Lifecycle-bound subscription for a UI host, default policy.
    pub fn use_sub<T: Clone + PartialEq + 'static>(
        &self,
        select: impl Fn(&S) -> T + 'static,
    ) -> Binding<S, T> {
        self.use_sub_with(select, ChangePolicy::changed())
    }

    /// Lifecycle-bound subscription with an explicit policy.
    pub fn use_sub_with<T: Clone + 'static>(
        &self,
        select: impl Fn(&S) -> T + 'static,
        policy: ChangePolicy<T>,
    ) -> Binding<S, T> {
        Binding::new(self.clone(), Rc::new(select), policy, None)
    }

    /// Lifecycle-bound subscription memoized by `key`; see
    /// [`Binding::rekey`].
    pub fn use_sub_keyed<T: Clone + 'static>(
        &self,
        key: impl Into<String>,
        select: impl Fn(&S) -> T + 'static,
        policy: ChangePolicy<T>,
    ) -> Binding<S, T> {
        Binding::new(self.clone(), Rc::new(select), policy, Some(key.into()))
    }

    /// Accessor for a named subscription template.
    ///
    /// # Errors
    ///
    /// [`SliceError::UnknownTemplate`] or [`SliceError::TemplateMismatch`].
    pub fn accessor<A: 'static, T: Clone + 'static>(&self, name: &str) -> Result<Accessor<S, A, T>> {
        let entry = self
            .inner
            .templates
            .get(name)
            .ok_or_else(|| SliceError::UnknownTemplate(name.to_string()))?;
        let builder = entry
            .builder
            .downcast_ref::<TemplateFn<S, A, T>>()
            .cloned()
            .ok_or_else(|| SliceError::TemplateMismatch {
                name: name.to_string(),
                arg: entry.arg,
                projection: entry.projection,
            })?;
        Ok(Accessor::new(name, self.clone(), builder))
    }

    /// Names of all registered templates, sorted.
    #[must_use]
    pub fn template_names(&self) -> Vec<&str> {
        self.inner.templates.keys().map(String::as_str).collect()
    }

    /// Hold notifications until the returned scope (and any enclosing
    /// scope) is dropped.
    pub fn batch(&self) -> BatchScope {
        BatchScope::enter(&self.inner.pipeline)
    }

    /// Run one notify cycle now, bypassing middleware and batch scopes.
    pub fn notify_now(&self) {
        self.inner.notify_all();
    }

    #[must_use]
    pub fn stats(&self) -> SliceStats {
        self.inner.stats.snapshot(self.inner.registry.len())
    }

    /// Non-owning handle, for callbacks that publish back into this slice.
    #[must_use]
    pub fn downgrade(&self) -> WeakSlice<S> {
        WeakSlice {
            inner: Rc::downgrade(&self.inner),
        }
    }
}

impl<S: Clone + 'static> Slice<S> {
    /// Publish an in-place edit applied to a copy of the current state.
    pub fn pub_edit(&self, edit: impl FnOnce(&mut S)) {
        let current = self.inner.cell.read();
        let mut draft = (*current).clone();
        drop(current);
        edit(&mut draft);
        self.inner.commit(draft);
    }

    /// Fallible in-place edit. On `Err` the draft is discarded.
    ///
    /// # Errors
    ///
    /// Returns the edit's own error; the state is unchanged and nothing is
    /// notified.
    pub fn try_pub_edit<E>(
        &self,
        edit: impl FnOnce(&mut S) -> std::result::Result<(), E>,
    ) -> std::result::Result<(), E> {
        let current = self.inner.cell.read();
        let mut draft = (*current).clone();
        drop(current);
        match edit(&mut draft) {
            Ok(()) => {
                self.inner.commit(draft);
                Ok(())
            }
            Err(err) => {
                self.inner.stats.record_failed_publish();
                Err(err)
            }
        }
    }
}

impl<S: 'static> fmt::Debug for Slice<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slice")
            .field("label", &self.inner.label)
            .field("version", &self.inner.cell.version())
            .field("subscribers", &self.inner.registry.len())
            .finish()
    }
}

/// Non-owning handle to a [`Slice`].
pub struct WeakSlice<S: 'static> {
    inner: Weak<SliceInner<S>>,
}

impl<S: 'static> WeakSlice<S> {
    #[must_use]
    pub fn upgrade(&self) -> Option<Slice<S>> {
        self.inner.upgrade().map(|inner| Slice { inner })
    }
}

impl<S: 'static> Clone for WeakSlice<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<S: 'static> fmt::Debug for WeakSlice<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakSlice")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// Typed handle to a named publisher.
///
/// Holds the slice weakly, so it can be captured by subscriber callbacks.
pub struct Publisher<S: 'static, P: 'static> {
    name: Rc<str>,
    label: Rc<str>,
    slice: Weak<SliceInner<S>>,
    template: Template<S, P>,
}

impl<S: 'static, P: 'static> Publisher<S, P> {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Exactly `slice.publish(name, payload)`.
    ///
    /// # Errors
    ///
    /// [`SliceError::Closed`] if the slice is gone, or
    /// [`SliceError::Mutation`] when a fallible template fails.
    pub fn publish(&self, payload: P) -> Result<()> {
        let inner = self
            .slice
            .upgrade()
            .ok_or_else(|| SliceError::Closed(self.label.to_string()))?;
        inner.run_template(&self.name, &self.template, payload)
    }
}

impl<S: 'static, P: 'static> Clone for Publisher<S, P> {
    fn clone(&self) -> Self {
        Self {
            name: Rc::clone(&self.name),
            label: Rc::clone(&self.label),
            slice: Weak::clone(&self.slice),
            template: Rc::clone(&self.template),
        }
    }
}

impl<S: 'static, P: 'static> fmt::Debug for Publisher<S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("name", &self.name)
            .field("payload", &type_name::<P>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
