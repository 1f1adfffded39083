#![forbid(unsafe_code)]

//! Host-facing bindings: lifecycle-bound subscriptions for UI components.
//!
//! A [`Binding`] keeps a local snapshot of one projection. The snapshot is
//! seeded synchronously when the binding is created, so the first render
//! never sees a stale value. [`attach`](Binding::attach) subscribes with a
//! host re-render request; [`detach`](Binding::detach) (or dropping the
//! binding) unsubscribes.
//!
//! # Usage
//!
//! ```ignore
//! let slice = Slice::new(0u32);
//! let mut count = slice.use_sub(|s| *s);
//! count.attach(|| request_render());
//!
//! slice.pub_replace(|s| s + 1);
//! assert_eq!(count.get(), 1);
//! ```
//!
//! # Re-keying
//!
//! Components whose selector depends on an argument (a todo id, say) use a
//! key. [`Binding::rekey`] with the same key does nothing. A new key removes
//! the old registration, re-derives the snapshot from the current state and
//! registers again, so changing the argument never leaks a subscription.
//! [`AccessorBinding::set_arg`] does the same for bindings created from a
//! named template.
//!
//! # Invariants
//!
//! 1. At most one registration per binding at any time.
//! 2. `get()` after `rekey`/`set_arg` reflects the new selector immediately.
//! 3. Dropping a [`BindingScope`] releases everything it holds, newest first.

use std::cell::RefCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use crate::policy::ChangePolicy;
use crate::registry::{Selector, Subscription};
use crate::slice::Slice;

// ---------------------------------------------------------------------------
// SubTemplate
// ---------------------------------------------------------------------------

/// Selector plus change policy, as produced by a named template.
pub struct SubTemplate<S, T> {
    select: Selector<S, T>,
    policy: ChangePolicy<T>,
}

impl<S: 'static, T: Clone + PartialEq + 'static> SubTemplate<S, T> {
    /// Template with the default `prev != next` policy.
    pub fn new(select: impl Fn(&S) -> T + 'static) -> Self {
        Self::custom(select, ChangePolicy::changed())
    }
}

impl<S: 'static, T: Clone + 'static> SubTemplate<S, T> {
    pub fn custom(select: impl Fn(&S) -> T + 'static, policy: ChangePolicy<T>) -> Self {
        Self {
            select: Rc::new(select),
            policy,
        }
    }

    /// Replace the change policy.
    #[must_use]
    pub fn change_policy(mut self, policy: ChangePolicy<T>) -> Self {
        self.policy = policy;
        self
    }

    /// Apply the selector to `state`.
    pub fn select(&self, state: &S) -> T {
        (self.select)(state)
    }

    pub fn policy(&self) -> &ChangePolicy<T> {
        &self.policy
    }

    fn into_parts(self) -> (Selector<S, T>, ChangePolicy<T>) {
        (self.select, self.policy)
    }
}

impl<S, T> Clone for SubTemplate<S, T> {
    fn clone(&self) -> Self {
        Self {
            select: Rc::clone(&self.select),
            policy: self.policy.clone(),
        }
    }
}

impl<S, T> fmt::Debug for SubTemplate<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubTemplate").finish_non_exhaustive()
    }
}

/// Builder stored for a named subscription template.
pub(crate) type TemplateFn<S, A, T> = Rc<dyn Fn(A) -> SubTemplate<S, T>>;

// ---------------------------------------------------------------------------
// Binding
// ---------------------------------------------------------------------------

/// Lifecycle-bound subscription with a local snapshot.
pub struct Binding<S: 'static, T: 'static> {
    slice: Slice<S>,
    select: Selector<S, T>,
    policy: ChangePolicy<T>,
    key: Option<String>,
    snapshot: Rc<RefCell<T>>,
    on_change: Option<Rc<dyn Fn()>>,
    subscription: Option<Subscription>,
}

impl<S: 'static, T: Clone + 'static> Binding<S, T> {
    pub(crate) fn new(
        slice: Slice<S>,
        select: Selector<S, T>,
        policy: ChangePolicy<T>,
        key: Option<String>,
    ) -> Self {
        let initial = select(&*slice.read_state());
        Self {
            slice,
            select,
            policy,
            key,
            snapshot: Rc::new(RefCell::new(initial)),
            on_change: None,
            subscription: None,
        }
    }

    /// Current snapshot.
    #[must_use]
    pub fn get(&self) -> T {
        self.snapshot.borrow().clone()
    }

    /// Borrow the snapshot without cloning it.
    ///
    /// `f` must not publish into the slice this binding observes.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.snapshot.borrow())
    }

    /// Selector key, for bindings created with
    /// [`Slice::use_sub_keyed`].
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.subscription.is_some()
    }

    /// Subscribe and call `on_change` whenever the snapshot is replaced.
    ///
    /// If the state moved between creating the binding and attaching it,
    /// the snapshot is refreshed and `on_change` runs once right away.
    /// Attaching an attached binding replaces the previous callback.
    pub fn attach(&mut self, on_change: impl Fn() + 'static) {
        self.detach();
        let on_change: Rc<dyn Fn()> = Rc::new(on_change);
        self.on_change = Some(Rc::clone(&on_change));
        let baseline = self.subscribe();
        let stale = self.policy.should_notify(&self.snapshot.borrow(), &baseline);
        if stale {
            *self.snapshot.borrow_mut() = baseline;
            on_change();
        }
    }

    /// Unsubscribe. Returns `true` only if a registration was removed.
    pub fn detach(&mut self) -> bool {
        self.on_change = None;
        self.subscription
            .take()
            .is_some_and(|subscription| subscription.unsubscribe())
    }

    /// Switch to a new selector if `key` differs from the current key.
    ///
    /// Returns whether the selector changed.
    pub fn rekey(&mut self, key: impl Into<String>, select: impl Fn(&S) -> T + 'static) -> bool {
        let policy = self.policy.clone();
        self.rekey_with(key, select, policy)
    }

    /// [`rekey`](Self::rekey) with an explicit change policy.
    pub fn rekey_with(
        &mut self,
        key: impl Into<String>,
        select: impl Fn(&S) -> T + 'static,
        policy: ChangePolicy<T>,
    ) -> bool {
        let key = key.into();
        if self.key.as_deref() == Some(key.as_str()) {
            return false;
        }
        tracing::debug!(slice = %self.slice.label(), old = ?self.key, new = %key, "rekeying binding");
        self.key = Some(key);
        self.rebind(Rc::new(select), policy);
        true
    }

    /// Replace selector and policy, keeping attachment.
    pub(crate) fn rebind(&mut self, select: Selector<S, T>, policy: ChangePolicy<T>) {
        if let Some(old) = self.subscription.take() {
            old.unsubscribe();
        }
        self.select = select;
        self.policy = policy;
        if self.on_change.is_some() {
            let baseline = self.subscribe();
            *self.snapshot.borrow_mut() = baseline;
        } else {
            let fresh = (self.select)(&*self.slice.read_state());
            *self.snapshot.borrow_mut() = fresh;
        }
    }

    /// Register the current selector and return its baseline.
    fn subscribe(&mut self) -> T {
        let snapshot = Rc::clone(&self.snapshot);
        let on_change = self.on_change.clone();
        let callback = move |next: &T| {
            *snapshot.borrow_mut() = next.clone();
            if let Some(on_change) = &on_change {
                on_change();
            }
        };
        let (subscription, baseline) =
            self.slice
                .register(Rc::clone(&self.select), self.policy.clone(), Box::new(callback));
        self.subscription = Some(subscription);
        baseline
    }
}

impl<S: 'static, T: fmt::Debug + 'static> fmt::Debug for Binding<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("key", &self.key)
            .field("snapshot", &self.snapshot.borrow())
            .field("attached", &self.subscription.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Accessor
// ---------------------------------------------------------------------------

/// Typed access to a named subscription template.
pub struct Accessor<S: 'static, A: 'static, T: 'static> {
    name: Rc<str>,
    slice: Slice<S>,
    build: TemplateFn<S, A, T>,
}

impl<S: 'static, A: 'static, T: Clone + 'static> Accessor<S, A, T> {
    pub(crate) fn new(name: &str, slice: Slice<S>, build: TemplateFn<S, A, T>) -> Self {
        Self {
            name: Rc::from(name),
            slice,
            build,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build the template for `arg`.
    pub fn template(&self, arg: A) -> SubTemplate<S, T> {
        (self.build)(arg)
    }

    /// One-shot read of the projection for `arg`.
    pub fn read(&self, arg: A) -> T {
        let template = self.template(arg);
        template.select(&self.slice.get())
    }

    /// Subscription guard for `arg`.
    pub fn sub(&self, arg: A, callback: impl Fn(&T) + 'static) -> Subscription {
        let (select, policy) = self.template(arg).into_parts();
        self.slice.register(select, policy, Box::new(callback)).0
    }
}

impl<S: 'static, A: Clone + 'static, T: Clone + 'static> Accessor<S, A, T> {
    /// Binding for `arg`; re-key it later with
    /// [`AccessorBinding::set_arg`].
    pub fn bind(&self, arg: A) -> AccessorBinding<S, A, T> {
        let (select, policy) = self.template(arg.clone()).into_parts();
        AccessorBinding {
            binding: Binding::new(self.slice.clone(), select, policy, None),
            arg,
            build: Rc::clone(&self.build),
        }
    }
}

impl<S: 'static, A: 'static, T: 'static> Clone for Accessor<S, A, T> {
    fn clone(&self) -> Self {
        Self {
            name: Rc::clone(&self.name),
            slice: self.slice.clone(),
            build: Rc::clone(&self.build),
        }
    }
}

impl<S: 'static, A: 'static, T: 'static> fmt::Debug for Accessor<S, A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accessor").field("name", &self.name).finish()
    }
}

/// [`Binding`] created from a named template, keyed by its argument.
pub struct AccessorBinding<S: 'static, A: 'static, T: 'static> {
    binding: Binding<S, T>,
    arg: A,
    build: TemplateFn<S, A, T>,
}

impl<S: 'static, A: Clone + PartialEq + 'static, T: Clone + 'static> AccessorBinding<S, A, T> {
    #[must_use]
    pub fn arg(&self) -> &A {
        &self.arg
    }

    /// Re-key to `arg`. Same argument is a no-op; returns whether the
    /// selector changed.
    pub fn set_arg(&mut self, arg: A) -> bool {
        if arg == self.arg {
            return false;
        }
        let (select, policy) = (self.build)(arg.clone()).into_parts();
        self.arg = arg;
        self.binding.rebind(select, policy);
        true
    }
}

impl<S: 'static, A: 'static, T: 'static> Deref for AccessorBinding<S, A, T> {
    type Target = Binding<S, T>;

    fn deref(&self) -> &Self::Target {
        &self.binding
    }
}

impl<S: 'static, A: 'static, T: 'static> DerefMut for AccessorBinding<S, A, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.binding
    }
}

impl<S: 'static, A: fmt::Debug + 'static, T: fmt::Debug + 'static> fmt::Debug
    for AccessorBinding<S, A, T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessorBinding")
            .field("arg", &self.arg)
            .field("binding", &self.binding)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// BindingScope
// ---------------------------------------------------------------------------

/// Collects the subscriptions of one logical component.
///
/// Everything held is released when the scope is dropped or
/// [`clear`](Self::clear) is called, newest first.
///
/// ```ignore
/// let mut scope = BindingScope::new();
/// scope.subscribe(&slice, |s| s.counter, |v| println!("counter: {v}"));
/// scope.subscribe(&slice, |s| s.todos.len(), |n| println!("{n} todos"));
/// drop(scope); // both unsubscribed
/// ```
#[derive(Default)]
pub struct BindingScope {
    subscriptions: Vec<Subscription>,
}

impl BindingScope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `subscription` alive until the scope is released.
    pub fn hold(&mut self, subscription: Subscription) -> &mut Self {
        self.subscriptions.push(subscription);
        self
    }

    /// Subscribe with the default policy and hold the guard.
    pub fn subscribe<S: 'static, T: Clone + PartialEq + 'static>(
        &mut self,
        slice: &Slice<S>,
        select: impl Fn(&S) -> T + 'static,
        callback: impl Fn(&T) + 'static,
    ) -> &mut Self {
        self.hold(slice.sub(select, callback))
    }

    /// Subscribe with an explicit policy and hold the guard.
    pub fn subscribe_with<S: 'static, T: Clone + 'static>(
        &mut self,
        slice: &Slice<S>,
        select: impl Fn(&S) -> T + 'static,
        callback: impl Fn(&T) + 'static,
        policy: ChangePolicy<T>,
    ) -> &mut Self {
        self.hold(slice.sub_with(select, callback, policy))
    }

    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.subscriptions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Release everything now. The scope stays usable.
    pub fn clear(&mut self) {
        while let Some(subscription) = self.subscriptions.pop() {
            subscription.unsubscribe();
        }
    }
}

impl Drop for BindingScope {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for BindingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingScope")
            .field("binding_count", &self.subscriptions.len())
            .finish()
    }
}
