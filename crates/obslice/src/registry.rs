#![forbid(unsafe_code)]

//! Subscriber registry and the notify loop.
//!
//! # Design
//!
//! The registry is a flat map from [`SubscriptionId`] to a type-erased
//! record. Each record owns its selector, change policy, callback and its
//! private last-seen projection, so subscriptions with different projection
//! types live side by side and two subscriptions with identical selectors
//! stay independent.
//!
//! # Invariants
//!
//! 1. Ids are allocated monotonically and never reused within a registry.
//! 2. A record's baseline is captured before it becomes visible to the loop.
//! 3. `notify_all` iterates a snapshot, so callbacks may subscribe,
//!    unsubscribe or publish re-entrantly.
//! 4. A record removed mid-cycle is skipped for the rest of that cycle.
//! 5. When a record fires, `prev` is updated before the callback runs. A
//!    nested publish from inside the callback therefore compares against the
//!    value just delivered, and the outer cycle never overwrites a newer
//!    `prev` with an older one.
//!
//! # Failure Modes
//!
//! | Failure | Behavior |
//! |---------|----------|
//! | Selector panics | Logged, counted, `prev` untouched, loop continues |
//! | Callback panics | Logged, counted, `prev` already updated, loop continues |
//! | Remove twice | Second call returns `false` |

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use crate::cell::StateCell;
use crate::policy::ChangePolicy;

/// Identity of one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Raw numeric id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Type-erased view of a subscription record, as seen by the notify loop.
pub(crate) trait Subscriber<S> {
    fn id(&self) -> SubscriptionId;
    fn is_live(&self) -> bool;
    fn retire(&self);
    /// Re-run the selector; returns whether the callback fired.
    fn check(&self, state: &S, before_fire: &dyn Fn(&S)) -> bool;
}

pub(crate) type Selector<S, T> = Rc<dyn Fn(&S) -> T>;

struct Record<S, T> {
    id: SubscriptionId,
    select: Selector<S, T>,
    policy: ChangePolicy<T>,
    callback: Box<dyn Fn(&T)>,
    prev: RefCell<T>,
    live: Cell<bool>,
}

impl<S, T: Clone + 'static> Subscriber<S> for Record<S, T> {
    fn id(&self) -> SubscriptionId {
        self.id
    }

    fn is_live(&self) -> bool {
        self.live.get()
    }

    fn retire(&self) {
        self.live.set(false);
    }

    fn check(&self, state: &S, before_fire: &dyn Fn(&S)) -> bool {
        let next = (self.select)(state);
        let changed = self.policy.should_notify(&self.prev.borrow(), &next);
        if !changed {
            return false;
        }
        *self.prev.borrow_mut() = next.clone();
        before_fire(state);
        (self.callback)(&next);
        true
    }
}

/// Outcome of one notify cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CycleReport {
    pub(crate) fired: u64,
    pub(crate) panicked: u64,
}

/// Flat set of independent subscription records.
pub(crate) struct Registry<S> {
    entries: RefCell<BTreeMap<SubscriptionId, Rc<dyn Subscriber<S>>>>,
    next_id: Cell<u64>,
}

impl<S: 'static> Registry<S> {
    pub(crate) fn new() -> Self {
        Self {
            entries: RefCell::new(BTreeMap::new()),
            next_id: Cell::new(1),
        }
    }

    /// Register a subscription whose baseline is `baseline`.
    pub(crate) fn insert<T: Clone + 'static>(
        &self,
        select: Selector<S, T>,
        policy: ChangePolicy<T>,
        callback: Box<dyn Fn(&T)>,
        baseline: T,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(self.next_id.get() + 1);
        let record: Rc<dyn Subscriber<S>> = Rc::new(Record {
            id,
            select,
            policy,
            callback,
            prev: RefCell::new(baseline),
            live: Cell::new(true),
        });
        self.entries.borrow_mut().insert(id, record);
        id
    }

    /// Remove a record; `false` if it was already gone.
    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        let removed = self.entries.borrow_mut().remove(&id);
        match removed {
            Some(record) => {
                record.retire();
                true
            }
            None => false,
        }
    }

    pub(crate) fn contains(&self, id: SubscriptionId) -> bool {
        self.entries.borrow().contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Run one notify cycle against the state held by `cell`.
    ///
    /// Each subscriber reads the state current when its turn comes, so a
    /// nested publish earlier in the cycle is visible to later subscribers.
    pub(crate) fn notify_all(&self, cell: &StateCell<S>, before_fire: &dyn Fn(&S)) -> CycleReport {
        let snapshot: Vec<Rc<dyn Subscriber<S>>> = self.entries.borrow().values().cloned().collect();
        let mut report = CycleReport::default();
        for subscriber in snapshot {
            if !subscriber.is_live() {
                continue;
            }
            let state = cell.read();
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| subscriber.check(&state, before_fire)));
            match outcome {
                Ok(true) => report.fired += 1,
                Ok(false) => {}
                Err(payload) => {
                    report.panicked += 1;
                    tracing::error!(
                        subscription = %subscriber.id(),
                        panic = panic_message(payload.as_ref()),
                        "subscriber panicked during notify; skipping it for this cycle"
                    );
                }
            }
        }
        report
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        *msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "<non-string panic payload>"
    }
}

/// Removal side of a registry owner, erased over the state type.
pub(crate) trait Unsubscribe {
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
    fn is_subscribed(&self, id: SubscriptionId) -> bool;
}

/// RAII guard for one registration.
///
/// Dropping the guard unsubscribes. [`unsubscribe`](Self::unsubscribe) may be
/// called any number of times; only the first call has an effect.
/// [`detach`](Self::detach) gives up the guard and leaves the registration
/// live until [`Slice::unsubscribe`](crate::Slice::unsubscribe) is called
/// with the returned id or the slice is dropped.
#[must_use = "dropping a Subscription unsubscribes it"]
pub struct Subscription {
    id: SubscriptionId,
    owner: RefCell<Option<Weak<dyn Unsubscribe>>>,
}

impl Subscription {
    pub(crate) fn new(id: SubscriptionId, owner: Weak<dyn Unsubscribe>) -> Self {
        Self {
            id,
            owner: RefCell::new(Some(owner)),
        }
    }

    /// Id of the underlying registration.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Whether this guard still controls a registration.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.owner
            .borrow()
            .as_ref()
            .and_then(Weak::upgrade)
            .is_some_and(|owner| owner.is_subscribed(self.id))
    }

    /// Stop notifications. Safe to call repeatedly.
    ///
    /// Returns `true` only for the call that actually removed the
    /// registration.
    pub fn unsubscribe(&self) -> bool {
        let owner = self.owner.borrow_mut().take();
        owner
            .and_then(|owner| owner.upgrade())
            .is_some_and(|owner| owner.unsubscribe(self.id))
    }

    /// Keep the registration alive without this guard.
    pub fn detach(self) -> SubscriptionId {
        self.owner.borrow_mut().take();
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_registry() -> (StateCell<i32>, Registry<i32>) {
        (StateCell::new(0), Registry::new())
    }

    fn recorder() -> (Rc<RefCell<Vec<i32>>>, Box<dyn Fn(&i32)>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        (seen, Box::new(move |v: &i32| sink.borrow_mut().push(*v)))
    }

    #[test]
    fn ids_are_monotonic_and_distinct() {
        let (_, registry) = counter_registry();
        let select: Selector<i32, i32> = Rc::new(|s| *s);
        let a = registry.insert(Rc::clone(&select), ChangePolicy::changed(), Box::new(|_| {}), 0);
        let b = registry.insert(select, ChangePolicy::changed(), Box::new(|_| {}), 0);
        assert!(a < b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn fires_only_when_policy_says_changed() {
        let (cell, registry) = counter_registry();
        let (seen, callback) = recorder();
        registry.insert(Rc::new(|s: &i32| *s / 10), ChangePolicy::changed(), callback, 0);

        cell.commit(5);
        registry.notify_all(&cell, &|_| {});
        cell.commit(12);
        let report = registry.notify_all(&cell, &|_| {});

        assert_eq!(*seen.borrow(), vec![1]);
        assert_eq!(report.fired, 1);
    }

    #[test]
    fn remove_is_idempotent_and_stops_delivery() {
        let (cell, registry) = counter_registry();
        let (seen, callback) = recorder();
        let id = registry.insert(Rc::new(|s: &i32| *s), ChangePolicy::changed(), callback, 0);

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(!registry.contains(id));

        cell.commit(1);
        registry.notify_all(&cell, &|_| {});
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn panicking_selector_is_isolated() {
        let (cell, registry) = counter_registry();
        let (seen, callback) = recorder();
        registry.insert(
            Rc::new(|s: &i32| {
                assert!(*s < 1, "selector rejects positive state");
                *s
            }),
            ChangePolicy::changed(),
            Box::new(|_| {}),
            0,
        );
        registry.insert(Rc::new(|s: &i32| *s), ChangePolicy::changed(), callback, 0);

        cell.commit(1);
        let report = registry.notify_all(&cell, &|_| {});

        assert_eq!(report, CycleReport { fired: 1, panicked: 1 });
        assert_eq!(*seen.borrow(), vec![1]);
    }

    #[test]
    fn before_fire_sees_current_state() {
        let (cell, registry) = counter_registry();
        registry.insert(Rc::new(|s: &i32| *s), ChangePolicy::changed(), Box::new(|_| {}), 0);
        let logged = Rc::new(Cell::new(-1));
        let sink = Rc::clone(&logged);

        cell.commit(9);
        registry.notify_all(&cell, &move |s| sink.set(*s));
        assert_eq!(logged.get(), 9);
    }

    struct Owner(Registry<i32>);

    impl Unsubscribe for Owner {
        fn unsubscribe(&self, id: SubscriptionId) -> bool {
            self.0.remove(id)
        }

        fn is_subscribed(&self, id: SubscriptionId) -> bool {
            self.0.contains(id)
        }
    }

    #[test]
    fn guard_unsubscribes_on_drop() {
        let owner = Rc::new(Owner(Registry::new()));
        let id = owner
            .0
            .insert(Rc::new(|s: &i32| *s), ChangePolicy::changed(), Box::new(|_| {}), 0);
        let weak: Weak<Owner> = Rc::downgrade(&owner);
        let weak: Weak<dyn Unsubscribe> = weak;
        {
            let guard = Subscription::new(id, weak);
            assert!(guard.is_active());
        }
        assert_eq!(owner.0.len(), 0);
    }

    #[test]
    fn guard_unsubscribe_twice() {
        let owner = Rc::new(Owner(Registry::new()));
        let id = owner
            .0
            .insert(Rc::new(|s: &i32| *s), ChangePolicy::changed(), Box::new(|_| {}), 0);
        let weak: Weak<Owner> = Rc::downgrade(&owner);
        let weak: Weak<dyn Unsubscribe> = weak;
        let guard = Subscription::new(id, weak);
        assert!(guard.unsubscribe());
        assert!(!guard.unsubscribe());
        assert!(!guard.is_active());
    }

    #[test]
    fn detached_guard_leaves_registration() {
        let owner = Rc::new(Owner(Registry::new()));
        let id = owner
            .0
            .insert(Rc::new(|s: &i32| *s), ChangePolicy::changed(), Box::new(|_| {}), 0);
        let weak: Weak<Owner> = Rc::downgrade(&owner);
        let weak: Weak<dyn Unsubscribe> = weak;
        let detached = Subscription::new(id, weak).detach();
        assert_eq!(detached, id);
        assert!(owner.0.contains(id));
    }

    #[test]
    fn display_id() {
        let (_, registry) = counter_registry();
        let id = registry.insert(Rc::new(|s: &i32| *s), ChangePolicy::changed(), Box::new(|_| {}), 0);
        assert_eq!(id.to_string(), "sub#1");
        assert_eq!(id.get(), 1);
    }
}
