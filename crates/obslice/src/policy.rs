#![forbid(unsafe_code)]

//! Change policies: per-subscription predicates deciding whether a new
//! projection counts as "changed".
//!
//! The default policy is plain inequality (`prev != next`). Projections that
//! are `Rc` aggregates produced by a structural-sharing update can use
//! [`ChangePolicy::identity`] instead, which only compares pointers.
//!
//! Policies must be pure: they see the previous projection by reference
//! while the notify loop holds it.

use std::rc::Rc;

/// Predicate `(prev, next) -> bool`; `true` means notify.
pub struct ChangePolicy<T> {
    check: Rc<dyn Fn(&T, &T) -> bool>,
}

impl<T> Clone for ChangePolicy<T> {
    fn clone(&self) -> Self {
        Self {
            check: Rc::clone(&self.check),
        }
    }
}

impl<T> std::fmt::Debug for ChangePolicy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangePolicy").finish_non_exhaustive()
    }
}

impl<T: 'static> ChangePolicy<T> {
    /// Build a policy from an arbitrary predicate.
    pub fn from_fn(check: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self {
            check: Rc::new(check),
        }
    }

    /// Notify on every cycle, even when nothing changed.
    #[must_use]
    pub fn always() -> Self {
        Self::from_fn(|_, _| true)
    }

    /// Never notify.
    #[must_use]
    pub fn never() -> Self {
        Self::from_fn(|_, _| false)
    }

    /// Evaluate the policy.
    #[must_use]
    pub fn should_notify(&self, prev: &T, next: &T) -> bool {
        (self.check)(prev, next)
    }
}

impl<T: PartialEq + 'static> ChangePolicy<T> {
    /// Notify when `prev != next`.
    #[must_use]
    pub fn changed() -> Self {
        Self::from_fn(|prev, next| prev != next)
    }
}

impl<T: PartialEq + 'static> Default for ChangePolicy<T> {
    fn default() -> Self {
        Self::changed()
    }
}

impl<U: 'static> ChangePolicy<Rc<U>> {
    /// Notify when the projection is a different allocation.
    #[must_use]
    pub fn identity() -> Self {
        Self::from_fn(|prev, next| !Rc::ptr_eq(prev, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_inequality() {
        let policy = ChangePolicy::<i32>::default();
        assert!(!policy.should_notify(&1, &1));
        assert!(policy.should_notify(&1, &2));
    }

    #[test]
    fn always_and_never() {
        assert!(ChangePolicy::<u8>::always().should_notify(&0, &0));
        assert!(!ChangePolicy::<u8>::never().should_notify(&0, &1));
    }

    #[test]
    fn threshold_policy() {
        // Only values that are not a multiple of five notify.
        let policy = ChangePolicy::from_fn(|_: &u32, next: &u32| next % 5 != 0);
        assert!(policy.should_notify(&3, &4));
        assert!(!policy.should_notify(&4, &5));
    }

    #[test]
    fn identity_ignores_structural_equality() {
        let policy = ChangePolicy::<Rc<Vec<u8>>>::identity();
        let a = Rc::new(vec![1]);
        let b = Rc::new(vec![1]);
        assert!(policy.should_notify(&a, &b));
        assert!(!policy.should_notify(&a, &Rc::clone(&a)));
    }

    #[test]
    fn clones_share_predicate() {
        let policy = ChangePolicy::from_fn(|a: &String, b: &String| a.len() != b.len());
        let copy = policy.clone();
        assert!(copy.should_notify(&"a".into(), &"ab".into()));
        assert!(!copy.should_notify(&"a".into(), &"b".into()));
    }
}
