//! Property tests for the publish path and the notify loop.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use obslice::{ChangePolicy, Slice, TaskQueue};
use proptest::prelude::*;

fn recorder<T: Clone + 'static>() -> (Rc<RefCell<Vec<T>>>, impl Fn(&T) + 'static) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    (seen, move |v: &T| sink.borrow_mut().push(v.clone()))
}

proptest! {
    #[test]
    fn state_equals_fold_of_mutations(steps in prop::collection::vec(-1000i64..1000, 0..64)) {
        let slice = Slice::builder(0i64)
            .publisher("add", |s: &i64, by: i64| s + by)
            .build();
        for step in &steps {
            slice.publish("add", *step).unwrap();
        }
        prop_assert_eq!(*slice.get(), steps.iter().sum::<i64>());
        prop_assert_eq!(slice.version(), steps.len() as u64);
    }

    #[test]
    fn callback_fires_iff_projection_changes(
        steps in prop::collection::vec(0i64..20, 1..64),
        modulus in 1i64..7,
    ) {
        let slice = Slice::new(0i64);
        let (seen, callback) = recorder::<i64>();
        let _sub = slice.sub(move |s| s % modulus, callback);

        let mut expected = Vec::new();
        let mut prev = 0;
        let mut state = 0;
        for step in &steps {
            state += step;
            slice.pub_replace(|s| s + step);
            let next = state % modulus;
            if next != prev {
                expected.push(next);
                prev = next;
            }
        }
        prop_assert_eq!(&*seen.borrow(), &expected);
    }

    #[test]
    fn custom_policy_is_consulted_with_prev_and_next(
        steps in prop::collection::vec(1i64..10, 1..32),
        threshold in 1i64..20,
    ) {
        let slice = Slice::new(0i64);
        let (seen, callback) = recorder::<i64>();
        let policy = ChangePolicy::from_fn(move |prev: &i64, next: &i64| next - prev >= threshold);
        let _sub = slice.sub_with(|s| *s, callback, policy);

        let mut expected = Vec::new();
        let mut prev = 0;
        let mut state = 0;
        for step in &steps {
            state += step;
            slice.pub_replace(|s| s + step);
            if state - prev >= threshold {
                expected.push(state);
                prev = state;
            }
        }
        prop_assert_eq!(&*seen.borrow(), &expected);
    }

    #[test]
    fn identical_selectors_stay_independent(steps in prop::collection::vec(0u8..4, 1..32)) {
        let slice = Slice::new(0u32);
        let (first, cb1) = recorder::<u32>();
        let (second, cb2) = recorder::<u32>();
        let sub1 = slice.sub(|s| *s / 3, cb1);
        let _sub2 = slice.sub(|s| *s / 3, cb2);

        for (i, step) in steps.iter().enumerate() {
            if i == steps.len() / 2 {
                sub1.unsubscribe();
            }
            slice.pub_replace(|s| s + u32::from(*step));
        }

        let first = first.borrow();
        let second = second.borrow();
        prop_assert!(first.len() <= second.len());
        prop_assert_eq!(&second[..first.len()], &first[..]);
        prop_assert_eq!(slice.subscriber_count(), 1);
    }

    #[test]
    fn debounce_delivers_state_at_each_quiet_gap(gaps in prop::collection::vec(0u64..40, 1..24)) {
        const WINDOW: u64 = 16;
        let queue = TaskQueue::manual();
        let slice = Slice::builder(0u32)
            .debounce(&queue, Duration::from_millis(WINDOW))
            .build();
        let (seen, callback) = recorder::<u32>();
        let _sub = slice.sub(|s| *s, callback);

        let mut expected = Vec::new();
        for (i, gap) in gaps.iter().enumerate() {
            slice.pub_replace(|s| s + 1);
            queue.advance(Duration::from_millis(*gap));
            if *gap >= WINDOW {
                expected.push(i as u32 + 1);
            }
        }
        queue.advance(Duration::from_millis(WINDOW));
        if gaps.last().is_some_and(|gap| *gap < WINDOW) {
            expected.push(gaps.len() as u32);
        }

        prop_assert_eq!(&*seen.borrow(), &expected);
        prop_assert_eq!(*slice.get(), gaps.len() as u32);
    }
}
