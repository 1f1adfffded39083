//! Notification timing: debounce, coalesce, batches, custom middleware,
//! and how the notify loop behaves under re-entrancy and failure.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use obslice::{Notify, NotifyConfig, Slice, SliceError, SliceEvent, TaskQueue};

fn recorder<T: Clone + 'static>() -> (Rc<RefCell<Vec<T>>>, impl Fn(&T) + 'static) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    (seen, move |v: &T| sink.borrow_mut().push(v.clone()))
}

#[derive(Debug, thiserror::Error)]
#[error("balance would go negative")]
struct Overdrawn;

#[test]
fn debounce_burst_yields_one_cycle_with_last_state() {
    let queue = TaskQueue::manual();
    let slice = Slice::builder(0u32)
        .debounce(&queue, Duration::from_millis(50))
        .build();
    let (seen, callback) = recorder::<u32>();
    let _sub = slice.sub(|s| *s, callback);

    for _ in 0..10 {
        slice.pub_replace(|s| s + 1);
        queue.advance(Duration::from_millis(10));
    }
    assert!(seen.borrow().is_empty());
    assert_eq!(*slice.get(), 10, "commits are never deferred");

    queue.advance(Duration::from_millis(50));
    assert_eq!(*seen.borrow(), vec![10]);
    assert_eq!(slice.stats().notify_cycles, 1);
    assert!(queue.is_empty());
}

#[test]
fn debounce_separate_bursts_notify_separately() {
    let queue = TaskQueue::manual();
    let slice = Slice::builder(0u32)
        .debounce(&queue, Duration::from_millis(20))
        .build();
    let (seen, callback) = recorder::<u32>();
    let _sub = slice.sub(|s| *s, callback);

    slice.pub_replace(|s| s + 1);
    slice.pub_replace(|s| s + 1);
    queue.advance(Duration::from_millis(25));
    slice.pub_replace(|s| s + 1);
    queue.advance(Duration::from_millis(25));

    assert_eq!(*seen.borrow(), vec![2, 3]);
}

#[test]
fn coalesce_collapses_until_queue_drains() {
    let queue = TaskQueue::manual();
    let slice = Slice::builder(0u32).coalesce(&queue).build();
    let (seen, callback) = recorder::<u32>();
    let _sub = slice.sub(|s| *s, callback);

    for _ in 0..5 {
        slice.pub_replace(|s| s + 1);
    }
    assert!(seen.borrow().is_empty());
    assert_eq!(queue.run_due(), 1);
    assert_eq!(*seen.borrow(), vec![5]);

    slice.pub_replace(|s| s + 1);
    queue.run_due();
    assert_eq!(*seen.borrow(), vec![5, 6]);
}

#[test]
fn config_selects_strategy() {
    let queue = TaskQueue::manual();
    let config = NotifyConfig::debounce(Duration::from_millis(30)).with_label("configured");
    let slice = Slice::builder(0u32).config(&config, &queue).unwrap().build();
    let (seen, callback) = recorder::<u32>();
    let _sub = slice.sub(|s| *s, callback);

    slice.pub_replace(|s| s + 1);
    queue.advance(Duration::from_millis(29));
    assert!(seen.borrow().is_empty());
    queue.advance(Duration::from_millis(1));
    assert_eq!(*seen.borrow(), vec![1]);
    assert_eq!(slice.label(), "configured");
}

#[test]
fn invalid_config_is_rejected_by_builder() {
    let queue = TaskQueue::manual();
    let config = NotifyConfig::debounce(Duration::ZERO);
    let err = Slice::builder(0u32).config(&config, &queue).unwrap_err();
    assert!(matches!(err, SliceError::Config(_)));
    assert!(queue.is_empty());
}

#[test]
fn closure_middleware_wraps_trigger() {
    let triggers = Rc::new(Cell::new(0));
    let t = Rc::clone(&triggers);
    let slice = Slice::builder(0u32)
        .notify_middleware(move |fire: Notify| -> Notify {
            let t = Rc::clone(&t);
            Rc::new(move || {
                t.set(t.get() + 1);
                fire();
            })
        })
        .build();
    let (seen, callback) = recorder::<u32>();
    let _sub = slice.sub(|s| *s, callback);

    slice.pub_replace(|s| s + 1);
    slice.pub_replace(|s| s + 1);
    assert_eq!(triggers.get(), 2);
    assert_eq!(*seen.borrow(), vec![1, 2]);
}

#[test]
fn nested_batches_release_at_outermost() {
    let slice = Slice::new(0u32);
    let (seen, callback) = recorder::<u32>();
    let _sub = slice.sub(|s| *s, callback);

    {
        let outer = slice.batch();
        slice.pub_replace(|s| s + 1);
        {
            let inner = slice.batch();
            assert_eq!(inner.depth(), 2);
            slice.pub_replace(|s| s + 1);
        }
        assert!(seen.borrow().is_empty());
        assert_eq!(outer.depth(), 1);
        slice.pub_replace(|s| s + 1);
    }
    assert_eq!(*seen.borrow(), vec![3]);
}

#[test]
fn notify_now_bypasses_middleware() {
    let queue = TaskQueue::manual();
    let slice = Slice::builder(0u32)
        .debounce(&queue, Duration::from_secs(1))
        .build();
    let (seen, callback) = recorder::<u32>();
    let _sub = slice.sub(|s| *s, callback);

    slice.pub_replace(|_| 7);
    slice.notify_now();
    assert_eq!(*seen.borrow(), vec![7]);

    // The debounced cycle still runs later but finds nothing new.
    queue.advance(Duration::from_secs(1));
    assert_eq!(*seen.borrow(), vec![7]);
}

#[test]
fn nested_publish_delivers_latest_state_to_later_subscribers() {
    let slice = Slice::new(0u32);
    let weak = slice.downgrade();
    let _clamp = slice.sub(
        |s| *s,
        move |v| {
            if *v % 2 == 1 {
                if let Some(slice) = weak.upgrade() {
                    slice.pub_replace(|s| s + 1);
                }
            }
        },
    );
    let (seen, callback) = recorder::<u32>();
    let _observer = slice.sub(|s| *s, callback);

    slice.pub_replace(|s| s + 1);
    slice.pub_replace(|s| s + 2);

    assert_eq!(*slice.get(), 4);
    assert_eq!(*seen.borrow(), vec![2, 4]);
}

#[test]
fn panicking_subscriber_is_isolated() {
    let slice = Slice::new(0u32);
    let (before, cb_before) = recorder::<u32>();
    let _before = slice.sub(|s| *s, cb_before);
    let _boom = slice.sub(
        |s| *s,
        |v| {
            assert!(*v < 2, "subscriber rejects {v}");
        },
    );
    let (after, cb_after) = recorder::<u32>();
    let _after = slice.sub(|s| *s, cb_after);

    slice.pub_replace(|s| s + 1);
    slice.pub_replace(|s| s + 1);
    slice.pub_replace(|s| s + 1);

    assert_eq!(*before.borrow(), vec![1, 2, 3]);
    assert_eq!(*after.borrow(), vec![1, 2, 3]);
    assert_eq!(slice.stats().subscriber_panics, 2);
    assert_eq!(slice.subscriber_count(), 3);
}

#[test]
fn failed_mutation_commits_nothing() {
    let slice = Slice::builder(5i64)
        .try_edit_publisher("withdraw", |balance: &mut i64, amount: i64| {
            *balance -= amount;
            if *balance < 0 { Err(Overdrawn) } else { Ok(()) }
        })
        .build();
    let (seen, callback) = recorder::<i64>();
    let _sub = slice.sub(|s| *s, callback);

    slice.publish("withdraw", 3i64).unwrap();
    let err = slice.publish("withdraw", 3i64).unwrap_err();

    assert!(matches!(err, SliceError::Mutation { ref publisher, .. } if publisher == "withdraw"));
    assert_eq!(*slice.get(), 2);
    assert_eq!(*seen.borrow(), vec![2]);
    assert_eq!(slice.version(), 1);
}

#[test]
fn failed_mutation_inside_debounce_schedules_nothing() {
    let queue = TaskQueue::manual();
    let slice = Slice::builder(0i64)
        .debounce(&queue, Duration::from_millis(10))
        .try_publisher("set", |_: &i64, v: i64| if v < 0 { Err(Overdrawn) } else { Ok(v) })
        .build();

    assert!(slice.publish("set", -1i64).is_err());
    assert!(queue.is_empty());
}

#[test]
fn panicking_logger_does_not_swallow_delivery() {
    let slice = Slice::builder(0u32)
        .logger(|event, state: &u32| {
            assert!(
                !(event == SliceEvent::NotifySub && *state == 1),
                "logger rejects the first delivery"
            );
        })
        .build();
    let (seen, callback) = recorder::<u32>();
    let _sub = slice.sub(|s| *s, callback);

    slice.pub_replace(|_| 1);
    slice.notify_now();
    slice.pub_replace(|_| 2);

    assert_eq!(*seen.borrow(), vec![1, 2]);
    assert_eq!(slice.stats().subscriber_panics, 0);
}

#[test]
fn panicking_on_pub_hook_still_commits_and_notifies() {
    let slice = Slice::builder(0u32)
        .publisher("set", |_: &u32, v: u32| v)
        .on_pub(|state: &u32| assert_ne!(*state, 1, "hook rejects 1"))
        .build();
    let (seen, callback) = recorder::<u32>();
    let _sub = slice.sub(|s| *s, callback);

    slice.publish("set", 1u32).unwrap();
    slice.publish("set", 2u32).unwrap();

    assert_eq!(*slice.get(), 2);
    assert_eq!(*seen.borrow(), vec![1, 2]);
    assert_eq!(slice.stats().publishes, 2);
}
