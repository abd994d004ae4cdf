//! End-to-end fairness scenarios from the design docs, run synchronously:
//! each request's `on_dispatch` stashes its token in a shared pending list,
//! and the harness releases it (via `notify_requests_finished`) right after
//! each dispatch pass, simulating work that completes as fast as it starts.
//! With `capacity == 1` this serializes dispatch one request at a time,
//! which is what the scenarios assume ("dispatching N with cooperative
//! yields").

use std::cell::RefCell;
use std::rc::Rc;

use fairway_queue::{ClassHandle, FairQueue, InFlightToken};

type Pending = Rc<RefCell<Vec<InFlightToken>>>;

fn enqueue_n(queue: &mut FairQueue<()>, class: ClassHandle, weight: u64, count: usize, pending: &Pending) {
    for _ in 0..count {
        let pending = Rc::clone(pending);
        queue
            .queue(class, weight, None, (), move |dispatched| {
                pending.borrow_mut().push(dispatched.token);
            })
            .unwrap();
    }
}

/// Run `passes` dispatch/complete cycles. With `capacity == 1` each pass
/// admits exactly one request (if any are queued) and releases it before
/// the next pass begins.
fn run(queue: &mut FairQueue<()>, pending: &Pending, passes: usize) {
    for _ in 0..passes {
        queue.dispatch_requests();
        if let Some(token) = pending.borrow_mut().pop() {
            queue.notify_requests_finished(token);
        }
    }
}

#[test]
fn equal_shares_equal_weight_splits_evenly() {
    let mut queue: FairQueue<()> = FairQueue::new(1);
    let pending = Rc::new(RefCell::new(Vec::new()));
    let a = queue.register_class(10).unwrap();
    let b = queue.register_class(10).unwrap();
    enqueue_n(&mut queue, a, 1, 100, &pending);
    enqueue_n(&mut queue, b, 1, 100, &pending);

    run(&mut queue, &pending, 100);

    let served_a = queue.stats(a).unwrap().served;
    let served_b = queue.stats(b).unwrap().served;
    assert!(
        served_a.abs_diff(served_b) <= 1,
        "served_a={served_a} served_b={served_b}"
    );
}

#[test]
fn doubled_shares_doubles_throughput() {
    let mut queue: FairQueue<()> = FairQueue::new(1);
    let pending = Rc::new(RefCell::new(Vec::new()));
    let a = queue.register_class(10).unwrap();
    let b = queue.register_class(20).unwrap();
    enqueue_n(&mut queue, a, 1, 100, &pending);
    enqueue_n(&mut queue, b, 1, 100, &pending);

    run(&mut queue, &pending, 100);

    let served_a = queue.stats(a).unwrap().served as f64;
    let served_b = queue.stats(b).unwrap().served as f64;
    let ratio = served_b / served_a;
    assert!((1.9..=2.1).contains(&ratio), "ratio={ratio}");
}

#[test]
fn doubled_weight_halves_throughput() {
    let mut queue: FairQueue<()> = FairQueue::new(1);
    let pending = Rc::new(RefCell::new(Vec::new()));
    let a = queue.register_class(10).unwrap();
    let b = queue.register_class(10).unwrap();
    enqueue_n(&mut queue, a, 2, 100, &pending);
    enqueue_n(&mut queue, b, 1, 100, &pending);

    run(&mut queue, &pending, 100);

    let served_a = queue.stats(a).unwrap().served as f64;
    let served_b = queue.stats(b).unwrap().served as f64;
    let ratio = served_b / served_a;
    assert!((1.9..=2.1).contains(&ratio), "ratio={ratio}");
}

#[test]
fn idle_class_is_forgiven_on_reentry() {
    let mut queue: FairQueue<()> = FairQueue::new(1);
    let pending = Rc::new(RefCell::new(Vec::new()));
    let a = queue.register_class(10).unwrap();
    let b = queue.register_class(10).unwrap();

    enqueue_n(&mut queue, b, 1, 100, &pending);
    run(&mut queue, &pending, 100);
    assert_eq!(queue.stats(b).unwrap().queued, 0);
    assert_eq!(queue.stats(b).unwrap().in_flight, 0);

    enqueue_n(&mut queue, a, 1, 100, &pending);
    enqueue_n(&mut queue, b, 1, 100, &pending);
    run(&mut queue, &pending, 100);

    let served_a = queue.stats(a).unwrap().served;
    let served_b = queue.stats(b).unwrap().served;
    assert!(
        served_a.abs_diff(served_b) <= 1,
        "served_a={served_a} served_b={served_b}"
    );
}

#[test]
fn share_swap_mid_run_converges_to_new_ratio() {
    let mut queue: FairQueue<()> = FairQueue::new(1);
    let pending = Rc::new(RefCell::new(Vec::new()));
    let a = queue.register_class(20).unwrap();
    let b = queue.register_class(10).unwrap();
    enqueue_n(&mut queue, a, 1, 500, &pending);
    enqueue_n(&mut queue, b, 1, 500, &pending);

    run(&mut queue, &pending, 250);
    queue.update_shares(a, 10).unwrap();
    queue.update_shares(b, 20).unwrap();
    run(&mut queue, &pending, 250);

    let served_a = queue.stats(a).unwrap().served;
    let served_b = queue.stats(b).unwrap().served;
    assert!(
        served_a.abs_diff(served_b) <= 2,
        "served_a={served_a} served_b={served_b}"
    );
}

#[test]
fn panicking_on_dispatch_is_captured_and_cost_is_released() {
    let mut queue: FairQueue<()> = FairQueue::new(1);
    let a = queue.register_class(10).unwrap();
    queue
        .queue(a, 1, Some("boom".to_string()), (), |_dispatched| {
            panic!("handler blew up");
        })
        .unwrap();

    queue.dispatch_requests();

    let stats = queue.stats(a).unwrap();
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.in_flight, 0);

    // The window should be free again, not stuck holding the failed
    // request's cost.
    queue.queue(a, 1, None, (), |_| {}).unwrap();
    queue.dispatch_requests();
    assert_eq!(queue.stats(a).unwrap().served, 2);
}
