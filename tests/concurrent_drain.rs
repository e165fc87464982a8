use latest_relay::testing::{range, DirectSource, TestSubscriber};
use latest_relay::{LatestRelay, Publisher, PublisherExt, Subscriber, Subscription};
use rand::Rng;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const PRODUCED: u64 = 200_000;

#[test]
fn test_concurrent_next_and_request_never_overlap() {
    let source = DirectSource::<u64>::new();
    let ts = TestSubscriber::<u64>::new(0);
    source.clone().on_backpressure_latest().subscribe(ts.clone());

    let producer = {
        let source = source.clone();
        thread::spawn(move || {
            for i in 1..=PRODUCED {
                source.next(i);
            }
            source.complete();
        })
    };

    let requesters: Vec<_> = (0..4)
        .map(|_| {
            let ts = ts.clone();
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                let deadline = Instant::now() + Duration::from_secs(10);
                while ts.terminal().is_none() && Instant::now() < deadline {
                    ts.request(rng.gen_range(1..=8));
                    if rng.gen_bool(0.1) {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();

    producer.join().expect("producer panicked");
    for requester in requesters {
        requester.join().expect("requester panicked");
    }

    assert!(ts.is_complete(), "relay should have completed");
    assert_eq!(ts.overlaps(), 0, "callbacks overlapped");
    assert_eq!(ts.terminal_count(), 1);

    let values = ts.values();
    assert!(!values.is_empty());
    assert!(
        values.windows(2).all(|w| w[0] < w[1]),
        "values must be delivered at most once and in arrival order"
    );
    assert_eq!(*values.last().expect("non-empty"), PRODUCED);
}

#[test]
fn test_many_producers_deliver_each_value_at_most_once() {
    let ts = TestSubscriber::<u64>::new(0);
    let relay = LatestRelay::new(ts.clone());
    relay.on_subscribe(DirectSource::<u64>::new().handle());

    let producers: Vec<_> = (0..4u64)
        .map(|p| {
            let relay = relay.clone();
            thread::spawn(move || {
                for i in 0..50_000u64 {
                    relay.on_next(p * 1_000_000 + i);
                }
            })
        })
        .collect();

    let consumer = {
        let relay = relay.clone();
        thread::spawn(move || {
            for _ in 0..50_000 {
                relay.request(1);
            }
        })
    };

    for producer in producers {
        producer.join().expect("producer panicked");
    }
    consumer.join().expect("consumer panicked");

    assert_eq!(ts.overlaps(), 0);

    let mut values = ts.values();
    let delivered = values.len();
    assert!(delivered <= 50_000, "never more than requested");
    values.sort_unstable();
    values.dedup();
    assert_eq!(values.len(), delivered, "no value delivered twice");
}

#[test]
fn test_cancel_race_is_final() {
    for _ in 0..50 {
        let source = DirectSource::<u32>::new();
        let ts = TestSubscriber::<u32>::unbounded();
        let relay = LatestRelay::new(ts.clone());
        source.subscribe(relay.clone());

        let producer = {
            let relay = relay.clone();
            thread::spawn(move || {
                for i in 0..10_000u32 {
                    relay.on_next(i);
                }
            })
        };
        let canceller = {
            let relay = relay.clone();
            thread::spawn(move || {
                thread::yield_now();
                relay.cancel();
            })
        };

        producer.join().expect("producer panicked");
        canceller.join().expect("canceller panicked");

        assert!(source.is_cancelled());
        assert!(!relay.has_pending(), "cancel must release the pending value");

        let seen = ts.value_count();
        relay.on_next(99_999);
        relay.request(1);
        relay.on_complete();
        assert_eq!(ts.value_count(), seen);
        assert!(ts.terminal().is_none());
        assert_eq!(ts.overlaps(), 0);
    }
}

#[test]
fn test_backpressured_range_across_threads() {
    let ts = TestSubscriber::<u64>::new(0);
    let publisher = range(1, 1_000_000).on_backpressure_latest();

    let subscriber = ts.clone();
    let producer = thread::spawn(move || publisher.subscribe(subscriber));

    let deadline = Instant::now() + Duration::from_secs(20);
    while ts.terminal().is_none() && Instant::now() < deadline {
        ts.request(10);
    }
    producer.join().expect("producer panicked");

    assert!(ts.is_complete());
    assert!(ts.error().is_none());
    assert_eq!(ts.overlaps(), 0);

    let values = ts.values();
    assert!(values.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(values.last().copied(), Some(1_000_000));
}

#[test]
fn test_self_feeding_recursion_terminates() {
    // Each delivered value triggers a new emission and a new request from
    // inside on_next; the drain loop must unroll this iteratively.
    let source = DirectSource::<u32>::new();
    let feeder = source.clone();
    let cell: Arc<parking_lot::Mutex<Option<Arc<dyn Subscription>>>> =
        Arc::new(parking_lot::Mutex::new(None));
    let handle = cell.clone();

    let ts = TestSubscriber::with_on_next(0, move |v: &u32| {
        if *v < 100_000 {
            feeder.next(v + 1);
            let subscription = handle.lock().clone();
            if let Some(subscription) = subscription {
                subscription.request(1);
            }
        } else {
            feeder.complete();
        }
    });
    source.clone().on_backpressure_latest().subscribe(ts.clone());
    *cell.lock() = ts.subscription();

    source.next(0);
    ts.request(1);

    assert!(ts.is_complete());
    assert_eq!(ts.value_count(), 100_001);
    assert_eq!(ts.overlaps(), 0);
    cell.lock().take();
}
