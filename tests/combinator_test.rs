use futures::executor::block_on;
use promise_kit::{serial_map_on, Error, Promise, QueueContext, Timer};
use std::{
    future::IntoFuture,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

mod _validator;
use _validator::Validator;

#[test]
fn test_race_between_delays() {
    let timer = Timer::spawn("race-timer").unwrap();
    let slow = Promise::delay_on(&timer, Duration::from_millis(80)).map(|()| "slow");
    let fast = Promise::delay_on(&timer, Duration::from_millis(10)).map(|()| "fast");
    let winner = block_on(Promise::race([slow, fast]).into_future()).unwrap();
    assert_eq!(winner, "fast");
}

#[test]
fn test_timeout_on_custom_timer() {
    let timer = Timer::spawn("timeout-timer").unwrap();
    let start = Instant::now();
    let timeout = Promise::<()>::timeout_on(&timer, Duration::from_millis(25));
    let outcome = block_on(timeout.into_future());
    assert!(outcome.unwrap_err().is_timeout());
    assert!(start.elapsed() >= Duration::from_millis(25));
}

#[test]
fn test_all_from_worker_threads() {
    let queue = QueueContext::concurrent("all-workers", 4).unwrap();
    let promises = (0..8u64).map(|n| {
        Promise::spawn(queue.clone(), move || {
            thread::sleep(Duration::from_millis(8 - n));
            Ok(n * n)
        })
    });
    let squares = block_on(Promise::all(promises).into_future()).unwrap();
    assert_eq!(squares, [0, 1, 4, 9, 16, 25, 36, 49]);
}

#[test]
fn test_retry_waits_between_attempts() {
    let calls = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let promise = Promise::retry(2, Duration::from_millis(20), {
        let calls = calls.clone();
        move || {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Promise::rejected(Error::Cancelled)
            } else {
                Promise::fulfilled("third time")
            }
        }
    });
    assert_eq!(block_on(promise.into_future()).unwrap(), "third time");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(start.elapsed() >= Duration::from_millis(40));
}

#[test]
fn test_serial_map_on_queue() {
    let queue = QueueContext::serial("serial-map").unwrap();
    let order = Arc::new(Validator::new());
    let lengths = serial_map_on(queue, ["one", "three", "five"], {
        let order = order.clone();
        move |word: &'static str| {
            order.push(thread::current().name().map(str::to_owned));
            Ok(Promise::fulfilled(word.len()))
        }
    });
    assert_eq!(block_on(lengths.into_future()).unwrap(), [3, 5, 4]);
    order.expect(std::iter::repeat(Some("serial-map-0".to_owned())).take(3));
}

#[test]
fn test_from_callback_on_thread() {
    let promise = Promise::from_callback(|done| {
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            done(Some(vec![1, 2]), None);
        });
        Ok(())
    });
    assert_eq!(block_on(promise.into_future()).unwrap(), [1, 2]);
}

#[test]
fn test_add_timeout_keeps_fast_result() {
    let queue = QueueContext::serial("add-timeout").unwrap();
    let promise = Promise::spawn(queue, || Ok(5)).add_timeout(Duration::from_secs(5));
    assert_eq!(block_on(promise.into_future()).unwrap(), 5);
}

#[test]
fn test_delay_survives_panicking_continuation() {
    let timer = Timer::spawn("panicking-continuation").unwrap();
    let _doomed = Promise::delay_on(&timer, Duration::from_millis(5)).map(|()| -> u8 {
        panic!("continuation failed")
    });
    let next = Promise::delay_on(&timer, Duration::from_millis(10))
        .add_timeout(Duration::from_secs(2));
    assert!(block_on(next.into_future()).is_ok());
}

#[test]
fn test_unbounded_durations_stay_pending() {
    let never = Promise::<()>::timeout(Duration::MAX);
    let sleeper = Promise::delay(Duration::MAX);
    assert!(never.is_pending());
    assert!(sleeper.is_pending());

    let quick = Promise::fulfilled(3).add_timeout(Duration::MAX);
    assert_eq!(quick.value(), Some(3));
}
