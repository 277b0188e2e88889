//! Property-based invariant tests for promises and their combinators.
//!
//! 1. Only the first resolution attempt takes effect
//! 2. `all` preserves input order, whatever the settlement order
//! 3. `race` adopts the first settlement
//! 4. `retry` calls its generator at most `count + 1` times
//! 5. `serial_map` transforms items strictly in order

use futures::executor::block_on;
use parking_lot::Mutex;
use promise_kit::{serial_map, Error, Promise};
use proptest::prelude::*;
use std::{
    future::IntoFuture,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

// ── Helpers ──────────────────────────────────────────────────────────

fn arb_outcome() -> impl Strategy<Value = Result<i32, u8>> {
    prop_oneof![any::<i32>().prop_map(Ok), any::<u8>().prop_map(Err)]
}

fn arb_order(max: usize) -> impl Strategy<Value = Vec<usize>> {
    (1..=max).prop_flat_map(|len| Just((0..len).collect::<Vec<_>>()).prop_shuffle())
}

fn to_outcome(outcome: Result<i32, u8>) -> promise_kit::Outcome<i32> {
    outcome.map_err(|code| Error::unexpected(format!("code {code}")))
}

// ═════════════════════════════════════════════════════════════════════════
// 1. First resolution wins
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn first_resolution_wins(attempts in proptest::collection::vec(arb_outcome(), 1..=8)) {
        let promise = Promise::<i32>::new();
        let notified = Arc::new(AtomicUsize::new(0));
        promise.observe({
            let notified = notified.clone();
            move |_| {
                notified.fetch_add(1, Ordering::SeqCst);
            }
        });

        let settled: Vec<bool> = attempts
            .iter()
            .map(|attempt| promise.complete(to_outcome(*attempt)))
            .collect();

        prop_assert!(settled[0]);
        prop_assert!(settled[1..].iter().all(|settled| !settled));
        prop_assert_eq!(notified.load(Ordering::SeqCst), 1);
        match (attempts[0], promise.outcome()) {
            (Ok(expected), Some(Ok(actual))) => prop_assert_eq!(expected, actual),
            (Err(code), Some(Err(error))) => {
                let needle = format!("code {code} ");
                prop_assert!(error.to_string().contains(&needle))
            }
            (expected, actual) => prop_assert!(false, "expected {:?}, got {:?}", expected, actual),
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. `all` preserves input order
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn all_preserves_input_order(order in arb_order(10)) {
        let promises: Vec<_> = (0..order.len()).map(|_| Promise::<usize>::new()).collect();
        let all = Promise::all(promises.clone());
        for index in &order {
            prop_assert!(all.is_pending());
            promises[*index].fulfill(*index);
        }
        prop_assert_eq!(all.value(), Some((0..order.len()).collect::<Vec<_>>()));
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. `race` adopts the first settlement
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn race_adopts_first_settlement(
        order in arb_order(6),
        fail_first in any::<bool>(),
    ) {
        let promises: Vec<_> = (0..order.len()).map(|_| Promise::<usize>::new()).collect();
        let race = Promise::race(promises.clone());
        for (position, index) in order.iter().enumerate() {
            if position == 0 && fail_first {
                promises[*index].reject(Error::Cancelled);
            } else {
                promises[*index].fulfill(*index);
            }
        }
        if fail_first {
            prop_assert!(race.error().is_some_and(|error| error.is_cancelled()));
        } else {
            prop_assert_eq!(race.value(), Some(order[0]));
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. `retry` call counts
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn retry_calls_at_most_count_plus_one(count in 0usize..4, failures in 0usize..6) {
        let calls = Arc::new(AtomicUsize::new(0));
        let promise = Promise::retry(count, Duration::ZERO, {
            let calls = calls.clone();
            move || {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                if call < failures {
                    Promise::rejected(Error::unexpected(format!("failure {call}")))
                } else {
                    Promise::fulfilled(call)
                }
            }
        });
        let outcome = block_on(promise.into_future());

        let expected_calls = failures.min(count) + 1;
        prop_assert_eq!(calls.load(Ordering::SeqCst), expected_calls);
        if failures <= count {
            prop_assert_eq!(outcome.ok(), Some(failures));
        } else {
            prop_assert!(outcome.is_err());
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. `serial_map` runs in order
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn serial_map_runs_in_order(items in proptest::collection::vec(any::<i16>(), 0..=20)) {
        let visited = Arc::new(Mutex::new(Vec::new()));
        let promise = serial_map(items.clone(), {
            let visited = visited.clone();
            move |item: i16| {
                visited.lock().push(item);
                Ok(Promise::fulfilled(i32::from(item) * 2))
            }
        });
        let doubled: Vec<i32> = items.iter().map(|item| i32::from(*item) * 2).collect();
        prop_assert_eq!(promise.value(), Some(doubled));
        let visited = visited.lock().clone();
        prop_assert_eq!(visited, items);
    }
}
