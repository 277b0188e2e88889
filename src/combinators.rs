//! Promise aggregation, timing and sequencing.

use std::{mem, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    context::{immediate, shared, ExecutionContext, SharedContext},
    timer::Timer,
    Error, Promise,
};

struct Gather<V> {
    values: Vec<Option<V>>,
    remaining: usize,
}

type Generate<V> = Arc<dyn Fn() -> Promise<V> + Send + Sync>;

impl<V: Clone + Send + 'static> Promise<V> {
    /// Fulfills with every value, in input order, once all promises have
    /// fulfilled. Rejects with the first failure observed.
    ///
    /// After a rejection the remaining promises keep running; their outcomes
    /// are dropped.
    pub fn all(promises: impl IntoIterator<Item = Promise<V>>) -> Promise<Vec<V>> {
        let promises: Vec<_> = promises.into_iter().collect();
        if promises.is_empty() {
            return Promise::fulfilled(Vec::new());
        }

        let aggregate = Promise::new();
        let gather = Arc::new(Mutex::new(Gather {
            values: vec![None; promises.len()],
            remaining: promises.len(),
        }));
        for (index, promise) in promises.iter().enumerate() {
            let (aggregate, gather) = (aggregate.clone(), Arc::clone(&gather));
            promise.observe(move |outcome| match outcome {
                Ok(value) => {
                    let finished = {
                        let mut gather = gather.lock();
                        gather.values[index] = Some(value);
                        gather.remaining -= 1;
                        (gather.remaining == 0).then(|| mem::take(&mut gather.values))
                    };
                    if let Some(values) = finished {
                        aggregate.fulfill(values.into_iter().flatten().collect());
                    }
                }
                Err(error) => {
                    aggregate.reject(error);
                }
            });
        }
        aggregate
    }

    /// Settles like whichever promise settles first.
    ///
    /// # Panics
    ///
    /// Iff `promises` is empty: such a race could never settle.
    pub fn race(promises: impl IntoIterator<Item = Promise<V>>) -> Promise<V> {
        let promises: Vec<_> = promises.into_iter().collect();
        assert!(!promises.is_empty(), "Promise::race needs at least one promise");

        let winner = Promise::new();
        for promise in &promises {
            promise.forward_to(winner.clone());
        }
        winner
    }

    /// Rejects with [`Error::Timeout`] after `duration`. Never fulfills.
    pub fn timeout(duration: Duration) -> Promise<V> {
        Self::timeout_on(Timer::global(), duration)
    }

    pub fn timeout_on(timer: &Timer, duration: Duration) -> Promise<V> {
        let promise = Promise::new();
        let target = promise.clone();
        timer.schedule(duration, move || {
            target.reject(Error::Timeout(duration));
        });
        promise
    }

    /// Races this promise against [`Promise::timeout`].
    pub fn add_timeout(&self, duration: Duration) -> Promise<V> {
        Promise::race([self.clone(), Promise::timeout(duration)])
    }

    /// Calls `generate`, and on failure waits `delay` and tries again, up to
    /// `count` more times. Attempts never overlap.
    ///
    /// The last attempt's outcome is final, so a generator that always fails
    /// runs `count + 1` times and the last error wins.
    pub fn retry<G>(count: usize, delay: Duration, generate: G) -> Promise<V>
    where
        G: Fn() -> Promise<V> + Send + Sync + 'static,
    {
        Self::retry_shared(count, delay, Arc::new(generate))
    }

    fn retry_shared(count: usize, delay: Duration, generate: Generate<V>) -> Promise<V> {
        let attempt = generate();
        if count == 0 {
            return attempt;
        }
        attempt.recover(move |error| {
            debug!(%error, remaining = count, ?delay, "attempt failed, retrying");
            Ok(Promise::delay(delay)
                .and_then(move |()| Ok(Self::retry_shared(count - 1, delay, generate))))
        })
    }

    /// Adapts a completion-callback API.
    ///
    /// `work` gets a callback taking an optional value and an optional
    /// error. An error wins over a value, and a call with neither rejects
    /// with [`Error::Unexpected`]. An error returned by `work` itself rejects
    /// right away.
    pub fn from_callback<W>(work: W) -> Promise<V>
    where
        W: FnOnce(Box<dyn FnOnce(Option<V>, Option<Error>) + Send>) -> Result<(), Error>,
    {
        let promise = Promise::new();
        let target = promise.clone();
        let callback = Box::new(move |value: Option<V>, error: Option<Error>| {
            match (value, error) {
                (_, Some(error)) => target.reject(error),
                (Some(value), None) => target.fulfill(value),
                (None, None) => {
                    target.reject(Error::unexpected("callback got neither a value nor an error"))
                }
            };
        });
        if let Err(error) = work(callback) {
            promise.reject(error);
        }
        promise
    }
}

impl Promise<()> {
    /// Fulfills after `duration` on the global [`Timer`]. Never rejects.
    pub fn delay(duration: Duration) -> Promise<()> {
        Self::delay_on(Timer::global(), duration)
    }

    pub fn delay_on(timer: &Timer, duration: Duration) -> Promise<()> {
        let promise = Promise::new();
        let target = promise.clone();
        timer.schedule(duration, move || {
            target.fulfill(());
        });
        promise
    }
}

/// Maps `items` to promises one at a time: `transform` runs for an item
/// only after the previous item's promise has fulfilled. The first failure
/// stops the sequence.
///
/// # Examples
///
/// ```
/// use promise_kit::{serial_map, Promise};
///
/// let doubled = serial_map([1, 2, 3], |n| Ok(Promise::fulfilled(n * 2)));
/// assert_eq!(doubled.value(), Some(vec![2, 4, 6]));
/// ```
pub fn serial_map<T, R, F>(items: impl IntoIterator<Item = T>, transform: F) -> Promise<Vec<R>>
where
    T: Send + 'static,
    R: Clone + Send + 'static,
    F: Fn(T) -> Result<Promise<R>, Error> + Send + Sync + 'static,
{
    serial_map_shared(immediate(), items, transform)
}

/// [`serial_map`], running `transform` on `context`.
pub fn serial_map_on<T, R, F>(
    context: impl ExecutionContext + 'static,
    items: impl IntoIterator<Item = T>,
    transform: F,
) -> Promise<Vec<R>>
where
    T: Send + 'static,
    R: Clone + Send + 'static,
    F: Fn(T) -> Result<Promise<R>, Error> + Send + Sync + 'static,
{
    serial_map_shared(shared(context), items, transform)
}

fn serial_map_shared<T, R, F>(
    context: SharedContext,
    items: impl IntoIterator<Item = T>,
    transform: F,
) -> Promise<Vec<R>>
where
    T: Send + 'static,
    R: Clone + Send + 'static,
    F: Fn(T) -> Result<Promise<R>, Error> + Send + Sync + 'static,
{
    let transform = Arc::new(transform);
    items
        .into_iter()
        .fold(Promise::fulfilled(Vec::new()), |results, item| {
            let transform = Arc::clone(&transform);
            results.and_then_shared(Arc::clone(&context), move |mut results: Vec<R>| {
                Ok(transform(item)?.map(move |result| {
                    results.push(result);
                    results
                }))
            })
        })
}

#[cfg(test)]
mod tests {
    use super::serial_map;
    use crate::{Error, Promise, QueueContext};
    use futures::executor::block_on;
    use parking_lot::Mutex;
    use std::{
        future::IntoFuture,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
        time::{Duration, Instant},
    };

    #[test]
    fn test_all_keeps_input_order() {
        let promises: Vec<_> = (0..3).map(|_| Promise::<usize>::new()).collect();
        let all = Promise::all(promises.clone());
        for index in [2, 0, 1] {
            assert!(all.is_pending());
            promises[index].fulfill(index * 10);
        }
        assert_eq!(all.value(), Some(vec![0, 10, 20]));
    }

    #[test]
    fn test_all_empty() {
        assert_eq!(Promise::<u8>::all([]).value(), Some(vec![]));
    }

    #[test]
    fn test_all_first_failure_wins() {
        let slow = Promise::<i32>::new();
        let all = Promise::all([
            Promise::fulfilled(1),
            Promise::rejected(Error::CheckFailed),
            slow.clone(),
        ]);
        assert!(matches!(all.error(), Some(Error::CheckFailed)));
        slow.fulfill(3);
        assert!(matches!(all.error(), Some(Error::CheckFailed)));
    }

    #[test]
    fn test_race_first_settlement_wins() {
        let (a, b) = (Promise::<&str>::new(), Promise::<&str>::new());
        let race = Promise::race([a.clone(), b.clone()]);
        b.reject(Error::Cancelled);
        a.fulfill("late");
        assert!(race.error().unwrap().is_cancelled());
    }

    #[test]
    #[should_panic(expected = "needs at least one promise")]
    fn test_race_empty_panics() {
        let _ = Promise::<()>::race([]);
    }

    #[test]
    fn test_delay_waits() {
        let start = Instant::now();
        block_on(Promise::delay(Duration::from_millis(30)).into_future()).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_add_timeout() {
        let never = Promise::<()>::new();
        let outcome = block_on(never.add_timeout(Duration::from_millis(20)).into_future());
        assert!(matches!(outcome, Err(Error::Timeout(d)) if d == Duration::from_millis(20)));

        let quick = Promise::fulfilled(1).add_timeout(Duration::from_secs(30));
        assert_eq!(quick.value(), Some(1));
    }

    #[test]
    fn test_retry_counts_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let promise = Promise::<()>::retry(3, Duration::from_millis(1), {
            let calls = calls.clone();
            move || {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                Promise::rejected(Error::unexpected(format!("attempt {call}")))
            }
        });
        let error = block_on(promise.into_future()).unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(error.to_string().contains("attempt 3"));
    }

    #[test]
    fn test_retry_stops_on_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let promise = Promise::retry(5, Duration::from_millis(1), {
            let calls = calls.clone();
            move || match calls.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => Promise::rejected(Error::Cancelled),
                n => Promise::fulfilled(n),
            }
        });
        assert_eq!(block_on(promise.into_future()).unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_serial_map_runs_in_order() {
        let queue = QueueContext::concurrent("serial-map-test", 4).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        let promise = serial_map(["a", "b", "c"], {
            let (order, queue) = (order.clone(), queue.clone());
            move |item| {
                order.lock().push(item);
                let pause = match item {
                    "a" => 30,
                    "b" => 5,
                    _ => 15,
                };
                Ok(Promise::spawn(queue.clone(), move || {
                    thread::sleep(Duration::from_millis(pause));
                    Ok(item.to_uppercase())
                }))
            }
        });
        assert_eq!(block_on(promise.into_future()).unwrap(), ["A", "B", "C"]);
        assert_eq!(*order.lock(), ["a", "b", "c"]);
    }

    #[test]
    fn test_serial_map_stops_at_failure() {
        let started = Arc::new(Mutex::new(Vec::new()));
        let promise = serial_map(1..=4, {
            let started = started.clone();
            move |n| {
                started.lock().push(n);
                if n == 2 {
                    Err(Error::CheckFailed)
                } else {
                    Ok(Promise::fulfilled(n))
                }
            }
        });
        assert!(matches!(promise.error(), Some(Error::CheckFailed)));
        assert_eq!(*started.lock(), [1, 2]);
    }

    #[test]
    fn test_from_callback() {
        let ok = Promise::from_callback(|done| {
            done(Some(5), None);
            Ok(())
        });
        assert_eq!(ok.value(), Some(5));

        let err = Promise::<i32>::from_callback(|done| {
            done(Some(5), Some(Error::Cancelled));
            Ok(())
        });
        assert!(err.error().unwrap().is_cancelled());

        let neither = Promise::<i32>::from_callback(|done| {
            thread::spawn(move || done(None, None));
            Ok(())
        });
        assert!(matches!(block_on(neither.into_future()), Err(Error::Unexpected { .. })));

        let setup = Promise::<i32>::from_callback(|_| Err(Error::CheckFailed));
        assert!(setup.is_rejected());
    }
}
