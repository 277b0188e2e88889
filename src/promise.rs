//! Single-resolution promise and its chaining combinators.
//!
//! A [`Promise`] starts pending and settles exactly once. The first of
//! [`fulfill`](Promise::fulfill), [`reject`](Promise::reject),
//! [`complete`](Promise::complete) or [`cancel`](Promise::cancel) to take the
//! lock wins; every later attempt is ignored. Racing completion sources are
//! expected (see [`Promise::race`]), so losing is not an error.

use std::{
    fmt::{self, Debug, Formatter},
    future::{Future, IntoFuture},
    mem,
    panic::{self, AssertUnwindSafe},
    pin::Pin,
    sync::{Arc, Weak},
    task::{Context, Poll, Waker},
};

use parking_lot::Mutex;
use tracing::{debug, error, trace};

use crate::{
    context::{immediate, shared, ExecutionContext, SharedContext},
    observable::Observable,
    registry::{deliver_all, schedule, Callback, Observer, Observers, Token, Unregister},
    Error,
};

/// What a [`Promise`] settles to.
pub type Outcome<V> = Result<V, Error>;

struct State<V> {
    outcome: Option<Outcome<V>>,
    observers: Observers<Outcome<V>>,
    /// One entry per pending [`Settled`], keyed so re-polls replace it.
    wakers: Vec<(u64, Waker)>,
    next_waker: u64,
}

struct Inner<V> {
    state: Mutex<State<V>>,
}

impl<V: Send> Unregister for Inner<V> {
    fn unregister(&self, token: Token) {
        self.state.lock().observers.remove(token);
    }
}

/// A value that becomes available later, or a failure.
///
/// `Promise` is a shared handle: clones observe and resolve the same cell.
/// Combinators never touch their input and always return a new promise.
pub struct Promise<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for Promise<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Debug> Debug for Promise<V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        match &state.outcome {
            None => f
                .debug_struct("Promise")
                .field("pending", &true)
                .field("observers", &state.observers.len())
                .finish(),
            Some(outcome) => f.debug_tuple("Promise").field(outcome).finish(),
        }
    }
}

impl<V: Clone + Send + 'static> Default for Promise<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + 'static> Promise<V> {
    fn with_state(outcome: Option<Outcome<V>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    outcome,
                    observers: Observers::new(),
                    wakers: Vec::new(),
                    next_waker: 0,
                }),
            }),
        }
    }

    /// A pending promise.
    pub fn new() -> Self {
        Self::with_state(None)
    }

    pub fn fulfilled(value: V) -> Self {
        Self::with_state(Some(Ok(value)))
    }

    pub fn rejected(error: Error) -> Self {
        Self::with_state(Some(Err(error)))
    }

    pub fn from_outcome(outcome: Outcome<V>) -> Self {
        Self::with_state(Some(outcome))
    }

    /// Runs `work` on `context` and settles with whatever it returns. A
    /// panic in `work` rejects with [`Error::Unexpected`].
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_kit::{Promise, QueueContext};
    /// use futures::executor::block_on;
    /// use std::future::IntoFuture;
    ///
    /// let queue = QueueContext::serial("docs").unwrap();
    /// let answer = Promise::spawn(queue, || Ok(6 * 7));
    /// assert_eq!(block_on(answer.into_future()).unwrap(), 42);
    /// ```
    pub fn spawn(
        context: impl ExecutionContext + 'static,
        work: impl FnOnce() -> Outcome<V> + Send + 'static,
    ) -> Self {
        let promise = Self::new();
        let target = promise.clone();
        context.execute(Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|_| {
                error!("spawned work panicked");
                Err(Error::unexpected("spawned work panicked"))
            });
            target.complete(outcome);
        }));
        promise
    }

    /// Hands the pending promise to `work` on `context`, which resolves it
    /// now or later. An error returned from `work`, or a panic in it, rejects
    /// it unless it was already settled.
    pub fn with_resolver(
        context: impl ExecutionContext + 'static,
        work: impl FnOnce(Promise<V>) -> Result<(), Error> + Send + 'static,
    ) -> Self {
        let promise = Self::new();
        let target = promise.clone();
        context.execute(Box::new(move || {
            let resolver = target.clone();
            let result = panic::catch_unwind(AssertUnwindSafe(move || work(resolver)))
                .unwrap_or_else(|_| {
                    error!("resolver work panicked");
                    Err(Error::unexpected("resolver work panicked"))
                });
            if let Err(error) = result {
                target.reject(error);
            }
        }));
        promise
    }

    /// Settles the promise, unless it already has been.
    ///
    /// Returns whether this call did the settling.
    pub fn complete(&self, outcome: Outcome<V>) -> bool {
        let mut state = self.inner.state.lock();
        if state.outcome.is_some() {
            drop(state);
            trace!("ignoring completion of a settled promise");
            return false;
        }
        state.outcome = Some(outcome.clone());
        let observers = state.observers.take();
        let wakers = mem::take(&mut state.wakers);
        drop(state);

        deliver_all(&observers, outcome);
        for (_, waker) in wakers {
            waker.wake();
        }
        true
    }

    pub fn fulfill(&self, value: V) -> bool {
        self.complete(Ok(value))
    }

    pub fn reject(&self, error: Error) -> bool {
        self.complete(Err(error))
    }

    /// Rejects with [`Error::Cancelled`].
    ///
    /// Work that already holds a clone of this promise keeps running; it only
    /// notices if it checks [`is_pending`](Promise::is_pending) or observes
    /// the promise.
    pub fn cancel(&self) -> bool {
        let cancelled = self.reject(Error::Cancelled);
        if cancelled {
            debug!("promise cancelled");
        }
        cancelled
    }

    pub fn is_pending(&self) -> bool {
        self.inner.state.lock().outcome.is_none()
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self.inner.state.lock().outcome, Some(Ok(_)))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.inner.state.lock().outcome, Some(Err(_)))
    }

    pub fn outcome(&self) -> Option<Outcome<V>> {
        self.inner.state.lock().outcome.clone()
    }

    pub fn value(&self) -> Option<V> {
        self.outcome().and_then(Result::ok)
    }

    pub fn error(&self) -> Option<Error> {
        self.outcome().and_then(Result::err)
    }

    /// Runs `callback` once with the outcome, on the notifying thread.
    ///
    /// If the promise has already settled, `callback` runs right away and
    /// the returned observer is inert.
    pub fn observe(&self, callback: impl FnOnce(Outcome<V>) + Send + 'static) -> Observer {
        self.observe_shared(immediate(), callback)
    }

    pub fn observe_on(
        &self,
        context: impl ExecutionContext + 'static,
        callback: impl FnOnce(Outcome<V>) + Send + 'static,
    ) -> Observer {
        self.observe_shared(shared(context), callback)
    }

    fn observe_shared(
        &self,
        context: SharedContext,
        callback: impl FnOnce(Outcome<V>) + Send + 'static,
    ) -> Observer {
        let slot = Mutex::new(Some(callback));
        self.subscribe(
            context,
            Arc::new(move |outcome| {
                let callback = slot.lock().take();
                if let Some(callback) = callback {
                    callback(outcome)
                }
            }),
        )
    }

    /// Settles `target` the same way this promise settles.
    pub(crate) fn forward_to(&self, target: Promise<V>) {
        self.observe(move |outcome| {
            target.complete(outcome);
        });
    }

    fn chain<W, F>(&self, context: SharedContext, on_outcome: F) -> Promise<W>
    where
        W: Clone + Send + 'static,
        F: FnOnce(Outcome<V>, Promise<W>) + Send + 'static,
    {
        let next = Promise::new();
        let target = next.clone();
        self.observe_shared(context, move |outcome| on_outcome(outcome, target));
        next
    }

    /// Transforms the value. Failures, including one returned by `transform`,
    /// pass through as failures.
    pub fn then<W, F>(&self, transform: F) -> Promise<W>
    where
        W: Clone + Send + 'static,
        F: FnOnce(V) -> Result<W, Error> + Send + 'static,
    {
        self.then_shared(immediate(), transform)
    }

    pub fn then_on<W, F>(
        &self,
        context: impl ExecutionContext + 'static,
        transform: F,
    ) -> Promise<W>
    where
        W: Clone + Send + 'static,
        F: FnOnce(V) -> Result<W, Error> + Send + 'static,
    {
        self.then_shared(shared(context), transform)
    }

    fn then_shared<W, F>(&self, context: SharedContext, transform: F) -> Promise<W>
    where
        W: Clone + Send + 'static,
        F: FnOnce(V) -> Result<W, Error> + Send + 'static,
    {
        self.chain(context, move |outcome, next| {
            next.complete(outcome.and_then(transform));
        })
    }

    pub fn map<W, F>(&self, transform: F) -> Promise<W>
    where
        W: Clone + Send + 'static,
        F: FnOnce(V) -> W + Send + 'static,
    {
        self.then(move |value| Ok(transform(value)))
    }

    /// Like [`map`](Promise::map), but a `None` becomes
    /// [`Error::MissingValue`].
    pub fn filter_map<W, F>(&self, transform: F) -> Promise<W>
    where
        W: Clone + Send + 'static,
        F: FnOnce(V) -> Option<W> + Send + 'static,
    {
        self.then(move |value| {
            transform(value).ok_or(Error::MissingValue(std::any::type_name::<W>()))
        })
    }

    /// Looks at the value without changing it.
    pub fn inspect(&self, inspect: impl FnOnce(&V) + Send + 'static) -> Promise<V> {
        self.then(move |value| {
            inspect(&value);
            Ok(value)
        })
    }

    /// Continues with the promise `transform` returns and adopts its outcome.
    ///
    /// An error returned by `transform` itself rejects right away.
    pub fn and_then<W, F>(&self, transform: F) -> Promise<W>
    where
        W: Clone + Send + 'static,
        F: FnOnce(V) -> Result<Promise<W>, Error> + Send + 'static,
    {
        self.and_then_shared(immediate(), transform)
    }

    pub fn and_then_on<W, F>(
        &self,
        context: impl ExecutionContext + 'static,
        transform: F,
    ) -> Promise<W>
    where
        W: Clone + Send + 'static,
        F: FnOnce(V) -> Result<Promise<W>, Error> + Send + 'static,
    {
        self.and_then_shared(shared(context), transform)
    }

    pub(crate) fn and_then_shared<W, F>(&self, context: SharedContext, transform: F) -> Promise<W>
    where
        W: Clone + Send + 'static,
        F: FnOnce(V) -> Result<Promise<W>, Error> + Send + 'static,
    {
        self.chain(context, move |outcome, next| {
            match outcome.and_then(transform) {
                Ok(inner) => inner.forward_to(next),
                Err(error) => {
                    next.reject(error);
                }
            }
        })
    }

    /// Runs `handler` on failure. The outcome passes through unchanged.
    pub fn catch(&self, handler: impl FnOnce(&Error) + Send + 'static) -> Promise<V> {
        self.catch_shared(immediate(), handler)
    }

    pub fn catch_on(
        &self,
        context: impl ExecutionContext + 'static,
        handler: impl FnOnce(&Error) + Send + 'static,
    ) -> Promise<V> {
        self.catch_shared(shared(context), handler)
    }

    fn catch_shared(
        &self,
        context: SharedContext,
        handler: impl FnOnce(&Error) + Send + 'static,
    ) -> Promise<V> {
        self.chain(context, move |outcome, next| {
            if let Err(error) = &outcome {
                handler(error);
            }
            next.complete(outcome);
        })
    }

    /// On failure, adopts the outcome of the promise `recovery` returns.
    /// An error returned by `recovery` becomes the final rejection.
    pub fn recover<F>(&self, recovery: F) -> Promise<V>
    where
        F: FnOnce(Error) -> Result<Promise<V>, Error> + Send + 'static,
    {
        self.chain(immediate(), move |outcome, next| match outcome {
            Ok(value) => {
                next.fulfill(value);
            }
            Err(error) => match recovery(error) {
                Ok(fallback) => fallback.forward_to(next),
                Err(error) => {
                    next.reject(error);
                }
            },
        })
    }

    /// Turns any failure into `None`.
    pub fn optional(&self) -> Promise<Option<V>> {
        self.map(Some).recover(|_| Ok(Promise::fulfilled(None)))
    }

    /// Keeps the value only if `check` holds; otherwise rejects with
    /// [`Error::CheckFailed`].
    pub fn ensure(&self, check: impl FnOnce(&V) -> bool + Send + 'static) -> Promise<V> {
        self.then(move |value| if check(&value) { Ok(value) } else { Err(Error::CheckFailed) })
    }

    /// Runs `on_complete` once the promise settles, whichever way.
    pub fn always(&self, on_complete: impl FnOnce() + Send + 'static) -> Promise<V> {
        self.always_shared(immediate(), on_complete)
    }

    pub fn always_on(
        &self,
        context: impl ExecutionContext + 'static,
        on_complete: impl FnOnce() + Send + 'static,
    ) -> Promise<V> {
        self.always_shared(shared(context), on_complete)
    }

    fn always_shared(
        &self,
        context: SharedContext,
        on_complete: impl FnOnce() + Send + 'static,
    ) -> Promise<V> {
        self.chain(context, move |outcome, next| {
            on_complete();
            next.complete(outcome);
        })
    }

    pub fn as_unit(&self) -> Promise<()> {
        self.map(|_| ())
    }

    fn target(&self) -> Weak<dyn Unregister> {
        let weak = Arc::downgrade(&self.inner);
        let target: Weak<dyn Unregister> = weak;
        target
    }
}

impl Promise<()> {
    /// An already fulfilled `Promise<()>`.
    pub fn resolved() -> Self {
        Self::fulfilled(())
    }
}

impl<V: Clone + Send + 'static> Observable for Promise<V> {
    type Payload = Outcome<V>;

    /// Unlike a plain registry, a settled promise schedules `callback` with
    /// the stored outcome right away and keeps nothing.
    fn subscribe(&self, context: SharedContext, callback: Callback<Outcome<V>>) -> Observer {
        let mut state = self.inner.state.lock();
        if let Some(outcome) = state.outcome.clone() {
            drop(state);
            schedule(&context, &callback, outcome);
            return Observer::settled();
        }
        let token = state.observers.insert(context, callback);
        drop(state);
        Observer::registered(token, self.target())
    }

    fn remove(&self, observer: &Observer) {
        observer.remove_from(Arc::as_ptr(&self.inner).cast());
    }
}

/// Future returned by awaiting a [`Promise`].
///
/// Keeps at most one waker registered on the promise, the one from its
/// latest poll, and unregisters it when dropped.
#[must_use = "futures do nothing unless polled"]
pub struct Settled<V> {
    promise: Promise<V>,
    key: Option<u64>,
}

impl<V: Clone> Future for Settled<V> {
    type Output = Outcome<V>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut state = this.promise.inner.state.lock();
        if let Some(outcome) = &state.outcome {
            return Poll::Ready(outcome.clone());
        }

        let slot = this
            .key
            .and_then(|key| state.wakers.iter().position(|(stored, _)| *stored == key));
        match slot {
            Some(index) => {
                let (_, waker) = &mut state.wakers[index];
                if !waker.will_wake(cx.waker()) {
                    *waker = cx.waker().clone();
                }
            }
            None => {
                let key = state.next_waker;
                state.next_waker += 1;
                state.wakers.push((key, cx.waker().clone()));
                this.key = Some(key);
            }
        }
        Poll::Pending
    }
}

impl<V> Drop for Settled<V> {
    fn drop(&mut self) {
        if let Some(key) = self.key {
            self.promise.inner.state.lock().wakers.retain(|(stored, _)| *stored != key);
        }
    }
}

impl<V: Clone> IntoFuture for Promise<V> {
    type Output = Outcome<V>;
    type IntoFuture = Settled<V>;

    fn into_future(self) -> Self::IntoFuture {
        Settled {
            promise: self,
            key: None,
        }
    }
}
