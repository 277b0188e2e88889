use std::{
    fmt::{self, Debug, Formatter},
    mem,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;

use crate::{
    context::SharedContext,
    observable::Observable,
    registry::{deliver_all, schedule, Callback, Observer, Observers, Token, Unregister},
};

struct ValueState<V> {
    value: V,
    /// Bumped by every write.
    version: u64,
    observers: Observers<V>,
}

struct ValueInner<V> {
    state: Mutex<ValueState<V>>,
}

impl<V: Send> Unregister for ValueInner<V> {
    fn unregister(&self, token: Token) {
        self.state.lock().observers.remove(token);
    }
}

/// Holds a current value and broadcasts every write.
///
/// A new observer first receives the current value, then every later write.
/// Writes and the broadcast snapshot happen under the same lock; delivery
/// happens after it's released, so observers may write back.
///
/// # Examples
///
/// ```
/// use promise_kit::{ObservableExt, ObservableValue};
/// use std::sync::{Arc, Mutex};
///
/// let volume = ObservableValue::new(3);
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// volume.observe({
///     let seen = seen.clone();
///     move |level| seen.lock().unwrap().push(level)
/// });
/// volume.set(7);
/// assert_eq!(*seen.lock().unwrap(), [3, 7]);
/// ```
pub struct ObservableValue<V> {
    inner: Arc<ValueInner<V>>,
}

impl<V> Clone for ObservableValue<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Debug> Debug for ObservableValue<V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ObservableValue")
            .field("value", &state.value)
            .field("observers", &state.observers.len())
            .finish()
    }
}

impl<V: Clone + Send + Default + 'static> Default for ObservableValue<V> {
    fn default() -> Self {
        Self::new(V::default())
    }
}

impl<V: Clone + Send + 'static> ObservableValue<V> {
    pub fn new(value: V) -> Self {
        Self {
            inner: Arc::new(ValueInner {
                state: Mutex::new(ValueState {
                    value,
                    version: 0,
                    observers: Observers::new(),
                }),
            }),
        }
    }

    pub fn get(&self) -> V {
        self.inner.state.lock().value.clone()
    }

    pub fn set(&self, value: V) {
        self.replace(value);
    }

    /// Writes `value` and returns the previous one.
    pub fn replace(&self, value: V) -> V {
        self.write(|current| mem::replace(current, value))
    }

    /// Modifies the value in place and broadcasts the result.
    ///
    /// `update` runs under the value's lock and must not touch this
    /// `ObservableValue` itself.
    pub fn update(&self, update: impl FnOnce(&mut V)) {
        self.write(update)
    }

    fn write<R>(&self, write: impl FnOnce(&mut V) -> R) -> R {
        let (snapshot, value, result) = {
            let mut state = self.inner.state.lock();
            let result = write(&mut state.value);
            state.version = state.version.wrapping_add(1);
            (state.observers.snapshot(), state.value.clone(), result)
        };
        deliver_all(&snapshot, value);
        result
    }

    pub fn observer_count(&self) -> usize {
        self.inner.state.lock().observers.len()
    }

    fn target(&self) -> Weak<dyn Unregister> {
        let weak = Arc::downgrade(&self.inner);
        let target: Weak<dyn Unregister> = weak;
        target
    }
}

impl<V: Clone + Send + 'static> Observable for ObservableValue<V> {
    type Payload = V;

    /// Replays the current value, then registers for writes.
    ///
    /// The replay is scheduled outside the lock. A write that lands between
    /// the replay read and the registration is caught up by delivering the
    /// newest value once more after registering, so the observer never ends
    /// up behind the stored value.
    fn subscribe(&self, context: SharedContext, callback: Callback<V>) -> Observer {
        let (current, seen) = {
            let state = self.inner.state.lock();
            (state.value.clone(), state.version)
        };
        schedule(&context, &callback, current);

        let (token, missed) = {
            let mut state = self.inner.state.lock();
            let token = state.observers.insert(context.clone(), callback.clone());
            let missed = (state.version != seen).then(|| state.value.clone());
            (token, missed)
        };
        if let Some(latest) = missed {
            schedule(&context, &callback, latest);
        }
        Observer::registered(token, self.target())
    }

    fn remove(&self, observer: &Observer) {
        observer.remove_from(Arc::as_ptr(&self.inner).cast());
    }
}
