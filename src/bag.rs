use parking_lot::Mutex;
use tracing::trace;

use crate::registry::Observer;

/// Owns observers on behalf of some longer-lived object and removes them
/// all when cleared or dropped.
///
/// # Examples
///
/// ```
/// use promise_kit::{EventEmitter, ObservableExt, ObserverBag};
///
/// let resized = EventEmitter::<(u32, u32)>::new();
/// {
///     let bag = ObserverBag::new();
///     bag.insert(resized.observe(|_| ()));
///     assert_eq!(resized.observer_count(), 1);
/// }
/// assert_eq!(resized.observer_count(), 0);
/// ```
#[derive(Debug, Default)]
pub struct ObserverBag {
    observers: Mutex<Vec<Observer>>,
}

impl ObserverBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, observer: Observer) {
        self.observers.lock().push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every held observer. The bag can be reused afterwards.
    pub fn clear(&self) {
        let observers = std::mem::take(&mut *self.observers.lock());
        trace!(observers = observers.len(), "clearing observer bag");
        for observer in observers {
            observer.remove();
        }
    }
}

impl Extend<Observer> for ObserverBag {
    fn extend<I: IntoIterator<Item = Observer>>(&mut self, iter: I) {
        self.observers.get_mut().extend(iter)
    }
}

impl Drop for ObserverBag {
    fn drop(&mut self) {
        self.clear();
    }
}
