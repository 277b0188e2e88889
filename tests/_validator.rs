use std::{collections::VecDeque, fmt::Debug};

use parking_lot::Mutex;

/// Records callback invocations in the order they happen.
pub struct Validator<T>(Mutex<VecDeque<T>>);

impl<T> Validator<T> {
    pub const fn new() -> Self {
        Self(Mutex::new(VecDeque::new()))
    }

    pub fn push(&self, value: T) {
        self.0.lock().push_back(value);
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    /// Drains everything recorded so far and compares it with `expected`.
    #[track_caller]
    pub fn expect(&self, expected: impl IntoIterator<Item = T>)
    where
        T: Debug + Eq,
    {
        let mut binding = self.0.lock();
        let mut a = binding.drain(..);
        let mut b = expected.into_iter();
        loop {
            match (a.next(), b.next()) {
                (None, None) => break,
                (a, b) => assert_eq!(a, b),
            }
        }
    }
}
