//! Single-resolution promises and multi-subscriber event streams for
//! threaded code.
//!
//! A [`Promise`] settles exactly once, with a value or an [`Error`], and
//! notifies every observer of that outcome, including observers attached
//! after the fact. An [`EventEmitter`] broadcasts each payload to whoever is
//! observing at that moment, and an [`ObservableValue`] additionally replays
//! its current value to new observers.
//!
//! Every callback runs on an [`ExecutionContext`] chosen by the caller:
//! [`Immediate`] on the notifying thread, a [`MainContext`] on a thread
//! pumped through [`MainLoop`], or a [`QueueContext`] worker pool.
//!
//! ```
//! use promise_kit::{Promise, QueueContext};
//! use futures::executor::block_on;
//! use std::future::IntoFuture;
//!
//! let queue = QueueContext::concurrent("io", 2).unwrap();
//! let sizes = Promise::all(
//!     ["a.txt", "bb.txt"].map(|name| Promise::spawn(queue.clone(), move || Ok(name.len()))),
//! );
//! assert_eq!(block_on(sizes.into_future()).unwrap(), [5, 6]);
//! ```

mod bag;
mod combinators;
mod context;
mod delegate;
mod emitter;
mod error;
mod observable;
mod promise;
mod registry;
mod timer;
mod value;

pub use bag::ObserverBag;
pub use combinators::{serial_map, serial_map_on};
pub use context::{
    shared, ExecutionContext, Immediate, MainContext, MainLoop, QueueBuilder, QueueContext,
    SharedContext, Work,
};
pub use delegate::Delegate;
pub use emitter::EventEmitter;
pub use error::Error;
pub use observable::{zip, AnyObservable, Observable, ObservableExt};
pub use promise::{Outcome, Promise, Settled};
pub use registry::{Callback, Observer, ObserverRegistry};
pub use timer::Timer;
pub use value::ObservableValue;
