use std::{panic::Location, sync::Arc, time::Duration};

/// Failure half of an [`Outcome`](crate::Outcome).
///
/// Errors are plain data: they are cloned to every observer of a rejected
/// promise and travel down a chain until something [`catch`](crate::Promise::catch)es
/// or [`recover`](crate::Promise::recover)s them.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The promise was [`cancel`](crate::Promise::cancel)led.
    #[error("the operation was cancelled")]
    Cancelled,
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// An [`ensure`](crate::Promise::ensure) predicate rejected the value.
    #[error("promise check failed")]
    CheckFailed,
    #[error("unexpected error, {info} at {location}")]
    Unexpected {
        info: String,
        location: &'static Location<'static>,
    },
    #[error("expected a value of type `{0}`, found none")]
    MissingValue(&'static str),
    /// A host error, passed through untouched.
    #[error(transparent)]
    Other(Arc<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Signals a broken invariant, recording where it was noticed.
    #[track_caller]
    pub fn unexpected(info: impl Into<String>) -> Self {
        Error::Unexpected {
            info: info.into(),
            location: Location::caller(),
        }
    }

    pub fn other(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::Other(Arc::new(error))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}
