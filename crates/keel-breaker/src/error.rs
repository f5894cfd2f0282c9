//! Circuit breaker error types.

use std::error::Error;
use std::fmt;

use thiserror::Error;

pub type BreakerResult<T> = Result<T, BreakerError>;

/// Configuration errors. Breaker operations themselves never fail.
#[derive(Debug, Error, PartialEq)]
pub enum BreakerError {
    #[error("invalid breaker config for {name}: {reason}")]
    InvalidArgument { name: String, reason: String },
}

/// Outcome of a call made through [`crate::CircuitBreaker::call`].
#[derive(Debug)]
pub enum CallError<E> {
    /// The breaker refused the call without running it.
    Rejected { breaker: String },
    /// The call ran and returned an error.
    Inner(E),
}

impl<E> CallError<E> {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Rejected { .. } => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for CallError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { breaker } => write!(f, "circuit breaker {breaker} is open"),
            Self::Inner(e) => e.fmt(f),
        }
    }
}

impl<E: Error + 'static> Error for CallError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Rejected { .. } => None,
            Self::Inner(e) => Some(e),
        }
    }
}
