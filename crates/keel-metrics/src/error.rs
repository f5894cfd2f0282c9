//! Metrics error types.

use thiserror::Error;

pub type MetricsResult<T> = Result<T, MetricsError>;

/// Contract violations by metrics callers.
#[derive(Debug, Error, PartialEq)]
pub enum MetricsError {
    #[error("invalid argument for {name}: {reason}")]
    InvalidArgument { name: String, reason: String },
}

impl MetricsError {
    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
