//! Service construction errors.

use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] keel_core::ConfigError),

    #[error(transparent)]
    Breaker(#[from] keel_breaker::BreakerError),

    #[error(transparent)]
    Checkpoint(#[from] keel_checkpoint::CheckpointError),
}
