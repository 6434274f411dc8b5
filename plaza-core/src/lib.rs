pub mod actor;
pub mod gateway;
pub mod inventory;
pub mod notify;

pub use actor::Actor;

/// Error taxonomy for the order and money-movement core.
///
/// Validation and state-conflict errors are rejected synchronously and
/// never retried. Gateway transience is retryable with backoff; permanent
/// gateway rejections are terminal.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Illegal state transition from {from} to {to}")]
    StateConflict { from: String, to: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Gateway transient failure: {0}")]
    GatewayTransient(String),

    #[error("Gateway rejected the operation: {0}")]
    GatewayPermanent(String),

    #[error(transparent)]
    Money(#[from] plaza_shared::MoneyError),

    #[error("Internal service error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn state_conflict(from: impl std::fmt::Debug, to: impl std::fmt::Debug) -> Self {
        Self::StateConflict {
            from: format!("{:?}", from),
            to: format!("{:?}", to),
        }
    }

    /// Only gateway transience qualifies for automatic retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::GatewayTransient(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
