use crate::config::ConfigError;
use crate::event::TransactionId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SagaError>;

#[derive(Error, Debug)]
pub enum SagaError {
    #[error("Duplicate transaction: {0} is already active")]
    DuplicateTransaction(TransactionId),

    #[error("Unknown transaction: {0}")]
    UnknownTransaction(TransactionId),

    #[error("Invalid state for transaction {transaction_id}: {reason}")]
    InvalidState {
        transaction_id: TransactionId,
        reason: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Execution of request {request_id} failed in transaction {transaction_id}")]
    ExecutionFailure {
        transaction_id: TransactionId,
        request_id: String,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Event channel closed")]
    ChannelClosed,
}

impl SagaError {
    pub fn invalid_state(transaction_id: &TransactionId, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            transaction_id: transaction_id.clone(),
            reason: reason.into(),
        }
    }

    pub fn serialization<E: std::fmt::Display>(e: E) -> Self {
        Self::Serialization(e.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SagaError::DuplicateTransaction(_) => ErrorKind::DuplicateTransaction,
            SagaError::UnknownTransaction(_) => ErrorKind::UnknownTransaction,
            SagaError::InvalidState { .. } => ErrorKind::InvalidState,
            SagaError::Serialization(_) => ErrorKind::Serialization,
            SagaError::ExecutionFailure { .. } => ErrorKind::ExecutionFailure,
            SagaError::Config(_) => ErrorKind::Config,
            SagaError::ChannelClosed => ErrorKind::ChannelClosed,
        }
    }

    /// Protocol violations point at an upstream event-ordering bug rather than
    /// at data this crate failed to handle.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::DuplicateTransaction | ErrorKind::UnknownTransaction | ErrorKind::InvalidState
        )
    }
}

impl From<serde_json::Error> for SagaError {
    fn from(err: serde_json::Error) -> Self {
        SagaError::serialization(format!("JSON error: {}", err))
    }
}

/// Error kind labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DuplicateTransaction,
    UnknownTransaction,
    InvalidState,
    Serialization,
    ExecutionFailure,
    Config,
    ChannelClosed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DuplicateTransaction => "duplicate_transaction",
            ErrorKind::UnknownTransaction => "unknown_transaction",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::Serialization => "serialization",
            ErrorKind::ExecutionFailure => "execution_failure",
            ErrorKind::Config => "config",
            ErrorKind::ChannelClosed => "channel_closed",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
