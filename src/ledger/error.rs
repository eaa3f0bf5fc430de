use crate::domain::{Address, RoundState};
use crate::engine::TransitionError;
use thiserror::Error;

/// Failure applying or reverting one event. Any of these aborts the block.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
    #[error("round {round}: cannot move from {from} to {to}")]
    InvalidTransition {
        round: Address,
        from: RoundState,
        to: RoundState,
    },
    #[error("underflow: {0}")]
    Underflow(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl LedgerError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        LedgerError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Store failures may succeed on retry of the whole block; everything
    /// else means the event stream and the ledger disagree.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Store(_))
    }
}

impl From<TransitionError> for LedgerError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::InvalidTransition { round, from, to } => {
                LedgerError::InvalidTransition { round, from, to }
            }
            TransitionError::Underflow(msg) => LedgerError::Underflow(msg),
            TransitionError::Conflict(msg) => LedgerError::Conflict(msg),
        }
    }
}
