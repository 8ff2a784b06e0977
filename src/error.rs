use serde::Serialize;
use thiserror::Error;

/// Failures a wager session can surface.
///
/// Every network or provider failure is caught at the step that produced it and
/// converted into one of these kinds. The detail string is kept for logs; the
/// user facing text comes from [`WagerError::user_message`].
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail")]
pub enum WagerError {
    #[error("wallet provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("request rejected by user: {0}")]
    UserRejected(String),
    #[error("invalid wager input: {0}")]
    InvalidInput(String),
    #[error("wager simulation failed: {0}")]
    SimulationError(String),
    #[error("failed to broadcast transaction: {0}")]
    BroadcastError(String),
    #[error("transaction not confirmed in time: {0}")]
    ConfirmationTimeout(String),
    #[error("failed to query game events: {0}")]
    QueryError(String),
    #[error("another wager attempt is still in progress")]
    AttemptInProgress,
    #[error("failed to read contract state: {0}")]
    ReadError(String),
    #[error("no wallet connected")]
    NotConnected,
    #[error("no unresolved wager to retry")]
    NothingToResolve,
}

impl WagerError {
    pub fn invalid_input(detail: impl Into<String>) -> Self {
        Self::InvalidInput(detail.into())
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            WagerError::ProviderUnavailable(_) => {
                "No compatible wallet was found. Check the wallet name and directory."
            }
            WagerError::UserRejected(_) => "The request was rejected in the wallet.",
            WagerError::InvalidInput(_) => {
                "Prediction must be a whole number from 0 to 9 and the stake must be positive."
            }
            WagerError::SimulationError(_) => {
                "The wager would fail on-chain, so it was not sent for signing."
            }
            WagerError::BroadcastError(_) => "The signed transaction could not be broadcast.",
            WagerError::ConfirmationTimeout(_) => {
                "The transaction was sent but not confirmed in time. Retry to keep waiting."
            }
            WagerError::QueryError(_) => {
                "The transaction confirmed but its game events could not be read. Retry to query again."
            }
            WagerError::AttemptInProgress => "A wager is already in progress.",
            WagerError::ReadError(_) => "The house balance could not be read.",
            WagerError::NotConnected => "Connect a wallet first.",
            WagerError::NothingToResolve => "There is no pending wager to resolve.",
        }
    }

    /// Whether the failed step left a submitted transaction behind.
    pub fn leaves_attempt_parked(&self) -> bool {
        matches!(
            self,
            WagerError::ConfirmationTimeout(_) | WagerError::QueryError(_)
        )
    }
}
