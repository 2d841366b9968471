//! Error types for the escrow

use crate::types::{AccountId, Amount, StreamId, StreamStatus};
use thiserror::Error;

/// Result type for escrow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Escrow errors
///
/// Every rejected precondition has its own variant so callers can assert on
/// the cause. None of them are retried by the core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Zero deposit, empty or inverted time range, self-stream, etc.
    #[error("Invalid stream parameters: {0}")]
    InvalidStreamParameters(String),

    /// Value supplied with `create` does not match the deposit
    #[error("Insufficient funding: deposit {required}, supplied {supplied}")]
    InsufficientFunding {
        /// Declared deposit
        required: Amount,
        /// Value actually supplied
        supplied: Amount,
    },

    /// Caller is not allowed to perform the operation on this stream
    #[error("Caller {caller} is not authorized on stream {stream_id}")]
    Unauthorized {
        /// Target stream
        stream_id: StreamId,
        /// Rejected caller
        caller: AccountId,
    },

    /// Operation not valid in the stream's current status
    #[error("Stream {stream_id} is {status:?}")]
    InvalidState {
        /// Target stream
        stream_id: StreamId,
        /// Status at the time of the call
        status: StreamStatus,
    },

    /// Nothing has vested beyond what was already withdrawn
    #[error("Nothing to withdraw from stream {0}")]
    NothingToWithdraw(StreamId),

    /// Requested amount is zero or above the withdrawable balance
    #[error("Requested {requested} exceeds withdrawable {available}")]
    ExceedsVestedBalance {
        /// Requested amount
        requested: Amount,
        /// Withdrawable amount at the time of the call
        available: Amount,
    },

    /// Checked arithmetic failed
    #[error("Arithmetic overflow: {0}")]
    ArithmeticOverflow(&'static str),

    /// Payout collaborator rejected a transfer
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    /// Unknown stream id
    #[error("Stream not found: {0}")]
    StreamNotFound(StreamId),

    /// Operation switched off by configuration
    #[error("Operation disabled by policy: {0}")]
    PolicyDisabled(&'static str),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error (config loading)
    #[error("IO error: {0}")]
    Io(String),
}

impl Error {
    /// Whether the caller can fix this by changing its request.
    ///
    /// `TransferFailed` and `ArithmeticOverflow` describe conditions outside
    /// the caller's request; everything else is a caller mistake.
    pub fn is_caller_error(&self) -> bool {
        !matches!(
            self,
            Error::TransferFailed(_) | Error::ArithmeticOverflow(_) | Error::Io(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InsufficientFunding {
            required: 100,
            supplied: 99,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funding: deposit 100, supplied 99"
        );

        let err = Error::Unauthorized {
            stream_id: 7,
            caller: AccountId::new("mallory"),
        };
        assert!(err.to_string().contains("mallory"));
    }

    #[test]
    fn test_caller_error_classification() {
        assert!(Error::NothingToWithdraw(1).is_caller_error());
        assert!(Error::StreamNotFound(1).is_caller_error());
        assert!(!Error::TransferFailed("rejected".into()).is_caller_error());
        assert!(!Error::ArithmeticOverflow("deposit").is_caller_error());
    }
}
