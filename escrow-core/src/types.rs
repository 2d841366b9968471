//! Core types for the escrow
//!
//! All types are designed for:
//! - Exact arithmetic (integer base units, no floating point)
//! - Serializable snapshots (serde)
//! - Illegal lifecycle transitions caught by exhaustive matching

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Amount in the smallest indivisible unit (e.g. wei)
pub type Amount = u128;

/// Unix timestamp in seconds
pub type Timestamp = i64;

/// Stream identifier, assigned sequentially from 1
pub type StreamId = u64;

/// Account identifier (address, account number, etc.)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Stored lifecycle of a stream
///
/// `Open` covers both pending and active streams; which one applies depends
/// on the clock, see [`Stream::status_at`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifecycle {
    /// Accepting withdrawals (and cancellation, if enabled)
    Open,
    /// Fully withdrawn (terminal)
    Completed {
        /// Time of the final withdrawal
        at: Timestamp,
    },
    /// Terminated early (terminal)
    Cancelled {
        /// Time of cancellation
        at: Timestamp,
    },
}

/// Observable stream status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StreamStatus {
    /// Created, start time not reached
    Pending = 1,
    /// Vesting in progress or vested but not fully withdrawn
    Active = 2,
    /// Fully withdrawn (terminal)
    Completed = 3,
    /// Cancelled (terminal)
    Cancelled = 4,
}

impl StreamStatus {
    /// Check if status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamStatus::Completed | StreamStatus::Cancelled)
    }
}

/// A single sender-to-recipient vesting schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    /// Stream ID
    pub id: StreamId,

    /// Account that created and funded the stream
    pub sender: AccountId,

    /// Account entitled to vested funds
    pub recipient: AccountId,

    /// Total amount locked at creation
    pub deposit: Amount,

    /// Vesting starts
    pub start_time: Timestamp,

    /// Vesting ends, everything is vested
    pub stop_time: Timestamp,

    /// `deposit / (stop_time - start_time)`
    pub rate_per_second: Amount,

    /// `deposit % (stop_time - start_time)`, vested at `stop_time` on top of
    /// the per-second rate
    pub remainder: Amount,

    /// Cumulative amount paid to the recipient
    pub withdrawn: Amount,

    /// Amount returned to the sender on cancellation
    pub refunded: Amount,

    /// Creation time
    pub created_at: Timestamp,

    /// Stored lifecycle
    pub lifecycle: Lifecycle,
}

impl Stream {
    /// Status as observed at `now`
    pub fn status_at(&self, now: Timestamp) -> StreamStatus {
        match self.lifecycle {
            Lifecycle::Completed { .. } => StreamStatus::Completed,
            Lifecycle::Cancelled { .. } => StreamStatus::Cancelled,
            Lifecycle::Open if now < self.start_time => StreamStatus::Pending,
            Lifecycle::Open => StreamStatus::Active,
        }
    }

    /// Check if stream is in terminal state
    pub fn is_terminal(&self) -> bool {
        !matches!(self.lifecycle, Lifecycle::Open)
    }

    /// Amount still held in escrow for this stream
    pub fn escrow_balance(&self) -> Amount {
        // withdrawn + refunded <= deposit is maintained by the ledger
        self.deposit
            .saturating_sub(self.withdrawn)
            .saturating_sub(self.refunded)
    }
}

/// Read-only view of a stream, evaluated at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSnapshot {
    /// Stream record
    pub stream: Stream,

    /// Status at `observed_at`
    pub status: StreamStatus,

    /// Vested amount at `observed_at`
    pub vested: Amount,

    /// Withdrawable amount at `observed_at`
    pub withdrawable: Amount,

    /// Remaining escrow balance
    pub balance: Amount,

    /// Time the snapshot was taken
    pub observed_at: Timestamp,
}

/// Kind of committed mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventType {
    /// Stream created and deposit locked
    Created = 1,
    /// Recipient withdrew vested funds
    Withdrawn = 2,
    /// Stream cancelled, balance split
    Cancelled = 3,
    /// Final withdrawal emptied the stream
    Completed = 4,
}

/// Journal entry for a committed mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Unique event ID (UUIDv7 for time-ordering)
    pub event_id: Uuid,

    /// Stream this event belongs to
    pub stream_id: StreamId,

    /// Type of event
    pub event_type: EventType,

    /// Account that triggered the mutation
    pub caller: AccountId,

    /// Amount paid to the recipient
    pub recipient_amount: Amount,

    /// Amount refunded to the sender, or deposited by the sender for `Created`
    pub sender_amount: Amount,

    /// Logical time of the mutation
    pub timestamp: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_stream() -> Stream {
        Stream {
            id: 1,
            sender: AccountId::new("alice"),
            recipient: AccountId::new("bob"),
            deposit: 1_000,
            start_time: 100,
            stop_time: 200,
            rate_per_second: 10,
            remainder: 0,
            withdrawn: 0,
            refunded: 0,
            created_at: 50,
            lifecycle: Lifecycle::Open,
        }
    }

    #[test]
    fn test_status_derived_from_clock() {
        let stream = sample_stream();
        assert_eq!(stream.status_at(99), StreamStatus::Pending);
        assert_eq!(stream.status_at(100), StreamStatus::Active);
        assert_eq!(stream.status_at(10_000), StreamStatus::Active);
    }

    #[test]
    fn test_terminal_lifecycle() {
        let mut stream = sample_stream();
        assert!(!stream.is_terminal());

        stream.lifecycle = Lifecycle::Cancelled { at: 150 };
        assert!(stream.is_terminal());
        assert_eq!(stream.status_at(0), StreamStatus::Cancelled);
        assert!(stream.status_at(0).is_terminal());

        stream.lifecycle = Lifecycle::Completed { at: 250 };
        assert_eq!(stream.status_at(150), StreamStatus::Completed);
    }

    #[test]
    fn test_escrow_balance() {
        let mut stream = sample_stream();
        stream.withdrawn = 300;
        stream.refunded = 200;
        assert_eq!(stream.escrow_balance(), 500);
    }
}
