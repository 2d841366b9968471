//! StreamPay Escrow Core
//!
//! Time-based payment streaming escrow: a sender locks a deposit that vests
//! linearly to a recipient between a start and stop time, and the recipient
//! withdraws the vested part whenever they like.
//!
//! # Architecture
//!
//! - **ClockSource**: current logical time, read once per operation
//! - **Vesting**: pure integer math, identical for every caller
//! - **StreamLedger**: arena of streams, one lock per stream
//! - **Access**: who may withdraw or cancel
//! - **EscrowAccount**: custody balances, payouts through a `PayoutSink`
//!
//! # Invariants
//!
//! - Money conservation: withdrawn + escrow balance + refunded == deposit
//! - Boundary exactness: vested(start) == 0, vested(stop) == deposit
//! - All-or-nothing: a rejected payout leaves the stream untouched
//! - Terminal states (Completed, Cancelled) accept no further mutation

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod clock;
pub mod vesting;
pub mod access;
pub mod payout;
pub mod escrow;
pub mod ledger;
pub mod error;
pub mod config;
pub mod metrics;

// Re-exports
pub use error::{Error, Result};
pub use types::{
    AccountId, Amount, EventType, Lifecycle, Stream, StreamEvent, StreamId, StreamSnapshot,
    StreamStatus, Timestamp,
};
pub use clock::{ClockSource, ManualClock, SystemClock};
pub use payout::{PayoutBook, PayoutSink};
pub use escrow::{EscrowAccount, SettleFailure};
pub use ledger::{CancelOutcome, StreamLedger};
pub use config::Config;
