//! Authorization predicates
//!
//! Pure checks, no state. Call sites turn a `false` into
//! [`Error::Unauthorized`](crate::Error::Unauthorized).

use crate::types::{AccountId, Stream};

/// Any funded caller may create a stream
pub fn can_create(_caller: &AccountId) -> bool {
    true
}

/// Only the recipient may withdraw
pub fn can_withdraw(stream: &Stream, caller: &AccountId) -> bool {
    *caller == stream.recipient
}

/// Sender or recipient may cancel
pub fn can_cancel(stream: &Stream, caller: &AccountId) -> bool {
    *caller == stream.sender || *caller == stream.recipient
}
