//! Outbound transfers
//!
//! The escrow never moves value itself; it asks a [`PayoutSink`] and trusts
//! the synchronous answer. [`PayoutBook`] is an in-memory implementation
//! used by tests and the node's simulation mode.

use crate::types::{AccountId, Amount};
use dashmap::{DashMap, DashSet};

/// External payout mechanism
pub trait PayoutSink: Send + Sync {
    /// Pay `amount` to `to`. An `Err` means nothing was paid.
    fn transfer(&self, to: &AccountId, amount: Amount) -> std::result::Result<(), String>;

    /// Take back a payment previously made by [`transfer`](Self::transfer)
    /// in the same operation.
    fn reclaim(&self, from: &AccountId, amount: Amount) -> std::result::Result<(), String>;
}

/// In-memory account balances
#[derive(Debug, Default)]
pub struct PayoutBook {
    balances: DashMap<AccountId, Amount>,
    rejecting: DashSet<AccountId>,
}

impl PayoutBook {
    /// Create empty book
    pub fn new() -> Self {
        Self::default()
    }

    /// Current balance of `account`
    pub fn balance_of(&self, account: &AccountId) -> Amount {
        self.balances.get(account).map(|b| *b).unwrap_or(0)
    }

    /// Make `account` refuse (or accept again) incoming transfers
    pub fn set_rejecting(&self, account: &AccountId, rejecting: bool) {
        if rejecting {
            self.rejecting.insert(account.clone());
        } else {
            self.rejecting.remove(account);
        }
    }

    /// Sum of all balances
    pub fn total(&self) -> Amount {
        self.balances
            .iter()
            .fold(0u128, |acc, entry| acc.saturating_add(*entry.value()))
    }
}

impl PayoutSink for PayoutBook {
    fn transfer(&self, to: &AccountId, amount: Amount) -> std::result::Result<(), String> {
        if self.rejecting.contains(to) {
            return Err(format!("account {} rejects incoming transfers", to));
        }

        let mut balance = self.balances.entry(to.clone()).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| format!("balance of {} would overflow", to))?;
        Ok(())
    }

    fn reclaim(&self, from: &AccountId, amount: Amount) -> std::result::Result<(), String> {
        let mut balance = self
            .balances
            .get_mut(from)
            .ok_or_else(|| format!("no balance for {}", from))?;
        *balance = balance
            .checked_sub(amount)
            .ok_or_else(|| format!("balance of {} below {}", from, amount))?;
        Ok(())
    }
}
