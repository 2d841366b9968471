//! Custody of deposited value
//!
//! Tracks how much of each stream's deposit is still held, and moves value
//! out through the [`PayoutSink`]. The ledger calls into this module while it
//! holds the stream's lock, so a stream's escrow balance is never touched by
//! two operations at once.

use crate::{
    error::{Error, Result},
    payout::PayoutSink,
    types::{AccountId, Amount, StreamId},
};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// A settlement that did not go through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettleFailure {
    /// Why the settlement stopped
    pub error: Error,

    /// Earlier payouts that could not be reclaimed and stay with their payee
    pub unreclaimed: Vec<(AccountId, Amount)>,
}

impl SettleFailure {
    /// Sum of unreclaimed payouts made to `account`
    pub fn unreclaimed_to(&self, account: &AccountId) -> Amount {
        self.unreclaimed
            .iter()
            .filter(|(to, _)| to == account)
            .fold(0u128, |acc, (_, amount)| acc.saturating_add(*amount))
    }
}

impl From<Error> for SettleFailure {
    fn from(error: Error) -> Self {
        Self {
            error,
            unreclaimed: Vec::new(),
        }
    }
}

/// Escrow balances keyed by stream
pub struct EscrowAccount {
    balances: DashMap<StreamId, Amount>,
    /// Running sum of `balances`
    locked: Mutex<Amount>,
    sink: Arc<dyn PayoutSink>,
}

impl std::fmt::Debug for EscrowAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscrowAccount")
            .field("streams", &self.balances.len())
            .field("locked", &*self.locked.lock())
            .finish_non_exhaustive()
    }
}

impl EscrowAccount {
    /// Create escrow paying out through `sink`
    pub fn new(sink: Arc<dyn PayoutSink>) -> Self {
        Self {
            balances: DashMap::new(),
            locked: Mutex::new(0),
            sink,
        }
    }

    /// Record `amount` received from `from` for `stream_id`
    ///
    /// The funds themselves arrive with the create call; this only attributes
    /// them to the stream.
    pub fn lock(&self, stream_id: StreamId, from: &AccountId, amount: Amount) -> Result<()> {
        // Total is checked first so a failure leaves both sides untouched
        let mut locked = self.locked.lock();
        let total = locked
            .checked_add(amount)
            .ok_or(Error::ArithmeticOverflow("escrow total"))?;

        let mut balance = self.balances.entry(stream_id).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or(Error::ArithmeticOverflow("escrow balance"))?;
        *locked = total;

        tracing::debug!(stream_id, %from, amount, "Locked deposit");
        Ok(())
    }

    /// Pay `amount` of the stream's escrow to `to`
    pub fn release(&self, stream_id: StreamId, to: &AccountId, amount: Amount) -> Result<()> {
        self.pay_out(stream_id, to, amount)?;
        tracing::debug!(stream_id, %to, amount, "Released from escrow");
        Ok(())
    }

    /// Return `amount` of unspent escrow to the sender `to`
    pub fn refund(&self, stream_id: StreamId, to: &AccountId, amount: Amount) -> Result<()> {
        self.pay_out(stream_id, to, amount)?;
        tracing::debug!(stream_id, %to, amount, "Refunded from escrow");
        Ok(())
    }

    /// Perform several payouts as one unit
    ///
    /// Payouts run in order. If one is rejected, the ones already made are
    /// reclaimed and the escrow balance restored before the error is returned.
    /// A payout the sink refuses to give back is listed in
    /// [`SettleFailure::unreclaimed`] and stays deducted from the escrow.
    pub fn settle(
        &self,
        stream_id: StreamId,
        payouts: &[(AccountId, Amount)],
    ) -> std::result::Result<(), SettleFailure> {
        let total = payouts
            .iter()
            .try_fold(0u128, |acc, (_, amount)| acc.checked_add(*amount))
            .ok_or(Error::ArithmeticOverflow("settlement total"))?;
        self.ensure_covered(stream_id, total)?;

        for (index, (to, amount)) in payouts.iter().enumerate() {
            if let Err(error) = self.pay_out(stream_id, to, *amount) {
                let unreclaimed = self.unwind(stream_id, &payouts[..index]);
                return Err(SettleFailure { error, unreclaimed });
            }
        }

        Ok(())
    }

    /// Remaining escrow for `stream_id`
    pub fn balance_of(&self, stream_id: StreamId) -> Amount {
        self.balances.get(&stream_id).map(|b| *b).unwrap_or(0)
    }

    /// Total value in custody across all streams
    pub fn total_locked(&self) -> Amount {
        *self.locked.lock()
    }

    fn ensure_covered(&self, stream_id: StreamId, amount: Amount) -> Result<Amount> {
        let balance = self.balance_of(stream_id);
        if amount > balance {
            return Err(Error::ArithmeticOverflow("escrow balance underflow"));
        }
        Ok(balance)
    }

    fn pay_out(&self, stream_id: StreamId, to: &AccountId, amount: Amount) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }

        let balance = self.ensure_covered(stream_id, amount)?;

        // No map guard is held across the external call
        self.sink.transfer(to, amount).map_err(|reason| {
            tracing::warn!(stream_id, %to, amount, %reason, "Payout rejected");
            Error::TransferFailed(reason)
        })?;

        self.balances.insert(stream_id, balance - amount);
        let mut locked = self.locked.lock();
        *locked = locked.saturating_sub(amount);
        Ok(())
    }

    fn unwind(
        &self,
        stream_id: StreamId,
        paid: &[(AccountId, Amount)],
    ) -> Vec<(AccountId, Amount)> {
        let mut unreclaimed = Vec::new();
        for (to, amount) in paid.iter().rev().filter(|(_, amount)| *amount > 0) {
            match self.sink.reclaim(to, *amount) {
                Ok(()) => {
                    {
                        let mut balance = self.balances.entry(stream_id).or_insert(0);
                        *balance = balance.saturating_add(*amount);
                    }
                    let mut locked = self.locked.lock();
                    *locked = locked.saturating_add(*amount);
                }
                Err(reason) => {
                    tracing::error!(stream_id, %to, amount, %reason, "Failed to reclaim payout");
                    unreclaimed.push((to.clone(), *amount));
                }
            }
        }
        unreclaimed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payout::PayoutBook;

    fn escrow() -> (EscrowAccount, Arc<PayoutBook>) {
        let book = Arc::new(PayoutBook::new());
        (EscrowAccount::new(book.clone()), book)
    }

    #[test]
    fn test_lock_and_release() {
        let (escrow, book) = escrow();
        let alice = AccountId::new("alice");
        let bob = AccountId::new("bob");

        escrow.lock(1, &alice, 1_000).unwrap();
        assert_eq!(escrow.balance_of(1), 1_000);

        escrow.release(1, &bob, 400).unwrap();
        assert_eq!(escrow.balance_of(1), 600);
        assert_eq!(book.balance_of(&bob), 400);

        escrow.refund(1, &alice, 600).unwrap();
        assert_eq!(escrow.balance_of(1), 0);
        assert_eq!(book.balance_of(&alice), 600);
    }

    #[test]
    fn test_release_more_than_balance() {
        let (escrow, book) = escrow();
        escrow.lock(1, &AccountId::new("alice"), 100).unwrap();

        let result = escrow.release(1, &AccountId::new("bob"), 101);
        assert!(matches!(result, Err(Error::ArithmeticOverflow(_))));
        assert_eq!(escrow.balance_of(1), 100);
        assert_eq!(book.total(), 0);
    }

    #[test]
    fn test_rejected_transfer_keeps_balance() {
        let (escrow, book) = escrow();
        let bob = AccountId::new("bob");
        escrow.lock(1, &AccountId::new("alice"), 100).unwrap();
        book.set_rejecting(&bob, true);

        let result = escrow.release(1, &bob, 50);
        assert!(matches!(result, Err(Error::TransferFailed(_))));
        assert_eq!(escrow.balance_of(1), 100);
    }

    #[test]
    fn test_settle_unwinds_on_failure() {
        let (escrow, book) = escrow();
        let alice = AccountId::new("alice");
        let bob = AccountId::new("bob");
        escrow.lock(1, &alice, 100).unwrap();
        book.set_rejecting(&alice, true);

        let failure = escrow
            .settle(1, &[(bob.clone(), 30), (alice.clone(), 70)])
            .unwrap_err();
        assert!(matches!(failure.error, Error::TransferFailed(_)));
        assert!(failure.unreclaimed.is_empty());
        assert_eq!(book.balance_of(&bob), 0);
        assert_eq!(escrow.balance_of(1), 100);
        assert_eq!(escrow.total_locked(), 100);
    }

    /// Pays everyone except `refuses`, and never gives anything back
    struct OneWaySink {
        inner: PayoutBook,
        refuses: AccountId,
    }

    impl PayoutSink for OneWaySink {
        fn transfer(&self, to: &AccountId, amount: Amount) -> std::result::Result<(), String> {
            if *to == self.refuses {
                return Err(format!("{} rejects", to));
            }
            self.inner.transfer(to, amount)
        }

        fn reclaim(&self, _from: &AccountId, _amount: Amount) -> std::result::Result<(), String> {
            Err("reclaim not supported".to_string())
        }
    }

    #[test]
    fn test_settle_reports_unreclaimed_payouts() {
        let alice = AccountId::new("alice");
        let bob = AccountId::new("bob");
        let sink = Arc::new(OneWaySink {
            inner: PayoutBook::new(),
            refuses: alice.clone(),
        });
        let escrow = EscrowAccount::new(sink.clone());
        escrow.lock(1, &alice, 100).unwrap();

        let failure = escrow
            .settle(1, &[(bob.clone(), 30), (alice.clone(), 70)])
            .unwrap_err();
        assert!(matches!(failure.error, Error::TransferFailed(_)));
        assert_eq!(failure.unreclaimed, vec![(bob.clone(), 30)]);
        assert_eq!(failure.unreclaimed_to(&bob), 30);
        assert_eq!(failure.unreclaimed_to(&alice), 0);

        // The payout stays with bob and out of custody
        assert_eq!(sink.inner.balance_of(&bob), 30);
        assert_eq!(escrow.balance_of(1), 70);
        assert_eq!(escrow.total_locked(), 70);
    }

    #[test]
    fn test_settle_uncovered_total() {
        let (escrow, book) = escrow();
        escrow.lock(1, &AccountId::new("alice"), 10).unwrap();

        let failure = escrow
            .settle(1, &[(AccountId::new("bob"), 11)])
            .unwrap_err();
        assert!(matches!(failure.error, Error::ArithmeticOverflow(_)));
        assert_eq!(book.total(), 0);
    }

    #[test]
    fn test_total_locked() {
        let (escrow, _) = escrow();
        let alice = AccountId::new("alice");
        escrow.lock(1, &alice, 100).unwrap();
        escrow.lock(2, &alice, 250).unwrap();
        assert_eq!(escrow.total_locked(), 350);

        escrow.release(2, &AccountId::new("bob"), 50).unwrap();
        assert_eq!(escrow.total_locked(), 300);
    }

    #[test]
    fn test_lock_overflow_leaves_total() {
        let (escrow, _) = escrow();
        let alice = AccountId::new("alice");
        escrow.lock(1, &alice, u128::MAX).unwrap();

        assert!(matches!(
            escrow.lock(2, &alice, 1),
            Err(Error::ArithmeticOverflow(_))
        ));
        assert_eq!(escrow.total_locked(), u128::MAX);
        assert_eq!(escrow.balance_of(2), 0);
    }
}
