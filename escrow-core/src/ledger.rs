//! Stream ledger
//!
//! Owns every stream and drives the escrow. Streams are kept in an arena
//! keyed by id, each behind its own mutex:
//!
//! ```text
//! DashMap<StreamId, Arc<Mutex<StreamEntry>>>
//!            │
//!            │ clone handle, release shard guard
//!            ▼
//!    Mutex<StreamEntry>  ── held for read → vest → pay → write
//! ```
//!
//! Operations on the same stream serialize on its mutex; operations on
//! different streams never contend. Each operation reads the clock once,
//! after taking the lock.
//!
//! # Example
//!
//! ```
//! use escrow_core::{AccountId, Config, ManualClock, PayoutBook, StreamLedger};
//! use std::sync::Arc;
//!
//! let clock = Arc::new(ManualClock::new(1_000));
//! let book = Arc::new(PayoutBook::new());
//! let ledger = StreamLedger::new(&Config::default(), clock.clone(), book.clone()).unwrap();
//!
//! let alice = AccountId::new("alice");
//! let bob = AccountId::new("bob");
//! let id = ledger.create_stream(&alice, &bob, 3_600, 1_000, 4_600, 3_600).unwrap();
//!
//! clock.advance(1_800);
//! assert_eq!(ledger.withdraw(id, &bob, None).unwrap(), 1_800);
//! assert_eq!(book.balance_of(&bob), 1_800);
//! ```

use crate::{
    access,
    clock::ClockSource,
    config::PolicyConfig,
    error::{Error, Result},
    escrow::EscrowAccount,
    metrics::Metrics,
    payout::PayoutSink,
    types::{
        AccountId, Amount, EventType, Lifecycle, Stream, StreamEvent, StreamId, StreamSnapshot,
        Timestamp,
    },
    vesting, Config,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Stream record plus its event history
#[derive(Debug)]
struct StreamEntry {
    stream: Stream,
    events: Vec<StreamEvent>,
}

impl StreamEntry {
    fn record(
        &mut self,
        event_type: EventType,
        caller: &AccountId,
        recipient_amount: Amount,
        sender_amount: Amount,
        timestamp: Timestamp,
    ) {
        self.events.push(StreamEvent {
            event_id: Uuid::now_v7(),
            stream_id: self.stream.id,
            event_type,
            caller: caller.clone(),
            recipient_amount,
            sender_amount,
            timestamp,
        });
    }

    /// Record `amount` paid to the recipient, bringing the total to `withdrawn`
    ///
    /// Returns true when the payment completed the stream.
    fn commit_withdrawal(
        &mut self,
        caller: &AccountId,
        withdrawn: Amount,
        amount: Amount,
        now: Timestamp,
    ) -> bool {
        self.stream.withdrawn = withdrawn;
        self.record(EventType::Withdrawn, caller, amount, 0, now);
        if withdrawn == self.stream.deposit {
            self.stream.lifecycle = Lifecycle::Completed { at: now };
            self.record(EventType::Completed, caller, 0, 0, now);
            return true;
        }
        false
    }
}

/// How a cancelled stream's balance was split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOutcome {
    /// Vested, unwithdrawn amount paid to the recipient
    pub recipient_amount: Amount,
    /// Unvested amount returned to the sender
    pub sender_amount: Amount,
}

/// Streaming escrow ledger
pub struct StreamLedger {
    /// Stream arena
    streams: DashMap<StreamId, Arc<Mutex<StreamEntry>>>,

    /// Last assigned stream ID
    last_id: AtomicU64,

    /// Custody of deposits
    escrow: EscrowAccount,

    /// Time source
    clock: Arc<dyn ClockSource>,

    /// Accepted operations
    policy: PolicyConfig,

    /// Metrics
    metrics: Metrics,
}

impl std::fmt::Debug for StreamLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamLedger")
            .field("streams", &self.streams.len())
            .field("escrow", &self.escrow)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl StreamLedger {
    /// Create an empty ledger
    pub fn new(
        config: &Config,
        clock: Arc<dyn ClockSource>,
        sink: Arc<dyn PayoutSink>,
    ) -> Result<Self> {
        let metrics = Metrics::new()
            .map_err(|e| Error::Config(format!("Failed to register metrics: {}", e)))?;

        Ok(Self {
            streams: DashMap::new(),
            last_id: AtomicU64::new(0),
            escrow: EscrowAccount::new(sink),
            clock,
            policy: config.policy.clone(),
            metrics,
        })
    }

    /// Create a stream funded with `supplied_value`
    ///
    /// `supplied_value` is the value that accompanied the call; it must equal
    /// `deposit` exactly.
    pub fn create_stream(
        &self,
        sender: &AccountId,
        recipient: &AccountId,
        deposit: Amount,
        start_time: Timestamp,
        stop_time: Timestamp,
        supplied_value: Amount,
    ) -> Result<StreamId> {
        if deposit == 0 {
            return Err(Error::InvalidStreamParameters(
                "deposit must be positive".to_string(),
            ));
        }
        if sender == recipient {
            return Err(Error::InvalidStreamParameters(
                "sender and recipient must differ".to_string(),
            ));
        }

        let (rate_per_second, remainder) = vesting::split_rate(deposit, start_time, stop_time)?;

        if let Some(max) = self.policy.max_stream_duration_secs {
            // split_rate already proved the duration fits
            let duration = stop_time.abs_diff(start_time);
            if duration > max {
                return Err(Error::InvalidStreamParameters(format!(
                    "duration {}s exceeds maximum {}s",
                    duration, max
                )));
            }
        }

        if supplied_value != deposit {
            return Err(Error::InsufficientFunding {
                required: deposit,
                supplied: supplied_value,
            });
        }

        if !access::can_create(sender) {
            return Err(Error::Unauthorized {
                stream_id: 0,
                caller: sender.clone(),
            });
        }

        let now = self.clock.now();
        let id = self.allocate_id()?;
        self.escrow.lock(id, sender, deposit)?;

        let mut entry = StreamEntry {
            stream: Stream {
                id,
                sender: sender.clone(),
                recipient: recipient.clone(),
                deposit,
                start_time,
                stop_time,
                rate_per_second,
                remainder,
                withdrawn: 0,
                refunded: 0,
                created_at: now,
                lifecycle: Lifecycle::Open,
            },
            events: Vec::new(),
        };
        entry.record(EventType::Created, sender, 0, deposit, now);
        self.streams.insert(id, Arc::new(Mutex::new(entry)));

        self.metrics.record_stream_created();
        self.metrics.update_locked_amount(self.escrow.total_locked());

        tracing::info!(
            stream_id = id,
            %sender,
            %recipient,
            deposit,
            start_time,
            stop_time,
            "Stream created"
        );

        Ok(id)
    }

    /// Withdraw vested funds
    ///
    /// With `requested == None` the whole withdrawable amount is paid.
    /// Returns the amount paid.
    pub fn withdraw(
        &self,
        stream_id: StreamId,
        caller: &AccountId,
        requested: Option<Amount>,
    ) -> Result<Amount> {
        let handle = self.handle(stream_id)?;
        let mut entry = handle.lock();
        let now = self.clock.now();

        if !access::can_withdraw(&entry.stream, caller) {
            return Err(Error::Unauthorized {
                stream_id,
                caller: caller.clone(),
            });
        }

        match entry.stream.lifecycle {
            Lifecycle::Open => {}
            Lifecycle::Completed { .. } | Lifecycle::Cancelled { .. } => {
                return Err(Error::InvalidState {
                    stream_id,
                    status: entry.stream.status_at(now),
                });
            }
        }

        let vested = vesting::vested_amount(&entry.stream, now);
        let payable = vested
            .checked_sub(entry.stream.withdrawn)
            .ok_or(Error::ArithmeticOverflow("withdrawable amount"))?;
        if payable == 0 {
            return Err(Error::NothingToWithdraw(stream_id));
        }

        let amount = match requested {
            None => payable,
            Some(requested) => {
                if !self.policy.partial_withdrawals_enabled && requested != payable {
                    return Err(Error::PolicyDisabled("partial withdrawal"));
                }
                if requested == 0 || requested > payable {
                    return Err(Error::ExceedsVestedBalance {
                        requested,
                        available: payable,
                    });
                }
                requested
            }
        };

        let withdrawn = entry
            .stream
            .withdrawn
            .checked_add(amount)
            .ok_or(Error::ArithmeticOverflow("withdrawn total"))?;
        if withdrawn > entry.stream.deposit {
            return Err(Error::ArithmeticOverflow("withdrawn exceeds deposit"));
        }

        tracing::debug!(stream_id, vested, payable, amount, now, "Computed withdrawal");

        let recipient = entry.stream.recipient.clone();
        if let Err(err) = self.escrow.release(stream_id, &recipient, amount) {
            self.metrics.record_transfer_failure();
            return Err(err);
        }

        // Payout succeeded, commit
        let completed = entry.commit_withdrawal(caller, withdrawn, amount, now);

        self.metrics.record_withdrawal();
        self.metrics.update_locked_amount(self.escrow.total_locked());

        tracing::info!(
            stream_id,
            %recipient,
            amount,
            withdrawn,
            completed,
            "Withdrawal committed"
        );

        Ok(amount)
    }

    /// Withdraw everything currently withdrawable
    pub fn withdraw_max(&self, stream_id: StreamId, caller: &AccountId) -> Result<Amount> {
        self.withdraw(stream_id, caller, None)
    }

    /// Cancel a stream, paying the recipient what has vested and refunding the rest
    pub fn cancel(&self, stream_id: StreamId, caller: &AccountId) -> Result<CancelOutcome> {
        if !self.policy.cancellation_enabled {
            return Err(Error::PolicyDisabled("cancel"));
        }

        let handle = self.handle(stream_id)?;
        let mut entry = handle.lock();
        let now = self.clock.now();

        if !access::can_cancel(&entry.stream, caller) {
            return Err(Error::Unauthorized {
                stream_id,
                caller: caller.clone(),
            });
        }

        match entry.stream.lifecycle {
            Lifecycle::Open => {}
            Lifecycle::Completed { .. } | Lifecycle::Cancelled { .. } => {
                return Err(Error::InvalidState {
                    stream_id,
                    status: entry.stream.status_at(now),
                });
            }
        }

        let vested = vesting::vested_amount(&entry.stream, now);
        let recipient_amount = vested
            .checked_sub(entry.stream.withdrawn)
            .ok_or(Error::ArithmeticOverflow("recipient share"))?;
        let sender_amount = entry
            .stream
            .escrow_balance()
            .checked_sub(recipient_amount)
            .ok_or(Error::ArithmeticOverflow("sender refund"))?;
        let withdrawn = entry
            .stream
            .withdrawn
            .checked_add(recipient_amount)
            .ok_or(Error::ArithmeticOverflow("withdrawn total"))?;

        let sender = entry.stream.sender.clone();
        let recipient = entry.stream.recipient.clone();
        let payouts = [(recipient.clone(), recipient_amount), (sender, sender_amount)];
        if let Err(failure) = self.escrow.settle(stream_id, &payouts) {
            self.metrics.record_transfer_failure();

            // A recipient payout the sink would not give back is a withdrawal
            let kept = failure.unreclaimed_to(&recipient);
            if kept > 0 {
                let withdrawn = entry
                    .stream
                    .withdrawn
                    .checked_add(kept)
                    .ok_or(Error::ArithmeticOverflow("withdrawn total"))?;
                entry.commit_withdrawal(caller, withdrawn, kept, now);
                self.metrics.update_locked_amount(self.escrow.total_locked());
                tracing::warn!(
                    stream_id,
                    %recipient,
                    kept,
                    "Cancel failed after paying recipient, recorded as withdrawal"
                );
            }
            return Err(failure.error);
        }

        entry.stream.withdrawn = withdrawn;
        entry.stream.refunded = sender_amount;
        entry.stream.lifecycle = Lifecycle::Cancelled { at: now };
        entry.record(
            EventType::Cancelled,
            caller,
            recipient_amount,
            sender_amount,
            now,
        );

        self.metrics.record_cancellation();
        self.metrics.update_locked_amount(self.escrow.total_locked());

        tracing::info!(
            stream_id,
            %caller,
            recipient_amount,
            sender_amount,
            "Stream cancelled"
        );

        Ok(CancelOutcome {
            recipient_amount,
            sender_amount,
        })
    }

    /// Snapshot of a stream at the current time
    pub fn get_stream(&self, stream_id: StreamId) -> Result<StreamSnapshot> {
        let handle = self.handle(stream_id)?;
        let entry = handle.lock();
        let now = self.clock.now();
        let stream = entry.stream.clone();

        Ok(StreamSnapshot {
            status: stream.status_at(now),
            vested: vesting::streamed_amount(&stream, now),
            withdrawable: vesting::withdrawable_amount(&stream, now),
            balance: self.escrow.balance_of(stream_id),
            observed_at: now,
            stream,
        })
    }

    /// Remaining escrow for a stream
    pub fn balance_of(&self, stream_id: StreamId) -> Result<Amount> {
        let handle = self.handle(stream_id)?;
        let _entry = handle.lock();
        Ok(self.escrow.balance_of(stream_id))
    }

    /// Amount vested at `now`
    ///
    /// Accepts any timestamp. Terminal streams report what was actually
    /// streamed to the recipient.
    pub fn vested_amount(&self, stream_id: StreamId, now: Timestamp) -> Result<Amount> {
        let handle = self.handle(stream_id)?;
        let entry = handle.lock();
        Ok(vesting::streamed_amount(&entry.stream, now))
    }

    /// Amount the recipient could withdraw right now
    pub fn withdrawable_amount_of(&self, stream_id: StreamId) -> Result<Amount> {
        let handle = self.handle(stream_id)?;
        let entry = handle.lock();
        Ok(vesting::withdrawable_amount(&entry.stream, self.clock.now()))
    }

    /// Amount the sender would get back if the stream were cancelled now
    pub fn refundable_amount_of(&self, stream_id: StreamId) -> Result<Amount> {
        let handle = self.handle(stream_id)?;
        let entry = handle.lock();
        Ok(vesting::refundable_amount(&entry.stream, self.clock.now()))
    }

    /// Event history of a stream, oldest first
    pub fn events(&self, stream_id: StreamId) -> Result<Vec<StreamEvent>> {
        let handle = self.handle(stream_id)?;
        let entry = handle.lock();
        Ok(entry.events.clone())
    }

    /// IDs of streams paying `recipient`, ascending
    pub fn streams_of_recipient(&self, recipient: &AccountId) -> Vec<StreamId> {
        self.select(|stream| stream.recipient == *recipient)
    }

    /// IDs of streams funded by `sender`, ascending
    pub fn streams_of_sender(&self, sender: &AccountId) -> Vec<StreamId> {
        self.select(|stream| stream.sender == *sender)
    }

    /// Number of streams ever created
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Total value in custody
    pub fn total_locked(&self) -> Amount {
        self.escrow.total_locked()
    }

    /// Check money conservation for a stream
    ///
    /// `withdrawn + escrow balance + refunded == deposit`
    pub fn check_conservation(&self, stream_id: StreamId) -> Result<bool> {
        let handle = self.handle(stream_id)?;
        let entry = handle.lock();
        let stream = &entry.stream;

        let accounted = stream
            .withdrawn
            .checked_add(self.escrow.balance_of(stream_id))
            .and_then(|v| v.checked_add(stream.refunded))
            .ok_or(Error::ArithmeticOverflow("conservation check"))?;

        Ok(accounted == stream.deposit)
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    fn allocate_id(&self) -> Result<StreamId> {
        let previous = self
            .last_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| id.checked_add(1))
            .map_err(|_| Error::ArithmeticOverflow("stream id"))?;
        Ok(previous + 1)
    }

    fn handle(&self, stream_id: StreamId) -> Result<Arc<Mutex<StreamEntry>>> {
        // Clone out so the shard guard is dropped before the stream lock is taken
        self.streams
            .get(&stream_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(Error::StreamNotFound(stream_id))
    }

    fn select(&self, predicate: impl Fn(&Stream) -> bool) -> Vec<StreamId> {
        let handles: Vec<_> = self
            .streams
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut ids: Vec<StreamId> = handles
            .iter()
            .filter_map(|handle| {
                let entry = handle.lock();
                predicate(&entry.stream).then_some(entry.stream.id)
            })
            .collect();
        ids.sort_unstable();
        ids
    }
}
