//! Linear vesting math
//!
//! Pure functions over stored stream parameters. Anyone holding the same
//! [`Stream`] record and timestamp computes the same amounts.
//!
//! # Remainder rule
//!
//! `deposit = rate_per_second * duration + remainder`. Each elapsed second
//! vests `rate_per_second`; the remainder vests at `stop_time`, so
//! `vested_amount(stop_time) == deposit` with no rounding leakage.

use crate::{
    error::{Error, Result},
    types::{Amount, Lifecycle, Stream, Timestamp},
};

/// Split a deposit into `(rate_per_second, remainder)` over `[start_time, stop_time)`
///
/// Fails with `InvalidStreamParameters` for an empty or inverted range and
/// with `ArithmeticOverflow` if the duration is not representable.
pub fn split_rate(
    deposit: Amount,
    start_time: Timestamp,
    stop_time: Timestamp,
) -> Result<(Amount, Amount)> {
    if stop_time <= start_time {
        return Err(Error::InvalidStreamParameters(format!(
            "stop time {} must be after start time {}",
            stop_time, start_time
        )));
    }

    let duration = stop_time
        .checked_sub(start_time)
        .ok_or(Error::ArithmeticOverflow("stream duration"))?;
    let duration = Amount::try_from(duration)
        .map_err(|_| Error::ArithmeticOverflow("stream duration"))?;

    let rate = deposit
        .checked_div(duration)
        .ok_or(Error::ArithmeticOverflow("rate per second"))?;
    let remainder = deposit
        .checked_rem(duration)
        .ok_or(Error::ArithmeticOverflow("rate remainder"))?;

    // rate * duration + remainder must reproduce the deposit exactly
    let reconstructed = rate
        .checked_mul(duration)
        .and_then(|v| v.checked_add(remainder))
        .ok_or(Error::ArithmeticOverflow("rate reconstruction"))?;
    if reconstructed != deposit {
        return Err(Error::ArithmeticOverflow("rate reconstruction"));
    }

    Ok((rate, remainder))
}

/// Amount vested at `now`, ignoring lifecycle
///
/// Total: 0 up to `start_time`, `rate * duration + remainder` (the deposit)
/// from `stop_time` on.
pub fn vested_amount(stream: &Stream, now: Timestamp) -> Amount {
    if now <= stream.start_time {
        return 0;
    }
    if now >= stream.stop_time {
        // Every second at the rate, plus the remainder
        let duration = Amount::from(stream.stop_time.abs_diff(stream.start_time));
        return stream
            .rate_per_second
            .saturating_mul(duration)
            .saturating_add(stream.remainder)
            .min(stream.deposit);
    }

    // start < now < stop, so elapsed < duration and rate * elapsed < deposit
    let elapsed = Amount::from(now.abs_diff(stream.start_time));
    stream
        .rate_per_second
        .saturating_mul(elapsed)
        .min(stream.deposit)
}

/// Amount streamed to the recipient at `now`, honoring the lifecycle
///
/// Completed streams report the full deposit; cancelled streams stop at
/// what the recipient was paid.
pub fn streamed_amount(stream: &Stream, now: Timestamp) -> Amount {
    match stream.lifecycle {
        Lifecycle::Open => vested_amount(stream, now),
        Lifecycle::Completed { .. } => stream.deposit,
        Lifecycle::Cancelled { .. } => stream.withdrawn,
    }
}

/// Amount the recipient could withdraw at `now`
pub fn withdrawable_amount(stream: &Stream, now: Timestamp) -> Amount {
    if stream.is_terminal() {
        return 0;
    }
    vested_amount(stream, now).saturating_sub(stream.withdrawn)
}

/// Amount the sender would get back if the stream were cancelled at `now`
pub fn refundable_amount(stream: &Stream, now: Timestamp) -> Amount {
    if stream.is_terminal() {
        return 0;
    }
    stream.deposit.saturating_sub(vested_amount(stream, now))
}
