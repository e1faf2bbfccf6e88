//! Consensus rules (C6): emission schedule, difficulty retarget and the
//! timestamp rule. Pure functions over block heights/timestamps — no shared
//! state, so no lock in this module's design.

use crate::error::{BtcError, Result};
use chrono::{DateTime, Utc};

/// `subsidy(h) = floor(INITIAL_SUBSIDY / 2^((h-1)/HALVING_INTERVAL))` for
/// `h >= 1`; `subsidy(0) = GENESIS_PREMINE`.
pub fn subsidy(height: u64) -> u64 {
    if height == 0 {
        return crate::GENESIS_PREMINE;
    }
    let halvings = (height - 1) / crate::HALVING_INTERVAL;
    if halvings >= 64 {
        0
    } else {
        crate::INITIAL_SUBSIDY >> halvings
    }
}

/// The reward a block at `tip_height + 1` will carry — what
/// `get_blockchain_info` reports as `current_reward`.
pub fn current_reward(tip_height: u64) -> u64 {
    subsidy(tip_height + 1)
}

/// Total coins that exist once the chain reaches `height` (genesis pre-mine
/// plus every subsidy paid from height 1 through `height`). (SUPPLEMENT:
/// backs `get_blockchain_info`'s `total_supply`.)
pub fn total_supply_at_height(height: u64) -> u64 {
    let mut total = crate::GENESIS_PREMINE;
    let mut subsidy_now = crate::INITIAL_SUBSIDY;
    let mut h = 1u64;
    while h <= height && subsidy_now > 0 {
        let era_last = h.saturating_add(crate::HALVING_INTERVAL - 1);
        let last_in_range = era_last.min(height);
        let blocks = last_in_range - h + 1;
        total = total.saturating_add(subsidy_now.saturating_mul(blocks));
        h = last_in_range + 1;
        subsidy_now /= 2;
    }
    total
}

/// Blocks remaining until the next halving boundary, counting from
/// `tip_height`. (SUPPLEMENT: backs `get_blockchain_info`'s
/// `blocks_until_halving`.)
pub fn blocks_until_halving(tip_height: u64) -> u64 {
    let era = tip_height / crate::HALVING_INTERVAL;
    let boundary = (era + 1) * crate::HALVING_INTERVAL;
    boundary - tip_height
}

/// Annualized inflation rate at `tip_height`: the new coins a year of
/// mining at the current subsidy would add, divided by supply already in
/// existence. (SUPPLEMENT, same provenance as the two helpers above.)
pub fn inflation_rate(tip_height: u64) -> f64 {
    let supply = total_supply_at_height(tip_height) as f64;
    if supply == 0.0 {
        return 0.0;
    }
    let blocks_per_year = (365.0 * 24.0 * 3600.0) / crate::TARGET_BLOCK_TIME as f64;
    let annual_new_coins = current_reward(tip_height) as f64 * blocks_per_year;
    annual_new_coins / supply
}

/// `RETARGET_INTERVAL` blocks at `TARGET_BLOCK_TIME` seconds each.
pub fn expected_timespan_secs() -> i64 {
    (crate::TARGET_BLOCK_TIME * crate::RETARGET_INTERVAL) as i64
}

/// Computes the new difficulty from how long the last retarget window
/// actually took versus how long it should have taken.
///
/// `ratio = clamp(actual/expected, 0.25, 4.0)`. If `ratio < 1` (blocks came
/// too fast), difficulty increases by at least 1; otherwise it decreases,
/// never below `MIN_DIFFICULTY`.
pub fn retarget_difficulty(current_difficulty: u32, actual_timespan_secs: i64, expected_timespan_secs: i64) -> u32 {
    let actual = actual_timespan_secs.max(1) as f64;
    let expected = expected_timespan_secs.max(1) as f64;
    let ratio = (actual / expected).clamp(0.25, 4.0);
    let d = current_difficulty as i64;

    let new_d = if ratio < 1.0 {
        d + (((1.0 - ratio) * 2.0).floor() as i64).max(1)
    } else {
        d - (((ratio - 1.0) * 2.0).floor() as i64)
    };

    new_d.max(crate::MIN_DIFFICULTY as i64) as u32
}

/// A block's timestamp must be strictly after its predecessor's and no more
/// than `MAX_TIME_DRIFT_SECS` ahead of the validator's own clock.
pub fn validate_timestamp(block_timestamp: DateTime<Utc>, prev_timestamp: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
    if block_timestamp <= prev_timestamp {
        return Err(BtcError::TimestampOutOfRange);
    }
    if (block_timestamp - now).num_seconds() > crate::MAX_TIME_DRIFT_SECS {
        return Err(BtcError::TimestampOutOfRange);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn subsidy_at_genesis_is_the_premine() {
        assert_eq!(subsidy(0), crate::GENESIS_PREMINE);
    }

    #[test]
    fn subsidy_halves_on_schedule() {
        assert_eq!(subsidy(1), crate::INITIAL_SUBSIDY);
        assert_eq!(subsidy(crate::HALVING_INTERVAL), crate::INITIAL_SUBSIDY);
        assert_eq!(subsidy(crate::HALVING_INTERVAL + 1), crate::INITIAL_SUBSIDY / 2);
        assert_eq!(subsidy(2 * crate::HALVING_INTERVAL + 1), crate::INITIAL_SUBSIDY / 4);
    }

    #[test]
    fn total_supply_matches_manual_sum_for_small_heights() {
        let manual: u64 = crate::GENESIS_PREMINE + (1..=100).map(subsidy).sum::<u64>();
        assert_eq!(total_supply_at_height(100), manual);
    }

    #[test]
    fn blocks_until_halving_counts_down_to_the_boundary() {
        assert_eq!(blocks_until_halving(crate::HALVING_INTERVAL - 1), 1);
        assert_eq!(blocks_until_halving(crate::HALVING_INTERVAL), crate::HALVING_INTERVAL);
    }

    #[test]
    fn retarget_clamps_to_four_x_in_either_direction() {
        let d = retarget_difficulty(10, 10_000_000, 1); // wildly too slow
        assert_eq!(d, 10 - 6); // ratio clamped to 4.0 -> d - floor(3*2)=d-6
        let d2 = retarget_difficulty(10, 1, 10_000_000); // wildly too fast
        assert_eq!(d2, 11); // ratio clamped to 0.25 -> d + floor((1-0.25)*2) = d + 1
    }

    #[test]
    fn retarget_never_drops_below_min_difficulty() {
        let d = retarget_difficulty(1, 10_000_000, 1);
        assert!(d >= crate::MIN_DIFFICULTY);
    }

    #[test]
    fn retarget_at_exactly_the_boundary_is_a_no_op() {
        let expected = expected_timespan_secs();
        assert_eq!(retarget_difficulty(5, expected, expected), 5);
    }

    #[test]
    fn timestamp_must_be_strictly_after_predecessor() {
        let now = Utc::now();
        let prev = now - Duration::seconds(10);
        assert!(validate_timestamp(prev + Duration::seconds(1), prev, now).is_ok());
        assert_eq!(
            validate_timestamp(prev, prev, now),
            Err(BtcError::TimestampOutOfRange)
        );
    }

    #[test]
    fn timestamp_rejects_excessive_future_drift() {
        let now = Utc::now();
        let prev = now - Duration::seconds(10);
        let too_far = now + Duration::seconds(crate::MAX_TIME_DRIFT_SECS + 1);
        assert_eq!(
            validate_timestamp(too_far, prev, now),
            Err(BtcError::TimestampOutOfRange)
        );
    }
}
