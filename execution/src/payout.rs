//! Per-tier payout computation.
//!
//! Pool-share tiers split `jackpot * bps / 10_000` evenly between their winners, rounding
//! down to the minor unit. What rounding (or an empty tier) leaves unpaid is reported as the
//! tier's remainder and stays in the operating pool. Amounts that do not fit in a `u64` fail
//! the plan instead of being clamped.

use lotto_types::{LotteryError, TierRule, TierSettlement, TierTable, BASIS_POINTS, NUMBERS_PER_SET};

#[derive(Clone, Debug, Default)]
pub struct PayoutCalculator {
    table: TierTable,
}

/// Every tier of one draw, plus totals.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayoutPlan {
    pub tiers: Vec<TierSettlement>,
    pub total_paid: u64,
    pub total_remainder: u64,
}

impl PayoutPlan {
    /// Payout owed to a single ticket with `match_count` matches.
    pub fn per_winner(&self, match_count: u8) -> u64 {
        self.tiers
            .iter()
            .find(|tier| tier.match_count == match_count)
            .map(|tier| tier.per_winner)
            .unwrap_or(0)
    }
}

impl PayoutCalculator {
    pub fn new(table: TierTable) -> Self {
        Self { table }
    }

    /// Payout for one tier given the jackpot and the number of winners at that tier.
    pub fn payout(
        &self,
        match_count: u8,
        jackpot: u64,
        winners: u64,
    ) -> Result<TierSettlement, LotteryError> {
        let rule = self
            .table
            .rule(match_count)
            .ok_or(LotteryError::UnknownTier { match_count })?;

        Ok(match rule {
            TierRule::Fixed { amount } => {
                let paid = amount
                    .checked_mul(winners)
                    .ok_or(LotteryError::PayoutOverflow { match_count })?;
                TierSettlement {
                    match_count,
                    winners,
                    allocation: paid,
                    per_winner: amount,
                    paid,
                    remainder: 0,
                }
            }
            TierRule::PoolShare { basis_points } => {
                let allocation =
                    (jackpot as u128 * basis_points as u128 / BASIS_POINTS as u128) as u64;
                let per_winner = allocation.checked_div(winners).unwrap_or(0);
                let paid = per_winner * winners;
                TierSettlement {
                    match_count,
                    winners,
                    allocation,
                    per_winner,
                    paid,
                    remainder: allocation - paid,
                }
            }
        })
    }

    /// Plan every tier of a draw from its winner tally (index = matches).
    ///
    /// Fails on the first match count that has tickets but no tier, so a malformed table
    /// never produces a partial settlement.
    pub fn plan(
        &self,
        jackpot: u64,
        tally: &[u64; NUMBERS_PER_SET + 1],
    ) -> Result<PayoutPlan, LotteryError> {
        let mut tiers = Vec::with_capacity(tally.len());
        for (match_count, winners) in tally.iter().copied().enumerate() {
            let match_count = match_count as u8;
            match self.payout(match_count, jackpot, winners) {
                Ok(tier) => tiers.push(tier),
                Err(LotteryError::UnknownTier { .. }) if winners == 0 => continue,
                Err(err) => return Err(err),
            }
        }
        let mut total_paid = 0u64;
        let mut total_remainder = 0u64;
        for tier in &tiers {
            let overflow = LotteryError::PayoutOverflow {
                match_count: tier.match_count,
            };
            total_paid = total_paid
                .checked_add(tier.paid)
                .ok_or_else(|| overflow.clone())?;
            total_remainder = total_remainder
                .checked_add(tier.remainder)
                .ok_or(overflow)?;
        }
        Ok(PayoutPlan {
            tiers,
            total_paid,
            total_remainder,
        })
    }
}
