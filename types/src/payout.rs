//! Payout tier table.
//!
//! The table maps a match count to a [`TierRule`]. It is configuration: operators supply the
//! authoritative schedule, and [`TierTable::default`] is only a starting point.

use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

use crate::numbers::NUMBERS_PER_SET;

/// Denominator for pool shares.
pub const BASIS_POINTS: u64 = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TierRule {
    /// Constant payout per winning ticket, regardless of winner count.
    Fixed { amount: u64 },
    /// Share of the jackpot split evenly between the tier's winners.
    PoolShare { basis_points: u16 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutTier {
    pub matches: u8,
    #[serde(flatten)]
    pub rule: TierRule,
}

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum TierTableError {
    #[error("tier matches out of range (got={matches}, max={max})")]
    MatchesOutOfRange { matches: u8, max: usize },
    #[error("tier for {matches} matches defined twice")]
    DuplicateTier { matches: u8 },
    #[error("pool shares exceed the jackpot (total={total_basis_points} bps)")]
    PoolSharesExceedJackpot { total_basis_points: u64 },
}

/// Validated, ascending tier table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TierTable {
    tiers: Vec<PayoutTier>,
}

impl TierTable {
    pub fn new(mut tiers: Vec<PayoutTier>) -> Result<Self, TierTableError> {
        tiers.sort_by_key(|tier| tier.matches);

        let mut total_basis_points = 0u64;
        let mut previous = None;
        for tier in &tiers {
            if tier.matches as usize > NUMBERS_PER_SET {
                return Err(TierTableError::MatchesOutOfRange {
                    matches: tier.matches,
                    max: NUMBERS_PER_SET,
                });
            }
            if previous == Some(tier.matches) {
                return Err(TierTableError::DuplicateTier {
                    matches: tier.matches,
                });
            }
            previous = Some(tier.matches);
            if let TierRule::PoolShare { basis_points } = tier.rule {
                total_basis_points += basis_points as u64;
            }
        }
        if total_basis_points > BASIS_POINTS {
            return Err(TierTableError::PoolSharesExceedJackpot { total_basis_points });
        }

        Ok(Self { tiers })
    }

    pub fn rule(&self, matches: u8) -> Option<TierRule> {
        self.tiers
            .iter()
            .find(|tier| tier.matches == matches)
            .map(|tier| tier.rule)
    }

    pub fn tiers(&self) -> &[PayoutTier] {
        &self.tiers
    }
}

impl Default for TierTable {
    /// 0-2 matches pay nothing, 3 pays a fixed 1 000, 4/5/6 split 10/20/70 % of the jackpot.
    fn default() -> Self {
        let fixed = |matches, amount| PayoutTier {
            matches,
            rule: TierRule::Fixed { amount },
        };
        let share = |matches, basis_points| PayoutTier {
            matches,
            rule: TierRule::PoolShare { basis_points },
        };
        Self {
            tiers: vec![
                fixed(0, 0),
                fixed(1, 0),
                fixed(2, 0),
                fixed(3, 1_000),
                share(4, 1_000),
                share(5, 2_000),
                share(6, 7_000),
            ],
        }
    }
}

impl<'de> Deserialize<'de> for TierTable {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let tiers = Vec::<PayoutTier>::deserialize(deserializer)?;
        TierTable::new(tiers).map_err(serde::de::Error::custom)
    }
}
