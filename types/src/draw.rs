use serde::{Deserialize, Serialize};

use crate::numbers::NumberSet;

pub type DrawId = u64;
pub type TicketId = u64;
pub type UserId = String;

/// Persisted lifecycle status of a draw.
///
/// Transitions are linear (`Open -> Locked -> Completed`) and `Completed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawStatus {
    Open,
    Locked,
    Completed,
}

/// Phase of a draw as observed at some instant.
///
/// Combines the persisted [`DrawStatus`] with the wall clock: a draw stored as `Open` is
/// observed as `Locked` once the lock window has been reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawPhase {
    Open,
    Locked,
    Completed,
}

impl From<DrawStatus> for DrawPhase {
    fn from(status: DrawStatus) -> Self {
        match status {
            DrawStatus::Open => DrawPhase::Open,
            DrawStatus::Locked => DrawPhase::Locked,
            DrawStatus::Completed => DrawPhase::Completed,
        }
    }
}

impl std::fmt::Display for DrawPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DrawPhase::Open => "open",
            DrawPhase::Locked => "locked",
            DrawPhase::Completed => "completed",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draw {
    pub id: DrawId,
    pub draw_number: u64,
    pub draw_date_ms: u64,
    /// Jackpot pool in minor currency units.
    pub jackpot: u64,
    pub status: DrawStatus,
    pub winning_numbers: Option<NumberSet>,
    pub locked_at_ms: Option<u64>,
    pub completed_at_ms: Option<u64>,
    pub ticket_count: u64,
    /// Ticket revenue collected while the draw was open.
    pub sales: u64,
    /// Bumped on every persisted change; used as the optimistic-lock token.
    pub version: u64,
}

impl Draw {
    pub fn new(id: DrawId, draw_number: u64, draw_date_ms: u64, jackpot: u64) -> Self {
        Self {
            id,
            draw_number,
            draw_date_ms,
            jackpot,
            status: DrawStatus::Open,
            winning_numbers: None,
            locked_at_ms: None,
            completed_at_ms: None,
            ticket_count: 0,
            sales: 0,
            version: 0,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == DrawStatus::Completed
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub draw_id: DrawId,
    pub user_id: UserId,
    pub numbers: NumberSet,
    pub cost: u64,
    pub purchased_at_ms: u64,
    /// Set once, when the owning draw settles.
    pub match_count: Option<u8>,
    /// Set once, when the owning draw settles.
    pub winning_amount: Option<u64>,
}

impl Ticket {
    pub fn is_settled(&self) -> bool {
        self.match_count.is_some()
    }
}

/// Outcome of a single ticket in a settled draw.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub ticket_id: TicketId,
    pub user_id: UserId,
    pub match_count: u8,
    pub winning_amount: u64,
}

/// Accounting for one match tier in a settled draw.
///
/// For every tier `paid + remainder == allocation`; the remainder stays in the operating pool.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSettlement {
    pub match_count: u8,
    pub winners: u64,
    pub allocation: u64,
    pub per_winner: u64,
    pub paid: u64,
    pub remainder: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementBatch {
    pub draw_id: DrawId,
    pub draw_number: u64,
    pub winning_numbers: NumberSet,
    pub records: Vec<SettlementRecord>,
    pub tiers: Vec<TierSettlement>,
    pub total_paid: u64,
    pub total_remainder: u64,
    pub settled_at_ms: u64,
}

impl SettlementBatch {
    /// Records with a non-zero payout.
    pub fn winners(&self) -> impl Iterator<Item = &SettlementRecord> {
        self.records.iter().filter(|record| record.winning_amount > 0)
    }

    pub fn tier(&self, match_count: u8) -> Option<&TierSettlement> {
        self.tiers.iter().find(|tier| tier.match_count == match_count)
    }
}
