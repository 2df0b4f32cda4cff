use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

use crate::draw::{DrawId, DrawPhase};
use crate::numbers::NumberSetError;
use crate::payment::{PaymentId, PaymentStatus};

/// How a caller should treat a rejected operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input. Never retried automatically.
    Validation,
    /// Another transition won the race or the entity is terminal.
    Conflict,
    /// Malformed payout configuration. Settlement is blocked until fixed.
    Configuration,
    NotFound,
}

/// Rejections produced by the draw and payment state machines.
#[derive(Clone, Debug, ThisError, PartialEq, Eq)]
pub enum LotteryError {
    #[error(transparent)]
    Numbers(#[from] NumberSetError),
    #[error("amount must be positive (got={amount})")]
    InvalidAmount { amount: i64 },
    #[error("unsupported currency: {currency}")]
    UnsupportedCurrency { currency: String },
    #[error("a reason is required to reject a payment")]
    MissingReason,
    #[error("transaction hash is required")]
    MissingTxHash,
    #[error("transaction hash already submitted: {tx_hash}")]
    DuplicateTxHash { tx_hash: String },
    #[error("draw date must be in the future (draw_date_ms={draw_date_ms}, now_ms={now_ms})")]
    InvalidDrawDate { draw_date_ms: u64, now_ms: u64 },
    #[error("draw number must increase (got={draw_number}, next={next})")]
    InvalidDrawNumber { draw_number: u64, next: u64 },

    #[error("draw {draw_id} is already completed")]
    AlreadyCompleted { draw_id: DrawId },
    #[error("draw {draw_id} is not accepting tickets (phase={phase})")]
    DrawClosed { draw_id: DrawId, phase: DrawPhase },
    #[error("draw {draw_id} is still open (remaining_ms={remaining_ms})")]
    DrawStillOpen { draw_id: DrawId, remaining_ms: i64 },
    #[error("payment {payment_id} is not pending (status={status})")]
    NotPending {
        payment_id: PaymentId,
        status: PaymentStatus,
    },
    #[error("concurrent modification of {entity}")]
    ConcurrentModification { entity: String },

    #[error("no payout tier for {match_count} matches")]
    UnknownTier { match_count: u8 },
    #[error("payouts overflow at the tier for {match_count} matches")]
    PayoutOverflow { match_count: u8 },

    #[error("draw {draw_id} not found")]
    DrawNotFound { draw_id: DrawId },
    #[error("payment {payment_id} not found")]
    PaymentNotFound { payment_id: PaymentId },
}

impl LotteryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LotteryError::Numbers(_)
            | LotteryError::InvalidAmount { .. }
            | LotteryError::UnsupportedCurrency { .. }
            | LotteryError::MissingReason
            | LotteryError::MissingTxHash
            | LotteryError::DuplicateTxHash { .. }
            | LotteryError::InvalidDrawDate { .. }
            | LotteryError::InvalidDrawNumber { .. } => ErrorKind::Validation,
            LotteryError::AlreadyCompleted { .. }
            | LotteryError::DrawClosed { .. }
            | LotteryError::DrawStillOpen { .. }
            | LotteryError::NotPending { .. }
            | LotteryError::ConcurrentModification { .. } => ErrorKind::Conflict,
            LotteryError::UnknownTier { .. } | LotteryError::PayoutOverflow { .. } => {
                ErrorKind::Configuration
            }
            LotteryError::DrawNotFound { .. } | LotteryError::PaymentNotFound { .. } => {
                ErrorKind::NotFound
            }
        }
    }
}
