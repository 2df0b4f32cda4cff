//! Common types for the lotto settlement core.
//!
//! Defines number selections, draws, tickets, settlements, crypto payments, the payout tier
//! table and the error taxonomy shared by the execution layer and the simulator.
//!
//! Amounts are `u64` minor currency units and timestamps are milliseconds since the Unix
//! epoch.

pub mod draw;
pub mod error;
pub mod numbers;
pub mod payment;
pub mod payout;

pub use draw::{
    Draw, DrawId, DrawPhase, DrawStatus, SettlementBatch, SettlementRecord, Ticket, TicketId,
    TierSettlement, UserId,
};
pub use error::{ErrorKind, LotteryError};
pub use numbers::{NumberSet, NumberSetError, MAX_NUMBER, MIN_NUMBER, NUMBERS_PER_SET};
pub use payment::{
    AuditAction, AuditEntry, CryptoPayment, Currency, Decision, OperatorId, PaymentDecision,
    PaymentId, PaymentStatus, PaymentSubmission, UnknownCurrency,
};
pub use payout::{PayoutTier, TierRule, TierTable, TierTableError, BASIS_POINTS};
