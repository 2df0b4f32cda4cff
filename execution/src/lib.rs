//! Lottery execution layer.
//!
//! This crate contains the draw lifecycle and payment approval state machines used by the
//! simulator (and any service that embeds them).
//!
//! ## Time
//! - Do not read wall-clock time inside execution. Every operation takes `now_ms`.
//! - A draw's phase is derived from `now_ms`, its `draw_date_ms` and the lock window, but
//!   never moves backwards: a persisted `Locked` or `Completed` status always wins.
//!
//! ## Storage / consistency invariants
//! All writes go through [`State::commit`] as one guarded batch. A transition that read a
//! stale version fails with `ConcurrentModification` and leaves nothing behind. Balances live
//! behind [`Ledger`] and are only touched after the batch commits, with an idempotency key per
//! ticket or payment so that redelivery is a no-op.
//!
//! ## Minimal settlement (example)
//! ```rust,ignore
//! use lotto_execution::{DrawLifecycle, DrawClock, Memory, MemoryLedger, PayoutCalculator, SubmitMode, TICKET_COST};
//! use std::sync::Arc;
//!
//! # async fn example(now_ms: u64) -> Result<(), lotto_execution::Error> {
//! let lifecycle = DrawLifecycle::new(
//!     Arc::new(Memory::new()),
//!     Arc::new(MemoryLedger::new()),
//!     DrawClock::default(),
//!     PayoutCalculator::default(),
//!     TICKET_COST,
//! );
//! let draw = lifecycle.create_draw(now_ms + 3_600_000, 4_003_000, None, now_ms).await?;
//! lifecycle.purchase_ticket(draw.id, "alice".into(), &[3, 7, 14, 21, 28, 35], now_ms).await?;
//! let batch = lifecycle
//!     .submit_results(draw.id, &[3, 7, 14, 21, 28, 36], SubmitMode::Emergency, now_ms)
//!     .await?;
//! assert_eq!(batch.records[0].winning_amount, 800_600);
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod ledger;
pub mod lifecycle;
pub mod matcher;
pub mod payments;
pub mod payout;
pub mod state;

#[cfg(test)]
mod mocks;

#[cfg(test)]
mod idempotency_tests;

mod error;
mod locks;

pub use clock::{DrawClock, LOCK_WINDOW_MS};
pub use error::Error;
pub use ledger::{Credit, CreditReason, CreditReceipt, Ledger, MemoryLedger};
pub use lifecycle::{DrawLifecycle, SubmitMode, TICKET_COST};
pub use matcher::{match_count, tally};
pub use payments::PaymentApprovalWorkflow;
pub use payout::{PayoutCalculator, PayoutPlan};
pub use state::{Batch, CommitError, Key, Memory, Pending, Sequence, State, Status, Value};
