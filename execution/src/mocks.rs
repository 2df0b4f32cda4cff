use crate::{
    Credit, CreditReceipt, DrawClock, DrawLifecycle, Ledger, Memory, MemoryLedger,
    PaymentApprovalWorkflow, PayoutCalculator, TICKET_COST,
};
use anyhow::bail;
use lotto_types::{Currency, PaymentSubmission, TierTable};
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Fixed "now" used by tests (2023-11-14T22:13:20Z).
pub const NOW: u64 = 1_700_000_000_000;

/// A draw scheduled one hour after [`NOW`].
pub const DRAW_DATE: u64 = NOW + 3_600_000;

/// Creates a lifecycle over in-memory state and ledger with the default payout table
pub fn lifecycle() -> (
    DrawLifecycle<Memory, MemoryLedger>,
    Arc<Memory>,
    Arc<MemoryLedger>,
) {
    lifecycle_with_table(TierTable::default())
}

/// Creates a lifecycle over in-memory state and ledger with a custom payout table
pub fn lifecycle_with_table(
    table: TierTable,
) -> (
    DrawLifecycle<Memory, MemoryLedger>,
    Arc<Memory>,
    Arc<MemoryLedger>,
) {
    let state = Arc::new(Memory::new());
    let ledger = Arc::new(MemoryLedger::new());
    let lifecycle = DrawLifecycle::new(
        state.clone(),
        ledger.clone(),
        DrawClock::default(),
        PayoutCalculator::new(table),
        TICKET_COST,
    );
    (lifecycle, state, ledger)
}

/// Creates a payment workflow accepting every currency
pub fn workflow() -> (
    PaymentApprovalWorkflow<Memory, MemoryLedger>,
    Arc<Memory>,
    Arc<MemoryLedger>,
) {
    let state = Arc::new(Memory::new());
    let ledger = Arc::new(MemoryLedger::new());
    let workflow = PaymentApprovalWorkflow::new(state.clone(), ledger.clone(), Currency::ALL);
    (workflow, state, ledger)
}

/// Creates a payment submission
pub fn submission(user_id: &str, amount: i64, currency: &str, tx_hash: &str) -> PaymentSubmission {
    PaymentSubmission {
        user_id: user_id.to_string(),
        amount,
        currency: currency.to_string(),
        tx_hash: tx_hash.to_string(),
    }
}

/// Ledger that fails a range of calls (counted from zero) and delegates the rest
pub struct FlakyLedger {
    inner: MemoryLedger,
    failing: Range<usize>,
    calls: AtomicUsize,
}

impl FlakyLedger {
    pub fn new(failing: Range<usize>) -> Self {
        Self {
            inner: MemoryLedger::new(),
            failing,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn balance(&self, user_id: &str) -> u64 {
        self.inner.balance(user_id)
    }
}

impl Ledger for FlakyLedger {
    async fn credit(&self, credit: Credit) -> anyhow::Result<CreditReceipt> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&call) {
            bail!("ledger unavailable (call {call})");
        }
        self.inner.credit(credit).await
    }
}
