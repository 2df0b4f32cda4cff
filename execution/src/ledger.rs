//! Balance collaborator.
//!
//! The core never mutates balances directly. Settlement and payment approval call
//! [`Ledger::credit`] with an idempotency key derived from the transition, so a retried or
//! redelivered credit is applied at most once.

use anyhow::{anyhow, Result};
use lotto_types::{DrawId, PaymentId, TicketId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CreditReason {
    Prize {
        draw_id: DrawId,
        ticket_id: TicketId,
        match_count: u8,
    },
    Deposit {
        payment_id: PaymentId,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credit {
    pub user_id: UserId,
    pub amount: u64,
    pub reason: CreditReason,
    pub idempotency_key: String,
}

impl Credit {
    pub fn prize(
        draw_id: DrawId,
        ticket_id: TicketId,
        user_id: UserId,
        match_count: u8,
        amount: u64,
    ) -> Self {
        Self {
            user_id,
            amount,
            reason: CreditReason::Prize {
                draw_id,
                ticket_id,
                match_count,
            },
            idempotency_key: format!("draw:{draw_id}:ticket:{ticket_id}"),
        }
    }

    pub fn deposit(payment_id: PaymentId, user_id: UserId, amount: u64) -> Self {
        Self {
            user_id,
            amount,
            reason: CreditReason::Deposit { payment_id },
            idempotency_key: format!("payment:{payment_id}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CreditReceipt {
    Applied { balance: u64 },
    /// The idempotency key was already used; nothing changed.
    Duplicate { balance: u64 },
}

pub trait Ledger: Send + Sync {
    fn credit(&self, credit: Credit) -> impl Future<Output = Result<CreditReceipt>> + Send;
}

#[derive(Default)]
struct Accounts {
    balances: HashMap<UserId, u64>,
    applied: HashMap<String, Credit>,
}

/// In-process ledger honoring idempotency keys.
#[derive(Default)]
pub struct MemoryLedger {
    accounts: Mutex<Accounts>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, user_id: &str) -> u64 {
        self.accounts
            .lock()
            .ok()
            .and_then(|accounts| accounts.balances.get(user_id).copied())
            .unwrap_or(0)
    }

    /// Number of distinct credits applied.
    pub fn applied(&self) -> usize {
        self.accounts
            .lock()
            .map(|accounts| accounts.applied.len())
            .unwrap_or(0)
    }
}

impl Ledger for MemoryLedger {
    async fn credit(&self, credit: Credit) -> Result<CreditReceipt> {
        let mut accounts = self
            .accounts
            .lock()
            .map_err(|_| anyhow!("ledger poisoned"))?;
        if let Some(previous) = accounts.applied.get(&credit.idempotency_key) {
            if previous.user_id != credit.user_id || previous.amount != credit.amount {
                return Err(anyhow!(
                    "idempotency key {} reused with different credit",
                    credit.idempotency_key
                ));
            }
            let balance = accounts
                .balances
                .get(&credit.user_id)
                .copied()
                .unwrap_or(0);
            return Ok(CreditReceipt::Duplicate { balance });
        }

        let entry = accounts.balances.entry(credit.user_id.clone()).or_insert(0);
        *entry = entry
            .checked_add(credit.amount)
            .ok_or_else(|| anyhow!("balance overflow for {}", credit.user_id))?;
        let balance = *entry;
        accounts
            .applied
            .insert(credit.idempotency_key.clone(), credit);
        Ok(CreditReceipt::Applied { balance })
    }
}
