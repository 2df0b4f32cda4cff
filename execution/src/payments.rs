//! Crypto payment approval workflow.
//!
//! A submitted payment waits as `Pending` until an operator approves or rejects it. Both
//! outcomes are terminal and a second decision always fails with `NotPending`. Approval is
//! the only transition that touches a balance, and its credit is keyed on the payment id so
//! it lands exactly once.

use anyhow::anyhow;
use lotto_types::{
    AuditAction, AuditEntry, CryptoPayment, Currency, Decision, LotteryError, OperatorId,
    PaymentDecision, PaymentId, PaymentStatus, PaymentSubmission,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info};

use crate::error::Error;
use crate::ledger::{Credit, CreditReceipt, Ledger};
use crate::locks::EntityLocks;
use crate::state::{allocate_id, load_ids, Key, Pending, Sequence, State, Value};

pub struct PaymentApprovalWorkflow<S: State, L: Ledger> {
    state: Arc<S>,
    ledger: Arc<L>,
    accepted: BTreeSet<Currency>,
    locks: EntityLocks,
}

enum Verdict {
    Approve { notes: Option<String> },
    Reject { reason: String },
}

fn non_blank(text: Option<String>) -> Option<String> {
    text.map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

impl<S: State, L: Ledger> PaymentApprovalWorkflow<S, L> {
    pub fn new(state: Arc<S>, ledger: Arc<L>, accepted: impl IntoIterator<Item = Currency>) -> Self {
        Self {
            state,
            ledger,
            accepted: accepted.into_iter().collect(),
            locks: EntityLocks::new(),
        }
    }

    pub fn accepted_currencies(&self) -> impl Iterator<Item = &Currency> {
        self.accepted.iter()
    }

    /// Record a user's payment claim. Balances are untouched until approval.
    pub async fn submit(
        &self,
        submission: PaymentSubmission,
        now_ms: u64,
    ) -> Result<CryptoPayment, Error> {
        let PaymentSubmission {
            user_id,
            amount,
            currency,
            tx_hash,
        } = submission;
        if amount <= 0 {
            return Err(LotteryError::InvalidAmount { amount }.into());
        }
        let currency = currency
            .parse::<Currency>()
            .ok()
            .filter(|currency| self.accepted.contains(currency))
            .ok_or(LotteryError::UnsupportedCurrency { currency })?;
        let tx_hash = tx_hash.trim().to_string();
        if tx_hash.is_empty() {
            return Err(LotteryError::MissingTxHash.into());
        }

        let by_hash = Key::PaymentByTxHash(tx_hash.clone());
        let _guard = self.locks.acquire(&by_hash).await;
        let mut pending = Pending::new(&*self.state);
        if pending.get(&by_hash).await.map_err(Error::State)?.is_some() {
            return Err(LotteryError::DuplicateTxHash { tx_hash }.into());
        }

        let id = allocate_id(&*self.state, Sequence::Payment).await?;
        let payment = CryptoPayment {
            id,
            user_id,
            amount: amount as u64,
            currency,
            tx_hash,
            status: PaymentStatus::Pending,
            submitted_at_ms: now_ms,
            processed_at_ms: None,
            processed_by: None,
            admin_notes: None,
            rejection_reason: None,
            version: 0,
        };
        pending.insert(Key::Payment(id), Value::Payment(payment.clone()));
        pending.insert(by_hash, Value::PaymentId(id));
        pending.push_id(Key::Payments, id).map_err(Error::State)?;
        pending.insert(
            Key::PaymentAudit(id),
            Value::Audit(vec![AuditEntry {
                at_ms: now_ms,
                actor: payment.user_id.clone(),
                action: AuditAction::Submitted,
                note: None,
            }]),
        );
        pending.commit().await?;

        info!(
            payment_id = id,
            user_id = %payment.user_id,
            amount = payment.amount,
            currency = %payment.currency,
            tx_hash = %payment.tx_hash,
            "payment submitted"
        );
        Ok(payment)
    }

    /// Approve a pending payment and credit the user.
    pub async fn approve(
        &self,
        payment_id: PaymentId,
        operator_id: OperatorId,
        notes: Option<String>,
        now_ms: u64,
    ) -> Result<CryptoPayment, Error> {
        let notes = non_blank(notes);
        self.transition(payment_id, operator_id, Verdict::Approve { notes }, now_ms)
            .await
    }

    /// Reject a pending payment. A non-blank reason is mandatory.
    pub async fn reject(
        &self,
        payment_id: PaymentId,
        operator_id: OperatorId,
        reason: &str,
        now_ms: u64,
    ) -> Result<CryptoPayment, Error> {
        let reason = non_blank(Some(reason.to_string())).ok_or(LotteryError::MissingReason)?;
        self.transition(payment_id, operator_id, Verdict::Reject { reason }, now_ms)
            .await
    }

    /// Apply an operator decision.
    pub async fn decide(
        &self,
        decision: PaymentDecision,
        now_ms: u64,
    ) -> Result<CryptoPayment, Error> {
        let PaymentDecision {
            payment_id,
            operator_id,
            decision,
        } = decision;
        match decision {
            Decision::Approve { notes } => {
                self.approve(payment_id, operator_id, notes, now_ms).await
            }
            Decision::Reject { reason } => {
                self.reject(payment_id, operator_id, &reason, now_ms).await
            }
        }
    }

    async fn transition(
        &self,
        payment_id: PaymentId,
        operator_id: OperatorId,
        verdict: Verdict,
        now_ms: u64,
    ) -> Result<CryptoPayment, Error> {
        let _guard = self.locks.acquire(&Key::Payment(payment_id)).await;
        let mut pending = Pending::new(&*self.state);
        let mut payment = match pending
            .get(&Key::Payment(payment_id))
            .await
            .map_err(Error::State)?
        {
            Some(Value::Payment(payment)) => payment,
            None => return Err(LotteryError::PaymentNotFound { payment_id }.into()),
            Some(other) => {
                return Err(Error::State(anyhow!(
                    "unexpected value under payment {payment_id}: {other:?}"
                )))
            }
        };
        if payment.status != PaymentStatus::Pending {
            return Err(LotteryError::NotPending {
                payment_id,
                status: payment.status,
            }
            .into());
        }

        let (action, note) = match verdict {
            Verdict::Approve { notes } => {
                payment.status = PaymentStatus::Approved;
                payment.admin_notes = notes.clone();
                (AuditAction::Approved, notes)
            }
            Verdict::Reject { reason } => {
                payment.status = PaymentStatus::Rejected;
                payment.rejection_reason = Some(reason.clone());
                (AuditAction::Rejected, Some(reason))
            }
        };
        payment.processed_at_ms = Some(now_ms);
        payment.processed_by = Some(operator_id.clone());
        payment.version += 1;

        let mut audit = match pending
            .get(&Key::PaymentAudit(payment_id))
            .await
            .map_err(Error::State)?
        {
            Some(Value::Audit(entries)) => entries,
            None => Vec::new(),
            Some(other) => {
                return Err(Error::State(anyhow!(
                    "unexpected value under audit {payment_id}: {other:?}"
                )))
            }
        };
        audit.push(AuditEntry {
            at_ms: now_ms,
            actor: operator_id,
            action,
            note,
        });
        pending.insert(Key::Payment(payment_id), Value::Payment(payment.clone()));
        pending.insert(Key::PaymentAudit(payment_id), Value::Audit(audit));
        pending.commit().await?;

        info!(
            payment_id,
            user_id = %payment.user_id,
            amount = payment.amount,
            status = %payment.status,
            operator = payment.processed_by.as_deref().unwrap_or_default(),
            "payment processed"
        );

        if payment.status == PaymentStatus::Approved {
            self.credit(&payment).await?;
        }
        Ok(payment)
    }

    async fn credit(&self, payment: &CryptoPayment) -> Result<CreditReceipt, Error> {
        let credit = Credit::deposit(payment.id, payment.user_id.clone(), payment.amount);
        self.ledger.credit(credit).await.map_err(|err| {
            error!(
                payment_id = payment.id,
                user_id = %payment.user_id,
                ?err,
                "deposit credit failed; redeliver once the ledger recovers"
            );
            Error::Ledger(err)
        })
    }

    /// Re-send the credit of an approved payment. `None` if the payment is not approved.
    pub async fn redeliver_credit(
        &self,
        payment_id: PaymentId,
    ) -> Result<Option<CreditReceipt>, Error> {
        let payment = self.payment(payment_id).await?;
        if payment.status != PaymentStatus::Approved {
            return Ok(None);
        }
        let receipt = self.credit(&payment).await?;
        info!(payment_id, ?receipt, "deposit credit redelivered");
        Ok(Some(receipt))
    }

    pub async fn payment(&self, payment_id: PaymentId) -> Result<CryptoPayment, Error> {
        match self
            .state
            .get(&Key::Payment(payment_id))
            .await
            .map_err(Error::State)?
        {
            Some(Value::Payment(payment)) => Ok(payment),
            None => Err(LotteryError::PaymentNotFound { payment_id }.into()),
            Some(other) => Err(Error::State(anyhow!(
                "unexpected value under payment {payment_id}: {other:?}"
            ))),
        }
    }

    /// Payments awaiting review, oldest first.
    pub async fn pending(&self) -> Result<Vec<CryptoPayment>, Error> {
        let ids = load_ids(&*self.state, &Key::Payments)
            .await
            .map_err(Error::State)?;
        let mut queue = Vec::new();
        for id in ids {
            let payment = self.payment(id).await?;
            if payment.status == PaymentStatus::Pending {
                queue.push(payment);
            }
        }
        Ok(queue)
    }

    pub async fn audit(&self, payment_id: PaymentId) -> Result<Vec<AuditEntry>, Error> {
        match self
            .state
            .get(&Key::PaymentAudit(payment_id))
            .await
            .map_err(Error::State)?
        {
            Some(Value::Audit(entries)) => Ok(entries),
            None => Err(LotteryError::PaymentNotFound { payment_id }.into()),
            Some(other) => Err(Error::State(anyhow!(
                "unexpected value under audit {payment_id}: {other:?}"
            ))),
        }
    }
}
