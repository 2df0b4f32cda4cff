//! Local backend for the lotto settlement core.
//!
//! Wires the draw lifecycle and the payment workflow to in-memory state and an in-memory
//! ledger, and replays scripted [`Request`]s against them.

use anyhow::Context as _;
use lotto_execution::{
    DrawLifecycle, Memory, MemoryLedger, PaymentApprovalWorkflow, PayoutCalculator, SubmitMode,
};
use lotto_types::NumberSet;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

mod api;
pub use api::{Outcome, RejectionKind, Request, Response, Step};

mod config;
pub use config::{Config, ConfigError, ValidatedConfig};

pub struct Simulator {
    lifecycle: DrawLifecycle<Memory, MemoryLedger>,
    payments: PaymentApprovalWorkflow<Memory, MemoryLedger>,
    ledger: Arc<MemoryLedger>,
    rng: StdRng,
}

impl Simulator {
    /// `seed` drives quick picks so that a replay is reproducible.
    pub fn new(config: &ValidatedConfig, seed: u64) -> Self {
        let state = Arc::new(Memory::new());
        let ledger = Arc::new(MemoryLedger::new());
        let lifecycle = DrawLifecycle::new(
            state.clone(),
            ledger.clone(),
            config.clock,
            PayoutCalculator::new(config.payout_table.clone()),
            config.ticket_cost,
        );
        let payments = PaymentApprovalWorkflow::new(
            state,
            ledger.clone(),
            config.accepted_currencies.iter().copied(),
        );
        Self {
            lifecycle,
            payments,
            ledger,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn balance(&self, user_id: &str) -> u64 {
        self.ledger.balance(user_id)
    }

    /// Handle one request. Failures are reported as [`Response::Rejected`].
    pub async fn execute(&mut self, request: Request, now_ms: u64) -> Response {
        debug!(now_ms, ?request, "executing request");
        let response = self.dispatch(request, now_ms).await;
        if let Response::Rejected { kind, reason } = &response {
            warn!(now_ms, ?kind, %reason, "request rejected");
        }
        response
    }

    async fn dispatch(&mut self, request: Request, now_ms: u64) -> Response {
        let result = match request {
            Request::CreateDraw {
                draw_date_ms,
                jackpot,
                draw_number,
            } => self
                .lifecycle
                .create_draw(draw_date_ms, jackpot, draw_number, now_ms)
                .await
                .map(Response::Draw),
            Request::PurchaseTicket {
                draw_id,
                user_id,
                numbers,
            } => {
                let numbers = numbers.unwrap_or_else(|| {
                    NumberSet::quick_pick(&mut self.rng)
                        .selection()
                        .iter()
                        .map(|&n| i64::from(n))
                        .collect()
                });
                self.lifecycle
                    .purchase_ticket(draw_id, user_id, &numbers, now_ms)
                    .await
                    .map(Response::Ticket)
            }
            Request::LockDraw { draw_id } => self
                .lifecycle
                .lock(draw_id, now_ms)
                .await
                .map(Response::Draw),
            Request::SubmitResults {
                draw_id,
                winning_numbers,
                emergency,
            } => {
                let mode = if emergency {
                    SubmitMode::Emergency
                } else {
                    SubmitMode::Scheduled
                };
                self.lifecycle
                    .submit_results(draw_id, &winning_numbers, mode, now_ms)
                    .await
                    .map(Response::Settlement)
            }
            Request::SubmitPayment(submission) => self
                .payments
                .submit(submission, now_ms)
                .await
                .map(Response::Payment),
            Request::DecidePayment(decision) => self
                .payments
                .decide(decision, now_ms)
                .await
                .map(Response::Payment),
            Request::GetDraw { draw_id } => match self.lifecycle.draw(draw_id).await {
                Ok(draw) => {
                    let phase = self.lifecycle.clock().observe(&draw, now_ms);
                    Ok(Response::Phase { draw, phase })
                }
                Err(err) => Err(err),
            },
            Request::CurrentDraw => self
                .lifecycle
                .current_open_draw(now_ms)
                .await
                .map(|draw| Response::CurrentDraw { draw }),
            Request::GetSettlement { draw_id } => {
                self.lifecycle
                    .settlement(draw_id)
                    .await
                    .map(|batch| match batch {
                        Some(batch) => Response::Settlement(batch),
                        None => Response::NotSettled { draw_id },
                    })
            }
            Request::GetPayment { payment_id } => self
                .payments
                .payment(payment_id)
                .await
                .map(Response::Payment),
            Request::PendingPayments => self
                .payments
                .pending()
                .await
                .map(|payments| Response::Payments { payments }),
            Request::PaymentAudit { payment_id } => self
                .payments
                .audit(payment_id)
                .await
                .map(|entries| Response::Audit {
                    payment_id,
                    entries,
                }),
            Request::Balance { user_id } => Ok(Response::Balance {
                balance: self.ledger.balance(&user_id),
                user_id,
            }),
            Request::RedeliverPrizes { draw_id } => self
                .lifecycle
                .redeliver_credits(draw_id)
                .await
                .map(|applied| Response::Redelivered { applied }),
            Request::RedeliverDeposit { payment_id } => self
                .payments
                .redeliver_credit(payment_id)
                .await
                .map(|receipt| Response::Redelivered {
                    applied: usize::from(matches!(
                        receipt,
                        Some(lotto_execution::CreditReceipt::Applied { .. })
                    )),
                }),
        };
        result.unwrap_or_else(Response::from)
    }

    /// Replay a script in order.
    pub async fn replay(&mut self, steps: Vec<Step>) -> Vec<Outcome> {
        let mut outcomes = Vec::with_capacity(steps.len());
        for step in steps {
            let response = self.execute(step.request, step.at_ms).await;
            outcomes.push(Outcome {
                at_ms: step.at_ms,
                response,
            });
        }
        outcomes
    }
}

/// Read a YAML script. Steps must be in non-decreasing time order.
pub fn load_script(path: &Path) -> anyhow::Result<Vec<Step>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read script {}", path.display()))?;
    parse_script(&raw).with_context(|| format!("invalid script {}", path.display()))
}

pub fn parse_script(raw: &str) -> anyhow::Result<Vec<Step>> {
    let steps: Vec<Step> = serde_yaml::from_str(raw).context("failed to parse script")?;
    if let Some(index) = steps
        .windows(2)
        .position(|pair| pair[1].at_ms < pair[0].at_ms)
    {
        anyhow::bail!(
            "step {} goes back in time ({} < {})",
            index + 1,
            steps[index + 1].at_ms,
            steps[index].at_ms
        );
    }
    Ok(steps)
}
