//! Draw lifecycle state machine.
//!
//! A draw moves `Open -> Locked -> Completed` and never backwards. Tickets can only be bought
//! while it is open. Submitting the winning numbers settles every ticket of the draw in a
//! single commit: match counts, payouts, the completed draw and the settlement record become
//! visible together or not at all. Winners are credited through the [`Ledger`] after the
//! commit, keyed per ticket so redelivery is safe.
//!
//! Each transition holds the draw's entity lock and commits through version guards, so two
//! concurrent submissions for one draw yield exactly one settlement.

use anyhow::anyhow;
use lotto_types::{
    Draw, DrawId, DrawPhase, DrawStatus, LotteryError, NumberSet, SettlementBatch,
    SettlementRecord, Ticket, UserId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::clock::DrawClock;
use crate::error::Error;
use crate::ledger::{Credit, CreditReceipt, Ledger};
use crate::locks::EntityLocks;
use crate::matcher::{match_count, tally};
use crate::payout::PayoutCalculator;
use crate::state::{allocate_id, load_ids, Key, Pending, Sequence, State, Value};

/// Default ticket price in minor units.
pub const TICKET_COST: u64 = 100;

/// How results are submitted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitMode {
    /// Requires the lock window to have been reached (or the draw closed by an operator).
    #[default]
    Scheduled,
    /// Operator override that also settles a draw still observed as open.
    Emergency,
}

pub struct DrawLifecycle<S: State, L: Ledger> {
    state: Arc<S>,
    ledger: Arc<L>,
    clock: DrawClock,
    payouts: PayoutCalculator,
    ticket_cost: u64,
    locks: EntityLocks,
}

impl<S: State, L: Ledger> DrawLifecycle<S, L> {
    pub fn new(
        state: Arc<S>,
        ledger: Arc<L>,
        clock: DrawClock,
        payouts: PayoutCalculator,
        ticket_cost: u64,
    ) -> Self {
        Self {
            state,
            ledger,
            clock,
            payouts,
            ticket_cost,
            locks: EntityLocks::new(),
        }
    }

    pub fn clock(&self) -> &DrawClock {
        &self.clock
    }

    /// Schedule a new draw.
    ///
    /// Without an explicit `draw_number` the next number in sequence is used; an explicit
    /// number must not go below it.
    pub async fn create_draw(
        &self,
        draw_date_ms: u64,
        jackpot: u64,
        draw_number: Option<u64>,
        now_ms: u64,
    ) -> Result<Draw, Error> {
        if draw_date_ms <= now_ms {
            return Err(LotteryError::InvalidDrawDate {
                draw_date_ms,
                now_ms,
            }
            .into());
        }

        let _guard = self.locks.acquire(&Key::Draws).await;
        let mut pending = Pending::new(&*self.state);
        let next = match pending
            .get(&Key::Sequence(Sequence::DrawNumber))
            .await
            .map_err(Error::State)?
        {
            Some(Value::Sequence(next)) => next,
            None => 1,
            Some(other) => {
                return Err(Error::State(anyhow!(
                    "unexpected draw number sequence: {other:?}"
                )))
            }
        };
        let draw_number = draw_number.unwrap_or(next);
        if draw_number < next {
            return Err(LotteryError::InvalidDrawNumber { draw_number, next }.into());
        }
        pending.insert(
            Key::Sequence(Sequence::DrawNumber),
            Value::Sequence(draw_number + 1),
        );

        let id = allocate_id(&*self.state, Sequence::Draw).await?;
        let draw = Draw::new(id, draw_number, draw_date_ms, jackpot);
        pending.insert(Key::Draw(id), Value::Draw(draw.clone()));
        pending.push_id(Key::Draws, id).map_err(Error::State)?;
        pending.commit().await?;

        info!(
            draw_id = id,
            draw_number,
            draw_date_ms,
            jackpot,
            "draw created"
        );
        Ok(draw)
    }

    pub async fn draw(&self, draw_id: DrawId) -> Result<Draw, Error> {
        match self
            .state
            .get(&Key::Draw(draw_id))
            .await
            .map_err(Error::State)?
        {
            Some(Value::Draw(draw)) => Ok(draw),
            None => Err(LotteryError::DrawNotFound { draw_id }.into()),
            Some(other) => Err(Error::State(anyhow!(
                "unexpected value under draw {draw_id}: {other:?}"
            ))),
        }
    }

    /// Every draw, in creation order.
    pub async fn draws(&self) -> Result<Vec<Draw>, Error> {
        let ids = load_ids(&*self.state, &Key::Draws)
            .await
            .map_err(Error::State)?;
        let mut draws = Vec::with_capacity(ids.len());
        for id in ids {
            draws.push(self.draw(id).await?);
        }
        Ok(draws)
    }

    /// The draw currently selling tickets: the earliest-scheduled draw observed as open.
    pub async fn current_open_draw(&self, now_ms: u64) -> Result<Option<Draw>, Error> {
        Ok(self
            .draws()
            .await?
            .into_iter()
            .filter(|draw| self.clock.observe(draw, now_ms) == DrawPhase::Open)
            .min_by_key(|draw| (draw.draw_date_ms, draw.id)))
    }

    pub async fn phase(&self, draw_id: DrawId, now_ms: u64) -> Result<DrawPhase, Error> {
        let draw = self.draw(draw_id).await?;
        Ok(self.clock.observe(&draw, now_ms))
    }

    pub async fn tickets(&self, draw_id: DrawId) -> Result<Vec<Ticket>, Error> {
        let ids = load_ids(&*self.state, &Key::DrawTickets(draw_id))
            .await
            .map_err(Error::State)?;
        let mut tickets = Vec::with_capacity(ids.len());
        for id in ids {
            match self
                .state
                .get(&Key::Ticket(id))
                .await
                .map_err(Error::State)?
            {
                Some(Value::Ticket(ticket)) => tickets.push(ticket),
                other => {
                    return Err(Error::State(anyhow!(
                        "ticket {id} of draw {draw_id} unreadable: {other:?}"
                    )))
                }
            }
        }
        Ok(tickets)
    }

    pub async fn settlement(&self, draw_id: DrawId) -> Result<Option<SettlementBatch>, Error> {
        match self
            .state
            .get(&Key::Settlement(draw_id))
            .await
            .map_err(Error::State)?
        {
            Some(Value::Settlement(batch)) => Ok(Some(batch)),
            None => Ok(None),
            Some(other) => Err(Error::State(anyhow!(
                "unexpected value under settlement {draw_id}: {other:?}"
            ))),
        }
    }

    /// Buy a ticket for an open draw.
    pub async fn purchase_ticket(
        &self,
        draw_id: DrawId,
        user_id: UserId,
        numbers: &[i64],
        now_ms: u64,
    ) -> Result<Ticket, Error> {
        let numbers = NumberSet::parse(numbers.iter().copied()).map_err(LotteryError::from)?;

        let _guard = self.locks.acquire(&Key::Draw(draw_id)).await;
        let mut pending = Pending::new(&*self.state);
        let mut draw = load_draw(&mut pending, draw_id).await?;
        let phase = self.clock.observe(&draw, now_ms);
        if phase != DrawPhase::Open {
            debug!(draw_id, %phase, %user_id, "ticket refused");
            return Err(LotteryError::DrawClosed { draw_id, phase }.into());
        }

        let id = allocate_id(&*self.state, Sequence::Ticket).await?;
        let ticket = Ticket {
            id,
            draw_id,
            user_id,
            numbers,
            cost: self.ticket_cost,
            purchased_at_ms: now_ms,
            match_count: None,
            winning_amount: None,
        };
        draw.ticket_count += 1;
        draw.sales = draw
            .sales
            .checked_add(self.ticket_cost)
            .ok_or_else(|| Error::State(anyhow!("sales of draw {draw_id} overflow")))?;
        draw.version += 1;

        pending.insert(Key::Ticket(id), Value::Ticket(ticket.clone()));
        pending
            .push_id(Key::DrawTickets(draw_id), id)
            .map_err(Error::State)?;
        pending.insert(Key::Draw(draw_id), Value::Draw(draw));
        pending.commit().await?;

        debug!(
            draw_id,
            ticket_id = id,
            user_id = %ticket.user_id,
            numbers = %ticket.numbers,
            "ticket purchased"
        );
        Ok(ticket)
    }

    /// Close ticket sales.
    ///
    /// Locking a locked draw is a no-op; locking a completed draw fails.
    pub async fn lock(&self, draw_id: DrawId, now_ms: u64) -> Result<Draw, Error> {
        let _guard = self.locks.acquire(&Key::Draw(draw_id)).await;
        let mut pending = Pending::new(&*self.state);
        let mut draw = load_draw(&mut pending, draw_id).await?;
        match draw.status {
            DrawStatus::Completed => Err(LotteryError::AlreadyCompleted { draw_id }.into()),
            DrawStatus::Locked => Ok(draw),
            DrawStatus::Open => {
                draw.status = DrawStatus::Locked;
                draw.locked_at_ms = Some(now_ms);
                draw.version += 1;
                pending.insert(Key::Draw(draw_id), Value::Draw(draw.clone()));
                pending.commit().await?;
                info!(
                    draw_id,
                    draw_number = draw.draw_number,
                    tickets = draw.ticket_count,
                    "draw locked"
                );
                Ok(draw)
            }
        }
    }

    /// Record the winning numbers and settle every ticket of the draw.
    pub async fn submit_results(
        &self,
        draw_id: DrawId,
        winning_numbers: &[i64],
        mode: SubmitMode,
        now_ms: u64,
    ) -> Result<SettlementBatch, Error> {
        let winning =
            NumberSet::parse(winning_numbers.iter().copied()).map_err(LotteryError::from)?;

        let _guard = self.locks.acquire(&Key::Draw(draw_id)).await;
        let mut pending = Pending::new(&*self.state);
        let mut draw = load_draw(&mut pending, draw_id).await?;
        if draw.is_completed() {
            return Err(LotteryError::AlreadyCompleted { draw_id }.into());
        }

        if self.clock.observe(&draw, now_ms) == DrawPhase::Open {
            if mode != SubmitMode::Emergency {
                let remaining_ms = DrawClock::time_remaining_ms(
                    now_ms,
                    self.clock.locks_at_ms(draw.draw_date_ms),
                );
                return Err(LotteryError::DrawStillOpen {
                    draw_id,
                    remaining_ms,
                }
                .into());
            }
            warn!(draw_id, "emergency settlement of an open draw");
        }
        if draw.status == DrawStatus::Open {
            draw.status = DrawStatus::Locked;
            draw.locked_at_ms = Some(now_ms);
        }

        let ticket_ids = match pending
            .get(&Key::DrawTickets(draw_id))
            .await
            .map_err(Error::State)?
        {
            Some(Value::Ids(ids)) => ids,
            None => Vec::new(),
            Some(other) => {
                return Err(Error::State(anyhow!(
                    "unexpected ticket index for draw {draw_id}: {other:?}"
                )))
            }
        };
        let mut tickets = Vec::with_capacity(ticket_ids.len());
        for id in ticket_ids {
            match pending.get(&Key::Ticket(id)).await.map_err(Error::State)? {
                Some(Value::Ticket(ticket)) if !ticket.is_settled() => tickets.push(ticket),
                Some(Value::Ticket(_)) => {
                    return Err(Error::State(anyhow!(
                        "ticket {id} settled before draw {draw_id} completed"
                    )))
                }
                other => {
                    return Err(Error::State(anyhow!(
                        "ticket {id} of draw {draw_id} unreadable: {other:?}"
                    )))
                }
            }
        }

        let counts = tally(tickets.iter().map(|ticket| &ticket.numbers), &winning);
        let plan = match self.payouts.plan(draw.jackpot, &counts) {
            Ok(plan) => plan,
            Err(err) => {
                error!(
                    draw_id,
                    draw_number = draw.draw_number,
                    %err,
                    "settlement aborted: payout plan failed"
                );
                return Err(err.into());
            }
        };

        let mut records = Vec::with_capacity(tickets.len());
        for mut ticket in tickets {
            let matches = match_count(&ticket.numbers, &winning);
            let amount = plan.per_winner(matches);
            ticket.match_count = Some(matches);
            ticket.winning_amount = Some(amount);
            records.push(SettlementRecord {
                ticket_id: ticket.id,
                user_id: ticket.user_id.clone(),
                match_count: matches,
                winning_amount: amount,
            });
            pending.insert(Key::Ticket(ticket.id), Value::Ticket(ticket));
        }

        draw.status = DrawStatus::Completed;
        draw.winning_numbers = Some(winning.clone());
        draw.completed_at_ms = Some(now_ms);
        draw.version += 1;
        let batch = SettlementBatch {
            draw_id,
            draw_number: draw.draw_number,
            winning_numbers: winning,
            records,
            tiers: plan.tiers,
            total_paid: plan.total_paid,
            total_remainder: plan.total_remainder,
            settled_at_ms: now_ms,
        };
        pending.insert(Key::Draw(draw_id), Value::Draw(draw));
        pending.insert(Key::Settlement(draw_id), Value::Settlement(batch.clone()));
        pending.commit().await?;

        info!(
            draw_id,
            draw_number = batch.draw_number,
            winning_numbers = %batch.winning_numbers,
            tickets = batch.records.len(),
            winners = batch.winners().count(),
            total_paid = batch.total_paid,
            total_remainder = batch.total_remainder,
            "draw settled"
        );

        self.deliver(&batch).await?;
        Ok(batch)
    }

    /// Re-send every prize credit of a settled draw. Returns how many were newly applied.
    pub async fn redeliver_credits(&self, draw_id: DrawId) -> Result<usize, Error> {
        let Some(batch) = self.settlement(draw_id).await? else {
            // Surface a missing draw distinctly from an unsettled one.
            self.draw(draw_id).await?;
            return Ok(0);
        };
        let applied = self.deliver(&batch).await?;
        info!(draw_id, applied, "prize credits redelivered");
        Ok(applied)
    }

    async fn deliver(&self, batch: &SettlementBatch) -> Result<usize, Error> {
        let mut applied = 0;
        for record in batch.winners() {
            let credit = Credit::prize(
                batch.draw_id,
                record.ticket_id,
                record.user_id.clone(),
                record.match_count,
                record.winning_amount,
            );
            match self.ledger.credit(credit).await {
                Ok(CreditReceipt::Applied { .. }) => applied += 1,
                Ok(CreditReceipt::Duplicate { .. }) => {}
                Err(err) => {
                    error!(
                        draw_id = batch.draw_id,
                        ticket_id = record.ticket_id,
                        user_id = %record.user_id,
                        ?err,
                        "prize credit failed; redeliver once the ledger recovers"
                    );
                    return Err(Error::Ledger(err));
                }
            }
        }
        Ok(applied)
    }
}

async fn load_draw<S: State>(pending: &mut Pending<'_, S>, draw_id: DrawId) -> Result<Draw, Error> {
    match pending
        .get(&Key::Draw(draw_id))
        .await
        .map_err(Error::State)?
    {
        Some(Value::Draw(draw)) => Ok(draw),
        None => Err(LotteryError::DrawNotFound { draw_id }.into()),
        Some(other) => Err(Error::State(anyhow!(
            "unexpected value under draw {draw_id}: {other:?}"
        ))),
    }
}
