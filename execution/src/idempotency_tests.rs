//! Idempotency and race tests.
//!
//! Settlement and payment decisions must take effect exactly once no matter how many callers
//! race for them, and a retried credit must never move a balance twice.

#[cfg(test)]
mod tests {
    use crate::mocks::{lifecycle, submission, workflow, FlakyLedger, DRAW_DATE, NOW};
    use crate::state::{Batch, CommitError, Key, Memory, State, Value};
    use crate::{
        CreditReceipt, DrawClock, DrawLifecycle, Error, MemoryLedger, PaymentApprovalWorkflow,
        PayoutCalculator, SubmitMode, TICKET_COST,
    };
    use futures::future::join_all;
    use lotto_types::{Currency, LotteryError, PaymentStatus};
    use std::sync::Arc;

    const WINNING: [i64; 6] = [5, 10, 15, 20, 25, 30];
    const AFTER_LOCK: u64 = DRAW_DATE - 1_000;

    /// Yields before every read so that concurrent transitions interleave.
    #[derive(Default)]
    struct Yielding {
        inner: Memory,
    }

    impl State for Yielding {
        async fn get(&self, key: &Key) -> anyhow::Result<Option<Value>> {
            tokio::task::yield_now().await;
            self.inner.get(key).await
        }

        async fn commit(&self, batch: Batch) -> Result<(), CommitError> {
            self.inner.commit(batch).await
        }
    }

    /// Two lifecycles over one store: they share state but not entity locks, like two
    /// service instances.
    fn replicas() -> (
        DrawLifecycle<Yielding, MemoryLedger>,
        DrawLifecycle<Yielding, MemoryLedger>,
        Arc<MemoryLedger>,
    ) {
        let state = Arc::new(Yielding::default());
        let ledger = Arc::new(MemoryLedger::new());
        let replica = || {
            DrawLifecycle::new(
                state.clone(),
                ledger.clone(),
                DrawClock::default(),
                PayoutCalculator::default(),
                TICKET_COST,
            )
        };
        (replica(), replica(), ledger)
    }

    #[tokio::test]
    async fn test_concurrent_submissions_settle_once() {
        let (lifecycle, _, ledger) = lifecycle();
        let lifecycle = Arc::new(lifecycle);
        let draw = lifecycle
            .create_draw(DRAW_DATE, 4_003_000, None, NOW)
            .await
            .unwrap();
        for user in ["alice", "bob"] {
            lifecycle
                .purchase_ticket(draw.id, user.to_string(), &WINNING, NOW)
                .await
                .unwrap();
        }

        let draw_id = draw.id;
        let handles = (0..8)
            .map(|_| {
                let lifecycle = lifecycle.clone();
                tokio::spawn(async move {
                    lifecycle
                        .submit_results(draw_id, &WINNING, SubmitMode::Scheduled, AFTER_LOCK)
                        .await
                })
            })
            .collect::<Vec<_>>();
        let results = join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect::<Vec<_>>();

        assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
        for err in results.iter().filter_map(|result| result.as_ref().err()) {
            assert!(matches!(
                err.rejection(),
                Some(LotteryError::AlreadyCompleted { .. })
                    | Some(LotteryError::ConcurrentModification { .. })
            ));
        }

        // 70% of the jackpot split between two winners, credited once each.
        assert_eq!(ledger.balance("alice"), 1_401_050);
        assert_eq!(ledger.balance("bob"), 1_401_050);
        assert_eq!(ledger.applied(), 2);
    }

    #[tokio::test]
    async fn test_replicas_racing_settlement_commit_once() {
        let (first, second, ledger) = replicas();
        let draw = first
            .create_draw(DRAW_DATE, 1_000_000, None, NOW)
            .await
            .unwrap();
        first
            .purchase_ticket(draw.id, "alice".to_string(), &WINNING, NOW)
            .await
            .unwrap();

        let (a, b) = futures::join!(
            first.submit_results(draw.id, &WINNING, SubmitMode::Scheduled, AFTER_LOCK),
            second.submit_results(draw.id, &WINNING, SubmitMode::Scheduled, AFTER_LOCK),
        );
        let (winner, loser) = match (a, b) {
            (Ok(batch), Err(err)) | (Err(err), Ok(batch)) => (batch, err),
            other => panic!("expected exactly one settlement: {other:?}"),
        };
        assert!(matches!(
            loser.rejection(),
            Some(LotteryError::ConcurrentModification { .. })
                | Some(LotteryError::AlreadyCompleted { .. })
        ));
        assert_eq!(winner.records.len(), 1);
        assert_eq!(ledger.balance("alice"), 700_000);
        assert_eq!(second.settlement(draw.id).await.unwrap(), Some(winner));
    }

    #[tokio::test]
    async fn test_purchase_racing_settlement_is_never_lost() {
        let (first, second, _) = replicas();
        let draw = first
            .create_draw(DRAW_DATE, 1_000_000, None, NOW)
            .await
            .unwrap();

        let (purchase, settlement) = futures::join!(
            first.purchase_ticket(draw.id, "alice".to_string(), &WINNING, NOW),
            second.submit_results(draw.id, &WINNING, SubmitMode::Emergency, NOW),
        );
        assert!(purchase.is_ok() || settlement.is_ok());

        // Whatever won, no ticket of a completed draw is left unsettled.
        let draw = first.draw(draw.id).await.unwrap();
        let tickets = first.tickets(draw.id).await.unwrap();
        if draw.is_completed() {
            assert!(tickets.iter().all(|ticket| ticket.is_settled()));
            let batch = first.settlement(draw.id).await.unwrap().unwrap();
            assert_eq!(batch.records.len(), tickets.len());
        } else {
            assert_eq!(tickets.len(), 1);
            assert!(settlement.is_err());
        }
        assert_eq!(draw.ticket_count as usize, tickets.len());
    }

    #[tokio::test]
    async fn test_resubmission_is_rejected_without_side_effects() {
        let (lifecycle, state, ledger) = lifecycle();
        let draw = lifecycle
            .create_draw(DRAW_DATE, 4_003_000, None, NOW)
            .await
            .unwrap();
        lifecycle
            .purchase_ticket(draw.id, "alice".to_string(), &WINNING, NOW)
            .await
            .unwrap();
        let batch = lifecycle
            .submit_results(draw.id, &WINNING, SubmitMode::Scheduled, AFTER_LOCK)
            .await
            .unwrap();
        let entries = state.len();
        let balance = ledger.balance("alice");

        // Different numbers on the retry must not re-settle either.
        let err = lifecycle
            .submit_results(draw.id, &[1, 2, 3, 4, 5, 6], SubmitMode::Emergency, AFTER_LOCK)
            .await
            .unwrap_err();
        assert_eq!(
            err.rejection(),
            Some(&LotteryError::AlreadyCompleted { draw_id: draw.id })
        );
        assert_eq!(state.len(), entries);
        assert_eq!(ledger.balance("alice"), balance);
        assert_eq!(lifecycle.settlement(draw.id).await.unwrap(), Some(batch));
    }

    #[tokio::test]
    async fn test_concurrent_approvals_credit_once() {
        let (workflow, _, ledger) = workflow();
        let workflow = Arc::new(workflow);
        let payment = workflow
            .submit(submission("alice", 150, "BTC", "0xabc"), NOW)
            .await
            .unwrap();

        let payment_id = payment.id;
        let handles = (0..4)
            .map(|i| {
                let workflow = workflow.clone();
                tokio::spawn(async move {
                    workflow
                        .approve(payment_id, format!("ops-{i}"), None, NOW + 1)
                        .await
                })
            })
            .collect::<Vec<_>>();
        let results = join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect::<Vec<_>>();

        assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|result| result.as_ref().err())
            .all(|err| matches!(
                err.rejection(),
                Some(LotteryError::NotPending {
                    status: PaymentStatus::Approved,
                    ..
                })
            )));
        assert_eq!(ledger.balance("alice"), 150);
        assert_eq!(ledger.applied(), 1);
    }

    #[tokio::test]
    async fn test_approve_racing_reject_has_one_outcome() {
        let (workflow, _, ledger) = workflow();
        let payment = workflow
            .submit(submission("alice", 150, "BTC", "0xabc"), NOW)
            .await
            .unwrap();

        let (approved, rejected) = futures::join!(
            workflow.approve(payment.id, "ops-a".to_string(), None, NOW + 1),
            workflow.reject(payment.id, "ops-b".to_string(), "invalid tx", NOW + 1),
        );
        assert!(approved.is_ok() != rejected.is_ok());

        let stored = workflow.payment(payment.id).await.unwrap();
        match stored.status {
            PaymentStatus::Approved => assert_eq!(ledger.balance("alice"), 150),
            PaymentStatus::Rejected => assert_eq!(ledger.balance("alice"), 0),
            PaymentStatus::Pending => panic!("payment left pending"),
        }
        assert_eq!(workflow.audit(payment.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_tx_hash_race() {
        let (workflow, _, _) = workflow();
        let results = join_all((0..4).map(|i| {
            workflow.submit(submission(&format!("user-{i}"), 10, "ETH", "0xsame"), NOW)
        }))
        .await;
        assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
        assert_eq!(workflow.pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_submissions_with_different_hashes_both_land() {
        let state = Arc::new(Yielding::default());
        let workflow =
            PaymentApprovalWorkflow::new(state, Arc::new(MemoryLedger::new()), Currency::ALL);

        let (alice, bob) = futures::join!(
            workflow.submit(submission("alice", 10, "BTC", "0xaaa"), NOW),
            workflow.submit(submission("bob", 20, "ETH", "0xbbb"), NOW),
        );
        let (alice, bob) = (alice.unwrap(), bob.unwrap());
        assert_ne!(alice.id, bob.id);

        let mut queued = workflow
            .pending()
            .await
            .unwrap()
            .into_iter()
            .map(|payment| payment.id)
            .collect::<Vec<_>>();
        queued.sort_unstable();
        let mut expected = vec![alice.id, bob.id];
        expected.sort_unstable();
        assert_eq!(queued, expected);
    }

    #[tokio::test]
    async fn test_purchases_on_different_draws_both_land() {
        let (first, second, _) = replicas();
        let one = first
            .create_draw(DRAW_DATE, 1_000, None, NOW)
            .await
            .unwrap();
        let two = first
            .create_draw(DRAW_DATE, 1_000, None, NOW)
            .await
            .unwrap();

        let (a, b) = futures::join!(
            first.purchase_ticket(one.id, "alice".to_string(), &WINNING, NOW),
            second.purchase_ticket(two.id, "bob".to_string(), &WINNING, NOW),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.id, b.id);
        assert_eq!(first.tickets(one.id).await.unwrap(), vec![a]);
        assert_eq!(first.tickets(two.id).await.unwrap(), vec![b]);
        assert_eq!(first.draw(two.id).await.unwrap().ticket_count, 1);
    }

    #[tokio::test]
    async fn test_prize_credits_recover_after_ledger_failure() {
        // The first credit lands, the second fails, then the ledger recovers.
        let ledger = Arc::new(FlakyLedger::new(1..2));
        let lifecycle = DrawLifecycle::new(
            Arc::new(Memory::new()),
            ledger.clone(),
            DrawClock::default(),
            PayoutCalculator::default(),
            TICKET_COST,
        );
        let draw = lifecycle
            .create_draw(DRAW_DATE, 4_003_000, None, NOW)
            .await
            .unwrap();
        for user in ["alice", "bob"] {
            lifecycle
                .purchase_ticket(draw.id, user.to_string(), &WINNING, NOW)
                .await
                .unwrap();
        }

        let err = lifecycle
            .submit_results(draw.id, &WINNING, SubmitMode::Scheduled, AFTER_LOCK)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Ledger(_)));
        assert!(lifecycle.draw(draw.id).await.unwrap().is_completed());
        assert!(lifecycle.settlement(draw.id).await.unwrap().is_some());
        assert_eq!(ledger.balance("alice"), 1_401_050);
        assert_eq!(ledger.balance("bob"), 0);

        let err = lifecycle
            .submit_results(draw.id, &WINNING, SubmitMode::Scheduled, AFTER_LOCK)
            .await
            .unwrap_err();
        assert_eq!(
            err.rejection(),
            Some(&LotteryError::AlreadyCompleted { draw_id: draw.id })
        );

        assert_eq!(lifecycle.redeliver_credits(draw.id).await.unwrap(), 1);
        assert_eq!(ledger.balance("alice"), 1_401_050);
        assert_eq!(ledger.balance("bob"), 1_401_050);
        assert_eq!(lifecycle.redeliver_credits(draw.id).await.unwrap(), 0);
        assert_eq!(ledger.balance("bob"), 1_401_050);
    }

    #[tokio::test]
    async fn test_deposit_credit_recovers_after_ledger_failure() {
        let ledger = Arc::new(FlakyLedger::new(0..1));
        let workflow =
            PaymentApprovalWorkflow::new(Arc::new(Memory::new()), ledger.clone(), Currency::ALL);
        let payment = workflow
            .submit(submission("alice", 150, "BTC", "0xabc"), NOW)
            .await
            .unwrap();

        let err = workflow
            .approve(payment.id, "ops".to_string(), None, NOW + 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Ledger(_)));
        assert_eq!(
            workflow.payment(payment.id).await.unwrap().status,
            PaymentStatus::Approved
        );
        assert_eq!(ledger.balance("alice"), 0);

        let err = workflow
            .approve(payment.id, "ops".to_string(), None, NOW + 2)
            .await
            .unwrap_err();
        assert!(matches!(
            err.rejection(),
            Some(LotteryError::NotPending {
                status: PaymentStatus::Approved,
                ..
            })
        ));

        assert_eq!(
            workflow.redeliver_credit(payment.id).await.unwrap(),
            Some(CreditReceipt::Applied { balance: 150 })
        );
        assert_eq!(
            workflow.redeliver_credit(payment.id).await.unwrap(),
            Some(CreditReceipt::Duplicate { balance: 150 })
        );
        assert_eq!(ledger.balance("alice"), 150);
    }
}
