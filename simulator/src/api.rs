//! Request and response contracts of the simulator.
//!
//! Every request names what it does in a `type` tag; every response carries one back.
//! Rejections are responses too, so a replayed script never stops at the first failure.

use lotto_execution::Error;
use lotto_types::{
    AuditEntry, CryptoPayment, Draw, DrawId, DrawPhase, ErrorKind, PaymentDecision, PaymentId,
    PaymentSubmission, SettlementBatch, Ticket, UserId,
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    CreateDraw {
        draw_date_ms: u64,
        jackpot: u64,
        #[serde(default)]
        draw_number: Option<u64>,
    },
    /// Ticket intake. Omitted numbers are quick-picked.
    PurchaseTicket {
        draw_id: DrawId,
        user_id: UserId,
        #[serde(default)]
        numbers: Option<Vec<i64>>,
    },
    LockDraw {
        draw_id: DrawId,
    },
    SubmitResults {
        draw_id: DrawId,
        winning_numbers: Vec<i64>,
        #[serde(default)]
        emergency: bool,
    },
    SubmitPayment(PaymentSubmission),
    DecidePayment(PaymentDecision),
    GetDraw {
        draw_id: DrawId,
    },
    CurrentDraw,
    GetSettlement {
        draw_id: DrawId,
    },
    GetPayment {
        payment_id: PaymentId,
    },
    PendingPayments,
    PaymentAudit {
        payment_id: PaymentId,
    },
    Balance {
        user_id: UserId,
    },
    RedeliverPrizes {
        draw_id: DrawId,
    },
    RedeliverDeposit {
        payment_id: PaymentId,
    },
}

/// One scripted request and the time it is issued at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub at_ms: u64,
    #[serde(flatten)]
    pub request: Request,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    Validation,
    Conflict,
    Configuration,
    NotFound,
    /// A collaborator (state or ledger) failed.
    Internal,
}

impl From<ErrorKind> for RejectionKind {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Validation => RejectionKind::Validation,
            ErrorKind::Conflict => RejectionKind::Conflict,
            ErrorKind::Configuration => RejectionKind::Configuration,
            ErrorKind::NotFound => RejectionKind::NotFound,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Draw(Draw),
    Phase {
        draw: Draw,
        phase: DrawPhase,
    },
    CurrentDraw {
        draw: Option<Draw>,
    },
    Ticket(Ticket),
    Settlement(SettlementBatch),
    NotSettled {
        draw_id: DrawId,
    },
    Payment(CryptoPayment),
    Payments {
        payments: Vec<CryptoPayment>,
    },
    Audit {
        payment_id: PaymentId,
        entries: Vec<AuditEntry>,
    },
    Balance {
        user_id: UserId,
        balance: u64,
    },
    Redelivered {
        applied: usize,
    },
    Rejected {
        kind: RejectionKind,
        reason: String,
    },
}

impl From<Error> for Response {
    fn from(err: Error) -> Self {
        let kind = err
            .kind()
            .map(RejectionKind::from)
            .unwrap_or(RejectionKind::Internal);
        Response::Rejected {
            kind,
            reason: err.to_string(),
        }
    }
}

/// A response stamped with the time of its request, as printed by the binary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub at_ms: u64,
    #[serde(flatten)]
    pub response: Response,
}
