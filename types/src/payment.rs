use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::draw::UserId;

pub type PaymentId = u64;
pub type OperatorId = String;

/// Currencies a crypto payment may be denominated in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Btc,
    Eth,
    Usdt,
    Usdc,
    Ltc,
    Trx,
}

impl Currency {
    pub const ALL: [Currency; 6] = [
        Currency::Btc,
        Currency::Eth,
        Currency::Usdt,
        Currency::Usdc,
        Currency::Ltc,
        Currency::Trx,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Currency::Btc => "BTC",
            Currency::Eth => "ETH",
            Currency::Usdt => "USDT",
            Currency::Usdc => "USDC",
            Currency::Ltc => "LTC",
            Currency::Trx => "TRX",
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Unrecognized currency code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownCurrency(pub String);

impl FromStr for Currency {
    type Err = UnknownCurrency;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let code = value.trim();
        Currency::ALL
            .into_iter()
            .find(|currency| currency.code().eq_ignore_ascii_case(code))
            .ok_or_else(|| UnknownCurrency(value.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Approved,
    Rejected,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Approved => "approved",
            PaymentStatus::Rejected => "rejected",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoPayment {
    pub id: PaymentId,
    pub user_id: UserId,
    /// Amount in minor units, always > 0.
    pub amount: u64,
    pub currency: Currency,
    pub tx_hash: String,
    pub status: PaymentStatus,
    pub submitted_at_ms: u64,
    pub processed_at_ms: Option<u64>,
    pub processed_by: Option<OperatorId>,
    pub admin_notes: Option<String>,
    pub rejection_reason: Option<String>,
    pub version: u64,
}

/// User-submitted claim of an on-chain transfer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSubmission {
    pub user_id: UserId,
    /// Signed so that non-positive amounts can be reported rather than fail to parse.
    pub amount: i64,
    pub currency: String,
    pub tx_hash: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Approve {
        #[serde(default)]
        notes: Option<String>,
    },
    Reject {
        reason: String,
    },
}

/// Operator verdict on a pending payment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDecision {
    pub payment_id: PaymentId,
    pub operator_id: OperatorId,
    #[serde(flatten)]
    pub decision: Decision,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Submitted,
    Approved,
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at_ms: u64,
    pub actor: String,
    pub action: AuditAction,
    pub note: Option<String>,
}
