use super::money::Money;
use crate::error::{Result, SettlementError};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Paid => "PAID",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Refunded => "REFUNDED",
        }
    }

    /// Only paid transactions take part in settlement.
    pub fn is_settleable(&self) -> bool {
        matches!(self, TransactionStatus::Paid)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = SettlementError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(TransactionStatus::Pending),
            "PAID" => Ok(TransactionStatus::Paid),
            "FAILED" => Ok(TransactionStatus::Failed),
            "REFUNDED" => Ok(TransactionStatus::Refunded),
            other => Err(SettlementError::internal(format!(
                "unknown transaction status '{other}'"
            ))),
        }
    }
}

/// A payment captured against an order, as stored in the transaction table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub order_id: String,
    pub merchant_id: String,
    pub amount: Money,
    pub fee: Money,
    pub status: TransactionStatus,
    pub paid_at: DateTime<Utc>,
}

impl Transaction {
    /// Calendar day the payment settles on.
    pub fn settlement_date(&self) -> NaiveDate {
        self.paid_at.date_naive()
    }
}
