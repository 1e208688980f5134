//! Confirmed transactions feeding the commission engine.

use crate::domain::{Decimal, MemberId, PeriodId, TimeMs, TransactionId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Investment,
    PackagePurchase,
    Other,
}

/// Lifecycle status reported by the transaction source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Active,
    Failed,
    Refunded,
}

impl TransactionStatus {
    /// Only terminal confirmed/active states generate commissions.
    pub fn is_commissionable(&self) -> bool {
        matches!(self, TransactionStatus::Confirmed | TransactionStatus::Active)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Confirmed => "confirmed",
            TransactionStatus::Active => "active",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Refunded => "refunded",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: TransactionId,
    pub member_id: MemberId,
    pub amount: Decimal,
    pub currency: String,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub confirmed_at: Option<TimeMs>,
}

impl Transaction {
    /// A confirmed transaction as delivered by the transaction source.
    pub fn confirmed(
        id: TransactionId,
        member_id: MemberId,
        amount: Decimal,
        currency: impl Into<String>,
        transaction_type: TransactionType,
        confirmed_at: TimeMs,
    ) -> Self {
        Transaction {
            id,
            member_id,
            amount,
            currency: currency.into(),
            transaction_type,
            status: TransactionStatus::Confirmed,
            confirmed_at: Some(confirmed_at),
        }
    }

    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.status = status;
        self
    }

    /// Accounting period the transaction's volume and commissions belong to.
    pub fn period(&self) -> Option<PeriodId> {
        self.confirmed_at.map(PeriodId::containing)
    }
}
