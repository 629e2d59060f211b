use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::product::ProductId;
use crate::common::Duration;

/// `(provider, transaction_id)` is the global identity of a transaction.
pub type TransactionId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Subscription,
    Purchase,
}

/// Derived status (spec.md §3): `completed_at` set ⇒ completed; `canceled_at`
/// set ⇒ canceled; else pending. Never stored directly — always computed by
/// [`Transaction::status`] so the two timestamp fields stay the single
/// source of truth.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Canceled,
}

/// One payment attempt (spec.md §3).
///
/// Invariants upheld by every mutation path in `crate::engine::transaction`:
/// `completed_at` and `canceled_at` are mutually exclusive; once either is
/// set it is terminal and immutable; `purchased_at <= completed_at` when
/// both are present; `payment_expires_at = created_at + purchase_expires_after`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub provider: String,
    pub transaction_id: TransactionId,

    pub user_id: String,
    pub product_id: ProductId,
    pub transaction_type: TransactionType,

    pub created_at: DateTime<Utc>,
    pub starts_at: DateTime<Utc>,
    pub payment_expires_at: DateTime<Utc>,
    pub purchased_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,

    /// Subscriptions only.
    pub duration: Option<Duration>,

    /// Links a renewal transaction back to the subscription's originating one.
    pub original_transaction_id: Option<TransactionId>,

    /// Opaque provider response blob, forwarded verbatim.
    pub raw: serde_json::Value,

    pub version: u64,
    pub schema_version: u16,
}

impl Transaction {
    pub fn status(&self) -> TransactionStatus {
        if self.completed_at.is_some() {
            TransactionStatus::Completed
        } else if self.canceled_at.is_some() {
            TransactionStatus::Canceled
        } else {
            TransactionStatus::Pending
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status() != TransactionStatus::Pending
    }

    pub fn identity(&self) -> (String, TransactionId) {
        (self.provider.clone(), self.transaction_id.clone())
    }
}
