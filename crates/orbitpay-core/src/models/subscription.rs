use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::product::{ProductGroup, ProductId};
use super::transaction::TransactionId;
use crate::clock::Clock;
use crate::common::Duration;

/// `(provider, original_transaction_id)` is the global identity of a subscription.
pub type SubscriptionId = String;

/// Derived status (spec.md §3, state machine in §4.4). Always computed by
/// [`Subscription::status`] from the timestamp fields — never stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// No confirmed transaction yet.
    Pending,
    /// Confirmed but `starts_at > now`.
    NotStart,
    /// Confirmed, `starts_at <= now < expires_at`, not canceled.
    Active,
    /// `canceled_at` set, or superseded, or terminal recharge failure.
    Canceled,
}

/// A single entry in the subscription's ordered transaction history, carrying
/// just enough to recompute `expires_at` without a repository round trip.
/// The first entry is the initiating transaction; the rest are renewals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionTransactionRef {
    pub transaction_id: TransactionId,
    pub duration: Duration,
    pub completed: bool,
}

/// A recurring entitlement (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub provider: String,
    pub original_transaction_id: TransactionId,

    pub user_id: String,
    pub product_id: ProductId,
    pub product_group: ProductGroup,

    pub transactions: Vec<SubscriptionTransactionRef>,

    pub starts_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,

    pub canceled_at: Option<DateTime<Utc>>,
    pub renewal_enabled: bool,

    /// Records the last recharge failure on the originating transaction.
    pub last_failed_at: Option<DateTime<Utc>>,
    pub renewal_attempt: u32,

    pub version: u64,
    pub schema_version: u16,
}

impl Subscription {
    pub fn identity(&self) -> (String, TransactionId) {
        (self.provider.clone(), self.original_transaction_id.clone())
    }

    /// Derives status per spec.md §3 / §4.4. `clock` resolves `now`.
    pub fn status(&self, clock: &dyn Clock) -> SubscriptionStatus {
        if self.canceled_at.is_some() {
            return SubscriptionStatus::Canceled;
        }
        let (starts_at, expires_at) = match (self.starts_at, self.expires_at) {
            (Some(s), Some(e)) => (s, e),
            _ => return SubscriptionStatus::Pending,
        };
        let now = clock.now();
        if now >= expires_at {
            return SubscriptionStatus::Canceled;
        }
        if now < starts_at {
            SubscriptionStatus::NotStart
        } else {
            SubscriptionStatus::Active
        }
    }

    /// Recomputes `expires_at` as `starts_at + Σ duration` of completed
    /// transactions (spec.md §3, tested invariant in §8). No-op if `starts_at`
    /// is not yet established.
    pub fn recompute_expiry(&mut self) {
        let Some(starts_at) = self.starts_at else {
            return;
        };
        let total: i64 = self
            .transactions
            .iter()
            .filter(|t| t.completed)
            .map(|t| t.duration.as_seconds())
            .sum();
        self.expires_at = Some(starts_at + Duration::seconds(total));
    }
}
