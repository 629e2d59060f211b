//! Repository contract (spec.md §4.2). A document-store-style interface,
//! not a SQL one: every write is an explicit insert-or-CAS-update against an
//! `(provider, id)` identity, since the engine has no cross-aggregate
//! transaction to lean on (spec.md §5). Grounded on the teacher's
//! `ProductRepositoryTrait`/`CustomerRepositoryTrait`
//! (`repository/traits.rs`) for the trait-per-aggregate shape, and on
//! `SubscriptionRepository::get_due_for_billing`
//! (`repository/subscription_repository.rs`) for the due-for-renewal query,
//! generalized from `sqlx::query_as` to engine-owned in-memory state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Subscription, Transaction};
use crate::Result;

/// A patch applied to a [`Transaction`] under optimistic concurrency.
/// Fields left `None` are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct TransactionPatch {
    pub purchased_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub raw: Option<serde_json::Value>,
}

/// A post-transition side effect persisted alongside the transition that
/// triggered it (spec.md §4.8), so a crash between the two never leaves one
/// without the other. `kind` is opaque JSON rather than the engine's
/// `ActionKind` enum directly, so this repository-layer type doesn't need to
/// depend on `engine`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: Uuid,
    pub kind: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
}

/// A patch applied to a [`Subscription`] under optimistic concurrency.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionPatch {
    pub starts_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<Option<DateTime<Utc>>>,
    pub renewal_enabled: Option<bool>,
    pub last_failed_at: Option<Option<DateTime<Utc>>>,
    pub renewal_attempt: Option<u32>,
    pub push_transaction: Option<crate::models::subscription::SubscriptionTransactionRef>,
    /// A pending action to persist in the same write as this patch, if the
    /// transition it represents has a queued side effect (spec.md §4.8).
    pub action: Option<ActionRecord>,
}

#[async_trait]
pub trait Repository: Send + Sync {
    async fn find_transaction(
        &self,
        provider: &str,
        transaction_id: &str,
    ) -> Result<Option<Transaction>>;

    async fn find_subscription(
        &self,
        provider: &str,
        original_transaction_id: &str,
    ) -> Result<Option<Subscription>>;

    /// Fails with `Error::DuplicateAggregate` if the identity already exists.
    async fn insert_transaction(&self, transaction: Transaction) -> Result<Transaction>;

    /// Fails with `Error::DuplicateAggregate` if the identity already exists.
    async fn insert_subscription(&self, subscription: Subscription) -> Result<Subscription>;

    /// Applies `patch` iff the stored `version` equals `expected_version`,
    /// then bumps the version. Fails with `Error::Conflict` on mismatch and
    /// `Error::NotFound` if the identity doesn't exist.
    async fn update_transaction(
        &self,
        provider: &str,
        transaction_id: &str,
        patch: TransactionPatch,
        expected_version: u64,
    ) -> Result<Transaction>;

    async fn update_subscription(
        &self,
        provider: &str,
        original_transaction_id: &str,
        patch: SubscriptionPatch,
        expected_version: u64,
    ) -> Result<Subscription>;

    /// Transactions still pending whose `payment_expires_at <= now`
    /// (feeds `checkTransactions`, spec.md §4.6).
    async fn list_expired_pending_transactions(
        &self,
        provider: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Transaction>>;

    /// All transactions still pending, regardless of expiry (feeds the
    /// success-path half of `checkTransactions`).
    async fn list_pending_transactions(&self, provider: &str) -> Result<Vec<Transaction>>;

    /// Active subscriptions whose `expires_at <= now + renewal_before`
    /// (feeds `checkSubscriptionRenewal`, spec.md §4.6).
    async fn list_subscriptions_due_for_renewal(
        &self,
        provider: &str,
        now: DateTime<Utc>,
        renewal_before: crate::common::Duration,
    ) -> Result<Vec<Subscription>>;

    /// Subscriptions with no confirmed `starts_at` yet, i.e. still waiting on
    /// a `subscribed` callback that may never arrive (feeds
    /// `checkUncompletedSubscription`, spec.md §4.6).
    async fn list_unconfirmed_subscriptions(&self, provider: &str) -> Result<Vec<Subscription>>;

    /// All subscriptions for `user_id` in `product_group`, any status
    /// (feeds plan-change lookups and the C7 user view).
    async fn list_subscriptions_for_user_group(
        &self,
        user_id: &str,
        product_group: &str,
    ) -> Result<Vec<Subscription>>;

    /// All purchase transactions for `user_id` (feeds the C7 user view).
    async fn list_purchase_transactions_for_user(&self, user_id: &str) -> Result<Vec<Transaction>>;

    /// All subscriptions for `user_id`, any group (feeds the C7 user view).
    async fn list_subscriptions_for_user(&self, user_id: &str) -> Result<Vec<Subscription>>;

    /// Persists an action outside of a patch's same-write path — used
    /// directly by callers that have no triggering CAS write to attach it
    /// to (spec.md §4.8).
    async fn insert_action(&self, action: ActionRecord) -> Result<()>;

    /// Every action awaiting dispatch, for a caller draining the queue
    /// (including after a crash, since persisted actions survive restart).
    async fn list_actions(&self) -> Result<Vec<ActionRecord>>;

    /// Removes an action once it has dispatched successfully.
    async fn remove_action(&self, id: Uuid) -> Result<()>;

    /// Bumps an action's attempt counter after a failed dispatch.
    async fn bump_action_attempts(&self, id: Uuid) -> Result<()>;
}
