//! The provider adapter contract (spec.md §6) — the engine's only view onto
//! a heterogeneous payment back-end. Grounded on the teacher's
//! `PaymentGateway` trait (`payment/mod.rs`), generalized from a single
//! card-payment flow to the wider purchase/subscription/callback/poll
//! surface this engine needs, in the domain-action style of a provider port.

pub mod mock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Product, ProductId, TransactionId};
use crate::Result;

/// What the adapter can do. Missing optional operations must be advertised
/// here rather than silently skipped (spec.md §9 design note) — plan-change
/// checks `supports_cancel_subscription` before calling `cancel_subscription`
/// and fails loudly with `Error::unsupported_operation` if it's `false`.
#[derive(Debug, Clone, Copy)]
pub struct AdapterCapabilities {
    pub supports_cancel_subscription: bool,
    pub supports_subscribed_event: bool,
}

impl Default for AdapterCapabilities {
    fn default() -> Self {
        Self {
            supports_cancel_subscription: true,
            supports_subscribed_event: true,
        }
    }
}

/// Input to `prepare_purchase_data` / `prepare_subscription_data`.
#[derive(Debug, Clone)]
pub struct PrepareContext {
    pub user_id: String,
    pub product: Product,
    pub starts_at: DateTime<Utc>,
    pub payment_expires_at: DateTime<Utc>,
}

/// What the adapter returns from `prepare_purchase_data`.
#[derive(Debug, Clone)]
pub struct PreparedPurchase {
    /// Opaque payload the caller forwards to the provider client.
    pub response: serde_json::Value,
    pub transaction_id: TransactionId,
}

/// What the adapter returns from `prepare_subscription_data`.
#[derive(Debug, Clone)]
pub struct PreparedSubscription {
    pub response: serde_json::Value,
    pub transaction_id: TransactionId,
    pub original_transaction_id: TransactionId,
    pub duration: crate::common::Duration,
}

/// Discriminated event parsed from a provider-pushed callback payload
/// (spec.md §4.5). Unknown provider payloads must fail `parse_callback`
/// with `Error::UnrecognizedEvent` rather than be coerced into one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ProviderEvent {
    PaymentConfirmed {
        transaction_id: TransactionId,
        purchased_at: DateTime<Utc>,
    },
    PaymentCanceled {
        transaction_id: TransactionId,
        canceled_at: DateTime<Utc>,
    },
    Subscribed {
        original_transaction_id: TransactionId,
        subscribed_at: DateTime<Utc>,
    },
    SubscriptionRenewal {
        original_transaction_id: TransactionId,
        transaction_id: TransactionId,
        purchased_at: DateTime<Utc>,
        duration: crate::common::Duration,
    },
    SubscriptionCanceled {
        original_transaction_id: TransactionId,
        canceled_at: DateTime<Utc>,
        reason: String,
    },
}

/// Outcome of `query_transaction_status` (spec.md §6).
#[derive(Debug, Clone)]
pub enum TransactionStatusOutcome {
    Success { purchased_at: DateTime<Utc> },
    Canceled { canceled_at: DateTime<Utc> },
}

/// Outcome of `query_subscription_status` (spec.md §6).
#[derive(Debug, Clone)]
pub enum SubscriptionStatusOutcome {
    Subscribed {
        subscribed_at: DateTime<Utc>,
        original_transaction_id: TransactionId,
    },
    Canceled {
        canceled_at: DateTime<Utc>,
    },
}

/// Outcome of `recharge_subscription` (spec.md §4.4 / §6).
#[derive(Debug, Clone)]
pub enum RechargeOutcome {
    Renewal {
        transaction_id: TransactionId,
        purchased_at: DateTime<Utc>,
        duration: crate::common::Duration,
    },
    RechargeFailed {
        failed_at: DateTime<Utc>,
        reason: String,
    },
    SubscriptionCanceled {
        canceled_at: DateTime<Utc>,
        reason: String,
    },
}

/// The full context a renewal attempt needs about the subscription it
/// targets, passed to `recharge_subscription`/`cancel_subscription` so the
/// adapter never has to reach back into the repository.
#[derive(Debug, Clone)]
pub struct OriginalTxContext {
    pub original_transaction_id: TransactionId,
    pub user_id: String,
    pub product_id: ProductId,
}

/// Provider adapter contract (spec.md §6). Every operation may fail with
/// `Error::ProviderFailure`; the engine never assumes a provider is
/// well-behaved.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn id(&self) -> &str;

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities::default()
    }

    async fn require_product(&self, product_id: &str) -> Result<Product>;

    async fn prepare_purchase_data(&self, ctx: PrepareContext) -> Result<PreparedPurchase>;

    async fn prepare_subscription_data(
        &self,
        ctx: PrepareContext,
    ) -> Result<PreparedSubscription>;

    async fn parse_callback(&self, payload: &[u8]) -> Result<ProviderEvent>;

    async fn query_transaction_status(
        &self,
        transaction_id: &str,
    ) -> Result<TransactionStatusOutcome>;

    async fn query_subscription_status(
        &self,
        original_transaction_id: &str,
    ) -> Result<SubscriptionStatusOutcome>;

    async fn recharge_subscription(
        &self,
        ctx: &OriginalTxContext,
        attempt_index: u32,
    ) -> Result<RechargeOutcome>;

    async fn cancel_subscription(&self, ctx: &OriginalTxContext) -> Result<bool>;
}
