use serde::{Deserialize, Serialize};

use crate::common::Duration;

/// Opaque, provider-scoped product identifier.
pub type ProductId = String;

/// Names a mutually-exclusive family of subscription products (e.g.
/// "membership"); plan changes within a group supersede one another.
pub type ProductGroup = String;

/// Product type (spec.md §3): subscriptions carry a `duration`, purchases don't.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    Subscription,
    Purchase,
}

/// A product descriptor as resolved by a provider adapter's `require_product`.
/// Cached by `(provider, product_id)` for the lifetime of the engine process
/// (spec.md §4.1); the engine never mutates a cached descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub group: Option<ProductGroup>,
    #[serde(rename = "type")]
    pub product_type: ProductType,
    /// Required for subscriptions, absent for purchases.
    pub duration: Option<Duration>,
}

impl Product {
    pub fn is_subscription(&self) -> bool {
        self.product_type == ProductType::Subscription
    }

    pub fn is_purchase(&self) -> bool {
        self.product_type == ProductType::Purchase
    }
}
