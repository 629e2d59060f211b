use chrono::{DateTime, Utc};

use super::product::ProductGroup;
use super::subscription::Subscription;
use super::transaction::Transaction;

/// Read-only projection over a user's purchases and subscriptions (spec.md
/// §4.7, C7). Never written to directly; always produced by
/// `crate::engine::user_view`.
#[derive(Debug, Clone)]
pub struct User {
    pub user_id: String,
    pub purchase_transactions: Vec<Transaction>,
    pub subscriptions: Vec<Subscription>,
}

impl User {
    /// `max(expires_at)` across the user's subscriptions in `group`, or
    /// `None` if the user has none in that group.
    pub fn get_expire_time(&self, group: &ProductGroup) -> Option<DateTime<Utc>> {
        self.subscriptions
            .iter()
            .filter(|s| &s.product_group == group)
            .filter_map(|s| s.expires_at)
            .max()
    }
}
