//! Read-only user projection (spec.md C7, §4.7). Pure query composition —
//! no mutation, no provider calls — assembling a [`User`] from whatever the
//! repository already holds.

use crate::clock::Clock;
use crate::models::User;
use crate::repository::Repository;
use crate::Result;

use super::Engine;

impl<R: Repository, C: Clock> Engine<R, C> {
    /// `purchaseTransactions` is every *completed* purchase (spec.md §4.7);
    /// `subscriptions` excludes only explicitly canceled ones — a merely
    /// lapsed-by-expiry subscription still counts (needed for
    /// `getExpireTime` to see the newer of two plan-change subscriptions).
    pub async fn get_user(&self, user_id: &str) -> Result<User> {
        let purchase_transactions = self
            .repository
            .list_purchase_transactions_for_user(user_id)
            .await?
            .into_iter()
            .filter(|t| t.status() == crate::models::TransactionStatus::Completed)
            .collect();
        let subscriptions = self
            .repository
            .list_subscriptions_for_user(user_id)
            .await?
            .into_iter()
            .filter(|s| s.canceled_at.is_none())
            .collect();
        Ok(User {
            user_id: user_id.to_string(),
            purchase_transactions,
            subscriptions,
        })
    }
}
