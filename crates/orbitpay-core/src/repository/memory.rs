//! In-memory reference [`Repository`] implementation, keyed on
//! `(provider, id)` via `dashmap::DashMap`. Grounded on the teacher's use of
//! `dashmap` for concurrent in-process state (`performance`/`middleware`
//! modules) in place of the teacher's sqlx-backed Postgres repositories,
//! since this engine has no SQL store to speak of (spec.md §5: no
//! cross-aggregate transactions, only per-aggregate optimistic concurrency).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use async_trait::async_trait;

use crate::common::Duration;
use crate::error::Error;
use crate::models::{Subscription, Transaction};
use crate::Result;

use super::traits::{ActionRecord, Repository, SubscriptionPatch, TransactionPatch};

type Key = (String, String);

#[derive(Default)]
pub struct InMemoryRepository {
    transactions: DashMap<Key, Transaction>,
    subscriptions: DashMap<Key, Subscription>,
    actions: DashMap<Uuid, ActionRecord>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn find_transaction(
        &self,
        provider: &str,
        transaction_id: &str,
    ) -> Result<Option<Transaction>> {
        Ok(self
            .transactions
            .get(&(provider.to_string(), transaction_id.to_string()))
            .map(|e| e.value().clone()))
    }

    async fn find_subscription(
        &self,
        provider: &str,
        original_transaction_id: &str,
    ) -> Result<Option<Subscription>> {
        Ok(self
            .subscriptions
            .get(&(provider.to_string(), original_transaction_id.to_string()))
            .map(|e| e.value().clone()))
    }

    async fn insert_transaction(&self, transaction: Transaction) -> Result<Transaction> {
        let key = transaction.identity();
        if self.transactions.contains_key(&key) {
            return Err(Error::DuplicateAggregate(format!(
                "transaction {}/{}",
                key.0, key.1
            )));
        }
        self.transactions.insert(key, transaction.clone());
        Ok(transaction)
    }

    async fn insert_subscription(&self, subscription: Subscription) -> Result<Subscription> {
        let key = subscription.identity();
        if self.subscriptions.contains_key(&key) {
            return Err(Error::DuplicateAggregate(format!(
                "subscription {}/{}",
                key.0, key.1
            )));
        }
        self.subscriptions.insert(key, subscription.clone());
        Ok(subscription)
    }

    async fn update_transaction(
        &self,
        provider: &str,
        transaction_id: &str,
        patch: TransactionPatch,
        expected_version: u64,
    ) -> Result<Transaction> {
        let key = (provider.to_string(), transaction_id.to_string());
        let mut entry = self
            .transactions
            .get_mut(&key)
            .ok_or_else(|| Error::not_found(format!("transaction {provider}/{transaction_id}")))?;
        if entry.version != expected_version {
            return Err(Error::conflict(format!(
                "transaction {provider}/{transaction_id} expected version {expected_version}, found {}",
                entry.version
            )));
        }
        if let Some(v) = patch.purchased_at {
            entry.purchased_at = Some(v);
        }
        if let Some(v) = patch.completed_at {
            entry.completed_at = Some(v);
        }
        if let Some(v) = patch.canceled_at {
            entry.canceled_at = Some(v);
        }
        if let Some(v) = patch.raw {
            entry.raw = v;
        }
        entry.version += 1;
        Ok(entry.clone())
    }

    async fn update_subscription(
        &self,
        provider: &str,
        original_transaction_id: &str,
        patch: SubscriptionPatch,
        expected_version: u64,
    ) -> Result<Subscription> {
        let key = (provider.to_string(), original_transaction_id.to_string());
        let mut entry = self.subscriptions.get_mut(&key).ok_or_else(|| {
            Error::not_found(format!(
                "subscription {provider}/{original_transaction_id}"
            ))
        })?;
        if entry.version != expected_version {
            return Err(Error::conflict(format!(
                "subscription {provider}/{original_transaction_id} expected version {expected_version}, found {}",
                entry.version
            )));
        }
        if let Some(v) = patch.starts_at {
            entry.starts_at = Some(v);
        }
        if let Some(v) = patch.expires_at {
            entry.expires_at = Some(v);
        }
        if let Some(v) = patch.canceled_at {
            entry.canceled_at = v;
        }
        if let Some(v) = patch.renewal_enabled {
            entry.renewal_enabled = v;
        }
        if let Some(v) = patch.last_failed_at {
            entry.last_failed_at = v;
        }
        if let Some(v) = patch.renewal_attempt {
            entry.renewal_attempt = v;
        }
        if let Some(tx_ref) = patch.push_transaction {
            entry.transactions.push(tx_ref);
        }
        entry.recompute_expiry();
        entry.version += 1;
        let updated = entry.clone();
        // Inserting the action here, inside the same function call that
        // just passed the version check and mutated the entry, is what
        // makes the two land in the same write: there is no `.await`
        // between the CAS succeeding and the action landing, so a caller
        // never observes one without the other.
        if let Some(action) = patch.action {
            self.actions.insert(action.id, action);
        }
        Ok(updated)
    }

    async fn list_expired_pending_transactions(
        &self,
        provider: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Transaction>> {
        Ok(self
            .transactions
            .iter()
            .filter(|e| e.key().0 == provider)
            .map(|e| e.value().clone())
            .filter(|t| t.status() == crate::models::TransactionStatus::Pending)
            .filter(|t| t.payment_expires_at <= now)
            .collect())
    }

    async fn list_pending_transactions(&self, provider: &str) -> Result<Vec<Transaction>> {
        Ok(self
            .transactions
            .iter()
            .filter(|e| e.key().0 == provider)
            .map(|e| e.value().clone())
            .filter(|t| t.status() == crate::models::TransactionStatus::Pending)
            .collect())
    }

    async fn list_subscriptions_due_for_renewal(
        &self,
        provider: &str,
        now: DateTime<Utc>,
        renewal_before: Duration,
    ) -> Result<Vec<Subscription>> {
        let horizon = now + renewal_before;
        Ok(self
            .subscriptions
            .iter()
            .filter(|e| e.key().0 == provider)
            .map(|e| e.value().clone())
            .filter(|s| s.canceled_at.is_none() && s.renewal_enabled)
            // Due means "entering the renewal window but not yet lapsed":
            // an `expires_at` in the past would otherwise keep surfacing a
            // subscription renewal has already given up on (spec.md §4.4).
            .filter(|s| matches!(s.expires_at, Some(exp) if exp > now && exp <= horizon))
            .collect())
    }

    async fn list_unconfirmed_subscriptions(&self, provider: &str) -> Result<Vec<Subscription>> {
        Ok(self
            .subscriptions
            .iter()
            .filter(|e| e.key().0 == provider)
            .map(|e| e.value().clone())
            .filter(|s| s.starts_at.is_none() && s.canceled_at.is_none())
            .collect())
    }

    async fn list_subscriptions_for_user_group(
        &self,
        user_id: &str,
        product_group: &str,
    ) -> Result<Vec<Subscription>> {
        Ok(self
            .subscriptions
            .iter()
            .map(|e| e.value().clone())
            .filter(|s| s.user_id == user_id && s.product_group == product_group)
            .collect())
    }

    async fn list_purchase_transactions_for_user(&self, user_id: &str) -> Result<Vec<Transaction>> {
        Ok(self
            .transactions
            .iter()
            .map(|e| e.value().clone())
            .filter(|t| t.user_id == user_id)
            .filter(|t| t.transaction_type == crate::models::TransactionType::Purchase)
            .collect())
    }

    async fn list_subscriptions_for_user(&self, user_id: &str) -> Result<Vec<Subscription>> {
        Ok(self
            .subscriptions
            .iter()
            .map(|e| e.value().clone())
            .filter(|s| s.user_id == user_id)
            .collect())
    }

    async fn insert_action(&self, action: ActionRecord) -> Result<()> {
        self.actions.insert(action.id, action);
        Ok(())
    }

    async fn list_actions(&self) -> Result<Vec<ActionRecord>> {
        Ok(self.actions.iter().map(|e| e.value().clone()).collect())
    }

    async fn remove_action(&self, id: Uuid) -> Result<()> {
        self.actions.remove(&id);
        Ok(())
    }

    async fn bump_action_attempts(&self, id: Uuid) -> Result<()> {
        if let Some(mut entry) = self.actions.get_mut(&id) {
            entry.attempts += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Transaction, TransactionType};

    fn pending_tx(provider: &str, id: &str, expires_at: DateTime<Utc>) -> Transaction {
        let now = Utc::now();
        Transaction {
            provider: provider.into(),
            transaction_id: id.into(),
            user_id: "user_1".into(),
            product_id: "widget".into(),
            transaction_type: TransactionType::Purchase,
            created_at: now,
            starts_at: now,
            payment_expires_at: expires_at,
            purchased_at: None,
            completed_at: None,
            canceled_at: None,
            duration: None,
            original_transaction_id: None,
            raw: serde_json::json!({}),
            version: 1,
            schema_version: 1,
        }
    }

    #[tokio::test]
    async fn insert_then_find_round_trips() {
        let repo = InMemoryRepository::new();
        let tx = pending_tx("acme", "tx_1", Utc::now());
        repo.insert_transaction(tx.clone()).await.unwrap();
        let found = repo.find_transaction("acme", "tx_1").await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let repo = InMemoryRepository::new();
        let tx = pending_tx("acme", "tx_1", Utc::now());
        repo.insert_transaction(tx.clone()).await.unwrap();
        let err = repo.insert_transaction(tx).await.unwrap_err();
        assert_eq!(err.category(), "duplicate_aggregate");
    }

    #[tokio::test]
    async fn update_with_stale_version_conflicts() {
        let repo = InMemoryRepository::new();
        let tx = pending_tx("acme", "tx_1", Utc::now());
        repo.insert_transaction(tx).await.unwrap();
        let err = repo
            .update_transaction(
                "acme",
                "tx_1",
                TransactionPatch {
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
                99,
            )
            .await
            .unwrap_err();
        assert_eq!(err.category(), "conflict");
    }

    #[tokio::test]
    async fn update_with_correct_version_bumps_version() {
        let repo = InMemoryRepository::new();
        let tx = pending_tx("acme", "tx_1", Utc::now());
        repo.insert_transaction(tx).await.unwrap();
        let updated = repo
            .update_transaction(
                "acme",
                "tx_1",
                TransactionPatch {
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
                1,
            )
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.status(), crate::models::TransactionStatus::Completed);
    }

    #[tokio::test]
    async fn list_expired_pending_transactions_filters_by_expiry() {
        let repo = InMemoryRepository::new();
        let now = Utc::now();
        repo.insert_transaction(pending_tx("acme", "tx_old", now - Duration::minutes(5)))
            .await
            .unwrap();
        repo.insert_transaction(pending_tx("acme", "tx_future", now + Duration::minutes(5)))
            .await
            .unwrap();
        let expired = repo.list_expired_pending_transactions("acme", now).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].transaction_id, "tx_old");
    }

    fn active_sub(id: &str, expires_at: DateTime<Utc>) -> crate::models::Subscription {
        use crate::models::subscription::SubscriptionTransactionRef;
        let now = Utc::now();
        crate::models::Subscription {
            provider: "acme".into(),
            original_transaction_id: id.into(),
            user_id: "user_1".into(),
            product_id: "monthly".into(),
            product_group: "membership".into(),
            transactions: vec![SubscriptionTransactionRef {
                transaction_id: id.into(),
                duration: Duration::days(30),
                completed: true,
            }],
            starts_at: Some(now),
            expires_at: Some(expires_at),
            canceled_at: None,
            renewal_enabled: true,
            last_failed_at: None,
            renewal_attempt: 0,
            version: 1,
            schema_version: 1,
        }
    }

    #[tokio::test]
    async fn due_for_renewal_excludes_already_lapsed_subscriptions() {
        let repo = InMemoryRepository::new();
        let now = Utc::now();
        repo.insert_subscription(active_sub("sub_due", now + Duration::hours(1)))
            .await
            .unwrap();
        repo.insert_subscription(active_sub("sub_lapsed", now - Duration::days(40)))
            .await
            .unwrap();
        let due = repo
            .list_subscriptions_due_for_renewal("acme", now, Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].original_transaction_id, "sub_due");
    }
}
