//! Transaction lifecycle (spec.md C3): pending -> completed | canceled.
//! Pure transition checks live alongside the CAS-retrying service method the
//! way the teacher keeps validation pure and its `Service<R>` methods thin
//! wrappers around persistence (`services/`).

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::error::{Error, TransitionError};
use crate::models::{Product, ProductType, Transaction, TransactionType};
use crate::provider::PrepareContext;
use crate::repository::{Repository, TransactionPatch};
use crate::Result;

use super::Engine;

/// Pure check: a transaction may only move from pending into a terminal
/// state once. Reapplying a terminal transition is a loud error, never a
/// silent no-op (spec.md §3 idempotence rule).
fn check_still_pending(tx: &Transaction) -> std::result::Result<(), TransitionError> {
    if tx.is_terminal() {
        return Err(TransitionError::TerminalState(format!(
            "{}/{} is already {:?}",
            tx.provider,
            tx.transaction_id,
            tx.status()
        )));
    }
    Ok(())
}

impl<R: Repository, C: Clock> Engine<R, C> {
    /// Starts a one-shot purchase (spec.md §4.3). Creates a pending
    /// transaction and returns the adapter's opaque response payload for the
    /// caller to hand to the client.
    pub async fn prepare_purchase(
        &self,
        provider: &str,
        product_id: &str,
        user_id: &str,
    ) -> Result<(Transaction, serde_json::Value)> {
        let product = self.registry.require_product(provider, product_id).await?;
        if product.product_type != ProductType::Purchase {
            return Err(Error::validation(format!(
                "product {product_id} is not a purchase product"
            )));
        }
        let now = self.clock.now();
        let adapter = self.registry.adapter(provider)?;
        let payment_expires_at = now + self.config.purchase_expires_after;
        let prepared = adapter
            .prepare_purchase_data(PrepareContext {
                user_id: user_id.to_string(),
                product: product.clone(),
                starts_at: now,
                payment_expires_at,
            })
            .await?;
        let tx = Transaction {
            provider: provider.to_string(),
            transaction_id: prepared.transaction_id,
            user_id: user_id.to_string(),
            product_id: product.id.clone(),
            transaction_type: TransactionType::Purchase,
            created_at: now,
            starts_at: now,
            payment_expires_at,
            purchased_at: None,
            completed_at: None,
            canceled_at: None,
            duration: None,
            original_transaction_id: None,
            raw: serde_json::Value::Null,
            version: 1,
            schema_version: crate::models::SCHEMA_VERSION,
        };
        let stored = self.repository.insert_transaction(tx).await?;
        Ok((stored, prepared.response))
    }

    /// Marks `transaction_id` completed. Retries the optimistic-concurrency
    /// write up to `config.conflict_retries` times before surfacing
    /// `Error::Conflict`.
    pub async fn confirm_transaction(
        &self,
        provider: &str,
        transaction_id: &str,
        purchased_at: DateTime<Utc>,
    ) -> Result<Transaction> {
        let tx = self
            .apply_terminal_transition(provider, transaction_id, move |tx| {
                check_still_pending(tx)?;
                Ok(TransactionPatch {
                    purchased_at: Some(purchased_at),
                    completed_at: Some(purchased_at),
                    ..Default::default()
                })
            })
            .await?;
        tracing::info!(%provider, %transaction_id, "transaction confirmed");
        Ok(tx)
    }

    /// Marks `transaction_id` canceled (callback, poll, or expiry driven).
    pub async fn cancel_transaction(
        &self,
        provider: &str,
        transaction_id: &str,
        canceled_at: DateTime<Utc>,
    ) -> Result<Transaction> {
        let tx = self
            .apply_terminal_transition(provider, transaction_id, move |tx| {
                check_still_pending(tx)?;
                Ok(TransactionPatch {
                    canceled_at: Some(canceled_at),
                    ..Default::default()
                })
            })
            .await?;
        tracing::info!(%provider, %transaction_id, "transaction canceled");
        Ok(tx)
    }

    /// Shared CAS-retry loop for single-aggregate terminal transitions.
    pub(super) async fn apply_terminal_transition(
        &self,
        provider: &str,
        transaction_id: &str,
        build_patch: impl Fn(&Transaction) -> std::result::Result<TransactionPatch, TransitionError>,
    ) -> Result<Transaction> {
        let mut attempt = 0;
        loop {
            let tx = self
                .repository
                .find_transaction(provider, transaction_id)
                .await?
                .ok_or_else(|| Error::not_found(format!("transaction {provider}/{transaction_id}")))?;
            let patch = build_patch(&tx)?;
            match self
                .repository
                .update_transaction(provider, transaction_id, patch, tx.version)
                .await
            {
                Ok(updated) => return Ok(updated),
                Err(Error::Conflict(msg)) => {
                    attempt += 1;
                    if attempt > self.config.conflict_retries {
                        return Err(Error::Conflict(msg));
                    }
                    continue;
                }
                Err(other) => return Err(other),
            }
        }
    }

    pub(super) async fn require_purchase_or_subscription_product(
        &self,
        provider: &str,
        product_id: &str,
        expect: ProductType,
    ) -> Result<Product> {
        let product = self.registry.require_product(provider, product_id).await?;
        if product.product_type != expect {
            return Err(Error::validation(format!(
                "product {product_id} is not a {expect:?} product"
            )));
        }
        Ok(product)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::models::ProductType;
    use crate::provider::mock::MockAdapter;
    use crate::provider::ProviderAdapter;
    use crate::registry::Registry;
    use crate::repository::InMemoryRepository;
    use std::sync::Arc;

    fn make_engine() -> (Engine<InMemoryRepository, TestClock>, Arc<MockAdapter>) {
        let adapter = Arc::new(MockAdapter::new("acme"));
        adapter.register_product(Product {
            id: "widget".into(),
            group: None,
            product_type: ProductType::Purchase,
            duration: None,
        });
        let registry = Registry::new(vec![adapter.clone() as Arc<dyn ProviderAdapter>]);
        let repo = Arc::new(InMemoryRepository::new());
        let clock = Arc::new(TestClock::new(Utc::now()));
        let engine = Engine::new(registry, repo, clock, crate::config::EngineConfig::default());
        (engine, adapter)
    }

    #[tokio::test]
    async fn prepare_purchase_creates_pending_transaction() {
        let (engine, _adapter) = make_engine();
        let (tx, _resp) = engine.prepare_purchase("acme", "widget", "user_1").await.unwrap();
        assert_eq!(tx.status(), crate::models::TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn confirming_twice_is_rejected() {
        let (engine, _adapter) = make_engine();
        let (tx, _resp) = engine.prepare_purchase("acme", "widget", "user_1").await.unwrap();
        let now = engine.clock.now();
        engine
            .confirm_transaction("acme", &tx.transaction_id, now)
            .await
            .unwrap();
        let err = engine
            .confirm_transaction("acme", &tx.transaction_id, now)
            .await
            .unwrap_err();
        assert_eq!(err.category(), "conflicting_terminal_transition");
    }

    #[tokio::test]
    async fn canceling_after_completion_is_rejected() {
        let (engine, _adapter) = make_engine();
        let (tx, _resp) = engine.prepare_purchase("acme", "widget", "user_1").await.unwrap();
        let now = engine.clock.now();
        engine
            .confirm_transaction("acme", &tx.transaction_id, now)
            .await
            .unwrap();
        let err = engine
            .cancel_transaction("acme", &tx.transaction_id, now)
            .await
            .unwrap_err();
        assert_eq!(err.category(), "conflicting_terminal_transition");
    }
}
