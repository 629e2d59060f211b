//! Reconciliation loops (spec.md C6, §4.6): batch polling operations a
//! caller schedules externally (cron, a worker loop — out of scope here, see
//! SPEC_FULL.md Non-goals). Each loop acquires a single-flight lease for its
//! `(provider, loop_name)` before running, so an overlapping invocation is a
//! no-op rather than a double-processed batch (spec.md §5). Result-struct +
//! per-item `tracing::warn!` logging is grounded on
//! `DunningJob::process_expired_grace_periods` (`jobs/dunning_job.rs`),
//! generalized from a fixed dunning pass into a sink the caller controls.

use chrono::Utc;

use crate::cancellation::CancellationToken;
use crate::clock::Clock;
use crate::error::{BatchItemError, Error};
use crate::error_sink::ErrorSink;
use crate::models::{Subscription, Transaction};
use crate::provider::{RechargeOutcome, SubscriptionStatusOutcome, TransactionStatusOutcome};
use crate::provider::OriginalTxContext;
use crate::repository::Repository;
use crate::Result;

use super::Engine;

/// Summary of one reconciliation pass, mirroring the shape of
/// `DunningJobResult` (processed/succeeded/failed counters plus a duration).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ReconciliationResult {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_lease_held: bool,
}

impl<R: Repository, C: Clock> Engine<R, C> {
    /// Attempts to acquire the single-flight lease for `(provider, loop_name)`.
    /// Returns `false` (and leaves the existing lease untouched) if one is
    /// already held and not yet expired.
    fn try_acquire_lease(&self, provider: &str, loop_name: &str) -> bool {
        let key = (provider.to_string(), loop_name.to_string());
        let now = self.clock.now();
        let mut held = false;
        self.leases
            .entry(key)
            .and_modify(|expires_at| {
                if *expires_at > now {
                    held = true;
                } else {
                    *expires_at = now + self.config.lease_ttl;
                }
            })
            .or_insert_with(|| now + self.config.lease_ttl);
        !held
    }

    fn release_lease(&self, provider: &str, loop_name: &str) {
        self.leases
            .remove(&(provider.to_string(), loop_name.to_string()));
    }

    /// Polls every still-pending transaction: confirms ones the provider
    /// reports successful, cancels ones the provider reports canceled, and
    /// cancels (or, per config, leaves pending) ones whose payment window
    /// has simply expired with no provider answer yet.
    pub async fn check_transactions(
        &self,
        provider: &str,
        sink: &mut dyn ErrorSink,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationResult> {
        let mut result = ReconciliationResult::default();
        if !self.try_acquire_lease(provider, "check_transactions") {
            result.skipped_lease_held = true;
            return Ok(result);
        }

        let now = self.clock.now();
        let expired = self
            .repository
            .list_expired_pending_transactions(provider, now)
            .await?;
        let adapter = self.registry.adapter(provider)?;

        for tx in &expired {
            if cancel.is_canceled() {
                self.release_lease(provider, "check_transactions");
                return Err(Error::canceled("check_transactions canceled mid-batch"));
            }
            result.processed += 1;
            let outcome = adapter.query_transaction_status(&tx.transaction_id).await;
            // Item 4 of spec.md §4.3: if the provider doesn't affirm success
            // once a transaction is past its payment window, it's canceled
            // with `canceledAt = now` rather than left pending forever.
            let applied = match outcome {
                Ok(TransactionStatusOutcome::Success { purchased_at }) => {
                    self.confirm_transaction(provider, &tx.transaction_id, purchased_at)
                        .await
                        .map(|_| None)
                }
                Ok(TransactionStatusOutcome::Canceled { canceled_at }) => self
                    .cancel_transaction(provider, &tx.transaction_id, canceled_at)
                    .await
                    .map(|_| Some(canceled_at)),
                Err(_) => self
                    .cancel_transaction(provider, &tx.transaction_id, now)
                    .await
                    .map(|_| Some(now)),
            };
            match applied {
                Ok(canceled_at) => {
                    result.succeeded += 1;
                    if let Some(canceled_at) = canceled_at {
                        self.cascade_cancel_subscription(provider, tx, canceled_at).await;
                    }
                }
                Err(e) => {
                    result.failed += 1;
                    sink.report(BatchItemError::new(tx.transaction_id.clone(), &e));
                }
            }
        }

        self.release_lease(provider, "check_transactions");
        Ok(result)
    }

    /// If a transaction's initiating subscription is still `pending` when
    /// the transaction itself cancels, cascade the cancellation so the
    /// subscription doesn't linger forever with no paid transaction
    /// (SPEC_FULL.md §9.1 — configurable, default on).
    async fn cascade_cancel_subscription(
        &self,
        provider: &str,
        tx: &Transaction,
        canceled_at: chrono::DateTime<Utc>,
    ) {
        if !self.config.cascade_cancel_on_transaction_expiry {
            return;
        }
        if let Some(original_transaction_id) = &tx.original_transaction_id {
            let _ = self
                .cancel_subscription_record(provider, original_transaction_id, canceled_at)
                .await;
        }
    }

    /// Polls subscriptions entering their renewal window, attempting a
    /// recharge against the provider for each (spec.md §4.4 renewal table).
    pub async fn check_subscription_renewal(
        &self,
        provider: &str,
        sink: &mut dyn ErrorSink,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationResult> {
        let mut result = ReconciliationResult::default();
        if !self.try_acquire_lease(provider, "check_subscription_renewal") {
            result.skipped_lease_held = true;
            return Ok(result);
        }

        let now = self.clock.now();
        let due = self
            .repository
            .list_subscriptions_due_for_renewal(provider, now, self.config.renewal_before)
            .await?;
        let adapter = self.registry.adapter(provider)?;

        for sub in &due {
            if cancel.is_canceled() {
                self.release_lease(provider, "check_subscription_renewal");
                return Err(Error::canceled(
                    "check_subscription_renewal canceled mid-batch",
                ));
            }
            result.processed += 1;
            let ctx = OriginalTxContext {
                original_transaction_id: sub.original_transaction_id.clone(),
                user_id: sub.user_id.clone(),
                product_id: sub.product_id.clone(),
            };
            let outcome = adapter
                .recharge_subscription(&ctx, sub.renewal_attempt)
                .await;
            let applied = match outcome {
                Ok(RechargeOutcome::Renewal {
                    transaction_id,
                    purchased_at,
                    duration,
                }) => {
                    self.apply_renewal(
                        provider,
                        &sub.original_transaction_id,
                        &transaction_id,
                        purchased_at,
                        duration,
                    )
                    .await
                    .map(|_| ())
                }
                Ok(RechargeOutcome::RechargeFailed { failed_at, .. }) => self
                    .apply_recharge_failed(provider, &sub.original_transaction_id, failed_at)
                    .await
                    .map(|_| ()),
                Ok(RechargeOutcome::SubscriptionCanceled { canceled_at, .. }) => self
                    .cancel_subscription_record(provider, &sub.original_transaction_id, canceled_at)
                    .await
                    .map(|_| ()),
                Err(e) => Err(e),
            };
            match applied {
                Ok(_) => result.succeeded += 1,
                Err(e) => {
                    result.failed += 1;
                    sink.report(BatchItemError::new(sub.original_transaction_id.clone(), &e));
                }
            }
        }

        self.release_lease(provider, "check_subscription_renewal");
        Ok(result)
    }

    /// Polls subscriptions still waiting on a `subscribed` event that may
    /// never arrive, querying the provider directly for confirmation.
    pub async fn check_uncompleted_subscription(
        &self,
        provider: &str,
        sink: &mut dyn ErrorSink,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationResult> {
        let mut result = ReconciliationResult::default();
        if !self.try_acquire_lease(provider, "check_uncompleted_subscription") {
            result.skipped_lease_held = true;
            return Ok(result);
        }

        let unconfirmed = self
            .repository
            .list_unconfirmed_subscriptions(provider)
            .await?;
        let adapter = self.registry.adapter(provider)?;

        for sub in &unconfirmed {
            if cancel.is_canceled() {
                self.release_lease(provider, "check_uncompleted_subscription");
                return Err(Error::canceled(
                    "check_uncompleted_subscription canceled mid-batch",
                ));
            }
            result.processed += 1;
            let applied = self
                .apply_uncompleted_subscription_check(provider, sub, &adapter)
                .await;
            match applied {
                Ok(_) => result.succeeded += 1,
                Err(e) => {
                    result.failed += 1;
                    sink.report(BatchItemError::new(sub.original_transaction_id.clone(), &e));
                }
            }
        }

        self.release_lease(provider, "check_uncompleted_subscription");
        Ok(result)
    }

    async fn apply_uncompleted_subscription_check(
        &self,
        provider: &str,
        sub: &Subscription,
        adapter: &std::sync::Arc<dyn crate::provider::ProviderAdapter>,
    ) -> Result<()> {
        match adapter
            .query_subscription_status(&sub.original_transaction_id)
            .await?
        {
            SubscriptionStatusOutcome::Subscribed { subscribed_at, .. } => {
                self.apply_subscribed_event(provider, &sub.original_transaction_id, subscribed_at)
                    .await?;
                let transaction_id = sub.original_transaction_id.clone();
                self.confirm_subscription_transaction(
                    provider,
                    &sub.original_transaction_id,
                    &transaction_id,
                    subscribed_at,
                )
                .await?;
            }
            SubscriptionStatusOutcome::Canceled { canceled_at } => {
                self.cancel_subscription_record(provider, &sub.original_transaction_id, canceled_at)
                    .await?;
            }
        }
        Ok(())
    }
}
