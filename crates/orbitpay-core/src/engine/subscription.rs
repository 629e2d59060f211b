//! Subscription lifecycle (spec.md C4): pending -> not-start -> active ->
//! canceled, plus renewal and plan-change transitions. Builds on the same
//! CAS-retry primitive `transaction.rs` establishes, generalized to the
//! subscription aggregate the way the teacher layers
//! `SubscriptionRepository` operations on top of the same Postgres pool its
//! `ProductRepository` uses (`repository/subscription_repository.rs`).

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::error::{Error, TransitionError};
use crate::models::subscription::SubscriptionTransactionRef;
use crate::models::{ProductType, Subscription, SubscriptionStatus, Transaction, TransactionType};
use crate::provider::{OriginalTxContext, PrepareContext};
use crate::repository::{Repository, SubscriptionPatch, TransactionPatch};
use crate::Result;

use super::Engine;

fn check_not_canceled(sub: &Subscription) -> std::result::Result<(), TransitionError> {
    if sub.canceled_at.is_some() {
        return Err(TransitionError::TerminalState(format!(
            "{}/{} is already canceled",
            sub.provider, sub.original_transaction_id
        )));
    }
    Ok(())
}

impl<R: Repository, C: Clock> Engine<R, C> {
    /// Starts or reuses a subscription for `user_id` on `product_id`
    /// (spec.md §4.4). Three cases: no existing subscription in the
    /// product's group (fresh start), an existing active subscription on
    /// the same product (idempotent reuse, no new provider call), or an
    /// existing active subscription on a different product in the same
    /// group (plan change, contiguous coverage).
    pub async fn prepare_subscription(
        &self,
        provider: &str,
        product_id: &str,
        user_id: &str,
    ) -> Result<(Subscription, Option<serde_json::Value>)> {
        let product = self
            .require_purchase_or_subscription_product(provider, product_id, ProductType::Subscription)
            .await?;
        let group = product
            .group
            .clone()
            .ok_or_else(|| Error::config(format!("subscription product {product_id} has no group")))?;

        let now = self.clock.now();
        let siblings = self
            .repository
            .list_subscriptions_for_user_group(user_id, &group)
            .await?;
        let active = siblings
            .into_iter()
            .find(|s| s.status(self.clock.as_ref()) != SubscriptionStatus::Canceled);

        if let Some(existing) = active {
            if existing.product_id == product_id {
                // Same plan already active or pending: idempotent reuse.
                return Ok((existing, None));
            }
            return self
                .change_plan(provider, &existing, &product, user_id, now)
                .await
                .map(|sub| (sub, None));
        }

        self.start_fresh_subscription(provider, &product, user_id, now)
            .await
            .map(|(sub, resp)| (sub, Some(resp)))
    }

    async fn start_fresh_subscription(
        &self,
        provider: &str,
        product: &crate::models::Product,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(Subscription, serde_json::Value)> {
        let adapter = self.registry.adapter(provider)?;
        let payment_expires_at = now + self.config.purchase_expires_after;
        let prepared = adapter
            .prepare_subscription_data(PrepareContext {
                user_id: user_id.to_string(),
                product: product.clone(),
                starts_at: now,
                payment_expires_at,
            })
            .await?;

        let tx = Transaction {
            provider: provider.to_string(),
            transaction_id: prepared.transaction_id.clone(),
            user_id: user_id.to_string(),
            product_id: product.id.clone(),
            transaction_type: TransactionType::Subscription,
            created_at: now,
            starts_at: now,
            payment_expires_at,
            purchased_at: None,
            completed_at: None,
            canceled_at: None,
            duration: Some(prepared.duration),
            original_transaction_id: Some(prepared.original_transaction_id.clone()),
            raw: serde_json::Value::Null,
            version: 1,
            schema_version: crate::models::SCHEMA_VERSION,
        };
        self.repository.insert_transaction(tx).await?;

        let sub = Subscription {
            provider: provider.to_string(),
            original_transaction_id: prepared.original_transaction_id,
            user_id: user_id.to_string(),
            product_id: product.id.clone(),
            product_group: product
                .group
                .clone()
                .expect("checked by caller: subscription product always has a group"),
            transactions: vec![SubscriptionTransactionRef {
                transaction_id: prepared.transaction_id,
                duration: prepared.duration,
                completed: false,
            }],
            starts_at: None,
            expires_at: None,
            canceled_at: None,
            renewal_enabled: false,
            last_failed_at: None,
            renewal_attempt: 0,
            version: 1,
            schema_version: crate::models::SCHEMA_VERSION,
        };
        let stored = self.repository.insert_subscription(sub).await?;
        Ok((stored, prepared.response))
    }

    /// Creates the replacement subscription for a plan change, anchored at
    /// the existing one's `expires_at` so coverage is contiguous, then
    /// cancels the existing subscription at the provider. Fails loudly with
    /// `Error::UnsupportedOperation` if the adapter doesn't advertise
    /// `supports_cancel_subscription` (spec.md §9 design note).
    async fn change_plan(
        &self,
        provider: &str,
        existing: &Subscription,
        new_product: &crate::models::Product,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Subscription> {
        let adapter = self.registry.adapter(provider)?;
        if !adapter.capabilities().supports_cancel_subscription {
            return Err(Error::unsupported_operation(
                "provider does not support cancel_subscription, required for plan change",
            ));
        }

        let starts_at = existing.expires_at.unwrap_or(now);
        let payment_expires_at = now + self.config.purchase_expires_after;
        let prepared = adapter
            .prepare_subscription_data(PrepareContext {
                user_id: user_id.to_string(),
                product: new_product.clone(),
                starts_at,
                payment_expires_at,
            })
            .await?;

        let tx = Transaction {
            provider: provider.to_string(),
            transaction_id: prepared.transaction_id.clone(),
            user_id: user_id.to_string(),
            product_id: new_product.id.clone(),
            transaction_type: TransactionType::Subscription,
            created_at: now,
            starts_at,
            payment_expires_at,
            purchased_at: None,
            completed_at: None,
            canceled_at: None,
            duration: Some(prepared.duration),
            original_transaction_id: Some(prepared.original_transaction_id.clone()),
            raw: serde_json::Value::Null,
            version: 1,
            schema_version: crate::models::SCHEMA_VERSION,
        };
        self.repository.insert_transaction(tx).await?;

        let new_sub = Subscription {
            provider: provider.to_string(),
            original_transaction_id: prepared.original_transaction_id,
            user_id: user_id.to_string(),
            product_id: new_product.id.clone(),
            product_group: existing.product_group.clone(),
            transactions: vec![SubscriptionTransactionRef {
                transaction_id: prepared.transaction_id,
                duration: prepared.duration,
                completed: false,
            }],
            starts_at: Some(starts_at),
            expires_at: None,
            canceled_at: None,
            renewal_enabled: false,
            last_failed_at: None,
            renewal_attempt: 0,
            version: 1,
            schema_version: crate::models::SCHEMA_VERSION,
        };
        let stored = self.repository.insert_subscription(new_sub).await?;

        let ctx = OriginalTxContext {
            original_transaction_id: existing.original_transaction_id.clone(),
            user_id: user_id.to_string(),
            product_id: existing.product_id.clone(),
        };
        let deferred_cancel_action = if let Err(e) = adapter.cancel_subscription(&ctx).await {
            tracing::warn!(
                provider,
                original_transaction_id = %existing.original_transaction_id,
                error = %e,
                "inline cancel_subscription failed during plan change, deferring"
            );
            Some(self.build_action_record(super::actions::ActionKind::CancelPriorSubscriptionAtProvider {
                provider: provider.to_string(),
                original_transaction_id: existing.original_transaction_id.clone(),
                user_id: user_id.to_string(),
                product_id: existing.product_id.clone(),
            }))
        } else {
            None
        };
        // The deferred-cancel action, if any, is attached to the same
        // subscription patch that records the cancellation, so the two are
        // persisted in one write (spec.md §4.8).
        self.cancel_subscription_record_with_action(
            provider,
            &existing.original_transaction_id,
            now,
            deferred_cancel_action,
        )
        .await?;

        Ok(stored)
    }

    /// Applies the first confirmed payment for a subscription's originating
    /// (or plan-change) transaction: completes the transaction and, if this
    /// is the subscription's first confirmation, activates it.
    pub async fn confirm_subscription_transaction(
        &self,
        provider: &str,
        original_transaction_id: &str,
        transaction_id: &str,
        purchased_at: DateTime<Utc>,
    ) -> Result<Subscription> {
        self.apply_terminal_transition(provider, transaction_id, move |tx| {
            if tx.is_terminal() {
                return Err(TransitionError::TerminalState(format!(
                    "{}/{} is already {:?}",
                    tx.provider,
                    tx.transaction_id,
                    tx.status()
                )));
            }
            Ok(TransactionPatch {
                purchased_at: Some(purchased_at),
                completed_at: Some(purchased_at),
                ..Default::default()
            })
        })
        .await?;

        self.mark_transaction_ref_completed(provider, original_transaction_id, transaction_id, purchased_at)
            .await
    }

    async fn mark_transaction_ref_completed(
        &self,
        provider: &str,
        original_transaction_id: &str,
        transaction_id: &str,
        purchased_at: DateTime<Utc>,
    ) -> Result<Subscription> {
        let mut attempt = 0;
        loop {
            let sub = self
                .repository
                .find_subscription(provider, original_transaction_id)
                .await?
                .ok_or_else(|| {
                    Error::not_found(format!("subscription {provider}/{original_transaction_id}"))
                })?;
            check_not_canceled(&sub)?;
            let is_first_confirmation = sub.starts_at.is_none();
            let duration = sub
                .transactions
                .iter()
                .find(|t| t.transaction_id == transaction_id)
                .map(|t| t.duration)
                .ok_or_else(|| {
                    Error::conflict(format!("transaction {transaction_id} not linked to subscription"))
                })?;
            // The `SubscriptionActivated` action, if this is the first
            // confirmation, is attached to this same patch so the
            // activation and its action land in one write (spec.md §4.8).
            let action = is_first_confirmation.then(|| {
                self.build_action_record(super::actions::ActionKind::SubscriptionActivated {
                    provider: provider.to_string(),
                    original_transaction_id: original_transaction_id.to_string(),
                })
            });
            let patch = SubscriptionPatch {
                starts_at: if is_first_confirmation {
                    Some(purchased_at)
                } else {
                    None
                },
                push_transaction: Some(SubscriptionTransactionRef {
                    transaction_id: transaction_id.to_string(),
                    duration,
                    completed: true,
                }),
                action,
                ..Default::default()
            };
            match self
                .repository
                .update_subscription(provider, original_transaction_id, patch, sub.version)
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

    /// Applies a `subscribed` provider event: enables renewal. Best-effort —
    /// a subscription already activated by its payment confirmation is not
    /// blocked on this event ever arriving (spec.md §9 design note).
    pub async fn apply_subscribed_event(
        &self,
        provider: &str,
        original_transaction_id: &str,
        _subscribed_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut attempt = 0;
        loop {
            let sub = self
                .repository
                .find_subscription(provider, original_transaction_id)
                .await?;
            let Some(sub) = sub else { return Ok(()) };
            if sub.renewal_enabled {
                return Ok(());
            }
            let patch = SubscriptionPatch {
                renewal_enabled: Some(true),
                ..Default::default()
            };
            match self
                .repository
                .update_subscription(provider, original_transaction_id, patch, sub.version)
                .await
            {
                Ok(_) => return Ok(()),
                Err(Error::Conflict(_)) => {
                    attempt += 1;
                    if attempt > self.config.conflict_retries {
                        return Ok(());
                    }
                    continue;
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Applies a successful renewal: records the new completed transaction
    /// against the subscription and resets the failure counter.
    pub async fn apply_renewal(
        &self,
        provider: &str,
        original_transaction_id: &str,
        transaction_id: &str,
        purchased_at: DateTime<Utc>,
        duration: crate::common::Duration,
    ) -> Result<Subscription> {
        let owner = self
            .repository
            .find_subscription(provider, original_transaction_id)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!("subscription {provider}/{original_transaction_id}"))
            })?;

        let tx = Transaction {
            provider: provider.to_string(),
            transaction_id: transaction_id.to_string(),
            user_id: owner.user_id.clone(),
            product_id: owner.product_id.clone(),
            transaction_type: TransactionType::Subscription,
            created_at: purchased_at,
            starts_at: purchased_at,
            payment_expires_at: purchased_at,
            purchased_at: Some(purchased_at),
            completed_at: Some(purchased_at),
            canceled_at: None,
            duration: Some(duration),
            original_transaction_id: Some(original_transaction_id.to_string()),
            raw: serde_json::Value::Null,
            version: 1,
            schema_version: crate::models::SCHEMA_VERSION,
        };
        // Renewal transactions are recorded for audit but owned by the
        // subscription; a duplicate-key insert means this renewal event was
        // already applied (the idempotent case). Any other insert failure
        // propagates instead of letting the expiry recompute proceed as if
        // the transaction had been persisted.
        match self.repository.insert_transaction(tx).await {
            Ok(_) | Err(Error::DuplicateAggregate(_)) => {}
            Err(other) => return Err(other),
        }

        let mut attempt = 0;
        loop {
            let sub = self
                .repository
                .find_subscription(provider, original_transaction_id)
                .await?
                .ok_or_else(|| {
                    Error::not_found(format!("subscription {provider}/{original_transaction_id}"))
                })?;
            check_not_canceled(&sub)?;
            let patch = SubscriptionPatch {
                renewal_attempt: Some(0),
                last_failed_at: Some(None),
                push_transaction: Some(SubscriptionTransactionRef {
                    transaction_id: transaction_id.to_string(),
                    duration,
                    completed: true,
                }),
                ..Default::default()
            };
            match self
                .repository
                .update_subscription(provider, original_transaction_id, patch, sub.version)
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

    /// Records a failed renewal attempt without canceling the subscription,
    /// unless the subscription has already lapsed by `failed_at`, in which
    /// case retrying further is pointless and the subscription is canceled
    /// instead (spec.md §4.4: reconciliation stops once `expiresAt <= now`).
    pub async fn apply_recharge_failed(
        &self,
        provider: &str,
        original_transaction_id: &str,
        failed_at: DateTime<Utc>,
    ) -> Result<Subscription> {
        let mut attempt = 0;
        loop {
            let sub = self
                .repository
                .find_subscription(provider, original_transaction_id)
                .await?
                .ok_or_else(|| {
                    Error::not_found(format!("subscription {provider}/{original_transaction_id}"))
                })?;
            check_not_canceled(&sub)?;
            if sub.expires_at.is_some_and(|exp| failed_at >= exp) {
                return self
                    .cancel_subscription_record(provider, original_transaction_id, failed_at)
                    .await;
            }
            let patch = SubscriptionPatch {
                last_failed_at: Some(Some(failed_at)),
                renewal_attempt: Some(sub.renewal_attempt + 1),
                ..Default::default()
            };
            match self
                .repository
                .update_subscription(provider, original_transaction_id, patch, sub.version)
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

    /// User-initiated cancellation: calls the adapter then records the
    /// cancellation. Retains entitlement through the already-paid period
    /// (spec.md §8 seed scenario) — only `canceled_at` and `renewal_enabled`
    /// change, `expires_at` is untouched.
    pub async fn cancel_subscription(
        &self,
        provider: &str,
        original_transaction_id: &str,
    ) -> Result<Subscription> {
        let sub = self
            .repository
            .find_subscription(provider, original_transaction_id)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!("subscription {provider}/{original_transaction_id}"))
            })?;
        let adapter = self.registry.adapter(provider)?;
        if !adapter.capabilities().supports_cancel_subscription {
            return Err(Error::unsupported_operation("cancel_subscription"));
        }
        let ctx = OriginalTxContext {
            original_transaction_id: sub.original_transaction_id.clone(),
            user_id: sub.user_id.clone(),
            product_id: sub.product_id.clone(),
        };
        adapter.cancel_subscription(&ctx).await?;
        let now = self.clock.now();
        self.cancel_subscription_record(provider, original_transaction_id, now)
            .await
    }

    /// Applies a provider-originated cancellation (callback or poll), or the
    /// bookkeeping half of a user-initiated / plan-change cancellation.
    pub async fn cancel_subscription_record(
        &self,
        provider: &str,
        original_transaction_id: &str,
        canceled_at: DateTime<Utc>,
    ) -> Result<Subscription> {
        self.cancel_subscription_record_with_action(provider, original_transaction_id, canceled_at, None)
            .await
    }

    /// Same as [`Self::cancel_subscription_record`], but attaches `action`
    /// (if any) to the same CAS write, for callers that have a deferred
    /// side effect to persist alongside the cancellation (spec.md §4.8).
    pub(super) async fn cancel_subscription_record_with_action(
        &self,
        provider: &str,
        original_transaction_id: &str,
        canceled_at: DateTime<Utc>,
        action: Option<crate::repository::ActionRecord>,
    ) -> Result<Subscription> {
        let mut attempt = 0;
        loop {
            let sub = self
                .repository
                .find_subscription(provider, original_transaction_id)
                .await?
                .ok_or_else(|| {
                    Error::not_found(format!("subscription {provider}/{original_transaction_id}"))
                })?;
            check_not_canceled(&sub)?;
            let patch = SubscriptionPatch {
                canceled_at: Some(Some(canceled_at)),
                renewal_enabled: Some(false),
                action: action.clone(),
                ..Default::default()
            };
            match self
                .repository
                .update_subscription(provider, original_transaction_id, patch, sub.version)
                .await
            {
                Ok(updated) => {
                    tracing::info!(%provider, %original_transaction_id, "subscription canceled");
                    return Ok(updated);
                }
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
}
