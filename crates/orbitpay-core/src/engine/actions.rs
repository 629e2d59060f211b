//! Post-transition action queue (spec.md C8). Side effects that follow a
//! state transition — notifying that a subscription activated, retrying a
//! provider cancellation that failed inline — are persisted in the same
//! repository write as the transition that triggered them (the `action`
//! field on [`crate::repository::SubscriptionPatch`]), so a crash between
//! the two never drops one while keeping the other. Delivery is
//! at-least-once by a caller draining the queue; handlers must be
//! idempotent since a crash between dispatch and removal redelivers.
//!
//! Grounded on the teacher's `JobContext`/`JobHandler` split
//! (`jobs/mod.rs`): an action here plays the role of one `JobContext`,
//! `dispatch_pending_actions` the role of a handler loop, generalized from a
//! single retry-policy job runner to a repository-backed outbox since this
//! engine has no external queue to lean on (spec.md §5 Non-goals).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::provider::OriginalTxContext;
use crate::repository::{ActionRecord, Repository};
use crate::Result;

use super::Engine;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ActionKind {
    /// A subscription's first payment confirmed; nothing external to do by
    /// default, but a handler (e.g. an email dispatcher) can be layered on.
    SubscriptionActivated {
        provider: String,
        original_transaction_id: String,
    },
    /// An inline `cancel_subscription` call failed during a plan change;
    /// retry it out-of-band rather than leaving the prior plan still live
    /// at the provider.
    CancelPriorSubscriptionAtProvider {
        provider: String,
        original_transaction_id: String,
        user_id: String,
        product_id: String,
    },
}

impl<R: Repository, C: Clock> Engine<R, C> {
    /// Builds a persistable record for `kind`. The caller attaches this to
    /// the `SubscriptionPatch` of the CAS write that triggers it, so the
    /// action and its triggering transition are written together.
    pub(crate) fn build_action_record(&self, kind: ActionKind) -> ActionRecord {
        ActionRecord {
            id: Uuid::new_v4(),
            kind: serde_json::to_value(&kind).expect("ActionKind always serializes"),
            created_at: self.clock.now(),
            attempts: 0,
        }
    }

    pub async fn pending_action_count(&self) -> Result<usize> {
        Ok(self.repository.list_actions().await?.len())
    }

    /// Dispatches every pending action once, removing it on success and
    /// leaving it queued (with its attempt counter bumped) on failure so a
    /// later call retries.
    pub async fn dispatch_pending_actions(&self) -> Result<usize> {
        let actions = self.repository.list_actions().await?;
        let mut dispatched = 0;
        for action in actions {
            let kind: ActionKind = match serde_json::from_value(action.kind.clone()) {
                Ok(kind) => kind,
                Err(e) => {
                    tracing::error!(action_id = %action.id, error = %e, "unreadable action kind, dropping");
                    self.repository.remove_action(action.id).await?;
                    continue;
                }
            };
            match self.dispatch_one(&kind).await {
                Ok(()) => {
                    self.repository.remove_action(action.id).await?;
                    dispatched += 1;
                }
                Err(e) => {
                    tracing::warn!(action_id = %action.id, error = %e, "action dispatch failed, will retry");
                    self.repository.bump_action_attempts(action.id).await?;
                }
            }
        }
        Ok(dispatched)
    }

    async fn dispatch_one(&self, kind: &ActionKind) -> Result<()> {
        match kind {
            ActionKind::SubscriptionActivated {
                provider,
                original_transaction_id,
            } => {
                tracing::info!(%provider, %original_transaction_id, "subscription activated");
                Ok(())
            }
            ActionKind::CancelPriorSubscriptionAtProvider {
                provider,
                original_transaction_id,
                user_id,
                product_id,
            } => {
                let adapter = self.registry.adapter(provider)?;
                adapter
                    .cancel_subscription(&OriginalTxContext {
                        original_transaction_id: original_transaction_id.clone(),
                        user_id: user_id.clone(),
                        product_id: product_id.clone(),
                    })
                    .await?;
                Ok(())
            }
        }
    }
}
