//! Provider callback dispatch (spec.md C5, §4.5). Parses the provider's
//! pushed payload into a [`ProviderEvent`] and routes it to the matching
//! aggregate transition, folding an unrecognized payload or a rejected
//! transition into the corresponding `Error` variant rather than swallowing it.

use crate::clock::Clock;
use crate::error::Error;
use crate::provider::ProviderEvent;
use crate::repository::Repository;
use crate::Result;

use super::Engine;

/// A replay of a terminal transition arriving through the callback path is a
/// distinct failure kind from the same replay arriving through a direct API
/// call: the callback surfaces `callback-rejected` rather than
/// `conflicting-terminal-transition`, so a caller can tell "I already knew
/// about this" apart from "something raced my own API call" (spec.md §4.5,
/// idempotence test in §8).
fn reject_terminal_replay_as_callback(err: Error) -> Error {
    match err {
        Error::ConflictingTerminalTransition(msg) => Error::CallbackRejected(msg),
        other => other,
    }
}

impl<R: Repository, C: Clock> Engine<R, C> {
    pub async fn handle_callback(&self, provider: &str, payload: &[u8]) -> Result<ProviderEvent> {
        let adapter = self.registry.adapter(provider)?;
        let event = adapter.parse_callback(payload).await?;
        self.apply_provider_event(provider, event.clone()).await?;
        Ok(event)
    }

    pub async fn apply_provider_event(&self, provider: &str, event: ProviderEvent) -> Result<()> {
        match event {
            ProviderEvent::PaymentConfirmed {
                transaction_id,
                purchased_at,
            } => {
                self.confirm_transaction(provider, &transaction_id, purchased_at)
                    .await
                    .map_err(reject_terminal_replay_as_callback)?;
            }
            ProviderEvent::PaymentCanceled {
                transaction_id,
                canceled_at,
            } => {
                self.cancel_transaction(provider, &transaction_id, canceled_at)
                    .await
                    .map_err(reject_terminal_replay_as_callback)?;
            }
            ProviderEvent::Subscribed {
                original_transaction_id,
                subscribed_at,
            } => {
                self.apply_subscribed_event(provider, &original_transaction_id, subscribed_at)
                    .await?;
            }
            ProviderEvent::SubscriptionRenewal {
                original_transaction_id,
                transaction_id,
                purchased_at,
                duration,
            } => {
                self.apply_renewal(
                    provider,
                    &original_transaction_id,
                    &transaction_id,
                    purchased_at,
                    duration,
                )
                .await
                .map_err(reject_terminal_replay_as_callback)?;
            }
            ProviderEvent::SubscriptionCanceled {
                original_transaction_id,
                canceled_at,
                ..
            } => {
                self.cancel_subscription_record(provider, &original_transaction_id, canceled_at)
                    .await
                    .map_err(reject_terminal_replay_as_callback)?;
            }
        }
        Ok(())
    }
}
