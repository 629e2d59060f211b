//! A scripted provider adapter for tests (SPEC_FULL.md §6.2). Generalizes the
//! teacher's `MockPaymentGateway` (`payment/gateways/mod.rs`), which always
//! returned a hardcoded success, into a per-operation queue a test can push
//! canned outcomes onto, so seed scenarios can drive specific provider
//! behavior (failures, cancellations, unsupported operations) deterministically.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Error;
use crate::models::{Product, ProductType};
use crate::Result;

use super::{
    AdapterCapabilities, OriginalTxContext, PrepareContext, PreparedPurchase,
    PreparedSubscription, ProviderAdapter, ProviderEvent, RechargeOutcome,
    SubscriptionStatusOutcome, TransactionStatusOutcome,
};

/// Scripted responses for one `MockAdapter` instance. Each queue is drained
/// front-to-back; an empty queue falls back to a reasonable default so tests
/// that don't care about an operation don't need to script it.
#[derive(Default)]
struct Scripts {
    products: std::collections::HashMap<String, Product>,
    callbacks: VecDeque<Result<ProviderEvent>>,
    transaction_statuses: VecDeque<Result<TransactionStatusOutcome>>,
    subscription_statuses: VecDeque<Result<SubscriptionStatusOutcome>>,
    recharges: VecDeque<Result<RechargeOutcome>>,
    cancel_results: VecDeque<Result<bool>>,
}

pub struct MockAdapter {
    id: String,
    capabilities: AdapterCapabilities,
    scripts: Mutex<Scripts>,
}

impl MockAdapter {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capabilities: AdapterCapabilities::default(),
            scripts: Mutex::new(Scripts::default()),
        }
    }

    pub fn with_capabilities(mut self, capabilities: AdapterCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn register_product(&self, product: Product) {
        self.scripts.lock().unwrap().products.insert(product.id.clone(), product);
    }

    pub fn push_callback(&self, event: Result<ProviderEvent>) {
        self.scripts.lock().unwrap().callbacks.push_back(event);
    }

    pub fn push_transaction_status(&self, outcome: Result<TransactionStatusOutcome>) {
        self.scripts
            .lock()
            .unwrap()
            .transaction_statuses
            .push_back(outcome);
    }

    pub fn push_subscription_status(&self, outcome: Result<SubscriptionStatusOutcome>) {
        self.scripts
            .lock()
            .unwrap()
            .subscription_statuses
            .push_back(outcome);
    }

    pub fn push_recharge(&self, outcome: Result<RechargeOutcome>) {
        self.scripts.lock().unwrap().recharges.push_back(outcome);
    }

    pub fn push_cancel_result(&self, outcome: Result<bool>) {
        self.scripts.lock().unwrap().cancel_results.push_back(outcome);
    }

    fn new_transaction_id(&self) -> String {
        format!("{}_{}", self.id, Uuid::new_v4())
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> AdapterCapabilities {
        self.capabilities
    }

    async fn require_product(&self, product_id: &str) -> Result<Product> {
        let scripts = self.scripts.lock().unwrap();
        scripts
            .products
            .get(product_id)
            .cloned()
            .ok_or_else(|| Error::unknown_product(product_id))
    }

    async fn prepare_purchase_data(&self, ctx: PrepareContext) -> Result<PreparedPurchase> {
        debug_assert_eq!(ctx.product.product_type, ProductType::Purchase);
        Ok(PreparedPurchase {
            response: serde_json::json!({"mock": true, "product_id": ctx.product.id}),
            transaction_id: self.new_transaction_id(),
        })
    }

    async fn prepare_subscription_data(
        &self,
        ctx: PrepareContext,
    ) -> Result<PreparedSubscription> {
        debug_assert_eq!(ctx.product.product_type, ProductType::Subscription);
        let transaction_id = self.new_transaction_id();
        let duration = ctx
            .product
            .duration
            .ok_or_else(|| Error::config("subscription product missing duration"))?;
        Ok(PreparedSubscription {
            response: serde_json::json!({"mock": true, "product_id": ctx.product.id}),
            transaction_id: transaction_id.clone(),
            original_transaction_id: transaction_id,
            duration,
        })
    }

    async fn parse_callback(&self, _payload: &[u8]) -> Result<ProviderEvent> {
        let mut scripts = self.scripts.lock().unwrap();
        scripts
            .callbacks
            .pop_front()
            .unwrap_or_else(|| Err(Error::UnrecognizedEvent("no script queued".into())))
    }

    async fn query_transaction_status(
        &self,
        transaction_id: &str,
    ) -> Result<TransactionStatusOutcome> {
        let mut scripts = self.scripts.lock().unwrap();
        scripts.transaction_statuses.pop_front().unwrap_or_else(|| {
            Err(Error::ProviderFailure(format!(
                "no transaction status scripted for {transaction_id}"
            )))
        })
    }

    async fn query_subscription_status(
        &self,
        original_transaction_id: &str,
    ) -> Result<SubscriptionStatusOutcome> {
        let mut scripts = self.scripts.lock().unwrap();
        scripts
            .subscription_statuses
            .pop_front()
            .unwrap_or_else(|| {
                Err(Error::ProviderFailure(format!(
                    "no subscription status scripted for {original_transaction_id}"
                )))
            })
    }

    async fn recharge_subscription(
        &self,
        ctx: &OriginalTxContext,
        _attempt_index: u32,
    ) -> Result<RechargeOutcome> {
        let mut scripts = self.scripts.lock().unwrap();
        scripts.recharges.pop_front().unwrap_or_else(|| {
            Err(Error::ProviderFailure(format!(
                "no recharge scripted for {}",
                ctx.original_transaction_id
            )))
        })
    }

    async fn cancel_subscription(&self, ctx: &OriginalTxContext) -> Result<bool> {
        if !self.capabilities.supports_cancel_subscription {
            return Err(Error::unsupported_operation("cancel_subscription"));
        }
        let mut scripts = self.scripts.lock().unwrap();
        scripts.cancel_results.pop_front().unwrap_or_else(|| {
            let _ = &ctx.original_transaction_id;
            Ok(true)
        })
    }
}
