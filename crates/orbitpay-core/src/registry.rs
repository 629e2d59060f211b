//! Provider registry (spec.md §4.1, C1). Maps provider names onto adapters
//! and caches resolved product descriptors for the process lifetime so
//! `require_product` doesn't round-trip to the provider on every call.
//! Grounded on the teacher's `Repositories<P, C>` container
//! (`repository/traits.rs`) generalized from a fixed pair of fields to an
//! open map, using `dashmap` for the cache the way the teacher's
//! `middleware`/`performance` modules use it for concurrent counters.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::Error;
use crate::models::Product;
use crate::provider::ProviderAdapter;
use crate::Result;

pub struct Registry {
    adapters: std::collections::HashMap<String, Arc<dyn ProviderAdapter>>,
    product_cache: DashMap<(String, String), Product>,
}

impl Registry {
    pub fn new(adapters: Vec<Arc<dyn ProviderAdapter>>) -> Self {
        let adapters = adapters
            .into_iter()
            .map(|a| (a.id().to_string(), a))
            .collect();
        Self {
            adapters,
            product_cache: DashMap::new(),
        }
    }

    pub fn adapter(&self, provider: &str) -> Result<Arc<dyn ProviderAdapter>> {
        self.adapters
            .get(provider)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("no adapter registered for {provider}")))
    }

    /// Resolves a product descriptor, consulting the cache first. A cache
    /// miss calls the adapter and populates the cache on success; adapter
    /// failures are never cached.
    pub async fn require_product(&self, provider: &str, product_id: &str) -> Result<Product> {
        let key = (provider.to_string(), product_id.to_string());
        if let Some(cached) = self.product_cache.get(&key) {
            return Ok(cached.clone());
        }
        let adapter = self.adapter(provider)?;
        let product = adapter.require_product(product_id).await?;
        self.product_cache.insert(key, product.clone());
        Ok(product)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProductType;
    use crate::provider::mock::MockAdapter;

    fn registry_with_one_adapter() -> (Arc<MockAdapter>, Registry) {
        let adapter = Arc::new(MockAdapter::new("acme"));
        adapter.register_product(Product {
            id: "widget".into(),
            group: None,
            product_type: ProductType::Purchase,
            duration: None,
        });
        let registry = Registry::new(vec![adapter.clone() as Arc<dyn ProviderAdapter>]);
        (adapter, registry)
    }

    #[tokio::test]
    async fn unknown_provider_is_not_found() {
        let (_adapter, registry) = registry_with_one_adapter();
        let err = registry.require_product("other", "widget").await.unwrap_err();
        assert_eq!(err.category(), "not_found");
    }

    #[tokio::test]
    async fn caches_product_after_first_resolution() {
        let (_adapter, registry) = registry_with_one_adapter();
        let first = registry.require_product("acme", "widget").await.unwrap();
        assert_eq!(first.id, "widget");
        assert_eq!(registry.product_cache.len(), 1);
        let second = registry.require_product("acme", "widget").await.unwrap();
        assert_eq!(second.id, "widget");
        assert_eq!(registry.product_cache.len(), 1);
    }
}
