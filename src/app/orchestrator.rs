use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::join_all;
use reqwest::Client;

use crate::adapters::providers::ProviderRegistry;
use crate::domain::aggregate::{
    StatusFilter, VendorResult, aggregate_by_identity, apply_filter, merge_vendor_results,
};
use crate::domain::station::AggregatedStatus;

/// Fans one refresh cycle out across every registered vendor. Holds no
/// persistence and makes no scheduling decisions; callers own both.
pub struct FetchOrchestrator {
    registry: Arc<ProviderRegistry>,
    client: Client,
}

impl FetchOrchestrator {
    pub fn new(registry: Arc<ProviderRegistry>, client: Client) -> Self {
        Self { registry, client }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Query all vendors concurrently. Each vendor resolves independently;
    /// one vendor's failure never changes another vendor's entry.
    pub async fn fetch_all_vendors(&self) -> BTreeMap<String, VendorResult> {
        let providers = self.registry.providers();
        let calls = providers.iter().map(|provider| provider.fetch_all(&self.client));
        let outcomes = join_all(calls).await;

        let mut results = BTreeMap::new();
        for (provider, outcome) in providers.iter().zip(outcomes) {
            let result = match outcome {
                Ok(rows) => VendorResult::Success(rows),
                Err(error) => {
                    tracing::error!(
                        vendor = provider.vendor_id(),
                        error = %error,
                        "vendor fetch failed"
                    );
                    VendorResult::Failure(error.to_string())
                }
            };
            results.insert(provider.vendor_id().to_string(), result);
        }
        results
    }

    /// Live merged view straight from the vendors, bypassing the cache.
    /// Used for the cold-start fallback and the one-shot CLI. With a vendor
    /// filter set, only that vendor is queried. The filter narrows rows
    /// before identity dedup, so a device filter can pick out a catalog row
    /// that shares its `hash_id` with an earlier one.
    pub async fn fetch_live(&self, filter: &StatusFilter) -> Vec<AggregatedStatus> {
        let results = match filter.vendor.as_deref() {
            Some(vendor_id) => {
                let mut results = BTreeMap::new();
                if let Some(provider) = self.registry.get(vendor_id) {
                    let result = match provider.fetch_all(&self.client).await {
                        Ok(rows) => VendorResult::Success(rows),
                        Err(error) => VendorResult::Failure(error.to_string()),
                    };
                    results.insert(vendor_id.to_string(), result);
                }
                results
            }
            None => self.fetch_all_vendors().await,
        };

        aggregate_by_identity(apply_filter(merge_vendor_results(&results), filter))
    }
}
