//! Storage collaborator port
//!
//! The persistence layer itself lives outside this pipeline; the worker only
//! needs the write-back operation below. The in-memory implementation backs
//! tests and single-process deployments.

use crate::error::Result;
use crate::package::Package;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// Write-back interface consumed by the worker
#[async_trait]
pub trait PackageStore: Send + Sync {
    /// Set the computed delivery cost on a package.
    ///
    /// Returns `Ok(None)` when no matching package exists — the referenced
    /// row can never appear, so the caller treats it as terminal. A transport
    /// or write failure is `Err` and is retryable.
    async fn update_delivery_cost(
        &self,
        package_id: Uuid,
        delivery_cost: Decimal,
    ) -> Result<Option<Package>>;
}

/// In-memory package store
#[derive(Default)]
pub struct InMemoryPackageStore {
    packages: RwLock<HashMap<Uuid, Package>>,
}

impl InMemoryPackageStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a package record
    pub async fn insert(&self, package: Package) {
        self.packages.write().await.insert(package.id, package);
    }

    /// Fetch a package by id
    pub async fn get(&self, package_id: Uuid) -> Option<Package> {
        self.packages.read().await.get(&package_id).cloned()
    }
}

#[async_trait]
impl PackageStore for InMemoryPackageStore {
    async fn update_delivery_cost(
        &self,
        package_id: Uuid,
        delivery_cost: Decimal,
    ) -> Result<Option<Package>> {
        let mut packages = self.packages.write().await;

        match packages.get_mut(&package_id) {
            Some(package) => {
                package.delivery_cost_rub = Some(delivery_cost);
                info!(
                    "Updated delivery cost for package {}: {} RUB",
                    package_id, delivery_cost
                );
                Ok(Some(package.clone()))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn sample_package(id: Uuid) -> Package {
        Package {
            id,
            weight: dec!(1),
            value_of_contents_usd: dec!(10),
            delivery_cost_rub: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_update_existing_package() {
        let store = InMemoryPackageStore::new();
        let id = Uuid::new_v4();
        store.insert(sample_package(id)).await;

        let updated = store.update_delivery_cost(id, dec!(540)).await.unwrap();

        assert_eq!(updated.unwrap().delivery_cost_rub, Some(dec!(540)));
        assert_eq!(store.get(id).await.unwrap().delivery_cost_rub, Some(dec!(540)));
    }

    #[tokio::test]
    async fn test_update_missing_package_returns_none() {
        let store = InMemoryPackageStore::new();

        let updated = store
            .update_delivery_cost(Uuid::new_v4(), dec!(1))
            .await
            .unwrap();

        assert!(updated.is_none());
    }

}
