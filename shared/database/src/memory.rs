//! In-memory price store.
//!
//! Applies the same versioning plan as the PostgreSQL store against a [`PriceLedger`]. The whole
//! state sits behind one mutex, which gives `record_price` the same atomicity as a transaction.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use pricebook_models::{
    normalize_supplier_name, ConsolidatedProductGroup, Price, PriceHistory, PriceLedger, PriceObservation,
    PriceTransition, Product, ProductKey, ProductUpsert, RunStatus, Supplier, UploadMetrics, UploadRecord,
};

use crate::store::{PriceStore, StoreError};

#[derive(Default)]
struct State {
    suppliers: Vec<Supplier>,
    products: HashMap<ProductKey, Product>,
    ledger: PriceLedger,
    uploads: HashMap<Uuid, UploadRecord>,
    failing_products: HashSet<String>,
    failing_name_lookups: bool,
    name_lookups: usize,
    supplier_race: bool,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every upsert of `standardized_name` fail with a storage error.
    pub async fn fail_product(&self, standardized_name: impl Into<String>) {
        self.state.lock().await.failing_products.insert(standardized_name.into());
    }

    /// Make every `known_product_names` call fail.
    pub async fn fail_name_lookups(&self) {
        self.state.lock().await.failing_name_lookups = true;
    }

    /// Number of `known_product_names` calls so far, failed ones included.
    pub async fn name_lookups(&self) -> usize {
        self.state.lock().await.name_lookups
    }

    /// The next supplier creation stores the row but reports a unique violation, as if another
    /// upload had inserted it first.
    pub async fn simulate_supplier_race(&self) {
        self.state.lock().await.supplier_race = true;
    }

    pub async fn products(&self) -> Vec<Product> {
        let state = self.state.lock().await;
        let mut products: Vec<Product> = state.products.values().cloned().collect();
        products.sort_by(|a, b| a.key().cmp(&b.key()));
        products
    }

    pub async fn prices(&self) -> Vec<Price> {
        self.state.lock().await.ledger.prices.clone()
    }

    pub async fn suppliers(&self) -> Vec<Supplier> {
        self.state.lock().await.suppliers.clone()
    }
}

#[async_trait]
impl PriceStore for InMemoryStore {
    async fn find_supplier_by_name(&self, name: &str) -> Result<Option<Supplier>> {
        let normalized = normalize_supplier_name(name);
        let state = self.state.lock().await;
        Ok(state.suppliers.iter().find(|s| s.normalized_name == normalized).cloned())
    }

    async fn create_supplier(&self, supplier: &Supplier) -> Result<Supplier> {
        let mut state = self.state.lock().await;
        let duplicate = state
            .suppliers
            .iter()
            .any(|s| s.normalized_name == supplier.normalized_name);

        if duplicate || state.supplier_race {
            if !duplicate {
                state.supplier_race = false;
                state.suppliers.push(supplier.clone());
            }
            return Err(StoreError::UniqueViolation {
                entity: "supplier",
                key: supplier.normalized_name.clone(),
            }
            .into());
        }

        state.suppliers.push(supplier.clone());
        Ok(supplier.clone())
    }

    async fn find_product(&self, standardized_name: &str, standardized_unit: &str) -> Result<Option<Product>> {
        let key = ProductKey::new(standardized_name, standardized_unit);
        Ok(self.state.lock().await.products.get(&key).cloned())
    }

    async fn upsert_product(&self, upsert: &ProductUpsert) -> Result<Product> {
        let mut state = self.state.lock().await;
        if state.failing_products.contains(&upsert.standardized_name) {
            anyhow::bail!("Failed to upsert product '{}'", upsert.standardized_name);
        }

        let key = ProductKey::new(&upsert.standardized_name, &upsert.standardized_unit);
        let now = Utc::now();
        let product = state.products.entry(key).or_insert_with(|| Product {
            id: Uuid::new_v4(),
            standardized_name: upsert.standardized_name.clone(),
            standardized_unit: upsert.standardized_unit.clone(),
            display_name: upsert.display_name.clone(),
            raw_name: upsert.raw_name.clone(),
            category: upsert.category.clone(),
            unit_variants: Vec::new(),
            created_at: now,
            updated_at: now,
        });

        product.display_name = upsert.display_name.clone();
        product.raw_name = upsert.raw_name.clone();
        if upsert.category.is_some() {
            product.category = upsert.category.clone();
        }
        if !product.unit_variants.contains(&upsert.unit_variant) {
            product.unit_variants.push(upsert.unit_variant.clone());
        }
        product.updated_at = now;

        Ok(product.clone())
    }

    async fn known_product_names(&self, category: Option<&str>) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        state.name_lookups += 1;
        if state.failing_name_lookups {
            anyhow::bail!("Failed to load product names for {:?}", category);
        }
        let mut names: Vec<String> = state
            .products
            .values()
            .filter(|p| match category {
                Some(category) => p
                    .category
                    .as_deref()
                    .map_or(false, |c| c.eq_ignore_ascii_case(category)),
                None => true,
            })
            .map(|p| p.standardized_name.clone())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn find_active_prices(&self, product_id: Uuid, supplier_id: Uuid) -> Result<Vec<Price>> {
        Ok(self.state.lock().await.ledger.active_prices(product_id, supplier_id))
    }

    async fn record_price(&self, observation: &PriceObservation) -> Result<PriceTransition> {
        let mut state = self.state.lock().await;
        Ok(state.ledger.observe(observation, Utc::now()))
    }

    async fn price_history(&self, product_id: Uuid, supplier_id: Uuid) -> Result<Vec<PriceHistory>> {
        Ok(self.state.lock().await.ledger.history_for(product_id, supplier_id))
    }

    async fn create_upload(&self, upload: &UploadRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.uploads.contains_key(&upload.id) {
            return Err(StoreError::UniqueViolation {
                entity: "upload",
                key: upload.id.to_string(),
            }
            .into());
        }
        state.uploads.insert(upload.id, upload.clone());
        Ok(())
    }

    async fn get_upload(&self, upload_id: Uuid) -> Result<Option<UploadRecord>> {
        Ok(self.state.lock().await.uploads.get(&upload_id).cloned())
    }

    async fn update_upload_status(
        &self,
        upload_id: Uuid,
        status: RunStatus,
        metrics: Option<&UploadMetrics>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let upload = state
            .uploads
            .get_mut(&upload_id)
            .ok_or(StoreError::UploadNotFound(upload_id))?;

        upload.status = status;
        if let Some(metrics) = metrics {
            upload.metrics = Some(metrics.clone());
        }
        upload.updated_at = Utc::now();
        Ok(())
    }

    async fn set_upload_supplier(&self, upload_id: Uuid, supplier_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        let upload = state
            .uploads
            .get_mut(&upload_id)
            .ok_or(StoreError::UploadNotFound(upload_id))?;
        upload.supplier_id = Some(supplier_id);
        Ok(())
    }

    async fn stage_groups(&self, upload_id: Uuid, groups: &[ConsolidatedProductGroup]) -> Result<()> {
        let mut state = self.state.lock().await;
        let upload = state
            .uploads
            .get_mut(&upload_id)
            .ok_or(StoreError::UploadNotFound(upload_id))?;
        upload.staged_groups = Some(groups.to_vec());
        Ok(())
    }

    async fn take_staged_groups(&self, upload_id: Uuid) -> Result<Option<Vec<ConsolidatedProductGroup>>> {
        let mut state = self.state.lock().await;
        let upload = state
            .uploads
            .get_mut(&upload_id)
            .ok_or(StoreError::UploadNotFound(upload_id))?;
        Ok(upload.staged_groups.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{is_conflict, resolve_supplier};

    fn upsert(name: &str, unit: &str) -> ProductUpsert {
        ProductUpsert {
            standardized_name: name.to_string(),
            standardized_unit: unit.to_string(),
            display_name: pricebook_models::display_name(name),
            raw_name: name.to_string(),
            category: None,
            unit_variant: unit.to_string(),
        }
    }

    #[tokio::test]
    async fn test_resolve_supplier_matches_case_insensitively() {
        let store = InMemoryStore::new();
        let first = resolve_supplier(&store, "PT Sumber Segar").await.unwrap();
        let second = resolve_supplier(&store, "sumber segar").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.suppliers().await.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_supplier_recovers_from_race() {
        let store = InMemoryStore::new();
        store.simulate_supplier_race().await;

        let supplier = resolve_supplier(&store, "Tani Makmur").await.unwrap();
        assert_eq!(supplier.normalized_name, "tani makmur");
        assert_eq!(store.suppliers().await.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_supplier_is_conflict() {
        let store = InMemoryStore::new();
        store.create_supplier(&Supplier::new("Acme")).await.unwrap();
        let err = store.create_supplier(&Supplier::new("ACME")).await.unwrap_err();
        assert!(is_conflict(&err));
    }

    #[tokio::test]
    async fn test_upsert_keeps_identity_and_collects_unit_variants() {
        let store = InMemoryStore::new();
        let first = store.upsert_product(&upsert("tomato", "kg")).await.unwrap();

        let mut again = upsert("tomato", "kg");
        again.unit_variant = "kilo".to_string();
        let second = store.upsert_product(&again).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.unit_variants, vec!["kg".to_string(), "kilo".to_string()]);
        assert_eq!(store.products().await.len(), 1);
    }

    #[tokio::test]
    async fn test_versioning_keeps_one_active_price() {
        let store = InMemoryStore::new();
        let product = store.upsert_product(&upsert("onion", "kg")).await.unwrap();
        let supplier = store.create_supplier(&Supplier::new("Acme")).await.unwrap();

        for amount in [3000.0, 3200.0, 3200.0, 2900.0] {
            store
                .record_price(&PriceObservation {
                    product_id: product.id,
                    supplier_id: supplier.id,
                    upload_id: None,
                    amount,
                    unit: "kg".to_string(),
                })
                .await
                .unwrap();
        }

        let active = store.find_active_prices(product.id, supplier.id).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].amount, 2900.0);
        // three distinct observations, the repeated 3200 was suppressed
        assert_eq!(store.price_history(product.id, supplier.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_staged_groups_are_taken_once() {
        let store = InMemoryStore::new();
        let upload = UploadRecord::new("https://files.test/list.csv", "list.csv");
        store.create_upload(&upload).await.unwrap();

        store.stage_groups(upload.id, &[]).await.unwrap();
        assert_eq!(store.take_staged_groups(upload.id).await.unwrap(), Some(Vec::new()));
        assert_eq!(store.take_staged_groups(upload.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_status_update_on_unknown_upload_fails() {
        let store = InMemoryStore::new();
        let result = store
            .update_upload_status(Uuid::new_v4(), RunStatus::Completed, None)
            .await;
        assert!(result.is_err());
    }
}
