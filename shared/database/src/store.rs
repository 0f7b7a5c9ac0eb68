//! Price Store
//!
//! The storage contract the ingestion pipeline depends on, and its PostgreSQL implementation.
//! Price versioning runs inside one transaction that locks the pair's active rows, so the
//! "one active price per (product, supplier)" rule holds under concurrent uploads.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use pricebook_models::{
    plan_price_transition, ConsolidatedProductGroup, Price, PriceHistory, PriceObservation, PriceTransition,
    Product, ProductUpsert, RunStatus, Supplier, UploadMetrics, UploadRecord,
};

use crate::postgres::{is_unique_violation, PostgresPool};
use crate::repositories::{PriceRepository, ProductRepository, SupplierRepository, UploadRepository};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Duplicate {entity}: {key}")]
    UniqueViolation { entity: &'static str, key: String },

    #[error("Upload {0} not found")]
    UploadNotFound(Uuid),
}

/// True when the error is a unique-key conflict from either store implementation.
pub fn is_conflict(error: &anyhow::Error) -> bool {
    is_unique_violation(error)
        || error
            .chain()
            .any(|cause| matches!(cause.downcast_ref::<StoreError>(), Some(StoreError::UniqueViolation { .. })))
}

#[async_trait]
pub trait PriceStore: Send + Sync {
    async fn find_supplier_by_name(&self, name: &str) -> Result<Option<Supplier>>;

    /// Insert a supplier. A duplicate normalized name is an error for which
    /// [`is_unique_violation`] holds.
    async fn create_supplier(&self, supplier: &Supplier) -> Result<Supplier>;

    async fn find_product(&self, standardized_name: &str, standardized_unit: &str) -> Result<Option<Product>>;

    /// Create the product on first sighting or refresh its display fields.
    async fn upsert_product(&self, product: &ProductUpsert) -> Result<Product>;

    /// Canonical names already known, used to seed the similarity index.
    async fn known_product_names(&self, category: Option<&str>) -> Result<Vec<String>>;

    async fn find_active_prices(&self, product_id: Uuid, supplier_id: Uuid) -> Result<Vec<Price>>;

    /// Version a new observation atomically: read the active prices, deactivate them, append
    /// history and insert the new active price, or do nothing when the price is unchanged.
    async fn record_price(&self, observation: &PriceObservation) -> Result<PriceTransition>;

    async fn price_history(&self, product_id: Uuid, supplier_id: Uuid) -> Result<Vec<PriceHistory>>;

    async fn create_upload(&self, upload: &UploadRecord) -> Result<()>;

    async fn get_upload(&self, upload_id: Uuid) -> Result<Option<UploadRecord>>;

    async fn update_upload_status(
        &self,
        upload_id: Uuid,
        status: RunStatus,
        metrics: Option<&UploadMetrics>,
    ) -> Result<()>;

    async fn set_upload_supplier(&self, upload_id: Uuid, supplier_id: Uuid) -> Result<()>;

    async fn stage_groups(&self, upload_id: Uuid, groups: &[ConsolidatedProductGroup]) -> Result<()>;

    /// Remove and return the groups staged for review.
    async fn take_staged_groups(&self, upload_id: Uuid) -> Result<Option<Vec<ConsolidatedProductGroup>>>;
}

pub struct PostgresPriceStore {
    pool: PostgresPool,
    suppliers: SupplierRepository,
    products: ProductRepository,
    prices: PriceRepository,
    uploads: UploadRepository,
}

impl PostgresPriceStore {
    pub fn new(pool: PostgresPool) -> Self {
        Self {
            suppliers: SupplierRepository::new(pool.clone()),
            products: ProductRepository::new(pool.clone()),
            prices: PriceRepository::new(pool.clone()),
            uploads: UploadRepository::new(pool.clone()),
            pool,
        }
    }
}

#[async_trait]
impl PriceStore for PostgresPriceStore {
    async fn find_supplier_by_name(&self, name: &str) -> Result<Option<Supplier>> {
        self.suppliers.find_by_name(name).await
    }

    async fn create_supplier(&self, supplier: &Supplier) -> Result<Supplier> {
        self.suppliers.create(supplier).await
    }

    async fn find_product(&self, standardized_name: &str, standardized_unit: &str) -> Result<Option<Product>> {
        self.products.find_by_key(standardized_name, standardized_unit).await
    }

    async fn upsert_product(&self, product: &ProductUpsert) -> Result<Product> {
        match self.products.upsert(product).await {
            Ok(product) => Ok(product),
            Err(e) if is_conflict(&e) => {
                tracing::warn!(
                    product = %product.standardized_name,
                    "Product upsert raced with a concurrent insert, reading existing row"
                );
                self.products
                    .find_by_key(&product.standardized_name, &product.standardized_unit)
                    .await?
                    .context("Product vanished after unique violation")
            }
            Err(e) => Err(e),
        }
    }

    async fn known_product_names(&self, category: Option<&str>) -> Result<Vec<String>> {
        self.products.standardized_names(category).await
    }

    async fn find_active_prices(&self, product_id: Uuid, supplier_id: Uuid) -> Result<Vec<Price>> {
        self.prices.find_active(product_id, supplier_id).await
    }

    async fn record_price(&self, observation: &PriceObservation) -> Result<PriceTransition> {
        let mut tx = self.pool.begin().await.context("Failed to begin price transaction")?;
        let now = Utc::now();

        let active = PriceRepository::lock_active(&mut *tx, observation.product_id, observation.supplier_id).await?;
        let transition = plan_price_transition(&active, observation, now);

        if let PriceTransition::Changed {
            deactivate,
            history,
            insert,
        } = &transition
        {
            // history first so the entry carries the amounts being replaced
            for entry in history {
                PriceRepository::insert_history(&mut *tx, entry).await?;
            }
            for price_id in deactivate {
                PriceRepository::deactivate(&mut *tx, *price_id, now).await?;
            }
            PriceRepository::insert(&mut *tx, insert).await?;
        }

        tx.commit().await.context("Failed to commit price transaction")?;
        Ok(transition)
    }

    async fn price_history(&self, product_id: Uuid, supplier_id: Uuid) -> Result<Vec<PriceHistory>> {
        self.prices.history(product_id, supplier_id).await
    }

    async fn create_upload(&self, upload: &UploadRecord) -> Result<()> {
        self.uploads.create(upload).await
    }

    async fn get_upload(&self, upload_id: Uuid) -> Result<Option<UploadRecord>> {
        self.uploads.find_by_id(upload_id).await
    }

    async fn update_upload_status(
        &self,
        upload_id: Uuid,
        status: RunStatus,
        metrics: Option<&UploadMetrics>,
    ) -> Result<()> {
        self.uploads.update_status(upload_id, status, metrics).await
    }

    async fn set_upload_supplier(&self, upload_id: Uuid, supplier_id: Uuid) -> Result<()> {
        self.uploads.set_supplier(upload_id, supplier_id).await
    }

    async fn stage_groups(&self, upload_id: Uuid, groups: &[ConsolidatedProductGroup]) -> Result<()> {
        self.uploads.stage_groups(upload_id, groups).await
    }

    async fn take_staged_groups(&self, upload_id: Uuid) -> Result<Option<Vec<ConsolidatedProductGroup>>> {
        self.uploads.take_staged_groups(upload_id).await
    }
}

/// Find the supplier by name or create it. A concurrent creator winning the race is resolved by
/// reading its row back.
pub async fn resolve_supplier(store: &dyn PriceStore, name: &str) -> Result<Supplier> {
    if name.trim().is_empty() {
        return Err(anyhow!("Supplier name is empty"));
    }

    if let Some(existing) = store.find_supplier_by_name(name).await? {
        return Ok(existing);
    }

    let candidate = Supplier::new(name);
    match store.create_supplier(&candidate).await {
        Ok(created) => {
            tracing::info!(supplier = %created.name, supplier_id = %created.id, "Created supplier");
            Ok(created)
        }
        Err(e) if is_conflict(&e) => {
            tracing::warn!(supplier = %name, "Supplier created concurrently, using existing row");
            store
                .find_supplier_by_name(name)
                .await?
                .with_context(|| format!("Supplier '{}' missing after conflict", name))
        }
        Err(e) => Err(e),
    }
}
