//! Supplier Repository
//!
//! Lookup and creation of suppliers by normalized name.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use pricebook_models::{normalize_supplier_name, Supplier};

pub struct SupplierRepository {
    pool: PgPool,
}

impl SupplierRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find supplier by ID
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Supplier>> {
        sqlx::query_as::<_, Supplier>(
            r#"
            SELECT id, name, normalized_name, created_at, updated_at
            FROM suppliers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch supplier by ID")
    }

    /// Case-insensitive match on the normalized supplier name.
    pub async fn find_by_name(&self, name: &str) -> Result<Option<Supplier>> {
        let normalized = normalize_supplier_name(name);

        sqlx::query_as::<_, Supplier>(
            r#"
            SELECT id, name, normalized_name, created_at, updated_at
            FROM suppliers
            WHERE normalized_name = $1
            "#,
        )
        .bind(&normalized)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch supplier by name")
    }

    /// Insert a supplier. Fails with a unique violation when the normalized name exists.
    pub async fn create(&self, supplier: &Supplier) -> Result<Supplier> {
        sqlx::query_as::<_, Supplier>(
            r#"
            INSERT INTO suppliers (id, name, normalized_name, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, name, normalized_name, created_at, updated_at
            "#,
        )
        .bind(supplier.id)
        .bind(&supplier.name)
        .bind(&supplier.normalized_name)
        .bind(supplier.created_at)
        .bind(supplier.updated_at)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create supplier")
    }
}
