//! Product Repository
//!
//! Canonical products keyed by `(standardized_name, standardized_unit)`.

use anyhow::{Context, Result};
use sqlx::PgPool;

use pricebook_models::{Product, ProductUpsert};

const PRODUCT_COLUMNS: &str = "id, standardized_name, standardized_unit, display_name, raw_name, \
                               category, unit_variants, created_at, updated_at";

pub struct ProductRepository {
    pool: PgPool,
}

impl ProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_key(&self, standardized_name: &str, standardized_unit: &str) -> Result<Option<Product>> {
        let sql = format!(
            "SELECT {} FROM products WHERE standardized_name = $1 AND standardized_unit = $2",
            PRODUCT_COLUMNS
        );

        sqlx::query_as::<_, Product>(&sql)
            .bind(standardized_name)
            .bind(standardized_unit)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch product by key")
    }

    /// Create on first sighting; refresh display fields and record the unit variant otherwise.
    pub async fn upsert(&self, product: &ProductUpsert) -> Result<Product> {
        let sql = format!(
            r#"
            INSERT INTO products
                (id, standardized_name, standardized_unit, display_name, raw_name, category,
                 unit_variants, created_at, updated_at)
            VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, ARRAY[$6]::TEXT[], NOW(), NOW())
            ON CONFLICT (standardized_name, standardized_unit) DO UPDATE SET
                display_name = EXCLUDED.display_name,
                raw_name = EXCLUDED.raw_name,
                category = COALESCE(EXCLUDED.category, products.category),
                unit_variants = CASE
                    WHEN $6 = ANY(products.unit_variants) THEN products.unit_variants
                    ELSE array_append(products.unit_variants, $6)
                END,
                updated_at = NOW()
            RETURNING {}
            "#,
            PRODUCT_COLUMNS
        );

        sqlx::query_as::<_, Product>(&sql)
            .bind(&product.standardized_name)
            .bind(&product.standardized_unit)
            .bind(&product.display_name)
            .bind(&product.raw_name)
            .bind(&product.category)
            .bind(&product.unit_variant)
            .fetch_one(&self.pool)
            .await
            .context("Failed to upsert product")
    }

    /// Canonical names already in the catalogue, optionally limited to one category.
    pub async fn standardized_names(&self, category: Option<&str>) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = match category {
            Some(category) => {
                sqlx::query_as(
                    "SELECT DISTINCT standardized_name FROM products WHERE LOWER(category) = LOWER($1)",
                )
                .bind(category)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as("SELECT DISTINCT standardized_name FROM products")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .context("Failed to list product names")?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }
}
