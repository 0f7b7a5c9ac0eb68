//! Price Repository
//!
//! Active prices and the append-only price history. The write helpers take a connection so
//! the store can run them inside one transaction.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use pricebook_models::{ChangeReason, Price, PriceHistory};

const PRICE_COLUMNS: &str = "id, product_id, supplier_id, upload_id, amount, unit, valid_from, valid_to";

/// Database row for `price_history`; the reason is stored as text.
#[derive(Debug, FromRow)]
struct PriceHistoryRow {
    id: Uuid,
    product_id: Uuid,
    supplier_id: Uuid,
    upload_id: Option<Uuid>,
    price: f64,
    unit: String,
    changed_from: Option<f64>,
    change_percentage: Option<f64>,
    change_reason: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<PriceHistoryRow> for PriceHistory {
    type Error = anyhow::Error;

    fn try_from(row: PriceHistoryRow) -> Result<Self> {
        let change_reason = ChangeReason::parse(&row.change_reason)
            .ok_or_else(|| anyhow!("Unknown change reason '{}'", row.change_reason))?;

        Ok(Self {
            id: row.id,
            product_id: row.product_id,
            supplier_id: row.supplier_id,
            upload_id: row.upload_id,
            price: row.price,
            unit: row.unit,
            changed_from: row.changed_from,
            change_percentage: row.change_percentage,
            change_reason,
            created_at: row.created_at,
        })
    }
}

pub struct PriceRepository {
    pool: PgPool,
}

impl PriceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_active(&self, product_id: Uuid, supplier_id: Uuid) -> Result<Vec<Price>> {
        let sql = format!(
            "SELECT {} FROM prices WHERE product_id = $1 AND supplier_id = $2 AND valid_to IS NULL",
            PRICE_COLUMNS
        );

        sqlx::query_as::<_, Price>(&sql)
            .bind(product_id)
            .bind(supplier_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch active prices")
    }

    /// Active prices of the pair, row-locked until the surrounding transaction ends.
    pub async fn lock_active(conn: &mut PgConnection, product_id: Uuid, supplier_id: Uuid) -> Result<Vec<Price>> {
        let sql = format!(
            "SELECT {} FROM prices WHERE product_id = $1 AND supplier_id = $2 AND valid_to IS NULL FOR UPDATE",
            PRICE_COLUMNS
        );

        sqlx::query_as::<_, Price>(&sql)
            .bind(product_id)
            .bind(supplier_id)
            .fetch_all(conn)
            .await
            .context("Failed to lock active prices")
    }

    pub async fn deactivate(conn: &mut PgConnection, price_id: Uuid, until: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE prices SET valid_to = $2 WHERE id = $1 AND valid_to IS NULL")
            .bind(price_id)
            .bind(until)
            .execute(conn)
            .await
            .context("Failed to deactivate price")?;
        Ok(())
    }

    pub async fn insert(conn: &mut PgConnection, price: &Price) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO prices (id, product_id, supplier_id, upload_id, amount, unit, valid_from, valid_to)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(price.id)
        .bind(price.product_id)
        .bind(price.supplier_id)
        .bind(price.upload_id)
        .bind(price.amount)
        .bind(&price.unit)
        .bind(price.valid_from)
        .bind(price.valid_to)
        .execute(conn)
        .await
        .context("Failed to insert price")?;
        Ok(())
    }

    pub async fn insert_history(conn: &mut PgConnection, entry: &PriceHistory) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO price_history
                (id, product_id, supplier_id, upload_id, price, unit, changed_from,
                 change_percentage, change_reason, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id)
        .bind(entry.product_id)
        .bind(entry.supplier_id)
        .bind(entry.upload_id)
        .bind(entry.price)
        .bind(&entry.unit)
        .bind(entry.changed_from)
        .bind(entry.change_percentage)
        .bind(entry.change_reason.as_str())
        .bind(entry.created_at)
        .execute(conn)
        .await
        .context("Failed to insert price history")?;
        Ok(())
    }

    /// History of the pair in chronological order.
    pub async fn history(&self, product_id: Uuid, supplier_id: Uuid) -> Result<Vec<PriceHistory>> {
        let rows: Vec<PriceHistoryRow> = sqlx::query_as(
            r#"
            SELECT id, product_id, supplier_id, upload_id, price, unit, changed_from,
                   change_percentage, change_reason, created_at
            FROM price_history
            WHERE product_id = $1 AND supplier_id = $2
            ORDER BY created_at, id
            "#,
        )
        .bind(product_id)
        .bind(supplier_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch price history")?;

        rows.into_iter().map(PriceHistory::try_from).collect()
    }
}
