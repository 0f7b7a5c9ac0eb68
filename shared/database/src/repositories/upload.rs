//! Upload Repository
//!
//! Upload rows carry the run status, the metrics JSON and, while awaiting review, the staged
//! consolidated groups.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use pricebook_models::{ConsolidatedProductGroup, RunStatus, UploadMetrics, UploadRecord};

#[derive(Debug, FromRow)]
struct UploadRow {
    id: Uuid,
    file_url: String,
    file_name: String,
    mime_type: Option<String>,
    supplier_hint: Option<String>,
    supplier_id: Option<Uuid>,
    status: String,
    metrics: Option<serde_json::Value>,
    staged_groups: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UploadRow> for UploadRecord {
    type Error = anyhow::Error;

    fn try_from(row: UploadRow) -> Result<Self> {
        let status = RunStatus::parse(&row.status).ok_or_else(|| anyhow!("Unknown upload status '{}'", row.status))?;
        let metrics = row
            .metrics
            .map(serde_json::from_value::<UploadMetrics>)
            .transpose()
            .context("Malformed upload metrics")?;
        let staged_groups = row
            .staged_groups
            .map(serde_json::from_value::<Vec<ConsolidatedProductGroup>>)
            .transpose()
            .context("Malformed staged groups")?;

        Ok(Self {
            id: row.id,
            file_url: row.file_url,
            file_name: row.file_name,
            mime_type: row.mime_type,
            supplier_hint: row.supplier_hint,
            supplier_id: row.supplier_id,
            status,
            metrics,
            staged_groups,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub struct UploadRepository {
    pool: PgPool,
}

impl UploadRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<UploadRecord>> {
        let row: Option<UploadRow> = sqlx::query_as(
            r#"
            SELECT id, file_url, file_name, mime_type, supplier_hint, supplier_id, status,
                   metrics, staged_groups, created_at, updated_at
            FROM uploads
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch upload")?;

        row.map(UploadRecord::try_from).transpose()
    }

    pub async fn create(&self, upload: &UploadRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO uploads
                (id, file_url, file_name, mime_type, supplier_hint, supplier_id, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(upload.id)
        .bind(&upload.file_url)
        .bind(&upload.file_name)
        .bind(&upload.mime_type)
        .bind(&upload.supplier_hint)
        .bind(upload.supplier_id)
        .bind(upload.status.as_str())
        .bind(upload.created_at)
        .bind(upload.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to create upload")?;
        Ok(())
    }

    /// Set the status and, when given, replace the metrics.
    pub async fn update_status(&self, id: Uuid, status: RunStatus, metrics: Option<&UploadMetrics>) -> Result<()> {
        let metrics = metrics.map(serde_json::to_value).transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE uploads SET
                status = $2,
                metrics = COALESCE($3, metrics),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(metrics)
        .execute(&self.pool)
        .await
        .context("Failed to update upload status")?;

        if result.rows_affected() == 0 {
            return Err(anyhow!("Upload {} not found", id));
        }
        Ok(())
    }

    pub async fn set_supplier(&self, id: Uuid, supplier_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE uploads SET supplier_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(supplier_id)
            .execute(&self.pool)
            .await
            .context("Failed to set upload supplier")?;
        Ok(())
    }

    pub async fn stage_groups(&self, id: Uuid, groups: &[ConsolidatedProductGroup]) -> Result<()> {
        let staged = serde_json::to_value(groups)?;

        sqlx::query("UPDATE uploads SET staged_groups = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(staged)
            .execute(&self.pool)
            .await
            .context("Failed to stage consolidated groups")?;
        Ok(())
    }

    /// Return and clear the staged groups in one statement.
    pub async fn take_staged_groups(&self, id: Uuid) -> Result<Option<Vec<ConsolidatedProductGroup>>> {
        let row: Option<(Option<serde_json::Value>,)> = sqlx::query_as(
            r#"
            UPDATE uploads u SET staged_groups = NULL, updated_at = NOW()
            FROM (SELECT id, staged_groups FROM uploads WHERE id = $1 FOR UPDATE) prev
            WHERE u.id = prev.id
            RETURNING prev.staged_groups
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to take staged groups")?;

        match row.and_then(|(staged,)| staged) {
            Some(value) => Ok(Some(serde_json::from_value(value).context("Malformed staged groups")?)),
            None => Ok(None),
        }
    }
}
