//! Price Versioning Manager
//!
//! Commits consolidated groups: upserts each product, then versions the supplier's price for it
//! through the store. A failure on one product is recorded and the rest of the batch continues.

use anyhow::Context;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use pricebook_database::PriceStore;
use pricebook_models::{
    ConsolidatedProductGroup, PriceObservation, PriceTransition, ProcessingStep, ProductUpsert, RunError,
};

use crate::context::RunContext;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CommitReport {
    /// Groups committed, whether their price changed or not.
    pub saved: usize,
    /// Committed groups whose active price already matched.
    pub unchanged: usize,
    pub errors: Vec<RunError>,
    /// Set when the run was cancelled part-way through the batch.
    pub cancelled: bool,
}

pub struct PriceVersioningManager {
    store: Arc<dyn PriceStore>,
}

impl PriceVersioningManager {
    pub fn new(store: Arc<dyn PriceStore>) -> Self {
        Self { store }
    }

    pub async fn commit(
        &self,
        groups: &[ConsolidatedProductGroup],
        supplier_id: Uuid,
        upload_id: Option<Uuid>,
        ctx: &RunContext,
    ) -> CommitReport {
        let mut report = CommitReport::default();
        let total = groups.len().max(1);

        for (index, group) in groups.iter().enumerate() {
            if ctx.is_cancelled() {
                tracing::warn!(upload_id = %ctx.upload_id, committed = index, "Cancelled during save");
                report.cancelled = true;
                break;
            }

            match self.commit_group(group, supplier_id, upload_id).await {
                Ok(transition) => {
                    report.saved += 1;
                    if transition.is_unchanged() {
                        report.unchanged += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        upload_id = %ctx.upload_id,
                        product = %group.key,
                        error = %e,
                        "Failed to persist product price"
                    );
                    report
                        .errors
                        .push(RunError::persistence(format!("{:#}", e)).at(&group.key));
                }
            }

            ctx.report(
                ProcessingStep::Saving,
                (index + 1) as f64 / total as f64,
                Some(json!({ "saved": report.saved, "total": groups.len() })),
            )
            .await;
        }

        tracing::info!(
            upload_id = %ctx.upload_id,
            saved = report.saved,
            unchanged = report.unchanged,
            failed = report.errors.len(),
            "Price commit finished"
        );
        report
    }

    async fn commit_group(
        &self,
        group: &ConsolidatedProductGroup,
        supplier_id: Uuid,
        upload_id: Option<Uuid>,
    ) -> anyhow::Result<PriceTransition> {
        let product = self
            .store
            .upsert_product(&ProductUpsert::from(group))
            .await
            .with_context(|| format!("upsert of product {}", group.key))?;

        let observation = PriceObservation {
            product_id: product.id,
            supplier_id,
            upload_id,
            amount: group.price(),
            unit: group.key.standardized_unit.clone(),
        };

        let transition = self
            .store
            .record_price(&observation)
            .await
            .with_context(|| format!("price version for {}", group.key))?;

        match &transition {
            PriceTransition::Unchanged { .. } => {
                tracing::debug!(product = %group.key, amount = observation.amount, "Price unchanged, nothing written");
            }
            PriceTransition::Changed { deactivate, .. } => {
                tracing::debug!(
                    product = %group.key,
                    amount = observation.amount,
                    replaced = deactivate.len(),
                    "Price versioned"
                );
            }
        }
        Ok(transition)
    }
}
