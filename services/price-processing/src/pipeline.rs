//! The `process_file` pipeline.
//!
//! One run per upload: fetch, route, extract, validate, standardize, consolidate, then either
//! stage the groups for review or commit them through the versioning manager. Cancellation is
//! observed between stages. Per-record and per-unit failures land in the upload's error list and
//! the final status is derived from what was saved.

use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use pricebook_database::{resolve_supplier, PriceStore, ProgressStore};
use pricebook_models::{
    derive_run_status, ConsolidatedProductGroup, ProcessingStep, RunError, RunStatus, UploadMetrics, UploadProgress,
    UploadRecord,
};
use pricebook_utils::{
    validate_file_size, AppConfig, ModelPricing, PipelineConfig, PriceValidator, PricebookError, PricebookResult,
};

use crate::ai_client::AiClient;
use crate::blob::{BlobFetcher, FetchError};
use crate::consolidator::ProductConsolidator;
use crate::context::RunContext;
use crate::cost::{CostMonitor, CostSummary, UsageTotals};
use crate::extract::{TabularDocumentExtractor, VisionDocumentExtractor};
use crate::fallback::LlmFallbackEngine;
use crate::gateway::AiGateway;
use crate::progress::ProgressTracker;
use crate::rasterizer::PageRasterizer;
use crate::retry::{QuotaCooldown, RetryPolicy};
use crate::router::{Document, DocumentKind, ExtractorRouter};
use crate::standardizer::ProductStandardizer;
use crate::versioning::PriceVersioningManager;
use crate::vision::VisionExtractor;

/// Collaborators the pipeline is built from.
pub struct PipelineServices {
    pub store: Arc<dyn PriceStore>,
    pub progress_store: Arc<dyn ProgressStore>,
    pub ai: Arc<dyn AiClient>,
    pub rasterizer: Arc<dyn PageRasterizer>,
    pub fetcher: Arc<dyn BlobFetcher>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub upload_id: Uuid,
    pub status: RunStatus,
    pub metrics: UploadMetrics,
}

pub struct PricePipeline {
    store: Arc<dyn PriceStore>,
    progress: Arc<ProgressTracker>,
    fetcher: Arc<dyn BlobFetcher>,
    router: ExtractorRouter,
    validator: PriceValidator,
    standardizer: ProductStandardizer,
    consolidator: ProductConsolidator,
    versioning: PriceVersioningManager,
    config: PipelineConfig,
    pricing: HashMap<String, ModelPricing>,
    budget_usd: Option<f64>,
    running: Mutex<HashMap<Uuid, (CancellationToken, Arc<CostMonitor>)>>,
}

impl PricePipeline {
    pub fn new(config: &AppConfig, services: PipelineServices) -> Self {
        let cooldown = Arc::new(QuotaCooldown::new(Duration::from_secs(config.retry.quota_cooldown_seconds)));
        let gateway = Arc::new(AiGateway::new(services.ai, RetryPolicy::from(&config.retry), cooldown));
        let expand = config.pipeline.expand_price_shorthand;

        let fallback = Arc::new(LlmFallbackEngine::new(
            gateway.clone(),
            &config.ai.text_model,
            config.extraction.fallback_sample_rows,
            config.extraction.fallback_merge_mode,
            expand,
        ));
        let vision = VisionExtractor::new(
            gateway.clone(),
            services.rasterizer,
            config.extraction.clone(),
            &config.ai.vision_model,
            expand,
        );
        let router = ExtractorRouter::new(
            Arc::new(TabularDocumentExtractor::new(config.extraction.clone(), expand, fallback.clone())),
            Arc::new(VisionDocumentExtractor::new(vision, fallback, config.extraction.product_floor)),
        );

        Self {
            progress: Arc::new(ProgressTracker::new(
                services.progress_store,
                Duration::from_secs(config.progress.retention_seconds),
            )),
            fetcher: services.fetcher,
            router,
            validator: PriceValidator::new(config.price_rules.clone()),
            standardizer: ProductStandardizer::new(
                gateway,
                services.store.clone(),
                config.standardization.clone(),
                &config.ai.text_model,
            ),
            consolidator: ProductConsolidator::new(),
            versioning: PriceVersioningManager::new(services.store.clone()),
            store: services.store,
            config: config.pipeline.clone(),
            pricing: config.ai.pricing.clone(),
            budget_usd: config.ai.budget_usd,
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    pub async fn get_progress(&self, upload_id: Uuid) -> Option<UploadProgress> {
        self.progress.get(upload_id).await
    }

    /// Process an upload end to end.
    ///
    /// Document-level problems (unsupported type, too large, unreadable) end the run with a
    /// report. Store failures and cancellation are returned as errors after the upload has been
    /// marked failed.
    pub async fn process_file(&self, upload_id: Uuid) -> PricebookResult<RunReport> {
        let upload = self.load_upload(upload_id).await?;
        if upload.status == RunStatus::PendingReview {
            return Err(PricebookError::conflict(format!("upload {} is awaiting review", upload_id)));
        }

        let ctx = self.register(upload_id).await?;
        tracing::info!(upload_id = %upload_id, file = %upload.file_name, "Processing upload");

        self.progress.start(upload_id).await;
        let mut metrics = UploadMetrics::default();
        let outcome = match self.store.update_upload_status(upload_id, RunStatus::Processing, None).await {
            Ok(()) => self.run(&upload, &ctx, &mut metrics).await,
            Err(e) => Err(PricebookError::store(e)),
        };

        self.running.lock().await.remove(&upload_id);
        record_cost(&mut metrics, &ctx.cost.summary().total);

        let status = match &outcome {
            Ok(status) => *status,
            Err(PricebookError::TooLarge { .. }) => RunStatus::TooLarge,
            Err(_) => RunStatus::Failed,
        };

        if let Err(e) = &outcome {
            tracing::warn!(upload_id = %upload_id, error = %e, status = %status, "Upload run ended early");
            match e {
                PricebookError::UnsupportedDocument { .. } | PricebookError::DocumentProcessing { .. } => {
                    metrics.push_error(RunError::structural(e.to_string()));
                }
                PricebookError::ExternalService { .. } => {
                    metrics.push_error(RunError::external_service(e.to_string()));
                }
                _ => {}
            }
        }

        self.finish(upload_id, status, &metrics).await?;

        match outcome {
            Err(
                e @ (PricebookError::Cancelled { .. }
                | PricebookError::Database { .. }
                | PricebookError::Internal { .. }),
            ) => Err(e),
            _ => Ok(RunReport {
                upload_id,
                status,
                metrics,
            }),
        }
    }

    async fn run(&self, upload: &UploadRecord, ctx: &RunContext, metrics: &mut UploadMetrics) -> PricebookResult<RunStatus> {
        let kind = DocumentKind::detect(upload.mime_type.as_deref(), &upload.file_name).ok_or_else(|| {
            PricebookError::unsupported_document(format!(
                "cannot route '{}' ({})",
                upload.file_name,
                upload.mime_type.as_deref().unwrap_or("no mime type")
            ))
        })?;

        ctx.report(ProcessingStep::Uploading, 0.0, Some(json!({ "kind": kind.as_str() }))).await;
        let limit = kind.size_limit(&self.config);
        let data = self.fetcher.fetch(&upload.file_url, limit).await.map_err(|e| match e {
            FetchError::TooLarge { size, limit } => PricebookError::too_large(size, limit),
            other => PricebookError::external_service("blob", other.to_string()),
        })?;
        validate_file_size(data.len() as u64, limit)?;

        let fingerprint = hex::encode(Sha256::digest(&data));
        tracing::info!(upload_id = %ctx.upload_id, bytes = data.len(), sha256 = %fingerprint, "Fetched document");
        metrics.content_sha256 = Some(fingerprint);
        ctx.report(ProcessingStep::Uploading, 1.0, Some(json!({ "bytes": data.len() }))).await;
        checkpoint(ctx)?;

        let document = Document {
            file_name: upload.file_name.clone(),
            kind,
            data,
        };
        let extraction = self
            .router
            .route(kind)
            .extract(&document, ctx)
            .await
            .map_err(|e| PricebookError::document_processing(format!("{:#}", e)))?;

        metrics.extraction_method = Some(extraction.method.clone());
        metrics.detected_rows = extraction.completeness.detected;
        metrics.processed_rows = extraction.completeness.processed;
        metrics.completeness = extraction.completeness.ratio();
        metrics.fallback_used = extraction.fallback_used;
        metrics.skipped_sheets = extraction.skipped_sheets;
        metrics.skipped_pages = extraction.skipped_pages;
        metrics.extracted_products = extraction.records.len();
        metrics.errors.extend(extraction.errors);
        checkpoint(ctx)?;

        let report = self
            .validator
            .validate_all(extraction.records, self.config.apply_price_corrections);
        metrics.valid_products = report.accepted.len();
        metrics.errors.extend(report.rejected);
        ctx.report(ProcessingStep::AiStandardizing, 0.0, Some(json!({ "valid": metrics.valid_products }))).await;
        checkpoint(ctx)?;

        let standardized = self.standardizer.standardize(report.accepted, ctx).await;
        metrics.errors.extend(standardized.errors);
        checkpoint(ctx)?;

        let consolidation = self.consolidator.consolidate(standardized.records);
        metrics.consolidated_products = consolidation.groups.len();
        ctx.report(
            ProcessingStep::AiStandardizing,
            1.0,
            Some(json!({ "products": metrics.consolidated_products, "stats": standardized.stats })),
        )
        .await;

        if consolidation.groups.is_empty() {
            tracing::warn!(upload_id = %ctx.upload_id, errors = metrics.errors.len(), "No products to save");
            return Ok(derive_run_status(0, &metrics.errors));
        }

        let supplier_name = supplier_name(upload, extraction.supplier_name.as_deref());
        let supplier = resolve_supplier(self.store.as_ref(), &supplier_name)
            .await
            .map_err(PricebookError::store)?;
        metrics.supplier_name = Some(supplier.name.clone());
        self.store
            .set_upload_supplier(upload.id, supplier.id)
            .await
            .map_err(PricebookError::store)?;
        checkpoint(ctx)?;

        if !self.config.auto_approve {
            self.store
                .stage_groups(upload.id, &consolidation.groups)
                .await
                .map_err(PricebookError::store)?;
            tracing::info!(
                upload_id = %ctx.upload_id,
                products = consolidation.groups.len(),
                "Consolidated products staged for review"
            );
            return Ok(RunStatus::PendingReview);
        }

        self.commit(&consolidation.groups, supplier.id, ctx, metrics).await
    }

    async fn commit(
        &self,
        groups: &[ConsolidatedProductGroup],
        supplier_id: Uuid,
        ctx: &RunContext,
        metrics: &mut UploadMetrics,
    ) -> PricebookResult<RunStatus> {
        let commit = self.versioning.commit(groups, supplier_id, Some(ctx.upload_id), ctx).await;
        metrics.saved_products = commit.saved;
        metrics.unchanged_prices = commit.unchanged;
        metrics.errors.extend(commit.errors);
        if commit.cancelled {
            return Err(PricebookError::cancelled(format!(
                "upload {} cancelled after saving {} products",
                ctx.upload_id, commit.saved
            )));
        }
        Ok(derive_run_status(metrics.saved_products, &metrics.errors))
    }

    /// Commit the groups staged for review and derive the final status.
    pub async fn approve_upload(&self, upload_id: Uuid) -> PricebookResult<RunReport> {
        let upload = self.load_upload(upload_id).await?;
        require_pending_review(&upload)?;
        let supplier_id = upload
            .supplier_id
            .ok_or_else(|| PricebookError::conflict(format!("upload {} has no resolved supplier", upload_id)))?;

        let ctx = self.register(upload_id).await?;
        let staged = self
            .store
            .take_staged_groups(upload_id)
            .await
            .map_err(PricebookError::store);
        let groups = match staged {
            Ok(Some(groups)) => groups,
            Ok(None) => {
                self.running.lock().await.remove(&upload_id);
                return Err(PricebookError::conflict(format!("upload {} has nothing staged", upload_id)));
            }
            Err(e) => {
                self.running.lock().await.remove(&upload_id);
                return Err(e);
            }
        };

        tracing::info!(upload_id = %upload_id, products = groups.len(), "Upload approved, committing prices");
        let mut metrics = upload.metrics.unwrap_or_default();
        let outcome = self.commit(&groups, supplier_id, &ctx, &mut metrics).await;
        self.running.lock().await.remove(&upload_id);

        let status = match &outcome {
            Ok(status) => *status,
            Err(_) => RunStatus::Failed,
        };
        self.finish(upload_id, status, &metrics).await?;
        outcome?;

        Ok(RunReport {
            upload_id,
            status,
            metrics,
        })
    }

    /// Discard the staged groups; nothing is written to the catalogue.
    pub async fn reject_upload(&self, upload_id: Uuid) -> PricebookResult<RunReport> {
        let upload = self.load_upload(upload_id).await?;
        require_pending_review(&upload)?;

        self.store
            .take_staged_groups(upload_id)
            .await
            .map_err(PricebookError::store)?;
        let metrics = upload.metrics.unwrap_or_default();
        self.store
            .update_upload_status(upload_id, RunStatus::Rejected, Some(&metrics))
            .await
            .map_err(PricebookError::store)?;
        self.progress
            .fail(upload_id, json!({ "status": RunStatus::Rejected.as_str() }))
            .await;

        tracing::info!(upload_id = %upload_id, "Upload rejected, staged products discarded");
        Ok(RunReport {
            upload_id,
            status: RunStatus::Rejected,
            metrics,
        })
    }

    /// Ask a running upload to stop at its next stage boundary.
    pub async fn cancel(&self, upload_id: Uuid) -> bool {
        match self.running.lock().await.get(&upload_id) {
            Some((token, _)) => {
                token.cancel();
                tracing::info!(upload_id = %upload_id, "Cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Live cost of a running upload, or the totals recorded for a finished one.
    pub async fn cost_summary(&self, upload_id: Uuid) -> PricebookResult<CostSummary> {
        if let Some((_, cost)) = self.running.lock().await.get(&upload_id) {
            return Ok(cost.summary());
        }

        let upload = self.load_upload(upload_id).await?;
        let metrics = upload.metrics.unwrap_or_default();
        Ok(CostSummary {
            total: UsageTotals {
                calls: 0,
                prompt_tokens: metrics.prompt_tokens,
                completion_tokens: metrics.completion_tokens,
                cost_usd: metrics.cost_usd,
            },
            budget_usd: self.budget_usd,
            ..CostSummary::default()
        })
    }

    async fn register(&self, upload_id: Uuid) -> PricebookResult<RunContext> {
        let mut running = self.running.lock().await;
        if running.contains_key(&upload_id) {
            return Err(PricebookError::conflict(format!("upload {} is already being processed", upload_id)));
        }
        let token = CancellationToken::new();
        let cost = Arc::new(CostMonitor::new(self.pricing.clone(), self.budget_usd));
        running.insert(upload_id, (token.clone(), cost.clone()));
        Ok(RunContext::new(upload_id, token, cost, self.progress.clone()))
    }

    async fn load_upload(&self, upload_id: Uuid) -> PricebookResult<UploadRecord> {
        self.store
            .get_upload(upload_id)
            .await
            .map_err(PricebookError::store)?
            .ok_or_else(|| PricebookError::not_found(format!("upload {}", upload_id)))
    }

    async fn finish(&self, upload_id: Uuid, status: RunStatus, metrics: &UploadMetrics) -> PricebookResult<()> {
        self.store
            .update_upload_status(upload_id, status, Some(metrics))
            .await
            .map_err(PricebookError::store)?;

        let details = json!({
            "status": status.as_str(),
            "saved": metrics.saved_products,
            "errors": metrics.errors.len(),
        });
        match status {
            RunStatus::Failed | RunStatus::TooLarge => self.progress.fail(upload_id, details).await,
            RunStatus::PendingReview => {
                self.progress
                    .report(upload_id, ProcessingStep::Saving, 0.0, Some(details))
                    .await
            }
            _ => self.progress.complete(upload_id, Some(details)).await,
        }

        tracing::info!(
            upload_id = %upload_id,
            status = %status,
            saved = metrics.saved_products,
            unchanged = metrics.unchanged_prices,
            errors = metrics.errors.len(),
            cost_usd = metrics.cost_usd,
            "Upload run finished"
        );
        Ok(())
    }
}

fn checkpoint(ctx: &RunContext) -> PricebookResult<()> {
    if ctx.is_cancelled() {
        return Err(PricebookError::cancelled(format!("upload {} cancelled", ctx.upload_id)));
    }
    Ok(())
}

fn require_pending_review(upload: &UploadRecord) -> PricebookResult<()> {
    if upload.status != RunStatus::PendingReview {
        return Err(PricebookError::conflict(format!(
            "upload {} is {}, not pending_review",
            upload.id, upload.status
        )));
    }
    Ok(())
}

fn record_cost(metrics: &mut UploadMetrics, totals: &UsageTotals) {
    metrics.prompt_tokens = totals.prompt_tokens;
    metrics.completion_tokens = totals.completion_tokens;
    metrics.cost_usd = totals.cost_usd;
}

/// Supplier hint, then the supplier the model read off the document, then the file stem.
fn supplier_name(upload: &UploadRecord, detected: Option<&str>) -> String {
    upload
        .supplier_hint
        .as_deref()
        .or(detected)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            Path::new(&upload.file_name)
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or(&upload.file_name)
                .to_string()
        })
}
