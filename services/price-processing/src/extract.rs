//! Extractor variants selected by the router: tabular documents (workbooks and CSV) and visual
//! documents (PDF pages and images). Both consult the completeness evaluator and hand under-performing
//! input to the fallback engine.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use pricebook_models::{ProcessingStep, RawProductRecord, RunError};
use pricebook_utils::{read_workbook, ExtractionConfig, Sheet, SheetOutcome, TabularExtractor};

use crate::completeness::{Completeness, CompletenessEvaluator};
use crate::context::RunContext;
use crate::fallback::LlmFallbackEngine;
use crate::router::{Document, DocumentKind, ExtractionResult, Extractor};
use crate::vision::VisionExtractor;

/// Runs the fallback once per attempt and remembers when AI work has been stopped for the run,
/// so a quota stop is reported once rather than per sheet.
struct FallbackRunner<'a> {
    engine: &'a LlmFallbackEngine,
    stopped: bool,
}

impl<'a> FallbackRunner<'a> {
    fn new(engine: &'a LlmFallbackEngine) -> Self {
        Self { engine, stopped: false }
    }

    /// Fallback records for `sheet`, or `None` when the call was not made or failed.
    async fn run(&mut self, sheet: &Sheet, ctx: &RunContext, errors: &mut Vec<RunError>) -> Option<Vec<RawProductRecord>> {
        if self.stopped || ctx.is_cancelled() {
            return None;
        }
        match self.engine.extract(sheet, ctx).await {
            Ok(records) => Some(records),
            Err(error) => {
                tracing::warn!(upload_id = %ctx.upload_id, sheet = %sheet.name, error = %error, "Fallback extraction failed");
                if error.stops_ai_work() {
                    self.stopped = true;
                }
                errors.push(error.to_run_error().at(format!("sheet '{}'", sheet.name)));
                None
            }
        }
    }
}

pub struct TabularDocumentExtractor {
    tabular: Arc<TabularExtractor>,
    fallback: Arc<LlmFallbackEngine>,
    config: ExtractionConfig,
}

impl TabularDocumentExtractor {
    pub fn new(config: ExtractionConfig, expand_shorthand: bool, fallback: Arc<LlmFallbackEngine>) -> Self {
        Self {
            tabular: Arc::new(TabularExtractor::new(&config, expand_shorthand)),
            fallback,
            config,
        }
    }
}

#[async_trait]
impl Extractor for TabularDocumentExtractor {
    async fn extract(&self, document: &Document, ctx: &RunContext) -> Result<ExtractionResult> {
        let format = document
            .kind
            .tabular_format(&document.file_name)
            .ok_or_else(|| anyhow!("{} is not a tabular document", document.kind.as_str()))?;

        let data = document.data.clone();
        let file_name = document.file_name.clone();
        let tabular = self.tabular.clone();
        let (sheets, outcomes) = tokio::task::spawn_blocking(move || -> Result<(Vec<Sheet>, Vec<SheetOutcome>)> {
            let sheets = read_workbook(&data, format, &file_name)?;
            let outcomes = tabular.extract(&sheets);
            Ok((sheets, outcomes))
        })
        .await
        .context("Workbook reading task failed")??;

        let evaluator = CompletenessEvaluator::for_kind(document.kind, &self.config);
        let mut fallback = FallbackRunner::new(&self.fallback);
        let mut result = ExtractionResult {
            method: "tabular".to_string(),
            ..ExtractionResult::default()
        };
        let sheet_count = sheets.len().max(1);

        for (index, (sheet, outcome)) in sheets.iter().zip(outcomes).enumerate() {
            if ctx.is_cancelled() {
                break;
            }

            match outcome {
                SheetOutcome::Skipped { sheet: name, .. } => {
                    result.skipped_sheets.push(name);
                }
                SheetOutcome::Structural { sheet: name, detected_rows } => {
                    let completeness = Completeness::new(detected_rows, 0);
                    let recovered = if evaluator.needs_fallback(completeness, 0) {
                        fallback.run(sheet, ctx, &mut result.errors).await.unwrap_or_default()
                    } else {
                        Vec::new()
                    };

                    if recovered.is_empty() {
                        tracing::warn!(upload_id = %ctx.upload_id, sheet = %name, "No name or price column identified");
                        result
                            .errors
                            .push(RunError::structural("no name or price column identified").at(format!("sheet '{}'", name)));
                        result.completeness = result.completeness.combine(completeness);
                    } else {
                        tracing::info!(upload_id = %ctx.upload_id, sheet = %name, products = recovered.len(), "Fallback recovered a structural failure");
                        result.fallback_used = true;
                        let processed = recovered.len().min(detected_rows);
                        result.completeness = result.completeness.combine(Completeness::new(detected_rows, processed));
                        result.records.extend(recovered);
                    }
                }
                SheetOutcome::Extracted(extraction) => {
                    result.errors.extend(extraction.warnings);
                    let completeness = Completeness::new(extraction.detected_rows, extraction.processed_rows);
                    let mut records = extraction.records;

                    if evaluator.needs_fallback(completeness, records.len()) {
                        tracing::info!(
                            upload_id = %ctx.upload_id,
                            sheet = %extraction.sheet,
                            completeness = completeness.ratio(),
                            products = records.len(),
                            "Structural extraction under threshold, trying fallback"
                        );
                        if let Some(candidates) = fallback.run(sheet, ctx, &mut result.errors).await {
                            let merged = self.fallback.merge(records, candidates);
                            result.fallback_used |= merged.fallback_used;
                            records = merged.records;
                        }
                    }

                    let processed = completeness.processed.max(records.len()).min(completeness.detected);
                    result.completeness = result
                        .completeness
                        .combine(Completeness::new(completeness.detected, processed));
                    result.records.extend(records);
                }
            }

            ctx.report(
                ProcessingStep::Extracting,
                (index + 1) as f64 / sheet_count as f64,
                Some(json!({ "sheet": sheet.name, "products": result.records.len() })),
            )
            .await;
        }

        if result.fallback_used {
            result.method = "tabular+fallback".to_string();
        }
        Ok(result)
    }
}

pub struct VisionDocumentExtractor {
    vision: VisionExtractor,
    fallback: Arc<LlmFallbackEngine>,
    product_floor: usize,
}

impl VisionDocumentExtractor {
    pub fn new(vision: VisionExtractor, fallback: Arc<LlmFallbackEngine>, product_floor: usize) -> Self {
        Self {
            vision,
            fallback,
            product_floor,
        }
    }
}

#[async_trait]
impl Extractor for VisionDocumentExtractor {
    async fn extract(&self, document: &Document, ctx: &RunContext) -> Result<ExtractionResult> {
        let outcome = match document.kind {
            DocumentKind::Pdf => self.vision.extract_pdf(&document.data, ctx).await?,
            DocumentKind::Image => self.vision.extract_image(&document.data, ctx).await?,
            other => return Err(anyhow!("{} is not a visual document", other.as_str())),
        };

        let mut result = ExtractionResult {
            completeness: outcome.completeness(),
            supplier_name: outcome.supplier,
            method: "vision".to_string(),
            skipped_pages: outcome.skipped_pages,
            errors: outcome.errors,
            records: outcome.records,
            ..ExtractionResult::default()
        };

        let worth_text_layer = document.kind == DocumentKind::Pdf
            && result.records.len() < self.product_floor
            && !outcome.stopped_early;
        if worth_text_layer {
            if let Some(sheet) = pdf_text_layer(&document.data).await {
                tracing::info!(
                    upload_id = %ctx.upload_id,
                    lines = sheet.rows.len(),
                    products = result.records.len(),
                    "Vision result below floor, trying fallback on the PDF text layer"
                );
                let mut fallback = FallbackRunner::new(&self.fallback);
                if let Some(candidates) = fallback.run(&sheet, ctx, &mut result.errors).await {
                    let merged = self.fallback.merge(std::mem::take(&mut result.records), candidates);
                    result.fallback_used = merged.fallback_used;
                    result.records = merged.records;
                }
            }
        }

        if result.fallback_used {
            result.method = "vision+text_fallback".to_string();
        }
        Ok(result)
    }
}

/// Text layer of a PDF as a one-column sheet, `None` for scanned documents.
pub async fn pdf_text_layer(data: &[u8]) -> Option<Sheet> {
    let data = data.to_vec();
    let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&data))
        .await
        .ok()?
        .map_err(|e| tracing::debug!(error = %e, "PDF has no readable text layer"))
        .ok()?;
    text_to_sheet(&text)
}

fn text_to_sheet(text: &str) -> Option<Sheet> {
    let rows: Vec<Vec<String>> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| vec![line.to_string()])
        .collect();
    if rows.is_empty() {
        None
    } else {
        Some(Sheet::new("text layer", rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_to_sheet() {
        let sheet = text_to_sheet("  Tomat 5.000\n\n Bawang 3.000 \n").unwrap();
        assert_eq!(sheet.rows, vec![vec!["Tomat 5.000".to_string()], vec!["Bawang 3.000".to_string()]]);
        assert!(text_to_sheet(" \n\n").is_none());
    }
}
