//! Vision Extractor
//!
//! Rasterizes PDF pages (or takes an uploaded image), fits them into the vision budget and asks
//! the vision model for a `{supplier, products}` object per image. Page count is capped, calls
//! are spaced by a rate limiter, and a quota or budget stop ends page processing with the pages
//! read so far.

use anyhow::Result;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use pricebook_models::{ProcessingStep, RawProductRecord, RunError, SourceLocation};
use pricebook_utils::{clean_name, ExtractionConfig, PriceParser};

use crate::ai_client::{AiError, AiRequest};
use crate::completeness::Completeness;
use crate::context::RunContext;
use crate::gateway::AiGateway;
use crate::rasterizer::{prepare_tiles, ImageTile, PageRasterizer};
use crate::response::decode_extraction;

/// Records and diagnostics of one vision pass. Page numbers are 1-based.
#[derive(Debug, Clone, Default)]
pub struct VisionOutcome {
    pub records: Vec<RawProductRecord>,
    pub supplier: Option<String>,
    pub total_pages: usize,
    pub processed_pages: usize,
    pub skipped_pages: Vec<usize>,
    pub errors: Vec<RunError>,
    pub stopped_early: bool,
}

impl VisionOutcome {
    pub fn completeness(&self) -> Completeness {
        Completeness::new(self.total_pages, self.processed_pages)
    }
}

enum PageFailure {
    /// Quota or budget: no further page may be attempted.
    Stop(AiError),
    /// Every tile of the page failed.
    Skip(Vec<RunError>),
}

struct PageExtraction {
    records: Vec<RawProductRecord>,
    supplier: Option<String>,
    errors: Vec<RunError>,
}

pub struct VisionExtractor {
    gateway: Arc<AiGateway>,
    rasterizer: Arc<dyn PageRasterizer>,
    config: ExtractionConfig,
    model: String,
    parser: PriceParser,
}

impl VisionExtractor {
    pub fn new(
        gateway: Arc<AiGateway>,
        rasterizer: Arc<dyn PageRasterizer>,
        config: ExtractionConfig,
        model: impl Into<String>,
        expand_shorthand: bool,
    ) -> Self {
        Self {
            gateway,
            rasterizer,
            config,
            model: model.into(),
            parser: PriceParser::new(expand_shorthand),
        }
    }

    fn limiter(&self) -> Option<DefaultDirectRateLimiter> {
        Quota::with_period(Duration::from_millis(self.config.vision_call_spacing_ms)).map(RateLimiter::direct)
    }

    pub async fn extract_pdf(&self, pdf: &[u8], ctx: &RunContext) -> Result<VisionOutcome> {
        let total_pages = self.rasterizer.page_count(pdf).await?;
        let pages = total_pages.min(self.config.max_pages);
        let limiter = self.limiter();

        let mut outcome = VisionOutcome {
            total_pages,
            ..VisionOutcome::default()
        };

        if total_pages > pages {
            tracing::warn!(
                upload_id = %ctx.upload_id,
                total_pages,
                max_pages = pages,
                "Page cap reached, remaining pages not processed"
            );
            outcome.skipped_pages.extend(pages + 1..=total_pages);
        }

        for page in 0..pages {
            if ctx.is_cancelled() {
                outcome.skipped_pages.extend(page + 1..=pages);
                outcome.stopped_early = true;
                break;
            }

            let image = match self.rasterizer.render_page(pdf, page).await {
                Ok(image) => image,
                Err(e) => {
                    tracing::warn!(upload_id = %ctx.upload_id, page = page + 1, error = %e, "Page rasterization failed");
                    outcome
                        .errors
                        .push(RunError::external_service(format!("rasterization failed: {}", e)).at(format!("page {}", page + 1)));
                    outcome.skipped_pages.push(page + 1);
                    continue;
                }
            };

            if !self.absorb_page(page, &image, limiter.as_ref(), ctx, &mut outcome).await {
                outcome.skipped_pages.extend(page + 2..=pages);
                outcome.stopped_early = true;
                break;
            }

            ctx.report(
                ProcessingStep::Extracting,
                (page + 1) as f64 / pages as f64,
                Some(serde_json::json!({ "page": page + 1, "pages": pages, "products": outcome.records.len() })),
            )
            .await;
        }

        outcome.skipped_pages.sort_unstable();
        outcome.skipped_pages.dedup();
        self.log_outcome(&outcome, ctx);
        Ok(outcome)
    }

    pub async fn extract_image(&self, image: &[u8], ctx: &RunContext) -> Result<VisionOutcome> {
        let limiter = self.limiter();
        let mut outcome = VisionOutcome {
            total_pages: 1,
            ..VisionOutcome::default()
        };
        if !ctx.is_cancelled() {
            self.absorb_page(0, image, limiter.as_ref(), ctx, &mut outcome).await;
        }
        self.log_outcome(&outcome, ctx);
        Ok(outcome)
    }

    /// Extract one page into `outcome`. Returns `false` when processing must stop.
    async fn absorb_page(
        &self,
        page: usize,
        image: &[u8],
        limiter: Option<&DefaultDirectRateLimiter>,
        ctx: &RunContext,
        outcome: &mut VisionOutcome,
    ) -> bool {
        match self.extract_page(page, image, limiter, ctx).await {
            Ok(extraction) => {
                outcome.processed_pages += 1;
                outcome.records.extend(extraction.records);
                outcome.errors.extend(extraction.errors);
                if outcome.supplier.is_none() {
                    outcome.supplier = extraction.supplier;
                }
                true
            }
            Err(PageFailure::Skip(errors)) => {
                outcome.errors.extend(errors);
                outcome.skipped_pages.push(page + 1);
                true
            }
            Err(PageFailure::Stop(error)) => {
                tracing::warn!(
                    upload_id = %ctx.upload_id,
                    page = page + 1,
                    error = %error,
                    "Stopping vision extraction, returning partial results"
                );
                outcome.errors.push(error.to_run_error().at(format!("page {}", page + 1)));
                outcome.skipped_pages.push(page + 1);
                false
            }
        }
    }

    async fn extract_page(
        &self,
        page: usize,
        image: &[u8],
        limiter: Option<&DefaultDirectRateLimiter>,
        ctx: &RunContext,
    ) -> Result<PageExtraction, PageFailure> {
        let tiles = prepare_tiles(image, &self.config).map_err(|e| {
            PageFailure::Skip(vec![
                RunError::structural(format!("unreadable page image: {}", e)).at(format!("page {}", page + 1))
            ])
        })?;

        let mut seen: HashSet<(String, i64)> = HashSet::new();
        let mut extraction = PageExtraction {
            records: Vec::new(),
            supplier: None,
            errors: Vec::new(),
        };
        let mut succeeded = 0;

        for tile in tiles {
            if let Some(limiter) = limiter {
                limiter.until_ready().await;
            }

            match self.extract_tile(page, &tile, ctx).await {
                Ok((supplier, products)) => {
                    succeeded += 1;
                    if extraction.supplier.is_none() {
                        extraction.supplier = supplier;
                    }
                    for product in products {
                        let key = (clean_name(&product.name), product.price.map_or(0, |p| (p * 100.0).round() as i64));
                        // overlapping tiles repeat the rows on their shared edge
                        if seen.insert(key) {
                            extraction.records.push(product);
                        }
                    }
                }
                Err(error) if error.stops_ai_work() => return Err(PageFailure::Stop(error)),
                Err(error) => {
                    extraction.errors.push(
                        error
                            .to_run_error()
                            .at(format!("page {} tile {}/{}", page + 1, tile.index + 1, tile.of)),
                    );
                }
            }
        }

        if succeeded == 0 {
            return Err(PageFailure::Skip(extraction.errors));
        }

        // renumber so locations follow the deduplicated order
        for (row_index, record) in extraction.records.iter_mut().enumerate() {
            record.source_location = SourceLocation::page(page, row_index);
        }

        tracing::debug!(
            upload_id = %ctx.upload_id,
            page = page + 1,
            products = extraction.records.len(),
            "Vision page extracted"
        );
        Ok(extraction)
    }

    async fn extract_tile(
        &self,
        page: usize,
        tile: &ImageTile,
        ctx: &RunContext,
    ) -> Result<(Option<String>, Vec<RawProductRecord>), AiError> {
        let request = AiRequest::image(&self.model, VISION_EXTRACTION_PROMPT, tile.data.clone(), tile.mime_type)
            .with_text(format!("Page {}, part {} of {}.", page + 1, tile.index + 1, tile.of));

        let response = self.gateway.invoke(request, ctx, "vision").await?;
        let payload = decode_extraction(&response.raw_text)
            .map_err(|e| AiError::Fatal(format!("malformed vision response: {}", e)))?;

        let records = payload
            .products
            .into_iter()
            .enumerate()
            .filter_map(|(i, product)| product.into_record(&self.parser, SourceLocation::page(page, i)))
            .collect();
        Ok((payload.supplier, records))
    }

    fn log_outcome(&self, outcome: &VisionOutcome, ctx: &RunContext) {
        tracing::info!(
            upload_id = %ctx.upload_id,
            total_pages = outcome.total_pages,
            processed_pages = outcome.processed_pages,
            skipped_pages = outcome.skipped_pages.len(),
            products = outcome.records.len(),
            errors = outcome.errors.len(),
            stopped_early = outcome.stopped_early,
            "Vision extraction finished"
        );
    }
}

const VISION_EXTRACTION_PROMPT: &str = r#"
You extract product price lists from supplier documents. Read every product row visible in the image.

Return a JSON object with the following structure:
{
  "supplier": "supplier or company name printed on the document, or null",
  "products": [
    {"name": "product name as printed", "price": 5000, "unit": "kg", "category": "vegetables", "description": null}
  ]
}

Rules:
1. One entry per product row; do not merge or invent rows
2. price is a plain number in the document's currency, without symbols or thousands separators
3. When a price range is printed, use the lower value
4. unit is the selling unit printed next to the price or in the name (kg, g, pcs, pack, box, bunch, l)
5. Leave out headers, totals, notes and contact details

Return ONLY valid JSON, no additional text.
"#;
