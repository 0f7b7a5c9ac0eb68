//! LLM Fallback Engine
//!
//! Second extraction attempt for sheets (or PDF text layers) where structural extraction
//! under-performed. A bounded sample of rows is sent to a text model; the answer either replaces
//! the structural result when it strictly improves the product count, or is merged with it.

use std::collections::HashSet;
use std::sync::Arc;

use pricebook_models::{RawProductRecord, SourceLocation};
use pricebook_utils::{naive_normalize, FallbackMergeMode, PriceParser, Sheet};

use crate::ai_client::{AiError, AiRequest};
use crate::context::RunContext;
use crate::gateway::AiGateway;
use crate::response::decode_extraction;

/// Outcome of combining a structural pass with a fallback pass.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub records: Vec<RawProductRecord>,
    /// The fallback contributed at least one record to the result.
    pub fallback_used: bool,
}

pub struct LlmFallbackEngine {
    gateway: Arc<AiGateway>,
    model: String,
    sample_rows: usize,
    merge_mode: FallbackMergeMode,
    parser: PriceParser,
}

impl LlmFallbackEngine {
    pub fn new(
        gateway: Arc<AiGateway>,
        model: impl Into<String>,
        sample_rows: usize,
        merge_mode: FallbackMergeMode,
        expand_shorthand: bool,
    ) -> Self {
        Self {
            gateway,
            model: model.into(),
            sample_rows,
            merge_mode,
            parser: PriceParser::new(expand_shorthand),
        }
    }

    pub fn merge_mode(&self) -> FallbackMergeMode {
        self.merge_mode
    }

    /// Ask the model for the products in the first `sample_rows` non-empty rows of `sheet`.
    pub async fn extract(&self, sheet: &Sheet, ctx: &RunContext) -> Result<Vec<RawProductRecord>, AiError> {
        let sample = serialize_sample(sheet, self.sample_rows);
        if sample.is_empty() {
            return Ok(Vec::new());
        }

        let request = AiRequest::text(&self.model, FALLBACK_PROMPT, sample);
        let response = self.gateway.invoke(request, ctx, "fallback").await?;
        let payload = decode_extraction(&response.raw_text)
            .map_err(|e| AiError::Fatal(format!("malformed fallback response: {}", e)))?;

        let records: Vec<RawProductRecord> = payload
            .products
            .into_iter()
            .enumerate()
            .filter_map(|(i, item)| item.into_record(&self.parser, SourceLocation::sheet(&sheet.name, i)))
            .collect();

        tracing::info!(
            upload_id = %ctx.upload_id,
            sheet = %sheet.name,
            products = records.len(),
            "Fallback extraction returned"
        );
        Ok(records)
    }

    pub fn merge(&self, structural: Vec<RawProductRecord>, fallback: Vec<RawProductRecord>) -> MergeOutcome {
        merge_results(structural, fallback, self.merge_mode)
    }
}

/// Non-empty rows as `cell | cell | cell` lines, blank cells dropped.
pub fn serialize_sample(sheet: &Sheet, limit: usize) -> String {
    sheet
        .non_empty_rows()
        .take(limit)
        .map(|(_, row)| {
            row.iter()
                .map(|cell| cell.trim())
                .filter(|cell| !cell.is_empty())
                .collect::<Vec<_>>()
                .join(" | ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn merge_results(
    structural: Vec<RawProductRecord>,
    fallback: Vec<RawProductRecord>,
    mode: FallbackMergeMode,
) -> MergeOutcome {
    match mode {
        FallbackMergeMode::Replace => {
            if fallback.len() > structural.len() {
                MergeOutcome {
                    records: fallback,
                    fallback_used: true,
                }
            } else {
                MergeOutcome {
                    records: structural,
                    fallback_used: false,
                }
            }
        }
        FallbackMergeMode::Merge => {
            let mut seen: HashSet<(String, i64)> = structural.iter().map(dedup_key).collect();
            let mut records = structural;
            let before = records.len();
            for record in fallback {
                if seen.insert(dedup_key(&record)) {
                    records.push(record);
                }
            }
            let fallback_used = records.len() > before;
            MergeOutcome { records, fallback_used }
        }
    }
}

fn dedup_key(record: &RawProductRecord) -> (String, i64) {
    (
        naive_normalize(&record.name),
        record.price.map_or(0, |p| (p * 100.0).round() as i64),
    )
}

const FALLBACK_PROMPT: &str = r#"
The text below is a sample of rows from a supplier price list, one row per line with cells separated by " | ".
Identify every product row and return a JSON object:
{"products": [{"name": "product name", "price": 5000, "unit": "kg"}]}

Rules:
- price is a plain positive number without currency symbols or thousands separators
- unit is the selling unit (kg, g, pcs, pack, box, bunch, l); use "pcs" when none is given
- skip headers, section titles, totals and rows without a price

Return ONLY valid JSON, no additional text.
"#;
