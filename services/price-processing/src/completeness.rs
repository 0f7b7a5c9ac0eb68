//! Completeness Evaluator
//!
//! `completeness = processed / detected`, 0 when nothing was detected. Fallback extraction is
//! warranted only when the ratio is below the threshold for the document kind and the number of
//! extracted products is below the absolute floor.

use serde::Serialize;

use pricebook_utils::ExtractionConfig;

use crate::router::DocumentKind;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Completeness {
    pub detected: usize,
    pub processed: usize,
}

impl Completeness {
    pub fn new(detected: usize, processed: usize) -> Self {
        Self { detected, processed }
    }

    /// Always within `[0, 1]`; processed counts above detected are clamped.
    pub fn ratio(&self) -> f64 {
        if self.detected == 0 {
            return 0.0;
        }
        (self.processed as f64 / self.detected as f64).min(1.0)
    }

    pub fn combine(self, other: Completeness) -> Completeness {
        Completeness {
            detected: self.detected + other.detected,
            processed: self.processed + other.processed,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CompletenessEvaluator {
    threshold: f64,
    product_floor: usize,
}

impl CompletenessEvaluator {
    pub fn new(threshold: f64, product_floor: usize) -> Self {
        Self {
            threshold,
            product_floor,
        }
    }

    pub fn for_kind(kind: DocumentKind, config: &ExtractionConfig) -> Self {
        let threshold = match kind {
            DocumentKind::Spreadsheet => config.spreadsheet_completeness_threshold,
            DocumentKind::Csv => config.csv_completeness_threshold,
            DocumentKind::Pdf | DocumentKind::Image => config.document_completeness_threshold,
        };
        Self::new(threshold, config.product_floor)
    }

    pub fn needs_fallback(&self, completeness: Completeness, products: usize) -> bool {
        completeness.ratio() < self.threshold && products < self.product_floor
    }
}
