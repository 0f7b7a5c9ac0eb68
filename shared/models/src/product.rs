//! Product domain models for the Pricebook ingestion pipeline.
//!
//! A record travels through the pipeline as raw -> validated -> standardized and is then
//! grouped by its canonical key for consolidation. Only [`Product`] is persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Where in the source document a record was read from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceLocation {
    Sheet { sheet: String, row_index: usize },
    Page { page: usize, row_index: usize },
}

impl SourceLocation {
    pub fn sheet(sheet: impl Into<String>, row_index: usize) -> Self {
        Self::Sheet {
            sheet: sheet.into(),
            row_index,
        }
    }

    pub fn page(page: usize, row_index: usize) -> Self {
        Self::Page { page, row_index }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sheet { sheet, row_index } => write!(f, "sheet '{}' row {}", sheet, row_index + 1),
            Self::Page { page, row_index } => write!(f, "page {} item {}", page + 1, row_index + 1),
        }
    }
}

/// A product row as emitted by an extractor. Never persisted directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawProductRecord {
    pub name: String,
    pub price: Option<f64>,
    pub unit: String,
    pub category: Option<String>,
    pub source_location: SourceLocation,
}

impl RawProductRecord {
    /// Build a record. Non-finite or negative prices are stored as `None`.
    pub fn new(
        name: impl Into<String>,
        price: Option<f64>,
        unit: impl Into<String>,
        source_location: SourceLocation,
    ) -> Self {
        Self {
            name: name.into().trim().to_string(),
            price: price.filter(|p| p.is_finite() && *p >= 0.0),
            unit: unit.into().trim().to_string(),
            category: None,
            source_location,
        }
    }

    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.category = category
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        self
    }

    pub fn has_valid_price(&self) -> bool {
        matches!(self.price, Some(p) if p > 0.0)
    }
}

/// Output of the price validator: the raw record plus a confidence score and audit warnings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedProductRecord {
    #[serde(flatten)]
    pub raw: RawProductRecord,
    pub confidence: f64,
    pub warnings: Vec<String>,
    /// Price as extracted, kept when a correction has been applied.
    pub original_price: Option<f64>,
}

impl ValidatedProductRecord {
    pub fn new(raw: RawProductRecord) -> Self {
        Self {
            raw,
            confidence: 1.0,
            warnings: Vec::new(),
            original_price: None,
        }
    }

    pub fn price(&self) -> Option<f64> {
        self.raw.price
    }

    pub fn name(&self) -> &str {
        &self.raw.name
    }

    /// Multiply the confidence by `factor` and record why.
    pub fn penalize(&mut self, factor: f64, warning: impl Into<String>) {
        self.confidence = (self.confidence * factor).clamp(0.0, 1.0);
        self.warnings.push(warning.into());
    }

    /// Replace the price, keeping the extracted value for audit.
    pub fn apply_correction(&mut self, corrected: f64) {
        if self.original_price.is_none() {
            self.original_price = self.raw.price;
        }
        self.warnings.push(format!(
            "price corrected from {} to {}",
            self.raw.price.map(|p| p.to_string()).unwrap_or_else(|| "none".to_string()),
            corrected
        ));
        self.raw.price = Some(corrected);
    }
}

/// Canonical identity of a product across suppliers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProductKey {
    pub standardized_name: String,
    pub standardized_unit: String,
}

impl ProductKey {
    pub fn new(name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            standardized_name: name.into(),
            standardized_unit: unit.into(),
        }
    }
}

impl fmt::Display for ProductKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.standardized_name, self.standardized_unit)
    }
}

/// A validated record mapped onto the shared vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardizedProductRecord {
    #[serde(flatten)]
    pub validated: ValidatedProductRecord,
    pub standardized_name: String,
    pub standardized_unit: String,
}

impl StandardizedProductRecord {
    pub fn key(&self) -> ProductKey {
        ProductKey::new(&self.standardized_name, &self.standardized_unit)
    }

    pub fn price(&self) -> Option<f64> {
        self.validated.price()
    }

    pub fn raw(&self) -> &RawProductRecord {
        &self.validated.raw
    }
}

/// All records sharing one key within a single run, with the chosen representative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedProductGroup {
    pub key: ProductKey,
    pub representative: StandardizedProductRecord,
    pub members: Vec<StandardizedProductRecord>,
}

impl ConsolidatedProductGroup {
    pub fn merged_count(&self) -> usize {
        self.members.len()
    }

    /// Price of the representative. Consolidation only admits positive prices.
    pub fn price(&self) -> f64 {
        self.representative.price().unwrap_or_default()
    }
}

/// Persisted canonical product, unique on `(standardized_name, standardized_unit)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub id: Uuid,
    pub standardized_name: String,
    pub standardized_unit: String,
    pub display_name: String,
    pub raw_name: String,
    pub category: Option<String>,
    pub unit_variants: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn key(&self) -> ProductKey {
        ProductKey::new(&self.standardized_name, &self.standardized_unit)
    }
}

/// Fields written when a product is created or sighted again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductUpsert {
    pub standardized_name: String,
    pub standardized_unit: String,
    pub display_name: String,
    pub raw_name: String,
    pub category: Option<String>,
    pub unit_variant: String,
}

impl From<&ConsolidatedProductGroup> for ProductUpsert {
    fn from(group: &ConsolidatedProductGroup) -> Self {
        let raw = group.representative.raw();
        Self {
            standardized_name: group.key.standardized_name.clone(),
            standardized_unit: group.key.standardized_unit.clone(),
            display_name: display_name(&group.key.standardized_name),
            raw_name: raw.name.clone(),
            category: raw.category.clone(),
            unit_variant: raw.unit.trim().to_lowercase(),
        }
    }
}

/// Title-case a canonical name for display.
pub fn display_name(standardized_name: &str) -> String {
    standardized_name
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_record_rejects_non_finite_price() {
        let record = RawProductRecord::new("Tomato", Some(f64::NAN), "kg", SourceLocation::sheet("S", 0));
        assert_eq!(record.price, None);

        let record = RawProductRecord::new("Tomato", Some(-10.0), "kg", SourceLocation::sheet("S", 0));
        assert_eq!(record.price, None);
        assert!(!record.has_valid_price());
    }

    #[test]
    fn test_correction_keeps_original_price() {
        let raw = RawProductRecord::new("Beef", Some(316.35), "kg", SourceLocation::page(0, 1));
        let mut record = ValidatedProductRecord::new(raw);
        record.apply_correction(316_350.0);

        assert_eq!(record.price(), Some(316_350.0));
        assert_eq!(record.original_price, Some(316.35));
        assert_eq!(record.warnings.len(), 1);
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("red tomato"), "Red Tomato");
        assert_eq!(display_name(""), "");
    }

    #[test]
    fn test_source_location_display_is_one_based() {
        assert_eq!(SourceLocation::sheet("Prices", 0).to_string(), "sheet 'Prices' row 1");
        assert_eq!(SourceLocation::page(2, 4).to_string(), "page 3 item 5");
    }
}
