//! Price Validator
//!
//! Category-aware plausibility checks for extracted prices. Hard global bounds reject a record;
//! category range and unit mismatches only lower its confidence. A decimal-placement heuristic
//! proposes corrections for prices like `316.35` that were meant as `316350`.

use pricebook_models::{RawProductRecord, RunError, ValidatedProductRecord};
use serde::{Deserialize, Serialize};

use super::normalize::{clean_name, standardize_unit, translate_tokens};

const RANGE_PENALTY: f64 = 0.7;
const UNIT_PENALTY: f64 = 0.8;
/// Multiplier proposed by the decimal-placement heuristic.
const THOUSANDS: f64 = 1_000.0;

/// One entry of the category table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub name: String,
    pub keywords: Vec<String>,
    pub min_price: f64,
    pub max_price: f64,
    pub common_units: Vec<String>,
}

impl CategoryRule {
    fn new(name: &str, keywords: &[&str], min_price: f64, max_price: f64, common_units: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            min_price,
            max_price,
            common_units: common_units.iter().map(|u| u.to_string()).collect(),
        }
    }

    fn contains(&self, price: f64) -> bool {
        price >= self.min_price && price <= self.max_price
    }

    /// Number of the rule's keywords appearing as tokens of `tokens`.
    fn hits(&self, tokens: &[&str]) -> usize {
        self.keywords
            .iter()
            .filter(|kw| tokens.iter().any(|t| *t == kw.as_str()))
            .count()
    }
}

/// Price bounds and the category table, in the supplier's local currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceRules {
    pub global_min: f64,
    pub global_max: f64,
    pub categories: Vec<CategoryRule>,
}

impl Default for PriceRules {
    /// IDR ranges for fresh-produce and grocery suppliers.
    fn default() -> Self {
        Self {
            global_min: 50.0,
            global_max: 100_000_000.0,
            categories: vec![
                CategoryRule::new(
                    "vegetables",
                    &[
                        "vegetable", "vegetables", "sayur", "sayuran", "tomato", "onion", "shallot",
                        "garlic", "cabbage", "carrot", "potato", "chili", "spinach", "cucumber",
                        "eggplant", "corn", "bean",
                    ],
                    1_000.0,
                    150_000.0,
                    &["kg", "g", "pcs", "bunch", "pack"],
                ),
                CategoryRule::new(
                    "fruits",
                    &[
                        "fruit", "fruits", "buah", "buahan", "banana", "apple", "orange", "mango",
                        "papaya", "melon", "watermelon", "grape", "pineapple", "lime",
                    ],
                    2_000.0,
                    300_000.0,
                    &["kg", "pcs", "hand", "pack", "box"],
                ),
                CategoryRule::new(
                    "meat",
                    &["meat", "daging", "beef", "chicken", "pork", "lamb", "sausage", "breast", "thigh"],
                    20_000.0,
                    1_000_000.0,
                    &["kg", "g", "pack", "whole"],
                ),
                CategoryRule::new(
                    "seafood",
                    &["seafood", "fish", "shrimp", "squid", "crab", "salmon", "tuna", "prawn"],
                    15_000.0,
                    1_000_000.0,
                    &["kg", "g", "pack", "whole"],
                ),
                CategoryRule::new(
                    "dairy_eggs",
                    &["dairy", "milk", "cheese", "butter", "egg", "eggs", "yogurt", "cream"],
                    2_000.0,
                    500_000.0,
                    &["pcs", "l", "ml", "kg", "g", "pack", "box", "tray"],
                ),
                CategoryRule::new(
                    "staples",
                    &["rice", "flour", "sugar", "salt", "oil", "noodle", "noodles", "sembako"],
                    3_000.0,
                    1_500_000.0,
                    &["kg", "g", "l", "ml", "pack", "box", "sack", "bottle"],
                ),
                CategoryRule::new(
                    "spices",
                    &["spice", "spices", "bumbu", "rempah", "pepper", "ginger", "turmeric", "galangal", "lemongrass"],
                    1_000.0,
                    300_000.0,
                    &["kg", "g", "pack", "bunch"],
                ),
                CategoryRule::new(
                    "beverages",
                    &["beverage", "beverages", "minuman", "water", "juice", "coffee", "tea", "soda"],
                    2_000.0,
                    500_000.0,
                    &["l", "ml", "pcs", "pack", "box", "bottle"],
                ),
            ],
        }
    }
}

/// Validation result for one record that passed the global bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceCheck {
    pub record: ValidatedProductRecord,
    pub category: Option<String>,
    /// Proposed price when the decimal heuristic fired. Not applied by `check`.
    pub suggested_price: Option<f64>,
}

/// Outcome of validating a batch.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub accepted: Vec<ValidatedProductRecord>,
    pub rejected: Vec<RunError>,
    pub corrections_suggested: usize,
    pub corrections_applied: usize,
}

pub struct PriceValidator {
    rules: PriceRules,
}

impl Default for PriceValidator {
    fn default() -> Self {
        Self::new(PriceRules::default())
    }
}

impl PriceValidator {
    pub fn new(rules: PriceRules) -> Self {
        Self { rules }
    }

    /// Classify a record by its declared category first, then by its name.
    pub fn classify(&self, record: &RawProductRecord) -> Option<&CategoryRule> {
        if let Some(declared) = record.category.as_deref() {
            let declared = translate_tokens(&clean_name(declared));
            if let Some(rule) = self.rules.categories.iter().find(|r| r.name == declared) {
                return Some(rule);
            }
            if let Some(rule) = self.best_match(&declared) {
                return Some(rule);
            }
        }
        self.best_match(&translate_tokens(&clean_name(&record.name)))
    }

    fn best_match(&self, text: &str) -> Option<&CategoryRule> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let mut best: Option<(&CategoryRule, usize)> = None;
        for rule in &self.rules.categories {
            let hits = rule.hits(&tokens);
            if hits > 0 && best.map_or(true, |(_, b)| hits > b) {
                best = Some((rule, hits));
            }
        }
        best.map(|(rule, _)| rule)
    }

    /// Propose `price × 1000` when the price has a fractional part, falls below the expected
    /// range and the scaled value lands inside it.
    pub fn suggest_correction(&self, price: f64, category: Option<&CategoryRule>) -> Option<f64> {
        if price.fract() == 0.0 {
            return None;
        }
        let scaled = (price * THOUSANDS).round();
        let (min, max) = match category {
            Some(rule) => (rule.min_price, rule.max_price),
            None => (self.rules.global_min.max(THOUSANDS), self.rules.global_max),
        };
        if price < min && scaled >= min && scaled <= max {
            Some(scaled)
        } else {
            None
        }
    }

    /// Validate one record. `Err` carries the rejection when the price is missing, non-positive
    /// or outside the global bounds.
    pub fn check(&self, raw: RawProductRecord) -> Result<PriceCheck, RunError> {
        let location = raw.source_location.clone();
        let price = match raw.price {
            Some(p) if p > 0.0 => p,
            _ => {
                return Err(RunError::validation(format!("'{}' has no positive price", raw.name)).at(&location));
            }
        };

        let category = self.classify(&raw).cloned();
        let suggested_price = self.suggest_correction(price, category.as_ref());

        if price < self.rules.global_min || price > self.rules.global_max {
            return Err(RunError::validation(format!(
                "'{}' price {} outside global bounds [{}, {}]",
                raw.name, price, self.rules.global_min, self.rules.global_max
            ))
            .at(&location));
        }

        let unit = standardize_unit(&raw.unit);
        let mut record = ValidatedProductRecord::new(raw);

        if let Some(rule) = &category {
            if !rule.contains(price) {
                record.penalize(
                    RANGE_PENALTY,
                    format!(
                        "price {} outside {} range [{}, {}]",
                        price, rule.name, rule.min_price, rule.max_price
                    ),
                );
            }
            if !rule.common_units.iter().any(|u| *u == unit) {
                record.penalize(UNIT_PENALTY, format!("unit '{}' unusual for {}", unit, rule.name));
            }
        }

        if let Some(suggested) = suggested_price {
            record.warnings.push(format!("price {} may be missing a thousands multiplier, suggest {}", price, suggested));
        }

        Ok(PriceCheck {
            record,
            category: category.map(|rule| rule.name),
            suggested_price,
        })
    }

    /// Validate a batch, applying suggested corrections when `apply_corrections` is set.
    pub fn validate_all(&self, records: Vec<RawProductRecord>, apply_corrections: bool) -> ValidationReport {
        let mut report = ValidationReport::default();

        for raw in records {
            match self.check(raw) {
                Ok(mut check) => {
                    if let Some(suggested) = check.suggested_price {
                        report.corrections_suggested += 1;
                        if apply_corrections {
                            check.record.apply_correction(suggested);
                            report.corrections_applied += 1;
                        }
                    }
                    report.accepted.push(check.record);
                }
                Err(error) => {
                    tracing::debug!(error = %error, "Record rejected by price validation");
                    report.rejected.push(error);
                }
            }
        }

        if !report.rejected.is_empty() || report.corrections_suggested > 0 {
            tracing::info!(
                accepted = report.accepted.len(),
                rejected = report.rejected.len(),
                corrections_suggested = report.corrections_suggested,
                corrections_applied = report.corrections_applied,
                "Price validation finished"
            );
        }

        report
    }
}
