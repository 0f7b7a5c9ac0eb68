//! Strict decoding of AI responses.
//!
//! Responses are decoded into typed payloads with explicit defaults. Markdown code fences are
//! the only wrapping tolerated; anything else that is not the expected JSON shape is a
//! [`ResponseDecodeError`].

use serde::Deserialize;
use thiserror::Error;

use pricebook_models::{RawProductRecord, SourceLocation};
use pricebook_utils::{infer_unit_from_name, PriceParser};

#[derive(Debug, Error)]
pub enum ResponseDecodeError {
    #[error("AI response is empty")]
    Empty,

    #[error("AI response is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("AI response has an unexpected shape: {0}")]
    UnexpectedShape(String),
}

/// Body of a fenced block when the response is wrapped in one, otherwise the trimmed input.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the info string ("json") up to the first newline
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// A price as models emit it: a number, or a string such as "Rp 5.000".
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PriceField {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedProduct {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: Option<PriceField>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ExtractedProduct {
    /// Convert into a raw record. Items without a name or a positive price are dropped.
    pub fn into_record(self, parser: &PriceParser, location: SourceLocation) -> Option<RawProductRecord> {
        let name = self.name.trim();
        if name.is_empty() {
            return None;
        }

        let price = match self.price? {
            PriceField::Number(value) => Some(value),
            PriceField::Text(text) => parser.parse(&text).map(|reading| reading.value),
        }
        .filter(|p| p.is_finite() && *p > 0.0)?;

        let unit = self
            .unit
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .or_else(|| infer_unit_from_name(name))
            .unwrap_or_else(|| "pcs".to_string());

        Some(RawProductRecord::new(name, Some(price), unit, location).with_category(self.category))
    }
}

/// `{supplier?, products: [...]}` from vision or fallback extraction.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractionPayload {
    #[serde(default)]
    pub supplier: Option<String>,
    #[serde(default)]
    pub products: Vec<ExtractedProduct>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ExtractionShape {
    Object(ExtractionPayload),
    List(Vec<ExtractedProduct>),
}

pub fn decode_extraction(raw: &str) -> Result<ExtractionPayload, ResponseDecodeError> {
    let body = strip_code_fences(raw);
    if body.is_empty() {
        return Err(ResponseDecodeError::Empty);
    }

    let value: serde_json::Value = serde_json::from_str(body)?;
    if !(value.is_object() || value.is_array()) {
        return Err(ResponseDecodeError::UnexpectedShape(format!("expected object or array, got {}", value)));
    }

    match serde_json::from_value::<ExtractionShape>(value)? {
        ExtractionShape::Object(payload) => Ok(ExtractionPayload {
            supplier: payload
                .supplier
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null")),
            products: payload.products,
        }),
        ExtractionShape::List(products) => Ok(ExtractionPayload {
            supplier: None,
            products,
        }),
    }
}

/// One entry of an ID-indexed standardization response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StandardizedItem {
    pub id: usize,
    #[serde(alias = "standardized")]
    pub standardized_name: String,
}

/// Decode `{"results": [...]}` or a bare list. Entries are converted one at a time: an entry
/// without an id or name is skipped, so its id falls back on its own.
pub fn decode_standardization(raw: &str) -> Result<Vec<StandardizedItem>, ResponseDecodeError> {
    let body = strip_code_fences(raw);
    if body.is_empty() {
        return Err(ResponseDecodeError::Empty);
    }

    let value: serde_json::Value = serde_json::from_str(body)?;
    let entries = match value {
        serde_json::Value::Array(entries) => entries,
        serde_json::Value::Object(mut object) => match object.remove("results") {
            Some(serde_json::Value::Array(entries)) => entries,
            _ => {
                return Err(ResponseDecodeError::UnexpectedShape(
                    "expected a \"results\" array".to_string(),
                ))
            }
        },
        other => {
            return Err(ResponseDecodeError::UnexpectedShape(format!(
                "expected object or array, got {}",
                other
            )))
        }
    };

    let items = entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<StandardizedItem>(entry.clone()) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::debug!(entry = %entry, error = %e, "Skipping malformed standardization entry");
                None
            }
        })
        .collect();
    Ok(items)
}
