//! Supplier models.
//!
//! The pipeline only needs suppliers as a foreign key; matching is by normalized name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, Validate)]
pub struct Supplier {
    pub id: Uuid,
    #[validate(length(min = 1, max = 255, message = "Supplier name must be between 1 and 255 characters"))]
    pub name: String,
    pub normalized_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Supplier {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into().trim().to_string();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            normalized_name: normalize_supplier_name(&name),
            name,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Lowercase, drop legal-entity affixes and collapse whitespace so that
/// "PT Sumber Segar", "Sumber Segar, PT" and "SUMBER SEGAR" match.
pub fn normalize_supplier_name(name: &str) -> String {
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();

    let mut words: Vec<&str> = cleaned.split_whitespace().collect();

    const PREFIXES: &[&str] = &["pt", "cv", "ud", "tb", "toko"];
    const SUFFIXES: &[&str] = &["tbk", "inc", "llc", "ltd", "corp", "co", "pt", "cv"];

    while words.len() > 1 && PREFIXES.contains(&words[0]) {
        words.remove(0);
    }
    while words.len() > 1 && words.last().map_or(false, |w| SUFFIXES.contains(w)) {
        words.pop();
    }

    words.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supplier_name_normalization() {
        assert_eq!(normalize_supplier_name("PT Sumber Segar"), "sumber segar");
        assert_eq!(normalize_supplier_name("Sumber Segar, PT"), "sumber segar");
        assert_eq!(normalize_supplier_name("  SUMBER   SEGAR "), "sumber segar");
        assert_eq!(normalize_supplier_name("Acme Corp."), "acme");
        // a bare affix is still a name
        assert_eq!(normalize_supplier_name("Toko"), "toko");
    }

    #[test]
    fn test_new_supplier_is_valid() {
        let supplier = Supplier::new("CV Tani Makmur");
        assert_eq!(supplier.normalized_name, "tani makmur");
        assert!(supplier.validate().is_ok());
        assert!(Supplier::new("").validate().is_err());
    }
}
