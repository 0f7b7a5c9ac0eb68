//! Structure Detector
//!
//! Infers which columns of a raw sheet hold the product name, price, unit and category, and
//! where the header and the data start. A keyword-scored header row is preferred; when no row
//! scores high enough the roles are inferred from cell contents instead.

use serde::{Deserialize, Serialize};

use super::normalize::is_known_unit;
use super::price::parse_price;
use crate::config::ExtractionConfig;

/// Header cells longer than this are sentences, not column titles.
const MAX_HEADER_CELL_LEN: usize = 40;
/// Minimum fraction of sampled cells that must look right for a content-inferred role.
const MIN_CONTENT_SCORE: f64 = 0.5;
/// Number of roles a header can name; the header score is normalized by it.
const ROLE_COUNT: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    Name,
    Price,
    Unit,
    Category,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// Every role came from header keywords.
    Header,
    /// A header was found but name or price had to be inferred from the rows below it.
    HeaderWithContent,
    /// No header row; roles inferred from content only.
    Content,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub name_column: usize,
    pub price_column: usize,
    pub unit_column: Option<usize>,
    pub category_column: Option<usize>,
    pub header_row_index: Option<usize>,
    pub data_start_row_index: usize,
    pub method: DetectionMethod,
}

#[derive(Debug, Default, Clone, Copy)]
struct PartialMapping {
    name: Option<usize>,
    price: Option<usize>,
    unit: Option<usize>,
    category: Option<usize>,
}

impl PartialMapping {
    fn assigned(&self) -> [Option<usize>; 4] {
        [self.name, self.price, self.unit, self.category]
    }

    fn is_taken(&self, column: usize) -> bool {
        self.assigned().contains(&Some(column))
    }

    fn set(&mut self, role: ColumnRole, column: usize) {
        let slot = match role {
            ColumnRole::Name => &mut self.name,
            ColumnRole::Price => &mut self.price,
            ColumnRole::Unit => &mut self.unit,
            ColumnRole::Category => &mut self.category,
        };
        if slot.is_none() {
            *slot = Some(column);
        }
    }
}

/// Column detector with English and Indonesian keyword tables.
pub struct StructureDetector {
    header_scan_rows: usize,
    content_sample_rows: usize,
    header_threshold: f64,
    name_keywords: Vec<&'static str>,
    price_keywords: Vec<&'static str>,
    unit_keywords: Vec<&'static str>,
    category_keywords: Vec<&'static str>,
}

impl Default for StructureDetector {
    fn default() -> Self {
        Self::new(&ExtractionConfig::default())
    }
}

impl StructureDetector {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            header_scan_rows: config.header_scan_rows,
            content_sample_rows: config.content_sample_rows,
            header_threshold: config.header_threshold,
            name_keywords: vec![
                "name", "nama", "product", "produk", "item", "items", "barang", "description",
                "deskripsi", "keterangan", "commodity", "komoditas", "article", "artikel",
            ],
            price_keywords: vec![
                "price", "prices", "harga", "rp", "idr", "cost", "rate", "tarif", "amount",
                "unit price", "harga satuan", "harga jual",
            ],
            unit_keywords: vec!["unit", "satuan", "uom", "sat", "kemasan", "packing", "pack size"],
            category_keywords: vec![
                "category", "kategori", "jenis", "group", "kelompok", "type", "tipe", "class",
            ],
        }
    }

    /// Detect column roles from the leading rows of a sheet.
    ///
    /// Returns `None` when no name or no price column can be identified.
    pub fn detect(&self, rows: &[Vec<String>]) -> Option<ColumnMapping> {
        let scan = rows.len().min(self.header_scan_rows);

        let header = (0..scan).find(|&i| self.header_score(&rows[i]) >= self.header_threshold);

        match header {
            Some(header_index) => {
                let mut mapping = PartialMapping::default();
                for (column, cell) in rows[header_index].iter().enumerate() {
                    if let Some(role) = self.classify_header_cell(cell) {
                        mapping.set(role, column);
                    }
                }

                let complete = mapping.name.is_some() && mapping.price.is_some();
                if !complete {
                    self.infer_from_content(rows, header_index + 1, &mut mapping);
                }

                Some(ColumnMapping {
                    name_column: mapping.name?,
                    price_column: mapping.price?,
                    unit_column: mapping.unit,
                    category_column: mapping.category,
                    header_row_index: Some(header_index),
                    data_start_row_index: header_index + 1,
                    method: if complete {
                        DetectionMethod::Header
                    } else {
                        DetectionMethod::HeaderWithContent
                    },
                })
            }
            None => {
                let mut mapping = PartialMapping::default();
                self.infer_from_content(rows, 0, &mut mapping);
                let name_column = mapping.name?;
                let price_column = mapping.price?;

                let data_start_row_index = rows
                    .iter()
                    .position(|row| row.get(price_column).map_or(false, |cell| looks_like_price(cell)))
                    .unwrap_or(0);

                Some(ColumnMapping {
                    name_column,
                    price_column,
                    unit_column: mapping.unit,
                    category_column: mapping.category,
                    header_row_index: None,
                    data_start_row_index,
                    method: DetectionMethod::Content,
                })
            }
        }
    }

    /// Fraction of the four roles named by the row's cells, capped at 1.0.
    pub fn header_score(&self, row: &[String]) -> f64 {
        let matches = row
            .iter()
            .filter(|cell| self.classify_header_cell(cell).is_some())
            .count();
        (matches as f64 / ROLE_COUNT).min(1.0)
    }

    fn classify_header_cell(&self, cell: &str) -> Option<ColumnRole> {
        let cell = cell.trim();
        if cell.is_empty() || cell.chars().count() > MAX_HEADER_CELL_LEN || parse_price(cell).is_some() {
            return None;
        }

        let normalized: String = cell
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        // exact titles first, then keyword containment with price checked before unit
        // so "harga satuan" and "unit price" are prices
        let tables = [
            (ColumnRole::Price, &self.price_keywords),
            (ColumnRole::Category, &self.category_keywords),
            (ColumnRole::Unit, &self.unit_keywords),
            (ColumnRole::Name, &self.name_keywords),
        ];

        for (role, keywords) in tables.iter() {
            if keywords.iter().any(|kw| *kw == normalized) {
                return Some(*role);
            }
        }
        for (role, keywords) in tables.iter() {
            if keywords.iter().any(|kw| contains_keyword(&normalized, kw)) {
                return Some(*role);
            }
        }
        None
    }

    /// Fill missing name/price (and unit, when unassigned) from the rows at or after `start`.
    fn infer_from_content(&self, rows: &[Vec<String>], start: usize, mapping: &mut PartialMapping) {
        let sample: Vec<&Vec<String>> = rows
            .iter()
            .skip(start)
            .filter(|row| row.iter().filter(|c| !c.trim().is_empty()).count() >= 2)
            .take(self.content_sample_rows)
            .collect();

        if sample.is_empty() {
            return;
        }

        let width = sample.iter().map(|row| row.len()).max().unwrap_or(0);
        let score = |column: usize, predicate: fn(&str) -> bool| -> f64 {
            let hits = sample
                .iter()
                .filter(|row| row.get(column).map_or(false, |cell| predicate(cell)))
                .count();
            hits as f64 / sample.len() as f64
        };

        let best = |mapping: &PartialMapping, predicate: fn(&str) -> bool| -> Option<usize> {
            let mut best: Option<(usize, f64)> = None;
            for column in (0..width).filter(|c| !mapping.is_taken(*c)) {
                let s = score(column, predicate);
                if s >= MIN_CONTENT_SCORE && best.map_or(true, |(_, b)| s > b) {
                    best = Some((column, s));
                }
            }
            best.map(|(column, _)| column)
        };

        if mapping.price.is_none() {
            if let Some(column) = best(&*mapping, looks_like_price) {
                mapping.set(ColumnRole::Price, column);
            }
        }
        if mapping.name.is_none() {
            if let Some(column) = best(&*mapping, looks_like_name) {
                mapping.set(ColumnRole::Name, column);
            }
        }
        if mapping.unit.is_none() {
            if let Some(column) = best(&*mapping, |cell| is_known_unit(cell)) {
                mapping.set(ColumnRole::Unit, column);
            }
        }
    }
}

fn contains_keyword(cell: &str, keyword: &str) -> bool {
    if keyword.contains(' ') {
        cell.contains(keyword)
    } else {
        cell.split_whitespace().any(|token| token == keyword)
    }
}

/// A cell that parses as a positive number with at most a currency marker or unit suffix around it.
pub fn looks_like_price(cell: &str) -> bool {
    let lowered = cell.trim().to_lowercase();
    if !matches!(parse_price(&lowered), Some(v) if v > 0.0) {
        return false;
    }
    let letters = lowered
        .replace("rp", "")
        .replace("idr", "")
        .chars()
        .filter(|c| c.is_alphabetic())
        .count();
    letters <= 3
}

/// Mostly alphabetic text longer than three characters.
pub fn looks_like_name(cell: &str) -> bool {
    let cell = cell.trim();
    if cell.chars().count() <= 3 || looks_like_price(cell) {
        return false;
    }
    let alphabetic = cell.chars().filter(|c| c.is_alphabetic()).count();
    let visible = cell.chars().filter(|c| !c.is_whitespace()).count();
    visible > 0 && alphabetic * 2 >= visible
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(data: &[&[&str]]) -> Vec<Vec<String>> {
        data.iter()
            .map(|row| row.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_english_header() {
        let sheet = rows(&[
            &["Name", "Price", "Unit"],
            &["Tomato", "Rp 5.000", "kg"],
            &["Onion", "Rp 3.000", "kg"],
        ]);
        let mapping = StructureDetector::default().detect(&sheet).unwrap();
        assert_eq!(mapping.name_column, 0);
        assert_eq!(mapping.price_column, 1);
        assert_eq!(mapping.unit_column, Some(2));
        assert_eq!(mapping.header_row_index, Some(0));
        assert_eq!(mapping.data_start_row_index, 1);
        assert_eq!(mapping.method, DetectionMethod::Header);
    }

    #[test]
    fn test_indonesian_header_below_title() {
        let sheet = rows(&[
            &["DAFTAR HARGA SAYUR", "", "", ""],
            &["Periode Januari", "", "", ""],
            &["No", "Nama Barang", "Satuan", "Harga Satuan"],
            &["1", "Tomat", "kg", "5.000"],
        ]);
        let mapping = StructureDetector::default().detect(&sheet).unwrap();
        assert_eq!(mapping.header_row_index, Some(2));
        assert_eq!(mapping.name_column, 1);
        assert_eq!(mapping.unit_column, Some(2));
        assert_eq!(mapping.price_column, 3);
    }

    #[test]
    fn test_header_score_threshold() {
        let detector = StructureDetector::default();
        // a single recognized cell is not a header
        assert_eq!(detector.header_score(&["Price".to_string(), "".to_string()]), 0.25);
        assert_eq!(
            detector.header_score(&["Nama".to_string(), "Harga".to_string(), "Satuan".to_string()]),
            0.75
        );
        assert_eq!(detector.header_score(&["50.000".to_string(), "price".to_string()]), 0.25);
    }

    #[test]
    fn test_content_inference_without_header() {
        let sheet = rows(&[
            &["Tomato Red", "kg", "5.000"],
            &["Onion", "kg", "3.500"],
            &["Cabbage", "pcs", "8.000"],
        ]);
        let mapping = StructureDetector::default().detect(&sheet).unwrap();
        assert_eq!(mapping.method, DetectionMethod::Content);
        assert_eq!(mapping.name_column, 0);
        assert_eq!(mapping.price_column, 2);
        assert_eq!(mapping.unit_column, Some(1));
        assert_eq!(mapping.data_start_row_index, 0);
    }

    #[test]
    fn test_header_completed_by_content() {
        let sheet = rows(&[
            &["Produk", "Kategori", "Rupiah"],
            &["Tomat", "Sayur", "5000"],
            &["Bawang Merah", "Sayur", "32000"],
        ]);
        let mapping = StructureDetector::default().detect(&sheet).unwrap();
        assert_eq!(mapping.method, DetectionMethod::HeaderWithContent);
        assert_eq!(mapping.name_column, 0);
        assert_eq!(mapping.category_column, Some(1));
        assert_eq!(mapping.price_column, 2);
    }

    #[test]
    fn test_no_price_column_is_not_found() {
        let sheet = rows(&[
            &["Contact", "Phone"],
            &["Budi", "call us"],
            &["Sari", "email us"],
        ]);
        assert!(StructureDetector::default().detect(&sheet).is_none());
    }
}
