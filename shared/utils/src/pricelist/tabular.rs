//! Tabular Extractor
//!
//! Applies the structure detector to each sheet and emits raw product records. Sheets that are
//! obviously not price lists are skipped before any detection so they never reach AI stages.

use pricebook_models::{RawProductRecord, RunError, SourceLocation};
use serde::{Deserialize, Serialize};

use super::normalize::infer_unit_from_name;
use super::price::PriceParser;
use super::reader::{is_blank_row, Sheet};
use super::structure::{looks_like_price, ColumnMapping, StructureDetector};
use crate::config::ExtractionConfig;

/// Why a sheet was not treated as a price sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    TooFewRows,
    Denylisted,
    NoPlausiblePrice,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TooFewRows => "too_few_rows",
            Self::Denylisted => "denylisted",
            Self::NoPlausiblePrice => "no_plausible_price",
        }
    }
}

/// Records pulled from one sheet with the counts completeness is computed from.
#[derive(Debug, Clone)]
pub struct SheetExtraction {
    pub sheet: String,
    pub mapping: ColumnMapping,
    pub records: Vec<RawProductRecord>,
    /// Data rows below the header, excluding blank rows and section headings.
    pub detected_rows: usize,
    pub processed_rows: usize,
    /// Warnings raised while reading cells (inverted price ranges).
    pub warnings: Vec<RunError>,
}

#[derive(Debug, Clone)]
pub enum SheetOutcome {
    Skipped { sheet: String, reason: SkipReason },
    /// Looked like a price sheet but no name or price column could be identified.
    Structural { sheet: String, detected_rows: usize },
    Extracted(SheetExtraction),
}

impl SheetOutcome {
    pub fn sheet(&self) -> &str {
        match self {
            Self::Skipped { sheet, .. } | Self::Structural { sheet, .. } => sheet,
            Self::Extracted(extraction) => &extraction.sheet,
        }
    }
}

pub struct TabularExtractor {
    detector: StructureDetector,
    parser: PriceParser,
    min_sheet_rows: usize,
    min_name_len: usize,
    lookahead_rows: usize,
    plausible_min: f64,
    plausible_max: f64,
    denylist: Vec<String>,
}

impl TabularExtractor {
    pub fn new(config: &ExtractionConfig, expand_shorthand: bool) -> Self {
        Self {
            detector: StructureDetector::new(config),
            parser: PriceParser::new(expand_shorthand),
            min_sheet_rows: config.min_sheet_rows,
            min_name_len: config.min_name_len,
            lookahead_rows: config.lookahead_rows,
            plausible_min: config.plausible_price_min,
            plausible_max: config.plausible_price_max,
            denylist: config.sheet_denylist.iter().map(|d| d.to_lowercase()).collect(),
        }
    }

    pub fn extract(&self, sheets: &[Sheet]) -> Vec<SheetOutcome> {
        sheets.iter().map(|sheet| self.extract_sheet(sheet)).collect()
    }

    /// Pre-checks that decide whether a sheet is worth extracting at all.
    pub fn skip_reason(&self, sheet: &Sheet) -> Option<SkipReason> {
        let non_empty: Vec<&Vec<String>> = sheet.non_empty_rows().map(|(_, row)| row).collect();

        if non_empty.len() < self.min_sheet_rows {
            return Some(SkipReason::TooFewRows);
        }

        if self.is_denylisted(&sheet.name) {
            return Some(SkipReason::Denylisted);
        }
        // a lone title cell such as "Contact Information"
        let title: Vec<&String> = non_empty[0].iter().filter(|c| !c.trim().is_empty()).collect();
        if title.len() == 1 && self.is_denylisted(title[0]) {
            return Some(SkipReason::Denylisted);
        }

        let plausible = non_empty.iter().take(self.lookahead_rows).any(|row| {
            row.iter().any(|cell| {
                self.parser
                    .parse(cell)
                    .map_or(false, |r| r.value >= self.plausible_min && r.value <= self.plausible_max)
            })
        });
        if !plausible {
            return Some(SkipReason::NoPlausiblePrice);
        }

        None
    }

    fn is_denylisted(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.denylist.iter().any(|term| lowered.contains(term.as_str()))
    }

    pub fn extract_sheet(&self, sheet: &Sheet) -> SheetOutcome {
        if let Some(reason) = self.skip_reason(sheet) {
            tracing::info!(sheet = %sheet.name, reason = reason.as_str(), "Skipping non-price sheet");
            return SheetOutcome::Skipped {
                sheet: sheet.name.clone(),
                reason,
            };
        }

        let mapping = match self.detector.detect(&sheet.rows) {
            Some(mapping) => mapping,
            None => {
                let detected_rows = sheet.non_empty_row_count();
                tracing::warn!(sheet = %sheet.name, detected_rows, "No name or price column identified");
                return SheetOutcome::Structural {
                    sheet: sheet.name.clone(),
                    detected_rows,
                };
            }
        };

        let header_name = mapping
            .header_row_index
            .and_then(|i| sheet.rows.get(i))
            .and_then(|row| row.get(mapping.name_column))
            .map(|cell| cell.trim().to_lowercase());

        let mut records = Vec::new();
        let mut warnings = Vec::new();
        let mut detected_rows = 0;
        let mut section: Option<String> = None;

        for (row_index, row) in sheet.rows.iter().enumerate().skip(mapping.data_start_row_index) {
            if is_blank_row(row) {
                continue;
            }

            let cell = |column: usize| row.get(column).map(|c| c.trim()).unwrap_or("");
            let name = cell(mapping.name_column);
            let price_cell = cell(mapping.price_column);

            // repeated header rows on multi-page exports
            if header_name.as_deref() == Some(name.to_lowercase().as_str()) && !looks_like_price(price_cell) {
                continue;
            }

            // a single text cell is a section heading, used as the category for rows below it
            let filled: Vec<&String> = row.iter().filter(|c| !c.trim().is_empty()).collect();
            if filled.len() == 1 && price_cell.is_empty() && !looks_like_price(filled[0]) {
                section = Some(filled[0].trim().to_string());
                continue;
            }

            detected_rows += 1;
            let location = SourceLocation::sheet(&sheet.name, row_index);

            if name.chars().count() < self.min_name_len {
                continue;
            }
            let reading = match self.parser.parse_positive(price_cell) {
                Some(reading) => reading,
                None => continue,
            };
            if reading.inverted_range {
                warnings.push(
                    RunError::consolidation_conflict(format!("inverted price range '{}'", price_cell))
                        .at(&location),
                );
            }

            let unit = mapping
                .unit_column
                .map(|c| cell(c).to_string())
                .filter(|u| !u.is_empty())
                .or_else(|| infer_unit_from_name(name))
                .unwrap_or_else(|| "pcs".to_string());

            let category = mapping
                .category_column
                .map(|c| cell(c).to_string())
                .filter(|c| !c.is_empty())
                .or_else(|| section.clone());

            records.push(RawProductRecord::new(name, Some(reading.value), unit, location).with_category(category));
        }

        let processed_rows = records.len();
        tracing::info!(
            sheet = %sheet.name,
            detected_rows,
            processed_rows,
            method = ?mapping.method,
            "Extracted sheet"
        );

        SheetOutcome::Extracted(SheetExtraction {
            sheet: sheet.name.clone(),
            mapping,
            records,
            detected_rows,
            processed_rows,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricelist::reader::read_csv;
    use proptest::prelude::*;

    fn extractor() -> TabularExtractor {
        TabularExtractor::new(&ExtractionConfig::default(), true)
    }

    fn sheet(name: &str, data: &[&[&str]]) -> Sheet {
        Sheet::new(
            name,
            data.iter()
                .map(|row| row.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    #[test]
    fn test_csv_scenario_two_records() {
        let data = b"Name,Price,Unit\nTomato,Rp 5.000,kg\n,,\nOnion,Rp 3.000,kg\n";
        let sheet = read_csv(data, "prices").unwrap();

        let extraction = match extractor().extract_sheet(&sheet) {
            SheetOutcome::Extracted(extraction) => extraction,
            other => panic!("expected extraction, got {:?}", other),
        };

        assert_eq!(extraction.records.len(), 2);
        assert_eq!(extraction.records[0].name, "Tomato");
        assert_eq!(extraction.records[0].price, Some(5000.0));
        assert_eq!(extraction.records[0].unit, "kg");
        assert_eq!(extraction.records[1].name, "Onion");
        assert_eq!(extraction.records[1].source_location, SourceLocation::sheet("prices", 3));
        assert_eq!(extraction.detected_rows, 2);
        assert_eq!(extraction.processed_rows, 2);
    }

    #[test]
    fn test_two_row_sheet_is_skipped() {
        let s = sheet("Prices", &[&["Name", "Price"], &["Tomato", "5000"]]);
        assert_eq!(extractor().skip_reason(&s), Some(SkipReason::TooFewRows));
    }

    #[test]
    fn test_sheet_without_plausible_price_is_skipped() {
        let s = sheet(
            "Notes",
            &[&["Name", "Price"], &["Tomato", "12"], &["Onion", "call"]],
        );
        assert_eq!(extractor().skip_reason(&s), Some(SkipReason::NoPlausiblePrice));
    }

    #[test]
    fn test_denylisted_sheet_is_skipped() {
        let s = sheet(
            "Kontak",
            &[&["Nama", "Telepon"], &["Budi", "5000"], &["Sari", "6000"]],
        );
        assert_eq!(extractor().skip_reason(&s), Some(SkipReason::Denylisted));
    }

    #[test]
    fn test_invalid_rows_count_as_detected() {
        let s = sheet(
            "Sayur",
            &[
                &["Nama", "Harga", "Satuan"],
                &["Tomat", "5.000", "kg"],
                &["X", "4.000", "kg"],
                &["Kol", "", "kg"],
                &["Wortel", "8rb", "kg"],
            ],
        );
        match extractor().extract_sheet(&s) {
            SheetOutcome::Extracted(extraction) => {
                assert_eq!(extraction.detected_rows, 4);
                assert_eq!(extraction.processed_rows, 2);
                assert_eq!(extraction.records[1].price, Some(8000.0));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_section_rows_become_categories_and_units_are_inferred() {
        let s = sheet(
            "Daftar",
            &[
                &["Nama Barang", "Harga"],
                &["SAYURAN", ""],
                &["Tomat /kg", "5.000"],
                &["BUAH", ""],
                &["Pisang Ambon", "25.000"],
            ],
        );
        match extractor().extract_sheet(&s) {
            SheetOutcome::Extracted(extraction) => {
                assert_eq!(extraction.detected_rows, 2);
                assert_eq!(extraction.records[0].category.as_deref(), Some("SAYURAN"));
                assert_eq!(extraction.records[0].unit, "kg");
                assert_eq!(extraction.records[1].category.as_deref(), Some("BUAH"));
                assert_eq!(extraction.records[1].unit, "pcs");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_inverted_range_is_a_warning() {
        let s = sheet(
            "Harga",
            &[
                &["Produk", "Harga"],
                &["Tomat", "7.500 - 5.000"],
                &["Bawang", "30.000"],
            ],
        );
        match extractor().extract_sheet(&s) {
            SheetOutcome::Extracted(extraction) => {
                assert_eq!(extraction.records[0].price, Some(5000.0));
                assert_eq!(extraction.warnings.len(), 1);
                assert!(extraction.warnings[0].kind.is_warning());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    proptest! {
        #[test]
        fn prop_processed_never_exceeds_detected(
            prices in proptest::collection::vec(prop_oneof![
                Just(String::new()),
                Just("abc".to_string()),
                (1_000u32..900_000).prop_map(|p| p.to_string()),
            ], 3..20)
        ) {
            let mut rows = vec![vec!["Name".to_string(), "Price".to_string()]];
            rows.push(vec!["Anchor".to_string(), "5000".to_string()]);
            for (i, price) in prices.iter().enumerate() {
                rows.push(vec![format!("Item {}", i), price.clone()]);
            }
            let sheet = Sheet::new("p", rows);
            if let SheetOutcome::Extracted(extraction) = extractor().extract_sheet(&sheet) {
                prop_assert!(extraction.processed_rows <= extraction.detected_rows);
                prop_assert_eq!(extraction.processed_rows, extraction.records.len());
            }
        }
    }
}
