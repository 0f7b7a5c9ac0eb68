//! Price-list toolkit
//!
//! Deterministic building blocks for reading supplier price lists: cell-level price parsing,
//! name and unit normalization, header/column detection, CSV and workbook reading, per-sheet
//! extraction and category-aware price validation. Nothing in here calls an AI service.

pub mod price;
pub mod normalize;
pub mod structure;
pub mod reader;
pub mod tabular;
pub mod price_check;

pub use price::{parse_price, PriceParser, PriceReading};
pub use normalize::{clean_name, infer_unit_from_name, is_known_unit, naive_normalize, standardize_unit, translate_tokens};
pub use structure::{looks_like_name, looks_like_price, ColumnMapping, ColumnRole, DetectionMethod, StructureDetector};
pub use reader::{is_blank_row, read_csv, read_workbook, sniff_delimiter, Sheet, TabularFormat};
pub use tabular::{SheetExtraction, SheetOutcome, SkipReason, TabularExtractor};
pub use price_check::{CategoryRule, PriceCheck, PriceRules, PriceValidator, ValidationReport};
