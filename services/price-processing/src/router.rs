//! Document routing.
//!
//! A document's kind is decided from its declared MIME type, then its extension, and selects
//! the extractor variant that reads it.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use pricebook_models::{RawProductRecord, RunError};
use pricebook_utils::{file_extension, PipelineConfig, TabularFormat};

use crate::completeness::Completeness;
use crate::context::RunContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Spreadsheet,
    Csv,
    Pdf,
    Image,
}

impl DocumentKind {
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        let mime = mime_type.split(';').next().unwrap_or("").trim().to_lowercase();
        match mime.as_str() {
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" | "application/vnd.ms-excel" => {
                Some(Self::Spreadsheet)
            }
            "text/csv" | "application/csv" | "text/comma-separated-values" => Some(Self::Csv),
            "application/pdf" => Some(Self::Pdf),
            m if m.starts_with("image/") => Some(Self::Image),
            _ => None,
        }
    }

    pub fn from_file_name(file_name: &str) -> Option<Self> {
        match file_extension(file_name)?.as_str() {
            "xlsx" | "xls" => Some(Self::Spreadsheet),
            "csv" => Some(Self::Csv),
            "pdf" => Some(Self::Pdf),
            "png" | "jpg" | "jpeg" | "webp" => Some(Self::Image),
            _ => None,
        }
    }

    /// MIME type first; the extension decides when the MIME type is missing or generic.
    pub fn detect(mime_type: Option<&str>, file_name: &str) -> Option<Self> {
        mime_type
            .and_then(Self::from_mime)
            .or_else(|| Self::from_file_name(file_name))
    }

    pub fn is_tabular(&self) -> bool {
        matches!(self, Self::Spreadsheet | Self::Csv)
    }

    pub fn size_limit(&self, config: &PipelineConfig) -> u64 {
        if self.is_tabular() {
            config.max_tabular_bytes
        } else {
            config.max_document_bytes
        }
    }

    /// Workbook format, with `.xls` told apart from `.xlsx` by extension.
    pub fn tabular_format(&self, file_name: &str) -> Option<TabularFormat> {
        match self {
            Self::Csv => Some(TabularFormat::Csv),
            Self::Spreadsheet => match file_extension(file_name).as_deref() {
                Some("xls") => Some(TabularFormat::Xls),
                _ => Some(TabularFormat::Xlsx),
            },
            Self::Pdf | Self::Image => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spreadsheet => "spreadsheet",
            Self::Csv => "csv",
            Self::Pdf => "pdf",
            Self::Image => "image",
        }
    }
}

/// A fetched document.
#[derive(Debug, Clone)]
pub struct Document {
    pub file_name: String,
    pub kind: DocumentKind,
    pub data: Vec<u8>,
}

/// What an extractor variant produced for a whole document.
#[derive(Debug, Clone, Default)]
pub struct ExtractionResult {
    pub records: Vec<RawProductRecord>,
    pub supplier_name: Option<String>,
    pub method: String,
    pub completeness: Completeness,
    pub fallback_used: bool,
    pub skipped_sheets: Vec<String>,
    pub skipped_pages: Vec<usize>,
    pub errors: Vec<RunError>,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, document: &Document, ctx: &RunContext) -> anyhow::Result<ExtractionResult>;
}

pub struct ExtractorRouter {
    tabular: Arc<dyn Extractor>,
    vision: Arc<dyn Extractor>,
}

impl ExtractorRouter {
    pub fn new(tabular: Arc<dyn Extractor>, vision: Arc<dyn Extractor>) -> Self {
        Self { tabular, vision }
    }

    pub fn route(&self, kind: DocumentKind) -> &dyn Extractor {
        match kind {
            DocumentKind::Spreadsheet | DocumentKind::Csv => self.tabular.as_ref(),
            DocumentKind::Pdf | DocumentKind::Image => self.vision.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_takes_precedence() {
        assert_eq!(
            DocumentKind::detect(Some("application/pdf"), "scan.png"),
            Some(DocumentKind::Pdf)
        );
        assert_eq!(
            DocumentKind::detect(Some("application/octet-stream"), "list.XLSX"),
            Some(DocumentKind::Spreadsheet)
        );
        assert_eq!(DocumentKind::detect(Some("text/csv; charset=utf-8"), "x"), Some(DocumentKind::Csv));
        assert_eq!(DocumentKind::detect(None, "photo.jpeg"), Some(DocumentKind::Image));
        assert_eq!(DocumentKind::detect(None, "notes.docx"), None);
    }

    #[test]
    fn test_size_limits_per_kind() {
        let config = PipelineConfig::default();
        assert_eq!(DocumentKind::Csv.size_limit(&config), 10 * 1024 * 1024);
        assert_eq!(DocumentKind::Pdf.size_limit(&config), 25 * 1024 * 1024);
    }

    #[test]
    fn test_xls_format() {
        assert_eq!(
            DocumentKind::Spreadsheet.tabular_format("old.xls"),
            Some(TabularFormat::Xls)
        );
        assert_eq!(DocumentKind::Pdf.tabular_format("a.pdf"), None);
    }
}
