//! Upload run models: status, error taxonomy and metrics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::product::ConsolidatedProductGroup;

/// Overall outcome of processing one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Processing,
    Completed,
    CompletedWithErrors,
    Failed,
    PendingReview,
    TooLarge,
    Rejected,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed_with_errors",
            Self::Failed => "failed",
            Self::PendingReview => "pending_review",
            Self::TooLarge => "too_large",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "completed_with_errors" => Some(Self::CompletedWithErrors),
            "failed" => Some(Self::Failed),
            "pending_review" => Some(Self::PendingReview),
            "too_large" => Some(Self::TooLarge),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// No further pipeline work happens for the upload.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithErrors | Self::Failed | Self::TooLarge | Self::Rejected
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No identifiable columns, sheet skipped.
    Structural,
    /// Record dropped by price validation.
    Validation,
    /// Timeout or server error from an external service after retries.
    ExternalService,
    /// AI quota exhausted; AI work paused for the run.
    QuotaExhausted,
    /// Inconsistent data that did not block persistence.
    ConsolidationConflict,
    /// Store write failed for one product.
    Persistence,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structural => "structural",
            Self::Validation => "validation",
            Self::ExternalService => "external_service",
            Self::QuotaExhausted => "quota_exhausted",
            Self::ConsolidationConflict => "consolidation_conflict",
            Self::Persistence => "persistence",
        }
    }

    /// Warnings are surfaced but never count as a run failure.
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::ConsolidationConflict)
    }
}

/// One entry of the per-upload error list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub kind: ErrorKind,
    pub message: String,
    pub location: Option<String>,
}

impl RunError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
        }
    }

    pub fn at(mut self, location: impl fmt::Display) -> Self {
        self.location = Some(location.to_string());
        self
    }

    pub fn structural(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Structural, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn external_service(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExternalService, message)
    }

    pub fn quota_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QuotaExhausted, message)
    }

    pub fn consolidation_conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConsolidationConflict, message)
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Persistence, message)
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "[{}] {}: {}", self.kind.as_str(), location, self.message),
            None => write!(f, "[{}] {}", self.kind.as_str(), self.message),
        }
    }
}

/// Counters and diagnostics recorded for an upload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadMetrics {
    pub extraction_method: Option<String>,
    pub detected_rows: usize,
    pub processed_rows: usize,
    pub completeness: f64,
    pub fallback_used: bool,
    pub extracted_products: usize,
    pub valid_products: usize,
    pub consolidated_products: usize,
    pub saved_products: usize,
    pub unchanged_prices: usize,
    pub skipped_sheets: Vec<String>,
    pub skipped_pages: Vec<usize>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
    pub content_sha256: Option<String>,
    pub supplier_name: Option<String>,
    pub errors: Vec<RunError>,
}

impl UploadMetrics {
    pub fn push_error(&mut self, error: RunError) {
        self.errors.push(error);
    }

    pub fn has_failures(&self) -> bool {
        self.errors.iter().any(|e| !e.kind.is_warning())
    }

    pub fn quota_exhausted(&self) -> bool {
        self.errors.iter().any(|e| e.kind == ErrorKind::QuotaExhausted)
    }
}

/// Upload row as seen by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub id: Uuid,
    pub file_url: String,
    pub file_name: String,
    pub mime_type: Option<String>,
    pub supplier_hint: Option<String>,
    pub supplier_id: Option<Uuid>,
    pub status: RunStatus,
    pub metrics: Option<UploadMetrics>,
    /// Consolidated groups waiting for a review decision.
    pub staged_groups: Option<Vec<ConsolidatedProductGroup>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadRecord {
    pub fn new(file_url: impl Into<String>, file_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            file_url: file_url.into(),
            file_name: file_name.into(),
            mime_type: None,
            supplier_hint: None,
            supplier_id: None,
            status: RunStatus::Pending,
            metrics: None,
            staged_groups: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_supplier_hint(mut self, supplier: impl Into<String>) -> Self {
        self.supplier_hint = Some(supplier.into());
        self
    }
}

/// Final status from what was saved and what went wrong.
///
/// Partial success is `CompletedWithErrors`, never `Failed` and never plain `Completed`.
pub fn derive_run_status(saved_products: usize, errors: &[RunError]) -> RunStatus {
    let failures = errors.iter().filter(|e| !e.kind.is_warning()).count();
    match (saved_products, failures) {
        (0, 0) => RunStatus::Completed,
        (0, _) => RunStatus::Failed,
        (_, 0) => RunStatus::Completed,
        _ => RunStatus::CompletedWithErrors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_success_is_completed_with_errors() {
        let errors = vec![RunError::quota_exhausted("quota hit on page 3").at("page 3")];
        assert_eq!(derive_run_status(12, &errors), RunStatus::CompletedWithErrors);
    }

    #[test]
    fn test_nothing_saved_with_errors_is_failed() {
        let errors = vec![RunError::structural("no columns")];
        assert_eq!(derive_run_status(0, &errors), RunStatus::Failed);
    }

    #[test]
    fn test_conflicts_do_not_degrade_status() {
        let errors = vec![RunError::consolidation_conflict("inverted range")];
        assert_eq!(derive_run_status(3, &errors), RunStatus::Completed);
    }

    #[test]
    fn test_status_round_trip_names() {
        for status in [
            RunStatus::Completed,
            RunStatus::CompletedWithErrors,
            RunStatus::Failed,
            RunStatus::PendingReview,
            RunStatus::TooLarge,
        ] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert!(RunStatus::TooLarge.is_terminal());
        assert!(!RunStatus::PendingReview.is_terminal());
    }

    #[test]
    fn test_run_error_display() {
        let error = RunError::validation("price below global minimum").at("sheet 'A' row 4");
        assert_eq!(error.to_string(), "[validation] sheet 'A' row 4: price below global minimum");
    }
}
