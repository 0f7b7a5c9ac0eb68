//! Upload progress state machine.
//!
//! Progress only moves forward for a given run: a lower percentage or an earlier step
//! reported after a later one is ignored. Terminal records accept no further updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStep {
    Queued,
    Uploading,
    Extracting,
    AiStandardizing,
    Saving,
    Completed,
    Failed,
}

impl ProcessingStep {
    /// Percentage band owned by the step.
    pub fn band(&self) -> (u8, u8) {
        match self {
            Self::Queued => (0, 0),
            Self::Uploading => (0, 10),
            Self::Extracting => (10, 30),
            Self::AiStandardizing => (30, 70),
            Self::Saving => (70, 100),
            Self::Completed => (100, 100),
            Self::Failed => (0, 100),
        }
    }

    /// Map a fraction of the step's work to an absolute percentage.
    pub fn at(&self, fraction: f64) -> u8 {
        let (low, high) = self.band();
        let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.0 };
        low + ((high - low) as f64 * fraction).round() as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Uploading => "uploading",
            Self::Extracting => "extracting",
            Self::AiStandardizing => "ai_standardizing",
            Self::Saving => "saving",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for ProcessingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadProgress {
    pub upload_id: Uuid,
    pub current_step: ProcessingStep,
    pub progress: u8,
    pub status: ProgressStatus,
    pub details: Option<serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

impl UploadProgress {
    pub fn new(upload_id: Uuid) -> Self {
        Self {
            upload_id,
            current_step: ProcessingStep::Queued,
            progress: 0,
            status: ProgressStatus::Processing,
            details: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != ProgressStatus::Processing
    }

    /// Apply a stage report. Returns `false` when the report was ignored entirely.
    pub fn advance(
        &mut self,
        step: ProcessingStep,
        progress: u8,
        details: Option<serde_json::Value>,
    ) -> bool {
        if self.is_terminal() {
            return false;
        }

        let progress = progress.min(100);
        if step < self.current_step && progress <= self.progress {
            return false;
        }

        if step > self.current_step {
            self.current_step = step;
        }
        self.progress = self.progress.max(progress);
        if details.is_some() {
            self.details = details;
        }

        match step {
            ProcessingStep::Completed => {
                self.progress = 100;
                self.status = ProgressStatus::Completed;
            }
            ProcessingStep::Failed => {
                self.current_step = ProcessingStep::Failed;
                self.status = ProgressStatus::Failed;
            }
            _ => {}
        }

        self.updated_at = Utc::now();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_never_decreases() {
        let mut progress = UploadProgress::new(Uuid::new_v4());
        assert!(progress.advance(ProcessingStep::Extracting, 25, None));
        progress.advance(ProcessingStep::Extracting, 15, None);
        assert_eq!(progress.progress, 25);

        progress.advance(ProcessingStep::Uploading, 10, None);
        assert_eq!(progress.current_step, ProcessingStep::Extracting);
        assert_eq!(progress.progress, 25);
    }

    #[test]
    fn test_terminal_ignores_updates() {
        let mut progress = UploadProgress::new(Uuid::new_v4());
        progress.advance(ProcessingStep::Completed, 100, None);
        assert!(progress.is_terminal());
        assert!(!progress.advance(ProcessingStep::Saving, 80, None));
        assert_eq!(progress.progress, 100);
    }

    #[test]
    fn test_failure_keeps_reached_percentage() {
        let mut progress = UploadProgress::new(Uuid::new_v4());
        progress.advance(ProcessingStep::AiStandardizing, 45, None);
        progress.advance(ProcessingStep::Failed, 0, Some(serde_json::json!({"error": "boom"})));
        assert_eq!(progress.status, ProgressStatus::Failed);
        assert_eq!(progress.progress, 45);
    }

    #[test]
    fn test_step_bands() {
        assert_eq!(ProcessingStep::Extracting.at(0.0), 10);
        assert_eq!(ProcessingStep::Extracting.at(1.0), 30);
        assert_eq!(ProcessingStep::AiStandardizing.at(0.5), 50);
        assert_eq!(ProcessingStep::Saving.at(2.0), 100);
    }
}
