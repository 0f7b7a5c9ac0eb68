//! Per-run state shared by every pipeline stage of one upload.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use pricebook_models::ProcessingStep;

use crate::cost::CostMonitor;
use crate::progress::ProgressTracker;

#[derive(Clone)]
pub struct RunContext {
    pub upload_id: Uuid,
    pub cancel: CancellationToken,
    pub cost: Arc<CostMonitor>,
    pub progress: Arc<ProgressTracker>,
}

impl RunContext {
    pub fn new(upload_id: Uuid, cancel: CancellationToken, cost: Arc<CostMonitor>, progress: Arc<ProgressTracker>) -> Self {
        Self {
            upload_id,
            cancel,
            cost,
            progress,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn report(&self, step: ProcessingStep, fraction: f64, details: Option<serde_json::Value>) {
        self.progress.report(self.upload_id, step, fraction, details).await;
    }
}
