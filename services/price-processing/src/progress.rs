//! Progress Tracker
//!
//! Holds the live [`UploadProgress`] of every upload in memory and mirrors each change to a
//! [`ProgressStore`] so pollers in other processes see it. Only the task running an upload
//! reports for it. Terminal records stay readable for the retention window and are then evicted.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use pricebook_database::ProgressStore;
use pricebook_models::{ProcessingStep, UploadProgress};

pub struct ProgressTracker {
    records: RwLock<HashMap<Uuid, UploadProgress>>,
    store: Arc<dyn ProgressStore>,
    retention: Duration,
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn ProgressStore>, retention: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            store,
            retention,
        }
    }

    /// Reset the record for a fresh run of `upload_id`.
    pub async fn start(&self, upload_id: Uuid) {
        let progress = UploadProgress::new(upload_id);
        self.records.write().await.insert(upload_id, progress.clone());
        self.persist(&progress).await;
    }

    /// Report `fraction` of `step`'s work. Regressions are ignored.
    pub async fn report(&self, upload_id: Uuid, step: ProcessingStep, fraction: f64, details: Option<serde_json::Value>) {
        self.apply(upload_id, step, step.at(fraction), details).await;
    }

    pub async fn complete(&self, upload_id: Uuid, details: Option<serde_json::Value>) {
        self.apply(upload_id, ProcessingStep::Completed, 100, details).await;
    }

    pub async fn fail(&self, upload_id: Uuid, details: serde_json::Value) {
        self.apply(upload_id, ProcessingStep::Failed, 0, Some(details)).await;
    }

    async fn apply(&self, upload_id: Uuid, step: ProcessingStep, percent: u8, details: Option<serde_json::Value>) {
        let snapshot = {
            let mut records = self.records.write().await;
            let progress = records
                .entry(upload_id)
                .or_insert_with(|| UploadProgress::new(upload_id));
            if !progress.advance(step, percent, details) {
                return;
            }
            progress.clone()
        };

        tracing::debug!(
            upload_id = %upload_id,
            step = %snapshot.current_step,
            progress = snapshot.progress,
            "Progress updated"
        );
        self.persist(&snapshot).await;
    }

    async fn persist(&self, progress: &UploadProgress) {
        // twice the retention so the durable copy outlives eviction from memory
        let ttl = self.retention.saturating_mul(2).max(Duration::from_secs(60));
        if let Err(e) = self.store.save(progress, ttl).await {
            tracing::warn!(upload_id = %progress.upload_id, error = %e, "Failed to persist progress");
        }
    }

    /// Current progress, from memory or the durable store.
    pub async fn get(&self, upload_id: Uuid) -> Option<UploadProgress> {
        if let Some(progress) = self.records.read().await.get(&upload_id) {
            return Some(progress.clone());
        }
        match self.store.load(upload_id).await {
            Ok(progress) => progress,
            Err(e) => {
                tracing::warn!(upload_id = %upload_id, error = %e, "Failed to load progress");
                None
            }
        }
    }

    /// Drop terminal records older than the retention window. Returns how many were evicted.
    pub async fn evict_expired(&self) -> usize {
        let retention = chrono::Duration::from_std(self.retention).unwrap_or_else(|_| chrono::Duration::zero());
        let cutoff = Utc::now() - retention;

        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, progress| !(progress.is_terminal() && progress.updated_at <= cutoff));
        let evicted = before - records.len();

        if evicted > 0 {
            tracing::info!(evicted, remaining = records.len(), "Evicted finished progress records");
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pricebook_database::InMemoryProgressStore;
    use pricebook_models::ProgressStatus;

    fn tracker(retention: Duration) -> (ProgressTracker, Arc<InMemoryProgressStore>) {
        let store = Arc::new(InMemoryProgressStore::new());
        (ProgressTracker::new(store.clone(), retention), store)
    }

    #[tokio::test]
    async fn test_reports_are_monotonic_and_persisted() {
        let (tracker, store) = tracker(Duration::from_secs(600));
        let id = Uuid::new_v4();
        tracker.start(id).await;

        tracker.report(id, ProcessingStep::AiStandardizing, 0.5, None).await;
        tracker.report(id, ProcessingStep::Extracting, 1.0, None).await;

        let progress = tracker.get(id).await.unwrap();
        assert_eq!(progress.current_step, ProcessingStep::AiStandardizing);
        assert_eq!(progress.progress, 50);
        assert_eq!(store.load(id).await.unwrap().unwrap().progress, 50);
    }

    #[tokio::test]
    async fn test_start_resets_for_a_fresh_run() {
        let (tracker, _) = tracker(Duration::from_secs(600));
        let id = Uuid::new_v4();
        tracker.start(id).await;
        tracker.complete(id, None).await;
        assert_eq!(tracker.get(id).await.unwrap().status, ProgressStatus::Completed);

        tracker.start(id).await;
        let progress = tracker.get(id).await.unwrap();
        assert_eq!(progress.progress, 0);
        assert_eq!(progress.status, ProgressStatus::Processing);
    }

    #[tokio::test]
    async fn test_terminal_records_are_evicted_after_retention() {
        let (tracker, store) = tracker(Duration::ZERO);
        let running = Uuid::new_v4();
        let finished = Uuid::new_v4();
        tracker.start(running).await;
        tracker.start(finished).await;
        tracker.fail(finished, serde_json::json!({"error": "boom"})).await;

        assert_eq!(tracker.evict_expired().await, 1);
        assert!(tracker.records.read().await.contains_key(&running));
        // the durable copy is still readable by pollers
        assert_eq!(store.load(finished).await.unwrap().unwrap().status, ProgressStatus::Failed);
    }
}
