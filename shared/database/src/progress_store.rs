//! Progress Store
//!
//! Durable home of [`UploadProgress`] records so that pollers in other processes can read them.
//! Records are written with an expiry; the in-process tracker decides when to write.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

use pricebook_models::UploadProgress;

use crate::redis::RedisPool;

#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn save(&self, progress: &UploadProgress, ttl: Duration) -> Result<()>;

    async fn load(&self, upload_id: Uuid) -> Result<Option<UploadProgress>>;

    async fn delete(&self, upload_id: Uuid) -> Result<()>;
}

/// JSON values under `{prefix}{upload_id}` with `SET .. EX`.
#[derive(Clone)]
pub struct RedisProgressStore {
    pool: RedisPool,
    prefix: String,
}

impl RedisProgressStore {
    pub fn new(pool: RedisPool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }

    fn key(&self, upload_id: Uuid) -> String {
        format!("{}{}", self.prefix, upload_id)
    }
}

#[async_trait]
impl ProgressStore for RedisProgressStore {
    async fn save(&self, progress: &UploadProgress, ttl: Duration) -> Result<()> {
        let payload = serde_json::to_string(progress).context("Failed to serialize progress")?;
        let mut con = self.pool.clone();

        let _: () = redis::cmd("SET")
            .arg(self.key(progress.upload_id))
            .arg(payload)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut con)
            .await
            .context("Failed to write progress to Redis")?;
        Ok(())
    }

    async fn load(&self, upload_id: Uuid) -> Result<Option<UploadProgress>> {
        let mut con = self.pool.clone();
        let payload: Option<String> = redis::cmd("GET")
            .arg(self.key(upload_id))
            .query_async(&mut con)
            .await
            .context("Failed to read progress from Redis")?;

        payload
            .map(|json| serde_json::from_str(&json).context("Malformed progress record"))
            .transpose()
    }

    async fn delete(&self, upload_id: Uuid) -> Result<()> {
        let mut con = self.pool.clone();
        let _: () = redis::cmd("DEL")
            .arg(self.key(upload_id))
            .query_async(&mut con)
            .await
            .context("Failed to delete progress from Redis")?;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryProgressStore {
    records: Mutex<HashMap<Uuid, (UploadProgress, Instant)>>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn save(&self, progress: &UploadProgress, ttl: Duration) -> Result<()> {
        self.records
            .lock()
            .await
            .insert(progress.upload_id, (progress.clone(), Instant::now() + ttl));
        Ok(())
    }

    async fn load(&self, upload_id: Uuid) -> Result<Option<UploadProgress>> {
        let mut records = self.records.lock().await;
        match records.get(&upload_id) {
            Some((_, expires)) if *expires <= Instant::now() => {
                records.remove(&upload_id);
                Ok(None)
            }
            Some((progress, _)) => Ok(Some(progress.clone())),
            None => Ok(None),
        }
    }

    async fn delete(&self, upload_id: Uuid) -> Result<()> {
        self.records.lock().await.remove(&upload_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pricebook_models::ProcessingStep;

    #[tokio::test]
    async fn test_in_memory_round_trip_and_expiry() {
        let store = InMemoryProgressStore::new();
        let mut progress = UploadProgress::new(Uuid::new_v4());
        progress.advance(ProcessingStep::Extracting, 20, None);

        store.save(&progress, Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.load(progress.upload_id).await.unwrap(), Some(progress.clone()));

        store.save(&progress, Duration::ZERO).await.unwrap();
        assert_eq!(store.load(progress.upload_id).await.unwrap(), None);
    }
}
