//! Blob fetching for uploaded documents.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Blob fetch returned HTTP {0}")]
    Status(u16),

    #[error("Document is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },

    #[error("Blob fetch failed: {0}")]
    Transport(String),
}

#[async_trait]
pub trait BlobFetcher: Send + Sync {
    /// Fetch `url`, failing with [`FetchError::TooLarge`] as soon as more than `max_bytes` are seen.
    async fn fetch(&self, url: &str, max_bytes: u64) -> Result<Vec<u8>, FetchError>;
}

pub struct HttpBlobFetcher {
    client: Client,
}

impl HttpBlobFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    async fn fetch_file(path: &str, max_bytes: u64) -> Result<Vec<u8>, FetchError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| FetchError::Transport(format!("{}: {}", path, e)))?;
        if metadata.len() > max_bytes {
            return Err(FetchError::TooLarge {
                size: metadata.len(),
                limit: max_bytes,
            });
        }
        tokio::fs::read(path)
            .await
            .map_err(|e| FetchError::Transport(format!("{}: {}", path, e)))
    }
}

#[async_trait]
impl BlobFetcher for HttpBlobFetcher {
    async fn fetch(&self, url: &str, max_bytes: u64) -> Result<Vec<u8>, FetchError> {
        if let Some(path) = url.strip_prefix("file://") {
            return Self::fetch_file(path, max_bytes).await;
        }

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        if let Some(size) = response.content_length() {
            if size > max_bytes {
                return Err(FetchError::TooLarge { size, limit: max_bytes });
            }
        }

        // the declared length may be missing or wrong, so the limit is enforced while reading
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?
        {
            body.extend_from_slice(&chunk);
            if body.len() as u64 > max_bytes {
                return Err(FetchError::TooLarge {
                    size: body.len() as u64,
                    limit: max_bytes,
                });
            }
        }

        tracing::debug!(url, bytes = body.len(), "Fetched document");
        Ok(body)
    }
}
