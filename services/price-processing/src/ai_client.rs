//! AI capability contract.
//!
//! Extraction, fallback and standardization talk to a language or vision model only through
//! [`AiClient`]. Errors are classified so callers can tell transient failures from quota
//! exhaustion.

use async_trait::async_trait;
use pricebook_models::RunError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// An image attached to a request.
#[derive(Debug, Clone)]
pub struct AiImage {
    pub data: Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug, Clone)]
pub struct AiRequest {
    pub model: String,
    pub instructions: String,
    pub text: Option<String>,
    pub image: Option<AiImage>,
}

impl AiRequest {
    pub fn text(model: impl Into<String>, instructions: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            instructions: instructions.into(),
            text: Some(text.into()),
            image: None,
        }
    }

    pub fn image(
        model: impl Into<String>,
        instructions: impl Into<String>,
        data: Vec<u8>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            instructions: instructions.into(),
            text: None,
            image: Some(AiImage {
                data,
                mime_type: mime_type.into(),
            }),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct AiResponse {
    pub raw_text: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Error)]
pub enum AiError {
    #[error("AI call timed out: {0}")]
    Timeout(String),

    #[error("Transient AI failure: {0}")]
    Transient(String),

    #[error("AI rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("AI quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("AI budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("AI call failed: {0}")]
    Fatal(String),
}

impl AiError {
    /// Worth another attempt after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transient(_) | Self::RateLimited { .. })
    }

    /// No further AI work should be scheduled in this run.
    pub fn stops_ai_work(&self) -> bool {
        matches!(self, Self::QuotaExhausted(_) | Self::BudgetExceeded(_))
    }

    /// Entry for the upload error list.
    pub fn to_run_error(&self) -> RunError {
        match self {
            Self::QuotaExhausted(message) => RunError::quota_exhausted(message.clone()),
            _ => RunError::external_service(self.to_string()),
        }
    }
}

#[async_trait]
pub trait AiClient: Send + Sync {
    async fn invoke(&self, request: AiRequest) -> Result<AiResponse, AiError>;
}
