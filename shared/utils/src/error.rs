use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Run-level failures. Per-record and per-unit problems are not errors here; they are recorded
/// as `RunError` entries on the upload and the run carries on.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum PricebookError {
    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Document processing error: {message}")]
    DocumentProcessing { message: String },

    #[error("Unsupported document: {message}")]
    UnsupportedDocument { message: String },

    #[error("Document too large: {size} bytes exceeds {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("External service error: {service} - {message}")]
    ExternalService { service: String, message: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Cancelled: {message}")]
    Cancelled { message: String },

    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl PricebookError {
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Store failures arrive as `anyhow` chains; keep the whole chain in the message.
    pub fn store(error: anyhow::Error) -> Self {
        Self::database(format!("{:#}", error))
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn document_processing(message: impl Into<String>) -> Self {
        Self::DocumentProcessing {
            message: message.into(),
        }
    }

    pub fn unsupported_document(message: impl Into<String>) -> Self {
        Self::UnsupportedDocument {
            message: message.into(),
        }
    }

    pub fn too_large(size: u64, limit: u64) -> Self {
        Self::TooLarge { size, limit }
    }

    pub fn external_service(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Database { .. } => "DATABASE_ERROR",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::DocumentProcessing { .. } => "DOCUMENT_PROCESSING_ERROR",
            Self::UnsupportedDocument { .. } => "UNSUPPORTED_DOCUMENT",
            Self::TooLarge { .. } => "DOCUMENT_TOO_LARGE",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::Cancelled { .. } => "CANCELLED",
            Self::Internal { .. } => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } | Self::Cancelled { .. } => 409,
            Self::TooLarge { .. } => 413,
            Self::UnsupportedDocument { .. } => 415,
            Self::DocumentProcessing { .. } => 422,
            Self::ExternalService { .. } => 502,
            Self::Database { .. } | Self::Internal { .. } => 500,
        }
    }

    /// Structured fields a client can act on without parsing the message.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Validation { field, .. } => Some(json!({ "field": field })),
            Self::TooLarge { size, limit } => Some(json!({ "size": size, "limit": limit })),
            Self::ExternalService { service, .. } => Some(json!({ "service": service })),
            _ => None,
        }
    }
}

pub type PricebookResult<T> = Result<T, PricebookError>;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl From<PricebookError> for ErrorResponse {
    fn from(error: PricebookError) -> Self {
        Self {
            error: error.error_code().to_lowercase(),
            code: error.error_code().to_string(),
            details: error.details(),
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_too_large_response_carries_limits() {
        let response = ErrorResponse::from(PricebookError::too_large(12_000_000, 10_485_760));
        assert_eq!(response.code, "DOCUMENT_TOO_LARGE");
        assert_eq!(response.details, Some(json!({ "size": 12_000_000, "limit": 10_485_760 })));
    }

    #[test]
    fn test_store_error_keeps_context_chain() {
        let error = anyhow::anyhow!("connection reset").context("Failed to upsert product 'tomato'");
        let mapped = PricebookError::store(error);
        assert_eq!(mapped.http_status_code(), 500);
        assert!(mapped.to_string().contains("Failed to upsert product 'tomato': connection reset"));
    }
}
