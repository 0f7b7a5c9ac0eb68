//! VLM (Vision-Language Model) Client
//!
//! OpenAI-compatible chat completions client used for both vision extraction and text calls.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use pricebook_utils::AiConfig;

use crate::ai_client::{AiClient, AiError, AiRequest, AiResponse, TokenUsage};

pub struct VlmClient {
    client: Client,
    api_url: String,
    api_key: String,
    max_tokens: u32,
    temperature: f32,
}

impl VlmClient {
    pub fn new(config: &AiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    fn build_request(&self, request: &AiRequest) -> VlmRequest {
        let mut content = Vec::new();
        if let Some(image) = &request.image {
            content.push(VlmContent::Image {
                image_url: ImageUrl {
                    url: format!("data:{};base64,{}", image.mime_type, BASE64.encode(&image.data)),
                },
            });
        }
        if let Some(text) = &request.text {
            content.push(VlmContent::Text { text: text.clone() });
        }

        VlmRequest {
            model: request.model.clone(),
            messages: vec![
                VlmMessage {
                    role: "system".to_string(),
                    content: vec![VlmContent::Text {
                        text: request.instructions.clone(),
                    }],
                },
                VlmMessage {
                    role: "user".to_string(),
                    content,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            response_format: ResponseFormat {
                kind: "json_object".to_string(),
            },
        }
    }
}

/// Map a non-success HTTP response onto the error classes the retry wrapper understands.
fn classify_status(status: StatusCode, body: &str, retry_after: Option<Duration>) -> AiError {
    let message = format!("{}: {}", status, body.chars().take(300).collect::<String>());
    match status {
        StatusCode::TOO_MANY_REQUESTS if body.contains("insufficient_quota") => AiError::QuotaExhausted(message),
        StatusCode::TOO_MANY_REQUESTS => AiError::RateLimited { message, retry_after },
        StatusCode::PAYMENT_REQUIRED => AiError::QuotaExhausted(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => AiError::Timeout(message),
        s if s.is_server_error() => AiError::Transient(message),
        _ => AiError::Fatal(message),
    }
}

fn classify_transport(error: reqwest::Error) -> AiError {
    if error.is_timeout() {
        AiError::Timeout(error.to_string())
    } else if error.is_connect() || error.is_request() {
        AiError::Transient(error.to_string())
    } else {
        AiError::Fatal(error.to_string())
    }
}

#[async_trait]
impl AiClient for VlmClient {
    async fn invoke(&self, request: AiRequest) -> Result<AiResponse, AiError> {
        let body = self.build_request(&request);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &error_text, retry_after));
        }

        let result: VlmResponse = response.json().await.map_err(classify_transport)?;

        let raw_text = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AiError::Transient("No response content".to_string()))?;

        let usage = result
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        tracing::debug!(
            model = %request.model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "AI call completed"
        );

        Ok(AiResponse { raw_text, usage })
    }
}

/// VLM API request
#[derive(Debug, Serialize)]
struct VlmRequest {
    model: String,
    messages: Vec<VlmMessage>,
    max_tokens: u32,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Serialize)]
struct VlmMessage {
    role: String,
    content: Vec<VlmContent>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum VlmContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    Image { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

/// VLM API response
#[derive(Debug, Deserialize)]
struct VlmResponse {
    choices: Vec<VlmChoice>,
    usage: Option<VlmUsage>,
}

#[derive(Debug, Deserialize)]
struct VlmChoice {
    message: VlmChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct VlmChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VlmUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, r#"{"error":{"code":"insufficient_quota"}}"#, None),
            AiError::QuotaExhausted(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "rate limit", Some(Duration::from_secs(2))),
            AiError::RateLimited { retry_after: Some(_), .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, "", None),
            AiError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "invalid image", None),
            AiError::Fatal(_)
        ));
    }

    #[test]
    fn test_request_puts_image_before_text() {
        let client = VlmClient::new(&AiConfig::default()).unwrap();
        let request = AiRequest::image("gpt-4o", "extract", vec![1, 2, 3], "image/png").with_text("page 1");
        let body = serde_json::to_value(client.build_request(&request)).unwrap();

        let content = &body["messages"][1]["content"];
        assert_eq!(content[0]["type"], "image_url");
        assert!(content[0]["image_url"]["url"].as_str().unwrap().starts_with("data:image/png;base64,"));
        assert_eq!(content[1]["text"], "page 1");
        assert_eq!(body["response_format"]["type"], "json_object");
    }
}
