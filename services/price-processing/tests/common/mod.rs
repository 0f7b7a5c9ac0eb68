//! Shared fixtures for pipeline tests: scripted AI client, fake rasterizer and in-memory blobs.

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use serde_json::json;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use pricebook_database::{InMemoryProgressStore, InMemoryStore, PriceStore};
use pricebook_models::UploadRecord;
use pricebook_price_processing::{
    AiClient, AiError, AiRequest, AiResponse, BlobFetcher, FetchError, PageRasterizer, PipelineServices,
    PricePipeline, TokenUsage,
};
use pricebook_utils::AppConfig;

type Responder = dyn Fn(&AiRequest) -> Result<String, AiError> + Send + Sync;

/// AI client answering from a closure and recording every request.
pub struct ScriptedAi {
    responder: Box<Responder>,
    pub calls: AtomicUsize,
    pub requests: Mutex<Vec<AiRequest>>,
}

impl ScriptedAi {
    pub fn new(responder: impl Fn(&AiRequest) -> Result<String, AiError> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Standardization echoes the input names; any other request gets an empty product list.
    pub fn echo() -> Self {
        Self::new(|request| Ok(echo_standardization(request).unwrap_or_else(|| r#"{"products": []}"#.to_string())))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vision_calls(&self) -> usize {
        self.requests.lock().unwrap().iter().filter(|r| r.image.is_some()).count()
    }
}

#[async_trait]
impl AiClient for ScriptedAi {
    async fn invoke(&self, request: AiRequest) -> Result<AiResponse, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = (self.responder)(&request);
        self.requests.lock().unwrap().push(request);
        result.map(|raw_text| AiResponse {
            raw_text,
            usage: TokenUsage {
                prompt_tokens: 1_000,
                completion_tokens: 200,
            },
        })
    }
}

pub fn is_standardization(request: &AiRequest) -> bool {
    request.text.as_deref().map_or(false, |t| t.starts_with(r#"{"items""#))
}

/// `{"results": [...]}` returning every input name unchanged.
pub fn echo_standardization(request: &AiRequest) -> Option<String> {
    if !is_standardization(request) {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(request.text.as_deref()?).ok()?;
    let results: Vec<serde_json::Value> = value["items"]
        .as_array()?
        .iter()
        .map(|item| json!({ "id": item["id"], "standardized_name": item["name"] }))
        .collect();
    Some(json!({ "results": results }).to_string())
}

/// 1-based page number from a vision request's "Page N, part i of n." text.
pub fn vision_page(request: &AiRequest) -> Option<usize> {
    request
        .text
        .as_deref()?
        .strip_prefix("Page ")?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

pub fn white_png() -> Vec<u8> {
    let image = ImageBuffer::from_pixel(8, 8, Rgb([255u8, 255, 255]));
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut buffer, ImageFormat::Png)
        .unwrap();
    buffer.into_inner()
}

/// Reports a fixed page count and renders every page as a small white PNG.
pub struct FakeRasterizer {
    pub pages: usize,
}

#[async_trait]
impl PageRasterizer for FakeRasterizer {
    async fn page_count(&self, _pdf: &[u8]) -> anyhow::Result<usize> {
        Ok(self.pages)
    }

    async fn render_page(&self, _pdf: &[u8], page: usize) -> anyhow::Result<Vec<u8>> {
        anyhow::ensure!(page < self.pages, "page {} out of range", page);
        Ok(white_png())
    }
}

/// Serves blobs from memory without enforcing the size limit, so the pipeline's own check runs.
#[derive(Default)]
pub struct MemoryFetcher {
    blobs: AsyncMutex<HashMap<String, Vec<u8>>>,
    pub delay: Option<Duration>,
}

impl MemoryFetcher {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub async fn put(&self, url: &str, data: Vec<u8>) {
        self.blobs.lock().await.insert(url.to_string(), data);
    }
}

#[async_trait]
impl BlobFetcher for MemoryFetcher {
    async fn fetch(&self, url: &str, _max_bytes: u64) -> Result<Vec<u8>, FetchError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.blobs.lock().await.get(url).cloned().ok_or(FetchError::Status(404))
    }
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.extraction.vision_call_spacing_ms = 0;
    config.standardization.batch_delay_ms = 0;
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub ai: Arc<ScriptedAi>,
    pub fetcher: Arc<MemoryFetcher>,
    pub pipeline: Arc<PricePipeline>,
}

impl Harness {
    pub fn new(config: AppConfig, ai: ScriptedAi) -> Self {
        Self::build(config, ai, 1, MemoryFetcher::default())
    }

    pub fn with_pages(config: AppConfig, ai: ScriptedAi, pages: usize) -> Self {
        Self::build(config, ai, pages, MemoryFetcher::default())
    }

    pub fn build(config: AppConfig, ai: ScriptedAi, pages: usize, fetcher: MemoryFetcher) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let ai = Arc::new(ai);
        let fetcher = Arc::new(fetcher);
        let services = PipelineServices {
            store: store.clone(),
            progress_store: Arc::new(InMemoryProgressStore::new()),
            ai: ai.clone(),
            rasterizer: Arc::new(FakeRasterizer { pages }),
            fetcher: fetcher.clone(),
        };
        Self {
            pipeline: Arc::new(PricePipeline::new(&config, services)),
            store,
            ai,
            fetcher,
        }
    }

    pub async fn upload(&self, file_name: &str, mime_type: Option<&str>, data: &[u8]) -> Uuid {
        let url = format!("mem://{}", Uuid::new_v4());
        self.fetcher.put(&url, data.to_vec()).await;
        let mut upload = UploadRecord::new(url, file_name);
        if let Some(mime_type) = mime_type {
            upload = upload.with_mime_type(mime_type);
        }
        self.store.create_upload(&upload).await.unwrap();
        upload.id
    }

    pub async fn upload_record(&self, upload_id: Uuid) -> UploadRecord {
        self.store.get_upload(upload_id).await.unwrap().unwrap()
    }

    pub async fn active_prices(&self) -> usize {
        self.store.prices().await.iter().filter(|p| p.is_active()).count()
    }
}

pub const SCENARIO_CSV: &[u8] = b"Name,Price,Unit\nTomato,\"Rp 5.000\",kg\n,,\nOnion,\"Rp 3.000\",kg\n";
