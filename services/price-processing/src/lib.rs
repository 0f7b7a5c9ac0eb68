//! # Pricebook Price Processing
//!
//! Turns supplier price lists (spreadsheets, CSV, PDF, images) into versioned catalogue prices.
//!
//! A run for one upload goes through:
//!
//! - **Routing**: MIME type or extension selects the tabular or vision extractor
//! - **Extraction**: structural column detection for sheets, a vision model for pages, and an
//!   LLM fallback when completeness is too low
//! - **Validation**: global bounds reject records, category ranges lower confidence
//! - **Standardization**: memo cache, similarity index, then ID-indexed AI batches
//! - **Consolidation**: one group per `(name, unit)`, cheapest price wins
//! - **Versioning**: duplicate suppression, history and a single active price per supplier
//!
//! Every AI call goes through [`gateway::AiGateway`], which applies retries, the quota cooldown,
//! the run budget and cost metering.

pub mod ai_client;
pub mod blob;
pub mod completeness;
pub mod consolidator;
pub mod context;
pub mod cost;
pub mod extract;
pub mod fallback;
pub mod gateway;
pub mod pipeline;
pub mod progress;
pub mod rasterizer;
pub mod response;
pub mod retry;
pub mod router;
pub mod similarity;
pub mod standardizer;
pub mod versioning;
pub mod vision;
pub mod vlm_client;

pub use ai_client::{AiClient, AiError, AiRequest, AiResponse, TokenUsage};
pub use blob::{BlobFetcher, FetchError, HttpBlobFetcher};
pub use cost::{CostMonitor, CostSummary};
pub use pipeline::{PipelineServices, PricePipeline, RunReport};
pub use progress::ProgressTracker;
pub use rasterizer::{PageRasterizer, PdftoppmRasterizer};
pub use router::DocumentKind;
pub use vlm_client::VlmClient;
