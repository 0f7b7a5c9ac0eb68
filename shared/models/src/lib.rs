//! # Pricebook Core Domain Models
//! 
//! Domain types for the supplier price-list ingestion pipeline.
//! 
//! ## Key Models
//! 
//! - **RawProductRecord / ValidatedProductRecord / StandardizedProductRecord**: a product row as it
//!   moves through extraction, price validation and name standardization
//! - **ConsolidatedProductGroup**: all records of one run sharing a canonical `(name, unit)` key
//! - **Product / Price / PriceHistory**: the persisted catalogue and its versioned prices
//! - **UploadRecord / UploadMetrics / RunError**: per-upload outcome and error taxonomy
//! - **UploadProgress**: the monotonic progress record polled by clients
//! 
//! Price versioning is planned here as a pure function ([`plan_price_transition`]) so that the
//! PostgreSQL and in-memory stores apply exactly the same rules.

pub mod product;
pub mod price;
pub mod supplier;
pub mod upload;
pub mod progress;

#[cfg(test)]
pub mod property_tests;

pub use product::*;
pub use price::*;
pub use supplier::*;
pub use upload::*;
pub use progress::*;
