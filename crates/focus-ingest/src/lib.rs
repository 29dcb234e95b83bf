//! FOCUS Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Normalizes cloud and AI-API billing data into FOCUS records.
//!
//! # Pipeline
//!
//! - [`extract`]: pull raw records from REST APIs, object storage, SQL
//!   databases and BigQuery billing exports
//! - [`mapper`]: per-provider mapping of raw records onto [`focus::FocusRecord`]
//! - [`pricing`]: token and unit pricing for usage-only sources
//! - [`transform`]: batch mapping, validation and bookkeeping
//!
//! # Example
//!
//! ```no_run
//! use focus_ingest::config::{ProviderConfig, ProviderKind, TransformConfig};
//! use focus_ingest::transform::TransformStage;
//! use serde_json::json;
//!
//! let provider = ProviderConfig::new(ProviderKind::Aws);
//! let stage = TransformStage::from_provider(&provider, TransformConfig::default());
//! let result = stage.transform(&[json!({"lineItem/UnblendedCost": "1.25"})]);
//! println!("{}", serde_json::to_string(&result.summary).unwrap_or_default());
//! ```

pub mod config;
pub mod error;
pub mod extract;
pub mod focus;
pub mod mapper;
pub mod pricing;
pub mod transform;

/// Untyped source record as pulled by an extractor
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

pub use error::{PipelineError, Result};
