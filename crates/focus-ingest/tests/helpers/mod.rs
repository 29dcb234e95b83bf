//! Test helpers for focus-ingest integration tests
//!
//! - Provider configs pointed at mock servers
//! - Extraction windows
//! - Raw billing row fixtures (see [`fixtures`])
#![allow(dead_code)]

pub mod fixtures;

use chrono::{DateTime, TimeZone, Utc};
use focus_ingest::config::{Credentials, ProviderConfig, ProviderKind, WarehouseSettings};
use focus_ingest::extract::warehouse::TableType;

pub use fixtures::*;

pub const TEST_TOKEN: &str = "sk-test-token";
pub const TEST_ORG: &str = "org-test";

/// One-day window starting 2024-03-01
pub fn day_window() -> (DateTime<Utc>, DateTime<Utc>) {
    (
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap(),
    )
}

/// March 2024
pub fn month_window() -> (DateTime<Utc>, DateTime<Utc>) {
    (
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
    )
}

/// Fixed processing time for mapper fallbacks
pub fn processing_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// OpenAI provider talking to `base_url` with a bearer token and organization
pub fn openai_provider(base_url: &str) -> ProviderConfig {
    ProviderConfig {
        provider_id: Some("openai-test".to_string()),
        organization_id: Some(TEST_ORG.to_string()),
        api_endpoint: Some(base_url.to_string()),
        credentials: Credentials::Bearer {
            token: TEST_TOKEN.to_string(),
        },
        ..ProviderConfig::new(ProviderKind::OpenAi)
    }
}

/// GCP provider with BigQuery settings against `base_url`
pub fn bigquery_provider(base_url: &str, table_type: TableType) -> ProviderConfig {
    ProviderConfig {
        provider_id: Some("gcp-test".to_string()),
        api_endpoint: Some(base_url.to_string()),
        credentials: Credentials::Bearer {
            token: TEST_TOKEN.to_string(),
        },
        warehouse: Some(WarehouseSettings {
            project_id: "billing-proj".to_string(),
            dataset: "exports".to_string(),
            table: "gcp_billing".to_string(),
            location: Some("US".to_string()),
            table_type,
        }),
        ..ProviderConfig::new(ProviderKind::Gcp)
    }
}

pub fn provider(kind: ProviderKind) -> ProviderConfig {
    ProviderConfig {
        provider_id: Some(format!("{kind}-test")),
        ..ProviderConfig::new(kind)
    }
}
