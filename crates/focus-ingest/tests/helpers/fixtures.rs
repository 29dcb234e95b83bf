//! Raw billing rows and API payloads shared by integration tests

use serde_json::{json, Value};

// ============================================================================
// Provider rows
// ============================================================================

/// AWS FOCUS export row with canonical columns only
pub fn aws_focus_row(cost: &str) -> Value {
    json!({
        "BilledCost": cost,
        "EffectiveCost": cost,
        "ListCost": cost,
        "ContractedCost": cost,
        "BillingCurrency": "USD",
        "BillingAccountId": "123456789012",
        "BillingAccountName": "Payer",
        "ChargePeriodStart": "2024-03-01T00:00:00Z",
        "ChargePeriodEnd": "2024-03-01T01:00:00Z",
        "ServiceName": "Amazon Elastic Compute Cloud",
        "ChargeCategory": "Usage",
        "ChargeDescription": "m5.large hours"
    })
}

/// Legacy CUR row with slash-delimited keys
pub fn aws_cur_row() -> Value {
    json!({
        "lineItem/UnblendedCost": "4.20",
        "lineItem/UsageAccountId": "210987654321",
        "lineItem/UsageStartDate": "2024-03-01T00:00:00Z",
        "lineItem/UsageEndDate": "2024-03-01T01:00:00Z",
        "lineItem/ProductCode": "AmazonS3",
        "lineItem/LineItemType": "Usage",
        "lineItem/CurrencyCode": "USD",
        "bill/PayerAccountId": "123456789012",
        "product/ProductName": "Amazon Simple Storage Service"
    })
}

/// GCP standard billing export row as decoded from BigQuery
pub fn gcp_standard_row(cost: f64) -> Value {
    json!({
        "cost": cost,
        "currency": "USD",
        "service": {"id": "6F81-5844-456A", "description": "Compute Engine"},
        "sku": {"id": "D2C2-4F0A", "description": "N1 Predefined Instance Core"},
        "project": {"id": "my-project", "name": "My Project"},
        "usage_start_time": "2024-03-01T00:00:00Z",
        "usage_end_time": "2024-03-01T01:00:00Z"
    })
}

/// Azure FOCUS cost export row
pub fn azure_focus_row() -> Value {
    json!({
        "BilledCost": "100.50",
        "EffectiveCost": "90.00",
        "ListCost": "120.00",
        "ContractedCost": "95.00",
        "BillingCurrency": "EUR",
        "BillingAccountId": "ba-1",
        "SubAccountId": "sub-1",
        "ServiceName": "Virtual Machines",
        "ServiceCategory": "Compute",
        "ChargeCategory": "Usage",
        "ChargePeriodStart": "2024-03-01T00:00:00Z",
        "ChargePeriodEnd": "2024-03-02T00:00:00Z"
    })
}

/// OpenAI completions usage result after bucket explosion
pub fn openai_completion(input_tokens: i64, output_tokens: i64) -> Value {
    json!({
        "object": "organization.usage.completions.result",
        "model": "gpt-4o",
        "api_key_id": "key123",
        "input_tokens": input_tokens,
        "output_tokens": output_tokens,
        "num_model_requests": 3,
        "bucket_start_time": 1_709_251_200,
        "bucket_end_time": 1_709_337_600
    })
}

// ============================================================================
// OpenAI usage API pages
// ============================================================================

pub fn openai_usage_page(results: Vec<Value>, next_page: Option<&str>) -> Value {
    json!({
        "object": "page",
        "data": [{
            "object": "bucket",
            "start_time": 1_709_251_200,
            "end_time": 1_709_337_600,
            "results": results
        }],
        "has_more": next_page.is_some(),
        "next_page": next_page
    })
}

pub fn openai_usage_result(model: &str, input_tokens: i64, output_tokens: i64) -> Value {
    json!({
        "object": "organization.usage.completions.result",
        "model": model,
        "api_key_id": "key123",
        "input_tokens": input_tokens,
        "output_tokens": output_tokens,
        "num_model_requests": 2
    })
}

// ============================================================================
// BigQuery REST payloads
// ============================================================================

pub fn bq_standard_schema() -> Value {
    json!({
        "fields": [
            {"name": "cost", "type": "FLOAT"},
            {"name": "currency", "type": "STRING"},
            {"name": "usage_start_time", "type": "TIMESTAMP"},
            {"name": "usage_end_time", "type": "TIMESTAMP"},
            {"name": "service", "type": "RECORD", "fields": [
                {"name": "id", "type": "STRING"},
                {"name": "description", "type": "STRING"}
            ]},
            {"name": "project", "type": "RECORD", "fields": [
                {"name": "id", "type": "STRING"},
                {"name": "name", "type": "STRING"}
            ]}
        ]
    })
}

pub fn bq_standard_row(cost: &str, service: &str) -> Value {
    json!({"f": [
        {"v": cost},
        {"v": "USD"},
        {"v": "1.7092512E9"},
        {"v": "1.7092548E9"},
        {"v": {"f": [{"v": "6F81-5844-456A"}, {"v": service}]}},
        {"v": {"f": [{"v": "my-project"}, {"v": "My Project"}]}}
    ]})
}

pub fn bq_focus_schema() -> Value {
    json!({
        "fields": [
            {"name": "BilledCost", "type": "NUMERIC"},
            {"name": "ServiceName", "type": "STRING"},
            {"name": "ChargePeriodStart", "type": "TIMESTAMP"},
            {"name": "ChargePeriodEnd", "type": "TIMESTAMP"},
            {"name": "BillingPeriodStart", "type": "TIMESTAMP"}
        ]
    })
}

pub fn bq_table(schema: Value) -> Value {
    json!({
        "kind": "bigquery#table",
        "id": "billing-proj:exports.gcp_billing",
        "schema": schema
    })
}

pub fn bq_query_response(
    job_id: &str,
    complete: bool,
    schema: Option<Value>,
    rows: Vec<Value>,
    page_token: Option<&str>,
) -> Value {
    let mut body = json!({
        "kind": "bigquery#queryResponse",
        "jobReference": {"projectId": "billing-proj", "jobId": job_id, "location": "US"},
        "jobComplete": complete,
        "rows": rows
    });
    if let Some(schema) = schema {
        body["schema"] = schema;
    }
    if let Some(token) = page_token {
        body["pageToken"] = json!(token);
    }
    body
}
