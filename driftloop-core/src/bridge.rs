//! Adapter over the mutation server used in E2E mode: applies scheduled
//! mutations and resets the baseline between runs.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::{instrument, warn};

use crate::types::MutationStep;

const LIST_FIELDS: &[&str] = &["releases", "articles"];
const BOOL_FIELDS: &[&str] = &[
    "include_timestamp",
    "include_tracking",
    "include_random_id",
    "return_empty",
    "return_malformed",
];
const OPTIONAL_INT_FIELDS: &[&str] = &["error_code"];
const FLOAT_FIELDS: &[&str] = &["delay_seconds"];

/// Coerce a mutation's string value into the JSON type the mutation server
/// expects for that field. Values that don't parse fall back to a
/// conservative default rather than failing the whole mutation.
pub fn coerce_value(field: &str, raw: &str) -> Value {
    if LIST_FIELDS.contains(&field) {
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(raw) {
            return Value::Array(items);
        }
        let items: Vec<Value> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Value::String(s.to_string()))
            .collect();
        return Value::Array(items);
    }

    if BOOL_FIELDS.contains(&field) {
        let lowered = raw.to_lowercase();
        return Value::Bool(matches!(lowered.as_str(), "true" | "1" | "yes"));
    }

    if OPTIONAL_INT_FIELDS.contains(&field) {
        let lowered = raw.to_lowercase();
        if matches!(lowered.as_str(), "" | "none" | "null") {
            return Value::Null;
        }
        return match raw.parse::<i64>() {
            Ok(n) => Value::Number(n.into()),
            Err(_) => {
                warn!(field, raw, "failed to parse optional int field, using null");
                Value::Null
            }
        };
    }

    if FLOAT_FIELDS.contains(&field) {
        return match raw.parse::<f64>() {
            Ok(f) => json!(f),
            Err(_) => {
                warn!(field, raw, "failed to parse float field, using 0.0");
                json!(0.0)
            }
        };
    }

    Value::String(raw.to_string())
}

/// Thin HTTP client over the mutation server's three endpoints.
pub struct ServerBridge {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl ServerBridge {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url = base_url.into();
        let base_url = base_url.trim_end_matches('/').to_string();
        Self { base_url, client: reqwest::Client::new(), timeout }
    }

    async fn request(&self, method: reqwest::Method, path: &str, body: Option<Value>) -> Option<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.client.request(method, &url).timeout(self.timeout);
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(%url, error = %e, "mutation server request failed");
                return None;
            }
        };

        match response.json::<Value>().await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(%url, error = %e, "mutation server returned unparseable JSON");
                None
            }
        }
    }

    /// `GET /api/state`.
    #[instrument(skip(self))]
    pub async fn get_state(&self) -> Value {
        self.request(reqwest::Method::GET, "/api/state", None)
            .await
            .unwrap_or_else(|| json!({}))
    }

    /// `POST /api/state` with a partial-update body.
    #[instrument(skip(self, fields))]
    pub async fn update_state(&self, fields: Value) -> bool {
        if matches!(&fields, Value::Object(map) if map.is_empty()) {
            warn!("update_state called with no fields");
            return true;
        }
        let result = self.request(reqwest::Method::POST, "/api/state", Some(fields)).await;
        match result {
            Some(v) => v.get("status").and_then(Value::as_str) == Some("ok"),
            None => false,
        }
    }

    /// `POST /api/reset`.
    #[instrument(skip(self))]
    pub async fn reset(&self) -> bool {
        let result = self.request(reqwest::Method::POST, "/api/reset", None).await;
        match result {
            Some(v) => v.get("status").and_then(Value::as_str) == Some("reset"),
            None => false,
        }
    }

    /// Apply one scheduled mutation, coercing its value first.
    #[instrument(skip(self, mutation))]
    pub async fn apply_mutation(&self, mutation: &MutationStep) -> bool {
        if mutation.field.trim().is_empty() {
            warn!("mutation has empty field, skipping");
            return false;
        }
        let coerced = coerce_value(&mutation.field, &mutation.value);
        let body = json!({ mutation.field.clone(): coerced });
        self.update_state(body).await
    }

    /// Cheap reachability probe, used at startup before committing to E2E
    /// mode.
    #[instrument(skip(self))]
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/state", self.base_url);
        self.client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok()
    }
}
