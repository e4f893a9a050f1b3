use std::time::Duration;

use reqwest::{Client, Response};
use serde_json::Value;

use crate::error::{VendorError, VendorResult};

/// HTTP client with a whole-request timeout.
pub fn client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Fail on non-2xx, keeping the body for the log line.
pub(crate) async fn ensure_success(service: &'static str, response: Response) -> VendorResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(VendorError::Status {
        service,
        status,
        body,
    })
}

/// An id field that may arrive as a string or a number.
pub(crate) fn id_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
