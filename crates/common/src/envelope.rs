//! Backend response envelope
//!
//! Every JSON endpoint answers `{code, message, data, timestamp?}`. The
//! `code` is independent of the HTTP status: a response is a success only
//! when the transport succeeded AND `code` is `0` or in `[200, 300)`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Domain envelope wrapping a typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl<T> ApiResponse<T> {
    pub fn is_success(&self) -> bool {
        is_success_code(self.code)
    }
}

/// `0` and `[200, 300)` are the success codes.
pub fn is_success_code(code: i64) -> bool {
    code == 0 || (200..300).contains(&code)
}

/// A domain-level failure extracted from a raw envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainFailure {
    pub code: i64,
    pub message: Option<String>,
}

/// Inspect an untyped envelope for a failing `code`.
///
/// A body without a numeric `code` is not an envelope failure. The message is
/// taken from `message`, falling back to `reason`.
pub fn domain_failure(body: &Value) -> Option<DomainFailure> {
    let code = body.get("code")?.as_i64()?;
    if is_success_code(code) {
        return None;
    }
    let message = ["message", "reason"]
        .iter()
        .filter_map(|key| body.get(*key).and_then(Value::as_str))
        .find(|m| !m.is_empty())
        .map(str::to_owned);
    Some(DomainFailure { code, message })
}
