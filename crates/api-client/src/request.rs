//! Request construction
//!
//! Turns a method, a path and `RequestOptions` into a `PreparedRequest`
//! exactly once per logical call. Every attempt (first try, retries, the
//! post-renewal replay) sends the same prepared request; only the
//! `Authorization` header is resolved per attempt.
//!
//! Parameter placement:
//! - GET / DELETE: parameters go to the query string, skipping absent values
//! - everything else: parameters become a JSON body (content type
//!   `application/json` unless the caller set one), or a form / raw body

use std::time::Duration;

use bytes::Bytes;
use common::Secret;
use reqwest::Method;
use reqwest::header::{
    ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::dispatch::ErrorHandler;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Ordered request parameters. A `None` value is absent: it is neither
/// serialized into the query nor into the JSON body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Vec<(String, Option<Value>)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, Some(value.into()));
        self
    }

    pub fn with_opt<V: Into<Value>>(mut self, key: impl Into<String>, value: Option<V>) -> Self {
        self.insert(key, value.map(Into::into));
        self
    }

    /// Set a key, replacing an earlier value in place.
    pub fn insert(&mut self, key: impl Into<String>, value: Option<Value>) {
        let key = key.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    /// Parameters from any serializable struct or map; `null` fields are absent.
    pub fn from_serialize<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        Ok(Self::from(serde_json::to_value(value)?))
    }

    pub fn is_empty(&self) -> bool {
        self.present().next().is_none()
    }

    /// Present entries in insertion order.
    pub fn present(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k.as_str(), v)))
    }

    /// `a=1&b=x` with form encoding; empty when nothing is present.
    pub fn to_query(&self) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in self.present() {
            query.append_pair(key, &query_value(value));
        }
        query.finish()
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .present()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Value::Object(map)
    }
}

impl From<Value> for Params {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(
                map.into_iter()
                    .map(|(k, v)| {
                        let v = (!v.is_null()).then_some(v);
                        (k, v)
                    })
                    .collect(),
            ),
            _ => Self::default(),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Params::new(), |params, (k, v)| params.with(k, v))
    }
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// What a call sends besides its headers.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Params(Params),
    Form(Vec<(String, String)>),
    Raw {
        body: Bytes,
        content_type: Option<String>,
    },
}

/// Per-call overrides. Anything left unset falls back to the client config.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub payload: Option<Payload>,
    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub cancel: Option<CancellationToken>,
    pub error_handler: Option<ErrorHandler>,
    /// Explicit access token; skips the credential store for this call
    pub token: Option<Secret<String>>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn params(mut self, params: Params) -> Self {
        self.payload = Some(Payload::Params(params));
        self
    }

    pub fn form<K: Into<String>, V: Into<String>>(
        mut self,
        fields: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        let fields = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.payload = Some(Payload::Form(fields));
        self
    }

    pub fn raw(mut self, body: impl Into<Bytes>, content_type: Option<&str>) -> Self {
        self.payload = Some(Payload::Raw {
            body: body.into(),
            content_type: content_type.map(str::to_string),
        });
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retries(mut self, max_retries: u32, delay: Duration) -> Self {
        self.max_retries = Some(max_retries);
        self.retry_delay = Some(delay);
        self
    }

    /// Cancel the call (including its backoff sleeps) when `token` fires.
    pub fn cancel_with(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn on_error(mut self, handler: impl Into<ErrorHandler>) -> Self {
        self.error_handler = Some(handler.into());
        self
    }

    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.token = Some(Secret::new(token.into()));
        self
    }

    fn has_header(&self, name: &HeaderName) -> bool {
        self.headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case(name.as_str()))
    }

    /// Add a header unless the caller already set it.
    pub(crate) fn default_header(mut self, name: HeaderName, value: &str) -> Self {
        if !self.has_header(&name) {
            self.headers.push((name.as_str().to_string(), value.to_string()));
        }
        self
    }

    pub(crate) fn accept_event_stream(self) -> Self {
        self.default_header(ACCEPT, "text/event-stream")
    }
}

/// Fully built transport request, shared by all attempts of one call.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl PreparedRequest {
    /// Attach the per-attempt credential and hand the request to reqwest.
    ///
    /// A valid token always wins over a caller-supplied `Authorization` header.
    pub fn to_reqwest(&self, client: &reqwest::Client, token: Option<&str>) -> reqwest::RequestBuilder {
        let mut headers = self.headers.clone();
        if let Some(value) = token.and_then(bearer_value) {
            headers.insert(AUTHORIZATION, value);
        }
        let builder = client
            .request(self.method.clone(), &self.url)
            .headers(headers);
        match &self.body {
            Some(body) => builder.body(body.clone()),
            None => builder,
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        self.headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
    }
}

fn bearer_value(token: &str) -> Option<HeaderValue> {
    if !session_auth::is_valid_token(token) {
        return None;
    }
    match HeaderValue::from_str(&format!("Bearer {token}")) {
        Ok(mut value) => {
            value.set_sensitive(true);
            Some(value)
        }
        Err(_) => {
            warn!("access token is not a valid header value, sending without it");
            None
        }
    }
}

/// Fresh request id in the form `req_<32 hex>`.
pub fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().simple())
}

/// Headers shared by every request: caller headers plus the request id.
///
/// Names or values that are not valid HTTP are skipped with a warning.
pub fn base_headers(custom: &[(String, String)], request_id: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in custom {
        let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
            warn!(header = %name, "skipping invalid header name");
            continue;
        };
        let Ok(header_value) = HeaderValue::from_str(value) else {
            warn!(header = %name, "skipping invalid header value");
            continue;
        };
        headers.append(header_name, header_value);
    }
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
    headers
}

/// Build the transport request for one logical call.
pub fn build_request(
    base_url: &str,
    method: Method,
    path: &str,
    options: &RequestOptions,
    request_id: &str,
) -> PreparedRequest {
    let mut url = join_url(base_url, path);
    let mut headers = base_headers(&options.headers, request_id);
    let mut body = None;
    let mut content_type = None;

    let in_query = method == Method::GET || method == Method::DELETE;
    match &options.payload {
        None => {}
        Some(Payload::Params(params)) if in_query => append_query(&mut url, &params.to_query()),
        Some(Payload::Form(fields)) if in_query => {
            let query: String = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(fields)
                .finish();
            append_query(&mut url, &query);
        }
        Some(Payload::Raw { .. }) if in_query => {
            warn!(%method, path, "raw body ignored for a query-only method");
        }
        Some(Payload::Params(params)) => {
            body = Some(Bytes::from(params.to_json().to_string()));
            content_type = Some(JSON_CONTENT_TYPE);
        }
        Some(Payload::Form(fields)) => {
            let encoded: String = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(fields)
                .finish();
            body = Some(Bytes::from(encoded));
            content_type = Some(FORM_CONTENT_TYPE);
        }
        Some(Payload::Raw {
            body: raw,
            content_type: raw_type,
        }) => {
            body = Some(raw.clone());
            content_type = raw_type.as_deref();
        }
    }

    if let Some(content_type) = content_type
        && !headers.contains_key(CONTENT_TYPE)
        && let Ok(value) = HeaderValue::from_str(content_type)
    {
        headers.insert(CONTENT_TYPE, value);
    }

    PreparedRequest {
        method,
        url,
        headers,
        body,
    }
}

/// `base` + `path` with exactly one slash between them.
pub fn join_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if path.is_empty() || path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

fn append_query(url: &mut String, query: &str) {
    if query.is_empty() {
        return;
    }
    url.push(if url.contains('?') { '&' } else { '?' });
    url.push_str(query);
}
