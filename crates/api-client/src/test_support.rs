//! Mock backend shared by the client tests
//!
//! Serves the routes the tests exercise under `/api`:
//! - `/me` accepts only `Bearer at_new`, otherwise 401 `token expired`
//! - `/always-401` rejects every call
//! - `/auth/refresh` issues `at_new` / `rt_new` after a short delay, or 401
//!   once `reject_refresh()` was called
//! - `/auth/login`, `/auth/signup`, `/auth/logout`, `/ai/generate`
//! - `/auth/oauth/{provider}` answers with the provider it was called for
//! - `/flaky` answers 503 a configurable number of times
//! - `/echo` reflects method, query, body, and auth header
//! - `/slow`, `/domain-fail`, `/export`, `/stream/forever`

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use futures_util::stream::{self, StreamExt};
use serde_json::{Value, json};
use session_auth::{CredentialStore, Navigator};
use tokio::net::TcpListener;

use crate::client::ApiClient;
use crate::config::ClientConfig;

/// Navigator that records every redirect target.
#[derive(Default)]
pub(crate) struct RecordingNavigator {
    targets: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub(crate) fn targets(&self) -> Vec<String> {
        self.targets.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, target: &str) {
        self.targets.lock().unwrap().push(target.to_string());
    }
}

#[derive(Clone, Default)]
struct BackendState {
    hits: Arc<Mutex<HashMap<String, usize>>>,
    reject_refresh: Arc<AtomicBool>,
    flaky_failures: Arc<AtomicUsize>,
    last_body: Arc<Mutex<Option<Value>>>,
}

impl BackendState {
    fn hit(&self, path: &str) -> usize {
        let mut hits = self.hits.lock().unwrap();
        let count = hits.entry(path.to_string()).or_default();
        *count += 1;
        *count
    }
}

pub(crate) struct Backend {
    addr: SocketAddr,
    state: BackendState,
}

impl Backend {
    pub(crate) async fn start() -> Self {
        let state = BackendState::default();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let api = Router::new()
            .route("/me", get(me))
            .route("/always-401", any(always_unauthorized))
            .route("/auth/refresh", post(refresh))
            .route("/auth/login", post(login))
            .route("/auth/signup", post(signup))
            .route("/auth/logout", post(logout))
            .route("/auth/oauth/{provider}", post(oauth_login))
            .route("/ai/generate", post(generate))
            .route("/flaky", get(flaky))
            .route("/echo", any(echo))
            .route("/slow", get(slow))
            .route("/domain-fail", get(domain_fail))
            .route("/export", get(export))
            .route("/stream/forever", post(stream_forever))
            .with_state(state.clone());
        let app = Router::new().nest("/api", api);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state }
    }

    pub(crate) fn api_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    pub(crate) fn config(&self) -> ClientConfig {
        ClientConfig::new(self.api_url())
    }

    pub(crate) fn client(&self, store: Arc<dyn CredentialStore>) -> (ApiClient, Arc<RecordingNavigator>) {
        self.client_with(self.config(), store)
    }

    pub(crate) fn client_with(
        &self,
        config: ClientConfig,
        store: Arc<dyn CredentialStore>,
    ) -> (ApiClient, Arc<RecordingNavigator>) {
        let navigator = Arc::new(RecordingNavigator::default());
        let client = ApiClient::builder(config)
            .store(store)
            .navigator(navigator.clone())
            .build();
        (client, navigator)
    }

    pub(crate) fn hits(&self, path: &str) -> usize {
        self.state.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub(crate) fn refresh_hits(&self) -> usize {
        self.hits("/auth/refresh")
    }

    pub(crate) fn reject_refresh(&self) {
        self.state.reject_refresh.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_flaky(&self, times: usize) {
        self.state.flaky_failures.store(times, Ordering::SeqCst);
    }

    /// JSON body of the last `/ai/generate` or `/auth/*` call.
    pub(crate) fn last_body(&self) -> Option<Value> {
        self.state.last_body.lock().unwrap().clone()
    }
}

fn envelope(data: Value) -> Json<Value> {
    Json(json!({"code": 200, "message": "ok", "data": data}))
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"code": 401, "message": message})),
    )
        .into_response()
}

async fn me(State(state): State<BackendState>, headers: HeaderMap) -> Response {
    state.hit("/me");
    if bearer(&headers) == Some("Bearer at_new") {
        envelope(json!({"id": 1, "email": "a@b.c"})).into_response()
    } else {
        unauthorized("token expired")
    }
}

async fn always_unauthorized(State(state): State<BackendState>) -> Response {
    state.hit("/always-401");
    unauthorized("token expired")
}

async fn refresh(State(state): State<BackendState>, Json(body): Json<Value>) -> Response {
    state.hit("/auth/refresh");
    *state.last_body.lock().unwrap() = Some(body);
    tokio::time::sleep(Duration::from_millis(100)).await;
    if state.reject_refresh.load(Ordering::SeqCst) {
        return unauthorized("refresh token expired");
    }
    envelope(json!({"token": "at_new", "refresh_token": "rt_new", "expires_in": 900})).into_response()
}

fn auth_payload(email: &str) -> Value {
    json!({
        "user": {"id": 7, "email": email, "name": "Ada", "createdAt": "2024-01-01T00:00:00Z"},
        "token": "at_login",
        "refresh_token": "rt_login"
    })
}

async fn login(State(state): State<BackendState>, Json(body): Json<Value>) -> Response {
    state.hit("/auth/login");
    *state.last_body.lock().unwrap() = Some(body.clone());
    if body["password"] != json!("secret") {
        return unauthorized("Invalid email or password");
    }
    envelope(auth_payload(body["email"].as_str().unwrap_or_default())).into_response()
}

async fn signup(State(state): State<BackendState>, Json(body): Json<Value>) -> Response {
    state.hit("/auth/signup");
    *state.last_body.lock().unwrap() = Some(body.clone());
    envelope(auth_payload(body["email"].as_str().unwrap_or_default())).into_response()
}

async fn oauth_login(
    State(state): State<BackendState>,
    Path(provider): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    state.hit(&format!("/auth/oauth/{provider}"));
    *state.last_body.lock().unwrap() = Some(body.clone());
    let mut payload = auth_payload(body["email"].as_str().unwrap_or_default());
    payload["provider"] = json!(provider);
    envelope(payload).into_response()
}

async fn logout(State(state): State<BackendState>) -> Response {
    state.hit("/auth/logout");
    envelope(json!({"success": true})).into_response()
}

/// SSE body split mid-line across chunks.
fn sse_body(chunks: &[&'static str]) -> Body {
    let chunks: Vec<Result<Bytes, Infallible>> =
        chunks.iter().copied().map(|c| Ok(Bytes::from_static(c.as_bytes()))).collect();
    Body::from_stream(stream::iter(chunks))
}

fn event_stream(body: Body) -> Response {
    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(body)
        .unwrap()
}

async fn generate(State(state): State<BackendState>, Json(body): Json<Value>) -> Response {
    state.hit("/ai/generate");
    *state.last_body.lock().unwrap() = Some(body.clone());
    if body["stream"] == json!(true) {
        return event_stream(sse_body(&[
            "data: {\"content\":\"Hel\"}\n\nda",
            "ta: {\"content\":\"lo\"}\r\n\r\n",
            ": keep-alive\n\ndata: \"!\"\n\n",
            "data: [DONE]\n\n",
            "data: {\"content\":\"never\"}\n\n",
        ]));
    }
    envelope(json!({
        "content": format!("echo: {}", body["prompt"].as_str().unwrap_or_default()),
        "model": body["model"],
        "usage": {"promptTokens": 3, "completionTokens": 5, "totalTokens": 8}
    }))
    .into_response()
}

/// Emits two chunks, then never ends.
async fn stream_forever(State(state): State<BackendState>) -> Response {
    state.hit("/stream/forever");
    let head = stream::iter(vec![
        Ok::<_, Infallible>(Bytes::from_static(b"data: {\"content\":\"a\"}\n\n")),
        Ok(Bytes::from_static(b"data: {\"content\":\"b\"}\n\n")),
    ]);
    event_stream(Body::from_stream(head.chain(stream::pending())))
}

async fn flaky(State(state): State<BackendState>) -> Response {
    state.hit("/flaky");
    let remaining = state.flaky_failures.load(Ordering::SeqCst);
    if remaining > 0 {
        state.flaky_failures.store(remaining - 1, Ordering::SeqCst);
        return (StatusCode::SERVICE_UNAVAILABLE, "try later").into_response();
    }
    envelope(json!("ok")).into_response()
}

async fn echo(
    State(state): State<BackendState>,
    method: Method,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    state.hit("/echo");
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    envelope(json!({
        "method": method.as_str(),
        "query": query,
        "authorization": bearer(&headers),
        "content_type": headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        "body": body,
    }))
    .into_response()
}

async fn slow(State(state): State<BackendState>) -> Response {
    state.hit("/slow");
    tokio::time::sleep(Duration::from_secs(5)).await;
    envelope(json!("late")).into_response()
}

async fn domain_fail(State(state): State<BackendState>) -> Response {
    state.hit("/domain-fail");
    Json(json!({"code": 1001, "message": "quota exceeded", "data": null})).into_response()
}

async fn export(State(state): State<BackendState>) -> Response {
    state.hit("/export");
    ([(header::CONTENT_TYPE, "text/markdown")], "# exported").into_response()
}
