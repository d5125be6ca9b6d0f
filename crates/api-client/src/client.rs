//! `ApiClient`: the public request surface
//!
//! Verbs never fail outward. Every call resolves to a `RequestResult` with
//! either `data` or an `error` message (plus the HTTP status when there was
//! one); the caller's error hooks have already run by then.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::ApiResponse;
use reqwest::Method;
use serde::de::DeserializeOwned;
use session_auth::{CredentialStore, MemoryCredentialStore, Navigator, TracingNavigator};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span};

use crate::config::ClientConfig;
use crate::dispatch::{ErrorHandler, dispatch};
use crate::error::Result;
use crate::executor::{self, Call};
use crate::refresh::{RefreshCoordinator, RefreshSnapshot, SessionGuard};
use crate::request::{RequestOptions, new_request_id};
use crate::response::{RawResponse, Reply};

const DEFAULT_RENEWAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Uniform call result.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestResult<T> {
    pub data: Option<T>,
    pub error: Option<String>,
    /// HTTP status of a failed call, when the failure had one
    pub status: Option<u16>,
}

impl<T> RequestResult<T> {
    pub fn success(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
            status: None,
        }
    }

    pub fn failure(message: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            data: None,
            error: Some(message.into()),
            status,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> std::result::Result<T, String> {
        match (self.data, self.error) {
            (Some(data), None) => Ok(data),
            (_, error) => Err(error.unwrap_or_default()),
        }
    }
}

pub(crate) struct ClientInner {
    pub(crate) http: reqwest::Client,
    pub(crate) config: ClientConfig,
    pub(crate) store: Arc<dyn CredentialStore>,
    pub(crate) refresh: Arc<RefreshCoordinator>,
}

/// Cheap to clone; clones share the credential store and renewal state.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

pub struct ApiClientBuilder {
    config: ClientConfig,
    store: Option<Arc<dyn CredentialStore>>,
    navigator: Option<Arc<dyn Navigator>>,
    http: Option<reqwest::Client>,
}

impl ApiClientBuilder {
    pub fn store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> ApiClient {
        let http = self.http.unwrap_or_default();
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryCredentialStore::new()));
        let session = SessionGuard {
            store: store.clone(),
            navigator: self.navigator.unwrap_or_else(|| Arc::new(TracingNavigator)),
            login_path: self.config.login_path.clone(),
        };
        let refresh = RefreshCoordinator::new(
            http.clone(),
            self.config.refresh_url(),
            self.config.max_refresh_attempts,
            self.config.timeout().unwrap_or(DEFAULT_RENEWAL_TIMEOUT),
            session,
        );
        ApiClient {
            inner: Arc::new(ClientInner {
                http,
                config: self.config,
                store,
                refresh: Arc::new(refresh),
            }),
        }
    }
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: ClientConfig) -> ApiClientBuilder {
        ApiClientBuilder {
            config,
            store: None,
            navigator: None,
            http: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.store
    }

    pub fn refresh_state(&self) -> RefreshSnapshot {
        self.inner.refresh.snapshot()
    }

    /// Fresh cancellation token for `RequestOptions::cancel_with`.
    pub fn cancel_token() -> CancellationToken {
        CancellationToken::new()
    }

    pub(crate) fn inner(&self) -> &Arc<ClientInner> {
        &self.inner
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> RequestResult<ApiResponse<T>> {
        self.request(Method::GET, path, options).await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> RequestResult<ApiResponse<T>> {
        self.request(Method::POST, path, options).await
    }

    pub async fn put<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> RequestResult<ApiResponse<T>> {
        self.request(Method::PUT, path, options).await
    }

    pub async fn patch<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> RequestResult<ApiResponse<T>> {
        self.request(Method::PATCH, path, options).await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> RequestResult<ApiResponse<T>> {
        self.request(Method::DELETE, path, options).await
    }

    /// Any verb, decoding the envelope's `data` as `T`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> RequestResult<ApiResponse<T>> {
        let handler = options.error_handler.clone();
        let outcome = self
            .send(method, path, &options)
            .await
            .and_then(|reply| reply.into_envelope(path));
        Self::settle(outcome, handler.as_ref())
    }

    /// Any verb, returning the body undecoded.
    pub async fn request_raw(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> RequestResult<RawResponse> {
        let handler = options.error_handler.clone();
        let outcome = self.send(method, path, &options).await.map(Reply::into_raw);
        Self::settle(outcome, handler.as_ref())
    }

    pub async fn get_raw(&self, path: &str, options: RequestOptions) -> RequestResult<RawResponse> {
        self.request_raw(Method::GET, path, options).await
    }

    pub async fn post_raw(&self, path: &str, options: RequestOptions) -> RequestResult<RawResponse> {
        self.request_raw(Method::POST, path, options).await
    }

    /// Run one logical call through retry and session recovery.
    pub(crate) async fn send(
        &self,
        method: Method,
        path: &str,
        options: &RequestOptions,
    ) -> Result<Reply> {
        let request_id = new_request_id();
        let span = info_span!("api_request", %method, path, request_id = %request_id);
        let call = Call::prepare(&self.inner.config, method.clone(), path, options, &request_id);
        let started = Instant::now();

        let outcome = executor::execute(self.inner.clone(), Arc::new(call))
            .instrument(span.clone())
            .await;

        let elapsed = started.elapsed();
        let label = match &outcome {
            Ok(_) => "success",
            Err(error) => error.kind.label(),
        };
        crate::metrics::record_request(method.as_str(), label, elapsed.as_secs_f64());
        span.in_scope(|| debug!(outcome = label, elapsed_ms = elapsed.as_millis() as u64, "request finished"));
        outcome
    }

    /// Convert an outcome into the uniform result, running hooks on failure.
    pub(crate) fn settle<T>(outcome: Result<T>, handler: Option<&ErrorHandler>) -> RequestResult<T> {
        match outcome {
            Ok(data) => RequestResult::success(data),
            Err(error) => RequestResult::failure(dispatch(&error, handler), error.status),
        }
    }
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.config.base_url)
            .field("refresh", &self.inner.refresh.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ErrorHooks;
    use crate::error::{AuthErrorKind, ErrorKind, RequestError};
    use crate::request::Params;
    use crate::test_support::{Backend, RecordingNavigator};
    use serde_json::{Value, json};
    use session_auth::TokenGrant;
    use std::sync::Mutex;

    fn capture() -> (ErrorHandler, Arc<Mutex<Vec<RequestError>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = ErrorHandler::catch_all(move |e| sink.lock().unwrap().push(e.clone()));
        (handler, seen)
    }

    async fn signed_in(backend: &Backend) -> (ApiClient, Arc<MemoryCredentialStore>, Arc<RecordingNavigator>) {
        let store = Arc::new(MemoryCredentialStore::with_tokens("at_old", "rt_old"));
        let (client, navigator) = backend.client(store.clone());
        (client, store, navigator)
    }

    #[tokio::test]
    async fn expired_token_is_renewed_and_call_replayed() {
        let backend = Backend::start().await;
        let (client, store, navigator) = signed_in(&backend).await;

        let result = client.get::<Value>("/me", RequestOptions::new()).await;

        assert!(result.is_ok(), "got {:?}", result.error);
        assert_eq!(result.data.unwrap().data["id"], json!(1));
        assert_eq!(backend.refresh_hits(), 1);
        assert_eq!(backend.hits("/me"), 2);
        assert_eq!(store.get().await.access_token(), Some("at_new"));
        assert_eq!(client.refresh_state().attempt_count, 0);
        assert!(navigator.targets().is_empty());
    }

    #[tokio::test]
    async fn concurrent_401s_share_one_renewal() {
        let backend = Backend::start().await;
        let (client, _, _) = signed_in(&backend).await;

        let calls = (0..3).map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.get::<Value>("/me", RequestOptions::new()).await })
        });
        let results = futures_util::future::join_all(calls).await;

        for result in results {
            assert!(result.unwrap().is_ok());
        }
        assert_eq!(backend.refresh_hits(), 1);
        assert_eq!(backend.hits("/me"), 6);
        assert!(!client.refresh_state().in_flight);
    }

    #[tokio::test]
    async fn second_401_after_renewal_ends_the_session() {
        let backend = Backend::start().await;
        let (client, store, navigator) = signed_in(&backend).await;
        let (handler, seen) = capture();

        let result = client
            .get::<Value>("/always-401", RequestOptions::new().on_error(handler))
            .await;

        assert_eq!(result.status, Some(401));
        assert_eq!(backend.refresh_hits(), 1);
        assert_eq!(backend.hits("/always-401"), 2);
        assert!(store.get().await.is_empty());
        assert_eq!(navigator.targets(), ["/login?redirect_to=%2Falways-401"]);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, ErrorKind::Auth(AuthErrorKind::ReplayStillUnauthorized));
    }

    #[tokio::test]
    async fn renewal_budget_is_bounded() {
        let backend = Backend::start().await;
        backend.reject_refresh();
        let (client, store, navigator) = signed_in(&backend).await;

        for expected_hits in 1..=2 {
            store.set(TokenGrant::new("at_old", "rt_old")).await.unwrap();
            let result = client.get::<Value>("/me", RequestOptions::new()).await;
            assert_eq!(result.status, Some(401));
            assert_eq!(backend.refresh_hits(), expected_hits);
        }

        store.set(TokenGrant::new("at_old", "rt_old")).await.unwrap();
        let (handler, seen) = capture();
        let result = client
            .get::<Value>("/me", RequestOptions::new().on_error(handler))
            .await;

        assert!(!result.is_ok());
        assert_eq!(backend.refresh_hits(), 2);
        assert_eq!(
            seen.lock().unwrap()[0].kind,
            ErrorKind::Auth(AuthErrorKind::RefreshExhausted)
        );
        assert_eq!(navigator.targets().len(), 3);
        assert!(store.get().await.is_empty());
    }

    #[tokio::test]
    async fn single_renewal_budget_is_spent_after_one_failure() {
        let backend = Backend::start().await;
        backend.reject_refresh();
        let store = Arc::new(MemoryCredentialStore::with_tokens("at_old", "rt_old"));
        let (client, navigator) =
            backend.client_with(backend.config().with_max_refresh_attempts(1), store.clone());

        let result = client.get::<Value>("/me", RequestOptions::new()).await;
        assert_eq!(result.status, Some(401));
        assert_eq!(client.refresh_state().attempt_count, 1);

        store.set(TokenGrant::new("at_old", "rt_old")).await.unwrap();
        let (handler, seen) = capture();
        client
            .get::<Value>("/me", RequestOptions::new().on_error(handler))
            .await;

        assert_eq!(backend.refresh_hits(), 1);
        assert_eq!(
            seen.lock().unwrap()[0].kind,
            ErrorKind::Auth(AuthErrorKind::RefreshExhausted)
        );
        assert_eq!(navigator.targets().len(), 2);
    }

    #[tokio::test]
    async fn failed_renewal_rejects_every_waiting_call() {
        let backend = Backend::start().await;
        backend.reject_refresh();
        let (client, store, navigator) = signed_in(&backend).await;
        let (handler, seen) = capture();

        let calls = (0..3).map(|_| {
            let client = client.clone();
            let options = RequestOptions::new().on_error(handler.clone());
            tokio::spawn(async move { client.get::<Value>("/me", options).await })
        });
        let results = futures_util::future::join_all(calls).await;

        for result in results {
            let result = result.unwrap();
            assert!(!result.is_ok());
            assert_eq!(result.status, Some(401));
        }
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(
            seen.iter()
                .all(|e| e.kind == ErrorKind::Auth(AuthErrorKind::RefreshFailed))
        );
        assert_eq!(backend.refresh_hits(), 1);
        assert_eq!(backend.hits("/me"), 3);
        assert!(store.get().await.is_empty());
        assert_eq!(navigator.targets(), ["/login?redirect_to=%2Fme"]);
        assert!(!client.refresh_state().in_flight);
    }

    #[tokio::test]
    async fn failed_renewal_rejects_trigger_with_its_own_401() {
        let backend = Backend::start().await;
        backend.reject_refresh();
        let (client, store, navigator) = signed_in(&backend).await;
        let (handler, seen) = capture();

        let result = client
            .get::<Value>("/me", RequestOptions::new().on_error(handler))
            .await;

        assert_eq!(result.error.as_deref(), Some("token expired"));
        assert_eq!(result.status, Some(401));
        assert_eq!(seen.lock().unwrap()[0].kind, ErrorKind::Auth(AuthErrorKind::RefreshFailed));
        assert!(store.get().await.is_empty());
        assert_eq!(navigator.targets(), ["/login?redirect_to=%2Fme"]);
    }

    #[tokio::test]
    async fn bad_login_surfaces_without_renewal() {
        let backend = Backend::start().await;
        let (client, navigator) = backend.client(Arc::new(MemoryCredentialStore::new()));
        let (handler, seen) = capture();

        let params = Params::new().with("email", "a@b.c").with("password", "wrong");
        let result = client
            .post::<Value>("/auth/login", RequestOptions::new().params(params).on_error(handler))
            .await;

        assert_eq!(result.error.as_deref(), Some("Invalid email or password"));
        assert_eq!(result.status, Some(401));
        assert_eq!(backend.refresh_hits(), 0);
        assert!(navigator.targets().is_empty());
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, ErrorKind::HttpStatus);
        assert_eq!(seen[0].message, "Invalid email or password");
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let backend = Backend::start().await;
        backend.fail_flaky(2);
        let (client, _) = backend.client(Arc::new(MemoryCredentialStore::new()));

        let result = client
            .get::<Value>(
                "/flaky",
                RequestOptions::new().retries(2, Duration::from_millis(10)),
            )
            .await;
        assert!(result.is_ok());
        assert_eq!(backend.hits("/flaky"), 3);
    }

    #[tokio::test]
    async fn retry_budget_runs_out() {
        let backend = Backend::start().await;
        backend.fail_flaky(5);
        let (client, _) = backend.client(Arc::new(MemoryCredentialStore::new()));

        let result = client
            .get::<Value>(
                "/flaky",
                RequestOptions::new().retries(1, Duration::from_millis(10)),
            )
            .await;
        assert_eq!(result.status, Some(503));
        assert_eq!(backend.hits("/flaky"), 2);
    }

    #[tokio::test]
    async fn query_and_body_reach_the_server() {
        let backend = Backend::start().await;
        let store = Arc::new(MemoryCredentialStore::with_tokens("at_new", "rt"));
        let (client, _) = backend.client(store);

        let params = Params::new().with("a", 1).with_opt::<Value>("b", None).with("c", "x");
        let got = client
            .get::<Value>("/echo", RequestOptions::new().params(params.clone()))
            .await
            .into_result()
            .unwrap();
        assert_eq!(got.data["query"], json!("a=1&c=x"));
        assert_eq!(got.data["authorization"], json!("Bearer at_new"));

        let got = client
            .post::<Value>("/echo", RequestOptions::new().params(params))
            .await
            .into_result()
            .unwrap();
        assert_eq!(got.data["method"], json!("POST"));
        assert_eq!(got.data["body"], json!({"a": 1, "c": "x"}));
        assert_eq!(got.data["content_type"], json!("application/json"));
    }

    #[tokio::test]
    async fn domain_failure_at_http_200() {
        let backend = Backend::start().await;
        let (client, _) = backend.client(Arc::new(MemoryCredentialStore::new()));
        let hooks = ErrorHooks::new().fallback(|e| assert_eq!(e.kind, ErrorKind::DomainCode));

        let result = client
            .get::<Value>("/domain-fail", RequestOptions::new().on_error(hooks))
            .await;
        assert_eq!(result.error.as_deref(), Some("quota exceeded"));
        assert_eq!(result.status, Some(200));
    }

    #[tokio::test]
    async fn domain_failures_spend_the_retry_budget() {
        let backend = Backend::start().await;
        let (client, _) = backend.client(Arc::new(MemoryCredentialStore::new()));

        let result = client
            .get::<Value>(
                "/domain-fail",
                RequestOptions::new().retries(2, Duration::from_millis(10)),
            )
            .await;
        assert_eq!(result.error.as_deref(), Some("quota exceeded"));
        assert_eq!(backend.hits("/domain-fail"), 3);
    }

    #[tokio::test]
    async fn raw_responses_skip_decoding() {
        let backend = Backend::start().await;
        let (client, _) = backend.client(Arc::new(MemoryCredentialStore::new()));

        let raw = client
            .get_raw("/export", RequestOptions::new())
            .await
            .into_result()
            .unwrap();
        assert_eq!(raw.text(), "# exported");
        assert_eq!(raw.content_type.as_deref(), Some("text/markdown"));
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let backend = Backend::start().await;
        let (client, _) = backend.client(Arc::new(MemoryCredentialStore::new()));

        let result = client
            .get::<Value>("/slow", RequestOptions::new().timeout(Duration::from_millis(100)))
            .await;
        assert_eq!(result.error.as_deref(), Some("Request timed out after 100ms"));
        assert_eq!(result.status, None);
    }

    #[tokio::test]
    async fn cancellation_aborts_without_failure_hooks() {
        let backend = Backend::start().await;
        let (client, _) = backend.client(Arc::new(MemoryCredentialStore::new()));
        let cancel = ApiClient::cancel_token();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let fired = Arc::new(Mutex::new(Vec::<&'static str>::new()));
        let (a, b) = (fired.clone(), fired.clone());
        let hooks = ErrorHooks::new()
            .fallback(move |_| a.lock().unwrap().push("default"))
            .on_error(move |_| b.lock().unwrap().push("on_error"));

        let result = client
            .get::<Value>(
                "/slow",
                RequestOptions::new().cancel_with(cancel).on_error(hooks),
            )
            .await;
        assert_eq!(result.error.as_deref(), Some("Request was canceled"));
        assert_eq!(*fired.lock().unwrap(), ["on_error"]);
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = ApiClient::new(ClientConfig::new(format!("http://{addr}/api")));

        let result = client.get::<Value>("/me", RequestOptions::new()).await;
        assert_eq!(
            result.error.as_deref(),
            Some(crate::messages::NETWORK_ERROR_MESSAGE)
        );
    }
}
