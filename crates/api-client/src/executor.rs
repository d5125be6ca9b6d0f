//! Per-call execution: attempts, retries, and 401 recovery

use std::sync::Arc;
use std::time::Duration;

use common::Secret;
use futures_util::FutureExt;
use reqwest::Method;
use session_auth::CredentialStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::ClientInner;
use crate::config::ClientConfig;
use crate::error::{AuthErrorKind, RequestError, Result};
use crate::messages::REFRESH_FAILED_MESSAGE;
use crate::refresh::{self, Admission, ReplayFn};
use crate::request::{PreparedRequest, RequestOptions, base_headers, build_request};
use crate::response::{self, Reply};
use crate::retry::RetryPolicy;

/// Everything an attempt needs, fixed for the lifetime of one logical call.
pub(crate) struct Call {
    pub(crate) request: PreparedRequest,
    pub(crate) path: String,
    pub(crate) token: Option<Secret<String>>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) retry: RetryPolicy,
    pub(crate) cancel: CancellationToken,
}

impl Call {
    pub(crate) fn prepare(
        config: &ClientConfig,
        method: Method,
        path: &str,
        options: &RequestOptions,
        request_id: &str,
    ) -> Self {
        let timeout = match options.timeout {
            Some(t) if t.is_zero() => None,
            Some(t) => Some(t),
            None => config.timeout(),
        };
        Self {
            request: build_request(&config.base_url, method, path, options, request_id),
            path: path.to_string(),
            token: options.token.clone(),
            timeout,
            retry: RetryPolicy::new(
                options.max_retries.unwrap_or(config.max_retries),
                options.retry_delay.unwrap_or_else(|| config.retry_delay()),
            ),
            cancel: options.cancel.clone().unwrap_or_default(),
        }
    }
}

/// Access token for one attempt: the explicit override, else one store read.
pub(crate) async fn resolve_token(
    store: &dyn CredentialStore,
    explicit: Option<&Secret<String>>,
) -> Option<String> {
    match explicit {
        Some(token) => Some(token.expose().clone()),
        None => store.get().await.access_token().map(str::to_string),
    }
}

/// Send the prepared request once and classify the answer.
pub(crate) async fn attempt(inner: &ClientInner, call: &Call) -> Result<Reply> {
    let token = resolve_token(inner.store.as_ref(), call.token.as_ref()).await;
    let request = call.request.to_reqwest(&inner.http, token.as_deref());
    let path = call.path.as_str();

    let exchange = async move {
        let response = request
            .send()
            .await
            .map_err(|e| RequestError::from_transport(path, &e))?;
        response::intercept(response, path).await
    };
    let bounded = async {
        match call.timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .unwrap_or_else(|_| Err(RequestError::timeout(path, limit))),
            None => exchange.await,
        }
    };

    tokio::select! {
        biased;
        _ = call.cancel.cancelled() => Err(RequestError::aborted(path)),
        outcome = bounded => outcome,
    }
}

/// Full lifecycle of a logical call.
pub(crate) async fn execute(inner: Arc<ClientInner>, call: Arc<Call>) -> Result<Reply> {
    let outcome = call
        .retry
        .run(&call.path, &call.cancel, |_| attempt(&inner, &call))
        .await;
    match outcome {
        Err(error) if error.is_unauthorized() => recover(inner, call, error).await,
        other => other,
    }
}

/// Hand a 401 to the renewal state machine.
async fn recover(inner: Arc<ClientInner>, call: Arc<Call>, original: RequestError) -> Result<Reply> {
    if inner.store.get().await.refresh_token().is_none() {
        debug!(path = %call.path, "401 without a refresh token, nothing to renew");
        return Err(original);
    }

    let replay: ReplayFn = {
        let inner = inner.clone();
        let call = call.clone();
        Box::new(move || replay_once(inner, call).boxed())
    };

    match inner.refresh.admit(replay) {
        Admission::Lead => {
            let headers = base_headers(&[], call.request.request_id().unwrap_or_default());
            let renewal = inner.refresh.renew(&call.path, headers);
            let renewed = tokio::select! {
                biased;
                _ = call.cancel.cancelled() => return Err(RequestError::aborted(&call.path)),
                renewed = renewal => renewed,
            };
            match renewed {
                Ok(()) => replay_once(inner, call).await,
                Err(refresh_error) => Err(original.into_auth(refresh::auth_kind(&refresh_error))),
            }
        }
        Admission::Queued(settled) => tokio::select! {
            biased;
            _ = call.cancel.cancelled() => Err(RequestError::aborted(&call.path)),
            outcome = settled => outcome.unwrap_or_else(|_| {
                Err(RequestError::auth(
                    AuthErrorKind::RefreshFailed,
                    &call.path,
                    REFRESH_FAILED_MESSAGE,
                ))
            }),
        },
        Admission::Exhausted => {
            inner.refresh.give_up(&call.path).await;
            Err(original.into_auth(AuthErrorKind::RefreshExhausted))
        }
    }
}

/// The single post-renewal attempt. A second 401 ends the session.
async fn replay_once(inner: Arc<ClientInner>, call: Arc<Call>) -> Result<Reply> {
    match attempt(&inner, &call).await {
        Err(error) if error.is_unauthorized() => {
            warn!(path = %call.path, "still unauthorized after renewal");
            inner.refresh.session().invalidate(&call.path).await;
            Err(error.into_auth(AuthErrorKind::ReplayStillUnauthorized))
        }
        other => other,
    }
}
