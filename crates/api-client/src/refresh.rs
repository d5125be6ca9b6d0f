//! Single-flight session renewal
//!
//! State shared by every request of one client:
//! - `in_flight`: a renewal is running
//! - `attempt_count`: renewals since the last successful one
//! - `pending`: calls that hit 401 while a renewal was running, in arrival order
//!
//! The first 401 leads: it starts the renewal on its own task so the renewal
//! finishes even if the leader is cancelled. Later 401s queue a replay and
//! wait. On success the counter resets, the new tokens are stored, and every
//! queued call is replayed once. On failure the store is cleared, the
//! application is sent to the login entry point, and every queued call
//! receives the renewal error. Once `attempt_count` reaches the maximum no
//! further renewal is attempted until one succeeds.
//!
//! The state lives behind a `std::sync::Mutex` that is never held across an
//! await, so admission and settlement are each one indivisible step.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::header::HeaderMap;
use session_auth::{CredentialStore, Navigator, login_redirect_target, refresh_session};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{AuthErrorKind, ErrorKind, RequestError, Result};
use crate::messages::REFRESH_FAILED_MESSAGE;
use crate::response::Reply;

/// Re-issues one suspended call after a successful renewal.
pub(crate) type ReplayFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<Reply>> + Send>;

struct QueuedCall {
    replay: ReplayFn,
    settle: oneshot::Sender<Result<Reply>>,
}

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    attempt_count: u32,
    pending: VecDeque<QueuedCall>,
}

/// Point-in-time view of the renewal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSnapshot {
    pub in_flight: bool,
    pub attempt_count: u32,
    pub queued: usize,
}

/// Decision for a call that received a 401.
pub(crate) enum Admission {
    /// Start the renewal
    Lead,
    /// A renewal is running; the receiver settles with the replay's outcome
    Queued(oneshot::Receiver<Result<Reply>>),
    /// Renewal budget spent
    Exhausted,
}

/// Ends a session that cannot be recovered.
#[derive(Clone)]
pub(crate) struct SessionGuard {
    pub(crate) store: Arc<dyn CredentialStore>,
    pub(crate) navigator: Arc<dyn Navigator>,
    pub(crate) login_path: String,
}

impl SessionGuard {
    /// Clear the credential store and redirect to the login entry point.
    pub(crate) async fn invalidate(&self, current_path: &str) {
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "failed to clear credential store");
        }
        let target = login_redirect_target(&self.login_path, current_path);
        info!(path = current_path, target = %target, "session invalidated");
        self.navigator.navigate(&target);
    }
}

pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
    max_attempts: u32,
    http: reqwest::Client,
    refresh_url: String,
    timeout: Duration,
    session: SessionGuard,
}

impl RefreshCoordinator {
    pub(crate) fn new(
        http: reqwest::Client,
        refresh_url: String,
        max_attempts: u32,
        timeout: Duration,
        session: SessionGuard,
    ) -> Self {
        Self {
            state: Mutex::new(RefreshState::default()),
            max_attempts,
            http,
            refresh_url,
            timeout,
            session,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> RefreshSnapshot {
        let state = self.lock();
        RefreshSnapshot {
            in_flight: state.in_flight,
            attempt_count: state.attempt_count,
            queued: state.pending.len(),
        }
    }

    pub fn attempt_count(&self) -> u32 {
        self.lock().attempt_count
    }

    pub fn is_refreshing(&self) -> bool {
        self.lock().in_flight
    }

    /// Admit a 401 into the state machine. `replay` is kept only when queued.
    pub(crate) fn admit(&self, replay: ReplayFn) -> Admission {
        let mut state = self.lock();
        if state.in_flight {
            let (settle, rx) = oneshot::channel();
            state.pending.push_back(QueuedCall { replay, settle });
            debug!(queued = state.pending.len(), "renewal in flight, call queued");
            return Admission::Queued(rx);
        }
        if state.attempt_count >= self.max_attempts {
            return Admission::Exhausted;
        }
        state.in_flight = true;
        state.attempt_count += 1;
        debug!(attempt = state.attempt_count, max = self.max_attempts, "leading renewal");
        Admission::Lead
    }

    /// Run the renewal on its own task and settle the queue with its outcome.
    ///
    /// Must only be called after `admit` returned `Lead`.
    pub(crate) async fn renew(self: &Arc<Self>, path: &str, headers: HeaderMap) -> Result<()> {
        let coordinator = Arc::clone(self);
        let task_path = path.to_string();
        let task = tokio::spawn(async move {
            let outcome = coordinator.run_renewal(&task_path, headers).await;
            coordinator.settle(&outcome);
            outcome
        });

        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let error = RequestError::auth(
                    AuthErrorKind::RefreshFailed,
                    path,
                    format!("renewal task failed: {e}"),
                );
                self.settle(&Err(error.clone()));
                Err(error)
            }
        }
    }

    async fn run_renewal(&self, path: &str, headers: HeaderMap) -> Result<()> {
        let credential = self.session.store.get().await;
        let Some(refresh) = credential.refresh_token() else {
            warn!(path, "refresh token vanished before renewal");
            crate::metrics::record_refresh("no_token");
            self.session.invalidate(path).await;
            return Err(RequestError::auth(
                AuthErrorKind::NoRefreshToken,
                path,
                REFRESH_FAILED_MESSAGE,
            ));
        };

        let failure = match refresh_session(&self.http, &self.refresh_url, refresh, headers, self.timeout)
            .await
        {
            Ok(token) => match self.session.store.set(token.into()).await {
                Ok(()) => {
                    crate::metrics::record_refresh("success");
                    info!(path, "session renewed");
                    return Ok(());
                }
                Err(e) => format!("failed to store renewed tokens: {e}"),
            },
            Err(e) => e.to_string(),
        };

        warn!(path, error = %failure, "session renewal failed");
        crate::metrics::record_refresh("failure");
        self.session.invalidate(path).await;
        Err(RequestError::auth(
            AuthErrorKind::RefreshFailed,
            path,
            REFRESH_FAILED_MESSAGE,
        ))
    }

    /// Close the in-flight renewal and release everything queued behind it.
    fn settle(&self, outcome: &Result<()>) {
        let pending = {
            let mut state = self.lock();
            state.in_flight = false;
            if outcome.is_ok() {
                state.attempt_count = 0;
            }
            std::mem::take(&mut state.pending)
        };

        if !pending.is_empty() {
            debug!(queued = pending.len(), renewed = outcome.is_ok(), "releasing queued calls");
        }
        for call in pending {
            match outcome {
                Ok(()) => {
                    tokio::spawn(async move {
                        let result = (call.replay)().await;
                        let _ = call.settle.send(result);
                    });
                }
                Err(error) => {
                    let _ = call.settle.send(Err(error.clone()));
                }
            }
        }
    }

    /// Invalidate the session for an exhausted budget.
    pub(crate) async fn give_up(&self, path: &str) {
        warn!(path, max = self.max_attempts, "renewal attempts exhausted");
        crate::metrics::record_refresh("exhausted");
        self.session.invalidate(path).await;
    }

    pub(crate) fn session(&self) -> &SessionGuard {
        &self.session
    }
}

/// Auth kind carried by a renewal error, for re-labelling the trigger's 401.
pub(crate) fn auth_kind(error: &RequestError) -> AuthErrorKind {
    match error.kind {
        ErrorKind::Auth(kind) => kind,
        _ => AuthErrorKind::RefreshFailed,
    }
}
