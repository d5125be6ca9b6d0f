//! Error hooks and the uniform failure message
//!
//! A caller may pass either a single catch-all function or a set of hooks.
//! The catch-all is adapted into `ErrorHooks { on_error, .. }` so there is
//! exactly one dispatch path.
//!
//! Precedence for one failure:
//! 1. cancellation: no failure hook
//! 2. network failure: `network_error`
//! 3. exact status hook, then `unauthorized` (401), `forbidden` (403),
//!    `server_error` (>= 500)
//! 4. `default`
//!
//! `on_error` observes every failure exactly once, including cancellations.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{ErrorKind, RequestError};
use crate::messages::{CANCELED_MESSAGE, FALLBACK_MESSAGE, NETWORK_ERROR_MESSAGE};

pub type Hook = Arc<dyn Fn() + Send + Sync>;
pub type ErrorHook = Arc<dyn Fn(&RequestError) + Send + Sync>;

#[derive(Clone, Default)]
pub struct ErrorHooks {
    pub on_error: Option<ErrorHook>,
    pub unauthorized: Option<Hook>,
    pub forbidden: Option<Hook>,
    pub server_error: Option<Hook>,
    pub network_error: Option<Hook>,
    pub default: Option<ErrorHook>,
    pub by_status: HashMap<u16, ErrorHook>,
}

impl ErrorHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_error(mut self, hook: impl Fn(&RequestError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }

    pub fn unauthorized(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.unauthorized = Some(Arc::new(hook));
        self
    }

    pub fn forbidden(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.forbidden = Some(Arc::new(hook));
        self
    }

    pub fn server_error(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.server_error = Some(Arc::new(hook));
        self
    }

    pub fn network_error(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.network_error = Some(Arc::new(hook));
        self
    }

    /// Hook for failures no more specific hook claimed.
    pub fn fallback(mut self, hook: impl Fn(&RequestError) + Send + Sync + 'static) -> Self {
        self.default = Some(Arc::new(hook));
        self
    }

    pub fn status(mut self, status: u16, hook: impl Fn(&RequestError) + Send + Sync + 'static) -> Self {
        self.by_status.insert(status, Arc::new(hook));
        self
    }

    /// Run the precedence chain. Returns false when no hook matched.
    fn run_chain(&self, error: &RequestError) -> bool {
        match error.kind {
            ErrorKind::Abort => return false,
            ErrorKind::Network => {
                return match &self.network_error {
                    Some(hook) => {
                        hook();
                        true
                    }
                    None => false,
                };
            }
            _ => {}
        }

        if let Some(status) = error.status {
            if let Some(hook) = self.by_status.get(&status) {
                hook(error);
                return true;
            }
            let class_hook = match status {
                401 => self.unauthorized.as_ref(),
                403 => self.forbidden.as_ref(),
                s if s >= 500 => self.server_error.as_ref(),
                _ => None,
            };
            if let Some(hook) = class_hook {
                hook();
                return true;
            }
        }

        match &self.default {
            Some(hook) => {
                hook(error);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for ErrorHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut statuses: Vec<_> = self.by_status.keys().copied().collect();
        statuses.sort_unstable();
        f.debug_struct("ErrorHooks")
            .field("on_error", &self.on_error.is_some())
            .field("unauthorized", &self.unauthorized.is_some())
            .field("forbidden", &self.forbidden.is_some())
            .field("server_error", &self.server_error.is_some())
            .field("network_error", &self.network_error.is_some())
            .field("default", &self.default.is_some())
            .field("by_status", &statuses)
            .finish()
    }
}

/// What a caller hands to a request for failure handling.
#[derive(Clone)]
pub enum ErrorHandler {
    CatchAll(ErrorHook),
    Hooks(ErrorHooks),
}

impl ErrorHandler {
    pub fn catch_all(hook: impl Fn(&RequestError) + Send + Sync + 'static) -> Self {
        Self::CatchAll(Arc::new(hook))
    }

    /// The hook set this handler stands for.
    pub fn hooks(&self) -> ErrorHooks {
        match self {
            ErrorHandler::CatchAll(hook) => ErrorHooks {
                on_error: Some(hook.clone()),
                ..ErrorHooks::default()
            },
            ErrorHandler::Hooks(hooks) => hooks.clone(),
        }
    }
}

impl From<ErrorHooks> for ErrorHandler {
    fn from(hooks: ErrorHooks) -> Self {
        ErrorHandler::Hooks(hooks)
    }
}

impl fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorHandler::CatchAll(_) => f.write_str("ErrorHandler::CatchAll"),
            ErrorHandler::Hooks(hooks) => f.debug_tuple("ErrorHandler::Hooks").field(hooks).finish(),
        }
    }
}

/// Message returned to the caller for a failure.
pub fn user_message(error: &RequestError) -> String {
    match error.kind {
        ErrorKind::Network => NETWORK_ERROR_MESSAGE.to_string(),
        ErrorKind::Abort => CANCELED_MESSAGE.to_string(),
        _ if error.message.trim().is_empty() => FALLBACK_MESSAGE.to_string(),
        _ => error.message.clone(),
    }
}

/// Run the caller's hooks for a failure and return the message for the
/// uniform result.
pub fn dispatch(error: &RequestError, handler: Option<&ErrorHandler>) -> String {
    if error.is_abort() {
        debug!(path = %error.path, "request canceled");
    } else {
        warn!(
            path = %error.path,
            kind = error.kind.label(),
            status = ?error.status,
            error = %error.message,
            "request failed"
        );
    }

    if let Some(handler) = handler {
        let hooks = handler.hooks();
        hooks.run_chain(error);
        if let Some(on_error) = &hooks.on_error {
            on_error(error);
        }
    }
    user_message(error)
}
