//! Redirect to the authentication entry point
//!
//! When a session cannot be recovered the credential store is cleared and
//! the application is sent to its login entry point with the original path
//! attached as `redirect_to`, unless the path already is the entry point.

use tracing::warn;

use crate::constants::REDIRECT_PARAM;

/// Application-side navigation hook for unrecoverable auth failures.
pub trait Navigator: Send + Sync {
    fn navigate(&self, target: &str);
}

/// Navigator for headless use: records the target in the log and does nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNavigator;

impl Navigator for TracingNavigator {
    fn navigate(&self, target: &str) {
        warn!(target_path = target, "session ended, sign-in required");
    }
}

/// Login URL that returns to `current_path` after authentication.
pub fn login_redirect_target(login_path: &str, current_path: &str) -> String {
    let bare = current_path.split('?').next().unwrap_or_default();
    if current_path.is_empty() || current_path == "/" || bare == login_path {
        return login_path.to_string();
    }
    let encoded: String = url::form_urlencoded::byte_serialize(current_path.as_bytes()).collect();
    format!("{login_path}?{REDIRECT_PARAM}={encoded}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carries_encoded_path() {
        assert_eq!(
            login_redirect_target("/login", "/docs/42?tab=ai"),
            "/login?redirect_to=%2Fdocs%2F42%3Ftab%3Dai"
        );
    }

    #[test]
    fn entry_point_and_root_get_no_parameter() {
        assert_eq!(login_redirect_target("/login", "/login"), "/login");
        assert_eq!(login_redirect_target("/login", "/login?x=1"), "/login");
        assert_eq!(login_redirect_target("/login", "/"), "/login");
        assert_eq!(login_redirect_target("/login", ""), "/login");
    }
}
