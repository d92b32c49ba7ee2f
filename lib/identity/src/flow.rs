//! Sign-in flow states and the values carried between its steps.

use crate::error::AuthenticationError;
use crate::principal::Principal;
use crate::tokens::TokenBundle;
use chrono::{DateTime, Duration, Utc};
use lantern_core::FlowId;
use openidconnect::url::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// OAuth2 error code a provider returns when the user declines consent.
pub const ACCESS_DENIED: &str = "access_denied";

/// How long a challenge may wait for its callback.
pub const PENDING_LIFETIME: Duration = Duration::minutes(10);

/// Where a sign-in flow currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Unauthenticated,
    PendingCallback,
    ExchangingCode,
    Authenticated,
    Failed,
}

impl FlowState {
    /// Returns true if the flow may move from `self` to `next`.
    #[must_use]
    pub fn can_advance_to(self, next: FlowState) -> bool {
        use FlowState::*;
        matches!(
            (self, next),
            (Unauthenticated, PendingCallback)
                | (PendingCallback, ExchangingCode)
                | (PendingCallback, Failed)
                | (ExchangingCode, Authenticated)
                | (ExchangingCode, Failed)
        )
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unauthenticated => "unauthenticated",
            Self::PendingCallback => "pending_callback",
            Self::ExchangingCode => "exchanging_code",
            Self::Authenticated => "authenticated",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Per-flow secrets kept between the challenge and its callback.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAuthorization {
    flow_id: FlowId,
    state: String,
    nonce: String,
    pkce_verifier: String,
    return_to: String,
    created_at: DateTime<Utc>,
}

impl PendingAuthorization {
    #[must_use]
    pub fn new(state: String, nonce: String, pkce_verifier: String, return_to: String) -> Self {
        Self {
            flow_id: FlowId::new(),
            state,
            nonce,
            pkce_verifier,
            return_to,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn flow_id(&self) -> FlowId {
        self.flow_id
    }

    /// The CSRF binding echoed back by the provider.
    #[must_use]
    pub fn state(&self) -> &str {
        &self.state
    }

    #[must_use]
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    #[must_use]
    pub fn pkce_verifier(&self) -> &str {
        &self.pkce_verifier
    }

    /// Local path to return to after sign-in.
    #[must_use]
    pub fn return_to(&self) -> &str {
        &self.return_to
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns true once the callback window has closed.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.created_at
            .checked_add_signed(PENDING_LIFETIME)
            .is_none_or(|deadline| now >= deadline)
    }
}

impl fmt::Debug for PendingAuthorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingAuthorization")
            .field("flow_id", &self.flow_id)
            .field("return_to", &self.return_to)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// A challenge ready to be sent to the browser.
#[derive(Debug, Clone)]
pub struct Challenge {
    /// Authorization endpoint URL carrying every request parameter.
    pub authorization_url: Url,
    /// Secrets to persist until the callback arrives.
    pub pending: PendingAuthorization,
}

/// Query parameters of the provider's redirect back to the callback route.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// A completed sign-in.
#[derive(Debug, Clone)]
pub struct SignIn {
    pub principal: Principal,
    pub tokens: TokenBundle,
    pub return_to: String,
}

/// How a callback ended.
#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    Authenticated(Box<SignIn>),
    /// The user declined at the provider; send them to the application root.
    AccessDenied,
    Failed(AuthenticationError),
}

impl CallbackOutcome {
    /// The flow state this outcome leaves the flow in.
    #[must_use]
    pub fn state(&self) -> FlowState {
        match self {
            Self::Authenticated(_) => FlowState::Authenticated,
            Self::AccessDenied => FlowState::Unauthenticated,
            Self::Failed(_) => FlowState::Failed,
        }
    }
}

/// Tracks one flow through its states for logging.
pub(crate) struct FlowProgress {
    id: Option<FlowId>,
    state: FlowState,
}

impl FlowProgress {
    pub(crate) fn start(id: FlowId) -> Self {
        Self {
            id: Some(id),
            state: FlowState::Unauthenticated,
        }
    }

    pub(crate) fn resume(id: Option<FlowId>) -> Self {
        Self {
            id,
            state: FlowState::PendingCallback,
        }
    }

    pub(crate) fn advance(&mut self, next: FlowState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal flow transition {} -> {next}",
            self.state
        );
        debug!(flow_id = ?self.id, from = %self.state, to = %next, "flow transition");
        self.state = next;
    }

    pub(crate) fn fail(mut self, error: AuthenticationError) -> CallbackOutcome {
        self.advance(FlowState::Failed);
        CallbackOutcome::Failed(error)
    }

    pub(crate) fn succeed(mut self, sign_in: SignIn) -> CallbackOutcome {
        self.advance(FlowState::Authenticated);
        CallbackOutcome::Authenticated(Box::new(sign_in))
    }
}

/// Reduces a requested return location to a safe local path.
///
/// Only absolute paths on this origin are kept; anything that could leave
/// the site (`//host`, `/\host`, absolute URLs) becomes `/`.
#[must_use]
pub fn local_return_path(candidate: Option<&str>) -> String {
    match candidate {
        Some(path)
            if path.starts_with('/')
                && !path.starts_with("//")
                && !path.contains('\\')
                && !path.chars().any(char::is_control) =>
        {
            path.to_string()
        }
        _ => "/".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions() {
        use FlowState::*;
        assert!(Unauthenticated.can_advance_to(PendingCallback));
        assert!(PendingCallback.can_advance_to(ExchangingCode));
        assert!(ExchangingCode.can_advance_to(Authenticated));
        assert!(ExchangingCode.can_advance_to(Failed));
        assert!(!Unauthenticated.can_advance_to(Authenticated));
        assert!(!Failed.can_advance_to(Authenticated));
        assert!(!Authenticated.can_advance_to(ExchangingCode));
    }

    #[test]
    fn outcome_states() {
        assert_eq!(CallbackOutcome::AccessDenied.state(), FlowState::Unauthenticated);
        let failed = CallbackOutcome::Failed(AuthenticationError::InvalidCallback {
            reason: "state mismatch".to_string(),
        });
        assert_eq!(failed.state(), FlowState::Failed);
    }

    #[test]
    fn return_paths_stay_local() {
        assert_eq!(local_return_path(Some("/orders?page=2")), "/orders?page=2");
        assert_eq!(local_return_path(Some("//evil.example")), "/");
        assert_eq!(local_return_path(Some("/\\evil.example")), "/");
        assert_eq!(local_return_path(Some("https://evil.example/")), "/");
        assert_eq!(local_return_path(Some("relative")), "/");
        assert_eq!(local_return_path(None), "/");
    }

    #[test]
    fn pending_expires_after_window() {
        let pending = PendingAuthorization::new(
            "state".to_string(),
            "nonce".to_string(),
            "verifier".to_string(),
            "/".to_string(),
        );
        assert!(!pending.is_expired_at(pending.created_at() + Duration::minutes(9)));
        assert!(pending.is_expired_at(pending.created_at() + PENDING_LIFETIME));
    }

    #[test]
    fn debug_hides_secrets() {
        let pending = PendingAuthorization::new(
            "s3cr3t-state".to_string(),
            "n0nce".to_string(),
            "v3rifier".to_string(),
            "/".to_string(),
        );
        let debug = format!("{pending:?}");
        assert!(!debug.contains("s3cr3t-state"));
        assert!(!debug.contains("v3rifier"));
    }
}
