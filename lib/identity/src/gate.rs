//! Default authorization policy: every route needs a session unless exempt.

use crate::error::SessionInvalid;
use crate::session::SessionState;
use std::fmt;

/// A route that does not require a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exemption {
    /// Exactly this path.
    Exact(String),
    /// Any path starting with this prefix.
    Prefix(String),
}

impl Exemption {
    fn matches(&self, path: &str) -> bool {
        match self {
            Self::Exact(exact) => path == exact,
            Self::Prefix(prefix) => path.starts_with(prefix.as_str()),
        }
    }
}

/// Why a request was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    NoSession,
    SessionInvalid(SessionInvalid),
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSession => write!(f, "no session"),
            Self::SessionInvalid(reason) => write!(f, "{reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Deny(DenyReason),
}

/// Decides whether a request may proceed.
#[derive(Debug, Clone)]
pub struct AccessGate {
    exemptions: Vec<Exemption>,
}

impl AccessGate {
    #[must_use]
    pub fn new(exemptions: Vec<Exemption>) -> Self {
        Self { exemptions }
    }

    /// Adds an exemption.
    #[must_use]
    pub fn exempt(mut self, exemption: Exemption) -> Self {
        self.exemptions.push(exemption);
        self
    }

    #[must_use]
    pub fn is_exempt(&self, path: &str) -> bool {
        self.exemptions.iter().any(|e| e.matches(path))
    }

    #[must_use]
    pub fn authorize(&self, path: &str, session: &SessionState) -> GateDecision {
        if self.is_exempt(path) {
            return GateDecision::Allow;
        }
        match session {
            SessionState::Restored(_) => GateDecision::Allow,
            SessionState::Missing => GateDecision::Deny(DenyReason::NoSession),
            SessionState::Invalid(reason) => {
                GateDecision::Deny(DenyReason::SessionInvalid(reason.clone()))
            }
        }
    }
}

impl Default for AccessGate {
    /// Sign-in routes, the error page and static assets are exempt.
    fn default() -> Self {
        Self::new(vec![
            Exemption::Prefix("/auth/".to_string()),
            Exemption::Exact("/error".to_string()),
            Exemption::Prefix("/static/".to_string()),
            Exemption::Exact("/favicon.ico".to_string()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::ClaimSet;
    use crate::principal::Principal;
    use crate::session::SessionTicket;
    use crate::tokens::TokenBundle;
    use chrono::{Duration, Utc};

    fn restored() -> SessionState {
        let mut claims = ClaimSet::new();
        claims.insert("sub", ["alice"]);
        let principal = Principal::from_claims(claims, "name", "role").expect("principal");
        let tokens = TokenBundle::new(
            "id".to_string(),
            "access".to_string(),
            None,
            Utc::now() + Duration::hours(1),
            Vec::new(),
        );
        SessionState::Restored(Box::new(SessionTicket::issue(
            principal,
            tokens,
            Duration::hours(1),
            Utc::now(),
        )))
    }

    #[test]
    fn protected_routes_need_a_session() {
        let gate = AccessGate::default();

        assert_eq!(gate.authorize("/", &restored()), GateDecision::Allow);
        assert_eq!(
            gate.authorize("/", &SessionState::Missing),
            GateDecision::Deny(DenyReason::NoSession)
        );
        assert_eq!(
            gate.authorize(
                "/reports",
                &SessionState::Invalid(SessionInvalid::SignatureMismatch)
            ),
            GateDecision::Deny(DenyReason::SessionInvalid(SessionInvalid::SignatureMismatch))
        );
    }

    #[test]
    fn exempt_routes_pass_without_a_session() {
        let gate = AccessGate::default();
        for path in [
            "/auth/login",
            "/auth/callback",
            "/auth/logout",
            "/error",
            "/static/site.css",
            "/favicon.ico",
        ] {
            assert_eq!(
                gate.authorize(path, &SessionState::Missing),
                GateDecision::Allow,
                "{path}"
            );
        }
    }

    #[test]
    fn exact_exemptions_do_not_cover_subpaths() {
        let gate = AccessGate::default();
        assert!(!gate.is_exempt("/errors"));
        assert!(!gate.is_exempt("/error/detail"));
        assert!(!gate.is_exempt("/authx"));
    }

    #[test]
    fn custom_exemption() {
        let gate = AccessGate::new(Vec::new()).exempt(Exemption::Exact("/health".to_string()));
        assert!(gate.is_exempt("/health"));
        assert!(!gate.is_exempt("/auth/login"));
    }
}
