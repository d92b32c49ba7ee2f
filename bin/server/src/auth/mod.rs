//! Authentication for the lantern server.
//!
//! This module provides:
//! - The OIDC-discovery-backed identity provider
//! - Sign-in, callback and sign-out routes
//! - The access-gate middleware and the `CurrentSession` extractor
//!
//! Sessions live entirely in sealed cookies, so the only shared state is
//! the immutable [`AppState`] built at startup.

pub mod middleware;
pub mod oidc;
pub mod routes;

use crate::config::{Environment, ServerConfig};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;
use lantern_identity::{
    AccessGate, Coordinator, IdentityProvider, SessionStore, TokenAcquirer,
};
use std::sync::Arc;
use tracing::error;

pub use middleware::{CurrentSession, access_gate};
pub use oidc::DiscoveredProvider;
pub use routes::{callback, login, logout};

use crate::error::ErrorPage;

/// Shared application state.
pub struct AppState {
    pub coordinator: Coordinator,
    pub tokens: TokenAcquirer,
    pub sessions: SessionStore,
    pub gate: AccessGate,
    pub environment: Environment,
    /// Where the provider sends the browser after sign-out.
    pub public_url: String,
}

impl AppState {
    /// Wires the identity components from configuration.
    pub fn new(config: &ServerConfig, provider: Arc<dyn IdentityProvider>) -> Self {
        let provider_config = Arc::new(config.provider.clone());
        let lifetime = config.session.lifetime();

        Self {
            coordinator: Coordinator::new(provider_config.clone(), provider.clone()),
            tokens: TokenAcquirer::new(provider_config, provider, lifetime),
            sessions: SessionStore::new(config.session_key.clone())
                .with_cookie_name(config.session.cookie_name.clone())
                .with_lifetime(lifetime)
                .with_secure(config.session.secure_cookies),
            gate: AccessGate::default(),
            environment: config.environment,
            public_url: config.public_url.clone(),
        }
    }

    /// Redirects the browser to the provider, remembering `return_to`.
    pub fn challenge(&self, jar: CookieJar, return_to: Option<&str>) -> Response {
        let challenge = self.coordinator.challenge(return_to);
        match self.sessions.seal_pending(&challenge.pending) {
            Ok(cookie) => (jar.add(cookie), found(challenge.authorization_url.as_str())).into_response(),
            Err(e) => {
                error!(error = %e, "failed to seal pending authorization");
                ErrorPage::internal(&e, self.environment).into_response()
            }
        }
    }
}

/// `302 Found` to `location`; axum's `Redirect` only offers 303, 307 and 308.
pub fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
        Err(_) => (StatusCode::FOUND, [(header::LOCATION, HeaderValue::from_static("/"))])
            .into_response(),
    }
}
