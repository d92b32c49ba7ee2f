//! Authentication routes for login, callback, and logout.

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use lantern_identity::session::PENDING_COOKIE_NAME;
use lantern_identity::{CallbackOutcome, CallbackParams};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::{AppState, found};
use crate::error::ErrorPage;

/// Query parameters for the login route.
#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    return_to: Option<String>,
}

/// Initiates the OIDC login flow by redirecting to the identity provider.
pub async fn login(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LoginQuery>,
    jar: CookieJar,
) -> Response {
    state.challenge(jar, query.return_to.as_deref())
}

/// Handles the OIDC callback after the user authenticates with the identity provider.
pub async fn callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
    jar: CookieJar,
) -> Response {
    let pending = jar
        .get(PENDING_COOKIE_NAME)
        .and_then(|cookie| match state.sessions.open_pending(cookie) {
            Ok(pending) => Some(pending),
            Err(e) => {
                debug!(error = %e, "ignoring unusable pending authorization cookie");
                None
            }
        });
    let jar = jar.add(state.sessions.pending_removal());

    match state.coordinator.complete(params, pending).await {
        CallbackOutcome::Authenticated(sign_in) => {
            let sign_in = *sign_in;
            match state.sessions.persist(sign_in.principal, sign_in.tokens) {
                Ok((ticket, cookie)) => {
                    info!(ticket = %ticket.id(), "session issued");
                    (jar.add(cookie), found(&sign_in.return_to)).into_response()
                }
                Err(e) => {
                    error!(error = %e, "failed to seal session");
                    (jar, ErrorPage::internal(&e, state.environment)).into_response()
                }
            }
        }
        CallbackOutcome::AccessDenied => (jar, found("/")).into_response(),
        CallbackOutcome::Failed(e) => {
            (jar, ErrorPage::authentication(&e, state.environment)).into_response()
        }
    }
}

/// Signs the user out locally and, when supported, at the provider.
pub async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let ticket = jar
        .get(state.sessions.cookie_name())
        .and_then(|cookie| state.sessions.restore(cookie).ok());

    if let Some(ticket) = &ticket {
        info!(ticket = %ticket.id(), subject = ticket.principal().subject(), "signing out");
    }

    let jar = jar.add(state.sessions.removal());
    let id_token_hint = ticket.as_ref().map(|t| t.tokens().id_token());
    let post_logout = format!("{}/", state.public_url.trim_end_matches('/'));

    match state.coordinator.end_session_url(id_token_hint, &post_logout) {
        Some(url) => (jar, found(url.as_str())).into_response(),
        None => (jar, found("/")).into_response(),
    }
}
