//! Access-gate middleware and the session extractor for Axum.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use chrono::Utc;
use lantern_identity::{DenyReason, GateDecision, SessionState, SessionTicket};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{AppState, found};

/// The restored session of the current request.
///
/// Only present on routes behind the access gate that let the request
/// through with a valid session.
#[derive(Debug, Clone)]
pub struct CurrentSession(pub Arc<SessionTicket>);

impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = SessionRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentSession>()
            .cloned()
            .ok_or(SessionRejection)
    }
}

/// Rejection for [`CurrentSession`] on a request without a session.
#[derive(Debug)]
pub struct SessionRejection;

impl IntoResponse for SessionRejection {
    fn into_response(self) -> Response {
        found("/auth/login")
    }
}

/// Challenges requests without a valid session and slides live ones.
///
/// An unusable session cookie is cleared on every route, exempt or not.
pub async fn access_gate(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let cookie_name = state.sessions.cookie_name().to_string();
    let session = state.sessions.inspect(jar.get(&cookie_name));
    let path = request.uri().path().to_string();

    match state.gate.authorize(&path, &session) {
        GateDecision::Deny(reason) => {
            let jar = match &reason {
                DenyReason::SessionInvalid(invalid) => {
                    warn!(path = %path, reason = %invalid, "discarding session cookie");
                    jar.add(state.sessions.removal())
                }
                DenyReason::NoSession => {
                    debug!(path = %path, "no session, challenging");
                    jar
                }
            };
            let return_to = request
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string());
            state.challenge(jar, return_to.as_deref())
        }
        GateDecision::Allow => {
            let ticket = match session {
                SessionState::Restored(ticket) => ticket,
                SessionState::Missing => return next.run(request).await,
                SessionState::Invalid(invalid) => {
                    debug!(path = %path, reason = %invalid, "clearing unusable session cookie");
                    let response = next.run(request).await;
                    if sets_cookie(&response, &cookie_name) {
                        return response;
                    }
                    return (jar.add(state.sessions.removal()), response).into_response();
                }
            };

            let slid = state.sessions.slide(&ticket, Utc::now());
            let current = slid.clone().unwrap_or(*ticket);
            request
                .extensions_mut()
                .insert(CurrentSession(Arc::new(current)));

            let response = next.run(request).await;

            let Some(slid) = slid else {
                return response;
            };
            if sets_cookie(&response, &cookie_name) {
                return response;
            }
            match state.sessions.persist_ticket(&slid) {
                Ok(cookie) => {
                    debug!(ticket = %slid.id(), "session extended");
                    (jar.add(cookie), response).into_response()
                }
                Err(e) => {
                    warn!(error = %e, "failed to reseal extended session");
                    response
                }
            }
        }
    }
}

/// Whether the handler already wrote the named cookie.
fn sets_cookie(response: &Response, name: &str) -> bool {
    let prefix = format!("{name}=");
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.starts_with(&prefix))
}
