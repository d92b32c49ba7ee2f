//! Router assembly and the application shell.

use axum::{
    Router,
    extract::{Request, State},
    http::{HeaderValue, Uri, header},
    middleware::{self, Next},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
};
use axum_extra::extract::CookieJar;
use lantern_identity::{SessionTicket, TokenAcquisitionError};
use std::path::Path;
use std::sync::Arc;
use tower_http::{
    services::{ServeDir, ServeFile},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::auth::{self, AppState, CurrentSession};
use crate::error::{ErrorPage, escape_html};

const HSTS: &str = "max-age=2592000";

const FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Builds the application router.
///
/// Every route sits behind the access gate; the gate's exemptions decide
/// which ones are reachable without a session.
pub fn router(state: Arc<AppState>, static_dir: &Path) -> Router {
    let production = !state.environment.is_development();

    let router = Router::new()
        .route("/auth/login", get(auth::login))
        .route("/auth/callback", get(auth::callback))
        .route("/auth/logout", get(auth::logout).post(auth::logout))
        .route("/error", get(error_page))
        .route_service("/favicon.ico", ServeFile::new(static_dir.join("favicon.ico")))
        .nest_service("/static", ServeDir::new(static_dir))
        .fallback(shell)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::access_gate,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    if production {
        router
            .layer(middleware::from_fn_with_state(state, https_redirect))
            .layer(SetResponseHeaderLayer::if_not_present(
                header::STRICT_TRANSPORT_SECURITY,
                HeaderValue::from_static(HSTS),
            ))
    } else {
        router
    }
}

/// Sends requests that reached the TLS-terminating proxy over plain HTTP
/// to the public HTTPS address.
async fn https_redirect(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let plain_http = request
        .headers()
        .get(FORWARDED_PROTO)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("http"));
    if !plain_http || !state.public_url.starts_with("https://") {
        return next.run(request).await;
    }

    let path = request
        .uri()
        .path_and_query()
        .map_or("/", |pq| pq.as_str());
    let target = format!("{}{path}", state.public_url.trim_end_matches('/'));
    Redirect::permanent(&target).into_response()
}

async fn error_page() -> ErrorPage {
    ErrorPage::generic()
}

/// Placeholder application page for a signed-in user.
///
/// Obtains an access token on every render so an expired session is caught
/// here rather than by a downstream call.
async fn shell(
    State(state): State<Arc<AppState>>,
    CurrentSession(ticket): CurrentSession,
    uri: Uri,
    jar: CookieJar,
) -> Response {
    let acquired = match state.tokens.acquire(&ticket, None).await {
        Ok(acquired) => acquired,
        Err(TokenAcquisitionError::ReauthenticationRequired { reason }) => {
            info!(reason = %reason, "session needs a fresh sign-in");
            let return_to = uri.path_and_query().map(|pq| pq.as_str().to_string());
            return state.challenge(jar.add(state.sessions.removal()), return_to.as_deref());
        }
        Err(e @ TokenAcquisitionError::ProviderUnreachable { .. }) => {
            warn!(error = %e, "could not obtain an access token");
            return ErrorPage::token(&e, state.environment).into_response();
        }
    };

    let (jar, ticket) = match acquired.renewed {
        Some(renewed) => match state.sessions.persist_ticket(&renewed) {
            Ok(cookie) => (jar.add(cookie), renewed),
            Err(e) => {
                warn!(error = %e, "failed to reseal renewed session");
                (jar, (*ticket).clone())
            }
        },
        None => (jar, (*ticket).clone()),
    };

    (jar, Html(render_shell(&ticket))).into_response()
}

fn render_shell(ticket: &SessionTicket) -> String {
    let principal = ticket.principal();
    let roles = if principal.roles().is_empty() {
        "<li>none</li>".to_string()
    } else {
        principal
            .roles()
            .iter()
            .map(|role| format!("<li>{}</li>", escape_html(role)))
            .collect::<String>()
    };

    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head><meta charset=\"utf-8\"><title>lantern</title>\
         <link rel=\"stylesheet\" href=\"/static/site.css\"></head>\n<body>\n\
         <header><p>Signed in as <strong>{name}</strong></p>\
         <form method=\"post\" action=\"/auth/logout\"><button type=\"submit\">Sign out</button></form></header>\n\
         <main><h2>Roles</h2><ul>{roles}</ul>\
         <p>Session valid until {expires}</p></main>\n</body>\n</html>\n",
        name = escape_html(principal.display_name()),
        expires = ticket.expires_at().format("%Y-%m-%d %H:%M UTC"),
    )
}
