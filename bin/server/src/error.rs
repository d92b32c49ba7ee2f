//! HTML error pages for failed requests.
//!
//! Flow failures are turned into an [`ErrorPage`]. The page always shows a
//! message that is safe for end users; the underlying error is only
//! rendered in development.

use crate::config::Environment;
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use lantern_identity::{AuthenticationError, TokenAcquisitionError};
use std::fmt;

/// A rendered error response.
#[derive(Debug, Clone)]
pub struct ErrorPage {
    status: StatusCode,
    message: String,
    detail: Option<String>,
    /// Offer a link to sign in again.
    retry: bool,
}

impl ErrorPage {
    /// The page served at `/error`.
    #[must_use]
    pub fn generic() -> Self {
        Self {
            status: StatusCode::OK,
            message: "Something went wrong.".to_string(),
            detail: None,
            retry: true,
        }
    }

    /// A sign-in flow ended in failure.
    #[must_use]
    pub fn authentication(error: &AuthenticationError, environment: Environment) -> Self {
        let status = match error {
            AuthenticationError::InvalidCallback { .. } => StatusCode::BAD_REQUEST,
            AuthenticationError::TokenValidation { .. } => StatusCode::UNAUTHORIZED,
            AuthenticationError::ProviderUnreachable { .. } => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            message: error.user_message().to_string(),
            detail: detail(error, environment),
            retry: true,
        }
    }

    /// No access token could be obtained without the provider.
    #[must_use]
    pub fn token(error: &TokenAcquisitionError, environment: Environment) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: "The identity provider is not responding. Please try again.".to_string(),
            detail: detail(error, environment),
            retry: true,
        }
    }

    /// Anything else that should not have happened.
    #[must_use]
    pub fn internal(error: &impl fmt::Display, environment: Environment) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Something went wrong.".to_string(),
            detail: detail(error, environment),
            retry: false,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

fn detail(error: &impl fmt::Display, environment: Environment) -> Option<String> {
    environment.is_development().then(|| error.to_string())
}

impl IntoResponse for ErrorPage {
    fn into_response(self) -> Response {
        let detail = self
            .detail
            .map(|d| format!("<pre class=\"detail\">{}</pre>", escape_html(&d)))
            .unwrap_or_default();
        let retry = if self.retry {
            r#"<p><a href="/auth/login">Sign in again</a></p>"#
        } else {
            ""
        };
        let body = format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head><meta charset=\"utf-8\"><title>Error</title></head>\n\
             <body>\n<h1>Error</h1>\n<p>{}</p>\n{detail}{retry}\n</body>\n</html>\n",
            escape_html(&self.message)
        );
        (self.status, Html(body)).into_response()
    }
}

/// Escapes text for use in HTML content and attribute values.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_of(page: ErrorPage) -> String {
        let response = page.into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn unreachable() -> AuthenticationError {
        AuthenticationError::ProviderUnreachable {
            reason: "connect timeout <idp>".to_string(),
        }
    }

    #[test]
    fn statuses_follow_failure_kind() {
        let invalid = AuthenticationError::InvalidCallback {
            reason: "state mismatch".to_string(),
        };
        let token = AuthenticationError::TokenValidation {
            reason: "bad aud".to_string(),
        };
        assert_eq!(
            ErrorPage::authentication(&invalid, Environment::Production).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ErrorPage::authentication(&token, Environment::Production).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ErrorPage::authentication(&unreachable(), Environment::Production).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[tokio::test]
    async fn production_hides_detail() {
        let body = body_of(ErrorPage::authentication(&unreachable(), Environment::Production)).await;
        assert!(body.contains("not responding"));
        assert!(!body.contains("connect timeout"));
        assert!(body.contains("/auth/login"));
    }

    #[tokio::test]
    async fn development_shows_escaped_detail() {
        let body =
            body_of(ErrorPage::authentication(&unreachable(), Environment::Development)).await;
        assert!(body.contains("connect timeout &lt;idp&gt;"));
    }

    #[tokio::test]
    async fn internal_has_no_retry_link() {
        let body = body_of(ErrorPage::internal(&"boom", Environment::Production)).await;
        assert!(!body.contains("/auth/login"));
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html(r#"<a href="x">O'Neil & co</a>"#),
            "&lt;a href=&quot;x&quot;&gt;O&#39;Neil &amp; co&lt;/a&gt;"
        );
    }
}
