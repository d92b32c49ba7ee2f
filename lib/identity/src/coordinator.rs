//! Drives the authorization code flow with PKCE.
//!
//! [`Coordinator::challenge`] starts a flow and [`Coordinator::complete`]
//! finishes it from the provider's callback. Every way a callback can end is
//! a [`CallbackOutcome`] value; the HTTP layer decides what each one looks
//! like to the browser.
//!
//! Token validation is hard-fail: a token that does not pass every check
//! ends the flow in `Failed` and no session is issued. User-info
//! augmentation is soft-fail: if the endpoint errors, times out, or answers
//! for a different subject, the flow continues with the ID token's claims.

use crate::claims::{ClaimSet, RawClaims};
use crate::config::ProviderConfiguration;
use crate::error::AuthenticationError;
use crate::flow::{
    ACCESS_DENIED, CallbackOutcome, CallbackParams, Challenge, FlowProgress, FlowState,
    PendingAuthorization, SignIn, local_return_path,
};
use crate::principal::{Principal, SUBJECT_CLAIM};
use crate::provider::{IdentityProvider, ProviderError, TokenGrant};
use crate::tokens::{TokenBundle, expiry_from};
use chrono::{DateTime, Utc};
use openidconnect::url::Url;
use openidconnect::{CsrfToken, Nonce, PkceCodeChallenge};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

const PKCE_METHOD: &str = "S256";

/// Claims the coordinator checks on every ID token.
#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    iss: Option<String>,
    aud: Option<Audience>,
    exp: Option<i64>,
    nonce: Option<String>,
    sub: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn contains(&self, client_id: &str) -> bool {
        match self {
            Self::One(aud) => aud == client_id,
            Self::Many(auds) => auds.iter().any(|aud| aud == client_id),
        }
    }
}

/// Runs sign-in flows against one identity provider.
#[derive(Clone)]
pub struct Coordinator {
    config: Arc<ProviderConfiguration>,
    provider: Arc<dyn IdentityProvider>,
}

impl Coordinator {
    #[must_use]
    pub fn new(config: Arc<ProviderConfiguration>, provider: Arc<dyn IdentityProvider>) -> Self {
        Self { config, provider }
    }

    #[must_use]
    pub fn config(&self) -> &Arc<ProviderConfiguration> {
        &self.config
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<dyn IdentityProvider> {
        &self.provider
    }

    /// Starts a flow: fresh PKCE pair, state and nonce, plus the URL to send
    /// the browser to.
    #[instrument(skip(self))]
    pub fn challenge(&self, return_to: Option<&str>) -> Challenge {
        let (code_challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        let state = CsrfToken::new_random();
        let nonce = Nonce::new_random();

        let pending = PendingAuthorization::new(
            state.secret().clone(),
            nonce.secret().clone(),
            verifier.secret().clone(),
            local_return_path(return_to),
        );

        let mut authorization_url = self.provider.authorization_endpoint().clone();
        authorization_url
            .query_pairs_mut()
            .append_pair("response_type", self.config.response_type())
            .append_pair("client_id", self.config.client_id())
            .append_pair("redirect_uri", self.config.redirect_uri())
            .append_pair("scope", &self.config.scopes().to_param())
            .append_pair("state", pending.state())
            .append_pair("nonce", pending.nonce())
            .append_pair("code_challenge", code_challenge.as_str())
            .append_pair("code_challenge_method", PKCE_METHOD);

        FlowProgress::start(pending.flow_id()).advance(FlowState::PendingCallback);

        Challenge {
            authorization_url,
            pending,
        }
    }

    /// Finishes a flow from the provider's callback.
    #[instrument(skip_all, fields(flow_id = ?pending.as_ref().map(PendingAuthorization::flow_id)))]
    pub async fn complete(
        &self,
        params: CallbackParams,
        pending: Option<PendingAuthorization>,
    ) -> CallbackOutcome {
        let now = Utc::now();

        if let Some(error) = params.error.as_deref() {
            if error == ACCESS_DENIED {
                info!("user declined at the identity provider");
                return CallbackOutcome::AccessDenied;
            }
            let reason = match params.error_description.as_deref() {
                Some(description) => format!("provider returned {error}: {description}"),
                None => format!("provider returned {error}"),
            };
            return FlowProgress::resume(pending.map(|p| p.flow_id()))
                .fail(AuthenticationError::InvalidCallback { reason });
        }

        let Some(pending) = pending else {
            return FlowProgress::resume(None).fail(invalid_callback("no pending authorization"));
        };
        let mut progress = FlowProgress::resume(Some(pending.flow_id()));

        if pending.is_expired_at(now) {
            return progress.fail(invalid_callback("pending authorization expired"));
        }
        if params.state.as_deref() != Some(pending.state()) {
            return progress.fail(invalid_callback("state mismatch"));
        }
        let Some(code) = params.code.as_deref().filter(|code| !code.is_empty()) else {
            return progress.fail(invalid_callback("missing authorization code"));
        };

        progress.advance(FlowState::ExchangingCode);

        let exchange = self
            .provider
            .exchange_code(code, pending.pkce_verifier(), pending.nonce());
        let grant = match timeout(self.config.timeout(), exchange).await {
            Ok(Ok(grant)) => grant,
            Ok(Err(e)) => {
                warn!(error = %e, "code exchange failed");
                return progress.fail(authentication_error(e));
            }
            Err(_) => {
                warn!(timeout = ?self.config.timeout(), "code exchange timed out");
                return progress.fail(AuthenticationError::ProviderUnreachable {
                    reason: "token endpoint did not answer in time".to_string(),
                });
            }
        };

        let TokenGrant {
            access_token,
            refresh_token,
            expires_in,
            scopes,
            id_token,
        } = grant;

        let Some(id_token) = id_token else {
            return progress.fail(token_validation("token response has no ID token"));
        };

        let subject = match self.validate_id_token(&id_token.claims, pending.nonce(), now) {
            Ok(subject) => subject,
            Err(e) => {
                warn!(error = %e, "ID token rejected");
                return progress.fail(e);
            }
        };

        let mut claims = ClaimSet::from_json(&id_token.claims);
        if self.config.user_info_claims() && self.provider.has_user_info() {
            if let Some(extra) = self.user_info_claims(&access_token, &subject).await {
                claims.merge(extra);
            }
        }

        let Some(principal) =
            Principal::from_claims(claims, self.config.name_claim(), self.config.role_claim())
        else {
            return progress.fail(token_validation("ID token has no subject"));
        };

        let scopes = scopes.unwrap_or_else(|| self.config.scopes().as_slice().to_vec());
        let tokens = TokenBundle::new(
            id_token.raw,
            access_token,
            refresh_token,
            expiry_from(now, expires_in),
            scopes,
        );

        info!(subject = principal.subject(), "sign-in completed");
        progress.succeed(SignIn {
            principal,
            tokens,
            return_to: pending.return_to().to_string(),
        })
    }

    /// Builds the provider's sign-out URL, when it advertises one.
    #[must_use]
    pub fn end_session_url(
        &self,
        id_token_hint: Option<&str>,
        post_logout_redirect_uri: &str,
    ) -> Option<Url> {
        let mut url = self.provider.end_session_endpoint()?.clone();
        {
            let mut query = url.query_pairs_mut();
            if let Some(hint) = id_token_hint {
                query.append_pair("id_token_hint", hint);
            }
            query
                .append_pair("client_id", self.config.client_id())
                .append_pair("post_logout_redirect_uri", post_logout_redirect_uri);
        }
        Some(url)
    }

    /// Checks issuer, audience, expiry, nonce and subject; returns the subject.
    fn validate_id_token(
        &self,
        raw: &RawClaims,
        nonce: &str,
        now: DateTime<Utc>,
    ) -> Result<String, AuthenticationError> {
        let claims: IdTokenClaims = serde_json::from_value(Value::Object(raw.clone()))
            .map_err(|e| token_validation(&format!("unreadable claims: {e}")))?;

        let issuer = claims.iss.ok_or_else(|| token_validation("missing iss"))?;
        if !self.config.matches_issuer(&issuer) {
            return Err(token_validation(&format!("unexpected issuer {issuer}")));
        }

        let audience = claims.aud.ok_or_else(|| token_validation("missing aud"))?;
        if !audience.contains(self.config.client_id()) {
            return Err(token_validation("audience does not include this client"));
        }

        let exp = claims.exp.ok_or_else(|| token_validation("missing exp"))?;
        let expires_at = DateTime::from_timestamp(exp, 0)
            .ok_or_else(|| token_validation("exp out of range"))?;
        let deadline = expires_at
            .checked_add_signed(self.config.clock_skew())
            .ok_or_else(|| token_validation("exp out of range"))?;
        if now > deadline {
            return Err(token_validation(&format!("token expired at {expires_at}")));
        }

        if claims.nonce.as_deref() != Some(nonce) {
            return Err(token_validation("nonce mismatch"));
        }

        claims
            .sub
            .filter(|sub| !sub.trim().is_empty())
            .ok_or_else(|| token_validation("missing sub"))
    }

    async fn user_info_claims(&self, access_token: &str, subject: &str) -> Option<ClaimSet> {
        let raw = match timeout(self.config.timeout(), self.provider.user_info(access_token)).await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!(error = %e, "user-info request failed; using ID token claims");
                return None;
            }
            Err(_) => {
                warn!(timeout = ?self.config.timeout(), "user-info request timed out; using ID token claims");
                return None;
            }
        };

        let claims = ClaimSet::from_json(&raw);
        if claims.first(SUBJECT_CLAIM) != Some(subject) {
            warn!("user-info subject does not match ID token; ignoring");
            return None;
        }
        debug!(claims = claims.len(), "merged user-info claims");
        Some(claims)
    }
}

/// Maps a provider failure onto the flow's error taxonomy.
fn authentication_error(err: ProviderError) -> AuthenticationError {
    match err {
        ProviderError::Unreachable { reason } => AuthenticationError::ProviderUnreachable { reason },
        other => AuthenticationError::TokenValidation {
            reason: other.to_string(),
        },
    }
}

fn invalid_callback(reason: &str) -> AuthenticationError {
    AuthenticationError::InvalidCallback {
        reason: reason.to_string(),
    }
}

fn token_validation(reason: &str) -> AuthenticationError {
    AuthenticationError::TokenValidation {
        reason: reason.to_string(),
    }
}
