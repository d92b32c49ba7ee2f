//! The seam between the relying party and a concrete identity provider.
//!
//! The coordinator and token acquisition only depend on this trait. The
//! server implements it on top of OIDC discovery; tests use an in-memory
//! provider.

use crate::claims::RawClaims;
use async_trait::async_trait;
use openidconnect::url::Url;
use std::fmt;
use std::time::Duration;

/// An ID token whose signature has been verified against the provider keys.
#[derive(Debug, Clone)]
pub struct VerifiedIdToken {
    /// The compact JWT as received.
    pub raw: String,
    /// Decoded payload claims.
    pub claims: RawClaims,
}

/// Tokens returned by the token endpoint for a code or refresh grant.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<Duration>,
    /// Granted scopes, when the provider reports them.
    pub scopes: Option<Vec<String>>,
    pub id_token: Option<VerifiedIdToken>,
}

/// Errors from a provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Transport failure or timeout.
    Unreachable { reason: String },
    /// The provider answered with an OAuth2 error (e.g. `invalid_grant`).
    Rejected { reason: String },
    /// ID token signature or claims verification failed.
    InvalidToken { reason: String },
    /// The provider answered with something that is not a valid response.
    InvalidResponse { reason: String },
    /// The provider metadata lacks something the call needs.
    Configuration { reason: String },
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable { reason } => write!(f, "provider unreachable: {reason}"),
            Self::Rejected { reason } => write!(f, "provider rejected request: {reason}"),
            Self::InvalidToken { reason } => write!(f, "invalid ID token: {reason}"),
            Self::InvalidResponse { reason } => write!(f, "invalid provider response: {reason}"),
            Self::Configuration { reason } => write!(f, "provider configuration error: {reason}"),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Operations the relying party needs from an OpenID Connect provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Where the browser is sent to authenticate.
    fn authorization_endpoint(&self) -> &Url;

    /// RP-initiated logout endpoint, when the provider advertises one.
    fn end_session_endpoint(&self) -> Option<&Url>;

    /// Whether the provider has a user-info endpoint.
    fn has_user_info(&self) -> bool;

    /// Redeems an authorization code.
    ///
    /// Implementations send the PKCE verifier and verify the returned ID
    /// token's signature and nonce before returning it.
    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
        nonce: &str,
    ) -> Result<TokenGrant, ProviderError>;

    /// Fetches claims from the user-info endpoint.
    async fn user_info(&self, access_token: &str) -> Result<RawClaims, ProviderError>;

    /// Redeems a refresh token, optionally narrowing to `scopes`.
    async fn refresh(
        &self,
        refresh_token: &str,
        scopes: &[String],
    ) -> Result<TokenGrant, ProviderError>;
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scriptable in-memory provider for flow tests.

    use super::*;
    use serde_json::{Value, json};
    use std::sync::Mutex;

    pub(crate) const AUTHORITY: &str = "https://idp.example";
    pub(crate) const CLIENT_ID: &str = "app1";

    /// How the fake answers a call.
    #[derive(Debug, Clone)]
    pub(crate) enum Reply<T> {
        Ok(T),
        Err(ProviderError),
        Hang,
    }

    impl<T: Clone> Reply<T> {
        async fn resolve(&self) -> Result<T, ProviderError> {
            match self {
                Self::Ok(value) => Ok(value.clone()),
                Self::Err(err) => Err(err.clone()),
                Self::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(ProviderError::Unreachable {
                        reason: "hung".to_string(),
                    })
                }
            }
        }
    }

    pub(crate) struct FakeProvider {
        authorize: Url,
        end_session: Option<Url>,
        pub(crate) exchange: Reply<TokenGrant>,
        pub(crate) user_info: Option<Reply<RawClaims>>,
        pub(crate) refresh: Reply<TokenGrant>,
        pub(crate) seen_verifier: Mutex<Option<String>>,
        pub(crate) seen_refresh_scopes: Mutex<Option<Vec<String>>>,
    }

    impl FakeProvider {
        pub(crate) fn new(exchange: Reply<TokenGrant>) -> Self {
            Self {
                authorize: Url::parse("https://idp.example/connect/authorize").expect("url"),
                end_session: None,
                exchange,
                user_info: None,
                refresh: Reply::Err(ProviderError::Rejected {
                    reason: "invalid_grant".to_string(),
                }),
                seen_verifier: Mutex::new(None),
                seen_refresh_scopes: Mutex::new(None),
            }
        }

        pub(crate) fn with_user_info(mut self, reply: Reply<RawClaims>) -> Self {
            self.user_info = Some(reply);
            self
        }

        pub(crate) fn with_end_session(mut self, url: &str) -> Self {
            self.end_session = Some(Url::parse(url).expect("url"));
            self
        }

        pub(crate) fn with_refresh(mut self, reply: Reply<TokenGrant>) -> Self {
            self.refresh = reply;
            self
        }
    }

    #[async_trait]
    impl IdentityProvider for FakeProvider {
        fn authorization_endpoint(&self) -> &Url {
            &self.authorize
        }

        fn end_session_endpoint(&self) -> Option<&Url> {
            self.end_session.as_ref()
        }

        fn has_user_info(&self) -> bool {
            self.user_info.is_some()
        }

        async fn exchange_code(
            &self,
            _code: &str,
            pkce_verifier: &str,
            _nonce: &str,
        ) -> Result<TokenGrant, ProviderError> {
            *self.seen_verifier.lock().unwrap() = Some(pkce_verifier.to_string());
            self.exchange.resolve().await
        }

        async fn user_info(&self, _access_token: &str) -> Result<RawClaims, ProviderError> {
            match &self.user_info {
                Some(reply) => reply.resolve().await,
                None => Err(ProviderError::Configuration {
                    reason: "no user-info endpoint".to_string(),
                }),
            }
        }

        async fn refresh(
            &self,
            _refresh_token: &str,
            scopes: &[String],
        ) -> Result<TokenGrant, ProviderError> {
            *self.seen_refresh_scopes.lock().unwrap() = Some(scopes.to_vec());
            self.refresh.resolve().await
        }
    }

    /// ID token claims valid for `AUTHORITY`/`CLIENT_ID` with the given nonce.
    pub(crate) fn id_claims(nonce: &str) -> RawClaims {
        let exp = chrono::Utc::now().timestamp() + 3600;
        object(json!({
            "iss": AUTHORITY,
            "aud": CLIENT_ID,
            "sub": "alice",
            "exp": exp,
            "iat": exp - 3600,
            "nonce": nonce,
            "name": "Alice",
            "role": ["admin", "user"],
        }))
    }

    pub(crate) fn grant(claims: RawClaims) -> TokenGrant {
        TokenGrant {
            access_token: "access-1".to_string(),
            refresh_token: Some("refresh-1".to_string()),
            expires_in: Some(Duration::from_secs(3600)),
            scopes: None,
            id_token: Some(VerifiedIdToken {
                raw: "header.payload.signature".to_string(),
                claims,
            }),
        }
    }

    pub(crate) fn object(value: Value) -> RawClaims {
        value.as_object().cloned().expect("object")
    }
}
