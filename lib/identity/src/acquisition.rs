//! Access tokens for downstream API calls.
//!
//! The session's stored access token is handed out while it is valid and
//! covers the requested scope. Otherwise the refresh token is redeemed and
//! the caller receives a renewed ticket to persist in place of the old one.

use crate::config::ProviderConfiguration;
use crate::error::TokenAcquisitionError;
use crate::provider::{IdentityProvider, ProviderError};
use crate::session::SessionTicket;
use crate::tokens::expiry_from;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

/// Tokens this close to expiry are refreshed rather than handed out.
pub const REFRESH_LEEWAY: Duration = Duration::seconds(30);

/// A usable access token.
#[derive(Debug, Clone)]
pub struct AcquiredToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    /// Set when the token was refreshed; persist it as the new session.
    pub renewed: Option<SessionTicket>,
}

/// Hands out access tokens for signed-in sessions.
#[derive(Clone)]
pub struct TokenAcquirer {
    config: Arc<ProviderConfiguration>,
    provider: Arc<dyn IdentityProvider>,
    session_lifetime: Duration,
}

impl TokenAcquirer {
    #[must_use]
    pub fn new(
        config: Arc<ProviderConfiguration>,
        provider: Arc<dyn IdentityProvider>,
        session_lifetime: Duration,
    ) -> Self {
        Self {
            config,
            provider,
            session_lifetime,
        }
    }

    /// Returns an access token for `scope` (space-separated), or for the
    /// session's granted scopes when `None`.
    ///
    /// # Errors
    ///
    /// `ReauthenticationRequired` when the session has no refresh token or
    /// the provider refuses it; `ProviderUnreachable` when the refresh could
    /// not reach the provider in time.
    #[instrument(skip_all, fields(subject = ticket.principal().subject(), scope = scope.unwrap_or_default()))]
    pub async fn acquire(
        &self,
        ticket: &SessionTicket,
        scope: Option<&str>,
    ) -> Result<AcquiredToken, TokenAcquisitionError> {
        let now = Utc::now();
        let tokens = ticket.tokens();

        if scope.is_none_or(|s| tokens.covers_scope(s)) && !tokens.is_expired_at(now, REFRESH_LEEWAY)
        {
            return Ok(AcquiredToken {
                access_token: tokens.access_token().to_string(),
                expires_at: tokens.expires_at(),
                renewed: None,
            });
        }

        let Some(refresh_token) = tokens.refresh_token() else {
            return Err(TokenAcquisitionError::ReauthenticationRequired {
                reason: "session has no refresh token".to_string(),
            });
        };

        let requested: Vec<String> = scope
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        debug!("refreshing access token");
        let grant = match timeout(
            self.config.timeout(),
            self.provider.refresh(refresh_token, &requested),
        )
        .await
        {
            Ok(Ok(grant)) => grant,
            Ok(Err(ProviderError::Unreachable { reason })) => {
                warn!(%reason, "refresh failed: provider unreachable");
                return Err(TokenAcquisitionError::ProviderUnreachable { reason });
            }
            Ok(Err(e)) => {
                warn!(error = %e, "refresh token refused");
                return Err(TokenAcquisitionError::ReauthenticationRequired {
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                warn!(timeout = ?self.config.timeout(), "refresh timed out");
                return Err(TokenAcquisitionError::ProviderUnreachable {
                    reason: "token endpoint did not answer in time".to_string(),
                });
            }
        };

        let granted = grant
            .scopes
            .or_else(|| (!requested.is_empty()).then_some(requested));
        let renewed_tokens = tokens.renewed(
            grant.id_token.map(|id| id.raw),
            grant.access_token,
            grant.refresh_token,
            expiry_from(now, grant.expires_in),
            granted,
        );
        let renewed = ticket.with_tokens(renewed_tokens, self.session_lifetime, now);

        Ok(AcquiredToken {
            access_token: renewed.tokens().access_token().to_string(),
            expires_at: renewed.tokens().expires_at(),
            renewed: Some(renewed),
        })
    }
}
