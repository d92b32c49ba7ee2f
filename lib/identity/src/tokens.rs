//! Tokens issued to this relying party for a signed-in user.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifetime assumed for an access token when the provider omits `expires_in`.
pub const DEFAULT_ACCESS_TOKEN_LIFETIME: Duration = Duration::hours(1);

/// ID, access and refresh tokens from the most recent grant.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBundle {
    id_token: String,
    access_token: String,
    refresh_token: Option<String>,
    expires_at: DateTime<Utc>,
    /// Scopes the access token was granted for.
    scopes: Vec<String>,
}

impl TokenBundle {
    #[must_use]
    pub fn new(
        id_token: String,
        access_token: String,
        refresh_token: Option<String>,
        expires_at: DateTime<Utc>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            id_token,
            access_token,
            refresh_token,
            expires_at,
            scopes,
        }
    }

    /// Raw ID token, kept as the `id_token_hint` for sign-out.
    #[must_use]
    pub fn id_token(&self) -> &str {
        &self.id_token
    }

    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// When the access token stops being accepted.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Returns true if the access token is expired at `now`, or will be
    /// within `leeway`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>, leeway: Duration) -> bool {
        now + leeway >= self.expires_at
    }

    /// Returns true if the access token was granted for `scope`.
    #[must_use]
    pub fn covers_scope(&self, scope: &str) -> bool {
        scope
            .split_whitespace()
            .all(|wanted| self.scopes.iter().any(|granted| granted == wanted))
    }

    /// Applies a refresh grant.
    ///
    /// The provider may omit the ID token or rotate the refresh token; values
    /// it leaves out are carried over from this bundle.
    #[must_use]
    pub fn renewed(
        &self,
        id_token: Option<String>,
        access_token: String,
        refresh_token: Option<String>,
        expires_at: DateTime<Utc>,
        scopes: Option<Vec<String>>,
    ) -> Self {
        Self {
            id_token: id_token.unwrap_or_else(|| self.id_token.clone()),
            access_token,
            refresh_token: refresh_token.or_else(|| self.refresh_token.clone()),
            expires_at,
            scopes: scopes.unwrap_or_else(|| self.scopes.clone()),
        }
    }
}

impl fmt::Debug for TokenBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBundle")
            .field("id_token", &"<redacted>")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Computes an access token expiry from a grant's `expires_in`.
///
/// A lifetime that cannot be represented falls back to the default.
#[must_use]
pub fn expiry_from(now: DateTime<Utc>, expires_in: Option<std::time::Duration>) -> DateTime<Utc> {
    expires_in
        .and_then(|d| Duration::from_std(d).ok())
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .or_else(|| now.checked_add_signed(DEFAULT_ACCESS_TOKEN_LIFETIME))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(expires_at: DateTime<Utc>) -> TokenBundle {
        TokenBundle::new(
            "id.jwt".to_string(),
            "access".to_string(),
            Some("refresh".to_string()),
            expires_at,
            vec!["openid".to_string(), "api.read".to_string()],
        )
    }

    #[test]
    fn expiry_respects_leeway() {
        let now = Utc::now();
        let tokens = bundle(now + Duration::seconds(20));
        assert!(!tokens.is_expired_at(now, Duration::zero()));
        assert!(tokens.is_expired_at(now, Duration::seconds(30)));
        assert!(tokens.is_expired_at(now + Duration::seconds(21), Duration::zero()));
    }

    #[test]
    fn covers_space_separated_scopes() {
        let tokens = bundle(Utc::now());
        assert!(tokens.covers_scope("api.read"));
        assert!(tokens.covers_scope("openid api.read"));
        assert!(!tokens.covers_scope("api.write"));
    }

    #[test]
    fn renewal_keeps_omitted_values() {
        let now = Utc::now();
        let tokens = bundle(now);
        let renewed = tokens.renewed(
            None,
            "access2".to_string(),
            None,
            now + Duration::hours(1),
            None,
        );

        assert_eq!(renewed.id_token(), "id.jwt");
        assert_eq!(renewed.access_token(), "access2");
        assert_eq!(renewed.refresh_token(), Some("refresh"));
        assert_eq!(renewed.scopes(), tokens.scopes());
    }

    #[test]
    fn renewal_takes_rotated_refresh_token() {
        let now = Utc::now();
        let renewed = bundle(now).renewed(
            Some("id2.jwt".to_string()),
            "access2".to_string(),
            Some("refresh2".to_string()),
            now,
            Some(vec!["api.write".to_string()]),
        );
        assert_eq!(renewed.id_token(), "id2.jwt");
        assert_eq!(renewed.refresh_token(), Some("refresh2"));
        assert_eq!(renewed.scopes(), ["api.write"]);
    }

    #[test]
    fn expiry_defaults_when_provider_omits_it() {
        let now = Utc::now();
        assert_eq!(expiry_from(now, None), now + DEFAULT_ACCESS_TOKEN_LIFETIME);
        assert_eq!(
            expiry_from(now, Some(std::time::Duration::from_secs(300))),
            now + Duration::seconds(300)
        );
    }

    #[test]
    fn unrepresentable_expiry_falls_back_to_default() {
        let now = Utc::now();
        assert_eq!(
            expiry_from(now, Some(std::time::Duration::from_secs(10_000_000_000_000))),
            now + DEFAULT_ACCESS_TOKEN_LIFETIME
        );
        assert_eq!(
            expiry_from(now, Some(std::time::Duration::from_secs(u64::MAX))),
            now + DEFAULT_ACCESS_TOKEN_LIFETIME
        );
    }

    #[test]
    fn debug_redacts_tokens() {
        let debug = format!("{:?}", bundle(Utc::now()));
        assert!(!debug.contains("access\""));
        assert!(!debug.contains("id.jwt"));
    }
}
