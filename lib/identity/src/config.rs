//! Relying-party configuration for the external identity provider.
//!
//! A `ProviderConfiguration` is built once at startup and shared by
//! reference for the lifetime of the process. Building it validates the
//! values a sign-in flow cannot work without.

use crate::error::ConfigError;
use crate::scope::ScopeSet;
use openidconnect::url::Url;
use std::fmt;
use std::time::Duration;

/// The only response type this relying party requests.
pub const RESPONSE_TYPE: &str = "code";

const DEFAULT_NAME_CLAIM: &str = "name";
const DEFAULT_ROLE_CLAIM: &str = "role";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CLOCK_SKEW_SECONDS: i64 = 300;

/// Immutable settings for talking to the identity provider.
#[derive(Clone)]
pub struct ProviderConfiguration {
    authority: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scopes: ScopeSet,
    name_claim: String,
    role_claim: String,
    user_info_claims: bool,
    timeout: Duration,
    clock_skew: chrono::Duration,
}

impl ProviderConfiguration {
    /// Starts building a configuration from the four connection values.
    #[must_use]
    pub fn builder(
        authority: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> ProviderConfigurationBuilder {
        ProviderConfigurationBuilder::new(
            authority.into(),
            client_id.into(),
            client_secret.into(),
            redirect_uri.into(),
        )
    }

    /// The provider base URL; also the expected `iss` of ID tokens.
    #[must_use]
    pub fn authority(&self) -> &str {
        &self.authority
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    #[must_use]
    pub fn response_type(&self) -> &'static str {
        RESPONSE_TYPE
    }

    #[must_use]
    pub fn scopes(&self) -> &ScopeSet {
        &self.scopes
    }

    /// Claim mapped to the principal's display name.
    #[must_use]
    pub fn name_claim(&self) -> &str {
        &self.name_claim
    }

    /// Claim whose values become the principal's roles.
    #[must_use]
    pub fn role_claim(&self) -> &str {
        &self.role_claim
    }

    /// Whether the user-info endpoint is queried after the code exchange.
    #[must_use]
    pub fn user_info_claims(&self) -> bool {
        self.user_info_claims
    }

    /// Upper bound for each outbound call to the provider.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Tolerance applied when checking token expiry.
    #[must_use]
    pub fn clock_skew(&self) -> chrono::Duration {
        self.clock_skew
    }

    /// Returns true if `issuer` names this configuration's authority.
    ///
    /// A trailing slash on either side is ignored.
    #[must_use]
    pub fn matches_issuer(&self, issuer: &str) -> bool {
        issuer.trim_end_matches('/') == self.authority.trim_end_matches('/')
    }
}

impl fmt::Debug for ProviderConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfiguration")
            .field("authority", &self.authority)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .field("name_claim", &self.name_claim)
            .field("role_claim", &self.role_claim)
            .field("user_info_claims", &self.user_info_claims)
            .field("timeout", &self.timeout)
            .field("clock_skew", &self.clock_skew)
            .finish()
    }
}

/// Builder for `ProviderConfiguration`.
#[derive(Debug)]
pub struct ProviderConfigurationBuilder {
    authority: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scopes: ScopeSet,
    name_claim: String,
    role_claim: String,
    user_info_claims: bool,
    timeout: Duration,
    clock_skew: chrono::Duration,
}

impl ProviderConfigurationBuilder {
    fn new(
        authority: String,
        client_id: String,
        client_secret: String,
        redirect_uri: String,
    ) -> Self {
        Self {
            authority,
            client_id,
            client_secret,
            redirect_uri,
            scopes: ScopeSet::default(),
            name_claim: DEFAULT_NAME_CLAIM.to_string(),
            role_claim: DEFAULT_ROLE_CLAIM.to_string(),
            user_info_claims: true,
            timeout: DEFAULT_TIMEOUT,
            clock_skew: chrono::Duration::seconds(DEFAULT_CLOCK_SKEW_SECONDS),
        }
    }

    /// Replaces the requested scopes.
    #[must_use]
    pub fn scopes(mut self, scopes: ScopeSet) -> Self {
        self.scopes = scopes;
        self
    }

    /// Adds one scope to the requested scopes.
    #[must_use]
    pub fn add_scope(mut self, scope: &str) -> Self {
        self.scopes.add(scope);
        self
    }

    #[must_use]
    pub fn name_claim(mut self, claim: impl Into<String>) -> Self {
        self.name_claim = claim.into();
        self
    }

    #[must_use]
    pub fn role_claim(mut self, claim: impl Into<String>) -> Self {
        self.role_claim = claim.into();
        self
    }

    #[must_use]
    pub fn user_info_claims(mut self, enabled: bool) -> Self {
        self.user_info_claims = enabled;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn clock_skew(mut self, skew: chrono::Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    /// Validates and builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` when the authority, client ID, or
    /// client secret is absent or blank, and `ConfigError::Invalid` when the
    /// authority or redirect URI is not an absolute URL.
    pub fn build(self) -> Result<ProviderConfiguration, ConfigError> {
        let authority = required("authority", self.authority)?;
        let client_id = required("client_id", self.client_id)?;
        let client_secret = required("client_secret", self.client_secret)?;
        let redirect_uri = required("redirect_uri", self.redirect_uri)?;

        for (key, value) in [("authority", &authority), ("redirect_uri", &redirect_uri)] {
            Url::parse(value).map_err(|e| ConfigError::Invalid {
                key,
                reason: e.to_string(),
            })?;
        }

        let name_claim = non_blank_or(self.name_claim, DEFAULT_NAME_CLAIM);
        let role_claim = non_blank_or(self.role_claim, DEFAULT_ROLE_CLAIM);

        Ok(ProviderConfiguration {
            authority,
            client_id,
            client_secret,
            redirect_uri,
            scopes: self.scopes,
            name_claim,
            role_claim,
            user_info_claims: self.user_info_claims,
            timeout: self.timeout,
            clock_skew: self.clock_skew,
        })
    }
}

fn required(key: &'static str, value: String) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Missing { key });
    }
    Ok(trimmed.to_string())
}

fn non_blank_or(value: String, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value
    }
}
