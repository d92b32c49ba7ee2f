//! Identity provider backed by OIDC discovery, using the openidconnect crate.

use async_trait::async_trait;
use base64::Engine;
use lantern_identity::{
    IdentityProvider, ProviderConfiguration, ProviderError, RawClaims, TokenGrant,
    VerifiedIdToken,
};
use openidconnect::core::{CoreClient, CoreProviderMetadata, CoreTokenResponse};
use openidconnect::url::Url;
use openidconnect::{
    AuthorizationCode, ClientId, ClientSecret, ErrorResponse, IssuerUrl, Nonce,
    OAuth2TokenResponse, PkceCodeVerifier, RedirectUrl, RefreshToken, RequestTokenError, Scope,
    TokenResponse,
};
use rootcause::prelude::Report;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

/// Path of the discovery document below the issuer.
const DISCOVERY_PATH: &str = ".well-known/openid-configuration";

/// Provider metadata fetched at startup.
pub struct DiscoveredProvider {
    metadata: CoreProviderMetadata,
    client_id: ClientId,
    client_secret: ClientSecret,
    redirect_url: RedirectUrl,
    http_client: reqwest::Client,
    authorization_endpoint: Url,
    userinfo_endpoint: Option<Url>,
    end_session_endpoint: Option<Url>,
}

/// Discovery fields the core metadata type does not carry.
#[derive(Debug, Default, Deserialize)]
struct SessionManagementMetadata {
    end_session_endpoint: Option<Url>,
}

impl DiscoveredProvider {
    /// Fetches the provider's discovery document and signing keys.
    pub async fn discover(
        config: &ProviderConfiguration,
    ) -> Result<Self, Report<OidcError>> {
        let issuer_url = IssuerUrl::new(config.authority().to_string())
            .map_err(|e| OidcError::Configuration(format!("invalid issuer URL: {e}")))?;

        let redirect_url = RedirectUrl::new(config.redirect_uri().to_string())
            .map_err(|e| OidcError::Configuration(format!("invalid redirect URI: {e}")))?;

        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.timeout())
            .build()
            .map_err(|e| OidcError::Configuration(format!("failed to create HTTP client: {e}")))?;

        let metadata = CoreProviderMetadata::discover_async(issuer_url.clone(), &http_client)
            .await
            .map_err(|e| OidcError::Discovery(format!("failed to discover provider: {e}")))?;

        let end_session_endpoint = fetch_end_session_endpoint(&http_client, &issuer_url).await;

        let authorization_endpoint = metadata.authorization_endpoint().url().clone();
        let userinfo_endpoint = metadata.userinfo_endpoint().map(|u| u.url().clone());

        info!(
            issuer = %issuer_url.as_str(),
            user_info = userinfo_endpoint.is_some(),
            end_session = end_session_endpoint.is_some(),
            "discovered identity provider"
        );

        Ok(Self {
            metadata,
            client_id: ClientId::new(config.client_id().to_string()),
            client_secret: ClientSecret::new(config.client_secret().to_string()),
            redirect_url,
            http_client,
            authorization_endpoint,
            userinfo_endpoint,
            end_session_endpoint,
        })
    }
}

#[async_trait]
impl IdentityProvider for DiscoveredProvider {
    fn authorization_endpoint(&self) -> &Url {
        &self.authorization_endpoint
    }

    fn end_session_endpoint(&self) -> Option<&Url> {
        self.end_session_endpoint.as_ref()
    }

    fn has_user_info(&self) -> bool {
        self.userinfo_endpoint.is_some()
    }

    #[instrument(skip_all)]
    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
        nonce: &str,
    ) -> Result<TokenGrant, ProviderError> {
        let client = CoreClient::from_provider_metadata(
            self.metadata.clone(),
            self.client_id.clone(),
            Some(self.client_secret.clone()),
        )
        .set_redirect_uri(self.redirect_url.clone());

        let token_response = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .map_err(|e| ProviderError::Configuration {
                reason: e.to_string(),
            })?
            .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier.to_string()))
            .request_async(&self.http_client)
            .await
            .map_err(classify)?;

        let id_token = token_response
            .id_token()
            .ok_or_else(|| ProviderError::InvalidResponse {
                reason: "no ID token in token response".to_string(),
            })?;

        // Signature, issuer, audience and nonce checked against the provider keys.
        id_token
            .claims(&client.id_token_verifier(), &Nonce::new(nonce.to_string()))
            .map_err(|e| ProviderError::InvalidToken {
                reason: e.to_string(),
            })?;

        let verified = raw_id_token(&token_response)?;
        debug!("code exchange succeeded");
        Ok(token_grant(&token_response, Some(verified)))
    }

    #[instrument(skip_all)]
    async fn user_info(&self, access_token: &str) -> Result<RawClaims, ProviderError> {
        let endpoint = self
            .userinfo_endpoint
            .as_ref()
            .ok_or_else(|| ProviderError::Configuration {
                reason: "provider has no user-info endpoint".to_string(),
            })?;

        let response = self
            .http_client
            .get(endpoint.clone())
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ProviderError::Unreachable {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Rejected {
                reason: format!("user-info endpoint returned {status}"),
            });
        }

        response
            .json::<RawClaims>()
            .await
            .map_err(|e| ProviderError::InvalidResponse {
                reason: e.to_string(),
            })
    }

    #[instrument(skip_all, fields(scopes = scopes.len()))]
    async fn refresh(
        &self,
        refresh_token: &str,
        scopes: &[String],
    ) -> Result<TokenGrant, ProviderError> {
        let client = CoreClient::from_provider_metadata(
            self.metadata.clone(),
            self.client_id.clone(),
            Some(self.client_secret.clone()),
        )
        .set_redirect_uri(self.redirect_url.clone());

        let refresh_token = RefreshToken::new(refresh_token.to_string());
        let mut request = client
            .exchange_refresh_token(&refresh_token)
            .map_err(|e| ProviderError::Configuration {
                reason: e.to_string(),
            })?;
        for scope in scopes {
            request = request.add_scope(Scope::new(scope.clone()));
        }

        let token_response = request
            .request_async(&self.http_client)
            .await
            .map_err(classify)?;

        // Refreshed ID tokens carry no nonce; only the signature is checked.
        let verified = match token_response.id_token() {
            Some(id_token) => {
                id_token
                    .claims(
                        &client.id_token_verifier(),
                        |_: Option<&Nonce>| -> Result<(), String> { Ok(()) },
                    )
                    .map_err(|e| ProviderError::InvalidToken {
                        reason: e.to_string(),
                    })?;
                Some(raw_id_token(&token_response)?)
            }
            None => None,
        };

        Ok(token_grant(&token_response, verified))
    }
}

fn token_grant(response: &CoreTokenResponse, id_token: Option<VerifiedIdToken>) -> TokenGrant {
    TokenGrant {
        access_token: response.access_token().secret().clone(),
        refresh_token: response.refresh_token().map(|t| t.secret().clone()),
        expires_in: response.expires_in(),
        scopes: response
            .scopes()
            .map(|scopes| scopes.iter().map(|s| s.as_str().to_string()).collect()),
        id_token,
    }
}

/// Pulls the compact ID token out of a token response and decodes its
/// payload.
///
/// The typed ID token only exposes standard claims; configured name and role
/// claims can be anything, so the payload is read as plain JSON.
fn raw_id_token(response: &CoreTokenResponse) -> Result<VerifiedIdToken, ProviderError> {
    let invalid = |reason: String| ProviderError::InvalidResponse { reason };

    let response_json = serde_json::to_value(response)
        .map_err(|e| invalid(format!("failed to serialize token response: {e}")))?;
    let raw = response_json
        .get("id_token")
        .and_then(|v| v.as_str())
        .ok_or_else(|| invalid("no id_token in response".to_string()))?;

    // JWT is base64url(header).base64url(payload).signature
    let payload = raw
        .split('.')
        .nth(1)
        .ok_or_else(|| invalid("invalid JWT format".to_string()))?;
    let payload_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| invalid(format!("failed to decode JWT payload: {e}")))?;
    let claims: RawClaims = serde_json::from_slice(&payload_bytes)
        .map_err(|e| invalid(format!("failed to parse JWT payload: {e}")))?;

    Ok(VerifiedIdToken {
        raw: raw.to_string(),
        claims,
    })
}

/// Splits token endpoint failures into transport and protocol errors.
fn classify<RE, T>(err: RequestTokenError<RE, T>) -> ProviderError
where
    RE: std::error::Error + 'static,
    T: ErrorResponse + 'static,
{
    match err {
        RequestTokenError::Request(e) => ProviderError::Unreachable {
            reason: e.to_string(),
        },
        RequestTokenError::ServerResponse(response) => ProviderError::Rejected {
            reason: response.to_string(),
        },
        other => ProviderError::InvalidResponse {
            reason: other.to_string(),
        },
    }
}

/// Reads `end_session_endpoint` from the discovery document.
///
/// Missing or unreadable values disable RP-initiated sign-out.
async fn fetch_end_session_endpoint(http_client: &reqwest::Client, issuer: &IssuerUrl) -> Option<Url> {
    let base = issuer.as_str().trim_end_matches('/');
    let url = format!("{base}/{DISCOVERY_PATH}");

    let response = match http_client.get(&url).send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "failed to fetch discovery document for sign-out endpoint");
            return None;
        }
    };

    match response.json::<SessionManagementMetadata>().await {
        Ok(metadata) => metadata.end_session_endpoint,
        Err(e) => {
            warn!(error = %e, "failed to read sign-out endpoint from discovery document");
            None
        }
    }
}

/// OIDC-related errors.
#[derive(Debug)]
pub enum OidcError {
    /// Configuration error (invalid URLs, etc.)
    Configuration(String),
    /// Failed to discover provider metadata.
    Discovery(String),
}

impl std::fmt::Display for OidcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "OIDC configuration error: {msg}"),
            Self::Discovery(msg) => write!(f, "OIDC discovery error: {msg}"),
        }
    }
}

impl std::error::Error for OidcError {}
