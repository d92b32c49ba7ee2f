//! Error types for the identity crate.
//!
//! - `ConfigError`: provider configuration cannot be used (fatal at startup)
//! - `AuthenticationError`: a sign-in flow ended in **Failed**
//! - `SessionInvalid`: a session cookie cannot be trusted (never fatal)
//! - `TokenAcquisitionError`: no usable access token for a downstream call
//! - `SealError`: a cookie payload could not be encoded

use chrono::{DateTime, Utc};
use std::fmt;

/// Errors from building a provider configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required value is absent or empty.
    Missing { key: &'static str },
    /// A value is present but unusable.
    Invalid { key: &'static str, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { key } => write!(f, "missing required configuration value: {key}"),
            Self::Invalid { key, reason } => {
                write!(f, "invalid configuration value for {key}: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Reasons a sign-in flow moves to **Failed**.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    /// The ID token or token response did not pass validation.
    TokenValidation { reason: String },
    /// The provider could not be reached or did not answer in time.
    ProviderUnreachable { reason: String },
    /// The callback request itself is unusable (state mismatch, no pending
    /// authorization, provider-reported error).
    InvalidCallback { reason: String },
}

impl AuthenticationError {
    /// Message safe to show an end user.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::TokenValidation { .. } | Self::InvalidCallback { .. } => {
                "Sign-in could not be completed."
            }
            Self::ProviderUnreachable { .. } => {
                "The identity provider is not responding. Please try again."
            }
        }
    }

    /// Returns true if a user-initiated retry may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderUnreachable { .. })
    }
}

impl fmt::Display for AuthenticationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TokenValidation { reason } => write!(f, "token validation failed: {reason}"),
            Self::ProviderUnreachable { reason } => {
                write!(f, "identity provider unreachable: {reason}")
            }
            Self::InvalidCallback { reason } => write!(f, "invalid callback: {reason}"),
        }
    }
}

impl std::error::Error for AuthenticationError {}

/// Reasons a session cookie is not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInvalid {
    /// Authenticated decryption failed: wrong key, tampered or truncated value.
    SignatureMismatch,
    /// The ticket decrypted but its lifetime has elapsed.
    Expired { expired_at: DateTime<Utc> },
    /// The ticket decrypted but does not describe a session.
    Malformed { reason: String },
}

impl fmt::Display for SessionInvalid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignatureMismatch => write!(f, "session cookie failed verification"),
            Self::Expired { expired_at } => write!(f, "session expired at {expired_at}"),
            Self::Malformed { reason } => write!(f, "malformed session cookie: {reason}"),
        }
    }
}

impl std::error::Error for SessionInvalid {}

/// Errors from acquiring an access token for a downstream call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenAcquisitionError {
    /// No valid refresh path exists; the user has to sign in again.
    ReauthenticationRequired { reason: String },
    /// The provider could not be reached while refreshing.
    ProviderUnreachable { reason: String },
}

impl fmt::Display for TokenAcquisitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReauthenticationRequired { reason } => {
                write!(f, "reauthentication required: {reason}")
            }
            Self::ProviderUnreachable { reason } => {
                write!(f, "identity provider unreachable: {reason}")
            }
        }
    }
}

impl std::error::Error for TokenAcquisitionError {}

/// A value could not be sealed into a cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealError {
    pub reason: String,
}

impl fmt::Display for SealError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to seal cookie: {}", self.reason)
    }
}

impl std::error::Error for SealError {}
