//! OpenID Connect relying-party sessions for lantern.
//!
//! This crate provides:
//! - Provider configuration and the requested scope policy (`ProviderConfiguration`, `ScopeSet`)
//! - The authorization code flow with PKCE (`Coordinator`)
//! - Cookie-sealed sessions (`SessionStore`, `SessionTicket`)
//! - The default route policy (`AccessGate`)
//! - Access tokens for downstream calls (`TokenAcquirer`)
//!
//! The identity provider itself sits behind the `IdentityProvider` trait,
//! which the server implements on top of OIDC discovery.
//!
//! # Example
//!
//! ```
//! use lantern_identity::{AccessGate, GateDecision, ProviderConfiguration, SessionState};
//!
//! let config = ProviderConfiguration::builder(
//!     "https://idp.example",
//!     "app1",
//!     "secret",
//!     "https://app.example/auth/callback",
//! )
//! .build()
//! .unwrap();
//! assert_eq!(config.scopes().to_param(), "openid profile email roles");
//!
//! let gate = AccessGate::default();
//! assert_eq!(gate.authorize("/auth/login", &SessionState::Missing), GateDecision::Allow);
//! assert!(matches!(gate.authorize("/", &SessionState::Missing), GateDecision::Deny(_)));
//! ```

pub mod acquisition;
pub mod claims;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod flow;
pub mod gate;
pub mod principal;
pub mod provider;
pub mod scope;
pub mod session;
pub mod tokens;

// Re-export main types at crate root
pub use acquisition::{AcquiredToken, TokenAcquirer};
pub use claims::{ClaimSet, RawClaims};
pub use config::{ProviderConfiguration, ProviderConfigurationBuilder};
pub use coordinator::Coordinator;
pub use error::{
    AuthenticationError, ConfigError, SealError, SessionInvalid, TokenAcquisitionError,
};
pub use flow::{CallbackOutcome, CallbackParams, Challenge, FlowState, PendingAuthorization, SignIn};
pub use gate::{AccessGate, DenyReason, Exemption, GateDecision};
pub use principal::Principal;
pub use provider::{IdentityProvider, ProviderError, TokenGrant, VerifiedIdToken};
pub use scope::ScopeSet;
pub use session::{SessionState, SessionStore, SessionTicket};
pub use tokens::TokenBundle;

pub use cookie::{Cookie, Key};
