//! The authenticated identity.
//!
//! A `Principal` is created by the authentication coordinator once the ID
//! token has been validated. It never changes afterwards; a token renewal
//! keeps the same principal and a new sign-in produces a new one.

use crate::claims::ClaimSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Claim carrying the subject identifier.
pub const SUBJECT_CLAIM: &str = "sub";

/// The signed-in user as seen by the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Provider-assigned subject identifier.
    subject: String,
    /// Value of the configured name claim, or empty.
    display_name: String,
    /// Values of the configured role claim.
    roles: BTreeSet<String>,
    /// Every non-protocol claim, including the ones above.
    claims: ClaimSet,
}

impl Principal {
    /// Builds a principal from validated claims.
    ///
    /// Returns `None` when the subject claim is absent or blank.
    #[must_use]
    pub fn from_claims(claims: ClaimSet, name_claim: &str, role_claim: &str) -> Option<Self> {
        let subject = claims
            .first(SUBJECT_CLAIM)
            .map(str::trim)
            .filter(|s| !s.is_empty())?
            .to_string();
        let display_name = claims.first(name_claim).unwrap_or_default().to_string();
        let roles = claims.values(role_claim).iter().cloned().collect();

        Some(Self {
            subject,
            display_name,
            roles,
            claims,
        })
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns the display name; empty when the provider sent none.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    #[must_use]
    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    #[must_use]
    pub fn claims(&self) -> &ClaimSet {
        &self.claims
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(pairs: &[(&str, &[&str])]) -> ClaimSet {
        let mut set = ClaimSet::new();
        for (name, values) in pairs {
            set.insert(*name, values.iter().copied());
        }
        set
    }

    #[test]
    fn maps_name_and_roles() {
        let principal = Principal::from_claims(
            claims(&[
                ("sub", &["alice"]),
                ("name", &["Alice Liddell"]),
                ("role", &["admin", "user", "admin"]),
            ]),
            "name",
            "role",
        )
        .expect("principal");

        assert_eq!(principal.subject(), "alice");
        assert_eq!(principal.display_name(), "Alice Liddell");
        assert_eq!(principal.roles().len(), 2);
        assert!(principal.has_role("admin"));
        assert!(!principal.has_role("auditor"));
        assert_eq!(principal.claims().first("name"), Some("Alice Liddell"));
    }

    #[test]
    fn missing_name_leaves_display_name_empty() {
        let principal =
            Principal::from_claims(claims(&[("sub", &["alice"])]), "name", "role").expect("principal");
        assert_eq!(principal.display_name(), "");
        assert!(principal.roles().is_empty());
    }

    #[test]
    fn custom_name_claim() {
        let principal = Principal::from_claims(
            claims(&[("sub", &["alice"]), ("preferred_username", &["alice@corp"])]),
            "preferred_username",
            "role",
        )
        .expect("principal");
        assert_eq!(principal.display_name(), "alice@corp");
    }

    #[test]
    fn subject_is_required() {
        assert!(Principal::from_claims(claims(&[("name", &["Alice"])]), "name", "role").is_none());
        assert!(Principal::from_claims(claims(&[("sub", &["  "])]), "name", "role").is_none());
    }

    #[test]
    fn serialization_roundtrip() {
        let principal = Principal::from_claims(
            claims(&[("sub", &["alice"]), ("role", &["user"])]),
            "name",
            "role",
        )
        .expect("principal");
        let json = serde_json::to_string(&principal).expect("serialize");
        let parsed: Principal = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(principal, parsed);
    }
}
