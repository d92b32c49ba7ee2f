//! Claims asserted by the identity provider about the signed-in subject.
//!
//! Provider payloads are JSON objects whose values may be strings, arrays,
//! numbers or nested objects. A `ClaimSet` flattens them into a
//! multi-valued string map, which is what the rest of the application
//! consumes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Raw JSON claims as returned by the provider.
pub type RawClaims = serde_json::Map<String, Value>;

/// Claims that only matter to the protocol and are not kept on a principal.
pub const PROTOCOL_CLAIMS: &[&str] = &[
    "nonce", "aud", "azp", "acr", "iss", "iat", "nbf", "exp", "at_hash", "c_hash", "auth_time",
    "ipaddr", "platf", "ver",
];

/// Multi-valued claim map keyed by claim name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimSet {
    claims: BTreeMap<String, Vec<String>>,
}

impl ClaimSet {
    /// Creates an empty claim set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flattens a provider JSON payload, dropping protocol-only claims.
    #[must_use]
    pub fn from_json(raw: &RawClaims) -> Self {
        let mut set = Self::new();
        for (name, value) in raw {
            if PROTOCOL_CLAIMS.contains(&name.as_str()) {
                continue;
            }
            let values = flatten(value);
            if !values.is_empty() {
                set.claims.insert(name.clone(), values);
            }
        }
        set
    }

    /// Sets the values for a claim, replacing any existing values.
    pub fn insert<I, S>(&mut self, name: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return;
        }
        self.claims.insert(name.into(), values);
    }

    /// Overlays another claim set; its claims replace same-named ones.
    pub fn merge(&mut self, other: ClaimSet) {
        self.claims.extend(other.claims);
    }

    /// Returns the first value of a claim.
    #[must_use]
    pub fn first(&self, name: &str) -> Option<&str> {
        self.claims
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Returns all values of a claim, or an empty slice.
    #[must_use]
    pub fn values(&self, name: &str) -> &[String] {
        self.claims.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.claims.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.claims
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

fn flatten(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().flat_map(flatten).collect(),
        Value::Bool(_) | Value::Number(_) | Value::Object(_) => vec![value.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawClaims {
        value.as_object().expect("object").clone()
    }

    #[test]
    fn flattens_json_values() {
        let claims = ClaimSet::from_json(&raw(json!({
            "sub": "alice",
            "role": ["admin", "user"],
            "email_verified": true,
            "updated_at": 1700000000,
            "address": {"country": "NZ"},
            "middle_name": null,
        })));

        assert_eq!(claims.first("sub"), Some("alice"));
        assert_eq!(claims.values("role"), ["admin", "user"]);
        assert_eq!(claims.first("email_verified"), Some("true"));
        assert_eq!(claims.first("updated_at"), Some("1700000000"));
        assert_eq!(claims.first("address"), Some(r#"{"country":"NZ"}"#));
        assert!(!claims.contains("middle_name"));
    }

    #[test]
    fn drops_protocol_claims() {
        let claims = ClaimSet::from_json(&raw(json!({
            "sub": "alice",
            "iss": "https://idp.example",
            "aud": "app1",
            "exp": 1,
            "nonce": "n",
            "at_hash": "h",
        })));

        assert_eq!(claims.len(), 1);
        assert!(claims.contains("sub"));
    }

    #[test]
    fn merge_overrides_same_named_claims() {
        let mut base = ClaimSet::from_json(&raw(json!({"sub": "alice", "name": "A"})));
        let extra = ClaimSet::from_json(&raw(json!({"name": "Alice", "email": "a@example.com"})));

        base.merge(extra);

        assert_eq!(base.first("name"), Some("Alice"));
        assert_eq!(base.first("email"), Some("a@example.com"));
        assert_eq!(base.first("sub"), Some("alice"));
    }

    #[test]
    fn missing_claim_has_no_values() {
        let claims = ClaimSet::new();
        assert!(claims.values("role").is_empty());
        assert_eq!(claims.first("role"), None);
    }

    #[test]
    fn insert_ignores_empty_values() {
        let mut claims = ClaimSet::new();
        claims.insert("role", Vec::<String>::new());
        claims.insert("email", ["a@example.com"]);
        assert!(!claims.contains("role"));
        assert_eq!(claims.first("email"), Some("a@example.com"));
    }
}
