//! Requested OAuth2 scopes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The scope every OpenID Connect authentication request must carry.
pub const OPENID: &str = "openid";

/// Ordered, duplicate-free set of scopes to request.
///
/// `openid` is always present and always first. Other scopes keep the order
/// in which they were first added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct ScopeSet {
    scopes: Vec<String>,
}

impl ScopeSet {
    /// Creates a scope set from configured scopes.
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self {
            scopes: vec![OPENID.to_string()],
        };
        for scope in scopes {
            set.add(scope.as_ref());
        }
        set
    }

    /// Parses a comma- or whitespace-separated scope list.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        Self::new(raw.split(|c: char| c == ',' || c.is_whitespace()))
    }

    /// Adds a scope, returning false if it was empty or already present.
    pub fn add(&mut self, scope: &str) -> bool {
        let scope = scope.trim();
        if scope.is_empty() || self.contains(scope) {
            return false;
        }
        self.scopes.push(scope.to_string());
        true
    }

    /// Returns true if the scope is part of the set.
    #[must_use]
    pub fn contains(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    /// Returns the scopes in request order.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.scopes
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.scopes.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    /// Always false; `openid` is always present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Formats the set as the space-delimited `scope` request parameter.
    #[must_use]
    pub fn to_param(&self) -> String {
        self.scopes.join(" ")
    }
}

impl Default for ScopeSet {
    fn default() -> Self {
        Self::new(["profile", "email", "roles"])
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_param())
    }
}

impl From<Vec<String>> for ScopeSet {
    fn from(scopes: Vec<String>) -> Self {
        Self::new(scopes)
    }
}

impl From<ScopeSet> for Vec<String> {
    fn from(set: ScopeSet) -> Self {
        set.scopes
    }
}
