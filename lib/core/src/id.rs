//! ULID-backed identifiers.
//!
//! Identifiers render with a short type prefix (`tkt_01J...`) so they are
//! recognisable in log lines, and parse with or without that prefix.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Error returned when an identifier string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// Name of the identifier type being parsed.
    pub id_type: &'static str,
    /// Why parsing failed.
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Generates a fresh identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Returns the underlying ULID.
            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "_{}"), self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ulid::from_str(raw).map(Self).map_err(|e| ParseIdError {
                    id_type: stringify!($name),
                    reason: e.to_string(),
                })
            }
        }
    };
}

define_id!(
    /// Identifies one sign-in attempt from challenge to callback.
    FlowId,
    "flow"
);

define_id!(
    /// Identifies an issued session ticket.
    ///
    /// A renewed ticket keeps its id so sign-in, renewals and sign-out can
    /// be correlated in logs.
    TicketId,
    "tkt"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_prefix() {
        assert!(TicketId::new().to_string().starts_with("tkt_"));
        assert!(FlowId::new().to_string().starts_with("flow_"));
    }

    #[test]
    fn parses_with_and_without_prefix() {
        let id = TicketId::new();
        let with_prefix: TicketId = id.to_string().parse().expect("should parse");
        let bare: TicketId = id.as_ulid().to_string().parse().expect("should parse");
        assert_eq!(with_prefix, id);
        assert_eq!(bare, id);
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = "tkt_not-a-ulid".parse::<TicketId>().unwrap_err();
        assert_eq!(err.id_type, "TicketId");
    }

    #[test]
    fn serializes_as_bare_ulid() {
        let id = FlowId::new();
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, format!("\"{}\"", id.as_ulid()));
        let parsed: FlowId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, id);
    }
}
