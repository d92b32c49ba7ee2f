//! Core types shared by the lantern crates.
//!
//! Provides the `Result` alias used at fallible startup seams and the
//! ULID-backed identifiers used to correlate sign-in flows and sessions
//! in logs.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{FlowId, ParseIdError, TicketId};
