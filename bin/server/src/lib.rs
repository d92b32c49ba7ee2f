//! lantern web server.
//!
//! Serves an application shell behind OpenID Connect sign-in. Sessions are
//! kept in sealed cookies; see `lantern-identity` for the flow itself.

pub mod app;
pub mod auth;
pub mod config;
pub mod error;
