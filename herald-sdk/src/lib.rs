//! Shared wire types for the Herald HTTP surface.
//!
//! The `client` feature adds typed `reqwest` clients for the admin (query)
//! and service (publish) APIs.

pub mod config;
pub mod objects;
pub mod signature;

#[cfg(feature = "client")]
pub mod client;
