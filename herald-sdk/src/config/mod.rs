//! Validated runtime configuration shared between the server and its
//! request extractors.
//!
//! Loading and parsing the configuration file is handled by the server crate.

mod admin;
mod server;
mod service;

pub use admin::AdminConfig;
pub use server::ServerConfig;
pub use service::ServiceConfig;
