//! HTTP API.
//!
//! - `/api/v1/admin`   – read side and listener control, `Herald-Admin-Authorization`
//! - `/api/v1/service` – signed publishes, `Herald-Signature`

pub mod admin;
pub mod extractors;
pub mod service;
