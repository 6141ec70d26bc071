//! Runtime configuration shared between request handlers.
//!
//! The section types themselves live in `herald_sdk::config`; this module
//! groups the reloadable ones behind separate locks so a `SIGHUP` reload
//! never blocks unrelated requests.

use herald_core::RetryPolicy;
use std::sync::Arc;
use tokio::sync::RwLock;

pub use herald_sdk::config::{AdminConfig, ServerConfig, ServiceConfig};

#[derive(Debug, Clone)]
pub struct SharedConfig {
    pub server: Arc<RwLock<ServerConfig>>,
    pub admin: Arc<RwLock<AdminConfig>>,
    pub service: Arc<RwLock<ServiceConfig>>,
    /// Retry policy for Service API publishes.
    pub publish_retry: Arc<RwLock<RetryPolicy>>,
}
