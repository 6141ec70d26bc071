//! Configuration module for herald-server.
//!
//! Handles loading configuration from TOML files, CLI arguments,
//! and environment variables. Also handles admin secret hashing.

pub mod file;
pub mod runtime;

use crate::config::file::{FileConfig, LoggingConfig, StartFrom};
use crate::config::runtime::{AdminConfig, ServerConfig, ServiceConfig, SharedConfig};
use herald_core::RetryPolicy;
use herald_core::config::{
    BackoffConfig, BusConfig, InitialWatermark, ListenerConfig, RetentionConfig, StartupConfig,
    WatchdogConfig,
};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("password hashing error: {0}")]
    HashError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// Loaded configuration result containing all parts.
pub struct LoadedConfig {
    pub server: ServerConfig,
    pub admin: AdminConfig,
    pub service: ServiceConfig,
    pub bus: BusConfig,
    pub publish_retry: RetryPolicy,
    pub logging: LoggingConfig,
    pub stop_timeout: Duration,
    /// A plaintext admin secret was hashed and written back to the file.
    pub secret_rehashed: bool,
}

impl LoadedConfig {
    /// Convert the reloadable parts into a SharedConfig with Arc<RwLock<T>>
    /// wrappers.
    pub fn into_shared(self) -> SharedConfig {
        SharedConfig {
            server: Arc::new(RwLock::new(self.server)),
            admin: Arc::new(RwLock::new(self.admin)),
            service: Arc::new(RwLock::new(self.service)),
            publish_retry: Arc::new(RwLock::new(self.publish_retry)),
        }
    }
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: std::path::PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    /// Create a new config loader.
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Load and process the configuration.
    ///
    /// This will:
    /// 1. Read the TOML file
    /// 2. Apply CLI overrides
    /// 3. Validate the configuration
    /// 4. Hash the admin secret if it's plaintext (and rewrite the file)
    /// 5. Build the loaded configuration
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        let mut file_config: FileConfig = toml::from_str(&config_content)?;
        let file_listen = file_config.server.listen;

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }

        validate(&file_config)?;

        let secret_rehashed = !file_config.is_admin_secret_hashed();
        let secret_hash = if secret_rehashed {
            let hash = hash_secret(&file_config.admin.secret)?;
            file_config.admin.secret = hash.clone();
            // The CLI override must not leak into the file.
            let mut on_disk = file_config.clone();
            on_disk.server.listen = file_listen;
            self.rewrite_config(&on_disk)?;
            hash
        } else {
            file_config.admin.secret.clone()
        };

        Ok(build_loaded_config(file_config, secret_hash, secret_rehashed))
    }

    /// Reload the configuration (used during SIGHUP).
    pub fn reload(&self) -> Result<LoadedConfig, ConfigError> {
        self.load()
    }

    fn rewrite_config(&self, config: &FileConfig) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(config)?;

        // Write atomically: write to temp file, then rename
        let temp_path = self.config_path.with_extension("toml.tmp");
        std::fs::write(&temp_path, toml_string)?;
        std::fs::rename(&temp_path, &self.config_path)?;

        Ok(())
    }
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    let invalid = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));

    if config.admin.secret.is_empty() {
        return invalid("admin.secret must not be empty");
    }
    if config.service.secret.is_empty() {
        return invalid("service.secret must not be empty");
    }

    let bus = &config.bus;
    if bus.subscriber.trim().is_empty() || bus.subscriber.chars().count() > 100 {
        return invalid("bus.subscriber must be 1 to 100 characters");
    }
    if bus.signal_channel.is_empty()
        || !bus
            .signal_channel
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return invalid("bus.signal_channel may only contain [A-Za-z0-9_]");
    }
    if bus.start_from == StartFrom::Lookback && bus.lookback_secs.is_none() {
        return invalid("bus.start_from = \"lookback\" requires bus.lookback_secs");
    }
    if bus.batch_size < 1 {
        return invalid("bus.batch_size must be positive");
    }
    if bus.catch_up_interval_secs == 0
        || bus.watchdog_interval_secs == 0
        || bus.retention_interval_secs == 0
    {
        return invalid("bus intervals must be non-zero");
    }
    if bus.staleness_threshold_secs <= bus.catch_up_interval_secs {
        return invalid("bus.staleness_threshold_secs must exceed bus.catch_up_interval_secs");
    }
    if bus.reconnect_min_ms > bus.reconnect_max_ms || bus.restart_min_secs > bus.restart_max_secs
    {
        return invalid("bus backoff minimum must not exceed its maximum");
    }
    if bus.retention_days == 0 {
        return invalid("bus.retention_days must be at least 1");
    }

    let retry = &config.publish_retry;
    if retry.max_attempts == 0 {
        return invalid("publish_retry.max_attempts must be at least 1");
    }
    if retry.min_backoff_ms > retry.max_backoff_ms {
        return invalid("publish_retry.min_backoff_ms must not exceed max_backoff_ms");
    }
    Ok(())
}

fn hash_secret(plaintext: &str) -> Result<String, ConfigError> {
    use argon2::{
        Argon2, PasswordHasher,
        password_hash::{SaltString, rand_core::OsRng},
    };

    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(plaintext.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ConfigError::HashError(e.to_string()))
}

fn build_loaded_config(
    file_config: FileConfig,
    secret_hash: String,
    secret_rehashed: bool,
) -> LoadedConfig {
    let bus = &file_config.bus;
    let initial_watermark = match bus.start_from {
        StartFrom::Latest => InitialWatermark::Latest,
        StartFrom::Beginning => InitialWatermark::Beginning,
        StartFrom::Lookback => {
            InitialWatermark::Lookback(Duration::from_secs(bus.lookback_secs.unwrap_or_default()))
        }
    };

    let bus_config = BusConfig {
        subscriber: bus.subscriber.as_str().into(),
        signal_channel: bus.signal_channel.as_str().into(),
        listener: ListenerConfig {
            catch_up_interval: Duration::from_secs(bus.catch_up_interval_secs),
            batch_size: bus.batch_size,
            initial_watermark,
            reconnect_backoff: BackoffConfig::new(
                Duration::from_millis(bus.reconnect_min_ms),
                Duration::from_millis(bus.reconnect_max_ms),
            ),
        },
        watchdog: WatchdogConfig {
            interval: Duration::from_secs(bus.watchdog_interval_secs),
            staleness_threshold: Duration::from_secs(bus.staleness_threshold_secs),
            restart_backoff: BackoffConfig::new(
                Duration::from_secs(bus.restart_min_secs),
                Duration::from_secs(bus.restart_max_secs),
            ),
            max_consecutive_restarts: bus.max_consecutive_restarts,
        },
        retention: RetentionConfig {
            interval: Duration::from_secs(bus.retention_interval_secs),
            ..RetentionConfig::from_days(bus.retention_days)
        },
        startup: StartupConfig {
            connect_attempts: bus.connect_attempts,
            ..StartupConfig::default()
        },
    };

    let retry = &file_config.publish_retry;
    let publish_retry = RetryPolicy::exponential(
        retry.max_attempts,
        Duration::from_millis(retry.min_backoff_ms),
        Duration::from_millis(retry.max_backoff_ms),
    );

    LoadedConfig {
        server: ServerConfig {
            listen: file_config.server.listen,
        },
        admin: AdminConfig::new(secret_hash),
        service: ServiceConfig::new(file_config.service.secret.into_bytes()),
        stop_timeout: Duration::from_secs(bus.stop_timeout_secs),
        bus: bus_config,
        publish_retry,
        logging: file_config.logging,
        secret_rehashed,
    }
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const MINIMAL: &str = r#"
[admin]
secret = "operator-secret"

[service]
secret = "publish-secret"
"#;

    fn write_config(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "herald-config-{}-{}.toml",
            name,
            std::process::id()
        ));
        std::fs::write(&path, content).unwrap();
        path
    }

    fn parse(content: &str) -> FileConfig {
        toml::from_str(content).unwrap()
    }

    #[test]
    fn test_plaintext_secret_is_hashed_and_rewritten() {
        let path = write_config("rehash", MINIMAL);
        let loader = ConfigLoader::new(&path, Some("127.0.0.1:9999".parse().unwrap()));

        let loaded = loader.load().unwrap();
        assert!(loaded.secret_rehashed);
        assert!(loaded.admin.verify_secret("operator-secret"));
        assert_eq!(loaded.server.listen.port(), 9999);

        let on_disk = parse(&std::fs::read_to_string(&path).unwrap());
        assert!(on_disk.is_admin_secret_hashed());
        assert_eq!(on_disk.server.listen.port(), 8080);
        assert_eq!(on_disk.service.secret, "publish-secret");

        let reloaded = loader.reload().unwrap();
        assert!(!reloaded.secret_rehashed);
        assert!(reloaded.admin.verify_secret("operator-secret"));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_bus_section_maps_onto_bus_config() {
        let mut config = parse(MINIMAL);
        config.bus.subscriber = "discord-pipeline".to_string();
        config.bus.start_from = StartFrom::Lookback;
        config.bus.lookback_secs = Some(600);
        config.bus.retention_days = 7;
        config.bus.retention_interval_secs = 3600;
        config.bus.max_consecutive_restarts = Some(3);
        config.publish_retry.max_attempts = 3;
        validate(&config).unwrap();

        let loaded = build_loaded_config(config, "hash".to_string(), false);
        let bus = &loaded.bus;
        assert_eq!(bus.subscriber, "discord-pipeline");
        assert_eq!(
            bus.listener.initial_watermark,
            InitialWatermark::Lookback(Duration::from_secs(600))
        );
        assert_eq!(bus.listener.catch_up_interval, Duration::from_secs(5));
        assert_eq!(bus.listener.reconnect_backoff.max, Duration::from_secs(60));
        assert_eq!(bus.watchdog.staleness_threshold, Duration::from_secs(60));
        assert_eq!(bus.watchdog.max_consecutive_restarts, Some(3));
        assert_eq!(bus.retention.horizon, Duration::from_secs(7 * 86_400));
        assert_eq!(bus.retention.interval, Duration::from_secs(3600));
        assert_eq!(bus.startup.connect_attempts, 5);
        assert_eq!(loaded.publish_retry.max_attempts, 3);
        assert_eq!(loaded.stop_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let base = parse(MINIMAL);
        validate(&base).unwrap();

        let mut config = base.clone();
        config.bus.start_from = StartFrom::Lookback;
        assert!(matches!(validate(&config), Err(ConfigError::ValidationError(_))));

        let mut config = base.clone();
        config.bus.staleness_threshold_secs = config.bus.catch_up_interval_secs;
        assert!(matches!(validate(&config), Err(ConfigError::ValidationError(_))));

        let mut config = base.clone();
        config.bus.signal_channel = "herald-events; drop".to_string();
        assert!(matches!(validate(&config), Err(ConfigError::ValidationError(_))));

        let mut config = base.clone();
        config.bus.subscriber = "x".repeat(101);
        assert!(matches!(validate(&config), Err(ConfigError::ValidationError(_))));

        let mut config = base.clone();
        config.service.secret.clear();
        assert!(matches!(validate(&config), Err(ConfigError::ValidationError(_))));

        let mut config = base;
        config.publish_retry.min_backoff_ms = 5_000;
        assert!(matches!(validate(&config), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_invalid_file_is_not_rewritten() {
        let content = format!("{MINIMAL}\n[bus]\nbatch_size = 0\n");
        let path = write_config("invalid", &content);
        let loader = ConfigLoader::new(&path, None);

        assert!(matches!(loader.load(), Err(ConfigError::ValidationError(_))));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), content);

        std::fs::remove_file(&path).unwrap();
    }
}
