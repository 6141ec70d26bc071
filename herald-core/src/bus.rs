//! Bus supervisor.
//!
//! [`EventBus`] holds the store handles and configuration. [`EventBus::start`]
//! verifies the store is reachable, resolves the subscriber watermark and
//! spawns the three workers (listener, watchdog, reaper). The watchdog owns
//! the listener task and respawns it if it dies. The returned [`BusHandle`]
//! controls the workers and stops them.

use crate::config::{BusConfig, ConfigStore, RetentionConfig};
use crate::events::{
    ListenerCommand, ListenerCommandSender, ListenerStatus, ListenerStatusReceiver,
    listener_command_channel, listener_status_channel, shared_listener_commands,
};
use crate::handlers::HandlerRegistry;
use crate::processors::{ListenerSpawner, RetentionReaper, Watchdog, resolve_watermark};
use crate::publisher::Publisher;
use crate::query::QueryService;
use crate::store::{Backend, StoreError};
use crate::utils::backoff::Backoff;
use compact_str::CompactString;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("event store unavailable after {attempts} attempts: {source}")]
    Unavailable {
        attempts: u32,
        #[source]
        source: StoreError,
    },
    #[error("invalid bus configuration: {0}")]
    InvalidConfig(String),
    #[error("event store error: {0}")]
    Store(#[from] StoreError),
    #[error("invalid replay position {0}")]
    InvalidReplay(i64),
    #[error("the listener is not running")]
    ListenerStopped,
    #[error("bus workers did not stop within {0:?}")]
    StopTimeout(Duration),
}

#[derive(Debug)]
pub struct EventBus {
    config: BusConfig,
    backend: Backend,
    publisher: Publisher,
    query: QueryService,
    retention: ConfigStore<RetentionConfig>,
}

impl EventBus {
    pub fn new(config: BusConfig, backend: Backend) -> Self {
        let publisher = Publisher::new(&backend);
        let query = QueryService::new(&backend);
        let retention = ConfigStore::new(config.retention);
        Self {
            config,
            backend,
            publisher,
            query,
            retention,
        }
    }

    /// Bus over Postgres, signalling on `config.signal_channel`.
    pub fn postgres(config: BusConfig, pool: sqlx::PgPool) -> Self {
        let backend = Backend::postgres(pool, &config.signal_channel);
        Self::new(config, backend)
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    pub fn query(&self) -> QueryService {
        self.query.clone()
    }

    /// Live retention settings; updates apply on the reaper's next run.
    pub fn retention(&self) -> ConfigStore<RetentionConfig> {
        self.retention.clone()
    }

    /// Check the configuration, wait for the store, and spawn the workers.
    ///
    /// Fails with [`BusError::Unavailable`] when the store cannot be reached
    /// within `startup.connect_attempts` tries.
    pub async fn start(&self, registry: HandlerRegistry) -> Result<BusHandle, BusError> {
        self.validate()?;
        self.wait_for_store().await?;

        let subscriber = self.config.subscriber.clone();
        let watermark = resolve_watermark(
            &self.backend,
            &subscriber,
            self.config.listener.initial_watermark,
        )
        .await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (command_tx, command_rx) = listener_command_channel();
        let (status_tx, status_rx) = listener_status_channel(watermark);

        let spawner = ListenerSpawner::new(
            subscriber.clone(),
            self.config.listener.clone(),
            self.backend.clone(),
            self.publisher.clone(),
            registry,
            status_tx,
            shared_listener_commands(command_rx),
            shutdown_rx.clone(),
        );
        let listener = spawner.spawn_at(watermark);
        let watchdog = Watchdog::new(
            subscriber.clone(),
            self.config.watchdog.clone(),
            self.backend.events.clone(),
            self.publisher.clone(),
            status_rx.clone(),
            command_tx.clone(),
        )
        .supervise(spawner, listener);
        let reaper = RetentionReaper::new(self.backend.events.clone(), self.retention.clone());

        // The watchdog joins the listener before it returns.
        let tasks = vec![
            ("watchdog", tokio::spawn(watchdog.run(shutdown_rx.clone()))),
            (
                "reaper",
                tokio::spawn(reaper.run(shutdown_rx, self.retention.subscribe())),
            ),
        ];

        info!(%subscriber, watermark, "Event bus started");
        Ok(BusHandle {
            control: BusControl {
                subscriber,
                command_tx,
                status_rx,
            },
            shutdown_tx,
            tasks,
        })
    }

    fn validate(&self) -> Result<(), BusError> {
        let config = &self.config;
        let invalid = |msg: &str| Err(BusError::InvalidConfig(msg.to_string()));
        if config.subscriber.trim().is_empty() || config.subscriber.chars().count() > 100 {
            return invalid("subscriber must be 1 to 100 characters");
        }
        if config.signal_channel.is_empty()
            || !config
                .signal_channel
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return invalid("signal_channel must be a non-empty identifier of [A-Za-z0-9_]");
        }
        if config.listener.batch_size < 1 {
            return invalid("listener batch_size must be positive");
        }
        if config.listener.catch_up_interval.is_zero()
            || config.watchdog.interval.is_zero()
            || config.retention.interval.is_zero()
        {
            return invalid("catch-up, watchdog and retention intervals must be non-zero");
        }
        if config.watchdog.staleness_threshold <= config.listener.catch_up_interval {
            return invalid("staleness threshold must exceed the catch-up interval");
        }
        Ok(())
    }

    /// Ping the store until it answers, up to `startup.connect_attempts`
    /// times with backoff in between.
    pub async fn wait_for_store(&self) -> Result<(), BusError> {
        let attempts = self.config.startup.connect_attempts.max(1);
        let mut backoff = Backoff::new(self.config.startup.backoff);
        loop {
            match self.backend.events.ping().await {
                Ok(()) => return Ok(()),
                Err(err) if backoff.attempts() + 1 >= attempts => {
                    return Err(BusError::Unavailable {
                        attempts,
                        source: err,
                    });
                }
                Err(err) => {
                    let delay = backoff.next_delay();
                    warn!(
                        error = %err,
                        attempt = backoff.attempts(),
                        of = attempts,
                        retry_in = ?delay,
                        "Event store not reachable"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Cloneable control surface of a running bus: status, replay and restart.
#[derive(Debug, Clone)]
pub struct BusControl {
    subscriber: CompactString,
    command_tx: ListenerCommandSender,
    status_rx: ListenerStatusReceiver,
}

impl BusControl {
    pub fn subscriber(&self) -> &str {
        &self.subscriber
    }

    pub fn status(&self) -> ListenerStatus {
        self.status_rx.borrow().clone()
    }

    pub fn watch_status(&self) -> ListenerStatusReceiver {
        self.status_rx.clone()
    }

    /// Operator replay: every event with `id > to_id` is dispatched again.
    pub async fn rewind(&self, to_id: i64) -> Result<(), BusError> {
        if to_id < 0 {
            return Err(BusError::InvalidReplay(to_id));
        }
        let (reply, response) = oneshot::channel();
        self.command_tx
            .send(ListenerCommand::Rewind { to_id, reply })
            .await
            .map_err(|_| BusError::ListenerStopped)?;
        response.await.map_err(|_| BusError::ListenerStopped)??;
        Ok(())
    }

    pub async fn restart(&self, reason: impl Into<String>) -> Result<(), BusError> {
        self.command_tx
            .send(ListenerCommand::Restart {
                reason: reason.into(),
            })
            .await
            .map_err(|_| BusError::ListenerStopped)
    }
}

/// Owning handle of a running bus. Dropping it without calling
/// [`stop`](Self::stop) leaves the workers running until the runtime exits.
#[derive(Debug)]
pub struct BusHandle {
    control: BusControl,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl std::ops::Deref for BusHandle {
    type Target = BusControl;

    fn deref(&self) -> &BusControl {
        &self.control
    }
}

impl BusHandle {
    pub fn control(&self) -> BusControl {
        self.control.clone()
    }

    /// Signal every worker to stop and wait up to `timeout` for them.
    ///
    /// A handler that is running when this is called is allowed to finish.
    pub async fn stop(self, timeout: Duration) -> Result<(), BusError> {
        let subscriber = self.control.subscriber.clone();
        info!(%subscriber, "Stopping event bus");
        let _ = self.shutdown_tx.send(true);

        let tasks = self.tasks;
        let join_all = async move {
            for (name, task) in tasks {
                if let Err(err) = task.await {
                    warn!(worker = name, error = %err, "Bus worker ended abnormally");
                }
            }
        };
        tokio::time::timeout(timeout, join_all)
            .await
            .map_err(|_| BusError::StopTimeout(timeout))?;
        info!(%subscriber, "Event bus stopped");
        Ok(())
    }
}
