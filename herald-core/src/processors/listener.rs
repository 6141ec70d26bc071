//! ListenerChannel processor.
//!
//! The listener is the only consumer-side worker that touches events. It:
//! - owns one wake-up lease at a time and recreates it after any loss
//! - sweeps the log for `id > watermark` when it starts listening, on every
//!   wake-up, and on a fixed interval (the safety net for lost signals)
//! - dispatches one event at a time, strictly by id, and advances the
//!   durable watermark after each one
//! - publishes its [`ListenerStatus`] for the watchdog and obeys
//!   [`ListenerCommand`]s
//!
//! A handler failure is written to the failure table before the watermark
//! moves past the event. If that write fails the listener drops its lease
//! and the event is dispatched again after reconnecting.
//!
//! [`ListenerSpawner`] keeps what is needed to start a fresh listener task
//! from the durable watermark; the watchdog uses it when a task dies.

use crate::config::{InitialWatermark, ListenerConfig};
use crate::entities::event::Event;
use crate::entities::handler_failure::RecordHandlerFailure;
use crate::events::diagnostics;
use crate::events::{
    ListenerCommand, ListenerCommandReceiver, ListenerState, ListenerStatusSender,
    SharedListenerCommands,
};
use crate::handlers::HandlerRegistry;
use crate::publisher::Publisher;
use crate::store::{Backend, StoreError, WakeupLease};
use crate::utils::backoff::Backoff;
use compact_str::CompactString;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Why the listener left its current phase.
#[derive(Debug)]
enum Outcome {
    /// Transient failure; reconnect after a backoff delay.
    Lost(String),
    /// Commanded restart; reconnect immediately.
    Restart(String),
    Halt(String),
    Shutdown,
}

pub struct ListenerChannel {
    subscriber: CompactString,
    config: ListenerConfig,
    backend: Backend,
    publisher: Publisher,
    registry: HandlerRegistry,
    status_tx: ListenerStatusSender,
    watermark: i64,
}

/// Load the subscriber's watermark, initializing (and persisting) it from
/// `initial` when the subscriber has never run.
pub async fn resolve_watermark(
    backend: &Backend,
    subscriber: &str,
    initial: InitialWatermark,
) -> Result<i64, StoreError> {
    if let Some(stored) = backend.subscribers.load_watermark(subscriber).await? {
        return Ok(stored);
    }

    let latest = backend.events.latest_event_id().await?.unwrap_or(0);
    let watermark = match initial {
        InitialWatermark::Latest => latest,
        InitialWatermark::Beginning => 0,
        InitialWatermark::Lookback(window) => {
            let since = crate::utils::clock::cutoff(OffsetDateTime::now_utc(), window);
            match backend.events.first_event_id_since(since).await? {
                Some(first) => first - 1,
                None => latest,
            }
        }
    };
    backend
        .subscribers
        .advance_watermark(subscriber, watermark)
        .await?;
    info!(subscriber, watermark, ?initial, "Initialized subscriber watermark");
    Ok(watermark)
}

fn is_shutdown(changed: Result<(), watch::error::RecvError>, rx: &watch::Receiver<bool>) -> bool {
    // A dropped sender counts as shutdown.
    changed.is_err() || *rx.borrow()
}

impl ListenerChannel {
    pub fn new(
        subscriber: CompactString,
        config: ListenerConfig,
        backend: Backend,
        publisher: Publisher,
        registry: HandlerRegistry,
        status_tx: ListenerStatusSender,
        watermark: i64,
    ) -> Self {
        Self {
            subscriber,
            config,
            backend,
            publisher,
            registry,
            status_tx,
            watermark,
        }
    }

    /// Run until shutdown or a `Halt` command.
    pub async fn run(
        mut self,
        mut shutdown_rx: watch::Receiver<bool>,
        commands: SharedListenerCommands,
    ) {
        let mut command_rx = commands.lock_owned().await;
        info!(
            subscriber = %self.subscriber,
            watermark = self.watermark,
            handlers = self.registry.len(),
            "ListenerChannel started"
        );
        let mut reconnect = Backoff::new(self.config.reconnect_backoff).with_jitter();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let outcome = match self.connect(&mut shutdown_rx, &mut command_rx).await {
                Ok(lease) => {
                    reconnect.reset();
                    self.listen(lease, &mut shutdown_rx, &mut command_rx).await
                }
                Err(outcome) => outcome,
            };

            match outcome {
                Outcome::Shutdown => break,
                Outcome::Halt(reason) => {
                    warn!(subscriber = %self.subscriber, %reason, "ListenerChannel halted");
                    break;
                }
                Outcome::Restart(reason) => {
                    info!(subscriber = %self.subscriber, %reason, "ListenerChannel restarting");
                    self.set_state(ListenerState::Disconnected);
                }
                Outcome::Lost(reason) => {
                    self.set_state(ListenerState::Disconnected);
                    let delay = reconnect.next_delay();
                    warn!(
                        subscriber = %self.subscriber,
                        %reason,
                        attempt = reconnect.attempts(),
                        retry_in = ?delay,
                        "ListenerChannel disconnected"
                    );
                    match self.pause(delay, &mut shutdown_rx, &mut command_rx).await {
                        None | Some(Outcome::Restart(_)) | Some(Outcome::Lost(_)) => {}
                        Some(Outcome::Shutdown) => break,
                        Some(Outcome::Halt(reason)) => {
                            warn!(subscriber = %self.subscriber, %reason, "ListenerChannel halted");
                            break;
                        }
                    }
                }
            }
        }

        self.set_state(ListenerState::Halted);
        info!(
            subscriber = %self.subscriber,
            watermark = self.watermark,
            "ListenerChannel shutdown complete"
        );
    }

    /// Obtain a new lease. Commands are still served while connecting.
    async fn connect(
        &mut self,
        shutdown_rx: &mut watch::Receiver<bool>,
        command_rx: &mut ListenerCommandReceiver,
    ) -> Result<Box<dyn WakeupLease>, Outcome> {
        self.set_state(ListenerState::Connecting);
        let wakeups = self.backend.wakeups.clone();
        loop {
            self.heartbeat();
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if is_shutdown(changed, shutdown_rx) {
                        return Err(Outcome::Shutdown);
                    }
                }

                Some(command) = command_rx.recv() => {
                    if let Some(outcome) = self.apply_command(command).await {
                        return Err(outcome);
                    }
                }

                result = wakeups.connect() => {
                    return match result {
                        Ok(lease) => {
                            self.status_tx.send_modify(|s| {
                                s.lease_generation += 1;
                                s.connect_failures = 0;
                            });
                            debug!(subscriber = %self.subscriber, "Wake-up lease acquired");
                            Ok(lease)
                        }
                        Err(err) => {
                            self.status_tx.send_modify(|s| {
                                s.connect_failures = s.connect_failures.saturating_add(1);
                            });
                            Err(Outcome::Lost(format!("connect failed: {err}")))
                        }
                    };
                }
            }
        }
    }

    async fn listen(
        &mut self,
        mut lease: Box<dyn WakeupLease>,
        shutdown_rx: &mut watch::Receiver<bool>,
        command_rx: &mut ListenerCommandReceiver,
    ) -> Outcome {
        self.set_state(ListenerState::Listening);

        // Anything committed while we were away (or before our first start)
        // is only reachable through the log.
        if let Err(outcome) = self.catch_up(shutdown_rx).await {
            return outcome;
        }

        let mut sweep = tokio::time::interval(self.config.catch_up_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        sweep.tick().await;

        loop {
            self.heartbeat();
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if is_shutdown(changed, shutdown_rx) {
                        return Outcome::Shutdown;
                    }
                }

                Some(command) = command_rx.recv() => {
                    if let Some(outcome) = self.apply_command(command).await {
                        return outcome;
                    }
                    if let Err(outcome) = self.catch_up(shutdown_rx).await {
                        return outcome;
                    }
                }

                wakeup = lease.recv() => match wakeup {
                    Ok(wakeup) => {
                        if wakeup.event_id.is_none_or(|id| id > self.watermark) {
                            if let Err(outcome) = self.catch_up(shutdown_rx).await {
                                return outcome;
                            }
                        }
                    }
                    Err(err) => return Outcome::Lost(err.to_string()),
                },

                _ = sweep.tick() => {
                    if let Err(outcome) = self.catch_up(shutdown_rx).await {
                        return outcome;
                    }
                }
            }
        }
    }

    /// Dispatch every event above the watermark, batch by batch.
    async fn catch_up(&mut self, shutdown_rx: &watch::Receiver<bool>) -> Result<(), Outcome> {
        let batch_size = self.config.batch_size.max(1);
        loop {
            let batch = self
                .backend
                .events
                .fetch_after(self.watermark, batch_size)
                .await
                .map_err(|err| Outcome::Lost(format!("catch-up query failed: {err}")))?;
            let Some(last) = batch.last() else {
                return Ok(());
            };
            debug!(
                subscriber = %self.subscriber,
                from = self.watermark,
                to = last.id,
                count = batch.len(),
                "Dispatching batch"
            );
            let exhausted = (batch.len() as i64) < batch_size;

            for event in batch {
                // In-flight handlers finish; we stop between events.
                if *shutdown_rx.borrow() {
                    return Err(Outcome::Shutdown);
                }
                self.process_event(&event).await?;
                self.heartbeat();
            }

            if exhausted {
                return Ok(());
            }
        }
    }

    async fn process_event(&mut self, event: &Event) -> Result<(), Outcome> {
        let failures = self.registry.dispatch(event).await;

        for failure in failures {
            let error = failure.error.to_string();
            self.backend
                .subscribers
                .record_failure(RecordHandlerFailure {
                    event_id: event.id,
                    subscriber: self.subscriber.to_string(),
                    handler: failure.handler.clone(),
                    error: error.clone(),
                })
                .await
                .map_err(|err| {
                    Outcome::Lost(format!(
                        "could not record failure of event {}: {err}",
                        event.id
                    ))
                })?;

            if diagnostics::is_system(event) {
                continue;
            }
            let diagnostic =
                diagnostics::handler_failed(&self.subscriber, event, &failure.handler, &error);
            if let Err(err) = self.publisher.publish(diagnostic).await {
                warn!(
                    event_id = event.id,
                    error = %err,
                    "Could not publish handler failure diagnostic"
                );
            }
        }

        self.backend
            .subscribers
            .advance_watermark(&self.subscriber, event.id)
            .await
            .map_err(|err| Outcome::Lost(format!("could not save watermark: {err}")))?;
        self.watermark = event.id;
        self.status_tx.send_modify(|s| {
            s.last_processed_id = event.id;
            s.last_advanced_at = Instant::now();
        });
        Ok(())
    }

    /// Returns the outcome that ends the current phase, if any.
    async fn apply_command(&mut self, command: ListenerCommand) -> Option<Outcome> {
        match command {
            ListenerCommand::Restart { reason } => Some(Outcome::Restart(reason)),
            ListenerCommand::Halt { reason } => Some(Outcome::Halt(reason)),
            ListenerCommand::Rewind { to_id, reply } => {
                let result = self
                    .backend
                    .subscribers
                    .rewind_watermark(&self.subscriber, to_id)
                    .await;
                match &result {
                    Ok(()) => {
                        info!(
                            subscriber = %self.subscriber,
                            from = self.watermark,
                            to = to_id,
                            "Watermark rewound"
                        );
                        self.watermark = to_id;
                        self.status_tx.send_modify(|s| {
                            s.last_processed_id = to_id;
                            s.last_advanced_at = Instant::now();
                        });
                    }
                    Err(err) => {
                        warn!(subscriber = %self.subscriber, error = %err, "Watermark rewind failed");
                    }
                }
                let _ = reply.send(result);
                None
            }
        }
    }

    /// Sleep for `delay` while still serving shutdown and commands.
    async fn pause(
        &mut self,
        delay: Duration,
        shutdown_rx: &mut watch::Receiver<bool>,
        command_rx: &mut ListenerCommandReceiver,
    ) -> Option<Outcome> {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            self.heartbeat();
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if is_shutdown(changed, shutdown_rx) {
                        return Some(Outcome::Shutdown);
                    }
                }

                Some(command) = command_rx.recv() => {
                    if let Some(outcome) = self.apply_command(command).await {
                        return Some(outcome);
                    }
                }

                _ = &mut sleep => return None,
            }
        }
    }

    fn set_state(&self, state: ListenerState) {
        self.status_tx.send_if_modified(|s| {
            if s.state == state {
                return false;
            }
            debug!(subscriber = %self.subscriber, from = ?s.state, to = ?state, "Listener state");
            s.state = state;
            s.state_since = Instant::now();
            true
        });
    }

    fn heartbeat(&self) {
        self.status_tx.send_modify(|s| s.heartbeat_at = Instant::now());
    }
}

/// Starts listener tasks that share one status channel and one command
/// queue, so a replacement is indistinguishable from the original to the
/// rest of the bus.
#[derive(Clone)]
pub struct ListenerSpawner {
    subscriber: CompactString,
    config: ListenerConfig,
    backend: Backend,
    publisher: Publisher,
    registry: HandlerRegistry,
    status_tx: ListenerStatusSender,
    commands: SharedListenerCommands,
    shutdown_rx: watch::Receiver<bool>,
}

impl ListenerSpawner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        subscriber: CompactString,
        config: ListenerConfig,
        backend: Backend,
        publisher: Publisher,
        registry: HandlerRegistry,
        status_tx: ListenerStatusSender,
        commands: SharedListenerCommands,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            subscriber,
            config,
            backend,
            publisher,
            registry,
            status_tx,
            commands,
            shutdown_rx,
        }
    }

    /// Spawn a listener that starts reading after `watermark`.
    pub fn spawn_at(&self, watermark: i64) -> JoinHandle<()> {
        let listener = ListenerChannel::new(
            self.subscriber.clone(),
            self.config.clone(),
            self.backend.clone(),
            self.publisher.clone(),
            self.registry.clone(),
            self.status_tx.clone(),
            watermark,
        );
        tokio::spawn(listener.run(self.shutdown_rx.clone(), self.commands.clone()))
    }

    /// Spawn a listener from the stored watermark. An event the dead task was
    /// dispatching when it died is dispatched again.
    pub async fn respawn(&self) -> Result<JoinHandle<()>, StoreError> {
        let watermark = match self
            .backend
            .subscribers
            .load_watermark(&self.subscriber)
            .await?
        {
            Some(stored) => stored,
            None => self.status_tx.borrow().last_processed_id,
        };
        self.status_tx.send_modify(|s| {
            s.last_processed_id = watermark;
            s.last_advanced_at = Instant::now();
        });
        info!(subscriber = %self.subscriber, watermark, "Respawning ListenerChannel");
        Ok(self.spawn_at(watermark))
    }

    /// Record a terminal state for a listener that is no longer running.
    pub fn mark_halted(&self) {
        self.status_tx.send_if_modified(|s| {
            if s.state == ListenerState::Halted {
                return false;
            }
            s.state = ListenerState::Halted;
            s.state_since = Instant::now();
            true
        });
    }
}
