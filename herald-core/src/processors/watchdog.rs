//! Watchdog processor.
//!
//! Periodically inspects the listener's published status and the head of
//! the log. When the listener looks stuck or stale, the watchdog asks it to
//! restart. It never touches the lease itself.
//!
//! When it supervises the listener task (see [`Watchdog::supervise`]), a task
//! that ended without halting is replaced by a fresh one started from the
//! stored watermark.

use crate::config::WatchdogConfig;
use crate::events::diagnostics;
use crate::events::{
    ListenerCommand, ListenerCommandSender, ListenerState, ListenerStatusReceiver,
};
use crate::processors::listener::ListenerSpawner;
use crate::publisher::Publisher;
use crate::store::{EventStore, StoreError};
use crate::utils::backoff::Backoff;
use compact_str::CompactString;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Something wrong with the listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The listener task ended without halting, or its status channel
    /// closed.
    ListenerGone,
    /// The listener halted; there is nothing left to supervise.
    Halted,
    /// No loop iteration for `idle`.
    HeartbeatStale { idle: Duration },
    /// Stuck outside `Listening`.
    NotListening { state: ListenerState, idle: Duration },
    /// Events exist beyond the watermark but it has not moved for `idle`.
    Stale {
        watermark: i64,
        latest: i64,
        idle: Duration,
    },
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::ListenerGone => write!(f, "listener task is gone"),
            Fault::Halted => write!(f, "listener halted"),
            Fault::HeartbeatStale { idle } => write!(f, "no heartbeat for {idle:?}"),
            Fault::NotListening { state, idle } => {
                write!(f, "listener {state:?} for {idle:?}")
            }
            Fault::Stale {
                watermark,
                latest,
                idle,
            } => write!(
                f,
                "watermark {watermark} behind latest {latest} without progress for {idle:?}"
            ),
        }
    }
}

pub struct Watchdog {
    subscriber: CompactString,
    config: WatchdogConfig,
    events: Arc<dyn EventStore>,
    publisher: Publisher,
    status_rx: ListenerStatusReceiver,
    command_tx: ListenerCommandSender,
    listener: Option<SupervisedListener>,
}

struct SupervisedListener {
    spawner: ListenerSpawner,
    task: JoinHandle<()>,
}

impl Watchdog {
    pub fn new(
        subscriber: CompactString,
        config: WatchdogConfig,
        events: Arc<dyn EventStore>,
        publisher: Publisher,
        status_rx: ListenerStatusReceiver,
        command_tx: ListenerCommandSender,
    ) -> Self {
        Self {
            subscriber,
            config,
            events,
            publisher,
            status_rx,
            command_tx,
            listener: None,
        }
    }

    /// Take ownership of the running listener `task`. A task that ends
    /// without halting is respawned through `spawner`, and the watchdog
    /// waits for the listener before it returns.
    pub fn supervise(mut self, spawner: ListenerSpawner, task: JoinHandle<()>) -> Self {
        self.listener = Some(SupervisedListener { spawner, task });
        self
    }

    /// One health check. `None` means healthy.
    pub async fn check(&self) -> Option<Fault> {
        if self.status_rx.has_changed().is_err() {
            return Some(Fault::ListenerGone);
        }
        let status = self.status_rx.borrow().clone();
        let now = Instant::now();
        let threshold = self.config.staleness_threshold;

        if status.state == ListenerState::Halted {
            return Some(Fault::Halted);
        }
        if self
            .listener
            .as_ref()
            .is_some_and(|listener| listener.task.is_finished())
        {
            return Some(Fault::ListenerGone);
        }

        let idle = now.saturating_duration_since(status.heartbeat_at);
        if idle > threshold {
            return Some(Fault::HeartbeatStale { idle });
        }

        if matches!(
            status.state,
            ListenerState::Disconnected | ListenerState::Connecting
        ) {
            let idle = now.saturating_duration_since(status.state_since);
            if idle > threshold {
                return Some(Fault::NotListening {
                    state: status.state,
                    idle,
                });
            }
            return None;
        }

        let idle = now.saturating_duration_since(status.last_advanced_at);
        if idle <= threshold {
            return None;
        }
        match self.events.latest_event_id().await {
            Ok(Some(latest)) if latest > status.last_processed_id => Some(Fault::Stale {
                watermark: status.last_processed_id,
                latest,
                idle,
            }),
            Ok(_) => None,
            Err(err) => {
                // The listener will notice an unreachable store on its own.
                debug!(error = %err, "Watchdog could not read the log head");
                None
            }
        }
    }

    /// Run until shutdown, until the listener halts or is gone for good, or
    /// until giving up.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            subscriber = %self.subscriber,
            interval = ?self.config.interval,
            threshold = ?self.config.staleness_threshold,
            "Watchdog started"
        );
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut restarts = Backoff::new(self.config.restart_backoff);
        let mut hold_until: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Watchdog received shutdown signal");
                        break;
                    }
                    continue;
                }

                _ = ticker.tick() => {}
            }

            let fault = match self.check().await {
                None => {
                    if restarts.attempts() > 0 {
                        info!(subscriber = %self.subscriber, "Listener healthy again");
                    }
                    restarts.reset();
                    hold_until = None;
                    continue;
                }
                Some(Fault::ListenerGone) if self.listener.is_none() => {
                    info!(subscriber = %self.subscriber, "Listener gone, watchdog stopping");
                    break;
                }
                Some(Fault::Halted) => {
                    info!(subscriber = %self.subscriber, "Listener halted, watchdog stopping");
                    break;
                }
                Some(fault) => fault,
            };

            if hold_until.is_some_and(|until| Instant::now() < until) {
                debug!(%fault, "Listener still unhealthy, waiting out restart backoff");
                continue;
            }

            if let Some(max) = self.config.max_consecutive_restarts {
                if restarts.attempts() >= max {
                    self.give_up(&fault, restarts.attempts()).await;
                    break;
                }
            }

            let delay = restarts.next_delay();
            hold_until = Some(Instant::now() + delay);
            let reason = fault.to_string();
            warn!(
                subscriber = %self.subscriber,
                %reason,
                consecutive = restarts.attempts(),
                next_allowed_in = ?delay,
                "Forcing listener restart"
            );
            if fault == Fault::ListenerGone {
                if let Err(err) = self.respawn().await {
                    warn!(error = %err, "Could not respawn listener, retrying after backoff");
                    continue;
                }
            } else if self
                .command_tx
                .send(ListenerCommand::Restart {
                    reason: reason.clone(),
                })
                .await
                .is_err()
            {
                info!("Listener command channel closed, watchdog stopping");
                break;
            }
            let diagnostic =
                diagnostics::restart_forced(&self.subscriber, &reason, restarts.attempts());
            if let Err(err) = self.publisher.publish(diagnostic).await {
                warn!(error = %err, "Could not publish restart diagnostic");
            }
        }

        if let Some(listener) = self.listener.take() {
            if let Err(err) = listener.task.await {
                warn!(subscriber = %self.subscriber, error = %err, "Listener task ended abnormally");
            }
        }
        info!(subscriber = %self.subscriber, "Watchdog shutdown complete");
    }

    /// Replace a finished listener task with a fresh one.
    async fn respawn(&mut self) -> Result<(), StoreError> {
        let Some(listener) = self.listener.as_mut() else {
            return Ok(());
        };
        let task = listener.spawner.respawn().await?;
        let previous = std::mem::replace(&mut listener.task, task);
        if let Err(err) = previous.await {
            warn!(subscriber = %self.subscriber, error = %err, "Listener task died");
        }
        Ok(())
    }

    async fn give_up(&self, fault: &Fault, restarts: u32) {
        warn!(
            subscriber = %self.subscriber,
            %fault,
            restarts,
            "Listener did not recover, watchdog giving up"
        );
        let _ = self
            .command_tx
            .send(ListenerCommand::Halt {
                reason: format!("watchdog gave up after {restarts} restarts: {fault}"),
            })
            .await;
        // Nobody is left to act on the command.
        if let Some(listener) = &self.listener {
            if listener.task.is_finished() {
                listener.spawner.mark_halted();
            }
        }
        let diagnostic = diagnostics::watchdog_gave_up(&self.subscriber, restarts);
        if let Err(err) = self.publisher.publish(diagnostic).await {
            warn!(error = %err, "Could not publish give-up diagnostic");
        }
    }
}
