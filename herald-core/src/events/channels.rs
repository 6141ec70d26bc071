//! Channel factories for the listener's control plane.

use super::types::{ListenerCommand, ListenerStatus};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, watch};

/// Commands are rare (restarts, replays); a small buffer is plenty.
pub const DEFAULT_COMMAND_BUFFER: usize = 16;

pub type ListenerCommandSender = mpsc::Sender<ListenerCommand>;
pub type ListenerCommandReceiver = mpsc::Receiver<ListenerCommand>;

/// Command receiver that outlives any one listener task. A running listener
/// holds the lock; a respawned one takes it over with the queue intact.
pub type SharedListenerCommands = Arc<Mutex<ListenerCommandReceiver>>;

pub type ListenerStatusSender = watch::Sender<ListenerStatus>;
pub type ListenerStatusReceiver = watch::Receiver<ListenerStatus>;

pub fn listener_command_channel() -> (ListenerCommandSender, ListenerCommandReceiver) {
    mpsc::channel(DEFAULT_COMMAND_BUFFER)
}

pub fn shared_listener_commands(command_rx: ListenerCommandReceiver) -> SharedListenerCommands {
    Arc::new(Mutex::new(command_rx))
}

/// Status channel seeded with the listener's starting watermark.
pub fn listener_status_channel(
    last_processed_id: i64,
) -> (ListenerStatusSender, ListenerStatusReceiver) {
    watch::channel(ListenerStatus::new(last_processed_id))
}
