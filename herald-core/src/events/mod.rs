//! Control-plane messages between the bus workers, and the diagnostic
//! events the bus publishes about itself.
//!
//! # Worker wiring
//!
//! 1. `Watchdog` reads `ListenerStatus`, sends `ListenerCommand::Restart`
//!    and respawns a listener task that died
//! 2. `BusControl` sends `Rewind` / `Restart` and reads `ListenerStatus`
//! 3. All workers watch the same shutdown flag

pub mod channels;
pub mod diagnostics;
pub mod types;

pub use channels::{
    DEFAULT_COMMAND_BUFFER, ListenerCommandReceiver, ListenerCommandSender,
    ListenerStatusReceiver, ListenerStatusSender, SharedListenerCommands,
    listener_command_channel, listener_status_channel, shared_listener_commands,
};
pub use diagnostics::SYSTEM_CHANNEL;
pub use types::{ListenerCommand, ListenerState, ListenerStatus};
