#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod bus;
pub mod config;
pub mod entities;
pub mod events;
pub mod framework;
pub mod handlers;
pub mod processors;
pub mod publisher;
pub mod query;
pub mod store;
pub mod utils;

pub use bus::{BusControl, BusError, BusHandle, EventBus};
pub use entities::event::{Event, NewEvent};
pub use handlers::{EventHandler, HandlerError, HandlerRegistry, handler_fn};
pub use publisher::{PublishError, Published, Publisher, RetryPolicy, ValidationError};
pub use query::QueryService;
