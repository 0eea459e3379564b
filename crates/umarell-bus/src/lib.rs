//! umarell-bus: in-process event bus
//!
//! Two ways to listen:
//! - Named channels: publish any value, every subscriber of the channel gets it
//! - Property observation: objects embedding [`Properties`] report every
//!   mutation of a key to the subscribers of that key
//!
//! The bus never keeps subscribers or observed objects alive. Handlers run on
//! the thread that published or mutated, so UI code must hop to its own thread.

mod bus;
mod channels;
mod error;
mod handle;
mod observation;
mod properties;
mod stream;
mod sync;
mod types;

pub use bus::EventBus;
pub use error::BusError;
pub use properties::{Observable, Properties, PropertyObserver};
pub use types::{KeySelector, Message, ObjectId, PublishOption, SubscribeOption};

use std::sync::OnceLock;

static BUS: OnceLock<EventBus> = OnceLock::new();

/// Get the process-wide event bus, creating it on first use.
pub fn get_bus() -> &'static EventBus {
    BUS.get_or_init(EventBus::new)
}
