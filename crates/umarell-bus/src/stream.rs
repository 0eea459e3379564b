//! Async consumption of channel messages.
//!
//! A channel stream is an ordinary channel subscription whose handler
//! forwards every message into a tokio mpsc channel. Dropping the receiver
//! does not unsubscribe; the subscription ends with the subscriber, or with
//! an explicit `remove_channel_subscriber`.

use std::any::Any;
use std::sync::Arc;

use log::trace;
use tokio::sync::mpsc;

use crate::bus::EventBus;
use crate::error::BusError;
use crate::types::{Message, SubscribeOption};

impl EventBus {
    /// Subscribe `subscriber` to `channel` and receive its messages through
    /// an unbounded mpsc receiver.
    ///
    /// Replaces any existing subscription of `subscriber` on `channel`.
    pub fn channel_stream<S: Any + Send + Sync>(
        &self,
        subscriber: &Arc<S>,
        channel: &str,
    ) -> Result<mpsc::UnboundedReceiver<Message>, BusError> {
        self.channel_stream_with_option(subscriber, channel, SubscribeOption::None)
    }

    /// Like [`EventBus::channel_stream`], with a [`SubscribeOption`].
    pub fn channel_stream_with_option<S: Any + Send + Sync>(
        &self,
        subscriber: &Arc<S>,
        channel: &str,
        option: SubscribeOption,
    ) -> Result<mpsc::UnboundedReceiver<Message>, BusError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let name = channel.to_string();
        self.add_channel_subscriber_with_option(subscriber, channel, option, move |_, message| {
            if tx.send(message.clone()).is_err() {
                trace!("Stream receiver for channel '{}' is gone", name);
            }
        })?;
        Ok(rx)
    }
}
