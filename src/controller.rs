//! Demo controller: one observed counter, one message channel.
//!
//! The controller is both the observed object (its `timerValue` property is
//! bumped by a ticker) and the subscriber of the property and the channel.

use crate::config::DemoConfig;
use crate::events::UiEvent;
use crate::ticker::{Ticker, start_ticker};
use crossbeam_channel::Sender;
use log::info;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use umarell_bus::{BusError, EventBus, Message, Observable, Properties, PublishOption};

/// Observed property key.
pub const TIMER_KEY: &str = "timerValue";

/// Amount added to the counter on every tick.
pub const TIME_INTERVAL: i64 = 1;

pub struct DemoController {
    properties: Properties,
    config: DemoConfig,
    bus: &'static EventBus,
    ui_tx: Sender<UiEvent>,
    ticker: Mutex<Option<Ticker>>,
    sent: AtomicU32,
}

impl Observable for DemoController {
    fn properties(&self) -> &Properties {
        &self.properties
    }
}

impl DemoController {
    pub fn new(config: DemoConfig, bus: &'static EventBus, ui_tx: Sender<UiEvent>) -> Arc<Self> {
        let controller = Arc::new(Self {
            properties: Properties::new(),
            config,
            bus,
            ui_tx,
            ticker: Mutex::new(None),
            sent: AtomicU32::new(0),
        });
        controller.properties.set(TIMER_KEY, 0i64);
        controller
    }

    pub fn timer_value(&self) -> i64 {
        self.properties.get::<i64>(TIMER_KEY).unwrap_or_default()
    }

    /// Tick handler: bump the observed counter.
    pub fn timer_update(&self) {
        self.properties
            .update(TIMER_KEY, |value: &mut i64| *value += TIME_INTERVAL);
    }

    /// Start the ticker (once) and observe our own counter.
    pub fn add_subscriber_to_property(self: &Arc<Self>) -> Result<(), BusError> {
        self.ensure_ticker();
        self.bus
            .add_property_subscriber(self, self, TIMER_KEY, |me: &Arc<Self>, _, _| {
                let _ = me.ui_tx.send(UiEvent::PropertyLabel(me.timer_value()));
            })
    }

    /// Stop the ticker and the counter observation.
    pub fn remove_subscriber_to_property(self: &Arc<Self>) {
        let ticker = self.ticker.lock().ok().and_then(|mut guard| guard.take());
        if let Some(ticker) = ticker {
            ticker.stop();
        }
        self.bus.remove_property_subscriber(self, self);
    }

    pub fn add_subscriber_to_channel(self: &Arc<Self>) -> Result<(), BusError> {
        self.bus.add_channel_subscriber(
            self,
            &self.config.channel_name,
            |me: &Arc<Self>, message: &Message| {
                let text = message
                    .downcast_ref::<String>()
                    .cloned()
                    .unwrap_or_else(|| format!("{:?}", message));
                let _ = me.ui_tx.send(UiEvent::ChannelLabel(text));
            },
        )
    }

    /// Publish a fresh message on the demo channel.
    pub fn send_message_to_channel(&self) -> Result<(), BusError> {
        let message = format!("Channel message - {}", self.next_message_number());
        let option = if self.config.keep_in_memory {
            PublishOption::KeepInMemory
        } else {
            PublishOption::None
        };
        self.bus.publish(message, &self.config.channel_name, option)
    }

    pub fn remove_subscriber_to_channel(self: &Arc<Self>) {
        self.bus
            .remove_channel_subscriber(self, &self.config.channel_name);
    }

    fn ensure_ticker(self: &Arc<Self>) {
        let Ok(mut guard) = self.ticker.lock() else {
            return;
        };
        if guard.is_some() {
            return;
        }

        info!(
            "Starting ticker every {} ms",
            self.config.tick_interval().as_millis()
        );
        let weak = Arc::downgrade(self);
        *guard = Some(start_ticker(self.config.tick_interval(), move || {
            match weak.upgrade() {
                Some(controller) => {
                    controller.timer_update();
                    true
                }
                None => false,
            }
        }));
    }

    /// Sequence number mixed with clock noise, like a random suffix.
    fn next_message_number(&self) -> u32 {
        let seq = self.sent.fetch_add(1, Ordering::Relaxed);
        let noise = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        (seq.wrapping_mul(7919).wrapping_add(noise)) % 1000
    }
}
