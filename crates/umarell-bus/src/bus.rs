//! The event bus: channel publish/subscribe and property observation.
//!
//! # Delivery
//!
//! Every publish or property change takes a snapshot of the matching
//! subscriptions under the registry lock, releases the lock, then invokes the
//! handlers synchronously on the calling thread. Consequences:
//!
//! - Handlers may call back into the bus, including removing themselves.
//! - Subscriptions added or removed during a delivery do not change who
//!   receives that delivery.
//! - A given subscriber sees events in the order they were produced on one
//!   thread. No order is defined across subscribers.
//!
//! # Ownership
//!
//! The bus only keeps weak references to subscribers and targets. A dropped
//! subscriber is skipped and pruned; a dropped target takes its subscriptions
//! with it. Values that may run user destructors (handlers, messages) are
//! always dropped after the registry lock is released.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use log::{debug, trace};

use crate::channels::{ChannelRegistry, ChannelSubscription};
use crate::error::BusError;
use crate::handle::{AnyArc, HandleId, WeakHandle};
use crate::observation::{PropertyHandler, PropertyRegistry, PropertySubscription, TargetRef};
use crate::properties::{Observable, PropertyObserver};
use crate::types::{KeySelector, Message, ObjectId, PublishOption, SubscribeOption, validate_channel};

/// Shared registry state. Lives behind an `Arc` so that observed containers
/// can hold it weakly as their [`PropertyObserver`].
struct BusInner {
    channels: ChannelRegistry,
    properties: PropertyRegistry,
    /// Weak self-reference handed to observed containers.
    observer: Weak<dyn PropertyObserver>,
}

impl PropertyObserver for BusInner {
    fn property_changed(&self, object: ObjectId, key: &str) {
        let Some(delivery) = self.properties.snapshot(object, key) else {
            return;
        };
        trace!(
            "Delivering change of '{}' on {} to {} subscriber(s)",
            key,
            object,
            delivery.subscriptions.len()
        );
        if delivery.deliver(key) == 0 {
            return;
        }

        // Some subscribers are gone. The target stays pinned until the
        // pruned entries are dropped and the lock is released.
        if let Some(target) = delivery.target.observable.upgrade() {
            let pruned = self.properties.prune_dead(target.properties(), &self.observer);
            trace!("Pruned {} dead property subscription(s) on {}", pruned.len(), object);
        }
    }

    fn object_released(&self, object: ObjectId) {
        let released = self.properties.release(object);
        if !released.is_empty() {
            debug!(
                "{} released, dropped {} property subscription(s)",
                object,
                released.len()
            );
        }
    }
}

/// In-process event bus.
///
/// Use [`crate::get_bus`] for the process-wide instance, or [`EventBus::new`]
/// for an independent one.
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<BusInner>| {
            let observer: Weak<dyn PropertyObserver> = weak.clone();
            BusInner {
                channels: ChannelRegistry::new(),
                properties: PropertyRegistry::new(),
                observer,
            }
        });
        Self { inner }
    }

    // === Channels ===

    /// Subscribe `subscriber` to `channel`.
    ///
    /// `on_message` receives the live subscriber and each message published
    /// on the channel from now on. It should not capture `subscriber`
    /// strongly, or the subscriber can never be dropped. Subscribing again with the same
    /// (subscriber, channel) pair replaces the previous handler.
    pub fn add_channel_subscriber<S, F>(
        &self,
        subscriber: &Arc<S>,
        channel: &str,
        on_message: F,
    ) -> Result<(), BusError>
    where
        S: Any + Send + Sync,
        F: Fn(&Arc<S>, &Message) + Send + Sync + 'static,
    {
        self.add_channel_subscriber_with_option(subscriber, channel, SubscribeOption::None, on_message)
    }

    /// Like [`EventBus::add_channel_subscriber`], with a [`SubscribeOption`].
    ///
    /// With `SubscribeOption::ReadPrevious` the channel's retained message,
    /// if any, is delivered to `on_message` before this call returns.
    pub fn add_channel_subscriber_with_option<S, F>(
        &self,
        subscriber: &Arc<S>,
        channel: &str,
        option: SubscribeOption,
        on_message: F,
    ) -> Result<(), BusError>
    where
        S: Any + Send + Sync,
        F: Fn(&Arc<S>, &Message) + Send + Sync + 'static,
    {
        validate_channel(channel)?;

        let subscription = ChannelSubscription {
            subscriber: WeakHandle::new(subscriber),
            handler: Arc::new(move |subscriber: &AnyArc, message: &Message| {
                if let Ok(subscriber) = Arc::clone(subscriber).downcast::<S>() {
                    on_message(&subscriber, message);
                }
            }),
        };
        let (retained, evicted) = self.inner.channels.insert(channel, subscription.clone());
        drop(evicted);
        debug!("Subscriber added to channel '{}'", channel);

        if option == SubscribeOption::ReadPrevious {
            if let Some(message) = retained {
                trace!("Replaying retained message on channel '{}'", channel);
                subscription.deliver(&message);
            }
        }
        Ok(())
    }

    /// Unsubscribe `subscriber` from `channel`. No-op if not subscribed.
    pub fn remove_channel_subscriber<S: Any + Send + Sync>(&self, subscriber: &Arc<S>, channel: &str) {
        let evicted = self.inner.channels.remove(channel, HandleId::of(subscriber));
        if !evicted.subscriptions.is_empty() {
            debug!("Subscriber removed from channel '{}'", channel);
        }
    }

    /// Unsubscribe `subscriber` from every channel.
    pub fn remove_subscriber<S: Any + Send + Sync>(&self, subscriber: &Arc<S>) {
        let evicted = self.inner.channels.remove_everywhere(HandleId::of(subscriber));
        if !evicted.subscriptions.is_empty() {
            debug!(
                "Subscriber removed from {} channel(s)",
                evicted.subscriptions.len()
            );
        }
    }

    /// Publish `value` on `channel`.
    ///
    /// Every subscriber registered when the call starts receives the message
    /// exactly once, on this thread, before the call returns.
    pub fn publish<V: Any + Send + Sync>(
        &self,
        value: V,
        channel: &str,
        option: PublishOption,
    ) -> Result<(), BusError> {
        self.publish_message(Message::new(value), channel, option)
    }

    /// Publish an already wrapped [`Message`].
    pub fn publish_message(
        &self,
        message: Message,
        channel: &str,
        option: PublishOption,
    ) -> Result<(), BusError> {
        validate_channel(channel)?;

        let recipients = self.inner.channels.snapshot(channel);
        trace!(
            "Publishing on channel '{}' to {} subscriber(s)",
            channel,
            recipients.len()
        );

        let mut dead = 0;
        for subscription in &recipients {
            if !subscription.deliver(&message) {
                dead += 1;
            }
        }
        if dead > 0 {
            drop(self.inner.channels.prune_dead(channel));
        }

        if option == PublishOption::KeepInMemory {
            drop(self.inner.channels.retain_message(channel, message));
        }
        Ok(())
    }

    /// The message last published on `channel` with
    /// `PublishOption::KeepInMemory`, unless flushed since.
    pub fn last_published(&self, channel: &str) -> Option<Message> {
        self.inner.channels.retained(channel)
    }

    /// Forget the retained message of `channel`.
    pub fn flush_channel(&self, channel: &str) {
        let evicted = self.inner.channels.flush(channel);
        if !evicted.messages.is_empty() {
            debug!("Flushed retained message of channel '{}'", channel);
        }
    }

    /// Forget every retained message.
    pub fn flush_all(&self) {
        let evicted = self.inner.channels.flush_all();
        debug!("Flushed {} retained message(s)", evicted.messages.len());
    }

    /// Live subscribers of `channel`.
    pub fn channel_subscriber_count(&self, channel: &str) -> usize {
        self.inner.channels.subscriber_count(channel)
    }

    /// Whether `channel` currently exists (has subscribers or a retained message).
    pub fn has_channel(&self, channel: &str) -> bool {
        self.inner.channels.contains(channel)
    }

    /// Names of all existing channels, sorted.
    pub fn channel_names(&self) -> Vec<String> {
        self.inner.channels.channel_names()
    }

    // === Properties ===

    /// Observe `key` of `target` on behalf of `subscriber`.
    ///
    /// Every later mutation of `key` through the target's container calls
    /// `on_change(subscriber, target, key)` once. Subscribing again with the
    /// same (subscriber, target, key) triple replaces the previous handler.
    pub fn add_property_subscriber<S, T, F>(
        &self,
        subscriber: &Arc<S>,
        target: &Arc<T>,
        key: &str,
        on_change: F,
    ) -> Result<(), BusError>
    where
        S: Any + Send + Sync,
        T: Observable,
        F: Fn(&Arc<S>, &Arc<T>, &str) + Send + Sync + 'static,
    {
        let selector = KeySelector::key(key)?;
        self.register_property(subscriber, target, selector, property_handler(on_change));
        Ok(())
    }

    /// Observe several keys of `target` with one handler.
    ///
    /// Fails without registering anything if `keys` is empty or contains an
    /// empty key.
    pub fn add_property_subscriber_keys<S, T, F>(
        &self,
        subscriber: &Arc<S>,
        target: &Arc<T>,
        keys: &[&str],
        on_change: F,
    ) -> Result<(), BusError>
    where
        S: Any + Send + Sync,
        T: Observable,
        F: Fn(&Arc<S>, &Arc<T>, &str) + Send + Sync + 'static,
    {
        if keys.is_empty() {
            return Err(BusError::NoPropertyKeys);
        }
        let selectors = keys
            .iter()
            .map(|key| KeySelector::key(key))
            .collect::<Result<Vec<_>, _>>()?;

        let handler = property_handler(on_change);
        for selector in selectors {
            self.register_property(subscriber, target, selector, handler.clone());
        }
        Ok(())
    }

    /// Observe every key of `target`.
    pub fn add_object_subscriber<S, T, F>(&self, subscriber: &Arc<S>, target: &Arc<T>, on_change: F)
    where
        S: Any + Send + Sync,
        T: Observable,
        F: Fn(&Arc<S>, &Arc<T>, &str) + Send + Sync + 'static,
    {
        self.register_property(subscriber, target, KeySelector::All, property_handler(on_change));
    }

    /// Remove every property subscription of `subscriber` on `target`,
    /// whatever the key. No-op if there is none.
    pub fn remove_property_subscriber<S, T>(&self, subscriber: &Arc<S>, target: &Arc<T>)
    where
        S: Any + Send + Sync,
        T: Observable,
    {
        let removed = self.inner.properties.remove(
            HandleId::of(subscriber),
            target.properties(),
            None,
            &self.inner.observer,
        );
        if !removed.is_empty() {
            debug!(
                "Removed {} property subscription(s) on {}",
                removed.len(),
                target.properties().id()
            );
        }
    }

    /// Remove the subscription of `subscriber` on one `key` of `target`.
    pub fn remove_property_subscriber_key<S, T>(&self, subscriber: &Arc<S>, target: &Arc<T>, key: &str)
    where
        S: Any + Send + Sync,
        T: Observable,
    {
        let selector = KeySelector::Key(key.to_string());
        let removed = self.inner.properties.remove(
            HandleId::of(subscriber),
            target.properties(),
            Some(&selector),
            &self.inner.observer,
        );
        if !removed.is_empty() {
            debug!(
                "Removed subscription to '{}' on {}",
                key,
                target.properties().id()
            );
        }
    }

    /// Live property subscriptions on `target`.
    pub fn property_subscription_count<T: Observable>(&self, target: &Arc<T>) -> usize {
        self.inner
            .properties
            .subscription_count(target.properties().id())
    }

    /// Number of objects with at least one property subscription.
    pub fn observed_target_count(&self) -> usize {
        self.inner.properties.target_count()
    }

    /// Drop property subscriptions on `target` whose subscriber is gone.
    ///
    /// Happens lazily anyway; this just makes it immediate.
    pub fn prune_property_subscribers<T: Observable>(&self, target: &Arc<T>) {
        let dead = self
            .inner
            .properties
            .prune_dead(target.properties(), &self.inner.observer);
        if !dead.is_empty() {
            debug!(
                "Pruned {} dead property subscription(s) on {}",
                dead.len(),
                target.properties().id()
            );
        }
    }

    fn register_property<S, T>(
        &self,
        subscriber: &Arc<S>,
        target: &Arc<T>,
        selector: KeySelector,
        handler: PropertyHandler,
    ) where
        S: Any + Send + Sync,
        T: Observable,
    {
        let subscription = PropertySubscription {
            subscriber: WeakHandle::new(subscriber),
            selector,
            handler,
        };
        debug!(
            "Subscriber added to '{}' on {}",
            subscription.selector,
            target.properties().id()
        );
        let evicted = self.inner.properties.insert(
            TargetRef::new(target),
            target.properties(),
            subscription,
            &self.inner.observer,
        );
        drop(evicted);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("channels", &self.inner.channels.channel_names())
            .field("observed_targets", &self.inner.properties.target_count())
            .finish()
    }
}

/// Erase the subscriber and target types of a property callback.
fn property_handler<S, T, F>(on_change: F) -> PropertyHandler
where
    S: Any + Send + Sync,
    T: Observable,
    F: Fn(&Arc<S>, &Arc<T>, &str) + Send + Sync + 'static,
{
    Arc::new(move |subscriber: &AnyArc, target: &AnyArc, key: &str| {
        if let (Ok(subscriber), Ok(target)) = (
            Arc::clone(subscriber).downcast::<S>(),
            Arc::clone(target).downcast::<T>(),
        ) {
            on_change(&subscriber, &target, key);
        }
    })
}
