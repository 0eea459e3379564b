//! Named-channel subscription registry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use log::trace;

use crate::handle::{AnyArc, HandleId, WeakHandle};
use crate::sync::{read_lock, write_lock};
use crate::types::Message;

/// Type-erased channel callback. Receives the live subscriber and the message.
pub(crate) type ChannelHandler = Arc<dyn Fn(&AnyArc, &Message) + Send + Sync>;

/// One (subscriber, channel) registration.
#[derive(Clone)]
pub(crate) struct ChannelSubscription {
    pub(crate) subscriber: WeakHandle,
    pub(crate) handler: ChannelHandler,
}

impl ChannelSubscription {
    /// Invoke the handler if the subscriber is still alive.
    /// Returns false for a dead subscriber.
    pub(crate) fn deliver(&self, message: &Message) -> bool {
        match self.subscriber.upgrade() {
            Some(subscriber) => {
                (self.handler)(&subscriber, message);
                true
            }
            None => false,
        }
    }
}

#[derive(Default)]
struct ChannelState {
    /// Registration order; at most one entry per subscriber.
    subscriptions: Vec<ChannelSubscription>,
    /// Last message published with `PublishOption::KeepInMemory`.
    retained: Option<Message>,
}

impl ChannelState {
    fn is_vacant(&self) -> bool {
        self.subscriptions.is_empty() && self.retained.is_none()
    }
}

/// Anything taken out of the registry. Returned to the caller so user values
/// are dropped after the lock has been released.
#[derive(Default)]
pub(crate) struct Evicted {
    pub(crate) subscriptions: Vec<ChannelSubscription>,
    pub(crate) messages: Vec<Message>,
}

impl Evicted {
    pub(crate) fn is_empty(&self) -> bool {
        self.subscriptions.is_empty() && self.messages.is_empty()
    }
}

/// All channels, keyed by name. A channel exists only while it has
/// subscribers or a retained message.
pub(crate) struct ChannelRegistry {
    channels: RwLock<HashMap<String, ChannelState>>,
}

impl ChannelRegistry {
    pub(crate) fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Register or replace the subscription of `subscription.subscriber` on
    /// `name`. Returns the channel's retained message alongside whatever was
    /// evicted (the replaced subscription, dead subscribers).
    pub(crate) fn insert(
        &self,
        name: &str,
        subscription: ChannelSubscription,
    ) -> (Option<Message>, Evicted) {
        let mut evicted = Evicted::default();
        let mut channels = write_lock(&self.channels);
        let state = channels.entry(name.to_string()).or_default();

        let id = subscription.subscriber.id();
        let mut i = 0;
        while i < state.subscriptions.len() {
            if !state.subscriptions[i].subscriber.is_alive() {
                evicted.subscriptions.push(state.subscriptions.remove(i));
            } else {
                i += 1;
            }
        }

        match state
            .subscriptions
            .iter_mut()
            .find(|s| s.subscriber.id() == id)
        {
            Some(existing) => {
                let replaced = std::mem::replace(existing, subscription);
                evicted.subscriptions.push(replaced);
            }
            None => state.subscriptions.push(subscription),
        }

        (state.retained.clone(), evicted)
    }

    /// Remove the subscription of `subscriber` on `name`, if any.
    pub(crate) fn remove(&self, name: &str, subscriber: HandleId) -> Evicted {
        let mut evicted = Evicted::default();
        let mut channels = write_lock(&self.channels);
        if let Some(state) = channels.get_mut(name) {
            if let Some(pos) = state
                .subscriptions
                .iter()
                .position(|s| s.subscriber.id() == subscriber)
            {
                evicted.subscriptions.push(state.subscriptions.remove(pos));
            }
            if state.is_vacant() {
                channels.remove(name);
            }
        }
        evicted
    }

    /// Remove `subscriber` from every channel.
    pub(crate) fn remove_everywhere(&self, subscriber: HandleId) -> Evicted {
        let mut evicted = Evicted::default();
        let mut channels = write_lock(&self.channels);
        for state in channels.values_mut() {
            if let Some(pos) = state
                .subscriptions
                .iter()
                .position(|s| s.subscriber.id() == subscriber)
            {
                evicted.subscriptions.push(state.subscriptions.remove(pos));
            }
        }
        channels.retain(|_, state| !state.is_vacant());
        evicted
    }

    /// Copy of the current subscriptions of `name`, in registration order.
    pub(crate) fn snapshot(&self, name: &str) -> Vec<ChannelSubscription> {
        read_lock(&self.channels)
            .get(name)
            .map(|state| state.subscriptions.clone())
            .unwrap_or_default()
    }

    /// Drop subscriptions whose subscriber is gone.
    pub(crate) fn prune_dead(&self, name: &str) -> Evicted {
        let mut evicted = Evicted::default();
        let mut channels = write_lock(&self.channels);
        if let Some(state) = channels.get_mut(name) {
            let (live, dead): (Vec<_>, Vec<_>) = std::mem::take(&mut state.subscriptions)
                .into_iter()
                .partition(|s| s.subscriber.is_alive());
            state.subscriptions = live;
            evicted.subscriptions = dead;
            if state.is_vacant() {
                channels.remove(name);
            }
        }
        if !evicted.subscriptions.is_empty() {
            trace!(
                "Pruned {} dead subscriber(s) from channel '{}'",
                evicted.subscriptions.len(),
                name
            );
        }
        evicted
    }

    /// Store `message` as the retained message of `name`, creating the
    /// channel if needed.
    pub(crate) fn retain_message(&self, name: &str, message: Message) -> Evicted {
        let mut evicted = Evicted::default();
        let mut channels = write_lock(&self.channels);
        let state = channels.entry(name.to_string()).or_default();
        if let Some(old) = state.retained.replace(message) {
            evicted.messages.push(old);
        }
        evicted
    }

    pub(crate) fn retained(&self, name: &str) -> Option<Message> {
        read_lock(&self.channels)
            .get(name)
            .and_then(|state| state.retained.clone())
    }

    pub(crate) fn flush(&self, name: &str) -> Evicted {
        let mut evicted = Evicted::default();
        let mut channels = write_lock(&self.channels);
        if let Some(state) = channels.get_mut(name) {
            evicted.messages.extend(state.retained.take());
            if state.is_vacant() {
                channels.remove(name);
            }
        }
        evicted
    }

    pub(crate) fn flush_all(&self) -> Evicted {
        let mut evicted = Evicted::default();
        let mut channels = write_lock(&self.channels);
        for state in channels.values_mut() {
            evicted.messages.extend(state.retained.take());
        }
        channels.retain(|_, state| !state.is_vacant());
        evicted
    }

    /// Live subscribers of `name`.
    pub(crate) fn subscriber_count(&self, name: &str) -> usize {
        read_lock(&self.channels)
            .get(name)
            .map(|state| {
                state
                    .subscriptions
                    .iter()
                    .filter(|s| s.subscriber.is_alive())
                    .count()
            })
            .unwrap_or(0)
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        read_lock(&self.channels).contains_key(name)
    }

    pub(crate) fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = read_lock(&self.channels).keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(subscriber: &Arc<String>, hits: &Arc<AtomicUsize>) -> ChannelSubscription {
        let hits = hits.clone();
        ChannelSubscription {
            subscriber: WeakHandle::new(subscriber),
            handler: Arc::new(move |_, _| {
                hits.fetch_add(1, Ordering::SeqCst);
            }),
        }
    }

    #[test]
    fn test_insert_replaces_same_subscriber() {
        let registry = ChannelRegistry::new();
        let s1 = Arc::new("s1".to_string());
        let hits = Arc::new(AtomicUsize::new(0));

        let (_, evicted) = registry.insert("news", counting(&s1, &hits));
        assert!(evicted.is_empty());
        let (_, evicted) = registry.insert("news", counting(&s1, &hits));
        assert_eq!(evicted.subscriptions.len(), 1);
        assert_eq!(registry.subscriber_count("news"), 1);
    }

    #[test]
    fn test_channel_vanishes_with_last_subscriber() {
        let registry = ChannelRegistry::new();
        let s1 = Arc::new("s1".to_string());
        let hits = Arc::new(AtomicUsize::new(0));

        registry.insert("news", counting(&s1, &hits));
        assert!(registry.contains("news"));

        let evicted = registry.remove("news", HandleId::of(&s1));
        assert_eq!(evicted.subscriptions.len(), 1);
        assert!(!registry.contains("news"));

        // Second removal finds nothing.
        assert!(registry.remove("news", HandleId::of(&s1)).is_empty());
    }

    #[test]
    fn test_retained_message_keeps_channel_alive() {
        let registry = ChannelRegistry::new();
        registry.retain_message("news", Message::new("first"));
        assert!(registry.contains("news"));

        let evicted = registry.retain_message("news", Message::new("second"));
        assert_eq!(evicted.messages.len(), 1);
        let retained = registry.retained("news").unwrap();
        assert_eq!(retained.downcast_ref::<&str>(), Some(&"second"));

        let evicted = registry.flush("news");
        assert_eq!(evicted.messages.len(), 1);
        assert!(!registry.contains("news"));
    }

    #[test]
    fn test_remove_everywhere_leaves_other_subscribers() {
        let registry = ChannelRegistry::new();
        let s1 = Arc::new("s1".to_string());
        let s2 = Arc::new("s2".to_string());
        let hits = Arc::new(AtomicUsize::new(0));

        registry.insert("a", counting(&s1, &hits));
        registry.insert("b", counting(&s1, &hits));
        registry.insert("b", counting(&s2, &hits));

        let evicted = registry.remove_everywhere(HandleId::of(&s1));
        assert_eq!(evicted.subscriptions.len(), 2);
        assert_eq!(registry.channel_names(), vec!["b".to_string()]);
        assert_eq!(registry.subscriber_count("b"), 1);
    }

    #[test]
    fn test_dead_subscribers_pruned() {
        let registry = ChannelRegistry::new();
        let s1 = Arc::new("s1".to_string());
        let hits = Arc::new(AtomicUsize::new(0));
        registry.insert("news", counting(&s1, &hits));

        drop(s1);
        assert_eq!(registry.subscriber_count("news"), 0);
        for sub in registry.snapshot("news") {
            assert!(!sub.deliver(&Message::new(1u8)));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let evicted = registry.prune_dead("news");
        assert_eq!(evicted.subscriptions.len(), 1);
        assert!(!registry.contains("news"));
    }
}
