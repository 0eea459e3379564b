//! Property subscription registry.
//!
//! Subscriptions are grouped by target. For every target the registry keeps
//! the container observation in step with its subscriptions: the bus is
//! registered on the target's [`Properties`] for a selector exactly while at
//! least one subscription uses that selector.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use log::debug;

use crate::handle::{AnyArc, HandleId, WeakHandle};
use crate::properties::{Observable, Properties, PropertyObserver};
use crate::sync::{read_lock, write_lock};
use crate::types::{KeySelector, ObjectId};

/// Type-erased property callback: (subscriber, target, changed key).
pub(crate) type PropertyHandler = Arc<dyn Fn(&AnyArc, &AnyArc, &str) + Send + Sync>;

#[derive(Clone)]
pub(crate) struct PropertySubscription {
    pub(crate) subscriber: WeakHandle,
    pub(crate) selector: KeySelector,
    pub(crate) handler: PropertyHandler,
}

/// Weak reference to an observed target, both type-erased (for handlers)
/// and as an [`Observable`] (for its container).
#[derive(Clone)]
pub(crate) struct TargetRef {
    pub(crate) handle: WeakHandle,
    pub(crate) observable: Weak<dyn Observable>,
}

impl TargetRef {
    pub(crate) fn new<T: Observable>(target: &Arc<T>) -> Self {
        let observable: Arc<dyn Observable> = target.clone();
        Self {
            handle: WeakHandle::new(target),
            observable: Arc::downgrade(&observable),
        }
    }
}

/// Subscriptions matching one change, plus the target they were made on.
pub(crate) struct PropertyDelivery {
    pub(crate) target: TargetRef,
    pub(crate) subscriptions: Vec<PropertySubscription>,
}

impl PropertyDelivery {
    /// Invoke every live subscription. Returns how many subscribers were dead.
    pub(crate) fn deliver(&self, key: &str) -> usize {
        let Some(target) = self.target.handle.upgrade() else {
            return self.subscriptions.len();
        };
        let mut dead = 0;
        for subscription in &self.subscriptions {
            match subscription.subscriber.upgrade() {
                Some(subscriber) => (subscription.handler)(&subscriber, &target, key),
                None => dead += 1,
            }
        }
        dead
    }
}

struct TargetEntry {
    target: TargetRef,
    subscriptions: Vec<PropertySubscription>,
}

impl TargetEntry {
    fn uses(&self, selector: &KeySelector) -> bool {
        self.subscriptions.iter().any(|s| s.selector == *selector)
    }
}

pub(crate) struct PropertyRegistry {
    targets: RwLock<HashMap<ObjectId, TargetEntry>>,
}

impl PropertyRegistry {
    pub(crate) fn new() -> Self {
        Self {
            targets: RwLock::new(HashMap::new()),
        }
    }

    /// Register or replace `subscription` on the target owning `properties`.
    /// Returns the replaced and pruned subscriptions.
    pub(crate) fn insert(
        &self,
        target: TargetRef,
        properties: &Properties,
        subscription: PropertySubscription,
        observer: &Weak<dyn PropertyObserver>,
    ) -> Vec<PropertySubscription> {
        let mut evicted = Vec::new();
        let mut targets = write_lock(&self.targets);
        let entry = targets
            .entry(properties.id())
            .or_insert_with(|| TargetEntry {
                target,
                subscriptions: Vec::new(),
            });

        let (live, dead): (Vec<_>, Vec<_>) = std::mem::take(&mut entry.subscriptions)
            .into_iter()
            .partition(|s| s.subscriber.is_alive());
        entry.subscriptions = live;
        evicted.extend(dead);

        let id = subscription.subscriber.id();
        let selector = subscription.selector.clone();
        match entry
            .subscriptions
            .iter_mut()
            .find(|s| s.subscriber.id() == id && s.selector == selector)
        {
            Some(existing) => evicted.push(std::mem::replace(existing, subscription)),
            None => entry.subscriptions.push(subscription),
        }

        properties.add_observer(selector, observer.clone());
        sync_observation(entry, properties, &evicted, observer);
        evicted
    }

    /// Remove the subscriptions of `subscriber` on the target owning
    /// `properties`: every one of them, or only the one for `selector`.
    pub(crate) fn remove(
        &self,
        subscriber: HandleId,
        properties: &Properties,
        selector: Option<&KeySelector>,
        observer: &Weak<dyn PropertyObserver>,
    ) -> Vec<PropertySubscription> {
        let mut targets = write_lock(&self.targets);
        let Some(entry) = targets.get_mut(&properties.id()) else {
            return Vec::new();
        };

        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut entry.subscriptions)
            .into_iter()
            .partition(|s| {
                let matches = s.subscriber.id() == subscriber
                    && selector.is_none_or(|sel| s.selector == *sel);
                matches || !s.subscriber.is_alive()
            });
        entry.subscriptions = kept;

        sync_observation(entry, properties, &removed, observer);
        if entry.subscriptions.is_empty() {
            targets.remove(&properties.id());
        }
        removed
    }

    /// Subscriptions of `object` interested in `key`, one per subscriber.
    ///
    /// A subscriber watching both `key` and the whole object gets the handler
    /// registered for `key`.
    pub(crate) fn snapshot(&self, object: ObjectId, key: &str) -> Option<PropertyDelivery> {
        let targets = read_lock(&self.targets);
        let entry = targets.get(&object)?;
        let mut subscriptions: Vec<PropertySubscription> = Vec::new();
        for subscription in entry.subscriptions.iter().filter(|s| s.selector.matches(key)) {
            let id = subscription.subscriber.id();
            match subscriptions.iter_mut().find(|s| s.subscriber.id() == id) {
                Some(existing) => {
                    if existing.selector == KeySelector::All {
                        *existing = subscription.clone();
                    }
                }
                None => subscriptions.push(subscription.clone()),
            }
        }
        if subscriptions.is_empty() {
            return None;
        }
        Some(PropertyDelivery {
            target: entry.target.clone(),
            subscriptions,
        })
    }

    /// Drop subscriptions whose subscriber is gone.
    pub(crate) fn prune_dead(
        &self,
        properties: &Properties,
        observer: &Weak<dyn PropertyObserver>,
    ) -> Vec<PropertySubscription> {
        let mut targets = write_lock(&self.targets);
        let Some(entry) = targets.get_mut(&properties.id()) else {
            return Vec::new();
        };
        let (live, dead): (Vec<_>, Vec<_>) = std::mem::take(&mut entry.subscriptions)
            .into_iter()
            .partition(|s| s.subscriber.is_alive());
        entry.subscriptions = live;

        sync_observation(entry, properties, &dead, observer);
        if entry.subscriptions.is_empty() {
            targets.remove(&properties.id());
        }
        dead
    }

    /// Forget every subscription on `object`. Used when the target is dropped;
    /// its container has already discarded its observers.
    pub(crate) fn release(&self, object: ObjectId) -> Vec<PropertySubscription> {
        write_lock(&self.targets)
            .remove(&object)
            .map(|entry| entry.subscriptions)
            .unwrap_or_default()
    }

    /// Live subscriptions on `object`.
    pub(crate) fn subscription_count(&self, object: ObjectId) -> usize {
        read_lock(&self.targets)
            .get(&object)
            .map(|entry| {
                entry
                    .subscriptions
                    .iter()
                    .filter(|s| s.subscriber.is_alive())
                    .count()
            })
            .unwrap_or(0)
    }

    /// Number of targets with at least one subscription.
    pub(crate) fn target_count(&self) -> usize {
        read_lock(&self.targets).len()
    }
}

/// Withdraw the observation of every selector in `dropped` that no remaining
/// subscription of `entry` uses.
fn sync_observation(
    entry: &TargetEntry,
    properties: &Properties,
    dropped: &[PropertySubscription],
    observer: &Weak<dyn PropertyObserver>,
) {
    let mut withdrawn: Vec<&KeySelector> = Vec::new();
    for subscription in dropped {
        let selector = &subscription.selector;
        if !entry.uses(selector) && !withdrawn.contains(&selector) {
            properties.remove_observer(selector, observer);
            withdrawn.push(selector);
        }
    }
    if !withdrawn.is_empty() {
        debug!(
            "Stopped observing {} on {}",
            withdrawn
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            properties.id()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullObserver;

    impl PropertyObserver for NullObserver {
        fn property_changed(&self, _object: ObjectId, _key: &str) {}
    }

    struct Target(Properties);

    impl Observable for Target {
        fn properties(&self) -> &Properties {
            &self.0
        }
    }

    struct Fixture {
        registry: PropertyRegistry,
        target: Arc<Target>,
        _observer: Arc<dyn PropertyObserver>,
        observer: Weak<dyn PropertyObserver>,
    }

    impl Fixture {
        fn new() -> Self {
            let strong: Arc<dyn PropertyObserver> = Arc::new(NullObserver);
            let observer = Arc::downgrade(&strong);
            Self {
                registry: PropertyRegistry::new(),
                target: Arc::new(Target(Properties::new())),
                _observer: strong,
                observer,
            }
        }

        fn properties(&self) -> &Properties {
            self.target.properties()
        }

        fn subscribe(&self, subscriber: &Arc<String>, selector: KeySelector, hits: &Arc<AtomicUsize>) {
            let hits = hits.clone();
            let subscription = PropertySubscription {
                subscriber: WeakHandle::new(subscriber),
                selector,
                handler: Arc::new(move |_, _, _| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
            };
            self.registry.insert(
                TargetRef::new(&self.target),
                self.properties(),
                subscription,
                &self.observer,
            );
        }
    }

    #[test]
    fn test_observation_is_reference_counted() {
        let fx = Fixture::new();
        let s1 = Arc::new("s1".to_string());
        let s2 = Arc::new("s2".to_string());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = KeySelector::key("counter").unwrap();

        fx.subscribe(&s1, counter.clone(), &hits);
        fx.subscribe(&s2, counter.clone(), &hits);
        assert_eq!(fx.properties().observer_count(), 1);

        fx.registry.remove(HandleId::of(&s1), fx.properties(), None, &fx.observer);
        // s2 still depends on the observation.
        assert_eq!(fx.properties().observer_count(), 1);

        fx.registry.remove(HandleId::of(&s2), fx.properties(), None, &fx.observer);
        assert_eq!(fx.properties().observer_count(), 0);
        assert_eq!(fx.registry.target_count(), 0);
    }

    #[test]
    fn test_insert_replaces_same_triple() {
        let fx = Fixture::new();
        let s1 = Arc::new("s1".to_string());
        let hits = Arc::new(AtomicUsize::new(0));

        fx.subscribe(&s1, KeySelector::key("counter").unwrap(), &hits);
        fx.subscribe(&s1, KeySelector::key("counter").unwrap(), &hits);
        fx.subscribe(&s1, KeySelector::key("label").unwrap(), &hits);
        assert_eq!(fx.registry.subscription_count(fx.properties().id()), 2);
        assert_eq!(fx.properties().observer_count(), 2);
    }

    #[test]
    fn test_remove_single_selector() {
        let fx = Fixture::new();
        let s1 = Arc::new("s1".to_string());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = KeySelector::key("counter").unwrap();

        fx.subscribe(&s1, counter.clone(), &hits);
        fx.subscribe(&s1, KeySelector::key("label").unwrap(), &hits);

        let removed = fx
            .registry
            .remove(HandleId::of(&s1), fx.properties(), Some(&counter), &fx.observer);
        assert_eq!(removed.len(), 1);
        assert_eq!(fx.registry.subscription_count(fx.properties().id()), 1);
        assert_eq!(fx.properties().observer_count(), 1);
    }

    #[test]
    fn test_snapshot_filters_by_key() {
        let fx = Fixture::new();
        let s1 = Arc::new("s1".to_string());
        let s2 = Arc::new("s2".to_string());
        let hits = Arc::new(AtomicUsize::new(0));

        fx.subscribe(&s1, KeySelector::key("counter").unwrap(), &hits);
        fx.subscribe(&s2, KeySelector::All, &hits);

        let delivery = fx.registry.snapshot(fx.properties().id(), "counter").unwrap();
        assert_eq!(delivery.subscriptions.len(), 2);
        assert_eq!(delivery.deliver("counter"), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        let delivery = fx.registry.snapshot(fx.properties().id(), "label").unwrap();
        assert_eq!(delivery.subscriptions.len(), 1);
    }

    #[test]
    fn test_snapshot_keeps_one_entry_per_subscriber() {
        let fx = Fixture::new();
        let s1 = Arc::new("s1".to_string());
        let key_hits = Arc::new(AtomicUsize::new(0));
        let all_hits = Arc::new(AtomicUsize::new(0));

        fx.subscribe(&s1, KeySelector::All, &all_hits);
        fx.subscribe(&s1, KeySelector::key("counter").unwrap(), &key_hits);
        assert_eq!(fx.registry.subscription_count(fx.properties().id()), 2);

        let delivery = fx.registry.snapshot(fx.properties().id(), "counter").unwrap();
        assert_eq!(delivery.subscriptions.len(), 1);
        delivery.deliver("counter");
        assert_eq!(key_hits.load(Ordering::SeqCst), 1);
        assert_eq!(all_hits.load(Ordering::SeqCst), 0);

        let delivery = fx.registry.snapshot(fx.properties().id(), "label").unwrap();
        delivery.deliver("label");
        assert_eq!(all_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dead_subscriber_is_pruned_and_unobserved() {
        let fx = Fixture::new();
        let s1 = Arc::new("s1".to_string());
        let hits = Arc::new(AtomicUsize::new(0));
        fx.subscribe(&s1, KeySelector::key("counter").unwrap(), &hits);

        drop(s1);
        let delivery = fx.registry.snapshot(fx.properties().id(), "counter").unwrap();
        assert_eq!(delivery.deliver("counter"), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let dead = fx.registry.prune_dead(fx.properties(), &fx.observer);
        assert_eq!(dead.len(), 1);
        assert_eq!(fx.properties().observer_count(), 0);
        assert_eq!(fx.registry.target_count(), 0);
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let fx = Fixture::new();
        let s1 = Arc::new("s1".to_string());
        let removed = fx
            .registry
            .remove(HandleId::of(&s1), fx.properties(), None, &fx.observer);
        assert!(removed.is_empty());
    }
}
