//! Observable property container.
//!
//! Objects opt in to property observation by embedding a [`Properties`]
//! container and implementing [`Observable`]. Mutations go through the
//! container's typed setters, which notify every registered
//! [`PropertyObserver`] interested in the changed key.
//!
//! # Invariants
//!
//! 1. Every `set` (and every `update` that finds the key) produces exactly one
//!    notification per interested observer, even if the new value equals the
//!    old one.
//! 2. Observers are called after all container locks are released, so an
//!    observer may read or write the container again.
//! 3. Observers are held weakly; a dropped observer is pruned lazily.
//! 4. Dropping the container tells every live observer the object is gone.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, Weak};

use crate::sync::{read_lock, write_lock};
use crate::types::{KeySelector, ObjectId};

/// Receives change notifications from a [`Properties`] container.
pub trait PropertyObserver: Send + Sync {
    /// `key` of `object` was just mutated.
    fn property_changed(&self, object: ObjectId, key: &str);

    /// The container of `object` is being dropped.
    fn object_released(&self, _object: ObjectId) {}
}

/// An object whose properties can be observed through the event bus.
pub trait Observable: Send + Sync + 'static {
    fn properties(&self) -> &Properties;
}

struct ObserverEntry {
    selector: KeySelector,
    observer: Weak<dyn PropertyObserver>,
}

/// Typed key/value store that reports mutations to its observers.
pub struct Properties {
    id: ObjectId,
    values: RwLock<HashMap<String, Box<dyn Any + Send + Sync>>>,
    observers: RwLock<Vec<ObserverEntry>>,
}

impl Properties {
    pub fn new() -> Self {
        Self {
            id: ObjectId::next(),
            values: RwLock::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Stable identity of this container (and of the object embedding it).
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Store `value` under `key` and notify observers of `key`.
    pub fn set<T: Any + Send + Sync>(&self, key: &str, value: T) {
        let replaced = write_lock(&self.values).insert(key.to_string(), Box::new(value));
        // The old value may read the container from its destructor.
        drop(replaced);
        self.did_change(key);
    }

    /// Get a clone of the value under `key`, if present and of type `T`.
    pub fn get<T: Any + Clone>(&self, key: &str) -> Option<T> {
        read_lock(&self.values)
            .get(key)
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    /// Modify the value under `key` in place and notify observers.
    ///
    /// Returns false (and notifies nobody) if the key is missing or holds a
    /// different type. `f` runs under the container's write lock and must not
    /// touch this container.
    pub fn update<T: Any + Send + Sync>(&self, key: &str, f: impl FnOnce(&mut T)) -> bool {
        let updated = {
            let mut values = write_lock(&self.values);
            match values.get_mut(key).and_then(|v| v.downcast_mut::<T>()) {
                Some(value) => {
                    f(value);
                    true
                }
                None => false,
            }
        };
        if updated {
            self.did_change(key);
        }
        updated
    }

    pub fn contains(&self, key: &str) -> bool {
        read_lock(&self.values).contains_key(key)
    }

    /// All keys currently holding a value, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = read_lock(&self.values).keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Start reporting changes matching `selector` to `observer`.
    ///
    /// Registering the same observer twice for the same selector is a no-op.
    pub fn add_observer(&self, selector: KeySelector, observer: Weak<dyn PropertyObserver>) {
        let mut observers = write_lock(&self.observers);
        let exists = observers
            .iter()
            .any(|e| e.selector == selector && Weak::ptr_eq(&e.observer, &observer));
        if !exists {
            observers.push(ObserverEntry { selector, observer });
        }
    }

    /// Stop reporting changes matching `selector` to `observer`.
    pub fn remove_observer(&self, selector: &KeySelector, observer: &Weak<dyn PropertyObserver>) {
        write_lock(&self.observers)
            .retain(|e| !(e.selector == *selector && Weak::ptr_eq(&e.observer, observer)));
    }

    /// Number of registered observations, dead ones included until pruned.
    pub fn observer_count(&self) -> usize {
        read_lock(&self.observers).len()
    }

    /// Notify observers of `key` without changing any value.
    ///
    /// An observer registered under several matching selectors is still
    /// called once.
    pub fn did_change(&self, key: &str) {
        let live: Vec<Arc<dyn PropertyObserver>> = {
            let mut observers = write_lock(&self.observers);
            observers.retain(|e| e.observer.strong_count() > 0);
            let mut live: Vec<Arc<dyn PropertyObserver>> = Vec::new();
            for entry in observers.iter().filter(|e| e.selector.matches(key)) {
                if let Some(observer) = entry.observer.upgrade() {
                    if !live.iter().any(|o| Arc::ptr_eq(o, &observer)) {
                        live.push(observer);
                    }
                }
            }
            live
        };

        for observer in &live {
            observer.property_changed(self.id, key);
        }
    }
}

impl Default for Properties {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Properties {
    fn drop(&mut self) {
        let observers = match self.observers.get_mut() {
            Ok(observers) => std::mem::take(observers),
            Err(poisoned) => std::mem::take(poisoned.into_inner()),
        };

        let mut notified: Vec<Arc<dyn PropertyObserver>> = Vec::new();
        for entry in observers {
            if let Some(observer) = entry.observer.upgrade() {
                // One release notice per observer, however many keys it watched.
                if !notified.iter().any(|o| Arc::ptr_eq(o, &observer)) {
                    notified.push(observer);
                }
            }
        }
        for observer in notified {
            observer.object_released(self.id);
        }
    }
}

impl fmt::Debug for Properties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Properties")
            .field("id", &self.id)
            .field("keys", &self.keys())
            .field("observer_count", &self.observer_count())
            .finish()
    }
}
