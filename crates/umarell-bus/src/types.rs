//! Core types for umarell-bus

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::BusError;

/// Opaque value delivered to channel subscribers.
///
/// Cloning is cheap (shared `Arc`); every subscriber of one publish sees the
/// same allocation.
#[derive(Clone)]
pub struct Message(Arc<dyn Any + Send + Sync>);

impl Message {
    pub fn new<V: Any + Send + Sync>(value: V) -> Self {
        Self(Arc::new(value))
    }

    /// Borrow the payload if it is a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }

    /// True if both messages share the same payload allocation.
    pub fn ptr_eq(&self, other: &Message) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Payloads are opaque; show the common textual ones.
        if let Some(s) = self.downcast_ref::<String>() {
            f.debug_tuple("Message").field(s).finish()
        } else if let Some(s) = self.downcast_ref::<&'static str>() {
            f.debug_tuple("Message").field(s).finish()
        } else {
            f.debug_tuple("Message").finish_non_exhaustive()
        }
    }
}

/// What happens to a message after it has been delivered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum PublishOption {
    /// Deliver and forget. A message retained earlier stays retained.
    #[default]
    None,
    /// Deliver, then keep the message in memory as the channel's last
    /// published value (see `EventBus::last_published`).
    KeepInMemory,
}

/// Options applied when a channel subscription is registered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum SubscribeOption {
    /// Only messages published after the subscription are delivered.
    #[default]
    None,
    /// Deliver the channel's retained message right away, if there is one.
    ReadPrevious,
}

/// Process-unique identity of an observable container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object#{}", self.0)
    }
}

/// Which keys of a target a subscription or observer cares about.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum KeySelector {
    /// A single property key.
    Key(String),
    /// Every key of the target.
    All,
}

impl KeySelector {
    pub fn key(key: &str) -> Result<Self, BusError> {
        if key.is_empty() {
            return Err(BusError::EmptyPropertyKey);
        }
        Ok(KeySelector::Key(key.to_string()))
    }

    /// Does a change of `key` concern this selector?
    #[inline]
    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeySelector::Key(k) => k == key,
            KeySelector::All => true,
        }
    }
}

impl fmt::Display for KeySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySelector::Key(k) => write!(f, "{}", k),
            KeySelector::All => write!(f, "*"),
        }
    }
}

pub(crate) fn validate_channel(name: &str) -> Result<(), BusError> {
    if name.is_empty() {
        Err(BusError::EmptyChannelName)
    } else {
        Ok(())
    }
}
