//! Non-owning handles to subscribers and targets.
//!
//! Identity is the address of the `Arc` allocation. The stored `Weak` keeps
//! that allocation reserved (though not the value alive), so the address can
//! not be handed to another object while the handle exists.

use std::any::Any;
use std::sync::{Arc, Weak};

pub(crate) type AnyArc = Arc<dyn Any + Send + Sync>;
type AnyWeak = Weak<dyn Any + Send + Sync>;

/// Identity of an `Arc` allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct HandleId(usize);

impl HandleId {
    pub(crate) fn of<T: ?Sized>(arc: &Arc<T>) -> Self {
        HandleId(Arc::as_ptr(arc) as *const () as usize)
    }
}

/// Weak, type-erased reference to any shared object.
#[derive(Clone)]
pub(crate) struct WeakHandle {
    id: HandleId,
    weak: AnyWeak,
}

impl WeakHandle {
    pub(crate) fn new<T: Any + Send + Sync>(arc: &Arc<T>) -> Self {
        let erased: AnyArc = arc.clone();
        Self {
            id: HandleId::of(arc),
            weak: Arc::downgrade(&erased),
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> HandleId {
        self.id
    }

    #[inline]
    pub(crate) fn is_alive(&self) -> bool {
        self.weak.strong_count() > 0
    }

    pub(crate) fn upgrade(&self) -> Option<AnyArc> {
        self.weak.upgrade()
    }
}

impl std::fmt::Debug for WeakHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakHandle")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}
