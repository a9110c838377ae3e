use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::model::snapshot::Snapshot;

pub type ObserverFn = Arc<dyn Fn(&Snapshot) + Send + Sync>;

/// Registered snapshot observers, in registration order.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Mutex<Vec<(u64, ObserverFn)>>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: ObserverFn) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.lock().push((id, observer));
        debug!(observer = id, "observer registered");
        id
    }

    pub fn unregister(&self, id: u64) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        let removed = observers.len() != before;
        if removed {
            debug!(observer = id, "observer removed");
        }
        removed
    }

    /// Copy of the current list. Delivery iterates the copy, so observers
    /// added or removed mid-delivery never disturb the others.
    pub fn listeners(&self) -> Vec<ObserverFn> {
        self.observers
            .lock()
            .iter()
            .map(|(_, f)| f.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Returned by `Supervisor::observe`. Dropping it does *not* unregister;
/// call [`Observation::cancel`].
#[derive(Clone)]
pub struct Observation {
    id: u64,
    registry: Weak<ObserverRegistry>,
}

impl Observation {
    pub(crate) fn new(id: u64, registry: &Arc<ObserverRegistry>) -> Self {
        Self {
            id,
            registry: Arc::downgrade(registry),
        }
    }

    /// Stop receiving snapshots. Safe to call repeatedly, from inside a
    /// callback, or after the supervisor is gone.
    pub fn cancel(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.id);
        }
    }
}
