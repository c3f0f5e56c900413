//! Notification of committed modifications.

use chrono::{DateTime, Utc};
use secmaster_core::{ObjectId, UniqueId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    Added,
    /// A new version or a new correction.
    Changed,
    Removed,
}

/// Published once per committed modification, never for a rolled-back one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub change_type: ChangeType,
    pub object_id: ObjectId,
    /// Row that was current before the change, if any.
    pub before: Option<UniqueId>,
    /// Row that is current after the change, if any.
    pub after: Option<UniqueId>,
    pub version_from: DateTime<Utc>,
    pub version_to: Option<DateTime<Utc>>,
    /// Instant the modification was stamped with.
    pub instant: DateTime<Utc>,
}

pub trait ChangeListener: Send + Sync {
    fn entity_changed(&self, event: &ChangeEvent);
}

impl<F> ChangeListener for F
where
    F: Fn(&ChangeEvent) + Send + Sync,
{
    fn entity_changed(&self, event: &ChangeEvent) {
        self(event);
    }
}

/// Fan-out of change events to registered listeners, in registration order.
#[derive(Default)]
pub struct ChangeManager {
    listeners: RwLock<Vec<Arc<dyn ChangeListener>>>,
}

impl ChangeManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn ChangeListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Removes a listener previously passed to [`add_listener`](Self::add_listener).
    /// Returns `false` if it was not registered.
    pub fn remove_listener(&self, listener: &Arc<dyn ChangeListener>) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|registered| !Arc::ptr_eq(registered, listener));
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn publish(&self, event: &ChangeEvent) {
        log::debug!(
            "publishing {:?} for {} to {} listener(s)",
            event.change_type,
            event.object_id,
            self.listener_count()
        );
        // snapshot so listeners may register others without deadlocking
        let listeners: Vec<_> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener.entity_changed(event);
        }
    }
}

impl fmt::Debug for ChangeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeManager")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
