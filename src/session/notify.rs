//! Notification hub - fans state changes out to external subscribers
//!
//! Callbacks run outside the registry lock, so a callback may subscribe or
//! unsubscribe (itself included) without deadlocking.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use super::state::{SessionStatus, TranscriptEntry, VisualIndicator};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// Callback registry for one kind of notification
pub struct Subscribers<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl<T: 'static> Subscribers<T> {
    /// Register a callback
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let mut registry = lock(&self.registry);
        registry.next_id += 1;
        let id = registry.next_id;
        registry.entries.push((id, Arc::new(callback)));
        drop(registry);

        let weak: Weak<dyn Detach> = Arc::downgrade(&self.registry) as Weak<dyn Detach>;
        Subscription {
            id,
            registry: Some(weak),
        }
    }

    /// Number of registered callbacks
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.registry).entries.len()
    }

    /// Check whether nobody is listening
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every callback registered at the time of the call
    pub fn broadcast(&self, value: &T) {
        let snapshot: Vec<(u64, Callback<T>)> = lock(&self.registry).entries.clone();

        for (id, callback) in snapshot {
            // Skip callbacks removed by an earlier callback in this round
            let still_registered = lock(&self.registry).entries.iter().any(|(e, _)| *e == id);
            if !still_registered {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
                tracing::error!(subscription = id, "subscriber callback panicked");
            }
        }
    }
}

trait Detach: Send + Sync {
    fn detach(&self, id: u64);
}

impl<T: 'static> Detach for Mutex<Registry<T>> {
    fn detach(&self, id: u64) {
        lock(self).entries.retain(|(e, _)| *e != id);
    }
}

/// Token returned by every `on_*` registration
///
/// Call [`Subscription::unsubscribe`] to stop receiving notifications.
/// Dropping the token leaves the callback registered.
pub struct Subscription {
    id: u64,
    registry: Option<Weak<dyn Detach>>,
}

impl Subscription {
    /// Remove the callback; calling this more than once is harmless
    pub fn unsubscribe(&mut self) {
        if let Some(registry) = self.registry.take().and_then(|w| w.upgrade()) {
            registry.detach(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.registry.is_some())
            .finish()
    }
}

/// All subscriber registries of a session
#[derive(Default)]
pub struct NotificationHub {
    status: Subscribers<SessionStatus>,
    indicator: Subscribers<VisualIndicator>,
    transcript: Subscribers<TranscriptEntry>,
    last_status: Mutex<Option<SessionStatus>>,
}

impl NotificationHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_status_change(
        &self,
        callback: impl Fn(&SessionStatus) + Send + Sync + 'static,
    ) -> Subscription {
        self.status.subscribe(callback)
    }

    pub fn on_visual_indicator_change(
        &self,
        callback: impl Fn(&VisualIndicator) + Send + Sync + 'static,
    ) -> Subscription {
        self.indicator.subscribe(callback)
    }

    pub fn on_transcript(
        &self,
        callback: impl Fn(&TranscriptEntry) + Send + Sync + 'static,
    ) -> Subscription {
        self.transcript.subscribe(callback)
    }

    /// Broadcast a status if it differs from the last one sent
    ///
    /// Returns whether subscribers were called.
    pub fn publish_status(&self, status: &SessionStatus) -> bool {
        {
            let mut last = lock(&self.last_status);
            if last.as_ref() == Some(status) {
                return false;
            }
            *last = Some(status.clone());
        }
        tracing::debug!(%status, "session status changed");
        self.status.broadcast(status);
        true
    }

    /// Broadcast an indicator snapshot unconditionally
    pub fn publish_indicator(&self, indicator: &VisualIndicator) {
        self.indicator.broadcast(indicator);
    }

    pub fn publish_transcript(&self, entry: &TranscriptEntry) {
        self.transcript.broadcast(entry);
    }
}
