//! Event broadcaster: fans engine events out to a changing set of
//! subscribers.
//!
//! RULES:
//!   - Delivery is synchronous and in registration order.
//!   - publish() works on a copy of the subscriber list, so subscribe and
//!     unsubscribe never wait on a delivery in flight.
//!   - A callback that errors or panics is removed on the spot. Ids are
//!     never reused, so a removed subscriber cannot reappear.
//!   - Callbacks must not block. Anything slow belongs behind a bounded
//!     queue owned by the subscriber; a full queue is a failed delivery.

use crate::{
    error::DeliveryError,
    event::{EventKind, GridEvent},
};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub type DeliveryResult = Result<(), DeliveryError>;

type Callback = Arc<dyn Fn(&GridEvent) -> DeliveryResult + Send + Sync>;

/// Opaque handle returned by subscribe().
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

struct Registration {
    id:       SubscriberId,
    kind:     EventKind,
    callback: Callback,
}

/// Outcome of one publish() call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped:   Vec<SubscriberId>,
}

#[derive(Default)]
pub struct EventBroadcaster {
    next_id:     AtomicU64,
    subscribers: Mutex<Vec<Registration>>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriberId
    where
        F: Fn(&GridEvent) -> DeliveryResult + Send + Sync + 'static,
    {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.registry().push(Registration { id, kind, callback: Arc::new(callback) });
        log::debug!("subscriber {id:?} registered for {}", kind.name());
        id
    }

    /// Like subscribe(), but the registration is released when the
    /// returned guard is dropped.
    pub fn subscribe_guarded<F>(self: &Arc<Self>, kind: EventKind, callback: F) -> Subscription
    where
        F: Fn(&GridEvent) -> DeliveryResult + Send + Sync + 'static,
    {
        let id = self.subscribe(kind, callback);
        Subscription { broadcaster: Arc::clone(self), id }
    }

    /// Returns false if the id was not registered (already removed).
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subs = self.registry();
        let before = subs.len();
        subs.retain(|r| r.id != id);
        let removed = subs.len() != before;
        if removed {
            log::debug!("subscriber {id:?} unsubscribed");
        }
        removed
    }

    pub fn publish(&self, event: &GridEvent) -> PublishReport {
        let kind = event.kind();
        let targets: Vec<(SubscriberId, Callback)> = self
            .registry()
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| (r.id, Arc::clone(&r.callback)))
            .collect();

        let mut report = PublishReport::default();
        for (id, callback) in targets {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    log::warn!("dropping subscriber {id:?} on {}: {e}", kind.name());
                    report.dropped.push(id);
                }
                Err(_) => {
                    log::warn!("dropping subscriber {id:?} on {}: callback panicked", kind.name());
                    report.dropped.push(id);
                }
            }
        }

        if !report.dropped.is_empty() {
            self.registry().retain(|r| !report.dropped.contains(&r.id));
        }
        report
    }

    /// Drop every registration. Subscribers holding a queue see it close,
    /// which ends their streams. Used on shutdown.
    pub fn close(&self) -> usize {
        let dropped: Vec<Registration> = self.registry().drain(..).collect();
        log::info!("broadcaster closed, {} subscribers released", dropped.len());
        dropped.len()
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.registry().iter().filter(|r| r.kind == kind).count()
    }

    pub fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.registry().iter().any(|r| r.id == id)
    }

    // A panicking callback runs outside the lock, so poisoning can only
    // come from a bug in this file; the Vec is still consistent.
    fn registry(&self) -> MutexGuard<'_, Vec<Registration>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drop guard for a registration.
pub struct Subscription {
    broadcaster: Arc<EventBroadcaster>,
    id:          SubscriberId,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(self.id);
    }
}
