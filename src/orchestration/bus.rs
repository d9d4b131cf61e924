//! Typed event dispatcher.
//!
//! # Responsibilities
//! - Keep an ordered list of subscribers per event kind
//! - Invoke matching subscribers synchronously, in registration order
//! - Report subscriber failures without stopping delivery
//!
//! # Design Decisions
//! - Subscribers are plain callbacks returning a `Result`; nothing is
//!   discovered by reflection
//! - The subscriber list is cloned out of the lock before calling, so a
//!   subscriber may subscribe or unsubscribe without deadlocking

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::OrchestrationResult;
use crate::observability::metrics;
use crate::orchestration::event::{ChangeEvent, EventKind};

/// Event callback.
pub type Subscriber = Arc<dyn Fn(&ChangeEvent) -> OrchestrationResult<()> + Send + Sync>;

/// Handle returned by `subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Result of one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    pub delivered: usize,
    pub failed: usize,
}

impl PublishOutcome {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<(SubscriptionId, EventKind, Subscriber)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kind: EventKind, subscriber: Subscriber) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push((id, kind, subscriber));
        id
    }

    /// Register one callback for every kind.
    pub fn subscribe_all(&self, subscriber: Subscriber) -> Vec<SubscriptionId> {
        EventKind::ALL
            .iter()
            .map(|kind| self.subscribe(*kind, subscriber.clone()))
            .collect()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sid, _, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers
            .read()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .count()
    }

    /// Deliver `event` to every subscriber of its kind.
    pub fn publish(&self, event: &ChangeEvent) -> PublishOutcome {
        let kind = event.kind();
        let targets: Vec<Subscriber> = self
            .subscribers
            .read()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, s)| s.clone())
            .collect();

        let mut outcome = PublishOutcome::default();
        for subscriber in targets {
            match subscriber(event) {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    outcome.failed += 1;
                    tracing::error!(
                        schema = %event.schema(),
                        kind = %kind,
                        error = %e,
                        "Change event rejected by subscriber"
                    );
                }
            }
        }

        metrics::record_event(kind.as_str(), if outcome.is_success() { "applied" } else { "failed" });
        outcome
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscribers.read().len())
            .finish()
    }
}
