//! In-process fan-out of received events.
//!
//! Subscribers run one after another in registration order. A subscriber
//! that returns an error or panics is logged and recorded in the outcome; the
//! remaining subscribers still see the event.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use chronicle_core::error::DomainError;
use chronicle_core::event::{DomainEvent, EventKind, EventMetadata};
use chronicle_core::registry::RegisteredEventType;
use chronicle_core::store::StoredEvent;

/// An event taken off the broker and resolved through the registry.
#[derive(Clone)]
pub struct ReceivedEvent {
    stored: StoredEvent,
    registered: RegisteredEventType,
    payload: Arc<dyn Any + Send + Sync>,
}

impl std::fmt::Debug for ReceivedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceivedEvent")
            .field("stored", &self.stored)
            .field("registered", &self.registered)
            .finish_non_exhaustive()
    }
}

impl ReceivedEvent {
    pub(crate) fn new(
        stored: StoredEvent,
        registered: RegisteredEventType,
        payload: Arc<dyn Any + Send + Sync>,
    ) -> Self {
        Self {
            stored,
            registered,
            payload,
        }
    }

    /// The event as it was stored and published.
    #[must_use]
    pub fn stored(&self) -> &StoredEvent {
        &self.stored
    }

    /// The registry entry the event resolved to.
    #[must_use]
    pub fn registered(&self) -> RegisteredEventType {
        self.registered
    }

    /// The logical event name.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.stored.event_type
    }

    /// The decoded payload, if it belongs to the event kind `K`.
    #[must_use]
    pub fn kind<K: EventKind>(&self) -> Option<&K> {
        self.payload.downcast_ref::<K>()
    }

    /// Rebuilds the typed domain event, if it belongs to the event kind `K`.
    #[must_use]
    pub fn to_domain_event<K: EventKind>(&self) -> Option<DomainEvent<K>> {
        self.kind::<K>().map(|kind| DomainEvent {
            metadata: EventMetadata::from_stored(&self.stored),
            kind: kind.clone(),
        })
    }
}

/// An in-process consumer of broker events, such as a projection or the
/// local event log.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Returns `true` if this subscriber wants events of `event_type`.
    /// Subscribers see every event by default.
    fn interested_in(&self, _event_type: &str) -> bool {
        true
    }

    /// Handles one event. Must be idempotent: delivery is at-least-once.
    async fn handle(&self, event: &ReceivedEvent) -> Result<(), DomainError>;
}

/// A subscriber that failed on one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberFailure {
    /// The subscriber's name.
    pub subscriber: String,
    /// What went wrong.
    pub reason: String,
}

/// Result of fanning one event out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Subscribers that handled the event successfully.
    pub delivered: usize,
    /// Subscribers that failed.
    pub failures: Vec<SubscriberFailure>,
}

impl DispatchOutcome {
    /// Returns `true` if no subscriber failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Ordered list of in-process subscribers.
#[derive(Default, Clone)]
pub struct EventDispatcher {
    subscribers: Vec<Arc<dyn EventSubscriber>>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.subscribers.iter().map(|s| s.name()).collect();
        f.debug_struct("EventDispatcher").field("subscribers", &names).finish()
    }
}

impl EventDispatcher {
    /// Creates a dispatcher with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a subscriber; it runs after every subscriber added before it.
    #[must_use]
    pub fn with_subscriber(mut self, subscriber: Arc<dyn EventSubscriber>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    /// Appends a subscriber.
    pub fn subscribe(&mut self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers.push(subscriber);
    }

    /// Number of subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Returns `true` if there are no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Delivers `event` to every interested subscriber in order.
    pub async fn dispatch(&self, event: &ReceivedEvent) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        for subscriber in &self.subscribers {
            if !subscriber.interested_in(event.event_type()) {
                continue;
            }
            let result = AssertUnwindSafe(subscriber.handle(event)).catch_unwind().await;
            let reason = match result {
                Ok(Ok(())) => {
                    outcome.delivered += 1;
                    continue;
                }
                Ok(Err(err)) => err.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };
            tracing::warn!(
                subscriber = subscriber.name(),
                event_id = %event.stored().event_id,
                event_type = event.event_type(),
                %reason,
                "subscriber failed"
            );
            outcome.failures.push(SubscriberFailure {
                subscriber: subscriber.name().to_owned(),
                reason,
            });
        }
        outcome
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::envelope::Envelope;
    use crate::fixtures::{BeaconKind, ping, registry};

    struct Recorder {
        name: &'static str,
        seen: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    #[async_trait]
    impl EventSubscriber for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn handle(&self, _event: &ReceivedEvent) -> Result<(), DomainError> {
            self.seen.lock().unwrap().push(self.name);
            if self.fail {
                return Err(DomainError::Infrastructure("projection offline".into()));
            }
            Ok(())
        }
    }

    struct Panicker;

    #[async_trait]
    impl EventSubscriber for Panicker {
        fn name(&self) -> &str {
            "panicker"
        }

        async fn handle(&self, _event: &ReceivedEvent) -> Result<(), DomainError> {
            panic!("boom");
        }
    }

    struct OnlySilenced;

    #[async_trait]
    impl EventSubscriber for OnlySilenced {
        fn name(&self) -> &str {
            "only-silenced"
        }

        fn interested_in(&self, event_type: &str) -> bool {
            event_type == "beacon.silenced"
        }

        async fn handle(&self, _event: &ReceivedEvent) -> Result<(), DomainError> {
            panic!("must not be called for pings");
        }
    }

    fn received() -> ReceivedEvent {
        Envelope::encode(&ping(1)).unwrap().decode(&registry()).unwrap()
    }

    #[tokio::test]
    async fn test_subscribers_run_in_registration_order_despite_failures() {
        // Arrange
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = EventDispatcher::new()
            .with_subscriber(Arc::new(Recorder {
                name: "first",
                seen: seen.clone(),
                fail: true,
            }))
            .with_subscriber(Arc::new(Panicker))
            .with_subscriber(Arc::new(Recorder {
                name: "third",
                seen: seen.clone(),
                fail: false,
            }));

        // Act
        let outcome = dispatcher.dispatch(&received()).await;

        // Assert
        assert_eq!(*seen.lock().unwrap(), vec!["first", "third"]);
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(outcome.failures[0].subscriber, "first");
        assert_eq!(outcome.failures[1].subscriber, "panicker");
        assert_eq!(outcome.failures[1].reason, "panicked: boom");
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_uninterested_subscriber_is_skipped() {
        let dispatcher = EventDispatcher::new().with_subscriber(Arc::new(OnlySilenced));

        let outcome = dispatcher.dispatch(&received()).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.delivered, 0);
    }

    #[test]
    fn test_received_event_downcasts_to_its_kind() {
        let event = received();

        let typed = event.to_domain_event::<BeaconKind>().unwrap();

        assert_eq!(typed.metadata.event_id, event.stored().event_id);
        assert!(matches!(typed.kind, BeaconKind::Pinged(_)));
    }
}
