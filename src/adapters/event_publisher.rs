//! Event Publisher Adapters
//!
//! Implements the `EventPublisher` port with logging, in-memory and fan-out
//! backends.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::domain::events::TelemetryEvent;
use crate::domain::ports::EventPublisher;
use crate::error::Result;

/// Publishes telemetry events to the tracing subscriber.
#[derive(Debug, Clone, Default)]
pub struct LoggingEventPublisher {
    /// Whether to log events at info level (true) or debug level (false)
    info_level: bool,
}

impl LoggingEventPublisher {
    /// Create a publisher that logs at debug level.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a publisher that logs at info level.
    pub fn info_level() -> Self {
        Self { info_level: true }
    }
}

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: TelemetryEvent) -> Result<()> {
        let event_type = event.event_type();
        let json = serde_json::to_string(&event).unwrap_or_else(|_| format!("{:?}", event));

        if self.info_level {
            info!(event_type = %event_type, req_id = %event.req_id(), event = %json, "Telemetry");
        } else {
            debug!(event_type = %event_type, req_id = %event.req_id(), event = %json, "Telemetry");
        }

        Ok(())
    }

    async fn publish_all(&self, events: Vec<TelemetryEvent>) -> Result<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }
}

/// Collects events in memory for later inspection.
#[derive(Debug, Default)]
pub struct InMemoryEventCollector {
    events: parking_lot::RwLock<Vec<TelemetryEvent>>,
}

impl InMemoryEventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected events.
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Get events of a specific type.
    pub fn events_of_type(&self, event_type: &str) -> Vec<TelemetryEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    /// Get events belonging to one request id.
    pub fn events_for(&self, req_id: &str) -> Vec<TelemetryEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.req_id() == req_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventCollector {
    async fn publish(&self, event: TelemetryEvent) -> Result<()> {
        self.events.write().push(event);
        Ok(())
    }

    async fn publish_all(&self, events: Vec<TelemetryEvent>) -> Result<()> {
        self.events.write().extend(events);
        Ok(())
    }
}

/// Fans events out to several publishers.
///
/// A failing publisher is logged and skipped; the rest still receive the
/// event.
#[derive(Default)]
pub struct CompositeEventPublisher {
    publishers: Vec<Box<dyn EventPublisher>>,
}

impl CompositeEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a publisher to the composite.
    pub fn with_publisher<P: EventPublisher + 'static>(mut self, publisher: P) -> Self {
        self.publishers.push(Box::new(publisher));
        self
    }

    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }
}

impl std::fmt::Debug for CompositeEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeEventPublisher")
            .field("publisher_count", &self.publishers.len())
            .finish()
    }
}

#[async_trait]
impl EventPublisher for CompositeEventPublisher {
    async fn publish(&self, event: TelemetryEvent) -> Result<()> {
        for publisher in &self.publishers {
            if let Err(e) = publisher.publish(event.clone()).await {
                warn!(event_type = event.event_type(), error = %e, "Publisher rejected event");
            }
        }
        Ok(())
    }

    async fn publish_all(&self, events: Vec<TelemetryEvent>) -> Result<()> {
        for publisher in &self.publishers {
            if let Err(e) = publisher.publish_all(events.clone()).await {
                warn!(count = events.len(), error = %e, "Publisher rejected events");
            }
        }
        Ok(())
    }
}
