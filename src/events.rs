//! Outbound domain events.
//!
//! Events are always traced. When a NATS client is configured they are also
//! published as JSON on `commerce.events.<kind>`; publish failures are logged
//! and never fail the operation that raised the event.

use crate::domain::events::DomainEvent;

const SUBJECT_PREFIX: &str = "commerce.events";

#[derive(Clone, Debug, Default)]
pub struct EventBus {
    nats: Option<async_nats::Client>,
}

impl EventBus {
    pub fn new(nats: Option<async_nats::Client>) -> Self { Self { nats } }

    pub fn disabled() -> Self { Self::default() }

    pub async fn connect(url: Option<&str>) -> Self {
        let Some(url) = url else { return Self::disabled() };
        match async_nats::connect(url).await {
            Ok(client) => {
                tracing::info!(%url, "connected to NATS");
                Self::new(Some(client))
            }
            Err(e) => {
                tracing::warn!(%url, error = %e, "NATS unavailable, events will only be traced");
                Self::disabled()
            }
        }
    }

    pub async fn publish(&self, event: DomainEvent) {
        tracing::debug!(kind = event.kind(), ?event, "domain event");
        let Some(client) = &self.nats else { return };

        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(kind = event.kind(), error = %e, "could not encode domain event");
                return;
            }
        };
        let subject = format!("{SUBJECT_PREFIX}.{}", event.kind());
        if let Err(e) = client.publish(subject, payload.into()).await {
            tracing::warn!(kind = event.kind(), error = %e, "could not publish domain event");
        }
    }
}
