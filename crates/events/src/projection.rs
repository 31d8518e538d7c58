use anyhow::Context;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::trace;

use crate::{EventEnvelope, Subscription, SubscriptionHandler};

/// A projection builds a read model from the shared event stream.
///
/// Projections are pure event consumers; persistence of the read model is up to
/// the implementation. `apply` must be idempotent: after a crash the engine may
/// deliver the last event again.
pub trait Projection: Send + Sync {
    type Ev: DeserializeOwned;

    /// Whether events of `event_type` are relevant to this projection.
    fn handles(&self, event_type: &str) -> bool;

    /// Prepare the read model's storage.
    fn setup(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn apply(&self, envelope: &EventEnvelope<Self::Ev>) -> anyhow::Result<()>;
}

impl<P> Projection for std::sync::Arc<P>
where
    P: Projection + ?Sized,
{
    type Ev = P::Ev;

    fn handles(&self, event_type: &str) -> bool {
        (**self).handles(event_type)
    }

    fn setup(&self) -> anyhow::Result<()> {
        (**self).setup()
    }

    fn apply(&self, envelope: &EventEnvelope<Self::Ev>) -> anyhow::Result<()> {
        (**self).apply(envelope)
    }
}

/// Runs a typed [`Projection`] as a subscription handler.
///
/// Irrelevant event types are acknowledged without deserializing them.
#[derive(Debug)]
pub struct ProjectionHandler<P> {
    projection: P,
}

impl<P> ProjectionHandler<P>
where
    P: Projection,
{
    pub fn new(projection: P) -> Self {
        Self { projection }
    }

    pub fn projection(&self) -> &P {
        &self.projection
    }

    pub fn into_projection(self) -> P {
        self.projection
    }
}

impl<P> SubscriptionHandler for ProjectionHandler<P>
where
    P: Projection,
{
    fn setup(&self) -> anyhow::Result<()> {
        self.projection.setup()
    }

    fn handle(
        &self,
        envelope: &EventEnvelope<JsonValue>,
        subscription: &Subscription,
    ) -> anyhow::Result<()> {
        if !self.projection.handles(envelope.event_type()) {
            trace!(
                subscription_id = %subscription.id,
                event_type = envelope.event_type(),
                "event not handled by projection"
            );
            return Ok(());
        }

        let payload: P::Ev = serde_json::from_value(envelope.payload().clone()).with_context(|| {
            format!(
                "failed to deserialize '{}' at sequence number {}",
                envelope.event_type(),
                envelope.sequence_number()
            )
        })?;
        self.projection.apply(&envelope.with_payload(payload))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Utc;
    use serde::Deserialize;
    use uuid::Uuid;

    use contentrepo_core::{SubscriptionGroup, SubscriptionId};

    use super::*;
    use crate::{RunMode, SequenceNumber};

    #[derive(Debug, Deserialize)]
    struct Renamed {
        name: String,
    }

    #[derive(Default)]
    struct Names(Mutex<Vec<String>>);

    impl Projection for Names {
        type Ev = Renamed;

        fn handles(&self, event_type: &str) -> bool {
            event_type == "Renamed"
        }

        fn apply(&self, envelope: &EventEnvelope<Renamed>) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(envelope.payload().name.clone());
            Ok(())
        }
    }

    fn envelope(event_type: &str, payload: JsonValue) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            "stream",
            1,
            SequenceNumber::new(1),
            event_type,
            Utc::now(),
            payload,
        )
    }

    fn subscription() -> Subscription {
        Subscription::create(
            SubscriptionId::new("names").unwrap(),
            SubscriptionGroup::new("default").unwrap(),
            RunMode::Continuous,
        )
    }

    #[test]
    fn filters_and_deserializes() {
        let handler = ProjectionHandler::new(Names::default());
        handler
            .handle(&envelope("Renamed", serde_json::json!({"name": "home"})), &subscription())
            .unwrap();
        handler
            .handle(&envelope("Moved", serde_json::json!({"to": "x"})), &subscription())
            .unwrap();

        assert_eq!(*handler.projection().0.lock().unwrap(), vec!["home".to_string()]);
    }

    #[test]
    fn malformed_payloads_fail_with_context() {
        let handler = ProjectionHandler::new(Names::default());
        let err = handler
            .handle(&envelope("Renamed", serde_json::json!({"title": 1})), &subscription())
            .unwrap_err();
        assert!(err.to_string().contains("failed to deserialize 'Renamed'"));
    }
}
