use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::{EventEnvelope, Subscription};

/// The capability the subscription engine dispatches events to.
///
/// Handlers must tolerate re-delivery of an event: a crash between a successful
/// `handle` and the position update replays that event on the next run.
pub trait SubscriptionHandler: Send + Sync {
    /// Prepare the handler's storage. Runs once when a new subscription is booted.
    fn setup(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn handle(
        &self,
        envelope: &EventEnvelope<JsonValue>,
        subscription: &Subscription,
    ) -> anyhow::Result<()>;
}

impl<H> SubscriptionHandler for Arc<H>
where
    H: SubscriptionHandler + ?Sized,
{
    fn setup(&self) -> anyhow::Result<()> {
        (**self).setup()
    }

    fn handle(
        &self,
        envelope: &EventEnvelope<JsonValue>,
        subscription: &Subscription,
    ) -> anyhow::Result<()> {
        (**self).handle(envelope, subscription)
    }
}

impl<H> SubscriptionHandler for Box<H>
where
    H: SubscriptionHandler + ?Sized,
{
    fn setup(&self) -> anyhow::Result<()> {
        (**self).setup()
    }

    fn handle(
        &self,
        envelope: &EventEnvelope<JsonValue>,
        subscription: &Subscription,
    ) -> anyhow::Result<()> {
        (**self).handle(envelope, subscription)
    }
}

/// An ordered list of handlers behind one subscriber.
///
/// Handlers run in insertion order; the first failure stops the chain.
#[derive(Default)]
pub struct HandlerChain {
    handlers: Vec<Box<dyn SubscriptionHandler>>,
}

impl HandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: impl SubscriptionHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl core::fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandlerChain")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl SubscriptionHandler for HandlerChain {
    fn setup(&self) -> anyhow::Result<()> {
        self.handlers.iter().try_for_each(|h| h.setup())
    }

    fn handle(
        &self,
        envelope: &EventEnvelope<JsonValue>,
        subscription: &Subscription,
    ) -> anyhow::Result<()> {
        self.handlers
            .iter()
            .try_for_each(|h| h.handle(envelope, subscription))
    }
}

/// Adapts a closure into a [`SubscriptionHandler`].
pub struct FnHandler<F>(F);

impl<F> FnHandler<F>
where
    F: Fn(&EventEnvelope<JsonValue>, &Subscription) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> SubscriptionHandler for FnHandler<F>
where
    F: Fn(&EventEnvelope<JsonValue>, &Subscription) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(
        &self,
        envelope: &EventEnvelope<JsonValue>,
        subscription: &Subscription,
    ) -> anyhow::Result<()> {
        (self.0)(envelope, subscription)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Utc;
    use uuid::Uuid;

    use contentrepo_core::{SubscriptionGroup, SubscriptionId};

    use super::*;
    use crate::{RunMode, SequenceNumber};

    fn envelope(seq: u64) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            "stream",
            seq,
            SequenceNumber::new(seq),
            "SomethingHappened",
            Utc::now(),
            JsonValue::Null,
        )
    }

    fn subscription() -> Subscription {
        Subscription::create(
            SubscriptionId::new("chain").unwrap(),
            SubscriptionGroup::new("default").unwrap(),
            RunMode::Continuous,
        )
    }

    #[test]
    fn chain_runs_in_order_and_stops_at_the_first_failure() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = |name: &'static str| {
            let seen = seen.clone();
            FnHandler::new(move |_: &EventEnvelope<JsonValue>, _: &Subscription| {
                seen.lock().unwrap().push(name);
                Ok(())
            })
        };
        let chain = HandlerChain::new()
            .with(recorder("first"))
            .with(FnHandler::new(|_: &EventEnvelope<JsonValue>, _: &Subscription| {
                anyhow::bail!("second failed")
            }))
            .with(recorder("third"));

        let err = chain.handle(&envelope(1), &subscription()).unwrap_err();
        assert_eq!(err.to_string(), "second failed");
        assert_eq!(*seen.lock().unwrap(), vec!["first"]);
        assert_eq!(chain.len(), 3);
    }
}
