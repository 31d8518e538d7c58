use contentrepo_core::{DomainError, DomainResult, SubscriptionGroup, SubscriptionId};
use contentrepo_events::{RunMode, SubscriptionHandler};

/// A registered consumer of the event stream.
pub struct Subscriber {
    pub id: SubscriptionId,
    pub group: SubscriptionGroup,
    pub run_mode: RunMode,
    pub handler: Box<dyn SubscriptionHandler>,
}

impl Subscriber {
    pub fn new(
        id: SubscriptionId,
        group: SubscriptionGroup,
        run_mode: RunMode,
        handler: impl SubscriptionHandler + 'static,
    ) -> Self {
        Self {
            id,
            group,
            run_mode,
            handler: Box::new(handler),
        }
    }
}

impl core::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("group", &self.group)
            .field("run_mode", &self.run_mode)
            .finish_non_exhaustive()
    }
}

/// The registry of subscribers, in registration order.
///
/// Registration order is dispatch order: within a batch every event is handed
/// to subscribers in this order.
#[derive(Debug, Default)]
pub struct Subscribers {
    subscribers: Vec<Subscriber>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `subscriber`; ids must be unique.
    pub fn with(mut self, subscriber: Subscriber) -> DomainResult<Self> {
        if self.contain(&subscriber.id) {
            return Err(DomainError::conflict(format!(
                "subscriber '{}' is already registered",
                subscriber.id
            )));
        }
        self.subscribers.push(subscriber);
        Ok(self)
    }

    pub fn get(&self, id: &SubscriptionId) -> Option<&Subscriber> {
        self.subscribers.iter().find(|s| &s.id == id)
    }

    pub fn contain(&self, id: &SubscriptionId) -> bool {
        self.get(id).is_some()
    }

    /// Registration index of `id`.
    pub fn position(&self, id: &SubscriptionId) -> Option<usize> {
        self.subscribers.iter().position(|s| &s.id == id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Subscriber> {
        self.subscribers.iter()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl<'a> IntoIterator for &'a Subscribers {
    type Item = &'a Subscriber;
    type IntoIter = std::slice::Iter<'a, Subscriber>;

    fn into_iter(self) -> Self::IntoIter {
        self.subscribers.iter()
    }
}
