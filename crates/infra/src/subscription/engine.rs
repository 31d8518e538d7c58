//! The subscription engine: discovery, retry, locking and the replay loop.
//!
//! One batch runs synchronously. Events are read once, in ascending sequence
//! order, and handed to every locked subscriber in registration order. Each
//! subscriber's position is written right after its handler succeeded, so a
//! cancelled or failed batch never loses progress that was already made.

use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use contentrepo_core::SubscriptionId;
use contentrepo_events::{
    EventEnvelope, RunMode, SequenceNumber, Subscription, SubscriptionStatus, Subscriptions,
};

use crate::config::EngineConfig;
use crate::event_store::{EventStore, EventStoreError, ReadOptions, StreamSelector};

use super::criteria::{SubscriptionCriteria, SubscriptionEngineCriteria};
use super::retry::{NoRetryStrategy, RetryStrategy};
use super::store::{SubscriptionStore, SubscriptionStoreError};
use super::subscribers::{Subscriber, Subscribers};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to acquire lock for subscription '{subscription_id}' within {timeout:?}")]
    LockTimeout {
        subscription_id: SubscriptionId,
        timeout: Duration,
    },

    #[error(transparent)]
    SubscriptionStore(#[from] SubscriptionStoreError),

    #[error(transparent)]
    EventStore(#[from] EventStoreError),
}

/// A handler failure, isolated to one subscription.
#[derive(Debug, Error)]
#[error("subscription '{subscription_id}' failed: {message}")]
pub struct ProcessingError {
    pub subscription_id: SubscriptionId,
    pub message: String,
    pub cause: anyhow::Error,
}

/// Outcome of one `setup`/`run` batch.
#[derive(Debug, Default)]
pub struct ProcessedResult {
    /// Events read from the stream in this batch.
    pub processed_events: usize,
    /// `false` when the batch stopped at its message limit.
    pub finished: bool,
    pub errors: Vec<ProcessingError>,
}

impl ProcessedResult {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
enum Process {
    Setup,
    Run,
}

impl Process {
    fn as_str(self) -> &'static str {
        match self {
            Process::Setup => "setup",
            Process::Run => "run",
        }
    }

    fn statuses(self) -> &'static [SubscriptionStatus] {
        match self {
            Process::Setup => &[SubscriptionStatus::New, SubscriptionStatus::Booting],
            Process::Run => &[SubscriptionStatus::Active],
        }
    }
}

/// Releases every held subscription lock when dropped.
struct LockGuard<'a, S: SubscriptionStore> {
    store: &'a S,
    ids: Vec<SubscriptionId>,
}

impl<S: SubscriptionStore> Drop for LockGuard<'_, S> {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            if let Err(err) = self.store.release_lock(&id) {
                warn!(subscription_id = %id, error = %err, "failed to release subscription lock");
            }
        }
    }
}

pub struct SubscriptionEngine<E, S> {
    event_store: E,
    subscription_store: S,
    subscribers: Subscribers,
    retry_strategy: Box<dyn RetryStrategy>,
    config: EngineConfig,
}

impl<E, S> core::fmt::Debug for SubscriptionEngine<E, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SubscriptionEngine")
            .field("subscribers", &self.subscribers)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<E, S> SubscriptionEngine<E, S>
where
    E: EventStore,
    S: SubscriptionStore,
{
    pub fn new(event_store: E, subscription_store: S, subscribers: Subscribers) -> Self {
        Self {
            event_store,
            subscription_store,
            subscribers,
            retry_strategy: Box::new(NoRetryStrategy),
            config: EngineConfig::default(),
        }
    }

    pub fn with_retry_strategy(mut self, retry_strategy: impl RetryStrategy + 'static) -> Self {
        self.retry_strategy = Box::new(retry_strategy);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn subscribers(&self) -> &Subscribers {
        &self.subscribers
    }

    pub fn event_store(&self) -> &E {
        &self.event_store
    }

    pub fn subscription_store(&self) -> &S {
        &self.subscription_store
    }

    /// Boot new subscriptions and catch up booting ones.
    ///
    /// A `NEW` subscription runs its handler's setup hook and becomes `BOOTING`;
    /// once the stream is drained it becomes `ACTIVE` (`FINISHED` for `ONCE`).
    #[instrument(skip(self), fields(process = "setup"))]
    pub fn setup(
        &self,
        criteria: &SubscriptionEngineCriteria,
        limit: Option<usize>,
    ) -> Result<ProcessedResult, EngineError> {
        self.run_internal(criteria, Process::Setup, limit)
    }

    /// Feed new events to `ACTIVE` subscriptions.
    #[instrument(skip(self), fields(process = "run"))]
    pub fn run(
        &self,
        criteria: &SubscriptionEngineCriteria,
        limit: Option<usize>,
    ) -> Result<ProcessedResult, EngineError> {
        self.run_internal(criteria, Process::Run, limit)
    }

    /// `ACTIVE → PAUSED` for every matching subscription; returns the paused ones.
    #[instrument(skip(self))]
    pub fn pause(&self, criteria: &SubscriptionEngineCriteria) -> Result<Subscriptions, EngineError> {
        self.transition(criteria, SubscriptionStatus::Active, SubscriptionStatus::Paused)
    }

    /// `PAUSED → ACTIVE` for every matching subscription; returns the reactivated ones.
    #[instrument(skip(self))]
    pub fn reactivate(
        &self,
        criteria: &SubscriptionEngineCriteria,
    ) -> Result<Subscriptions, EngineError> {
        self.transition(criteria, SubscriptionStatus::Paused, SubscriptionStatus::Active)
    }

    /// Current state of the matching subscriptions, in any status.
    pub fn subscriptions(
        &self,
        criteria: &SubscriptionEngineCriteria,
    ) -> Result<Subscriptions, EngineError> {
        Ok(self.subscription_store.find_by_criteria(&SubscriptionCriteria {
            ids: criteria.ids.clone(),
            groups: criteria.groups.clone(),
            statuses: None,
        })?)
    }

    fn run_internal(
        &self,
        criteria: &SubscriptionEngineCriteria,
        process: Process,
        limit: Option<usize>,
    ) -> Result<ProcessedResult, EngineError> {
        let process_name = process.as_str();
        let limit = limit.or(self.config.batch_limit);
        info!(process = process_name, "subscription engine: start");

        self.discover_new_subscriptions()?;
        self.discover_detached_subscriptions(criteria)?;
        self.retry_subscriptions(criteria)?;

        let selection = criteria.with_statuses(process.statuses());
        let candidates = self.in_dispatch_order(self.subscription_store.find_by_criteria(&selection)?);
        if candidates.is_empty() {
            info!(process = process_name, "subscription engine: no subscriptions to process, finishing");
            return Ok(ProcessedResult {
                finished: true,
                ..ProcessedResult::default()
            });
        }

        let _locks = self.lock_all(candidates.iter().map(|(_, s)| &s.id))?;

        // Re-read under the locks: another engine may have moved them meanwhile.
        let locked = self.in_dispatch_order(self.subscription_store.find_by_criteria(
            &SubscriptionCriteria {
                ids: Some(candidates.iter().map(|(_, s)| s.id.clone()).collect()),
                groups: None,
                statuses: Some(process.statuses().to_vec()),
            },
        )?);

        let mut errors = Vec::new();
        let mut running = Vec::with_capacity(locked.len());
        for (subscriber, subscription) in locked {
            if subscription.status == SubscriptionStatus::New {
                if let Some(booted) = self.boot(process_name, subscriber, subscription, &mut errors)? {
                    running.push((subscriber, booted));
                }
            } else {
                running.push((subscriber, subscription));
            }
        }

        let start = running
            .iter()
            .map(|(_, s)| s.position)
            .min()
            .unwrap_or_default()
            .next();
        debug!(
            process = process_name,
            start = %start,
            "subscription engine: event stream is processed from position"
        );

        let mut processed_events = 0;
        let mut last_sequence_number = None;
        if !running.is_empty() {
            let stream = self.event_store.load(
                &StreamSelector::All,
                ReadOptions::forward().with_min_sequence_number(start),
            )?;
            for event in stream {
                let event = event?;
                let sequence_number = event.sequence_number;
                let envelope = event.to_envelope();

                let mut index = 0;
                while index < running.len() {
                    let (subscriber, subscription) = (running[index].0, &running[index].1);
                    if subscription.position >= sequence_number {
                        debug!(
                            process = process_name,
                            subscription_id = %subscription.id,
                            position = %subscription.position,
                            sequence_number = %sequence_number,
                            "subscription engine: subscription is past this event, skipped"
                        );
                        index += 1;
                        continue;
                    }
                    match self.handle_event(&envelope, subscriber, subscription, &mut errors)? {
                        Some(advanced) => {
                            running[index].1 = advanced;
                            index += 1;
                        }
                        None => {
                            running.remove(index);
                        }
                    }
                }

                processed_events += 1;
                last_sequence_number = Some(sequence_number);
                debug!(
                    process = process_name,
                    sequence_number = %sequence_number,
                    "subscription engine: current event stream position"
                );

                if limit.is_some_and(|limit| processed_events >= limit) {
                    info!(
                        process = process_name,
                        limit = limit.unwrap_or_default(),
                        "subscription engine: message limit reached, cancelled"
                    );
                    return Ok(ProcessedResult {
                        processed_events,
                        finished: false,
                        errors,
                    });
                }
                if running.is_empty() {
                    break;
                }
            }
        }

        for (_, subscription) in &running {
            let target = match subscription.run_mode {
                RunMode::Once => SubscriptionStatus::Finished,
                RunMode::Continuous | RunMode::FromNow => SubscriptionStatus::Active,
            };
            if subscription.status == target && subscription.retry_attempt == 0 {
                continue;
            }
            self.subscription_store.update(&subscription.id, &|s| {
                s.with_status(target).with_retry_attempt(0).without_error()
            })?;
            if subscription.status != target {
                info!(
                    process = process_name,
                    subscription_id = %subscription.id,
                    from = %subscription.status,
                    to = %target,
                    "subscription engine: subscription changed status"
                );
            }
        }

        let position = last_sequence_number.unwrap_or(SequenceNumber::new(start.value().saturating_sub(1)));
        info!(
            process = process_name,
            position = %position,
            "subscription engine: end of stream reached, finished"
        );

        Ok(ProcessedResult {
            processed_events,
            finished: true,
            errors,
        })
    }

    /// Run the setup hook of a `NEW` subscription and move it to `BOOTING`.
    fn boot(
        &self,
        process_name: &str,
        subscriber: &Subscriber,
        subscription: Subscription,
        errors: &mut Vec<ProcessingError>,
    ) -> Result<Option<Subscription>, EngineError> {
        match subscriber.handler.setup() {
            Ok(()) => {
                let booted = self.subscription_store.update(&subscription.id, &|s| {
                    s.with_status(SubscriptionStatus::Booting)
                })?;
                info!(
                    process = process_name,
                    subscription_id = %subscription.id,
                    "subscription engine: subscriber was set up, booting"
                );
                Ok(Some(booted))
            }
            Err(cause) => {
                error!(
                    process = process_name,
                    subscription_id = %subscription.id,
                    error = %format!("{cause:#}"),
                    "subscription engine: subscriber setup failed"
                );
                self.record_failure(&subscription.id, cause, errors)?;
                Ok(None)
            }
        }
    }

    /// Dispatch one event. `Some` carries the advanced subscription, `None` means
    /// the handler failed and the subscription left the batch.
    fn handle_event(
        &self,
        envelope: &EventEnvelope<JsonValue>,
        subscriber: &Subscriber,
        subscription: &Subscription,
        errors: &mut Vec<ProcessingError>,
    ) -> Result<Option<Subscription>, EngineError> {
        let sequence_number = envelope.sequence_number();

        if let Err(cause) = subscriber.handler.handle(envelope, subscription) {
            error!(
                subscription_id = %subscription.id,
                event_type = envelope.event_type(),
                sequence_number = %sequence_number,
                error = %format!("{cause:#}"),
                "subscription engine: subscriber could not process the event"
            );
            self.record_failure(&subscription.id, cause, errors)?;
            return Ok(None);
        }

        debug!(
            subscription_id = %subscription.id,
            event_type = envelope.event_type(),
            sequence_number = %sequence_number,
            "subscription engine: subscriber processed the event"
        );
        let advanced = self.subscription_store.update(&subscription.id, &|s| {
            s.with_position(sequence_number)
                .with_retry_attempt(0)
                .without_error()
        })?;
        Ok(Some(advanced))
    }

    fn record_failure(
        &self,
        id: &SubscriptionId,
        cause: anyhow::Error,
        errors: &mut Vec<ProcessingError>,
    ) -> Result<(), EngineError> {
        let message = format!("{cause:#}");
        let trace = format!("{cause:?}");
        self.subscription_store
            .update(id, &|s| s.with_error(message.clone(), Some(trace.clone())))?;
        errors.push(ProcessingError {
            subscription_id: id.clone(),
            message,
            cause,
        });
        Ok(())
    }

    fn discover_new_subscriptions(&self) -> Result<(), EngineError> {
        let registered = self
            .subscription_store
            .find_by_criteria(&SubscriptionCriteria::no_constraints())?;

        for subscriber in &self.subscribers {
            if registered.contain(&subscriber.id) {
                continue;
            }
            let mut subscription = Subscription::create(
                subscriber.id.clone(),
                subscriber.group.clone(),
                subscriber.run_mode,
            );
            if subscriber.run_mode == RunMode::FromNow {
                subscription = subscription
                    .with_status(SubscriptionStatus::Active)
                    .with_position(self.event_store.last_sequence_number()?);
            }
            match self.subscription_store.add(subscription) {
                Ok(()) => info!(
                    subscription_id = %subscriber.id,
                    run_mode = %subscriber.run_mode,
                    "subscription engine: new subscriber was found and added to the subscription store"
                ),
                Err(SubscriptionStoreError::Duplicate(id)) => debug!(
                    subscription_id = %id,
                    "subscription engine: subscriber was added concurrently"
                ),
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn discover_detached_subscriptions(
        &self,
        criteria: &SubscriptionEngineCriteria,
    ) -> Result<(), EngineError> {
        const DETACHABLE: [SubscriptionStatus; 3] = [
            SubscriptionStatus::Active,
            SubscriptionStatus::Paused,
            SubscriptionStatus::Finished,
        ];
        let registered = self
            .subscription_store
            .find_by_criteria(&criteria.with_statuses(&DETACHABLE))?;

        for subscription in &registered {
            if self.subscribers.contain(&subscription.id) {
                continue;
            }
            let Some(_lock) = self.try_lock(&subscription.id)? else {
                debug!(
                    subscription_id = %subscription.id,
                    "subscription engine: detached subscription is locked elsewhere, skipped"
                );
                continue;
            };
            self.subscription_store.update(&subscription.id, &|s| {
                if DETACHABLE.contains(&s.status) {
                    s.with_status(SubscriptionStatus::Detached)
                } else {
                    s
                }
            })?;
            info!(
                subscription_id = %subscription.id,
                "subscription engine: subscriber not found, subscription marked as detached"
            );
        }
        Ok(())
    }

    fn retry_subscriptions(&self, criteria: &SubscriptionEngineCriteria) -> Result<(), EngineError> {
        let failed = self
            .subscription_store
            .find_by_criteria(&criteria.with_statuses(&[SubscriptionStatus::Error]))?;

        for subscription in &failed {
            let Some(error) = &subscription.error else {
                continue;
            };
            if !error.previous_status.is_retryable() {
                continue;
            }
            if !self.retry_strategy.should_retry(subscription) {
                continue;
            }
            let Some(_lock) = self.try_lock(&subscription.id)? else {
                continue;
            };
            let retried = self.subscription_store.update(&subscription.id, &|s| {
                match s.error.as_ref().map(|error| error.previous_status) {
                    Some(previous_status) if s.status == SubscriptionStatus::Error => {
                        let attempt = s.retry_attempt + 1;
                        s.with_status(previous_status)
                            .with_retry_attempt(attempt)
                            .without_error()
                    }
                    _ => s,
                }
            })?;
            info!(
                subscription_id = %subscription.id,
                retry_attempt = retried.retry_attempt,
                status = %retried.status,
                "subscription engine: retry subscription"
            );
        }
        Ok(())
    }

    fn transition(
        &self,
        criteria: &SubscriptionEngineCriteria,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    ) -> Result<Subscriptions, EngineError> {
        let candidates = self
            .subscription_store
            .find_by_criteria(&criteria.with_statuses(&[from]))?;

        let mut changed = Vec::new();
        for subscription in &candidates {
            let _lock = self.lock_all([&subscription.id])?;
            let updated = self.subscription_store.update(&subscription.id, &|s| {
                if s.status == from { s.with_status(to) } else { s }
            })?;
            if updated.status == to {
                info!(
                    subscription_id = %updated.id,
                    from = %from,
                    to = %to,
                    "subscription engine: subscription changed status"
                );
                changed.push(updated);
            }
        }
        Ok(Subscriptions::new(changed))
    }

    /// Pair subscriptions with their subscribers, in registration order.
    /// Subscriptions without a registered subscriber are left out.
    fn in_dispatch_order(&self, subscriptions: Subscriptions) -> Vec<(&Subscriber, Subscription)> {
        let mut by_id: HashMap<SubscriptionId, Subscription> = subscriptions
            .into_iter()
            .map(|subscription| (subscription.id.clone(), subscription))
            .collect();
        let ordered: Vec<_> = self
            .subscribers
            .iter()
            .filter_map(|subscriber| by_id.remove(&subscriber.id).map(|s| (subscriber, s)))
            .collect();
        for subscription in by_id.into_values() {
            warn!(
                subscription_id = %subscription.id,
                status = %subscription.status,
                "subscription engine: no subscriber registered, skipped"
            );
        }
        ordered
    }

    /// Lock every subscription, or none: on timeout the locks taken so far are released.
    fn lock_all<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a SubscriptionId>,
    ) -> Result<LockGuard<'_, S>, EngineError> {
        let mut guard = LockGuard {
            store: &self.subscription_store,
            ids: Vec::new(),
        };
        for id in ids {
            let started = Instant::now();
            while !self.subscription_store.acquire_lock(id)? {
                if started.elapsed() >= self.config.lock_timeout {
                    return Err(EngineError::LockTimeout {
                        subscription_id: id.clone(),
                        timeout: self.config.lock_timeout,
                    });
                }
                thread::sleep(self.config.lock_retry_interval);
            }
            guard.ids.push(id.clone());
        }
        Ok(guard)
    }

    fn try_lock(&self, id: &SubscriptionId) -> Result<Option<LockGuard<'_, S>>, EngineError> {
        if self.subscription_store.acquire_lock(id)? {
            Ok(Some(LockGuard {
                store: &self.subscription_store,
                ids: vec![id.clone()],
            }))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use proptest::prelude::*;
    use uuid::Uuid;

    use contentrepo_core::{ExpectedVersion, SubscriptionGroup};
    use contentrepo_events::SubscriptionHandler;

    use super::*;
    use crate::event_store::{InMemoryEventStore, UncommittedEvent};
    use crate::subscription::retry::MaxAttemptsRetryStrategy;
    use crate::subscription::subscribers::Subscriber;
    use crate::subscription::InMemorySubscriptionStore;

    type Engine = SubscriptionEngine<Arc<InMemoryEventStore>, Arc<InMemorySubscriptionStore>>;

    /// Shared record of `(subscriber, sequence number)` deliveries.
    #[derive(Clone, Default)]
    struct Journal(Arc<Mutex<Vec<(&'static str, u64)>>>);

    impl Journal {
        fn deliveries(&self, name: &str) -> Vec<u64> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .filter(|(n, _)| *n == name)
                .map(|(_, seq)| *seq)
                .collect()
        }
    }

    struct Recorder {
        name: &'static str,
        journal: Journal,
        fail_at: Option<u64>,
        failures_left: AtomicU32,
        setup_fails: bool,
    }

    impl Recorder {
        fn new(name: &'static str, journal: &Journal) -> Self {
            Self {
                name,
                journal: journal.clone(),
                fail_at: None,
                failures_left: AtomicU32::new(0),
                setup_fails: false,
            }
        }

        fn failing_at(mut self, sequence_number: u64, times: u32) -> Self {
            self.fail_at = Some(sequence_number);
            self.failures_left = AtomicU32::new(times);
            self
        }

        fn failing_setup(mut self) -> Self {
            self.setup_fails = true;
            self
        }
    }

    impl SubscriptionHandler for Recorder {
        fn setup(&self) -> anyhow::Result<()> {
            if self.setup_fails {
                anyhow::bail!("{}: schema could not be created", self.name);
            }
            Ok(())
        }

        fn handle(
            &self,
            envelope: &EventEnvelope<JsonValue>,
            _subscription: &Subscription,
        ) -> anyhow::Result<()> {
            let seq = envelope.sequence_number().value();
            if self.fail_at == Some(seq)
                && self
                    .failures_left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                    .is_ok()
            {
                anyhow::bail!("{} rejected event {seq}", self.name);
            }
            self.journal.0.lock().unwrap().push((self.name, seq));
            Ok(())
        }
    }

    fn id(value: &str) -> SubscriptionId {
        SubscriptionId::new(value).unwrap()
    }

    fn subscriber(name: &'static str, run_mode: RunMode, handler: Recorder) -> Subscriber {
        Subscriber::new(id(name), SubscriptionGroup::new("default").unwrap(), run_mode, handler)
    }

    fn append_events(events: &InMemoryEventStore, count: usize) {
        for _ in 0..count {
            events
                .append(
                    "stream",
                    vec![UncommittedEvent {
                        event_id: Uuid::now_v7(),
                        event_type: "SomethingHappened".to_string(),
                        event_version: 1,
                        payload: serde_json::json!({}),
                    }],
                    ExpectedVersion::Any,
                )
                .unwrap();
        }
    }

    fn seed(store: &InMemorySubscriptionStore, name: &str, status: SubscriptionStatus, position: u64) {
        store
            .add(
                Subscription::create(id(name), SubscriptionGroup::new("default").unwrap(), RunMode::Continuous)
                    .with_status(status)
                    .with_position(SequenceNumber::new(position)),
            )
            .unwrap();
    }

    fn engine(
        events: &Arc<InMemoryEventStore>,
        store: &Arc<InMemorySubscriptionStore>,
        subscribers: Vec<Subscriber>,
    ) -> Engine {
        let registry = subscribers
            .into_iter()
            .try_fold(Subscribers::new(), |registry, s| registry.with(s))
            .unwrap();
        SubscriptionEngine::new(events.clone(), store.clone(), registry)
    }

    fn status(store: &InMemorySubscriptionStore, name: &str) -> SubscriptionStatus {
        store.get(&id(name)).unwrap().status
    }

    fn position(store: &InMemorySubscriptionStore, name: &str) -> u64 {
        store.get(&id(name)).unwrap().position.value()
    }

    fn all() -> SubscriptionEngineCriteria {
        SubscriptionEngineCriteria::no_constraints()
    }

    #[test]
    fn limit_stops_early_and_subscribers_past_the_events_are_untouched() {
        let events = Arc::new(InMemoryEventStore::new());
        append_events(&events, 15);
        let store = Arc::new(InMemorySubscriptionStore::new());
        seed(&store, "a", SubscriptionStatus::Active, 5);
        seed(&store, "b", SubscriptionStatus::Active, 9);
        seed(&store, "c", SubscriptionStatus::Active, 12);

        let journal = Journal::default();
        let engine = engine(
            &events,
            &store,
            vec![
                subscriber("a", RunMode::Continuous, Recorder::new("a", &journal)),
                subscriber("b", RunMode::Continuous, Recorder::new("b", &journal)),
                subscriber("c", RunMode::Continuous, Recorder::new("c", &journal)),
            ],
        );

        let result = engine.run(&all(), Some(3)).unwrap();

        assert_eq!(result.processed_events, 3);
        assert!(!result.finished);
        assert_eq!(journal.deliveries("a"), vec![6, 7, 8]);
        assert!(journal.deliveries("b").is_empty());
        assert!(journal.deliveries("c").is_empty());
        assert_eq!((position(&store, "a"), position(&store, "b"), position(&store, "c")), (8, 9, 12));
        for name in ["a", "b", "c"] {
            assert!(!store.is_locked(&id(name)));
        }

        // Resuming delivers the rest exactly once per subscriber.
        let result = engine.run(&all(), None).unwrap();
        assert!(result.finished);
        assert_eq!(journal.deliveries("a"), (6..=15).collect::<Vec<_>>());
        assert_eq!(journal.deliveries("b"), (10..=15).collect::<Vec<_>>());
        assert_eq!(journal.deliveries("c"), vec![13, 14, 15]);
    }

    #[test]
    fn setup_boots_new_subscriptions_and_a_second_run_is_a_no_op() {
        let events = Arc::new(InMemoryEventStore::new());
        append_events(&events, 4);
        let store = Arc::new(InMemorySubscriptionStore::new());
        let journal = Journal::default();
        let engine = engine(
            &events,
            &store,
            vec![subscriber("graph", RunMode::Continuous, Recorder::new("graph", &journal))],
        );

        let result = engine.setup(&all(), None).unwrap();
        assert_eq!(result.processed_events, 4);
        assert_eq!(status(&store, "graph"), SubscriptionStatus::Active);
        assert_eq!(position(&store, "graph"), 4);

        let before = engine.subscriptions(&all()).unwrap();
        let again = engine.run(&all(), None).unwrap();
        assert_eq!(again.processed_events, 0);
        assert!(again.finished && !again.has_errors());
        assert_eq!(engine.subscriptions(&all()).unwrap(), before);
        assert_eq!(journal.deliveries("graph"), vec![1, 2, 3, 4]);
    }

    #[test]
    fn a_failing_subscriber_does_not_affect_the_others() {
        let events = Arc::new(InMemoryEventStore::new());
        append_events(&events, 5);
        let store = Arc::new(InMemorySubscriptionStore::new());
        seed(&store, "healthy", SubscriptionStatus::Active, 0);
        seed(&store, "broken", SubscriptionStatus::Active, 0);

        let journal = Journal::default();
        let engine = engine(
            &events,
            &store,
            vec![
                subscriber("broken", RunMode::Continuous, Recorder::new("broken", &journal).failing_at(3, u32::MAX)),
                subscriber("healthy", RunMode::Continuous, Recorder::new("healthy", &journal)),
            ],
        );

        let result = engine.run(&all(), None).unwrap();

        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].subscription_id, id("broken"));
        assert_eq!(result.errors[0].message, "broken rejected event 3");

        let broken = store.get(&id("broken")).unwrap();
        assert_eq!(broken.status, SubscriptionStatus::Error);
        assert_eq!(broken.position, SequenceNumber::new(2));
        assert_eq!(broken.error.unwrap().previous_status, SubscriptionStatus::Active);

        assert_eq!(status(&store, "healthy"), SubscriptionStatus::Active);
        assert_eq!(position(&store, "healthy"), 5);
        assert!(store.get(&id("healthy")).unwrap().error.is_none());
    }

    #[test]
    fn from_now_subscribers_skip_the_backlog() {
        let events = Arc::new(InMemoryEventStore::new());
        append_events(&events, 5);
        let store = Arc::new(InMemorySubscriptionStore::new());
        let journal = Journal::default();
        let engine = engine(
            &events,
            &store,
            vec![subscriber("live", RunMode::FromNow, Recorder::new("live", &journal))],
        );

        engine.setup(&all(), None).unwrap();
        assert_eq!(status(&store, "live"), SubscriptionStatus::Active);
        assert_eq!(position(&store, "live"), 5);

        append_events(&events, 2);
        engine.run(&all(), None).unwrap();
        assert_eq!(journal.deliveries("live"), vec![6, 7]);
    }

    #[test]
    fn once_subscribers_finish_after_draining() {
        let events = Arc::new(InMemoryEventStore::new());
        append_events(&events, 3);
        let store = Arc::new(InMemorySubscriptionStore::new());
        let journal = Journal::default();
        let engine = engine(
            &events,
            &store,
            vec![subscriber("export", RunMode::Once, Recorder::new("export", &journal))],
        );

        engine.setup(&all(), None).unwrap();
        assert_eq!(status(&store, "export"), SubscriptionStatus::Finished);

        append_events(&events, 2);
        engine.run(&all(), None).unwrap();
        assert_eq!(journal.deliveries("export"), vec![1, 2, 3]);
    }

    #[test]
    fn limit_cut_setup_stays_booting_until_drained() {
        let events = Arc::new(InMemoryEventStore::new());
        append_events(&events, 4);
        let store = Arc::new(InMemorySubscriptionStore::new());
        let journal = Journal::default();
        let engine = engine(
            &events,
            &store,
            vec![subscriber("graph", RunMode::Continuous, Recorder::new("graph", &journal))],
        );

        engine.setup(&all(), Some(2)).unwrap();
        assert_eq!(status(&store, "graph"), SubscriptionStatus::Booting);
        assert_eq!(position(&store, "graph"), 2);

        engine.setup(&all(), None).unwrap();
        assert_eq!(status(&store, "graph"), SubscriptionStatus::Active);
        assert_eq!(journal.deliveries("graph"), vec![1, 2, 3, 4]);
    }

    #[test]
    fn subscriptions_without_subscriber_are_detached() {
        let events = Arc::new(InMemoryEventStore::new());
        let store = Arc::new(InMemorySubscriptionStore::new());
        seed(&store, "gone", SubscriptionStatus::Active, 3);
        seed(&store, "gone-paused", SubscriptionStatus::Paused, 3);
        seed(&store, "gone-failed", SubscriptionStatus::Error, 3);

        let engine = engine(&events, &store, vec![]);
        engine.run(&all(), None).unwrap();

        assert_eq!(status(&store, "gone"), SubscriptionStatus::Detached);
        assert_eq!(status(&store, "gone-paused"), SubscriptionStatus::Detached);
        assert_eq!(status(&store, "gone-failed"), SubscriptionStatus::Error);
    }

    #[test]
    fn booting_subscriptions_without_subscriber_are_left_alone() {
        let events = Arc::new(InMemoryEventStore::new());
        append_events(&events, 3);
        let store = Arc::new(InMemorySubscriptionStore::new());
        seed(&store, "orphan", SubscriptionStatus::Booting, 1);
        let journal = Journal::default();
        let engine = engine(
            &events,
            &store,
            vec![subscriber("graph", RunMode::Continuous, Recorder::new("graph", &journal))],
        );

        let result = engine.setup(&all(), None).unwrap();

        assert!(result.finished && !result.has_errors());
        assert_eq!(journal.deliveries("graph"), vec![1, 2, 3]);
        assert_eq!(status(&store, "orphan"), SubscriptionStatus::Booting);
        assert_eq!(position(&store, "orphan"), 1);
        assert!(!store.is_locked(&id("orphan")));
    }

    #[test]
    fn failed_subscriptions_are_retried_within_the_budget() {
        let events = Arc::new(InMemoryEventStore::new());
        append_events(&events, 3);
        let store = Arc::new(InMemorySubscriptionStore::new());
        let journal = Journal::default();
        let engine = engine(
            &events,
            &store,
            vec![subscriber("flaky", RunMode::Continuous, Recorder::new("flaky", &journal).failing_at(2, 1))],
        )
        .with_retry_strategy(MaxAttemptsRetryStrategy::new(1));

        let first = engine.setup(&all(), None).unwrap();
        assert_eq!(first.errors.len(), 1);
        let failed = store.get(&id("flaky")).unwrap();
        assert_eq!(failed.status, SubscriptionStatus::Error);
        assert_eq!(failed.error.unwrap().previous_status, SubscriptionStatus::Booting);

        let second = engine.setup(&all(), None).unwrap();
        assert!(!second.has_errors());
        let recovered = store.get(&id("flaky")).unwrap();
        assert_eq!(recovered.status, SubscriptionStatus::Active);
        assert_eq!(recovered.retry_attempt, 0);
        assert_eq!(recovered.position, SequenceNumber::new(3));
        assert_eq!(journal.deliveries("flaky"), vec![1, 2, 3]);
    }

    #[test]
    fn without_retry_strategy_errors_are_sticky() {
        let events = Arc::new(InMemoryEventStore::new());
        append_events(&events, 2);
        let store = Arc::new(InMemorySubscriptionStore::new());
        let journal = Journal::default();
        let engine = engine(
            &events,
            &store,
            vec![subscriber("flaky", RunMode::Continuous, Recorder::new("flaky", &journal).failing_at(1, 1))],
        );

        engine.setup(&all(), None).unwrap();
        engine.setup(&all(), None).unwrap();
        engine.run(&all(), None).unwrap();
        assert_eq!(status(&store, "flaky"), SubscriptionStatus::Error);
        assert!(journal.deliveries("flaky").is_empty());
    }

    #[test]
    fn failing_setup_hook_records_the_new_status() {
        let events = Arc::new(InMemoryEventStore::new());
        append_events(&events, 2);
        let store = Arc::new(InMemorySubscriptionStore::new());
        let journal = Journal::default();
        let engine = engine(
            &events,
            &store,
            vec![subscriber("graph", RunMode::Continuous, Recorder::new("graph", &journal).failing_setup())],
        );

        let result = engine.setup(&all(), None).unwrap();
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.processed_events, 0);
        let failed = store.get(&id("graph")).unwrap();
        assert_eq!(failed.status, SubscriptionStatus::Error);
        assert_eq!(failed.error.unwrap().previous_status, SubscriptionStatus::New);
    }

    #[test]
    fn lock_timeout_aborts_the_batch_and_releases_partial_locks() {
        let events = Arc::new(InMemoryEventStore::new());
        append_events(&events, 2);
        let store = Arc::new(InMemorySubscriptionStore::new());
        seed(&store, "a", SubscriptionStatus::Active, 0);
        seed(&store, "b", SubscriptionStatus::Active, 0);
        assert!(store.acquire_lock(&id("b")).unwrap());

        let journal = Journal::default();
        let engine = engine(
            &events,
            &store,
            vec![
                subscriber("a", RunMode::Continuous, Recorder::new("a", &journal)),
                subscriber("b", RunMode::Continuous, Recorder::new("b", &journal)),
            ],
        )
        .with_config(
            EngineConfig::default()
                .with_lock_timeout(Duration::from_millis(30))
                .with_lock_retry_interval(Duration::from_millis(5)),
        );

        let err = engine.run(&all(), None).unwrap_err();
        assert!(matches!(err, EngineError::LockTimeout { ref subscription_id, .. } if *subscription_id == id("b")));
        assert!(!store.is_locked(&id("a")));
        assert!(journal.deliveries("a").is_empty());
        assert_eq!(position(&store, "a"), 0);
    }

    #[test]
    fn paused_subscriptions_are_skipped_until_reactivated() {
        let events = Arc::new(InMemoryEventStore::new());
        append_events(&events, 2);
        let store = Arc::new(InMemorySubscriptionStore::new());
        seed(&store, "graph", SubscriptionStatus::Active, 0);
        let journal = Journal::default();
        let engine = engine(
            &events,
            &store,
            vec![subscriber("graph", RunMode::Continuous, Recorder::new("graph", &journal))],
        );

        let paused = engine.pause(&all()).unwrap();
        assert_eq!(paused.len(), 1);
        engine.run(&all(), None).unwrap();
        assert!(journal.deliveries("graph").is_empty());

        let reactivated = engine.reactivate(&SubscriptionEngineCriteria::for_ids([id("graph")])).unwrap();
        assert_eq!(reactivated.len(), 1);
        engine.run(&all(), None).unwrap();
        assert_eq!(journal.deliveries("graph"), vec![1, 2]);
    }

    #[test]
    fn criteria_restrict_the_batch() {
        let events = Arc::new(InMemoryEventStore::new());
        append_events(&events, 2);
        let store = Arc::new(InMemorySubscriptionStore::new());
        seed(&store, "a", SubscriptionStatus::Active, 0);
        seed(&store, "b", SubscriptionStatus::Active, 0);
        let journal = Journal::default();
        let engine = engine(
            &events,
            &store,
            vec![
                subscriber("a", RunMode::Continuous, Recorder::new("a", &journal)),
                subscriber("b", RunMode::Continuous, Recorder::new("b", &journal)),
            ],
        );

        engine.run(&SubscriptionEngineCriteria::for_ids([id("b")]), None).unwrap();
        assert!(journal.deliveries("a").is_empty());
        assert_eq!(journal.deliveries("b"), vec![1, 2]);
    }

    #[test]
    fn events_reach_subscribers_in_registration_order() {
        let events = Arc::new(InMemoryEventStore::new());
        append_events(&events, 2);
        let store = Arc::new(InMemorySubscriptionStore::new());
        seed(&store, "alpha", SubscriptionStatus::Active, 0);
        seed(&store, "zulu", SubscriptionStatus::Active, 0);
        let journal = Journal::default();
        let engine = engine(
            &events,
            &store,
            vec![
                subscriber("zulu", RunMode::Continuous, Recorder::new("zulu", &journal)),
                subscriber("alpha", RunMode::Continuous, Recorder::new("alpha", &journal)),
            ],
        );

        engine.run(&all(), None).unwrap();
        let order = journal.0.lock().unwrap().clone();
        assert_eq!(order, vec![("zulu", 1), ("alpha", 1), ("zulu", 2), ("alpha", 2)]);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 48, ..ProptestConfig::default() })]

        #[test]
        fn positions_never_pass_the_last_delivered_event(
            event_count in 0usize..25,
            first_fail in proptest::option::of(1u64..25),
            second_fail in proptest::option::of(1u64..25),
            limit in proptest::option::of(1usize..6),
        ) {
            let events = Arc::new(InMemoryEventStore::new());
            append_events(&events, event_count);
            let store = Arc::new(InMemorySubscriptionStore::new());
            seed(&store, "first", SubscriptionStatus::Active, 0);
            seed(&store, "second", SubscriptionStatus::Active, 0);

            let journal = Journal::default();
            let with_failure = |name: &'static str, fail: Option<u64>| match fail {
                Some(seq) => Recorder::new(name, &journal).failing_at(seq, u32::MAX),
                None => Recorder::new(name, &journal),
            };
            let engine = engine(
                &events,
                &store,
                vec![
                    subscriber("first", RunMode::Continuous, with_failure("first", first_fail)),
                    subscriber("second", RunMode::Continuous, with_failure("second", second_fail)),
                ],
            );

            let mut previous = (0, 0);
            for _ in 0..(event_count + 2) {
                let result = engine.run(&all(), limit).unwrap();
                let current = (position(&store, "first"), position(&store, "second"));
                prop_assert!(current.0 >= previous.0 && current.1 >= previous.1);
                previous = current;
                if result.finished {
                    break;
                }
            }

            for name in ["first", "second"] {
                let delivered = journal.deliveries(name);
                prop_assert!(delivered.windows(2).all(|w| w[0] < w[1]));
                prop_assert_eq!(position(&store, name), delivered.last().copied().unwrap_or(0));
            }
        }
    }
}
