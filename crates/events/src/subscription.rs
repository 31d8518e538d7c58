//! Subscription model: a subscriber's durable progress against the event stream.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use contentrepo_core::{DomainError, SubscriptionGroup, SubscriptionId};

use crate::envelope::SequenceNumber;

/// Lifecycle status of a subscription.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    New,
    Booting,
    Active,
    Paused,
    Error,
    Detached,
    Finished,
}

impl SubscriptionStatus {
    pub const ALL: [SubscriptionStatus; 7] = [
        SubscriptionStatus::New,
        SubscriptionStatus::Booting,
        SubscriptionStatus::Active,
        SubscriptionStatus::Paused,
        SubscriptionStatus::Error,
        SubscriptionStatus::Detached,
        SubscriptionStatus::Finished,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionStatus::New => "NEW",
            SubscriptionStatus::Booting => "BOOTING",
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::Paused => "PAUSED",
            SubscriptionStatus::Error => "ERROR",
            SubscriptionStatus::Detached => "DETACHED",
            SubscriptionStatus::Finished => "FINISHED",
        }
    }

    /// Whether a failure that happened in this status may be retried.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            SubscriptionStatus::New | SubscriptionStatus::Booting | SubscriptionStatus::Active
        )
    }
}

impl core::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SubscriptionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown subscription status '{s}'")))
    }
}

/// How a subscriber joins the event stream.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunMode {
    /// Replay the whole stream, then keep following it.
    #[default]
    Continuous,
    /// Skip the backlog and follow the stream from its current tail.
    FromNow,
    /// Replay the stream once and finish.
    Once,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Continuous => "CONTINUOUS",
            RunMode::FromNow => "FROM_NOW",
            RunMode::Once => "ONCE",
        }
    }
}

impl core::fmt::Display for RunMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [RunMode::Continuous, RunMode::FromNow, RunMode::Once]
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown run mode '{s}'")))
    }
}

/// The last failure of a subscription and the status it failed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionError {
    pub message: String,
    pub previous_status: SubscriptionStatus,
    pub error_trace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub group: SubscriptionGroup,
    pub run_mode: RunMode,
    pub status: SubscriptionStatus,
    /// Sequence number of the last event this subscriber processed successfully.
    pub position: SequenceNumber,
    pub retry_attempt: u32,
    pub last_saved_at: Option<DateTime<Utc>>,
    pub error: Option<SubscriptionError>,
}

impl Subscription {
    /// A freshly discovered subscription: `NEW`, positioned before the first event.
    pub fn create(id: SubscriptionId, group: SubscriptionGroup, run_mode: RunMode) -> Self {
        Self {
            id,
            group,
            run_mode,
            status: SubscriptionStatus::New,
            position: SequenceNumber::none(),
            retry_attempt: 0,
            last_saved_at: None,
            error: None,
        }
    }

    pub fn with_status(mut self, status: SubscriptionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_position(mut self, position: SequenceNumber) -> Self {
        self.position = position;
        self
    }

    pub fn with_retry_attempt(mut self, retry_attempt: u32) -> Self {
        self.retry_attempt = retry_attempt;
        self
    }

    pub fn with_last_saved_at(mut self, last_saved_at: DateTime<Utc>) -> Self {
        self.last_saved_at = Some(last_saved_at);
        self
    }

    /// Record a failure: remembers the current status and moves to `ERROR`.
    pub fn with_error(mut self, message: impl Into<String>, error_trace: Option<String>) -> Self {
        self.error = Some(SubscriptionError {
            message: message.into(),
            previous_status: self.status,
            error_trace,
        });
        self.status = SubscriptionStatus::Error;
        self
    }

    pub fn without_error(mut self) -> Self {
        self.error = None;
        self
    }
}

/// An ordered collection of subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subscriptions(Vec<Subscription>);

impl Subscriptions {
    pub fn new(subscriptions: Vec<Subscription>) -> Self {
        Self(subscriptions)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Subscription> {
        self.0.iter()
    }

    pub fn get(&self, id: &SubscriptionId) -> Option<&Subscription> {
        self.0.iter().find(|s| &s.id == id)
    }

    pub fn contain(&self, id: &SubscriptionId) -> bool {
        self.get(id).is_some()
    }

    pub fn without(&self, id: &SubscriptionId) -> Self {
        Self(self.0.iter().filter(|s| &s.id != id).cloned().collect())
    }

    /// The smallest position in the collection, `none()` when empty.
    pub fn lowest_position(&self) -> SequenceNumber {
        self.0
            .iter()
            .map(|s| s.position)
            .min()
            .unwrap_or_default()
    }

    pub fn ids(&self) -> Vec<SubscriptionId> {
        self.0.iter().map(|s| s.id.clone()).collect()
    }
}

impl FromIterator<Subscription> for Subscriptions {
    fn from_iter<T: IntoIterator<Item = Subscription>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Subscriptions {
    type Item = Subscription;
    type IntoIter = std::vec::IntoIter<Subscription>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Subscriptions {
    type Item = &'a Subscription;
    type IntoIter = std::slice::Iter<'a, Subscription>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
