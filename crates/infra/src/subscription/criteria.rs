use contentrepo_core::{SubscriptionGroup, SubscriptionId};
use contentrepo_events::{Subscription, SubscriptionStatus};

/// Narrows engine operations to some subscriptions. `None` means "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionEngineCriteria {
    pub ids: Option<Vec<SubscriptionId>>,
    pub groups: Option<Vec<SubscriptionGroup>>,
}

impl SubscriptionEngineCriteria {
    pub fn no_constraints() -> Self {
        Self::default()
    }

    pub fn for_ids(ids: impl IntoIterator<Item = SubscriptionId>) -> Self {
        Self {
            ids: Some(ids.into_iter().collect()),
            groups: None,
        }
    }

    pub fn for_groups(groups: impl IntoIterator<Item = SubscriptionGroup>) -> Self {
        Self {
            ids: None,
            groups: Some(groups.into_iter().collect()),
        }
    }

    /// Store criteria for the same ids/groups, restricted to `statuses`.
    pub fn with_statuses(&self, statuses: &[SubscriptionStatus]) -> SubscriptionCriteria {
        SubscriptionCriteria {
            ids: self.ids.clone(),
            groups: self.groups.clone(),
            statuses: Some(statuses.to_vec()),
        }
    }
}

/// Store-level query: all given constraints must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionCriteria {
    pub ids: Option<Vec<SubscriptionId>>,
    pub groups: Option<Vec<SubscriptionGroup>>,
    pub statuses: Option<Vec<SubscriptionStatus>>,
}

impl SubscriptionCriteria {
    pub fn no_constraints() -> Self {
        Self::default()
    }

    pub fn matches(&self, subscription: &Subscription) -> bool {
        self.ids.as_ref().is_none_or(|ids| ids.contains(&subscription.id))
            && self
                .groups
                .as_ref()
                .is_none_or(|groups| groups.contains(&subscription.group))
            && self
                .statuses
                .as_ref()
                .is_none_or(|statuses| statuses.contains(&subscription.status))
    }
}
