use serde::{Deserialize, Serialize};

use contentrepo_core::{ContentStreamId, NodeAggregateId, NodeName, NodeTypeName};
use contentrepo_dimension::{DimensionSpacePointSet, OriginDimensionSpacePoint};
use contentrepo_events::Event;

use super::node_aggregate::NodeAggregateClassification;

/// Events of the content graph that the in-memory projection materializes.
///
/// Stored payloads are the full tagged form (`{"type": .., "payload": ..}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ContentGraphEvent {
    NodeAggregateWithNodeWasCreated(NodeAggregateWithNodeWasCreated),
    NodeVariantWasCreated(NodeVariantWasCreated),
    NodeAggregateWasDisabled(NodeAggregateWasDisabled),
    NodeAggregateWasEnabled(NodeAggregateWasEnabled),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAggregateWithNodeWasCreated {
    pub content_stream_id: ContentStreamId,
    pub node_aggregate_id: NodeAggregateId,
    pub node_type_name: NodeTypeName,
    pub node_name: Option<NodeName>,
    pub classification: NodeAggregateClassification,
    pub origin_dimension_space_point: OriginDimensionSpacePoint,
    pub covered_dimension_space_points: DimensionSpacePointSet,
}

/// A new variant at `variant_origin` takes over `variant_coverage` from
/// whichever variants covered those points before.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeVariantWasCreated {
    pub content_stream_id: ContentStreamId,
    pub node_aggregate_id: NodeAggregateId,
    pub source_origin: OriginDimensionSpacePoint,
    pub variant_origin: OriginDimensionSpacePoint,
    pub variant_coverage: DimensionSpacePointSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAggregateWasDisabled {
    pub content_stream_id: ContentStreamId,
    pub node_aggregate_id: NodeAggregateId,
    pub affected_dimension_space_points: DimensionSpacePointSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAggregateWasEnabled {
    pub content_stream_id: ContentStreamId,
    pub node_aggregate_id: NodeAggregateId,
    pub affected_dimension_space_points: DimensionSpacePointSet,
}

impl ContentGraphEvent {
    pub const EVENT_TYPES: [&'static str; 4] = [
        "NodeAggregateWithNodeWasCreated",
        "NodeVariantWasCreated",
        "NodeAggregateWasDisabled",
        "NodeAggregateWasEnabled",
    ];

    pub fn content_stream_id(&self) -> ContentStreamId {
        match self {
            ContentGraphEvent::NodeAggregateWithNodeWasCreated(e) => e.content_stream_id,
            ContentGraphEvent::NodeVariantWasCreated(e) => e.content_stream_id,
            ContentGraphEvent::NodeAggregateWasDisabled(e) => e.content_stream_id,
            ContentGraphEvent::NodeAggregateWasEnabled(e) => e.content_stream_id,
        }
    }

    pub fn node_aggregate_id(&self) -> &NodeAggregateId {
        match self {
            ContentGraphEvent::NodeAggregateWithNodeWasCreated(e) => &e.node_aggregate_id,
            ContentGraphEvent::NodeVariantWasCreated(e) => &e.node_aggregate_id,
            ContentGraphEvent::NodeAggregateWasDisabled(e) => &e.node_aggregate_id,
            ContentGraphEvent::NodeAggregateWasEnabled(e) => &e.node_aggregate_id,
        }
    }

    /// Name of the event stream this event belongs to.
    pub fn stream_name(&self) -> String {
        format!("ContentStream:{}", self.content_stream_id())
    }
}

impl Event for ContentGraphEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ContentGraphEvent::NodeAggregateWithNodeWasCreated(_) => Self::EVENT_TYPES[0],
            ContentGraphEvent::NodeVariantWasCreated(_) => Self::EVENT_TYPES[1],
            ContentGraphEvent::NodeAggregateWasDisabled(_) => Self::EVENT_TYPES[2],
            ContentGraphEvent::NodeAggregateWasEnabled(_) => Self::EVENT_TYPES[3],
        }
    }
}
