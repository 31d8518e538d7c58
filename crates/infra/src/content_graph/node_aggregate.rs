use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use contentrepo_core::{ContentStreamId, DomainError, DomainResult, NodeAggregateId, NodeName, NodeTypeName};
use contentrepo_dimension::{
    DimensionSpacePoint, DimensionSpacePointSet, InterDimensionalVariationGraph,
    OriginDimensionSpacePoint, OriginDimensionSpacePointSet,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeAggregateClassification {
    Root,
    Regular,
    Tethered,
}

impl NodeAggregateClassification {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeAggregateClassification::Root => "root",
            NodeAggregateClassification::Regular => "regular",
            NodeAggregateClassification::Tethered => "tethered",
        }
    }
}

impl core::fmt::Display for NodeAggregateClassification {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeAggregateClassification {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "root" => Ok(NodeAggregateClassification::Root),
            "regular" => Ok(NodeAggregateClassification::Regular),
            "tethered" => Ok(NodeAggregateClassification::Tethered),
            other => Err(DomainError::validation(format!(
                "unknown node aggregate classification '{other}'"
            ))),
        }
    }
}

/// Which dimension space points a change scoped to one point reaches.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationDistributionStrategy {
    /// Only the reference point itself.
    Scatter,
    /// The reference point and its specializations, as far as they are covered.
    #[default]
    GatherSpecializations,
    /// Every covered point.
    GatherAll,
}

/// All variants of one node aggregate in one content stream.
///
/// Built fresh from projection rows by the assembler; never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAggregate {
    pub(super) content_stream_id: ContentStreamId,
    pub(super) node_aggregate_id: NodeAggregateId,
    pub(super) classification: NodeAggregateClassification,
    pub(super) node_type_name: NodeTypeName,
    pub(super) node_name: Option<NodeName>,
    pub(super) occupied: OriginDimensionSpacePointSet,
    /// Origin hash → points that origin's variant is visible at.
    pub(super) coverage_by_origin: BTreeMap<String, DimensionSpacePointSet>,
    pub(super) covered: DimensionSpacePointSet,
    /// Covered point hash → the origin whose variant is visible there.
    pub(super) occupation_by_covered: BTreeMap<String, OriginDimensionSpacePoint>,
    pub(super) disabled: DimensionSpacePointSet,
}

impl NodeAggregate {
    pub fn content_stream_id(&self) -> ContentStreamId {
        self.content_stream_id
    }

    pub fn node_aggregate_id(&self) -> &NodeAggregateId {
        &self.node_aggregate_id
    }

    pub fn classification(&self) -> NodeAggregateClassification {
        self.classification
    }

    pub fn is_root(&self) -> bool {
        self.classification == NodeAggregateClassification::Root
    }

    pub fn is_tethered(&self) -> bool {
        self.classification == NodeAggregateClassification::Tethered
    }

    pub fn node_type_name(&self) -> &NodeTypeName {
        &self.node_type_name
    }

    pub fn node_name(&self) -> Option<&NodeName> {
        self.node_name.as_ref()
    }

    pub fn occupied_dimension_space_points(&self) -> &OriginDimensionSpacePointSet {
        &self.occupied
    }

    pub fn covered_dimension_space_points(&self) -> &DimensionSpacePointSet {
        &self.covered
    }

    pub fn disabled_dimension_space_points(&self) -> &DimensionSpacePointSet {
        &self.disabled
    }

    pub fn occupies(&self, origin: &OriginDimensionSpacePoint) -> bool {
        self.occupied.contains(origin)
    }

    pub fn covers(&self, point: &DimensionSpacePoint) -> bool {
        self.covered.contains(point)
    }

    /// Points the variant authored at `origin` is visible at.
    pub fn coverage(&self, origin: &OriginDimensionSpacePoint) -> Option<&DimensionSpacePointSet> {
        self.coverage_by_origin.get(origin.hash())
    }

    /// The origin whose variant is visible at `covered`.
    pub fn occupation(&self, covered: &DimensionSpacePoint) -> Option<&OriginDimensionSpacePoint> {
        self.occupation_by_covered.get(covered.hash())
    }

    pub fn is_disabled_in(&self, point: &DimensionSpacePoint) -> bool {
        self.disabled.contains(point)
    }

    /// First entry of `point`'s generalization chain this aggregate occupies.
    ///
    /// This is where a new variant for `point` would be copied from.
    pub fn nearest_occupied_origin(
        &self,
        point: &DimensionSpacePoint,
        graph: &InterDimensionalVariationGraph,
    ) -> DomainResult<Option<OriginDimensionSpacePoint>> {
        Ok(graph
            .generalization_chain(point)?
            .into_iter()
            .map(OriginDimensionSpacePoint::from_dimension_space_point)
            .find(|origin| self.occupies(origin)))
    }

    pub fn affected_dimension_space_points(
        &self,
        strategy: RelationDistributionStrategy,
        reference: &DimensionSpacePoint,
        graph: &InterDimensionalVariationGraph,
    ) -> DomainResult<DimensionSpacePointSet> {
        match strategy {
            RelationDistributionStrategy::Scatter => Ok(DimensionSpacePointSet::new([reference.clone()])),
            RelationDistributionStrategy::GatherSpecializations => Ok(self
                .covered
                .intersection(&graph.specialization_set(reference, true, None)?)),
            RelationDistributionStrategy::GatherAll => Ok(self.covered.clone()),
        }
    }
}
