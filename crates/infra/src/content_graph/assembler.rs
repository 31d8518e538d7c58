//! Reconstruction of node aggregates from flat projection rows.
//!
//! One row is one coverage edge: the node variant authored at
//! `origin_dimension_space_point` is visible at `covered_dimension_space_point`.
//! Assembly is a two-pass fold: the first pass checks that every row of an
//! aggregate agrees on the aggregate-level fields, the second builds the
//! occupation and coverage maps. Row order does not affect the result.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::iter::Peekable;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use contentrepo_core::{ContentStreamId, NodeAggregateId, NodeName, NodeTypeName};
use contentrepo_dimension::{
    DimensionSpacePoint, DimensionSpacePointSet, OriginDimensionSpacePoint,
    OriginDimensionSpacePointSet,
};

use super::node_aggregate::{NodeAggregate, NodeAggregateClassification};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRow {
    pub node_aggregate_id: NodeAggregateId,
    pub content_stream_id: ContentStreamId,
    pub node_type_name: NodeTypeName,
    pub node_name: Option<NodeName>,
    pub classification: NodeAggregateClassification,
    pub origin_dimension_space_point: OriginDimensionSpacePoint,
    pub covered_dimension_space_point: DimensionSpacePoint,
    /// Set when the covered point is disabled for this aggregate.
    pub disabled_dimension_space_point_hash: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("rows of node aggregate '{node_aggregate_id}' disagree on {field}: '{expected}' vs '{found}'")]
    DivergentField {
        node_aggregate_id: NodeAggregateId,
        field: &'static str,
        expected: String,
        found: String,
    },

    #[error("node aggregate '{node_aggregate_id}' covers {covered} from both {first} and {second}")]
    ConflictingOccupation {
        node_aggregate_id: NodeAggregateId,
        covered: DimensionSpacePoint,
        first: OriginDimensionSpacePoint,
        second: OriginDimensionSpacePoint,
    },

    #[error("rows of node aggregate '{0}' are not contiguous")]
    NonContiguousPartition(NodeAggregateId),
}

fn check_field<T>(
    canonical: &NodeRow,
    field: &'static str,
    expected: &T,
    found: &T,
) -> Result<(), AssemblyError>
where
    T: PartialEq + core::fmt::Debug,
{
    if expected == found {
        return Ok(());
    }
    Err(AssemblyError::DivergentField {
        node_aggregate_id: canonical.node_aggregate_id.clone(),
        field,
        expected: format!("{expected:?}"),
        found: format!("{found:?}"),
    })
}

/// Assemble one aggregate; `Ok(None)` when there are no rows at all.
pub fn assemble_node_aggregate(rows: &[NodeRow]) -> Result<Option<NodeAggregate>, AssemblyError> {
    let Some(canonical) = rows.first() else {
        return Ok(None);
    };

    for row in &rows[1..] {
        check_field(canonical, "node aggregate id", &canonical.node_aggregate_id, &row.node_aggregate_id)?;
        check_field(canonical, "content stream id", &canonical.content_stream_id, &row.content_stream_id)?;
        check_field(canonical, "node type name", &canonical.node_type_name, &row.node_type_name)?;
        check_field(canonical, "node name", &canonical.node_name, &row.node_name)?;
        check_field(canonical, "classification", &canonical.classification, &row.classification)?;
    }

    let mut occupied = BTreeMap::new();
    let mut coverage_by_origin: BTreeMap<String, Vec<DimensionSpacePoint>> = BTreeMap::new();
    let mut covered = BTreeMap::new();
    let mut occupation_by_covered: BTreeMap<String, OriginDimensionSpacePoint> = BTreeMap::new();
    let mut disabled = Vec::new();

    for row in rows {
        let origin = &row.origin_dimension_space_point;
        let point = &row.covered_dimension_space_point;

        if let Some(first) = occupation_by_covered.get(point.hash()) {
            if first != origin {
                let (first, second) = if first < origin {
                    (first.clone(), origin.clone())
                } else {
                    (origin.clone(), first.clone())
                };
                return Err(AssemblyError::ConflictingOccupation {
                    node_aggregate_id: canonical.node_aggregate_id.clone(),
                    covered: point.clone(),
                    first,
                    second,
                });
            }
        }

        occupied.insert(origin.hash().to_string(), origin.clone());
        coverage_by_origin
            .entry(origin.hash().to_string())
            .or_default()
            .push(point.clone());
        covered.insert(point.hash().to_string(), point.clone());
        occupation_by_covered.insert(point.hash().to_string(), origin.clone());
        if row.disabled_dimension_space_point_hash.is_some() {
            disabled.push(point.clone());
        }
    }

    Ok(Some(NodeAggregate {
        content_stream_id: canonical.content_stream_id,
        node_aggregate_id: canonical.node_aggregate_id.clone(),
        classification: canonical.classification,
        node_type_name: canonical.node_type_name.clone(),
        node_name: canonical.node_name.clone(),
        occupied: OriginDimensionSpacePointSet::new(occupied.into_values()),
        coverage_by_origin: coverage_by_origin
            .into_iter()
            .map(|(hash, points)| (hash, DimensionSpacePointSet::new(points)))
            .collect(),
        covered: DimensionSpacePointSet::new(covered.into_values()),
        occupation_by_covered,
        disabled: DimensionSpacePointSet::new(disabled),
    }))
}

/// Assemble every aggregate in `rows`, in order of first appearance.
pub fn assemble_node_aggregates(
    rows: impl IntoIterator<Item = NodeRow>,
) -> Result<Vec<NodeAggregate>, AssemblyError> {
    let mut partitions: Vec<Vec<NodeRow>> = Vec::new();
    let mut index: HashMap<NodeAggregateId, usize> = HashMap::new();

    for row in rows {
        match index.get(&row.node_aggregate_id) {
            Some(&i) => partitions[i].push(row),
            None => {
                index.insert(row.node_aggregate_id.clone(), partitions.len());
                partitions.push(vec![row]);
            }
        }
    }

    let mut aggregates = Vec::with_capacity(partitions.len());
    for partition in &partitions {
        if let Some(aggregate) = assemble_node_aggregate(partition)? {
            aggregates.push(aggregate);
        }
    }
    Ok(aggregates)
}

/// Single-pass assembly over rows partitioned by aggregate id.
///
/// Only the rows of the aggregate currently being assembled are held in memory.
/// To detect a partition that reappears, [`NodeAggregateStream::new`] also keeps
/// the id of every aggregate it has closed, which grows with the number of
/// aggregates. Sources that already guarantee partitioned rows (an `ORDER BY`
/// on the aggregate id) can use [`NodeAggregateStream::partitioned`], which
/// keeps no per-aggregate state. The stream ends after the first error.
pub struct NodeAggregateStream<I>
where
    I: Iterator<Item = NodeRow>,
{
    rows: Peekable<I>,
    /// `None` when the source guarantees partitioning.
    closed: Option<HashSet<NodeAggregateId>>,
    failed: bool,
}

impl<I> NodeAggregateStream<I>
where
    I: Iterator<Item = NodeRow>,
{
    pub fn new(rows: impl IntoIterator<Item = NodeRow, IntoIter = I>) -> Self {
        Self {
            rows: rows.into_iter().peekable(),
            closed: Some(HashSet::new()),
            failed: false,
        }
    }

    /// Trust the source to deliver each aggregate's rows contiguously.
    ///
    /// A reappearing id is not detected; it yields a second aggregate.
    pub fn partitioned(rows: impl IntoIterator<Item = NodeRow, IntoIter = I>) -> Self {
        Self {
            rows: rows.into_iter().peekable(),
            closed: None,
            failed: false,
        }
    }
}

impl<I> Iterator for NodeAggregateStream<I>
where
    I: Iterator<Item = NodeRow>,
{
    type Item = Result<NodeAggregate, AssemblyError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let first = self.rows.next()?;
        let id = first.node_aggregate_id.clone();

        let mut partition = vec![first];
        while let Some(row) = self.rows.next_if(|row| row.node_aggregate_id == id) {
            partition.push(row);
        }

        let reappeared = match &mut self.closed {
            Some(closed) => !closed.insert(id.clone()),
            None => false,
        };
        if reappeared {
            self.failed = true;
            return Some(Err(AssemblyError::NonContiguousPartition(id)));
        }

        match assemble_node_aggregate(&partition) {
            Ok(Some(aggregate)) => Some(Ok(aggregate)),
            Ok(None) => None,
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use contentrepo_dimension::{
        ContentDimension, ContentDimensionSource, InterDimensionalVariationGraph,
    };
    use proptest::prelude::*;

    use super::*;
    use crate::content_graph::RelationDistributionStrategy;

    fn point(language: &str) -> DimensionSpacePoint {
        DimensionSpacePoint::new([("language", language)]).unwrap()
    }

    fn origin(language: &str) -> OriginDimensionSpacePoint {
        OriginDimensionSpacePoint::from_dimension_space_point(point(language))
    }

    fn row(aggregate: &str, stream: ContentStreamId, origin_language: &str, covered_language: &str) -> NodeRow {
        NodeRow {
            node_aggregate_id: NodeAggregateId::new(aggregate).unwrap(),
            content_stream_id: stream,
            node_type_name: NodeTypeName::new("Acme:Page").unwrap(),
            node_name: None,
            classification: NodeAggregateClassification::Regular,
            origin_dimension_space_point: origin(origin_language),
            covered_dimension_space_point: point(covered_language),
            disabled_dimension_space_point_hash: None,
        }
    }

    fn language_graph() -> InterDimensionalVariationGraph {
        let language = ContentDimension::builder("language")
            .value("mul")
            .specialization("en", "mul")
            .specialization("de", "mul")
            .specialization("gsw", "de")
            .build()
            .unwrap();
        InterDimensionalVariationGraph::new(ContentDimensionSource::new(vec![language]).unwrap()).unwrap()
    }

    #[test]
    fn no_rows_means_no_aggregate() {
        assert_eq!(assemble_node_aggregate(&[]).unwrap(), None);
        assert!(assemble_node_aggregates(Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn coverage_and_occupation_are_inverse() {
        let cs = ContentStreamId::new();
        let mut disabled = row("page", cs, "de", "gsw");
        disabled.disabled_dimension_space_point_hash = Some(point("gsw").hash().to_string());
        let rows = vec![row("page", cs, "mul", "mul"), row("page", cs, "mul", "en"), row("page", cs, "de", "de"), disabled];

        let aggregate = assemble_node_aggregate(&rows).unwrap().unwrap();

        assert_eq!(aggregate.occupied_dimension_space_points().len(), 2);
        assert!(aggregate.occupies(&origin("de")));
        assert!(!aggregate.occupies(&origin("en")));
        assert_eq!(aggregate.covered_dimension_space_points().len(), 4);
        assert_eq!(aggregate.coverage(&origin("mul")).unwrap(), &DimensionSpacePointSet::new([point("mul"), point("en")]));
        assert_eq!(aggregate.occupation(&point("gsw")), Some(&origin("de")));
        assert_eq!(aggregate.occupation(&point("en")), Some(&origin("mul")));
        assert!(aggregate.is_disabled_in(&point("gsw")));
        assert!(!aggregate.is_disabled_in(&point("de")));
        for covered in aggregate.covered_dimension_space_points() {
            let occupant = aggregate.occupation(covered).unwrap();
            assert!(aggregate.coverage(occupant).unwrap().contains(covered));
        }
    }

    #[test]
    fn divergent_canonical_fields_are_reported() {
        let cs = ContentStreamId::new();
        let mut renamed = row("page", cs, "de", "de");
        renamed.node_type_name = NodeTypeName::new("Acme:Article").unwrap();

        let err = assemble_node_aggregate(&[row("page", cs, "mul", "mul"), renamed]).unwrap_err();
        assert!(matches!(err, AssemblyError::DivergentField { field: "node type name", .. }));

        let other_stream = row("page", ContentStreamId::new(), "de", "de");
        let err = assemble_node_aggregate(&[row("page", cs, "mul", "mul"), other_stream]).unwrap_err();
        assert!(matches!(err, AssemblyError::DivergentField { field: "content stream id", .. }));
    }

    #[test]
    fn a_point_covered_twice_is_a_conflict() {
        let cs = ContentStreamId::new();
        let err = assemble_node_aggregate(&[row("page", cs, "mul", "de"), row("page", cs, "de", "de")]).unwrap_err();
        assert!(matches!(err, AssemblyError::ConflictingOccupation { .. }));
    }

    #[test]
    fn many_aggregates_keep_first_seen_order() {
        let cs = ContentStreamId::new();
        let rows = vec![
            row("zebra", cs, "mul", "mul"),
            row("apple", cs, "mul", "mul"),
            row("zebra", cs, "mul", "en"),
        ];
        let aggregates = assemble_node_aggregates(rows).unwrap();
        let ids: Vec<_> = aggregates.iter().map(|a| a.node_aggregate_id().as_str()).collect();
        assert_eq!(ids, vec!["zebra", "apple"]);
        assert_eq!(aggregates[0].covered_dimension_space_points().len(), 2);
    }

    #[test]
    fn streaming_rejects_interleaved_partitions() {
        let cs = ContentStreamId::new();
        let contiguous = vec![row("a", cs, "mul", "mul"), row("a", cs, "mul", "en"), row("b", cs, "de", "de")];
        let assembled: Vec<_> = NodeAggregateStream::new(contiguous).collect::<Result<_, _>>().unwrap();
        assert_eq!(assembled.len(), 2);

        let interleaved = vec![row("a", cs, "mul", "mul"), row("b", cs, "de", "de"), row("a", cs, "mul", "en")];
        let mut stream = NodeAggregateStream::new(interleaved);
        assert!(stream.next().unwrap().is_ok());
        assert!(stream.next().unwrap().is_ok());
        assert_eq!(
            stream.next().unwrap().unwrap_err(),
            AssemblyError::NonContiguousPartition(NodeAggregateId::new("a").unwrap())
        );
        assert!(stream.next().is_none());
    }

    #[test]
    fn partitioned_streaming_keeps_no_closed_ids() {
        let cs = ContentStreamId::new();
        let rows = vec![row("a", cs, "mul", "mul"), row("a", cs, "mul", "en"), row("b", cs, "de", "de")];
        let mut stream = NodeAggregateStream::partitioned(rows);
        assert_eq!(stream.next().unwrap().unwrap().covered_dimension_space_points().len(), 2);
        assert_eq!(stream.next().unwrap().unwrap().node_aggregate_id().as_str(), "b");
        assert!(stream.next().is_none());
        assert!(stream.closed.is_none());

        let interleaved = vec![row("a", cs, "mul", "mul"), row("b", cs, "de", "de"), row("a", cs, "mul", "en")];
        let ids: Vec<String> = NodeAggregateStream::partitioned(interleaved)
            .map(|aggregate| aggregate.unwrap().node_aggregate_id().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "a"]);
    }

    #[test]
    fn nearest_origin_and_distribution_follow_the_graph() {
        let graph = language_graph();
        let cs = ContentStreamId::new();
        let rows = vec![
            row("page", cs, "mul", "mul"),
            row("page", cs, "mul", "en"),
            row("page", cs, "de", "de"),
            row("page", cs, "de", "gsw"),
        ];
        let aggregate = assemble_node_aggregate(&rows).unwrap().unwrap();

        assert_eq!(aggregate.nearest_occupied_origin(&point("gsw"), &graph).unwrap(), Some(origin("de")));
        assert_eq!(aggregate.nearest_occupied_origin(&point("en"), &graph).unwrap(), Some(origin("mul")));

        let scatter = aggregate
            .affected_dimension_space_points(RelationDistributionStrategy::Scatter, &point("de"), &graph)
            .unwrap();
        assert_eq!(scatter, DimensionSpacePointSet::new([point("de")]));

        let gathered = aggregate
            .affected_dimension_space_points(RelationDistributionStrategy::GatherSpecializations, &point("de"), &graph)
            .unwrap();
        assert_eq!(gathered, DimensionSpacePointSet::new([point("de"), point("gsw")]));

        let all = aggregate
            .affected_dimension_space_points(RelationDistributionStrategy::GatherAll, &point("de"), &graph)
            .unwrap();
        assert_eq!(all.len(), 4);
    }

    proptest! {
        #[test]
        fn assembly_does_not_depend_on_row_order(seed in any::<u64>()) {
            let cs = ContentStreamId::from_uuid(uuid::Uuid::from_u128(7));
            let mut rows = vec![
                row("page", cs, "mul", "mul"),
                row("page", cs, "mul", "en"),
                row("page", cs, "de", "de"),
                row("page", cs, "de", "gsw"),
            ];
            let expected = assemble_node_aggregate(&rows).unwrap();

            let mut state = seed;
            for i in (1..rows.len()).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let j = (state >> 33) as usize % (i + 1);
                rows.swap(i, j);
            }
            prop_assert_eq!(assemble_node_aggregate(&rows).unwrap(), expected);
        }
    }
}
