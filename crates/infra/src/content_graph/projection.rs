use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use anyhow::{Context, bail};
use tracing::debug;

use contentrepo_core::{ContentStreamId, NodeAggregateId};
use contentrepo_events::{EventEnvelope, Projection};

use super::assembler::{AssemblyError, NodeAggregateStream, NodeRow, assemble_node_aggregate};
use super::events::{
    ContentGraphEvent, NodeAggregateWasDisabled, NodeAggregateWasEnabled,
    NodeAggregateWithNodeWasCreated, NodeVariantWasCreated,
};
use super::node_aggregate::NodeAggregate;

type AggregateKey = (ContentStreamId, NodeAggregateId);

/// Coverage rows keyed by covered point hash: one row per covered point.
type CoverageRows = BTreeMap<String, NodeRow>;

/// In-memory content graph read model.
///
/// Stores one row per (aggregate, covered point) and answers queries through
/// the assembler. Applying the same event twice leaves the rows unchanged.
#[derive(Debug, Default)]
pub struct InMemoryContentGraphProjection {
    rows: RwLock<BTreeMap<AggregateKey, CoverageRows>>,
}

impl InMemoryContentGraphProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_node_aggregate(
        &self,
        content_stream_id: ContentStreamId,
        node_aggregate_id: &NodeAggregateId,
    ) -> Result<Option<NodeAggregate>, AssemblyError> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        let Some(coverage) = rows.get(&(content_stream_id, node_aggregate_id.clone())) else {
            return Ok(None);
        };
        let coverage: Vec<NodeRow> = coverage.values().cloned().collect();
        assemble_node_aggregate(&coverage)
    }

    /// Every aggregate of the content stream, ordered by aggregate id.
    pub fn find_node_aggregates(
        &self,
        content_stream_id: ContentStreamId,
    ) -> Result<Vec<NodeAggregate>, AssemblyError> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        let stream_rows: Vec<NodeRow> = rows
            .iter()
            .filter(|((cs, _), _)| *cs == content_stream_id)
            .flat_map(|(_, coverage)| coverage.values().cloned())
            .collect();
        NodeAggregateStream::new(stream_rows).collect()
    }

    pub fn row_count(&self) -> usize {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        rows.values().map(BTreeMap::len).sum()
    }

    fn node_aggregate_with_node_was_created(
        rows: &mut BTreeMap<AggregateKey, CoverageRows>,
        event: &NodeAggregateWithNodeWasCreated,
    ) {
        let coverage = rows
            .entry((event.content_stream_id, event.node_aggregate_id.clone()))
            .or_default();
        for covered in &event.covered_dimension_space_points {
            coverage.insert(
                covered.hash().to_string(),
                NodeRow {
                    node_aggregate_id: event.node_aggregate_id.clone(),
                    content_stream_id: event.content_stream_id,
                    node_type_name: event.node_type_name.clone(),
                    node_name: event.node_name.clone(),
                    classification: event.classification,
                    origin_dimension_space_point: event.origin_dimension_space_point.clone(),
                    covered_dimension_space_point: covered.clone(),
                    disabled_dimension_space_point_hash: None,
                },
            );
        }
    }

    fn node_variant_was_created(
        rows: &mut BTreeMap<AggregateKey, CoverageRows>,
        event: &NodeVariantWasCreated,
    ) -> anyhow::Result<()> {
        let Some(coverage) = rows.get_mut(&(event.content_stream_id, event.node_aggregate_id.clone())) else {
            bail!("node aggregate '{}' does not exist", event.node_aggregate_id);
        };
        let template = coverage
            .values()
            .find(|row| row.origin_dimension_space_point == event.source_origin)
            .cloned()
            .with_context(|| {
                format!(
                    "node aggregate '{}' does not occupy {}",
                    event.node_aggregate_id, event.source_origin
                )
            })?;

        for covered in &event.variant_coverage {
            let disabled = coverage
                .get(covered.hash())
                .and_then(|row| row.disabled_dimension_space_point_hash.clone());
            coverage.insert(
                covered.hash().to_string(),
                NodeRow {
                    origin_dimension_space_point: event.variant_origin.clone(),
                    covered_dimension_space_point: covered.clone(),
                    disabled_dimension_space_point_hash: disabled,
                    ..template.clone()
                },
            );
        }
        Ok(())
    }

    fn set_disabled(
        rows: &mut BTreeMap<AggregateKey, CoverageRows>,
        content_stream_id: ContentStreamId,
        node_aggregate_id: &NodeAggregateId,
        affected: &contentrepo_dimension::DimensionSpacePointSet,
        disabled: bool,
    ) -> anyhow::Result<()> {
        let Some(coverage) = rows.get_mut(&(content_stream_id, node_aggregate_id.clone())) else {
            bail!("node aggregate '{node_aggregate_id}' does not exist");
        };
        for point in affected {
            if let Some(row) = coverage.get_mut(point.hash()) {
                row.disabled_dimension_space_point_hash = disabled.then(|| point.hash().to_string());
            }
        }
        Ok(())
    }
}

impl Projection for InMemoryContentGraphProjection {
    type Ev = ContentGraphEvent;

    fn handles(&self, event_type: &str) -> bool {
        ContentGraphEvent::EVENT_TYPES.contains(&event_type)
    }

    fn apply(&self, envelope: &EventEnvelope<Self::Ev>) -> anyhow::Result<()> {
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        let event = envelope.payload();
        debug!(
            event_type = envelope.event_type(),
            sequence_number = %envelope.sequence_number(),
            node_aggregate_id = %event.node_aggregate_id(),
            "applying content graph event"
        );

        match event {
            ContentGraphEvent::NodeAggregateWithNodeWasCreated(e) => {
                Self::node_aggregate_with_node_was_created(&mut rows, e);
                Ok(())
            }
            ContentGraphEvent::NodeVariantWasCreated(e) => Self::node_variant_was_created(&mut rows, e),
            ContentGraphEvent::NodeAggregateWasDisabled(NodeAggregateWasDisabled {
                content_stream_id,
                node_aggregate_id,
                affected_dimension_space_points,
            }) => Self::set_disabled(
                &mut rows,
                *content_stream_id,
                node_aggregate_id,
                affected_dimension_space_points,
                true,
            ),
            ContentGraphEvent::NodeAggregateWasEnabled(NodeAggregateWasEnabled {
                content_stream_id,
                node_aggregate_id,
                affected_dimension_space_points,
            }) => Self::set_disabled(
                &mut rows,
                *content_stream_id,
                node_aggregate_id,
                affected_dimension_space_points,
                false,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use contentrepo_core::NodeTypeName;
    use contentrepo_dimension::{DimensionSpacePoint, DimensionSpacePointSet, OriginDimensionSpacePoint};
    use contentrepo_events::SequenceNumber;

    use super::*;
    use crate::content_graph::NodeAggregateClassification;

    fn point(language: &str) -> DimensionSpacePoint {
        DimensionSpacePoint::new([("language", language)]).unwrap()
    }

    fn envelope(seq: u64, event: ContentGraphEvent) -> EventEnvelope<ContentGraphEvent> {
        use contentrepo_events::Event;
        EventEnvelope::new(
            Uuid::now_v7(),
            event.stream_name(),
            seq,
            SequenceNumber::new(seq),
            event.event_type(),
            Utc::now(),
            event,
        )
    }

    fn created(cs: ContentStreamId) -> ContentGraphEvent {
        ContentGraphEvent::NodeAggregateWithNodeWasCreated(NodeAggregateWithNodeWasCreated {
            content_stream_id: cs,
            node_aggregate_id: NodeAggregateId::new("nody-mc-nodeface").unwrap(),
            node_type_name: NodeTypeName::new("Acme:Document").unwrap(),
            node_name: None,
            classification: NodeAggregateClassification::Regular,
            origin_dimension_space_point: OriginDimensionSpacePoint::from_dimension_space_point(point("en")),
            covered_dimension_space_points: DimensionSpacePointSet::new([point("en"), point("de")]),
        })
    }

    #[test]
    fn variants_take_over_coverage_and_replays_are_harmless() {
        let projection = InMemoryContentGraphProjection::new();
        let cs = ContentStreamId::new();
        let id = NodeAggregateId::new("nody-mc-nodeface").unwrap();
        let variant = ContentGraphEvent::NodeVariantWasCreated(NodeVariantWasCreated {
            content_stream_id: cs,
            node_aggregate_id: id.clone(),
            source_origin: OriginDimensionSpacePoint::from_dimension_space_point(point("en")),
            variant_origin: OriginDimensionSpacePoint::from_dimension_space_point(point("de")),
            variant_coverage: DimensionSpacePointSet::new([point("de")]),
        });

        projection.apply(&envelope(1, created(cs))).unwrap();
        projection.apply(&envelope(2, variant.clone())).unwrap();
        projection.apply(&envelope(2, variant)).unwrap();

        let aggregate = projection.find_node_aggregate(cs, &id).unwrap().unwrap();
        assert_eq!(aggregate.occupied_dimension_space_points().len(), 2);
        assert_eq!(
            aggregate.occupation(&point("de")).unwrap().as_dimension_space_point(),
            &point("de")
        );
        assert_eq!(projection.row_count(), 2);
    }

    #[test]
    fn disabling_marks_only_covered_points() {
        let projection = InMemoryContentGraphProjection::new();
        let cs = ContentStreamId::new();
        let id = NodeAggregateId::new("nody-mc-nodeface").unwrap();
        projection.apply(&envelope(1, created(cs))).unwrap();

        let affected = DimensionSpacePointSet::new([point("de"), point("fr")]);
        projection
            .apply(&envelope(
                2,
                ContentGraphEvent::NodeAggregateWasDisabled(NodeAggregateWasDisabled {
                    content_stream_id: cs,
                    node_aggregate_id: id.clone(),
                    affected_dimension_space_points: affected.clone(),
                }),
            ))
            .unwrap();
        let aggregate = projection.find_node_aggregate(cs, &id).unwrap().unwrap();
        assert_eq!(aggregate.disabled_dimension_space_points(), &DimensionSpacePointSet::new([point("de")]));

        projection
            .apply(&envelope(
                3,
                ContentGraphEvent::NodeAggregateWasEnabled(NodeAggregateWasEnabled {
                    content_stream_id: cs,
                    node_aggregate_id: id.clone(),
                    affected_dimension_space_points: affected,
                }),
            ))
            .unwrap();
        let aggregate = projection.find_node_aggregate(cs, &id).unwrap().unwrap();
        assert!(aggregate.disabled_dimension_space_points().is_empty());
    }

    #[test]
    fn events_for_unknown_aggregates_fail() {
        let projection = InMemoryContentGraphProjection::new();
        let err = projection
            .apply(&envelope(
                1,
                ContentGraphEvent::NodeAggregateWasDisabled(NodeAggregateWasDisabled {
                    content_stream_id: ContentStreamId::new(),
                    node_aggregate_id: NodeAggregateId::new("ghost").unwrap(),
                    affected_dimension_space_points: DimensionSpacePointSet::empty(),
                }),
            ))
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
        assert!(projection.handles("NodeVariantWasCreated"));
        assert!(!projection.handles("ContentStreamWasForked"));
    }

    #[test]
    fn aggregates_are_scoped_to_their_content_stream() {
        let projection = InMemoryContentGraphProjection::new();
        let live = ContentStreamId::new();
        let draft = ContentStreamId::new();
        projection.apply(&envelope(1, created(live))).unwrap();

        assert_eq!(projection.find_node_aggregates(live).unwrap().len(), 1);
        assert!(projection.find_node_aggregates(draft).unwrap().is_empty());
        assert!(
            projection
                .find_node_aggregate(draft, &NodeAggregateId::new("nody-mc-nodeface").unwrap())
                .unwrap()
                .is_none()
        );
    }
}
