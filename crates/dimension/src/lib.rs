//! Dimension space: coordinates of content variation and the fallback graph between them.
//!
//! - [`DimensionSpacePoint`]: one value per axis, identified by a stable content hash
//! - [`DimensionSpacePointSet`]: immutable set algebra over points
//! - [`ContentDimension`]: an axis with its tree of specialization values
//! - [`InterDimensionalVariationGraph`]: generalization/specialization relations and
//!   weighted fallback chains over the full dimension space
//!
//! Everything in this crate is pure and deterministic; the graph is validated and
//! fully computed at construction time.

pub mod content_dimension;
pub mod interner;
pub mod point;
pub mod point_set;
pub mod variation_graph;

pub use content_dimension::{
    ContentDimension, ContentDimensionBuilder, ContentDimensionId, ContentDimensionSource,
    ContentDimensionValue,
};
pub use interner::DimensionSpacePointInterner;
pub use point::{DimensionSpacePoint, OriginDimensionSpacePoint};
pub use point_set::{DimensionSpacePointSet, OriginDimensionSpacePointSet};
pub use variation_graph::{
    InterDimensionalVariationGraph, VariantType, WeightedDimensionSpacePoint, WeightedVariation,
};
