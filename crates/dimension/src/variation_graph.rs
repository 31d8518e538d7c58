//! The inter-dimensional variation graph.
//!
//! The allowed dimension space is the cartesian product of all axis values. A
//! point `G` generalizes a point `S` when every axis value of `G` is an ancestor
//! or the value itself of the corresponding value of `S` (and `G != S`).
//!
//! Every point carries a normalized weight: with `base = max axis depth + 1`, a
//! point with per-axis depths `d0..dn` (axes in priority order) weighs
//! `Σ dᵢ · base^(n-1-i)`. Variations are ranked by the difference of those
//! weights, which keeps the fallback order total and deterministic with the
//! first declared axis dominating.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;

use contentrepo_core::{DomainError, DomainResult};

use crate::content_dimension::ContentDimensionSource;
use crate::interner::DimensionSpacePointInterner;
use crate::point::DimensionSpacePoint;
use crate::point_set::DimensionSpacePointSet;

/// An allowed point together with its per-axis depths and normalized weight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeightedDimensionSpacePoint {
    pub point: DimensionSpacePoint,
    /// Specialization depth per axis, in axis priority order.
    pub depths: Vec<u32>,
    pub normalized_weight: u64,
}

/// A related point and its weight distance from the point it was looked up for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeightedVariation {
    pub relative_weight: u64,
    pub point: DimensionSpacePoint,
}

impl Ord for WeightedVariation {
    fn cmp(&self, other: &Self) -> Ordering {
        self.relative_weight
            .cmp(&other.relative_weight)
            .then_with(|| self.point.hash().cmp(other.point.hash()))
    }
}

impl PartialOrd for WeightedVariation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// How a subject point relates to an object point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantType {
    Same,
    /// The subject is a generalization of the object.
    Generalization,
    /// The subject is a specialization of the object.
    Specialization,
    Peer,
}

#[derive(Debug)]
pub struct InterDimensionalVariationGraph {
    dimension_source: ContentDimensionSource,
    interner: DimensionSpacePointInterner,
    weight_normalization_base: u64,
    points: Vec<WeightedDimensionSpacePoint>,
    index: HashMap<String, usize>,
    generalizations: HashMap<String, Vec<WeightedVariation>>,
    specializations: HashMap<String, Vec<WeightedVariation>>,
    primary_generalizations: HashMap<String, DimensionSpacePoint>,
}

impl InterDimensionalVariationGraph {
    /// Compute the complete graph for the given axes.
    ///
    /// Fails with a configuration error when the weights of the space do not fit
    /// into 64 bits.
    pub fn new(dimension_source: ContentDimensionSource) -> DomainResult<Self> {
        let interner = DimensionSpacePointInterner::new();
        let dimensions = dimension_source.dimensions_ordered_by_priority();

        let weight_normalization_base = dimensions
            .iter()
            .map(|d| u64::from(d.maximum_depth()) + 1)
            .max()
            .unwrap_or(0);

        let value_lists: Vec<Vec<&str>> = dimensions
            .iter()
            .map(|d| d.values().iter().map(|v| v.value.as_str()).collect())
            .collect();

        let mut points = Vec::new();
        let mut index = HashMap::new();
        for combination in cartesian_product(&value_lists) {
            let point = interner.intern_coordinates(
                dimensions
                    .iter()
                    .zip(&combination)
                    .map(|(d, value)| (d.id().as_str(), *value)),
            )?;
            let depths: Vec<u32> = dimensions
                .iter()
                .zip(&combination)
                .map(|(d, value)| d.value(value).map_or(0, |v| v.specialization_depth))
                .collect();
            let normalized_weight = normalize_weight(&depths, weight_normalization_base)?;
            index.insert(point.hash().to_string(), points.len());
            points.push(WeightedDimensionSpacePoint {
                point,
                depths,
                normalized_weight,
            });
        }

        let mut generalizations: HashMap<String, Vec<WeightedVariation>> = HashMap::new();
        let mut specializations: HashMap<String, Vec<WeightedVariation>> = HashMap::new();
        let mut primary_generalizations = HashMap::new();

        for specialization in &points {
            let ancestor_lists: Vec<Vec<&str>> = dimensions
                .iter()
                .map(|d| {
                    let own = specialization.point.coordinate(d.id().as_str()).unwrap_or_default();
                    d.ancestors_or_self(own)
                        .into_iter()
                        .map(|v| v.value.as_str())
                        .collect()
                })
                .collect();

            for combination in cartesian_product(&ancestor_lists) {
                let generalization = interner.intern_coordinates(
                    dimensions
                        .iter()
                        .zip(&combination)
                        .map(|(d, value)| (d.id().as_str(), *value)),
                )?;
                if generalization == specialization.point {
                    continue;
                }
                let generalization_weight = index
                    .get(generalization.hash())
                    .map(|&i| points[i].normalized_weight)
                    .ok_or_else(|| {
                        DomainError::invariant(format!(
                            "generalization {generalization} is outside the dimension space"
                        ))
                    })?;
                let relative_weight = specialization.normalized_weight - generalization_weight;

                generalizations
                    .entry(specialization.point.hash().to_string())
                    .or_default()
                    .push(WeightedVariation {
                        relative_weight,
                        point: generalization.clone(),
                    });
                specializations
                    .entry(generalization.hash().to_string())
                    .or_default()
                    .push(WeightedVariation {
                        relative_weight,
                        point: specialization.point.clone(),
                    });
            }

            // Among the direct parents (one axis, one step up) the lightest wins.
            let mut primary: Option<WeightedVariation> = None;
            for dimension in dimensions {
                let axis = dimension.id().as_str();
                let own = specialization.point.coordinate(axis).unwrap_or_default();
                let Some(parent) = dimension.generalization(own) else {
                    continue;
                };
                let candidate = interner.intern(specialization.point.vary(axis, &parent.value)?);
                let Some(&i) = index.get(candidate.hash()) else {
                    continue;
                };
                let variation = WeightedVariation {
                    relative_weight: specialization.normalized_weight - points[i].normalized_weight,
                    point: candidate,
                };
                if primary.as_ref().map_or(true, |p| variation < *p) {
                    primary = Some(variation);
                }
            }
            if let Some(primary) = primary {
                primary_generalizations
                    .insert(specialization.point.hash().to_string(), primary.point);
            }
        }

        for variations in generalizations.values_mut() {
            variations.sort();
        }
        for variations in specializations.values_mut() {
            variations.sort();
        }

        Ok(Self {
            dimension_source,
            interner,
            weight_normalization_base,
            points,
            index,
            generalizations,
            specializations,
            primary_generalizations,
        })
    }

    pub fn dimension_source(&self) -> &ContentDimensionSource {
        &self.dimension_source
    }

    /// The interning table holding every allowed point.
    pub fn interner(&self) -> &DimensionSpacePointInterner {
        &self.interner
    }

    pub fn weight_normalization_base(&self) -> u64 {
        self.weight_normalization_base
    }

    /// The allowed dimension space.
    pub fn dimension_space_points(&self) -> DimensionSpacePointSet {
        self.points.iter().map(|w| w.point.clone()).collect()
    }

    pub fn weighted_dimension_space_points(&self) -> &[WeightedDimensionSpacePoint] {
        &self.points
    }

    pub fn weighted_dimension_space_point(
        &self,
        point: &DimensionSpacePoint,
    ) -> Option<&WeightedDimensionSpacePoint> {
        self.weighted_dimension_space_point_by_hash(point.hash())
    }

    pub fn weighted_dimension_space_point_by_hash(
        &self,
        hash: &str,
    ) -> Option<&WeightedDimensionSpacePoint> {
        self.index.get(hash).map(|&i| &self.points[i])
    }

    pub fn contains(&self, point: &DimensionSpacePoint) -> bool {
        self.index.contains_key(point.hash())
    }

    /// Points without any generalization.
    pub fn root_generalizations(&self) -> DimensionSpacePointSet {
        self.points
            .iter()
            .filter(|w| !self.generalizations.contains_key(w.point.hash()))
            .map(|w| w.point.clone())
            .collect()
    }

    pub fn indexed_generalizations(
        &self,
        point: &DimensionSpacePoint,
    ) -> DomainResult<DimensionSpacePointSet> {
        Ok(self.weighted_generalizations(point)?.iter().map(|v| v.point.clone()).collect())
    }

    pub fn indexed_specializations(
        &self,
        point: &DimensionSpacePoint,
    ) -> DomainResult<DimensionSpacePointSet> {
        Ok(self.weighted_specializations(point)?.iter().map(|v| v.point.clone()).collect())
    }

    /// Generalizations of `point`, closest first.
    pub fn weighted_generalizations(
        &self,
        point: &DimensionSpacePoint,
    ) -> DomainResult<&[WeightedVariation]> {
        self.ensure_allowed(point)?;
        Ok(self
            .generalizations
            .get(point.hash())
            .map_or(&[][..], Vec::as_slice))
    }

    /// Specializations of `point`, closest first.
    pub fn weighted_specializations(
        &self,
        point: &DimensionSpacePoint,
    ) -> DomainResult<&[WeightedVariation]> {
        self.ensure_allowed(point)?;
        Ok(self
            .specializations
            .get(point.hash())
            .map_or(&[][..], Vec::as_slice))
    }

    /// `origin` (optionally) plus all its specializations not in `excluded`.
    pub fn specialization_set(
        &self,
        origin: &DimensionSpacePoint,
        include_origin: bool,
        excluded: Option<&DimensionSpacePointSet>,
    ) -> DomainResult<DimensionSpacePointSet> {
        let specializations = self.weighted_specializations(origin)?;
        let mut set: DimensionSpacePointSet = specializations
            .iter()
            .filter(|v| excluded.map_or(true, |e| !e.contains(&v.point)))
            .map(|v| v.point.clone())
            .collect();
        if include_origin {
            set = set.with(origin.clone());
        }
        Ok(set)
    }

    /// The direct generalization with the lowest relative weight, if any.
    pub fn primary_generalization(&self, point: &DimensionSpacePoint) -> Option<&DimensionSpacePoint> {
        self.primary_generalizations.get(point.hash())
    }

    /// The fallback order for `point`: the point itself followed by its
    /// generalizations, most specific first. The chain ends at the point whose
    /// values are all axis roots.
    pub fn generalization_chain(
        &self,
        point: &DimensionSpacePoint,
    ) -> DomainResult<Vec<DimensionSpacePoint>> {
        let generalizations = self.weighted_generalizations(point)?;
        let mut chain = Vec::with_capacity(generalizations.len() + 1);
        chain.push(self.interner.intern(point.clone()));
        chain.extend(generalizations.iter().map(|v| v.point.clone()));
        Ok(chain)
    }

    pub fn variant_type(
        &self,
        subject: &DimensionSpacePoint,
        object: &DimensionSpacePoint,
    ) -> VariantType {
        if subject == object {
            return VariantType::Same;
        }
        let related = |relations: &HashMap<String, Vec<WeightedVariation>>| {
            relations
                .get(object.hash())
                .is_some_and(|vs| vs.iter().any(|v| v.point == *subject))
        };
        if related(&self.generalizations) {
            VariantType::Generalization
        } else if related(&self.specializations) {
            VariantType::Specialization
        } else {
            VariantType::Peer
        }
    }

    fn ensure_allowed(&self, point: &DimensionSpacePoint) -> DomainResult<()> {
        if self.contains(point) {
            Ok(())
        } else {
            Err(DomainError::not_found(format!(
                "{point} was not found in the allowed dimension subspace"
            )))
        }
    }
}

fn normalize_weight(depths: &[u32], base: u64) -> DomainResult<u64> {
    let overflow = || DomainError::configuration("dimension space weights exceed 64 bits");
    let mut weight: u64 = 0;
    for (i, depth) in depths.iter().enumerate() {
        let exponent = u32::try_from(depths.len() - 1 - i).map_err(|_| overflow())?;
        let factor = base.checked_pow(exponent).ok_or_else(overflow)?;
        let term = factor.checked_mul(u64::from(*depth)).ok_or_else(overflow)?;
        weight = weight.checked_add(term).ok_or_else(overflow)?;
    }
    Ok(weight)
}

/// All combinations picking one entry per list, first list varying slowest.
fn cartesian_product<'a>(lists: &[Vec<&'a str>]) -> Vec<Vec<&'a str>> {
    lists.iter().fold(vec![Vec::new()], |combinations, list| {
        combinations
            .iter()
            .flat_map(|prefix| {
                list.iter().map(move |value| {
                    let mut next = prefix.clone();
                    next.push(*value);
                    next
                })
            })
            .collect()
    })
}
