//! Immutable sets of dimension space points, keyed by point hash.
//!
//! All operations return new sets; iteration is in hash order, which keeps
//! every derived computation deterministic.

use std::collections::BTreeMap;
use std::collections::btree_map;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::point::{DimensionSpacePoint, OriginDimensionSpacePoint};

macro_rules! impl_point_set {
    ($set:ident, $point:ty) => {
        #[derive(Clone, Default, PartialEq, Eq)]
        pub struct $set {
            points: BTreeMap<String, $point>,
        }

        impl $set {
            pub fn new(points: impl IntoIterator<Item = $point>) -> Self {
                Self {
                    points: points
                        .into_iter()
                        .map(|p| (p.hash().to_string(), p))
                        .collect(),
                }
            }

            pub fn empty() -> Self {
                Self::default()
            }

            pub fn len(&self) -> usize {
                self.points.len()
            }

            pub fn is_empty(&self) -> bool {
                self.points.is_empty()
            }

            pub fn contains(&self, point: &$point) -> bool {
                self.points.contains_key(point.hash())
            }

            pub fn contains_hash(&self, hash: &str) -> bool {
                self.points.contains_key(hash)
            }

            pub fn get(&self, hash: &str) -> Option<&$point> {
                self.points.get(hash)
            }

            pub fn iter(&self) -> btree_map::Values<'_, String, $point> {
                self.points.values()
            }

            pub fn hashes(&self) -> impl Iterator<Item = &str> {
                self.points.keys().map(String::as_str)
            }

            /// A copy of this set with `point` added.
            pub fn with(&self, point: $point) -> Self {
                let mut points = self.points.clone();
                points.insert(point.hash().to_string(), point);
                Self { points }
            }

            pub fn union(&self, other: &Self) -> Self {
                let mut points = self.points.clone();
                for (hash, point) in &other.points {
                    points.entry(hash.clone()).or_insert_with(|| point.clone());
                }
                Self { points }
            }

            pub fn intersection(&self, other: &Self) -> Self {
                Self {
                    points: self
                        .points
                        .iter()
                        .filter(|(hash, _)| other.points.contains_key(*hash))
                        .map(|(hash, point)| (hash.clone(), point.clone()))
                        .collect(),
                }
            }

            pub fn difference(&self, other: &Self) -> Self {
                Self {
                    points: self
                        .points
                        .iter()
                        .filter(|(hash, _)| !other.points.contains_key(*hash))
                        .map(|(hash, point)| (hash.clone(), point.clone()))
                        .collect(),
                }
            }

            pub fn is_subset_of(&self, other: &Self) -> bool {
                self.points.keys().all(|hash| other.points.contains_key(hash))
            }

            /// Order-insensitive equality.
            pub fn equals(&self, other: &Self) -> bool {
                self == other
            }
        }

        impl FromIterator<$point> for $set {
            fn from_iter<I: IntoIterator<Item = $point>>(iter: I) -> Self {
                Self::new(iter)
            }
        }

        impl<'a> IntoIterator for &'a $set {
            type Item = &'a $point;
            type IntoIter = btree_map::Values<'a, String, $point>;

            fn into_iter(self) -> Self::IntoIter {
                self.points.values()
            }
        }

        impl IntoIterator for $set {
            type Item = $point;
            type IntoIter = btree_map::IntoValues<String, $point>;

            fn into_iter(self) -> Self::IntoIter {
                self.points.into_values()
            }
        }

        impl core::fmt::Debug for $set {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.debug_set().entries(self.points.values()).finish()
            }
        }

        impl Serialize for $set {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_seq(self.points.values())
            }
        }

        impl<'de> Deserialize<'de> for $set {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                Ok(Self::new(Vec::<$point>::deserialize(deserializer)?))
            }
        }
    };
}

impl_point_set!(DimensionSpacePointSet, DimensionSpacePoint);
impl_point_set!(OriginDimensionSpacePointSet, OriginDimensionSpacePoint);

impl OriginDimensionSpacePointSet {
    pub fn to_dimension_space_point_set(&self) -> DimensionSpacePointSet {
        self.iter()
            .map(OriginDimensionSpacePoint::to_dimension_space_point)
            .collect()
    }
}

impl DimensionSpacePointSet {
    pub fn to_origin_dimension_space_point_set(&self) -> OriginDimensionSpacePointSet {
        self.iter()
            .cloned()
            .map(OriginDimensionSpacePoint::from_dimension_space_point)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn lang(value: &str) -> DimensionSpacePoint {
        DimensionSpacePoint::new([("language", value)]).unwrap()
    }

    fn set(values: &[&str]) -> DimensionSpacePointSet {
        values.iter().map(|v| lang(v)).collect()
    }

    #[test]
    fn set_algebra_returns_new_sets() {
        let a = set(&["de", "en", "fr"]);
        let b = set(&["en", "it"]);

        assert_eq!(a.union(&b), set(&["de", "en", "fr", "it"]));
        assert_eq!(a.intersection(&b), set(&["en"]));
        assert_eq!(a.difference(&b), set(&["de", "fr"]));
        // Operands are untouched.
        assert_eq!(a.len(), 3);
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn equality_is_order_insensitive_and_deduplicates() {
        let a = set(&["de", "en", "de"]);
        let b = set(&["en", "de"]);
        assert!(a.equals(&b));
        assert_eq!(a.len(), 2);
        assert!(a.contains(&lang("de")));
        assert!(!a.contains(&lang("fr")));
    }

    #[test]
    fn serializes_as_a_list_of_points() {
        let a = set(&["de"]);
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, r#"[{"language":"de"}]"#);
        let back: DimensionSpacePointSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn origin_sets_convert_to_point_sets() {
        let origins = set(&["de", "en"]).to_origin_dimension_space_point_set();
        assert!(origins.contains(&OriginDimensionSpacePoint::from_dimension_space_point(lang("en"))));
        assert_eq!(origins.to_dimension_space_point_set(), set(&["de", "en"]));
    }

    fn arb_set() -> impl Strategy<Value = DimensionSpacePointSet> {
        prop::collection::vec("[a-e]{1,2}", 0..8)
            .prop_map(|values| values.iter().map(|v| lang(v)).collect())
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        #[test]
        fn union_and_intersection_are_commutative(a in arb_set(), b in arb_set()) {
            prop_assert_eq!(a.union(&b), b.union(&a));
            prop_assert_eq!(a.intersection(&b), b.intersection(&a));
        }

        #[test]
        fn difference_partitions_the_left_operand(a in arb_set(), b in arb_set()) {
            let diff = a.difference(&b);
            let common = a.intersection(&b);
            prop_assert!(diff.intersection(&b).is_empty());
            prop_assert_eq!(diff.union(&common), a.clone());
            prop_assert!(common.is_subset_of(&a) && common.is_subset_of(&b));
        }
    }
}
