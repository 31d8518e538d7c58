//! Dimension space points: immutable coordinates in the dimension space.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use contentrepo_core::{DomainError, DomainResult, ValueObject};

/// Number of hex characters kept from the blake3 digest.
const HASH_LENGTH: usize = 32;

/// A coordinate in the dimension space: one value per axis.
///
/// Identity is the hash of the sorted coordinate pairs, so two points are
/// equal iff their hashes match. Cloning is cheap (the coordinates are shared).
#[derive(Clone)]
pub struct DimensionSpacePoint {
    inner: Arc<PointInner>,
}

struct PointInner {
    coordinates: BTreeMap<String, String>,
    hash: String,
}

impl DimensionSpacePoint {
    /// Create a point from `(axis, value)` pairs.
    ///
    /// Empty axis names, empty values and duplicate axes are rejected.
    pub fn new<K, V>(coordinates: impl IntoIterator<Item = (K, V)>) -> DomainResult<Self>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = BTreeMap::new();
        for (axis, value) in coordinates {
            let axis = axis.into();
            let value = value.into();
            if axis.is_empty() {
                return Err(DomainError::validation(
                    "dimension space point: axis name must not be empty",
                ));
            }
            if value.is_empty() {
                return Err(DomainError::validation(format!(
                    "dimension space point: value for axis '{axis}' must not be empty"
                )));
            }
            if map.contains_key(&axis) {
                return Err(DomainError::validation(format!(
                    "dimension space point: axis '{axis}' given more than once"
                )));
            }
            map.insert(axis, value);
        }
        Ok(Self::from_validated(map))
    }

    /// The point of a dimension space without any axes.
    pub fn zero() -> Self {
        Self::from_validated(BTreeMap::new())
    }

    /// Parse a point from its JSON object representation (`{"language":"de"}`).
    pub fn from_json_str(json: &str) -> DomainResult<Self> {
        let coordinates: BTreeMap<String, String> = serde_json::from_str(json)
            .map_err(|e| DomainError::validation(format!("dimension space point: {e}")))?;
        Self::new(coordinates)
    }

    fn from_validated(coordinates: BTreeMap<String, String>) -> Self {
        let digest = blake3::hash(canonical_json(&coordinates).as_bytes());
        let mut hash = digest.to_hex().to_string();
        hash.truncate(HASH_LENGTH);
        Self {
            inner: Arc::new(PointInner { coordinates, hash }),
        }
    }

    /// Canonical JSON representation (axes sorted by name).
    pub fn to_json(&self) -> String {
        canonical_json(&self.inner.coordinates)
    }

    /// Stable identity hash.
    pub fn hash(&self) -> &str {
        &self.inner.hash
    }

    pub fn coordinates(&self) -> &BTreeMap<String, String> {
        &self.inner.coordinates
    }

    pub fn coordinate(&self, axis: &str) -> Option<&str> {
        self.inner.coordinates.get(axis).map(String::as_str)
    }

    pub fn axes(&self) -> impl Iterator<Item = &str> {
        self.inner.coordinates.keys().map(String::as_str)
    }

    /// Whether this point has no axes at all.
    pub fn is_zero(&self) -> bool {
        self.inner.coordinates.is_empty()
    }

    /// A copy of this point with `axis` set to `value`.
    pub fn vary(&self, axis: &str, value: &str) -> DomainResult<Self> {
        let mut coordinates = self.inner.coordinates.clone();
        coordinates.insert(axis.to_string(), value.to_string());
        Self::new(coordinates)
    }

    /// Whether both points agree on every axis except `axis`, and differ in `axis`.
    pub fn is_direct_variant_in_dimension(&self, other: &Self, axis: &str) -> bool {
        if self.inner.coordinates.len() != other.inner.coordinates.len() {
            return false;
        }
        match (self.coordinate(axis), other.coordinate(axis)) {
            (Some(own), Some(theirs)) if own != theirs => {}
            _ => return false,
        }
        self.inner
            .coordinates
            .iter()
            .all(|(k, v)| k == axis || other.coordinate(k) == Some(v.as_str()))
    }

    pub fn equals(&self, other: &Self) -> bool {
        self == other
    }
}

fn canonical_json(coordinates: &BTreeMap<String, String>) -> String {
    // A string-to-string map always serializes.
    serde_json::to_string(coordinates).unwrap_or_default()
}

impl PartialEq for DimensionSpacePoint {
    fn eq(&self, other: &Self) -> bool {
        self.inner.hash == other.inner.hash
    }
}

impl Eq for DimensionSpacePoint {}

impl core::hash::Hash for DimensionSpacePoint {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.inner.hash.hash(state);
    }
}

impl PartialOrd for DimensionSpacePoint {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DimensionSpacePoint {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.inner.hash.cmp(&other.inner.hash)
    }
}

impl core::fmt::Debug for DimensionSpacePoint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "DimensionSpacePoint({})", self.to_json())
    }
}

impl core::fmt::Display for DimensionSpacePoint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.to_json())
    }
}

impl Serialize for DimensionSpacePoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.inner.coordinates.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DimensionSpacePoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let coordinates = BTreeMap::<String, String>::deserialize(deserializer)?;
        Self::new(coordinates).map_err(D::Error::custom)
    }
}

impl ValueObject for DimensionSpacePoint {}

/// A dimension space point in its role as "where a node variant was authored".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OriginDimensionSpacePoint(DimensionSpacePoint);

impl OriginDimensionSpacePoint {
    pub fn new<K, V>(coordinates: impl IntoIterator<Item = (K, V)>) -> DomainResult<Self>
    where
        K: Into<String>,
        V: Into<String>,
    {
        DimensionSpacePoint::new(coordinates).map(Self)
    }

    pub fn from_dimension_space_point(point: DimensionSpacePoint) -> Self {
        Self(point)
    }

    pub fn from_json_str(json: &str) -> DomainResult<Self> {
        DimensionSpacePoint::from_json_str(json).map(Self)
    }

    pub fn as_dimension_space_point(&self) -> &DimensionSpacePoint {
        &self.0
    }

    pub fn to_dimension_space_point(&self) -> DimensionSpacePoint {
        self.0.clone()
    }

    pub fn hash(&self) -> &str {
        self.0.hash()
    }

    pub fn to_json(&self) -> String {
        self.0.to_json()
    }
}

impl From<DimensionSpacePoint> for OriginDimensionSpacePoint {
    fn from(point: DimensionSpacePoint) -> Self {
        Self(point)
    }
}

impl core::fmt::Display for OriginDimensionSpacePoint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl ValueObject for OriginDimensionSpacePoint {}
