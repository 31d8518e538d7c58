//! Owned interning table for dimension space points.
//!
//! One table is scoped to one content repository instance (the variation graph
//! owns one). Interning hands out the pooled instance for a hash so that equal
//! points share their coordinate storage.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use contentrepo_core::DomainResult;

use crate::point::DimensionSpacePoint;

#[derive(Debug, Default)]
pub struct DimensionSpacePointInterner {
    pool: RwLock<HashMap<String, DimensionSpacePoint>>,
}

impl DimensionSpacePointInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the pooled instance equal to `point`, pooling `point` if it is new.
    pub fn intern(&self, point: DimensionSpacePoint) -> DimensionSpacePoint {
        {
            let pool = self.pool.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = pool.get(point.hash()) {
                return existing.clone();
            }
        }

        let mut pool = self.pool.write().unwrap_or_else(PoisonError::into_inner);
        pool.entry(point.hash().to_string())
            .or_insert(point)
            .clone()
    }

    pub fn intern_coordinates<K, V>(
        &self,
        coordinates: impl IntoIterator<Item = (K, V)>,
    ) -> DomainResult<DimensionSpacePoint>
    where
        K: Into<String>,
        V: Into<String>,
    {
        DimensionSpacePoint::new(coordinates).map(|p| self.intern(p))
    }

    pub fn intern_json(&self, json: &str) -> DomainResult<DimensionSpacePoint> {
        DimensionSpacePoint::from_json_str(json).map(|p| self.intern(p))
    }

    pub fn get(&self, hash: &str) -> Option<DimensionSpacePoint> {
        let pool = self.pool.read().unwrap_or_else(PoisonError::into_inner);
        pool.get(hash).cloned()
    }

    pub fn len(&self) -> usize {
        self.pool.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_points_are_pooled_once() {
        let interner = DimensionSpacePointInterner::new();
        let a = interner.intern_coordinates([("language", "de")]).unwrap();
        let b = interner.intern_json(r#"{"language":"de"}"#).unwrap();
        let c = interner.intern_coordinates([("language", "en")]).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(interner.len(), 2);
        assert_eq!(interner.get(a.hash()), Some(a));
    }

    #[test]
    fn separate_tables_do_not_share_state() {
        let first = DimensionSpacePointInterner::new();
        let second = DimensionSpacePointInterner::new();
        first.intern_coordinates([("language", "de")]).unwrap();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }
}
