//! Content dimensions (axes) and their specialization value trees.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use contentrepo_core::{DomainError, DomainResult};

/// Name of an axis of content variation (e.g. `language`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentDimensionId(String);

impl ContentDimensionId {
    pub fn new(value: impl Into<String>) -> DomainResult<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(DomainError::validation("content dimension id must not be empty"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ContentDimensionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One declared value of an axis together with its depth in the value tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDimensionValue {
    pub value: String,
    /// Distance to the axis root (the root has depth 0).
    pub specialization_depth: u32,
}

/// An axis with a rooted tree of values.
///
/// A child value is a specialization of its parent. Construction validates the
/// tree: every value is declared once, parents are declared, there is exactly one
/// root and no cycles.
#[derive(Debug, Clone)]
pub struct ContentDimension {
    id: ContentDimensionId,
    values: Vec<ContentDimensionValue>,
    index: HashMap<String, usize>,
    generalizations: HashMap<String, String>,
    specializations: HashMap<String, Vec<String>>,
    root: String,
    maximum_depth: u32,
}

impl ContentDimension {
    pub fn builder(id: impl Into<String>) -> ContentDimensionBuilder {
        ContentDimensionBuilder {
            id: id.into(),
            declarations: Vec::new(),
        }
    }

    /// Build an axis from `(value, generalization)` declarations in priority order.
    pub fn new(
        id: ContentDimensionId,
        declarations: Vec<(String, Option<String>)>,
    ) -> DomainResult<Self> {
        if declarations.is_empty() {
            return Err(DomainError::configuration(format!(
                "content dimension '{id}' declares no values"
            )));
        }

        let mut index = HashMap::new();
        for (position, (value, _)) in declarations.iter().enumerate() {
            if value.is_empty() {
                return Err(DomainError::configuration(format!(
                    "content dimension '{id}' declares an empty value"
                )));
            }
            if index.insert(value.clone(), position).is_some() {
                return Err(DomainError::configuration(format!(
                    "content dimension '{id}' declares value '{value}' more than once"
                )));
            }
        }

        let mut generalizations = HashMap::new();
        let mut specializations: HashMap<String, Vec<String>> = HashMap::new();
        for (value, parent) in &declarations {
            let Some(parent) = parent else { continue };
            if !index.contains_key(parent) {
                return Err(DomainError::configuration(format!(
                    "content dimension '{id}': value '{value}' specializes undeclared value '{parent}'"
                )));
            }
            generalizations.insert(value.clone(), parent.clone());
            specializations
                .entry(parent.clone())
                .or_default()
                .push(value.clone());
        }

        // Cycles must be rejected before depths are computed.
        for (value, _) in &declarations {
            let mut seen = HashSet::new();
            let mut current = value.as_str();
            while let Some(parent) = generalizations.get(current) {
                if !seen.insert(current) {
                    return Err(DomainError::configuration(format!(
                        "content dimension '{id}': specialization cycle through value '{current}'"
                    )));
                }
                current = parent;
            }
        }

        let roots: Vec<&String> = declarations
            .iter()
            .filter(|(_, parent)| parent.is_none())
            .map(|(value, _)| value)
            .collect();
        let root = match roots.as_slice() {
            [root] => (*root).clone(),
            _ => {
                return Err(DomainError::configuration(format!(
                    "content dimension '{id}' must have exactly one root value, found {}",
                    roots.len()
                )));
            }
        };

        let values: Vec<ContentDimensionValue> = declarations
            .iter()
            .map(|(value, _)| {
                let mut depth = 0;
                let mut current = value.as_str();
                while let Some(parent) = generalizations.get(current) {
                    depth += 1;
                    current = parent;
                }
                ContentDimensionValue {
                    value: value.clone(),
                    specialization_depth: depth,
                }
            })
            .collect();
        let maximum_depth = values
            .iter()
            .map(|v| v.specialization_depth)
            .max()
            .unwrap_or(0);

        Ok(Self {
            id,
            values,
            index,
            generalizations,
            specializations,
            root,
            maximum_depth,
        })
    }

    pub fn id(&self) -> &ContentDimensionId {
        &self.id
    }

    /// All values in declaration order.
    pub fn values(&self) -> &[ContentDimensionValue] {
        &self.values
    }

    pub fn value(&self, value: &str) -> Option<&ContentDimensionValue> {
        self.index.get(value).map(|&i| &self.values[i])
    }

    pub fn contains(&self, value: &str) -> bool {
        self.index.contains_key(value)
    }

    pub fn root_value(&self) -> &ContentDimensionValue {
        // The root is validated to be declared.
        self.value(&self.root).unwrap_or(&self.values[0])
    }

    pub fn generalization(&self, value: &str) -> Option<&ContentDimensionValue> {
        self.generalizations
            .get(value)
            .and_then(|parent| self.value(parent))
    }

    /// Direct specializations of `value`, in declaration order.
    pub fn specializations(&self, value: &str) -> Vec<&ContentDimensionValue> {
        self.specializations
            .get(value)
            .map(|children| children.iter().filter_map(|c| self.value(c)).collect())
            .unwrap_or_default()
    }

    /// `value` followed by its generalizations up to the root.
    pub fn ancestors_or_self(&self, value: &str) -> Vec<&ContentDimensionValue> {
        let mut chain = Vec::new();
        let mut current = self.value(value);
        while let Some(v) = current {
            chain.push(v);
            current = self.generalization(&v.value);
        }
        chain
    }

    pub fn maximum_depth(&self) -> u32 {
        self.maximum_depth
    }
}

/// Fluent builder for [`ContentDimension`].
#[derive(Debug, Clone)]
pub struct ContentDimensionBuilder {
    id: String,
    declarations: Vec<(String, Option<String>)>,
}

impl ContentDimensionBuilder {
    /// Declare a root value.
    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.declarations.push((value.into(), None));
        self
    }

    /// Declare `value` as a specialization of `generalization`.
    pub fn specialization(
        mut self,
        value: impl Into<String>,
        generalization: impl Into<String>,
    ) -> Self {
        self.declarations
            .push((value.into(), Some(generalization.into())));
        self
    }

    pub fn build(self) -> DomainResult<ContentDimension> {
        ContentDimension::new(ContentDimensionId::new(self.id)?, self.declarations)
    }
}

/// The declared axes, in priority order.
#[derive(Debug, Clone, Default)]
pub struct ContentDimensionSource {
    dimensions: Vec<ContentDimension>,
}

impl ContentDimensionSource {
    pub fn new(dimensions: Vec<ContentDimension>) -> DomainResult<Self> {
        let mut seen = HashSet::new();
        for dimension in &dimensions {
            if !seen.insert(dimension.id().clone()) {
                return Err(DomainError::configuration(format!(
                    "content dimension '{}' declared more than once",
                    dimension.id()
                )));
            }
        }
        Ok(Self { dimensions })
    }

    pub fn dimension(&self, id: &str) -> Option<&ContentDimension> {
        self.dimensions.iter().find(|d| d.id().as_str() == id)
    }

    pub fn dimensions_ordered_by_priority(&self) -> &[ContentDimension] {
        &self.dimensions
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }
}
