use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A sparse, value-semantic map from resource name (`"cpu"`, `"memory"`, ...) to a
/// scalar quantity.
///
/// Entries are kept in a sorted map so iteration order, and therefore
/// [`ResourceVector::compact_string`], is deterministic. Subtracting a resource that
/// is not present treats the missing entry as zero and inserts the (possibly
/// negative) result rather than special-casing it; callers that never under-account
/// will never observe a negative entry, but nothing here clamps one away.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceVector(BTreeMap<String, f64>);

impl ResourceVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Quantity for `name`, or zero if absent.
    pub fn get(&self, name: &str) -> f64 {
        self.0.get(name).copied().unwrap_or(0.0)
    }

    pub fn add(&mut self, other: &ResourceVector) {
        for (name, amount) in &other.0 {
            *self.0.entry(name.clone()).or_insert(0.0) += amount;
        }
    }

    pub fn sub(&mut self, other: &ResourceVector) {
        for (name, amount) in &other.0 {
            *self.0.entry(name.clone()).or_insert(0.0) -= amount;
        }
    }

    pub fn is_zero(&self) -> bool {
        self.0.values().all(|v| v.abs() < f64::EPSILON)
    }

    /// A deterministic, sorted `name:quantity,...` rendering, omitting zero entries.
    pub fn compact_string(&self) -> String {
        self.0
            .iter()
            .filter(|(_, v)| v.abs() > f64::EPSILON)
            .map(|(k, v)| format!("{k}:{v}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl fmt::Display for ResourceVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "{{}}");
        }
        write!(f, "{{{}}}", self.compact_string())
    }
}

impl std::ops::AddAssign<&ResourceVector> for ResourceVector {
    fn add_assign(&mut self, rhs: &ResourceVector) {
        self.add(rhs);
    }
}

impl std::ops::SubAssign<&ResourceVector> for ResourceVector {
    fn sub_assign(&mut self, rhs: &ResourceVector) {
        self.sub(rhs);
    }
}

/// A deep-copy-on-ingest map from priority-class name to its [`ResourceVector`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriorityClassResources(BTreeMap<String, ResourceVector>);

impl PriorityClassResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, ResourceVector)>,
        K: Into<String>,
    {
        Self(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn add(&mut self, class: &str, amount: &ResourceVector) {
        self.0.entry(class.to_string()).or_default().add(amount);
    }

    pub fn sub(&mut self, class: &str, amount: &ResourceVector) {
        self.0.entry(class.to_string()).or_default().sub(amount);
    }

    pub fn get(&self, class: &str) -> ResourceVector {
        self.0.get(class).cloned().unwrap_or_default()
    }

    pub fn total(&self) -> ResourceVector {
        let mut total = ResourceVector::default();
        for vector in self.0.values() {
            total.add(vector);
        }
        total
    }

    pub fn is_zero(&self) -> bool {
        self.0.values().all(|v| v.is_zero())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResourceVector)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}
