//! Namespace recommendation with a lazily sorted key list.

use std::collections::HashMap;

use serde::ser::{Serialize, SerializeMap, Serializer};

use super::NamespaceRecommendation;
use crate::types::SecurityLevel;

/// Map from namespace to level whose keys are listed in sorted order.
///
/// The sorted key list is cached and rebuilt only after a new key is added.
#[derive(Debug, Clone, Default)]
pub struct OrderedLevelMap {
    levels: HashMap<String, SecurityLevel>,
    keys: Vec<String>,
    sorted: bool,
}

impl OrderedLevelMap {
    /// Empty map.
    pub fn new() -> Self {
        Self {
            sorted: true,
            ..Self::default()
        }
    }

    /// Set `namespace` to `level`.
    pub fn set(&mut self, namespace: impl Into<String>, level: SecurityLevel) {
        let namespace = namespace.into();
        if self.levels.insert(namespace.clone(), level).is_none() {
            self.keys.push(namespace);
            self.sorted = false;
        }
    }

    /// Level for `namespace`.
    ///
    /// Returns `None` for a namespace that was never set. No default level
    /// stands in for a missing key.
    pub fn get(&self, namespace: &str) -> Option<SecurityLevel> {
        self.levels.get(namespace).copied()
    }

    /// Remove `namespace`, returning its level.
    pub fn remove(&mut self, namespace: &str) -> Option<SecurityLevel> {
        let level = self.levels.remove(namespace)?;
        // Removal keeps the remaining keys in order.
        self.keys.retain(|k| k != namespace);
        Some(level)
    }

    /// Namespaces in ascending order.
    pub fn keys(&mut self) -> Vec<String> {
        self.sort();
        self.keys.clone()
    }

    /// Number of namespaces.
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Entries in ascending namespace order.
    pub fn iter(&mut self) -> impl Iterator<Item = (&str, SecurityLevel)> {
        self.sort();
        let levels = &self.levels;
        self.keys
            .iter()
            .filter_map(move |k| levels.get(k).map(|level| (k.as_str(), *level)))
    }

    /// Whether the key cache is currently sorted.
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    fn sort(&mut self) {
        if !self.sorted {
            self.keys.sort_unstable();
            self.sorted = true;
        }
    }

    fn sorted_entries(&self) -> Vec<(&String, &SecurityLevel)> {
        let mut entries: Vec<_> = self.levels.iter().collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
        entries
    }
}

impl From<NamespaceRecommendation> for OrderedLevelMap {
    fn from(levels: NamespaceRecommendation) -> Self {
        let keys: Vec<String> = levels.keys().cloned().collect();
        let sorted = keys.is_empty();
        Self {
            levels,
            keys,
            sorted,
        }
    }
}

impl PartialEq for OrderedLevelMap {
    fn eq(&self, other: &Self) -> bool {
        self.levels == other.levels
    }
}

impl Eq for OrderedLevelMap {}

impl Serialize for OrderedLevelMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let entries = self.sorted_entries();
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (namespace, level) in entries {
            map.serialize_entry(namespace, level)?;
        }
        map.end()
    }
}
