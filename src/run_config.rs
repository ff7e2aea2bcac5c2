//! The run session's config tree.

use std::collections::BTreeMap;

use serde_json::Value;

/// Key/value configuration owned by the current run session.
///
/// Keys set explicitly by the session always win over values recovered from
/// a resumed run: `merge_resumed` only introduces keys that are absent.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunConfig {
    tree: BTreeMap<String, Value>,
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key explicitly for this session.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.tree.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.tree.get(key)
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.tree.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Merge config recovered from a resumed run.
    ///
    /// Only keys absent locally are introduced; a key the session already
    /// set is never overwritten.
    pub fn merge_resumed(&mut self, resumed: BTreeMap<String, Value>) {
        for (key, value) in resumed {
            self.tree.entry(key).or_insert(value);
        }
    }
}
