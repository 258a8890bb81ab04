//! Keyed object map with named secondary indexes.
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// Maps an object to zero or more lookup values for one named index.
pub type IndexFunc<T> = Arc<dyn Fn(&T) -> Vec<String> + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("index already registered: {0}")]
    Duplicate(String),
    #[error("unknown index: {0}")]
    Unknown(String),
}

pub type IndexResult<T> = Result<T, IndexError>;

/// Keyed object map that keeps every registered index current on writes.
///
/// Not synchronized; owners wrap it in their own lock so a check-then-write
/// sequence stays atomic.
///
/// ```
/// use std::sync::Arc;
/// use vesta_index::IndexedMap;
///
/// let mut map: IndexedMap<(String, String)> = IndexedMap::new();
/// map.add_index("by-owner", Arc::new(|item: &(String, String)| vec![item.1.clone()]))
///     .expect("index");
/// map.insert("a", ("a".to_string(), "alice".to_string()));
/// map.insert("b", ("b".to_string(), "bob".to_string()));
/// let owned = map.by_index("by-owner", "alice").expect("lookup");
/// assert_eq!(owned.len(), 1);
/// ```
pub struct IndexedMap<T> {
    // BTreeMap keeps iteration deterministic for snapshots and lookups.
    items: BTreeMap<String, T>,
    funcs: HashMap<String, IndexFunc<T>>,
    // index name -> indexed value -> item keys
    indices: HashMap<String, HashMap<String, BTreeSet<String>>>,
}

impl<T> Default for IndexedMap<T> {
    fn default() -> Self {
        Self {
            items: BTreeMap::new(),
            funcs: HashMap::new(),
            indices: HashMap::new(),
        }
    }
}

impl<T> IndexedMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new index and backfill it from the current items.
    pub fn add_index(&mut self, name: impl Into<String>, func: IndexFunc<T>) -> IndexResult<()> {
        let name = name.into();
        if self.funcs.contains_key(&name) {
            return Err(IndexError::Duplicate(name));
        }
        let mut index: HashMap<String, BTreeSet<String>> = HashMap::new();
        for (key, item) in &self.items {
            for value in func(item) {
                index.entry(value).or_default().insert(key.clone());
            }
        }
        self.indices.insert(name.clone(), index);
        self.funcs.insert(name, func);
        Ok(())
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }

    /// Insert or replace an item, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, item: T) -> Option<T> {
        let key = key.into();
        let previous = self.items.remove(&key);
        if let Some(old) = &previous {
            self.unindex(&key, old);
        }
        self.index(&key, &item);
        self.items.insert(key, item);
        previous
    }

    pub fn remove(&mut self, key: &str) -> Option<T> {
        let removed = self.items.remove(key)?;
        self.unindex(key, &removed);
        Some(removed)
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.items.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items whose index function produced `value`, ordered by key.
    pub fn by_index(&self, name: &str, value: &str) -> IndexResult<Vec<&T>> {
        let index = self
            .indices
            .get(name)
            .ok_or_else(|| IndexError::Unknown(name.to_string()))?;
        let Some(keys) = index.get(value) else {
            return Ok(Vec::new());
        };
        Ok(keys.iter().filter_map(|key| self.items.get(key)).collect())
    }

    /// Distinct values currently present in an index, sorted.
    pub fn index_values(&self, name: &str) -> IndexResult<Vec<String>> {
        let index = self
            .indices
            .get(name)
            .ok_or_else(|| IndexError::Unknown(name.to_string()))?;
        let mut values: Vec<String> = index.keys().cloned().collect();
        values.sort();
        Ok(values)
    }

    fn index(&mut self, key: &str, item: &T) {
        for (name, func) in &self.funcs {
            let index = self.indices.entry(name.clone()).or_default();
            for value in func(item) {
                index.entry(value).or_default().insert(key.to_string());
            }
        }
    }

    fn unindex(&mut self, key: &str, item: &T) {
        for (name, func) in &self.funcs {
            let Some(index) = self.indices.get_mut(name) else {
                continue;
            };
            for value in func(item) {
                if let Some(keys) = index.get_mut(&value) {
                    keys.remove(key);
                    // Drop empty buckets so index_values only reports live values.
                    if keys.is_empty() {
                        index.remove(&value);
                    }
                }
            }
        }
    }
}
