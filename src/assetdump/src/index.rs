//! Insertion-ordered (path → label → count) index

use std::collections::HashMap;

use serde::ser::{Serialize, SerializeMap, Serializer};

/// Labels observed under one container path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEntry {
    pub path: String,
    /// (label, count) in first-seen order; counts are at least 1
    pub types: Vec<(String, usize)>,
}

impl PathEntry {
    pub fn count(&self, label: &str) -> Option<usize> {
        self.types
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, count)| *count)
    }
}

/// Finished index for one input file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathTypeIndex {
    entries: Vec<PathEntry>,
    lookup: HashMap<String, usize>,
}

impl PathTypeIndex {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Paths in first-seen order
    pub fn iter(&self) -> impl Iterator<Item = &PathEntry> {
        self.entries.iter()
    }

    pub fn path(&self, path: &str) -> Option<&PathEntry> {
        self.lookup.get(path).map(|&i| &self.entries[i])
    }

    pub fn get(&self, path: &str, label: &str) -> Option<usize> {
        self.path(path)?.count(label)
    }

    /// Sum of all counts
    pub fn total(&self) -> usize {
        self.entries
            .iter()
            .flat_map(|e| e.types.iter().map(|(_, count)| count))
            .sum()
    }
}

impl<'a> IntoIterator for &'a PathTypeIndex {
    type Item = &'a PathEntry;
    type IntoIter = std::slice::Iter<'a, PathEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Serializes as `{ path: { label: count } }`, keeping insertion order
impl Serialize for PathTypeIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(&entry.path, &Counts(&entry.types))?;
        }
        map.end()
    }
}

struct Counts<'a>(&'a [(String, usize)]);

impl Serialize for Counts<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (label, count) in self.0 {
            map.serialize_entry(label, count)?;
        }
        map.end()
    }
}

/// Accumulates (path, label) observations for one input file
#[derive(Debug, Default)]
pub struct PathTypeAggregator {
    index: PathTypeIndex,
}

impl PathTypeAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, path: &str, label: &str) {
        let index = &mut self.index;
        let slot = match index.lookup.get(path) {
            Some(&i) => i,
            None => {
                index.entries.push(PathEntry {
                    path: path.to_string(),
                    types: Vec::new(),
                });
                index.lookup.insert(path.to_string(), index.entries.len() - 1);
                index.entries.len() - 1
            }
        };

        let types = &mut index.entries[slot].types;
        match types.iter_mut().find(|(l, _)| l == label) {
            Some((_, count)) => *count += 1,
            None => types.push((label.to_string(), 1)),
        }
    }

    pub fn finalize(self) -> PathTypeIndex {
        self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_of(pairs: &[(&str, &str)]) -> PathTypeIndex {
        let mut aggregator = PathTypeAggregator::new();
        for (path, label) in pairs {
            aggregator.observe(path, label);
        }
        aggregator.finalize()
    }

    #[test]
    fn test_counts_duplicates() {
        let index = index_of(&[("assets/shared.fbx", "Mesh"), ("assets/shared.fbx", "Mesh")]);
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("assets/shared.fbx", "Mesh"), Some(2));
        assert_eq!(index.get("assets/shared.fbx", "Texture2D"), None);
        assert_eq!(index.total(), 2);
    }

    #[test]
    fn test_insertion_order_at_both_levels() {
        let index = index_of(&[
            ("z/last.png", "Texture2D"),
            ("a/first.prefab", "GameObject"),
            ("z/last.png", "Sprite"),
            ("z/last.png", "Texture2D"),
            ("m/middle.mat", "Material"),
        ]);

        let paths: Vec<&str> = index.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["z/last.png", "a/first.prefab", "m/middle.mat"]);

        let last = index.path("z/last.png").unwrap();
        assert_eq!(
            last.types,
            vec![("Texture2D".to_string(), 2), ("Sprite".to_string(), 1)]
        );
        assert_eq!(index.total(), 5);
    }

    #[test]
    fn test_empty() {
        let index = PathTypeAggregator::new().finalize();
        assert!(index.is_empty());
        assert_eq!(index.total(), 0);
        assert_eq!(serde_json::to_string(&index).unwrap(), "{}");
    }

    #[test]
    fn test_json_keeps_order() {
        let index = index_of(&[
            ("assets/b.mat", "Material"),
            ("assets/a.png", "Texture2D"),
            ("assets/a.png", "Sprite"),
        ]);
        assert_eq!(
            serde_json::to_string(&index).unwrap(),
            r#"{"assets/b.mat":{"Material":1},"assets/a.png":{"Texture2D":1,"Sprite":1}}"#
        );
    }
}
