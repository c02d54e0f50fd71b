//! Iteration artifacts for `{{#each}}`.

use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value as Json;

use super::reference::{property, ConstReference, Opaque, Reference, ReferenceRc, Tag};

/// How each item's identity is derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationKey {
    /// `@index`: position in the list.
    Index,
    /// `@identity`: the item's own value.
    Identity,
    /// A dotted property path on the item.
    Path(Vec<String>),
}

impl IterationKey {
    /// Parse a `key=` argument; null means `@identity`.
    pub fn parse(key: &Opaque) -> Self {
        match key.as_json() {
            Some(Json::String(s)) if s == "@index" => IterationKey::Index,
            Some(Json::String(s)) if s == "@identity" || s.is_empty() => IterationKey::Identity,
            Some(Json::String(s)) => IterationKey::Path(s.split('.').map(str::to_string).collect()),
            _ => IterationKey::Identity,
        }
    }

    fn key_for(&self, index: usize, item: &Opaque) -> String {
        let identity = |value: &Opaque| match value.as_json() {
            Some(Json::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => format!("component:{}", index),
        };
        match self {
            IterationKey::Index => index.to_string(),
            IterationKey::Identity => identity(item),
            IterationKey::Path(path) => {
                let value = path.iter().fold(item.clone(), |v, k| v.get(k));
                identity(&value)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct IterationItem {
    pub key: String,
    pub value: ReferenceRc,
    pub memo: ReferenceRc,
}

/// A list reference together with its keying policy.
pub struct IterationArtifacts {
    list: ReferenceRc,
    key: IterationKey,
}

impl IterationArtifacts {
    pub fn new(list: ReferenceRc, key: IterationKey) -> Rc<Self> {
        Rc::new(Self { list, key })
    }

    fn len(&self) -> usize {
        match self.list.value().as_json() {
            Some(Json::Array(items)) => items.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tag(&self) -> Tag {
        self.list.tag()
    }

    /// Snapshot of the current items. Duplicate keys get a numeric suffix so
    /// every key in one pass is unique.
    pub fn items(&self) -> Vec<IterationItem> {
        let mut seen: HashMap<String, usize> = HashMap::new();
        (0..self.len())
            .map(|index| {
                let value = property(self.list.clone(), &index.to_string());
                let mut key = self.key.key_for(index, &value.value());
                let count = seen.entry(key.clone()).or_insert(0);
                if *count > 0 {
                    key = format!("{}-{}", key, count);
                }
                *count += 1;
                IterationItem {
                    key,
                    value,
                    memo: ConstReference::new(Json::from(index)),
                }
            })
            .collect()
    }
}

/// Cursor over a snapshot of the list taken at `PutIterator`.
pub struct ReferenceIterator {
    artifacts: Rc<IterationArtifacts>,
    items: Vec<IterationItem>,
    position: usize,
}

impl ReferenceIterator {
    pub fn new(artifacts: Rc<IterationArtifacts>) -> Self {
        let items = artifacts.items();
        Self {
            artifacts,
            items,
            position: 0,
        }
    }

    pub fn artifacts(&self) -> &Rc<IterationArtifacts> {
        &self.artifacts
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn next(&mut self) -> Option<IterationItem> {
        let item = self.items.get(self.position).cloned()?;
        self.position += 1;
        Some(item)
    }
}

/// `!is_empty()` of a list, recomputed on read and sharing the list's tag.
pub struct IterablePresenceReference {
    artifacts: Rc<IterationArtifacts>,
}

impl IterablePresenceReference {
    pub fn new(artifacts: Rc<IterationArtifacts>) -> ReferenceRc {
        Rc::new(Self { artifacts })
    }
}

impl Reference for IterablePresenceReference {
    fn value(&self) -> Opaque {
        Opaque::Data(Json::Bool(!self.artifacts.is_empty()))
    }

    fn tag(&self) -> Tag {
        self.artifacts.tag()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::reference::RootReference;
    use serde_json::json;

    #[test]
    fn test_iterator_yields_items_in_order() {
        let list = RootReference::new(json!(["a", "b", "c"]));
        let artifacts = IterationArtifacts::new(list, IterationKey::Index);
        let mut iter = ReferenceIterator::new(artifacts);

        let keys: Vec<String> = std::iter::from_fn(|| iter.next()).map(|i| i.key).collect();
        assert_eq!(keys, vec!["0", "1", "2"]);
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_identity_keys_are_unique() {
        let list = RootReference::new(json!(["x", "x", "y"]));
        let artifacts = IterationArtifacts::new(list, IterationKey::Identity);
        let keys: Vec<String> = artifacts.items().into_iter().map(|i| i.key).collect();
        assert_eq!(keys, vec!["x", "x-1", "y"]);
    }

    #[test]
    fn test_path_keys() {
        let list = RootReference::new(json!([{"id": 7}, {"id": 9}]));
        let key = IterationKey::parse(&Opaque::Data(json!("id")));
        assert_eq!(key, IterationKey::Path(vec!["id".into()]));
        let artifacts = IterationArtifacts::new(list, key);
        let keys: Vec<String> = artifacts.items().into_iter().map(|i| i.key).collect();
        assert_eq!(keys, vec!["7", "9"]);
    }

    #[test]
    fn test_presence_follows_list() {
        let list = RootReference::new(json!([]));
        let artifacts = IterationArtifacts::new(list.clone(), IterationKey::Identity);
        let presence = IterablePresenceReference::new(artifacts);
        assert_eq!(presence.value(), Opaque::Data(json!(false)));

        let before = presence.tag().revision();
        list.update(json!([1]));
        assert!(!presence.tag().validate(before));
        assert_eq!(presence.value(), Opaque::Data(json!(true)));
    }

    #[test]
    fn test_key_parse_defaults() {
        assert_eq!(IterationKey::parse(&Opaque::null()), IterationKey::Identity);
        assert_eq!(
            IterationKey::parse(&Opaque::Data(json!("@index"))),
            IterationKey::Index
        );
    }
}
