//! Persisted, id-keyed collection
//!
//! 서비스(워크스페이스, 템플릿, 프로젝트 ...)가 소유하는 프로세스 전역 맵.
//! 모든 변경은 write lock 안에서 read-modify-write 후 파일 전체를 다시 쓴다.

use super::JsonStore;
use crate::{Error, Result};
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;

pub struct JsonCollection<T> {
    store: JsonStore,
    filename: &'static str,
    kind: &'static str,
    items: RwLock<BTreeMap<String, T>>,
}

impl<T> JsonCollection<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Load `filename` from the store (empty if absent)
    ///
    /// `kind` is used in NotFound messages ("Workspace ws-1 not found").
    pub fn open(store: JsonStore, filename: &'static str, kind: &'static str) -> Result<Self> {
        let items = store
            .load_optional::<BTreeMap<String, T>>(filename)?
            .unwrap_or_default();
        Ok(Self {
            store,
            filename,
            kind,
            items: RwLock::new(items),
        })
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.items.read().get(id).cloned()
    }

    /// Like `get`, but unknown ids are a NotFound error
    pub fn require(&self, id: &str) -> Result<T> {
        self.get(id).ok_or_else(|| Error::not_found(self.kind, id))
    }

    pub fn values(&self) -> Vec<T> {
        self.items.read().values().cloned().collect()
    }

    pub fn find(&self, predicate: impl Fn(&T) -> bool) -> Option<T> {
        self.items.read().values().find(|v| predicate(v)).cloned()
    }

    pub fn insert(&self, id: impl Into<String>, item: T) -> Result<()> {
        let mut items = self.items.write();
        items.insert(id.into(), item);
        self.persist(&items)
    }

    pub fn remove(&self, id: &str) -> Result<Option<T>> {
        let mut items = self.items.write();
        let removed = items.remove(id);
        if removed.is_some() {
            self.persist(&items)?;
        }
        Ok(removed)
    }

    /// Replace-on-copy update of one item.
    ///
    /// `f` runs against a clone; the clone replaces the stored item only if
    /// `f` succeeds, so a failed mutation leaves no partial state behind.
    pub fn update<R>(&self, id: &str, f: impl FnOnce(&mut T) -> Result<R>) -> Result<R> {
        let mut items = self.items.write();
        let current = items
            .get(id)
            .ok_or_else(|| Error::not_found(self.kind, id))?;

        let mut next = current.clone();
        let out = f(&mut next)?;
        items.insert(id.to_string(), next);
        self.persist(&items)?;
        Ok(out)
    }

    fn persist(&self, items: &BTreeMap<String, T>) -> Result<()> {
        self.store.save(self.filename, items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        value: u32,
    }

    fn open(dir: &std::path::Path) -> JsonCollection<Item> {
        JsonCollection::open(JsonStore::new(dir), "items.json", "Item").unwrap()
    }

    #[test]
    fn test_insert_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let items = open(dir.path());
        items.insert("a", Item { value: 1 }).unwrap();

        let reopened = open(dir.path());
        assert_eq!(reopened.get("a"), Some(Item { value: 1 }));
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn test_failed_update_leaves_item_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let items = open(dir.path());
        items.insert("a", Item { value: 1 }).unwrap();

        let result: Result<()> = items.update("a", |item| {
            item.value = 99;
            Err(Error::Validation("nope".into()))
        });
        assert!(result.is_err());
        assert_eq!(items.get("a").unwrap().value, 1);
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let items = open(dir.path());
        let err = items.update("ghost", |_| Ok(())).unwrap_err();
        assert_eq!(err.to_string(), "Not found: Item ghost not found");
    }
}
