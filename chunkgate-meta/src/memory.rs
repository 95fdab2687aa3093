//! Process-local metadata driver backed by plain maps. Used by tests and by
//! the `memory` backend for local development; nothing survives a restart.

use std::collections::HashMap;

use async_trait::async_trait;
use chunkgate_core::types::{FragmentKey, FragmentLocation, RegistryVersion};
use parking_lot::RwLock;

use crate::{descendants, direct_children, MetaError, MetaStore};

#[derive(Default)]
pub struct MemoryMetaStore {
    fragments: RwLock<HashMap<FragmentKey, (FragmentLocation, RegistryVersion)>>,
}

impl MemoryMetaStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self, location: &FragmentLocation, version: RegistryVersion) {
        self.fragments
            .write()
            .insert(location.key.clone(), (location.clone(), version));
    }

    fn delete(&self, path: &str, version: RegistryVersion) {
        self.fragments
            .write()
            .retain(|key, (_, stored)| key.path != path || *stored != version);
    }

    fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .fragments
            .read()
            .keys()
            .map(|key| key.path.clone())
            .collect();
        paths.sort_unstable();
        paths.dedup();
        paths
    }
}

#[async_trait]
impl MetaStore for MemoryMetaStore {
    async fn store_v1(&self, location: &FragmentLocation) -> Result<(), MetaError> {
        self.store(location, RegistryVersion::V1);
        Ok(())
    }

    async fn store_v2(&self, location: &FragmentLocation) -> Result<(), MetaError> {
        self.store(location, RegistryVersion::V2);
        Ok(())
    }

    async fn fragment(&self, key: &FragmentKey) -> Result<Option<FragmentLocation>, MetaError> {
        Ok(self
            .fragments
            .read()
            .get(key)
            .map(|(location, _)| location.clone()))
    }

    async fn file_fragments(&self, path: &str) -> Result<Vec<FragmentLocation>, MetaError> {
        let mut found: Vec<FragmentLocation> = self
            .fragments
            .read()
            .values()
            .filter(|(location, _)| location.key.path == path)
            .map(|(location, _)| location.clone())
            .collect();
        found.sort_by_key(|location| (location.key.index, location.key.start));
        Ok(found)
    }

    async fn delete_v1(&self, path: &str) -> Result<(), MetaError> {
        self.delete(path, RegistryVersion::V1);
        Ok(())
    }

    async fn delete_v2(&self, path: &str) -> Result<(), MetaError> {
        self.delete(path, RegistryVersion::V2);
        Ok(())
    }

    async fn move_file(&self, source: &str, dest: &str) -> Result<(), MetaError> {
        let mut fragments = self.fragments.write();
        let moved: Vec<FragmentKey> = fragments
            .keys()
            .filter(|key| key.path == source)
            .cloned()
            .collect();
        for old_key in moved {
            if let Some((mut location, version)) = fragments.remove(&old_key) {
                location.key.path = dest.to_string();
                fragments.insert(location.key.clone(), (location, version));
            }
        }
        Ok(())
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<String>, MetaError> {
        let paths = self.paths();
        Ok(direct_children(paths.iter().map(String::as_str), path))
    }

    async fn list_descendants(&self, path: &str) -> Result<Vec<String>, MetaError> {
        let paths = self.paths();
        Ok(descendants(paths.iter().map(String::as_str), path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(path: &str, index: u64, start: u64, end: u64, file_id: u64) -> FragmentLocation {
        FragmentLocation {
            key: FragmentKey::new(path, index, start, end),
            file_id,
            group_id: 1,
            is_last: false,
        }
    }

    #[tokio::test]
    async fn reupload_replaces_the_previous_record() {
        let store = MemoryMetaStore::new();
        store.store_v2(&location("/a", 0, 0, 5, 10)).await.unwrap();
        store.store_v2(&location("/a", 0, 0, 5, 11)).await.unwrap();

        let key = FragmentKey::new("/a", 0, 0, 5);
        let found = store.fragment(&key).await.unwrap().unwrap();
        assert_eq!(found.file_id, 11);
        assert_eq!(store.file_fragments("/a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fragments_list_in_index_then_offset_order() {
        let store = MemoryMetaStore::new();
        store.store_v2(&location("/a", 1, 5, 9, 21)).await.unwrap();
        store.store_v2(&location("/a", 0, 0, 5, 20)).await.unwrap();
        store.store_v2(&location("/b", 0, 0, 2, 30)).await.unwrap();

        let fragments = store.file_fragments("/a").await.unwrap();
        let ids: Vec<u64> = fragments.iter().map(|f| f.file_id).collect();
        assert_eq!(ids, vec![20, 21]);
    }

    #[tokio::test]
    async fn delete_only_touches_the_named_version() {
        let store = MemoryMetaStore::new();
        store.store_v1(&location("/a", 0, 0, 5, 1)).await.unwrap();
        store.store_v2(&location("/a", 1, 5, 9, 2)).await.unwrap();

        store.delete_v1("/a").await.unwrap();
        let remaining = store.file_fragments("/a").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].file_id, 2);

        store.delete_v2("/a").await.unwrap();
        assert!(store.file_fragments("/a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn move_rekeys_every_fragment() {
        let store = MemoryMetaStore::new();
        store.store_v2(&location("/a", 0, 0, 5, 1)).await.unwrap();
        store.store_v2(&location("/a", 1, 5, 9, 2)).await.unwrap();

        store.move_file("/a", "/b").await.unwrap();
        assert!(store.file_fragments("/a").await.unwrap().is_empty());
        let moved = store.file_fragments("/b").await.unwrap();
        assert_eq!(moved.len(), 2);
        assert!(moved.iter().all(|f| f.key.path == "/b"));
    }

    #[tokio::test]
    async fn listings_come_from_stored_paths() {
        let store = MemoryMetaStore::new();
        store
            .store_v2(&location("/dir/x/one", 0, 0, 1, 1))
            .await
            .unwrap();
        store
            .store_v2(&location("/dir/y", 0, 0, 1, 2))
            .await
            .unwrap();

        assert_eq!(
            store.list_directory("/dir").await.unwrap(),
            vec!["/dir/x", "/dir/y"]
        );
        assert_eq!(
            store.list_descendants("/dir").await.unwrap(),
            vec!["/dir/x/one", "/dir/y"]
        );
    }
}
