//! Storage implementations for per-key state.
//!
//! Provides concurrent, sharded storage for event windows and endpoint
//! buckets.

use crate::application::ports::Storage;
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;

/// Thread-safe sharded storage backed by DashMap.
///
/// Reads take a shard read lock and writes lock a single shard, so
/// unrelated keys rarely contend.
#[derive(Debug)]
pub struct ShardedStorage<K, V>
where
    K: Eq + Hash + Clone,
{
    map: DashMap<K, V>,
}

impl<K, V> ShardedStorage<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a new sharded storage instance.
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
        }
    }

    /// Get a clone of a value.
    pub fn get_cloned<Q>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.map.get(key).map(|entry| entry.value().clone())
    }

    /// Get the value for `key`, inserting `factory()` first if absent.
    pub fn get_or_insert_with(&self, key: K, factory: impl FnOnce() -> V) -> V
    where
        V: Clone,
    {
        self.map.entry(key).or_insert_with(factory).value().clone()
    }

    /// Get the number of entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Check if the storage is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<K, V> Default for ShardedStorage<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Storage<K, V> for ShardedStorage<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + std::fmt::Debug,
    V: Send + Sync + std::fmt::Debug,
{
    fn with_entry_mut<F, R>(&self, key: K, factory: impl FnOnce() -> V, accessor: F) -> R
    where
        F: FnOnce(&mut V) -> R,
    {
        let mut value_ref = self.map.entry(key).or_insert_with(factory);
        accessor(&mut value_ref)
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn with_entry<F, R>(&self, key: &K, accessor: F) -> Option<R>
    where
        F: FnOnce(&V) -> R,
    {
        self.map.get(key).map(|entry| accessor(entry.value()))
    }

    fn remove(&self, key: &K) -> Option<V> {
        self.map.remove(key).map(|(_, value)| value)
    }

    fn retain<F>(&self, f: F)
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        self.map.retain(f);
    }
}

// Lets several registries share one map.
impl<K, V> Storage<K, V> for Arc<ShardedStorage<K, V>>
where
    K: Hash + Eq + Clone + Send + Sync + std::fmt::Debug,
    V: Send + Sync + std::fmt::Debug,
{
    fn with_entry_mut<F, R>(&self, key: K, factory: impl FnOnce() -> V, accessor: F) -> R
    where
        F: FnOnce(&mut V) -> R,
    {
        (**self).with_entry_mut(key, factory, accessor)
    }

    fn len(&self) -> usize {
        Storage::len(&**self)
    }

    fn is_empty(&self) -> bool {
        Storage::is_empty(&**self)
    }

    fn with_entry<F, R>(&self, key: &K, accessor: F) -> Option<R>
    where
        F: FnOnce(&V) -> R,
    {
        (**self).with_entry(key, accessor)
    }

    fn remove(&self, key: &K) -> Option<V> {
        Storage::remove(&**self, key)
    }

    fn retain<F>(&self, f: F)
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        Storage::retain(&**self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_entry_mut_creates_once() {
        let storage: ShardedStorage<&str, u32> = ShardedStorage::new();

        let first = storage.with_entry_mut("a", || 1, |v| {
            *v += 10;
            *v
        });
        let second = storage.with_entry_mut("a", || 100, |v| *v);

        assert_eq!(first, 11);
        assert_eq!(second, 11);
        assert_eq!(Storage::len(&storage), 1);
    }

    #[test]
    fn test_get_or_insert_with_shares_arc() {
        let storage: ShardedStorage<String, Arc<u32>> = ShardedStorage::new();

        let a = storage.get_or_insert_with("ep".to_string(), || Arc::new(7));
        let b = storage.get_or_insert_with("ep".to_string(), || Arc::new(8));

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(storage.get_cloned("ep").as_deref(), Some(&7));
        assert!(storage.get_cloned("other").is_none());
    }

    #[test]
    fn test_with_entry_does_not_insert() {
        let storage: ShardedStorage<u32, u32> = ShardedStorage::new();

        assert_eq!(storage.with_entry(&1, |v| *v), None);
        assert!(Storage::is_empty(&storage));

        storage.with_entry_mut(1, || 5, |_| ());
        assert_eq!(storage.with_entry(&1, |v| *v + 1), Some(6));
    }

    #[test]
    fn test_remove_and_retain() {
        let storage: ShardedStorage<u32, u32> = ShardedStorage::new();
        for i in 0..6 {
            storage.with_entry_mut(i, || i * 2, |_| ());
        }

        assert_eq!(Storage::remove(&storage, &0), Some(0));
        assert_eq!(Storage::remove(&storage, &0), None);

        Storage::retain(&storage, |_, v| *v > 4);
        assert_eq!(Storage::len(&storage), 3);
        assert_eq!(storage.with_entry(&3, |v| *v), Some(6));
        assert_eq!(storage.with_entry(&2, |v| *v), None);
    }

    #[test]
    fn test_concurrent_access() {
        use std::thread;

        let storage = Arc::new(ShardedStorage::new());
        let mut handles = vec![];

        for i in 0..10 {
            let storage_clone = Arc::clone(&storage);
            let handle = thread::spawn(move || {
                for j in 0..100 {
                    storage_clone.with_entry_mut(format!("key_{}_{}", i, j), || 0u32, |v| *v += 1);
                }
            });
            handles.push(handle);
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(Storage::len(&storage), 1000);
    }
}
