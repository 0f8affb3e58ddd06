use indexmap::IndexMap;
use parking_lot::RwLock;
use rand::Rng;
use std::sync::Arc;

/// A thread-safe bounded cache with random eviction.
///
/// We use IndexMap and not HashMap because it makes it cheaper to remove a
/// random element when the cache is full.
#[derive(Clone)]
pub struct Cache<TKey, TData>
where
    TKey: Clone + std::hash::Hash + Eq + Send + Sync,
    TData: Clone + Send + Sync,
{
    map: Arc<RwLock<IndexMap<TKey, TData>>>,
    size: usize,
}

impl<TKey, TData> Cache<TKey, TData>
where
    TKey: Clone + std::hash::Hash + Eq + Send + Sync,
    TData: Clone + Send + Sync,
{
    pub fn new(size: u64) -> Self {
        // Use `size + 1` for not triggering a realloc if a new element exactly overflows capacity
        Self { map: Arc::new(RwLock::new(IndexMap::with_capacity(size as usize + 1))), size: size as usize }
    }

    pub fn get(&self, key: &TKey) -> Option<TData> {
        self.map.read().get(key).cloned()
    }

    pub fn contains_key(&self, key: &TKey) -> bool {
        self.map.read().contains_key(key)
    }

    pub fn insert(&self, key: TKey, data: TData) {
        if self.size == 0 {
            return;
        }
        let mut write_guard = self.map.write();
        if write_guard.len() == self.size {
            write_guard.swap_remove_index(rand::thread_rng().gen_range(0..self.size));
        }
        write_guard.insert(key, data);
    }

    pub fn remove(&self, key: &TKey) -> Option<TData> {
        if self.size == 0 {
            return None;
        }
        self.map.write().swap_remove(key)
    }
}
