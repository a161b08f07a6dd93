use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};
use crate::service::merger::MergedOutput;

pub struct GlobalCache<K, V> {
    store: Arc<RwLock<HashMap<K, V>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> GlobalCache<K, V> {
    fn new() -> Self {
        GlobalCache {
            store: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let store = self.store.read().unwrap_or_else(|e| e.into_inner());
        store.get(key).cloned()
    }

    pub fn set(&self, key: K, value: V) {
        let mut store = self.store.write().unwrap_or_else(|e| e.into_inner());
        store.insert(key, value);
    }
}

// 每个分组最近一次合并的输出，按分组名索引
pub static LATEST_OUTPUTS: Lazy<GlobalCache<String, MergedOutput>> = Lazy::new(GlobalCache::new);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_set_get() {
        let cache: GlobalCache<String, usize> = GlobalCache::new();
        assert_eq!(cache.get(&"a".to_string()), None);
        cache.set("a".to_string(), 1);
        cache.set("a".to_string(), 2);
        assert_eq!(cache.get(&"a".to_string()), Some(2));
        assert_eq!(cache.get(&"b".to_string()), None);
    }
}
