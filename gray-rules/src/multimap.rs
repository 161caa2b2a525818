//! Concurrent multi-value map used by the rule indices.
//!
//! Every operation takes the owning shard lock for a single add, remove or copy and
//! releases it before returning. Callers that need to make decisions over a key's
//! values work on the copy returned by [`ConcurrentMultimap::snapshot`].

use dashmap::DashMap;
use std::collections::HashSet;
use std::hash::Hash;

pub struct ConcurrentMultimap<V> {
    inner: DashMap<String, HashSet<V>>,
}

impl<V> ConcurrentMultimap<V>
where
    V: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        ConcurrentMultimap {
            inner: DashMap::new(),
        }
    }

    /// Adds `value` under `key`. Returns false if it was already present.
    pub fn put(&self, key: String, value: V) -> bool {
        self.inner.entry(key).or_default().insert(value)
    }

    /// Removes `value` from `key`, dropping the key once no values remain.
    pub fn remove(&self, key: &str, value: &V) -> bool {
        let (removed, now_empty) = match self.inner.get_mut(key) {
            Some(mut values) => {
                let removed = values.remove(value);
                (removed, values.is_empty())
            }
            None => return false,
        };
        // The guard above must be released before touching the shard again.
        if now_empty {
            self.inner.remove_if(key, |_, values| values.is_empty());
        }
        removed
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner
            .get(key)
            .is_some_and(|values| !values.is_empty())
    }

    #[cfg(test)]
    pub fn contains(&self, key: &str, value: &V) -> bool {
        self.inner
            .get(key)
            .is_some_and(|values| values.contains(value))
    }

    pub fn snapshot(&self, key: &str) -> Vec<V> {
        self.inner
            .get(key)
            .map(|values| values.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of keys with at least one value.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<V> Default for ConcurrentMultimap<V>
where
    V: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_put_and_remove() {
        let map = ConcurrentMultimap::new();
        assert!(map.put("a".into(), 1));
        assert!(map.put("a".into(), 2));
        assert!(!map.put("a".into(), 2));
        assert_eq!(map.len(), 1);

        let mut values = map.snapshot("a");
        values.sort();
        assert_eq!(values, vec![1, 2]);

        assert!(map.remove("a", &1));
        assert!(!map.remove("a", &1));
        assert!(map.contains_key("a"));
        assert!(map.remove("a", &2));

        // Empty sets are never visible
        assert!(!map.contains_key("a"));
        assert!(map.is_empty());
        assert!(map.snapshot("a").is_empty());
        assert!(!map.remove("missing", &1));
    }

    #[test]
    fn test_add_then_remove_keeps_key() {
        let map = ConcurrentMultimap::new();
        map.put("k".into(), 1);
        map.put("k".into(), 2);
        map.remove("k", &1);
        assert!(map.contains_key("k"));
        assert!(map.contains("k", &2));
        assert!(!map.contains("k", &1));
    }

    #[test]
    fn test_concurrent_writers() {
        let map = Arc::new(ConcurrentMultimap::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let map = map.clone();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        let key = format!("k{}", i % 10);
                        map.put(key.clone(), t * 1000 + i);
                        map.remove(&key, &(t * 1000 + i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(map.is_empty());
    }
}
