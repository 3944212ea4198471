//! Concurrent map whose entries expire after a period without access.

use std::hash::Hash;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;

#[derive(Debug)]
struct Slot<V> {
    value: V,
    last_access: Instant,
}

impl<V> Slot<V> {
    fn new(value: V, now: Instant) -> Self {
        Self {
            value,
            last_access: now,
        }
    }

    fn is_expired(&self, now: Instant, window: Duration) -> bool {
        now.duration_since(self.last_access) >= window
    }
}

/// A `DashMap` with sliding expiration.
///
/// Reads and writes refresh the entry. An entry untouched for `window` is
/// treated as absent and dropped the next time it is looked at (or on
/// [`SlidingCache::purge_expired`]). Time comes from `tokio::time`, so tests
/// can drive expiry with a paused clock.
#[derive(Debug)]
pub struct SlidingCache<K: Eq + Hash, V> {
    entries: DashMap<K, Slot<V>>,
    window: Duration,
}

impl<K, V> SlidingCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            window,
        }
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns the live value and refreshes its window.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let expired = match self.entries.get_mut(key) {
            Some(mut slot) if !slot.is_expired(now, self.window) => {
                slot.last_access = now;
                return Some(slot.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries
                .remove_if(key, |_, slot| slot.is_expired(now, self.window));
        }
        None
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(key, Slot::new(value, Instant::now()));
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        self.entries
            .remove(key)
            .filter(|(_, slot)| !slot.is_expired(now, self.window))
            .map(|(_, slot)| slot.value)
    }

    /// Atomically replaces the value for `key` with `f(current)`.
    ///
    /// `current` is `None` for missing or expired entries. Returning `None`
    /// from `f` removes the entry.
    pub fn update<F>(&self, key: K, f: F) -> Option<V>
    where
        F: FnOnce(Option<&V>) -> Option<V>,
    {
        let now = Instant::now();
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                let next = {
                    let slot = occupied.get();
                    if slot.is_expired(now, self.window) {
                        f(None)
                    } else {
                        f(Some(&slot.value))
                    }
                };
                match next {
                    Some(value) => {
                        occupied.insert(Slot::new(value.clone(), now));
                        Some(value)
                    }
                    None => {
                        occupied.remove();
                        None
                    }
                }
            }
            Entry::Vacant(vacant) => {
                let value = f(None)?;
                vacant.insert(Slot::new(value.clone(), now));
                Some(value)
            }
        }
    }

    /// Drops every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, slot| !slot.is_expired(now, self.window));
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries, expired ones included until purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_insert_then_get() {
        let cache = SlidingCache::new(WINDOW);
        cache.insert("a".to_string(), 1_u32);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"b".to_string()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_without_access() {
        let cache = SlidingCache::new(WINDOW);
        cache.insert("a".to_string(), 1_u32);

        tokio::time::advance(WINDOW + Duration::from_secs(1)).await;

        assert_eq!(cache.get(&"a".to_string()), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_access_slides_window() {
        let cache = SlidingCache::new(WINDOW);
        cache.insert("a".to_string(), 1_u32);

        tokio::time::advance(Duration::from_secs(45)).await;
        assert_eq!(cache.get(&"a".to_string()), Some(1));

        tokio::time::advance(Duration::from_secs(45)).await;
        assert_eq!(cache.get(&"a".to_string()), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_treats_expired_as_missing() {
        let cache = SlidingCache::new(WINDOW);
        cache.insert("a".to_string(), 5_u32);
        tokio::time::advance(WINDOW).await;

        let value = cache.update("a".to_string(), |current| Some(current.copied().unwrap_or(0) + 1));
        assert_eq!(value, Some(1));
    }

    #[tokio::test]
    async fn test_update_returning_none_removes() {
        let cache = SlidingCache::new(WINDOW);
        cache.insert("a".to_string(), 5_u32);
        assert_eq!(cache.update("a".to_string(), |_| None), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = SlidingCache::new(WINDOW);
        cache.insert("old".to_string(), 1_u32);
        tokio::time::advance(Duration::from_secs(30)).await;
        cache.insert("new".to_string(), 2_u32);
        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"new".to_string()), Some(2));
    }
}
