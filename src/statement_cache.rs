//! Prepared-statement caching
//!
//! Preparing a statement costs a server round-trip and pins server-side
//! resources, so the session keeps prepared statements keyed by their raw
//! SQL text and reuses them across executes. The server is unhappy with
//! thousands of open statement handles, so once the cache passes its
//! high-water mark the least-recently-used entry is evicted and its handle
//! handed back to the session for closing.

use std::time::Instant;

use indexmap::IndexMap;

use crate::messages::Column;

/// High-water mark; above this the oldest entry is evicted
pub const MAX_CACHED_STATEMENTS: usize = 1000;

/// A server-side prepared statement
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    /// Opaque handle assigned by the server
    pub handle: i64,
    /// Parameter schema, in placeholder order
    pub columns: Vec<Column>,
}

/// Cached statement with usage tracking
#[derive(Debug)]
struct CachedStatement {
    statement: PreparedStatement,
    last_used: Instant,
}

/// Session-local prepared-statement cache with LRU eviction
#[derive(Debug, Default)]
pub struct StatementCache {
    cache: IndexMap<String, CachedStatement>,
}

impl StatementCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a statement by SQL text, refreshing its LRU position
    pub fn get(&mut self, sql: &str) -> Option<PreparedStatement> {
        let cached = self.cache.get_mut(sql)?;
        cached.last_used = Instant::now();
        tracing::trace!(sql = sql, handle = cached.statement.handle, "statement cache hit");
        Some(cached.statement.clone())
    }

    /// Insert a freshly prepared statement
    pub fn insert(&mut self, sql: String, statement: PreparedStatement) {
        tracing::trace!(sql = sql.as_str(), handle = statement.handle, "caching statement");
        self.cache.insert(
            sql,
            CachedStatement {
                statement,
                last_used: Instant::now(),
            },
        );
    }

    /// Drop an entry whose server handle went stale
    pub fn remove(&mut self, sql: &str) -> Option<PreparedStatement> {
        self.cache.swap_remove(sql).map(|c| c.statement)
    }

    /// Evict the least-recently-used entry if the cache has grown past
    /// [`MAX_CACHED_STATEMENTS`]. Returns the evicted statement so the
    /// session can close its handle.
    pub fn evict_lru_if_full(&mut self) -> Option<PreparedStatement> {
        if self.cache.len() <= MAX_CACHED_STATEMENTS {
            return None;
        }
        let lru_key = self
            .cache
            .iter()
            .min_by_key(|(_, cached)| cached.last_used)
            .map(|(key, _)| key.clone())?;
        let evicted = self.cache.swap_remove(&lru_key)?;
        tracing::trace!(
            sql = lru_key.as_str(),
            handle = evicted.statement.handle,
            "evicted LRU statement"
        );
        Some(evicted.statement)
    }

    /// Take every cached handle, emptying the cache. Used at disconnect to
    /// close all server-side statements.
    pub fn drain_handles(&mut self) -> Vec<i64> {
        self.cache
            .drain(..)
            .map(|(_, cached)| cached.statement.handle)
            .collect()
    }

    /// Check whether a SQL text is cached
    pub fn contains(&self, sql: &str) -> bool {
        self.cache.contains_key(sql)
    }

    /// Number of cached statements
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_statement(handle: i64) -> PreparedStatement {
        PreparedStatement {
            handle,
            columns: Vec::new(),
        }
    }

    #[test]
    fn test_cache_basic() {
        let mut cache = StatementCache::new();
        cache.insert("SELECT 1".to_string(), make_statement(100));
        assert_eq!(cache.len(), 1);

        let stmt = cache.get("SELECT 1").expect("should be cached");
        assert_eq!(stmt.handle, 100);
    }

    #[test]
    fn test_cache_miss() {
        let mut cache = StatementCache::new();
        assert!(cache.get("SELECT 1").is_none());
    }

    #[test]
    fn test_remove() {
        let mut cache = StatementCache::new();
        cache.insert("SELECT 1".to_string(), make_statement(100));

        let removed = cache.remove("SELECT 1").expect("should remove");
        assert_eq!(removed.handle, 100);
        assert!(cache.is_empty());
        assert!(cache.remove("SELECT 1").is_none());
    }

    #[test]
    fn test_no_eviction_at_high_water() {
        let mut cache = StatementCache::new();
        for i in 0..MAX_CACHED_STATEMENTS {
            cache.insert(format!("SELECT {}", i), make_statement(i as i64));
        }
        assert!(cache.evict_lru_if_full().is_none());
        assert_eq!(cache.len(), MAX_CACHED_STATEMENTS);
    }

    #[test]
    fn test_eviction_past_high_water_drops_lru() {
        let mut cache = StatementCache::new();
        for i in 0..MAX_CACHED_STATEMENTS {
            cache.insert(format!("SELECT {}", i), make_statement(i as i64));
        }

        // Touch the oldest entry so "SELECT 1" becomes least recently used.
        cache.get("SELECT 0");

        cache.insert("SELECT fresh".to_string(), make_statement(9999));
        let evicted = cache.evict_lru_if_full().expect("should evict one entry");
        assert_eq!(evicted.handle, 1);

        assert_eq!(cache.len(), MAX_CACHED_STATEMENTS);
        assert!(!cache.contains("SELECT 1"));
        assert!(cache.contains("SELECT 0"));
        assert!(cache.contains("SELECT fresh"));

        // A single insert past the mark evicts exactly one entry.
        assert!(cache.evict_lru_if_full().is_none());
    }

    #[test]
    fn test_drain_handles() {
        let mut cache = StatementCache::new();
        cache.insert("a".to_string(), make_statement(1));
        cache.insert("b".to_string(), make_statement(2));

        let mut handles = cache.drain_handles();
        handles.sort();
        assert_eq!(handles, vec![1, 2]);
        assert!(cache.is_empty());
    }
}
