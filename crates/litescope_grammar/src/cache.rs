//! Bounded LRU memoizer for parse results.
//!
//! Rename-carrying calls are not cached: their output depends on the
//! rename set and they are rare compared to plain schema scans.

use std::sync::{Arc, Mutex};

use indexmap::IndexMap;

use crate::ast::{Statement, StatementKind};
use crate::error::GrammarError;

type Key = (String, Option<StatementKind>);
type CachedResult = Result<Arc<Statement>, GrammarError>;

pub struct ParseCache {
    capacity: usize,
    entries: Mutex<IndexMap<Key, CachedResult>>,
}

impl ParseCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(IndexMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    /// Successfully parsed entries as serializable `(sql, statement)`
    /// pairs, least recently used first, for host-side persistence.
    pub fn snapshot(&self) -> Vec<(String, Statement)> {
        self.entries
            .lock()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|((sql, _), result)| {
                        result
                            .as_ref()
                            .ok()
                            .map(|statement| (sql.clone(), (**statement).clone()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Parses through the cache. Errors are memoized too, so repeated
    /// scans of an unparseable item stay cheap.
    pub fn parse(&self, sql: &str, category: Option<StatementKind>) -> CachedResult {
        let key = (sql.to_string(), category);
        if let Ok(mut entries) = self.entries.lock()
            && let Some(hit) = entries.shift_remove(&key)
        {
            // Move to the back: most recently used.
            entries.insert(key, hit.clone());
            return hit;
        }
        let result = crate::parse(sql, category, None).map(Arc::new);
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, result.clone());
            while entries.len() > self.capacity {
                entries.shift_remove_index(0);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caches_hits_and_errors() {
        let cache = ParseCache::new(8);
        let ok = cache.parse("CREATE TABLE t(a)", None);
        assert!(ok.is_ok());
        let again = cache.parse("CREATE TABLE t(a)", None);
        assert!(Arc::ptr_eq(&ok.unwrap(), &again.unwrap()));

        assert!(cache.parse("DROP TABLE t", None).is_err());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = ParseCache::new(2);
        cache.parse("CREATE TABLE a(x)", None).unwrap();
        cache.parse("CREATE TABLE b(x)", None).unwrap();
        // Touch `a`, then insert a third entry: `b` must go.
        cache.parse("CREATE TABLE a(x)", None).unwrap();
        cache.parse("CREATE TABLE c(x)", None).unwrap();
        assert_eq!(cache.len(), 2);
        let entries = cache.entries.lock().unwrap();
        assert!(entries.keys().any(|(sql, _)| sql.contains("TABLE a")));
        assert!(!entries.keys().any(|(sql, _)| sql.contains("TABLE b")));
    }
}
