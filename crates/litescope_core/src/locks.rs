use std::sync::Mutex;

use uuid::Uuid;

use crate::events::{CoreEvent, EventBus};
use crate::schema::SchemaCategory;

/// An owner of a lock: the database itself for global locks, or a
/// registered consumer for per-page locks.
pub type LockOwner = Uuid;

#[derive(Debug, Clone)]
struct LockEntry {
    category: Option<SchemaCategory>,
    /// Lower-cased name; `None` locks the whole category or database.
    name: Option<String>,
    owner: LockOwner,
    label: String,
}

/// Per-database registry mediating mutations against long reads.
///
/// A request for `(category, name)` conflicts with any lock on the same
/// pair, with any lock missing a name in that category, and with any
/// global lock; a request without a category conflicts with every lock.
/// Owners listed in `skip` never conflict.
pub struct LockRegistry {
    entries: Mutex<Vec<LockEntry>>,
    events: EventBus,
}

impl LockRegistry {
    pub fn new(events: EventBus) -> Self {
        Self { entries: Mutex::new(Vec::new()), events }
    }

    pub fn lock(
        &self,
        category: Option<SchemaCategory>,
        name: Option<&str>,
        owner: LockOwner,
        label: impl Into<String>,
    ) {
        let label = label.into();
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(LockEntry {
                category,
                name: name.map(|n| n.to_lowercase()),
                owner,
                label: label.clone(),
            });
        }
        self.events.emit(CoreEvent::LockChanged {
            category,
            name: name.map(|n| n.to_string()),
            label,
            acquired: true,
        });
    }

    pub fn unlock(&self, category: Option<SchemaCategory>, name: Option<&str>, owner: LockOwner) {
        let lower = name.map(|n| n.to_lowercase());
        let mut released = None;
        if let Ok(mut entries) = self.entries.lock()
            && let Some(at) = entries.iter().position(|e| {
                e.owner == owner && e.category == category && e.name == lower
            })
        {
            released = Some(entries.remove(at));
        }
        if let Some(entry) = released {
            self.events.emit(CoreEvent::LockChanged {
                category,
                name: name.map(|n| n.to_string()),
                label: entry.label,
                acquired: false,
            });
        }
    }

    /// Releases every lock held by the owner, e.g. when a consumer
    /// unregisters.
    pub fn unlock_all(&self, owner: LockOwner) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|e| e.owner != owner);
        }
    }

    /// Returns the label of the first lock conflicting with a request on
    /// `(category, name)`, treating `skip` owners as non-conflicting.
    pub fn get_lock(
        &self,
        category: Option<SchemaCategory>,
        name: Option<&str>,
        skip: &[LockOwner],
    ) -> Option<String> {
        let lower = name.map(|n| n.to_lowercase());
        let entries = self.entries.lock().ok()?;
        entries
            .iter()
            .filter(|e| !skip.contains(&e.owner))
            .find(|e| match (category, &e.category) {
                // A request without a category conflicts with anything.
                (None, _) => true,
                // A global lock conflicts with any request.
                (_, None) => true,
                (Some(want), Some(have)) => {
                    want == *have
                        && (lower.is_none() || e.name.is_none() || lower == e.name)
                }
            })
            .map(|e| e.label.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().map(|e| e.is_empty()).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> LockRegistry {
        LockRegistry::new(EventBus::new())
    }

    #[test]
    fn same_item_conflicts_other_item_does_not() {
        let locks = registry();
        let owner = Uuid::new_v4();
        locks.lock(Some(SchemaCategory::Table), Some("T1"), owner, "statistics running");

        assert_eq!(
            locks.get_lock(Some(SchemaCategory::Table), Some("t1"), &[]),
            Some("statistics running".to_string())
        );
        assert_eq!(locks.get_lock(Some(SchemaCategory::Table), Some("t2"), &[]), None);
        assert_eq!(locks.get_lock(Some(SchemaCategory::View), Some("t1"), &[]), None);
    }

    #[test]
    fn skip_owners_do_not_conflict() {
        let locks = registry();
        let owner = Uuid::new_v4();
        locks.lock(Some(SchemaCategory::Table), Some("t"), owner, "export");
        assert_eq!(locks.get_lock(Some(SchemaCategory::Table), Some("t"), &[owner]), None);
    }

    #[test]
    fn category_less_request_conflicts_with_any_lock() {
        let locks = registry();
        locks.lock(Some(SchemaCategory::Index), Some("i"), Uuid::new_v4(), "reindex");
        assert!(locks.get_lock(None, None, &[]).is_some());
    }

    #[test]
    fn global_lock_conflicts_with_everything() {
        let locks = registry();
        locks.lock(None, None, Uuid::new_v4(), "vacuum in progress");
        assert!(locks.get_lock(Some(SchemaCategory::Table), Some("t"), &[]).is_some());
    }

    #[test]
    fn unlock_restores_access() {
        let locks = registry();
        let owner = Uuid::new_v4();
        locks.lock(Some(SchemaCategory::Table), Some("t"), owner, "export");
        locks.unlock(Some(SchemaCategory::Table), Some("t"), owner);
        assert!(locks.get_lock(None, None, &[]).is_none());
        assert!(locks.is_empty());
    }
}
