use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use litescope_grammar::{Statement, StatementKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaCategory {
    Table,
    Index,
    Trigger,
    View,
}

impl SchemaCategory {
    pub const ALL: [SchemaCategory; 4] = [
        SchemaCategory::Table,
        SchemaCategory::Index,
        SchemaCategory::Trigger,
        SchemaCategory::View,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Index => "index",
            Self::Trigger => "trigger",
            Self::View => "view",
        }
    }

    /// The `sqlite_master.type` value.
    pub fn master_type(self) -> &'static str {
        self.as_str()
    }

    pub fn from_master_type(value: &str) -> Option<Self> {
        match value {
            "table" => Some(Self::Table),
            "index" => Some(Self::Index),
            "trigger" => Some(Self::Trigger),
            "view" => Some(Self::View),
            _ => None,
        }
    }

    /// Statement kind expected when parsing this category's SQL.
    pub fn expected_kind(self) -> StatementKind {
        match self {
            Self::Table => StatementKind::Table,
            Self::Index => StatementKind::Index,
            Self::Trigger => StatementKind::Trigger,
            Self::View => StatementKind::View,
        }
    }
}

impl fmt::Display for SchemaCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A column as reported by `PRAGMA table_info`, enriched with the parsed
/// meta where available (the parsed type wins for display, table_info
/// wins for existence).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: Option<String>,
    pub not_null: bool,
    pub default_value: Option<String>,
    /// 1-based position within the primary key, if part of it.
    pub pk_position: Option<usize>,
}

/// One schema entity as tracked in the categorized cache.
#[derive(Debug, Clone)]
pub struct SchemaItem {
    pub category: SchemaCategory,
    /// Case-preserving name; lookups fold case.
    pub name: String,
    /// Original CREATE SQL from sqlite_master.
    pub sql: String,
    /// Parsed meta tree; absent when the SQL did not parse.
    pub meta: Option<Arc<Statement>>,
    pub parse_error: Option<String>,
    /// Populated for tables and views.
    pub columns: Vec<ColumnInfo>,
    pub row_count: Option<u64>,
    pub is_count_estimated: bool,
    pub size_bytes: Option<u64>,
    /// Items this one references, computed from the parsed meta.
    pub dependencies: Vec<(SchemaCategory, String)>,
    /// Reverse edges, computed after a full scan.
    pub dependents: Vec<(SchemaCategory, String)>,
}

impl SchemaItem {
    pub fn new(category: SchemaCategory, name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            category,
            name: name.into(),
            sql: sql.into(),
            meta: None,
            parse_error: None,
            columns: Vec::new(),
            row_count: None,
            is_count_estimated: false,
            size_bytes: None,
            dependencies: Vec::new(),
            dependents: Vec::new(),
        }
    }

    /// The table an index or trigger belongs to, lower-cased.
    pub fn owner_table(&self) -> Option<String> {
        self.meta
            .as_ref()
            .and_then(|m| m.owner_table())
            .map(|t| t.to_lowercase())
    }

    /// Lower-cased referenced relation names from the parsed meta; items
    /// with unparseable SQL are leaves.
    pub fn referenced_tables(&self) -> &[String] {
        self.meta
            .as_ref()
            .map(|m| m.header().tables.as_slice())
            .unwrap_or(&[])
    }
}

/// Key graph entry: a set of local columns plus, per related table, the
/// columns on the other side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyRelation {
    pub columns: Vec<String>,
    pub tables: IndexMap<String, Vec<String>>,
}

/// `get_related` result, partitioned by relation kind.
#[derive(Debug, Clone, Default)]
pub struct RelatedItems {
    /// Children: indexes and triggers belonging to the item.
    pub own: Vec<(SchemaCategory, String)>,
    /// Peers referencing this item or referenced by it.
    pub related: Vec<(SchemaCategory, String)>,
    /// Tables linked through foreign keys, either direction.
    pub data: Vec<(SchemaCategory, String)>,
}

/// Categorized schema cache with case-insensitive lookups.
#[derive(Debug, Default)]
pub struct SchemaCache {
    categories: HashMap<SchemaCategory, IndexMap<String, SchemaItem>>,
    all_names: HashSet<String>,
    stale: bool,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.categories.clear();
        self.all_names.clear();
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    pub fn mark_fresh(&mut self) {
        self.stale = false;
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn insert(&mut self, item: SchemaItem) {
        self.all_names.insert(item.name.to_lowercase());
        self.categories
            .entry(item.category)
            .or_default()
            .insert(item.name.to_lowercase(), item);
    }

    pub fn remove(&mut self, category: SchemaCategory, name: &str) -> Option<SchemaItem> {
        let removed = self
            .categories
            .get_mut(&category)
            .and_then(|items| items.shift_remove(&name.to_lowercase()));
        if removed.is_some() {
            self.all_names.remove(&name.to_lowercase());
        }
        removed
    }

    pub fn get(&self, category: SchemaCategory, name: &str) -> Option<&SchemaItem> {
        self.categories
            .get(&category)
            .and_then(|items| items.get(&name.to_lowercase()))
    }

    pub fn get_mut(&mut self, category: SchemaCategory, name: &str) -> Option<&mut SchemaItem> {
        self.categories
            .get_mut(&category)
            .and_then(|items| items.get_mut(&name.to_lowercase()))
    }

    pub fn category(&self, category: SchemaCategory) -> impl Iterator<Item = &SchemaItem> {
        self.categories
            .get(&category)
            .into_iter()
            .flat_map(|items| items.values())
    }

    pub fn items_mut(&mut self) -> impl Iterator<Item = &mut SchemaItem> {
        self.categories.values_mut().flat_map(|items| items.values_mut())
    }

    pub fn items(&self) -> impl Iterator<Item = &SchemaItem> {
        SchemaCategory::ALL.into_iter().flat_map(|c| self.category(c))
    }

    /// Fast uniqueness check across every category, for rename/clone.
    pub fn contains_name(&self, name: &str) -> bool {
        self.all_names.contains(&name.to_lowercase())
    }

    /// Recomputes forward and reverse dependency edges from the parsed
    /// metas. A table or view named in an item's `__tables__` gains that
    /// item as a dependent.
    pub fn rebuild_dependencies(&mut self) {
        let mut forward: Vec<((SchemaCategory, String), (SchemaCategory, String))> = Vec::new();
        for item in self.items() {
            for referenced in item.referenced_tables() {
                let target = self
                    .get(SchemaCategory::Table, referenced)
                    .or_else(|| self.get(SchemaCategory::View, referenced));
                if let Some(target) = target {
                    forward.push((
                        (item.category, item.name.clone()),
                        (target.category, target.name.clone()),
                    ));
                }
            }
        }
        for item in self.items_mut() {
            item.dependencies.clear();
            item.dependents.clear();
        }
        for ((from_category, from_name), (to_category, to_name)) in forward {
            if let Some(item) = self.get_mut(from_category, &from_name) {
                item.dependencies.push((to_category, to_name.clone()));
            }
            if let Some(item) = self.get_mut(to_category, &to_name) {
                item.dependents.push((from_category, from_name.clone()));
            }
        }
    }

    /// Views ordered so every view appears after the views it selects
    /// from; tables are not part of the ordering.
    pub fn views_in_dependency_order(&self) -> Vec<String> {
        let views: Vec<&SchemaItem> = self.category(SchemaCategory::View).collect();
        let names: HashSet<String> = views.iter().map(|v| v.name.to_lowercase()).collect();
        let mut ordered = Vec::new();
        let mut done: HashSet<String> = HashSet::new();
        // Bounded passes; a dependency cycle degrades to scan order.
        for _ in 0..views.len() + 1 {
            let mut progressed = false;
            for view in &views {
                let key = view.name.to_lowercase();
                if done.contains(&key) {
                    continue;
                }
                let ready = view
                    .referenced_tables()
                    .iter()
                    .filter(|t| names.contains(*t) && **t != key)
                    .all(|t| done.contains(t));
                if ready {
                    done.insert(key);
                    ordered.push(view.name.clone());
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
        for view in &views {
            if !done.contains(&view.name.to_lowercase()) {
                ordered.push(view.name.clone());
            }
        }
        ordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(category: SchemaCategory, name: &str, sql: &str) -> SchemaItem {
        let mut item = SchemaItem::new(category, name, sql);
        item.meta = litescope_grammar::parse(sql, None, None).ok().map(Arc::new);
        item
    }

    #[test]
    fn lookups_fold_case_and_preserve_names() {
        let mut cache = SchemaCache::new();
        cache.insert(item(SchemaCategory::Table, "Customer", "CREATE TABLE Customer(id)"));
        let found = cache.get(SchemaCategory::Table, "CUSTOMER").unwrap();
        assert_eq!(found.name, "Customer");
        assert!(cache.contains_name("customer"));
    }

    #[test]
    fn dependents_mirror_referenced_tables() {
        let mut cache = SchemaCache::new();
        cache.insert(item(SchemaCategory::Table, "t", "CREATE TABLE t(a)"));
        cache.insert(item(
            SchemaCategory::View,
            "v",
            "CREATE VIEW v AS SELECT a FROM t",
        ));
        cache.rebuild_dependencies();

        let table = cache.get(SchemaCategory::Table, "t").unwrap();
        assert_eq!(table.dependents, vec![(SchemaCategory::View, "v".to_string())]);
        let view = cache.get(SchemaCategory::View, "v").unwrap();
        assert_eq!(view.dependencies, vec![(SchemaCategory::Table, "t".to_string())]);
    }

    #[test]
    fn unparseable_items_are_leaves() {
        let mut cache = SchemaCache::new();
        cache.insert(item(SchemaCategory::Table, "t", "CREATE TABLE t(a)"));
        cache.insert(SchemaItem::new(
            SchemaCategory::View,
            "broken",
            "CREATE VIEW broken AS SELECT ?? FROM t",
        ));
        cache.rebuild_dependencies();
        assert!(cache.get(SchemaCategory::Table, "t").unwrap().dependents.is_empty());
    }

    #[test]
    fn view_order_respects_dependencies() {
        let mut cache = SchemaCache::new();
        cache.insert(item(SchemaCategory::Table, "t", "CREATE TABLE t(a)"));
        cache.insert(item(
            SchemaCategory::View,
            "v2",
            "CREATE VIEW v2 AS SELECT a FROM v1",
        ));
        cache.insert(item(
            SchemaCategory::View,
            "v1",
            "CREATE VIEW v1 AS SELECT a FROM t",
        ));
        assert_eq!(cache.views_in_dependency_order(), vec!["v1", "v2"]);
    }
}
