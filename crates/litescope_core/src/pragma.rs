//! Static catalog of the documented PRAGMA surface.
//!
//! Unknown PRAGMAs still pass through `execute` verbatim; the catalog
//! only drives the pragma editor and `get_pragma_values`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PragmaType {
    Bool,
    Int,
    String,
    /// Result is a table of rows rather than a single value.
    Table,
}

#[derive(Debug, Clone, Copy)]
pub struct PragmaInfo {
    pub name: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    pub pragma_type: PragmaType,
    /// Value labels for enumerated int pragmas, as (value, label).
    pub values: &'static [(i64, &'static str)],
    pub read: bool,
    pub write: bool,
    pub deprecated: bool,
}

/// A pragma change pending save, emitted to the host for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PragmaChange {
    pub name: String,
    pub value: serde_json::Value,
}

macro_rules! pragma {
    ($name:literal, $label:literal, $type:ident, $desc:literal) => {
        pragma!($name, $label, $type, $desc, values: &[], read: true, write: true, deprecated: false)
    };
    ($name:literal, $label:literal, $type:ident, $desc:literal, values: $values:expr) => {
        pragma!($name, $label, $type, $desc, values: $values, read: true, write: true, deprecated: false)
    };
    ($name:literal, $label:literal, $type:ident, $desc:literal, read_only) => {
        pragma!($name, $label, $type, $desc, values: &[], read: true, write: false, deprecated: false)
    };
    ($name:literal, $label:literal, $type:ident, $desc:literal, deprecated) => {
        pragma!($name, $label, $type, $desc, values: &[], read: true, write: true, deprecated: true)
    };
    ($name:literal, $label:literal, $type:ident, $desc:literal,
     values: $values:expr, read: $read:expr, write: $write:expr, deprecated: $deprecated:expr) => {
        PragmaInfo {
            name: $name,
            label: $label,
            description: $desc,
            pragma_type: PragmaType::$type,
            values: $values,
            read: $read,
            write: $write,
            deprecated: $deprecated,
        }
    };
}

pub const CATALOG: &[PragmaInfo] = &[
    pragma!("application_id", "Application ID", Int,
        "32-bit integer identifying the application that owns the file"),
    pragma!("auto_vacuum", "Auto-vacuum", Int,
        "Free-page reclamation mode",
        values: &[(0, "NONE"), (1, "FULL"), (2, "INCREMENTAL")]),
    pragma!("automatic_index", "Automatic indexes", Bool,
        "Allow the query planner to create transient indexes"),
    pragma!("busy_timeout", "Busy timeout", Int,
        "Milliseconds to wait on a locked database before failing"),
    pragma!("cache_size", "Cache size", Int,
        "Suggested page-cache size; negative values are KiB"),
    pragma!("cache_spill", "Cache spill", Bool,
        "Allow spilling dirty cache pages to disk mid-transaction"),
    pragma!("case_sensitive_like", "Case-sensitive LIKE", Bool,
        "Make LIKE case-sensitive for ASCII",
        values: &[], read: false, write: true, deprecated: false),
    pragma!("cell_size_check", "Cell size check", Bool,
        "Enable extra sanity checking of b-tree pages"),
    pragma!("checkpoint_fullfsync", "Checkpoint full fsync", Bool,
        "Use F_FULLFSYNC during WAL checkpoints"),
    pragma!("collation_list", "Collations", Table,
        "Collating sequences defined for the connection", read_only),
    pragma!("compile_options", "Compile options", Table,
        "Compile-time options of the SQLite library", read_only),
    pragma!("data_version", "Data version", Int,
        "Counter that changes when another connection commits", read_only),
    pragma!("database_list", "Databases", Table,
        "Attached databases with their files", read_only),
    pragma!("defer_foreign_keys", "Defer foreign keys", Bool,
        "Defer enforcement of foreign keys until COMMIT"),
    pragma!("encoding", "Encoding", String,
        "Text encoding of the database file"),
    pragma!("foreign_keys", "Foreign keys", Bool,
        "Enforce foreign key constraints"),
    pragma!("freelist_count", "Free pages", Int,
        "Number of unused pages in the file", read_only),
    pragma!("fullfsync", "Full fsync", Bool,
        "Use F_FULLFSYNC for all synchronous writes"),
    pragma!("ignore_check_constraints", "Ignore CHECK constraints", Bool,
        "Disable CHECK constraint enforcement"),
    pragma!("integrity_check", "Integrity check", Table,
        "Verify the whole file structure", read_only),
    pragma!("journal_mode", "Journal mode", String,
        "Rollback journal mode (delete, truncate, persist, memory, wal, off)"),
    pragma!("journal_size_limit", "Journal size limit", Int,
        "Maximum size of the journal or WAL file in bytes"),
    pragma!("legacy_alter_table", "Legacy ALTER TABLE", Bool,
        "Pre-3.25 RENAME semantics that leave references untouched"),
    pragma!("locking_mode", "Locking mode", String,
        "normal or exclusive file locking"),
    pragma!("max_page_count", "Max page count", Int,
        "Maximum number of pages in the file"),
    pragma!("mmap_size", "Memory-map size", Int,
        "Maximum bytes accessed with memory-mapped I/O"),
    pragma!("page_count", "Page count", Int,
        "Total number of pages in the file", read_only),
    pragma!("page_size", "Page size", Int,
        "Page size in bytes; takes effect on VACUUM"),
    pragma!("query_only", "Query only", Bool,
        "Reject all writes on this connection"),
    pragma!("quick_check", "Quick check", Table,
        "Integrity check without index content verification", read_only),
    pragma!("read_uncommitted", "Read uncommitted", Bool,
        "Read uncommitted content in shared-cache mode"),
    pragma!("recursive_triggers", "Recursive triggers", Bool,
        "Allow triggers to fire other triggers recursively"),
    pragma!("reverse_unordered_selects", "Reverse unordered selects", Bool,
        "Reverse result order of unordered SELECTs, for testing"),
    pragma!("schema_version", "Schema version", Int,
        "Counter incremented on every schema change"),
    pragma!("secure_delete", "Secure delete", Bool,
        "Overwrite deleted content with zeros"),
    pragma!("synchronous", "Synchronous", Int,
        "How aggressively data is flushed to disk",
        values: &[(0, "OFF"), (1, "NORMAL"), (2, "FULL"), (3, "EXTRA")]),
    pragma!("temp_store", "Temporary store", Int,
        "Where temporary tables and indexes are kept",
        values: &[(0, "DEFAULT"), (1, "FILE"), (2, "MEMORY")]),
    pragma!("user_version", "User version", Int,
        "32-bit integer at the application's disposal"),
    pragma!("wal_autocheckpoint", "WAL auto-checkpoint", Int,
        "Pages accumulated in the WAL before an automatic checkpoint"),
    pragma!("count_changes", "Count changes", Bool,
        "Have DML statements report their row counts", deprecated),
    pragma!("default_cache_size", "Default cache size", Int,
        "Persistent page-cache size", deprecated),
    pragma!("empty_result_callbacks", "Empty result callbacks", Bool,
        "Invoke callbacks for empty result sets", deprecated),
    pragma!("full_column_names", "Full column names", Bool,
        "Use table.column naming in result sets", deprecated),
    pragma!("short_column_names", "Short column names", Bool,
        "Use bare column naming in result sets", deprecated),
];

pub fn find(name: &str) -> Option<&'static PragmaInfo> {
    CATALOG.iter().find(|p| p.name.eq_ignore_ascii_case(name))
}

/// Pragmas whose read side is a single value (everything non-table and
/// readable).
pub fn readable_value_pragmas() -> impl Iterator<Item = &'static PragmaInfo> {
    CATALOG
        .iter()
        .filter(|p| p.read && p.pragma_type != PragmaType::Table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert!(find("FOREIGN_KEYS").is_some());
        assert!(find("no_such_pragma").is_none());
    }

    #[test]
    fn catalog_is_well_formed() {
        for info in CATALOG {
            assert!(!info.label.is_empty(), "{} has no label", info.name);
            assert!(info.read || info.write, "{} neither reads nor writes", info.name);
        }
        assert!(readable_value_pragmas().count() > 20);
    }
}
