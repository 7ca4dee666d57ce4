//! The database facade: owns one SQLite connection, the categorized
//! schema cache, the lock registry and the consumer set.
//!
//! All statement execution happens on the calling thread under a mutex
//! held for a single statement at a time; long operations acquire it in
//! windows so workers can interleave.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime};

use indexmap::IndexMap;
use litescope_grammar::{ParseCache, Renames, Statement, generate, quote, transform};
use rusqlite::types::ToSql;
use rusqlite::{Connection as SqliteConnection, InterruptHandle};
use uuid::Uuid;

use crate::config::{CoreConfig, SQLITE_MAGIC};
use crate::error::DbError;
use crate::events::{CoreEvent, EventBus};
use crate::history::{ActionEntry, HistoryStore};
use crate::locks::{LockOwner, LockRegistry};
use crate::pragma::{self, PragmaChange};
use crate::schema::{
    ColumnInfo, KeyRelation, RelatedItems, SchemaCache, SchemaCategory, SchemaItem,
};
use crate::value::{Row, Value};

/// Statement kinds that invalidate the schema cache.
const SCHEMA_ALTERING: &[&str] = &["CREATE", "ALTER", "DROP", "REINDEX", "VACUUM"];

/// Outcome of a mutating statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionOutcome {
    pub affected_rows: u64,
    /// Set for INSERT statements.
    pub last_insert_rowid: Option<i64>,
}

/// Progress callback payload for [`Database::populate_schema`];
/// returning `false` aborts the scan.
#[derive(Debug, Clone, Copy)]
pub struct PopulateProgress<'a> {
    pub category: SchemaCategory,
    pub name: &'a str,
    pub index: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RelatedOptions {
    /// Include children: indexes and triggers of the item.
    pub own: bool,
    /// Include foreign-key linked tables.
    pub data: bool,
    /// Include everything a clone needs (children again, for a table).
    pub clone: bool,
}

pub struct Database {
    conn: Mutex<Option<SqliteConnection>>,
    interrupt: InterruptHandle,
    path: Mutex<PathBuf>,
    temp_path: Mutex<Option<tempfile::TempPath>>,
    consumers: Mutex<HashSet<Uuid>>,
    cache: Mutex<SchemaCache>,
    locks: LockRegistry,
    events: EventBus,
    config: CoreConfig,
    parse_cache: ParseCache,
    history: Mutex<HistoryStore>,
    pragma_changes: Mutex<Vec<PragmaChange>>,
    /// Owner token for the database's own global locks.
    token: LockOwner,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Opens an existing database file (or creates an empty one) and
    /// performs the initial schema scan without parsing or counts.
    pub fn open(path: impl AsRef<Path>, config: CoreConfig) -> Result<Arc<Self>, DbError> {
        let path = path.as_ref().to_path_buf();
        if let Ok(meta) = std::fs::metadata(&path)
            && meta.len() > 0
            && !is_sqlite_file(&path)?
        {
            return Err(DbError::NotADatabase(path.display().to_string()));
        }
        let conn = SqliteConnection::open(&path)
            .map_err(|e| DbError::query("open", &e))?;
        Self::finish_open(conn, path, None, config)
    }

    /// Creates a database in the OS temp directory; the file is deleted
    /// on close unless promoted with [`Database::save_as`].
    pub fn open_temporary(config: CoreConfig) -> Result<Arc<Self>, DbError> {
        let file = tempfile::Builder::new()
            .prefix("litescope-")
            .suffix(".db")
            .tempfile()?;
        let temp_path = file.into_temp_path();
        let path = temp_path.to_path_buf();
        let conn = SqliteConnection::open(&path)
            .map_err(|e| DbError::query("open", &e))?;
        Self::finish_open(conn, path, Some(temp_path), config)
    }

    fn finish_open(
        conn: SqliteConnection,
        path: PathBuf,
        temp_path: Option<tempfile::TempPath>,
        config: CoreConfig,
    ) -> Result<Arc<Self>, DbError> {
        conn.execute_batch("PRAGMA foreign_keys = ON")
            .map_err(|e| DbError::query("PRAGMA foreign_keys = ON", &e))?;
        let interrupt = conn.get_interrupt_handle();
        let events = EventBus::new();
        let db = Arc::new(Self {
            conn: Mutex::new(Some(conn)),
            interrupt,
            path: Mutex::new(path),
            temp_path: Mutex::new(temp_path),
            consumers: Mutex::new(HashSet::new()),
            cache: Mutex::new(SchemaCache::new()),
            locks: LockRegistry::new(events.clone()),
            events,
            parse_cache: ParseCache::new(config.max_parse_cache),
            history: Mutex::new(HistoryStore::new(config.max_history_size)),
            pragma_changes: Mutex::new(Vec::new()),
            config,
            token: Uuid::new_v4(),
        });
        db.populate_schema(None, None, false, false, None)?;
        Ok(db)
    }

    // ------------------------------------------------------------------
    // Lifecycle

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// The bounded parse-result cache, for host-side persistence.
    pub fn parse_cache(&self) -> &ParseCache {
        &self.parse_cache
    }

    pub fn token(&self) -> LockOwner {
        self.token
    }

    pub fn path(&self) -> PathBuf {
        self.path.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn is_temporary(&self) -> bool {
        self.temp_path.lock().map(|t| t.is_some()).unwrap_or(false)
    }

    pub fn is_open(&self) -> bool {
        self.conn.lock().map(|c| c.is_some()).unwrap_or(false)
    }

    pub fn file_size(&self) -> u64 {
        std::fs::metadata(self.path()).map(|m| m.len()).unwrap_or(0)
    }

    pub fn last_modified(&self) -> Option<SystemTime> {
        std::fs::metadata(self.path()).and_then(|m| m.modified()).ok()
    }

    pub fn register_consumer(&self) -> Uuid {
        let id = Uuid::new_v4();
        if let Ok(mut consumers) = self.consumers.lock() {
            consumers.insert(id);
        }
        id
    }

    pub fn unregister_consumer(&self, id: Uuid) {
        if let Ok(mut consumers) = self.consumers.lock() {
            consumers.remove(&id);
        }
        self.locks.unlock_all(id);
    }

    pub fn has_consumers(&self) -> bool {
        self.consumers.lock().map(|c| !c.is_empty()).unwrap_or(false)
    }

    /// Closes the connection; a temporary file is deleted. Later
    /// operations fail with [`DbError::Closed`].
    pub fn close(&self) {
        if let Ok(mut conn) = self.conn.lock() {
            conn.take();
        }
        if let Ok(mut temp) = self.temp_path.lock()
            && let Some(temp_path) = temp.take()
        {
            if let Err(error) = temp_path.close() {
                log::warn!("could not remove temporary database: {error}");
            }
        }
        log::info!("database closed: {}", self.path().display());
    }

    /// Promotes the database to `path`: the content is copied there and
    /// the temporary file, if any, stays scheduled for deletion.
    pub fn save_as(&self, path: impl AsRef<Path>) -> Result<(), DbError> {
        let target = path.as_ref().to_path_buf();
        self.with_conn(|conn| {
            conn.execute_batch("PRAGMA wal_checkpoint(FULL)").ok();
            Ok(())
        })?;
        std::fs::copy(self.path(), &target)?;
        if let Ok(mut temp) = self.temp_path.lock() {
            temp.take();
        }
        if let Ok(mut current) = self.path.lock() {
            *current = target;
        }
        Ok(())
    }

    /// Signals the driver to abort the statement currently executing.
    pub fn interrupt(&self) {
        log::info!("[CANCEL] interrupt signal sent");
        self.interrupt.interrupt();
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&SqliteConnection) -> Result<T, DbError>,
    ) -> Result<T, DbError> {
        let guard = self
            .conn
            .lock()
            .map_err(|_| DbError::Query {
                sql: String::new(),
                message: "connection lock poisoned".to_string(),
            })?;
        let conn = guard.as_ref().ok_or(DbError::Closed)?;
        f(conn)
    }

    // ------------------------------------------------------------------
    // Statement execution

    /// Runs a read statement and materializes the rows. The schema cache
    /// is not touched.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql).map_err(|e| DbError::query(sql, &e))?;
            let columns: Arc<Vec<String>> =
                Arc::new(stmt.column_names().iter().map(|c| c.to_string()).collect());
            let sql_params: Vec<rusqlite::types::Value> =
                params.iter().map(Value::to_param).collect();
            let mut rows = stmt
                .query(rusqlite::params_from_iter(sql_params))
                .map_err(|e| DbError::query(sql, &e))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(|e| DbError::query(sql, &e))? {
                let values = (0..columns.len())
                    .map(|i| {
                        row.get_ref(i)
                            .map(Value::from_sql)
                            .unwrap_or(Value::Null)
                    })
                    .collect();
                out.push(Row { columns: columns.clone(), values });
            }
            Ok(out)
        })
    }

    /// Column names a statement would produce, without running it.
    pub fn query_columns(&self, sql: &str) -> Result<Vec<String>, DbError> {
        self.with_conn(|conn| {
            let stmt = conn.prepare(sql).map_err(|e| DbError::query(sql, &e))?;
            Ok(stmt.column_names().iter().map(|c| c.to_string()).collect())
        })
    }

    /// Runs a read statement with named parameters (`:name` form).
    pub fn execute_named(
        &self,
        sql: &str,
        params: &[(String, Value)],
    ) -> Result<Vec<Row>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql).map_err(|e| DbError::query(sql, &e))?;
            let columns: Arc<Vec<String>> =
                Arc::new(stmt.column_names().iter().map(|c| c.to_string()).collect());
            let owned: Vec<(String, rusqlite::types::Value)> = params
                .iter()
                .map(|(name, value)| (name.clone(), value.to_param()))
                .collect();
            let refs: Vec<(&str, &dyn ToSql)> = owned
                .iter()
                .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
                .collect();
            let mut rows = stmt
                .query(refs.as_slice())
                .map_err(|e| DbError::query(sql, &e))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(|e| DbError::query(sql, &e))? {
                let values = (0..columns.len())
                    .map(|i| {
                        row.get_ref(i)
                            .map(Value::from_sql)
                            .unwrap_or(Value::Null)
                    })
                    .collect();
                out.push(Row { columns: columns.clone(), values });
            }
            Ok(out)
        })
    }

    /// Runs one parameterized mutating statement without action logging,
    /// for bulk loads. Returns the affected row count.
    pub fn execute_params(&self, sql: &str, params: &[Value]) -> Result<u64, DbError> {
        self.with_conn(|conn| {
            let sql_params: Vec<rusqlite::types::Value> =
                params.iter().map(Value::to_param).collect();
            let affected = conn
                .execute(sql, rusqlite::params_from_iter(sql_params))
                .map_err(|e| DbError::query(sql, &e))?;
            Ok(affected as u64)
        })
    }

    /// Executes one statement that may mutate data or schema. Logs the
    /// action and invalidates the schema cache for DDL.
    pub fn execute_action(
        &self,
        sql: &str,
        name: Option<&str>,
    ) -> Result<ActionOutcome, DbError> {
        let started = Instant::now();
        let first_word = leading_keyword(sql);
        let outcome = self.with_conn(|conn| {
            let affected = conn.execute(sql, []).map_err(|e| DbError::query(sql, &e))?;
            let last_insert_rowid =
                (first_word.as_deref() == Some("INSERT")).then(|| conn.last_insert_rowid());
            Ok(ActionOutcome { affected_rows: affected as u64, last_insert_rowid })
        })?;

        self.log_action(name, sql, started, Some(outcome.affected_rows));
        if first_word
            .as_deref()
            .is_some_and(|w| SCHEMA_ALTERING.contains(&w))
        {
            self.invalidate_schema(None, None);
        }
        Ok(outcome)
    }

    /// Runs a multi-statement script, invalidating the cache when any
    /// statement is schema-altering.
    pub fn execute_script(&self, sql: &str, name: Option<&str>) -> Result<(), DbError> {
        let started = Instant::now();
        self.with_conn(|conn| {
            conn.execute_batch(sql).map_err(|e| DbError::query(sql, &e))
        })?;
        self.log_action(name, sql, started, None);
        if script_alters_schema(sql) {
            self.invalidate_schema(None, None);
        }
        Ok(())
    }

    /// Runs a BEGIN..COMMIT script, rolling back when any statement
    /// fails so the connection is not left inside a transaction.
    fn run_transaction_script(&self, script: &str, name: Option<&str>) -> Result<(), DbError> {
        match self.execute_script(script, name) {
            Ok(()) => Ok(()),
            Err(error) => {
                if let Err(rollback_error) = self.execute_script("ROLLBACK", None) {
                    log::debug!("rollback after failed script: {rollback_error}");
                }
                Err(error)
            }
        }
    }

    fn log_action(
        &self,
        name: Option<&str>,
        sql: &str,
        started: Instant,
        affected: Option<u64>,
    ) {
        if let Ok(mut history) = self.history.lock() {
            history.push(ActionEntry::new(
                name.map(|n| n.to_string()),
                sql.to_string(),
                started.elapsed(),
                affected,
            ));
        }
        self.events.emit(CoreEvent::ActionLogged {
            name: name.map(|n| n.to_string()),
            sql: sql.to_string(),
        });
    }

    pub fn with_history<T>(&self, f: impl FnOnce(&HistoryStore) -> T) -> Option<T> {
        self.history.lock().ok().map(|h| f(&h))
    }

    fn invalidate_schema(&self, category: Option<SchemaCategory>, name: Option<&str>) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.mark_stale();
        }
        self.events.emit(CoreEvent::SchemaInvalidated {
            category,
            name: name.map(|n| n.to_string()),
        });
    }

    // ------------------------------------------------------------------
    // Schema cache

    /// Re-reads `sqlite_master` into the cache. `parse` builds meta
    /// trees through the bounded parse cache; `count` fills row counts
    /// per the estimation policy. The progress callback may return
    /// `false` to abort.
    pub fn populate_schema(
        &self,
        category: Option<SchemaCategory>,
        name: Option<&str>,
        count: bool,
        parse: bool,
        mut progress: Option<&mut dyn FnMut(&PopulateProgress<'_>) -> bool>,
    ) -> Result<(), DbError> {
        let rows = self.with_conn(|conn| {
            let mut sql = "SELECT type, name, sql FROM sqlite_master \
                           WHERE name NOT LIKE 'sqlite_%'"
                .to_string();
            if category.is_some() {
                sql.push_str(" AND type = ?1");
            }
            if name.is_some() {
                sql.push_str(if category.is_some() {
                    " AND name = ?2 COLLATE NOCASE"
                } else {
                    " AND name = ?1 COLLATE NOCASE"
                });
            }
            sql.push_str(" ORDER BY type, name");

            let mut stmt = conn.prepare(&sql).map_err(|e| DbError::query(&sql, &e))?;
            let mut binds: Vec<String> = Vec::new();
            if let Some(category) = category {
                binds.push(category.master_type().to_string());
            }
            if let Some(name) = name {
                binds.push(name.to_string());
            }
            let mut rows = stmt
                .query(rusqlite::params_from_iter(binds))
                .map_err(|e| DbError::query(&sql, &e))?;
            let mut out: Vec<(String, String, Option<String>)> = Vec::new();
            while let Some(row) = rows.next().map_err(|e| DbError::query(&sql, &e))? {
                out.push((
                    row.get(0).unwrap_or_default(),
                    row.get(1).unwrap_or_default(),
                    row.get(2).ok(),
                ));
            }
            Ok(out)
        })?;

        let total = rows.len();
        let mut items = Vec::with_capacity(total);
        for (index, (master_type, item_name, sql)) in rows.into_iter().enumerate() {
            let Some(item_category) = SchemaCategory::from_master_type(&master_type) else {
                continue;
            };
            let sql = sql.unwrap_or_default();
            self.events.emit(CoreEvent::Progress {
                task: "schema scan".to_string(),
                index,
                count: Some(total),
                done: false,
            });
            if let Some(callback) = progress.as_mut() {
                let update = PopulateProgress {
                    category: item_category,
                    name: &item_name,
                    index,
                    total,
                };
                if !callback(&update) {
                    return Err(DbError::Cancelled);
                }
            }
            let mut item = SchemaItem::new(item_category, item_name, sql);
            if parse && !item.sql.is_empty() {
                match self
                    .parse_cache
                    .parse(&item.sql, Some(item_category.expected_kind()))
                {
                    Ok(meta) => item.meta = Some(meta),
                    Err(error) => {
                        log::warn!(
                            "[SCHEMA] {} \"{}\" did not parse: {error}",
                            item_category,
                            item.name
                        );
                        item.parse_error = Some(error.to_string());
                    }
                }
            }
            if matches!(item_category, SchemaCategory::Table | SchemaCategory::View) {
                item.columns = self.read_columns(&item.name, item.meta.as_deref())?;
            }
            if count && item_category == SchemaCategory::Table {
                let (rows, estimated) = self.count_rows_item(&item)?;
                item.row_count = Some(rows);
                item.is_count_estimated = estimated;
            }
            items.push(item);
        }

        let mut cache = self.cache.lock().map_err(|_| DbError::Closed)?;
        if category.is_none() && name.is_none() {
            cache.clear();
        } else {
            for item in &items {
                cache.remove(item.category, &item.name);
            }
        }
        for item in items {
            cache.insert(item);
        }
        cache.rebuild_dependencies();
        if category.is_none() && name.is_none() {
            cache.mark_fresh();
        }
        drop(cache);
        self.events.emit(CoreEvent::Progress {
            task: "schema scan".to_string(),
            index: total,
            count: Some(total),
            done: true,
        });
        Ok(())
    }

    fn refresh_if_stale(&self) -> Result<(), DbError> {
        let stale = self
            .cache
            .lock()
            .map(|c| c.is_stale())
            .map_err(|_| DbError::Closed)?;
        if stale {
            self.populate_schema(None, None, false, true, None)?;
        }
        Ok(())
    }

    /// Ensures the cache holds parsed metas (the initial scan skips
    /// parsing).
    pub fn ensure_parsed(&self) -> Result<(), DbError> {
        self.refresh_if_stale()?;
        let needs_parse = self
            .cache
            .lock()
            .map(|c| {
                c.items()
                    .any(|i| i.meta.is_none() && i.parse_error.is_none() && !i.sql.is_empty())
            })
            .map_err(|_| DbError::Closed)?;
        if needs_parse {
            self.populate_schema(None, None, false, true, None)?;
        }
        Ok(())
    }

    fn read_columns(
        &self,
        relation: &str,
        meta: Option<&Statement>,
    ) -> Result<Vec<ColumnInfo>, DbError> {
        let sql = format!("PRAGMA table_info({})", quote(relation));
        let rows = self.execute(&sql, &[])?;
        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let name = row
                .get("name")
                .and_then(|v| v.as_text())
                .unwrap_or_default()
                .to_string();
            let declared = row
                .get("type")
                .and_then(|v| v.as_text())
                .filter(|t| !t.is_empty())
                .map(|t| t.to_string());
            let not_null = row.get("notnull").and_then(Value::as_integer) == Some(1);
            let default_value = row
                .get("dflt_value")
                .filter(|v| !v.is_null())
                .map(Value::to_display_string);
            let pk = row.get("pk").and_then(Value::as_integer).unwrap_or(0);
            columns.push(ColumnInfo {
                name,
                declared_type: declared,
                not_null,
                default_value,
                pk_position: (pk > 0).then_some(pk as usize),
            });
        }
        // The parsed type wins for display; table_info wins for
        // existence.
        if let Some(Statement::Table(table)) = meta {
            for column in &mut columns {
                if let Some(parsed) = table
                    .columns
                    .iter()
                    .find(|c| c.name.eq_ignore_ascii_case(&column.name))
                    && parsed.col_type.is_some()
                {
                    column.declared_type = parsed.col_type.clone();
                }
            }
        }
        Ok(columns)
    }

    pub fn get_category(&self, category: SchemaCategory) -> Result<Vec<SchemaItem>, DbError> {
        self.refresh_if_stale()?;
        let cache = self.cache.lock().map_err(|_| DbError::Closed)?;
        Ok(cache.category(category).cloned().collect())
    }

    pub fn get_item(
        &self,
        category: SchemaCategory,
        name: &str,
    ) -> Result<Option<SchemaItem>, DbError> {
        self.refresh_if_stale()?;
        let cache = self.cache.lock().map_err(|_| DbError::Closed)?;
        Ok(cache.get(category, name).cloned())
    }

    // ------------------------------------------------------------------
    // Row counts

    fn count_rows_item(&self, item: &SchemaItem) -> Result<(u64, bool), DbError> {
        let quoted = quote(&item.name);
        let without_rowid = matches!(
            item.meta.as_deref(),
            Some(Statement::Table(table)) if table.without_rowid
        );
        if without_rowid || self.file_size() <= self.config.max_db_size_for_full_count {
            return Ok((self.exact_count(&quoted)?, false));
        }
        let max_rowid = self
            .execute(&format!("SELECT MAX(ROWID) FROM {quoted}"), &[])?
            .first()
            .and_then(|row| row.values.first().and_then(Value::as_integer))
            .unwrap_or(0);
        if max_rowid <= self.config.max_table_rowid_for_full_count {
            return Ok((self.exact_count(&quoted)?, false));
        }
        Ok((max_rowid.max(0) as u64, true))
    }

    fn exact_count(&self, quoted: &str) -> Result<u64, DbError> {
        let count = self
            .execute(&format!("SELECT COUNT(*) FROM {quoted}"), &[])?
            .first()
            .and_then(|row| row.values.first().and_then(Value::as_integer))
            .unwrap_or(0);
        Ok(count.max(0) as u64)
    }

    /// Row count for one table, per the estimation policy.
    pub fn count_rows(&self, table: &str) -> Result<(u64, bool), DbError> {
        let item = self
            .get_item(SchemaCategory::Table, table)?
            .ok_or_else(|| DbError::Query {
                sql: String::new(),
                message: format!("no such table: {table}"),
            })?;
        self.count_rows_item(&item)
    }

    // ------------------------------------------------------------------
    // SQL retrieval

    /// Canonical SQL for one item, a whole category, or the full schema
    /// in dependency order (tables, indexes, triggers, then views
    /// topologically).
    pub fn get_sql(
        &self,
        category: Option<SchemaCategory>,
        name: Option<&str>,
    ) -> Result<String, DbError> {
        self.ensure_parsed()?;
        let cache = self.cache.lock().map_err(|_| DbError::Closed)?;
        let render = |item: &SchemaItem| -> String {
            let body = match &item.meta {
                Some(meta) => generate(meta, "  ").unwrap_or_else(|_| item.sql.clone()),
                None => item.sql.clone(),
            };
            format!("{body};")
        };

        if let (Some(category), Some(name)) = (category, name) {
            let item = cache.get(category, name).ok_or_else(|| DbError::Query {
                sql: String::new(),
                message: format!("no such {category}: {name}"),
            })?;
            return Ok(render(item));
        }

        let mut parts = Vec::new();
        let categories = match category {
            Some(category) => vec![category],
            None => vec![
                SchemaCategory::Table,
                SchemaCategory::Index,
                SchemaCategory::Trigger,
                SchemaCategory::View,
            ],
        };
        for current in categories {
            if current == SchemaCategory::View {
                for view_name in cache.views_in_dependency_order() {
                    if let Some(item) = cache.get(SchemaCategory::View, &view_name) {
                        parts.push(render(item));
                    }
                }
            } else {
                for item in cache.category(current) {
                    parts.push(render(item));
                }
            }
        }
        Ok(parts.join("\n\n"))
    }

    /// The rowid expression for a table: `None` for WITHOUT ROWID tables
    /// (position identification must fall back to primary-key columns).
    pub fn get_rowid(&self, table: &str) -> Result<Option<&'static str>, DbError> {
        let item = self
            .get_item(SchemaCategory::Table, table)?
            .ok_or_else(|| DbError::Query {
                sql: String::new(),
                message: format!("no such table: {table}"),
            })?;
        if matches!(item.meta.as_deref(), Some(Statement::Table(t)) if t.without_rowid) {
            return Ok(None);
        }
        for candidate in ["rowid", "_rowid_", "oid"] {
            if !item
                .columns
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(candidate))
            {
                return Ok(Some(match candidate {
                    "rowid" => "rowid",
                    "_rowid_" => "_rowid_",
                    _ => "oid",
                }));
            }
        }
        Ok(None)
    }

    // ------------------------------------------------------------------
    // Related items and key graph

    pub fn get_related(
        &self,
        category: SchemaCategory,
        name: &str,
        options: RelatedOptions,
    ) -> Result<RelatedItems, DbError> {
        self.ensure_parsed()?;
        let cache = self.cache.lock().map_err(|_| DbError::Closed)?;
        let item = cache.get(category, name).ok_or_else(|| DbError::Query {
            sql: String::new(),
            message: format!("no such {category}: {name}"),
        })?;
        let lower = item.name.to_lowercase();
        let mut result = RelatedItems::default();

        if options.own || options.clone {
            for child in cache
                .category(SchemaCategory::Index)
                .chain(cache.category(SchemaCategory::Trigger))
            {
                if child.owner_table().as_deref() == Some(lower.as_str()) {
                    result.own.push((child.category, child.name.clone()));
                }
            }
        }
        if !options.own {
            let mut peers: Vec<(SchemaCategory, String)> = item.dependents.clone();
            for dep in &item.dependencies {
                if !peers.contains(dep) {
                    peers.push(dep.clone());
                }
            }
            // Children are not peers.
            peers.retain(|(peer_category, peer_name)| {
                cache
                    .get(*peer_category, peer_name)
                    .and_then(|p| p.owner_table())
                    .as_deref()
                    != Some(lower.as_str())
            });
            result.related = peers;
        }
        if options.data && category == SchemaCategory::Table {
            drop(cache);
            let (local, foreign) = self.get_keys(name)?;
            let mut data: Vec<(SchemaCategory, String)> = Vec::new();
            for relation in local.iter().chain(foreign.iter()) {
                for other in relation.tables.keys() {
                    let entry = (SchemaCategory::Table, other.clone());
                    if !data.contains(&entry) {
                        data.push(entry);
                    }
                }
            }
            result.data = data;
        }
        Ok(result)
    }

    /// `(local_keys, foreign_keys)` for a table: primary/unique columns
    /// with the tables referencing them, and this table's foreign keys
    /// with their targets.
    pub fn get_keys(&self, table: &str) -> Result<(Vec<KeyRelation>, Vec<KeyRelation>), DbError> {
        self.refresh_if_stale()?;
        let item = self
            .get_item(SchemaCategory::Table, table)?
            .ok_or_else(|| DbError::Query {
                sql: String::new(),
                message: format!("no such table: {table}"),
            })?;

        let mut foreign: Vec<KeyRelation> = Vec::new();
        for (from_columns, target, to_columns) in self.foreign_key_groups(&item.name)? {
            let mut relation = KeyRelation { columns: from_columns, tables: IndexMap::new() };
            relation.tables.insert(target, to_columns);
            foreign.push(relation);
        }

        let mut local: Vec<KeyRelation> = Vec::new();
        let mut pk_columns: Vec<(usize, String)> = item
            .columns
            .iter()
            .filter_map(|c| c.pk_position.map(|p| (p, c.name.clone())))
            .collect();
        pk_columns.sort_by_key(|(p, _)| *p);
        if !pk_columns.is_empty() {
            local.push(KeyRelation {
                columns: pk_columns.into_iter().map(|(_, c)| c).collect(),
                tables: IndexMap::new(),
            });
        }

        // Reverse edges: other tables whose foreign keys point here.
        let lower = item.name.to_lowercase();
        let tables = self.get_category(SchemaCategory::Table)?;
        for other in tables.iter().filter(|t| t.name.to_lowercase() != lower) {
            for (from_columns, target, mut to_columns) in
                self.foreign_key_groups(&other.name)?
            {
                if target.to_lowercase() != lower {
                    continue;
                }
                if to_columns.is_empty() {
                    // Unnamed target columns reference the primary key.
                    to_columns = local
                        .first()
                        .map(|relation| relation.columns.clone())
                        .unwrap_or_default();
                }
                let at = local.iter().position(|relation| {
                    relation.columns.len() == to_columns.len()
                        && relation
                            .columns
                            .iter()
                            .zip(&to_columns)
                            .all(|(a, b)| a.eq_ignore_ascii_case(b))
                });
                let relation = match at {
                    Some(at) => &mut local[at],
                    None => {
                        local.push(KeyRelation { columns: to_columns, tables: IndexMap::new() });
                        local.last_mut().expect("just pushed")
                    }
                };
                relation.tables.insert(other.name.clone(), from_columns);
            }
        }
        Ok((local, foreign))
    }

    /// Foreign keys of one table as `(from_columns, target_table,
    /// to_columns)` groups, one per constraint.
    fn foreign_key_groups(
        &self,
        table: &str,
    ) -> Result<Vec<(Vec<String>, String, Vec<String>)>, DbError> {
        let sql = format!("PRAGMA foreign_key_list({})", quote(table));
        let rows = self.execute(&sql, &[])?;
        let mut groups: IndexMap<i64, (Vec<String>, String, Vec<String>)> = IndexMap::new();
        for row in rows {
            let id = row.get("id").and_then(Value::as_integer).unwrap_or(0);
            let target = row
                .get("table")
                .and_then(|v| v.as_text())
                .unwrap_or_default()
                .to_string();
            let from = row
                .get("from")
                .and_then(|v| v.as_text())
                .unwrap_or_default()
                .to_string();
            let to = row.get("to").and_then(|v| v.as_text()).map(|t| t.to_string());
            let entry = groups.entry(id).or_insert_with(|| (Vec::new(), target, Vec::new()));
            entry.0.push(from);
            if let Some(to) = to {
                entry.2.push(to);
            }
        }
        Ok(groups.into_values().collect())
    }

    // ------------------------------------------------------------------
    // Structural changes

    fn check_unlocked(
        &self,
        category: Option<SchemaCategory>,
        name: Option<&str>,
        skip: &[LockOwner],
    ) -> Result<(), DbError> {
        if let Some(label) = self.locks.get_lock(category, name, skip) {
            return Err(DbError::LockConflict { label });
        }
        Ok(())
    }

    /// Renames a schema item, rewriting its own SQL and every dependent
    /// item's SQL through the grammar, inside one transaction.
    pub fn rename_item(
        &self,
        category: SchemaCategory,
        name: &str,
        new_name: &str,
        skip_locks: &[LockOwner],
    ) -> Result<(), DbError> {
        self.check_unlocked(Some(category), Some(name), skip_locks)?;
        self.ensure_parsed()?;
        {
            let cache = self.cache.lock().map_err(|_| DbError::Closed)?;
            if cache.get(category, name).is_none() {
                return Err(DbError::Query {
                    sql: String::new(),
                    message: format!("no such {category}: {name}"),
                });
            }
            if !name.eq_ignore_ascii_case(new_name) && cache.contains_name(new_name) {
                return Err(DbError::SchemaConflict {
                    category,
                    name: new_name.to_string(),
                });
            }
        }

        let mut renames = Renames::default();
        let map = std::iter::once((name.to_string(), new_name.to_string())).collect();
        match category {
            SchemaCategory::Table => renames.table = map,
            SchemaCategory::Index => renames.index = map,
            SchemaCategory::Trigger => renames.trigger = map,
            SchemaCategory::View => renames.view = map,
        }

        let mut script = String::from("BEGIN;\n");
        match category {
            SchemaCategory::Table => {
                script.push_str(&format!(
                    "ALTER TABLE {} RENAME TO {};\n",
                    quote(name),
                    quote(new_name)
                ));
            }
            SchemaCategory::Index => {
                script.push_str(&format!("DROP INDEX {};\n", quote(name)));
            }
            SchemaCategory::Trigger => {
                script.push_str(&format!("DROP TRIGGER {};\n", quote(name)));
            }
            SchemaCategory::View => {
                script.push_str(&format!("DROP VIEW {};\n", quote(name)));
            }
        }
        {
            let cache = self.cache.lock().map_err(|_| DbError::Closed)?;
            if category != SchemaCategory::Table {
                let item = cache.get(category, name).expect("checked above");
                let renamed = transform(&item.sql, None, Some(&renames), None)?;
                script.push_str(&renamed);
                script.push_str(";\n");
            }
            if matches!(category, SchemaCategory::Table | SchemaCategory::View) {
                let item = cache.get(category, name).expect("checked above");
                for (dep_category, dep_name) in &item.dependents {
                    // Tables reference through foreign keys which the
                    // driver rewrites during ALTER TABLE RENAME.
                    if !matches!(dep_category, SchemaCategory::View | SchemaCategory::Trigger) {
                        continue;
                    }
                    let Some(dependent) = cache.get(*dep_category, dep_name) else {
                        continue;
                    };
                    let renamed = transform(&dependent.sql, None, Some(&renames), None)?;
                    script.push_str(&format!(
                        "DROP {} {};\n{};\n",
                        dep_category.as_str().to_uppercase(),
                        quote(dep_name),
                        renamed
                    ));
                }
            }
        }
        script.push_str("COMMIT;");
        self.run_transaction_script(&script, Some("rename"))?;
        self.invalidate_schema(Some(category), Some(name));
        Ok(())
    }

    /// Renames a column, recreating dependent triggers and views with
    /// their SQL rewritten by the grammar.
    pub fn rename_column(
        &self,
        table: &str,
        column: &str,
        new_name: &str,
        skip_locks: &[LockOwner],
    ) -> Result<(), DbError> {
        self.check_unlocked(Some(SchemaCategory::Table), Some(table), skip_locks)?;
        self.ensure_parsed()?;
        let item = self
            .get_item(SchemaCategory::Table, table)?
            .ok_or_else(|| DbError::Query {
                sql: String::new(),
                message: format!("no such table: {table}"),
            })?;

        let mut renames = Renames::default();
        renames.column.insert(
            table.to_string(),
            std::iter::once((column.to_string(), new_name.to_string())).collect(),
        );

        let mut script = String::from("BEGIN;\n");
        let mut recreated: Vec<String> = Vec::new();
        {
            let cache = self.cache.lock().map_err(|_| DbError::Closed)?;
            for (dep_category, dep_name) in &item.dependents {
                if !matches!(dep_category, SchemaCategory::View | SchemaCategory::Trigger) {
                    continue;
                }
                let Some(dependent) = cache.get(*dep_category, dep_name) else {
                    continue;
                };
                script.push_str(&format!(
                    "DROP {} {};\n",
                    dep_category.as_str().to_uppercase(),
                    quote(dep_name)
                ));
                recreated.push(transform(&dependent.sql, None, Some(&renames), None)?);
            }
            // Triggers on the table itself refer to its columns too.
            for trigger in cache.category(SchemaCategory::Trigger) {
                if trigger.owner_table().as_deref() == Some(item.name.to_lowercase().as_str())
                    && !item
                        .dependents
                        .iter()
                        .any(|(_, n)| n.eq_ignore_ascii_case(&trigger.name))
                {
                    script.push_str(&format!("DROP TRIGGER {};\n", quote(&trigger.name)));
                    recreated.push(transform(&trigger.sql, None, Some(&renames), None)?);
                }
            }
        }
        script.push_str(&format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {};\n",
            quote(table),
            quote(column),
            quote(new_name)
        ));
        for sql in recreated {
            script.push_str(&sql);
            script.push_str(";\n");
        }
        script.push_str("COMMIT;");
        self.run_transaction_script(&script, Some("rename column"))?;
        self.invalidate_schema(Some(SchemaCategory::Table), Some(table));
        Ok(())
    }

    /// Drops a column by recreating the table without it (the pre-3.35
    /// fallback path). Dependents that referenced the column and became
    /// invalid are dropped and returned.
    pub fn drop_column(
        &self,
        table: &str,
        column: &str,
        skip_locks: &[LockOwner],
    ) -> Result<Vec<(SchemaCategory, String)>, DbError> {
        self.check_unlocked(Some(SchemaCategory::Table), Some(table), skip_locks)?;
        self.ensure_parsed()?;
        let item = self
            .get_item(SchemaCategory::Table, table)?
            .ok_or_else(|| DbError::Query {
                sql: String::new(),
                message: format!("no such table: {table}"),
            })?;
        let Some(Statement::Table(def)) = item.meta.as_deref() else {
            return Err(DbError::Query {
                sql: item.sql.clone(),
                message: format!("cannot drop a column of unparseable table {table}"),
            });
        };
        if !def
            .columns
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(column))
        {
            return Err(DbError::Query {
                sql: String::new(),
                message: format!("no such column: {table}.{column}"),
            });
        }

        // New definition without the column and without constraints that
        // referenced it.
        let mut new_def = def.clone();
        new_def
            .columns
            .retain(|c| !c.name.eq_ignore_ascii_case(column));
        new_def.constraints.retain(|constraint| {
            use litescope_grammar::TableConstraintKind as K;
            match &constraint.kind {
                K::PrimaryKey { columns, .. } | K::Unique { columns, .. } => !columns
                    .iter()
                    .any(|c| c.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(column))),
                K::ForeignKey { columns, .. } => {
                    !columns.iter().any(|c| c.eq_ignore_ascii_case(column))
                }
                K::Check { expr } => !mentions_word(expr, column),
            }
        });
        let temp_name = self.unique_name(&format!("{table}__new"))?;
        new_def.header.name = temp_name.clone();
        let create_sql = generate(&Statement::Table(new_def.clone()), "  ")?;

        let keep_columns: Vec<String> =
            new_def.columns.iter().map(|c| quote(&c.name)).collect();
        let column_list = keep_columns.join(", ");

        let related = self.get_related(
            SchemaCategory::Table,
            table,
            RelatedOptions { own: true, clone: true, data: false },
        )?;
        let mut dropped: Vec<(SchemaCategory, String)> = Vec::new();
        let mut restore: Vec<String> = Vec::new();
        {
            let cache = self.cache.lock().map_err(|_| DbError::Closed)?;
            for (child_category, child_name) in &related.own {
                let Some(child) = cache.get(*child_category, child_name) else {
                    continue;
                };
                if mentions_word(&child.sql, column) {
                    dropped.push((*child_category, child_name.clone()));
                } else {
                    restore.push(child.sql.clone());
                }
            }
            // Views referencing the column become invalid and go too.
            for view in cache.category(SchemaCategory::View) {
                if view
                    .referenced_tables()
                    .iter()
                    .any(|t| t == &item.name.to_lowercase())
                    && mentions_word(&view.sql, column)
                {
                    dropped.push((SchemaCategory::View, view.name.clone()));
                }
            }
        }

        let mut script = String::from("BEGIN;\n");
        script.push_str(&create_sql);
        script.push_str(";\n");
        script.push_str(&format!(
            "INSERT INTO {} ({column_list}) SELECT {column_list} FROM {};\n",
            quote(&temp_name),
            quote(table)
        ));
        for (dropped_category, dropped_name) in &dropped {
            if *dropped_category == SchemaCategory::View {
                script.push_str(&format!("DROP VIEW {};\n", quote(dropped_name)));
            }
        }
        script.push_str(&format!("DROP TABLE {};\n", quote(table)));
        script.push_str(&format!(
            "ALTER TABLE {} RENAME TO {};\n",
            quote(&temp_name),
            quote(table)
        ));
        for sql in restore {
            script.push_str(&sql);
            script.push_str(";\n");
        }
        script.push_str("COMMIT;");
        self.run_transaction_script(&script, Some("drop column"))?;
        self.invalidate_schema(Some(SchemaCategory::Table), Some(table));
        Ok(dropped)
    }

    fn unique_name(&self, base: &str) -> Result<String, DbError> {
        let cache = self.cache.lock().map_err(|_| DbError::Closed)?;
        if !cache.contains_name(base) {
            return Ok(base.to_string());
        }
        for i in 2.. {
            let candidate = format!("{base}{i}");
            if !cache.contains_name(&candidate) {
                return Ok(candidate);
            }
        }
        unreachable!()
    }

    // ------------------------------------------------------------------
    // Integrity and recovery

    /// Error strings from `PRAGMA integrity_check`; empty means clean.
    pub fn check_integrity(&self) -> Result<Vec<String>, DbError> {
        let rows = self.execute("PRAGMA integrity_check", &[])?;
        let messages: Vec<String> = rows
            .iter()
            .filter_map(|row| row.values.first().and_then(|v| v.as_text()))
            .filter(|message| !message.eq_ignore_ascii_case("ok"))
            .map(|message| message.to_string())
            .collect();
        Ok(messages)
    }

    /// Salvages readable content into a new database: CREATE statements
    /// that parse are replayed, rows stream in `seek_length` chunks, and
    /// chunks that raise are skipped and logged. Returns the error list.
    pub fn recover_data(&self, new_path: impl AsRef<Path>) -> Result<Vec<String>, DbError> {
        self.ensure_parsed()?;
        let mut errors = Vec::new();
        let target = SqliteConnection::open(new_path.as_ref())
            .map_err(|e| DbError::query("open", &e))?;
        target
            .execute_batch("PRAGMA foreign_keys = OFF")
            .map_err(|e| DbError::query("PRAGMA", &e))?;

        let tables = self.get_category(SchemaCategory::Table)?;
        for item in &tables {
            let sql = match &item.meta {
                Some(meta) => generate(meta, "  ").unwrap_or_else(|_| item.sql.clone()),
                None => {
                    errors.push(format!(
                        "table \"{}\": original SQL did not parse, copied verbatim",
                        item.name
                    ));
                    item.sql.clone()
                }
            };
            if let Err(error) = target.execute_batch(&sql) {
                errors.push(format!("table \"{}\": {error}", item.name));
                continue;
            }
            let quoted = quote(&item.name);
            let chunk = self.config.seek_length.max(1);
            let mut offset = 0usize;
            let mut failed_chunks = 0usize;
            loop {
                let page = match self.execute(
                    &format!("SELECT * FROM {quoted} LIMIT {chunk} OFFSET {offset}"),
                    &[],
                ) {
                    Ok(page) => page,
                    Err(error) => {
                        errors.push(format!(
                            "table \"{}\" rows {offset}..{}: {error}",
                            item.name,
                            offset + chunk
                        ));
                        // Leap over the damaged region.
                        offset += self.config.seek_leap_length.max(chunk);
                        failed_chunks += 1;
                        if failed_chunks >= 10 {
                            errors.push(format!(
                                "table \"{}\": giving up after {failed_chunks} failed chunks",
                                item.name
                            ));
                            break;
                        }
                        continue;
                    }
                };
                if page.is_empty() {
                    break;
                }
                let placeholders = vec!["?"; page[0].values.len()].join(", ");
                let insert = format!("INSERT INTO {quoted} VALUES ({placeholders})");
                for row in &page {
                    let params: Vec<rusqlite::types::Value> =
                        row.values.iter().map(Value::to_param).collect();
                    if let Err(error) =
                        target.execute(&insert, rusqlite::params_from_iter(params))
                    {
                        errors.push(format!("table \"{}\": {error}", item.name));
                    }
                }
                if page.len() < chunk {
                    break;
                }
                offset += chunk;
            }
        }

        // Secondary structure, best effort.
        for category in [SchemaCategory::Index, SchemaCategory::Trigger, SchemaCategory::View] {
            for item in self.get_category(category)? {
                if item.meta.is_none() {
                    errors.push(format!("{} \"{}\" skipped: unparseable", category, item.name));
                    continue;
                }
                if let Err(error) = target.execute_batch(&format!("{};", item.sql)) {
                    errors.push(format!("{} \"{}\": {error}", category, item.name));
                }
            }
        }
        for error in &errors {
            log::warn!("[RECOVER] {error}");
        }
        Ok(errors)
    }

    // ------------------------------------------------------------------
    // Pragmas

    /// Current value of every readable single-value pragma.
    pub fn get_pragma_values(&self) -> Result<IndexMap<String, Value>, DbError> {
        let mut values = IndexMap::new();
        for info in pragma::readable_value_pragmas() {
            let sql = format!("PRAGMA {}", info.name);
            match self.execute(&sql, &[]) {
                Ok(rows) => {
                    if let Some(value) = rows
                        .first()
                        .and_then(|row| row.values.first())
                        .cloned()
                    {
                        values.insert(info.name.to_string(), value);
                    }
                }
                Err(error) => log::debug!("pragma {} unreadable: {error}", info.name),
            }
        }
        Ok(values)
    }

    /// Stages a pragma change for the host to persist and apply later.
    pub fn stage_pragma_change(&self, change: PragmaChange) {
        if let Ok(mut changes) = self.pragma_changes.lock() {
            changes.retain(|c| c.name != change.name);
            changes.push(change);
        }
    }

    pub fn pending_pragma_changes(&self) -> Vec<PragmaChange> {
        self.pragma_changes
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Applies and clears the staged pragma changes.
    pub fn apply_pragma_changes(&self) -> Result<(), DbError> {
        let changes = {
            let mut staged = self
                .pragma_changes
                .lock()
                .map_err(|_| DbError::Closed)?;
            std::mem::take(&mut *staged)
        };
        for change in changes {
            let value = match &change.value {
                serde_json::Value::String(s) => format!("'{}'", s.replace('\'', "''")),
                other => other.to_string(),
            };
            let sql = format!("PRAGMA {} = {value}", change.name);
            self.execute_action(&sql, Some("pragma"))?;
        }
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.close();
    }
}

/// First keyword of a statement, upper-cased.
fn leading_keyword(sql: &str) -> Option<String> {
    sql.split_whitespace()
        .map(|w| w.trim_start_matches('('))
        .find(|w| w.chars().next().is_some_and(|c| c.is_ascii_alphabetic()))
        .map(|w| w.to_uppercase())
}

/// Whether any statement of the script is schema-altering.
fn script_alters_schema(sql: &str) -> bool {
    sql.split(';')
        .filter_map(leading_keyword)
        .any(|word| SCHEMA_ALTERING.contains(&word.as_str()))
}

/// Case-insensitive whole-word occurrence check, used to detect whether
/// dependent SQL mentions a column.
fn mentions_word(text: &str, word: &str) -> bool {
    let lower_text = text.to_lowercase();
    let lower_word = word.to_lowercase();
    let mut start = 0;
    while let Some(at) = lower_text[start..].find(&lower_word) {
        let begin = start + at;
        let end = begin + lower_word.len();
        let before_ok = begin == 0
            || !lower_text[..begin]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric() || c == '_');
        let after_ok = end >= lower_text.len()
            || !lower_text[end..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric() || c == '_');
        if before_ok && after_ok {
            return true;
        }
        start = end;
    }
    false
}

/// Checks the 16-byte SQLite magic.
pub fn is_sqlite_file(path: &Path) -> Result<bool, std::io::Error> {
    use std::io::Read;
    let mut file = std::fs::File::open(path)?;
    let mut magic = [0u8; 16];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(&magic == SQLITE_MAGIC),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}
