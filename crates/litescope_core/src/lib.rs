//! Core engine of a SQLite database tool: database facade with a
//! categorized schema cache, dependency and key graphs, full-text
//! search over schema and data, and background workers with
//! cooperative cancellation and lock accounting.

mod analyzer;
mod checksum;
mod config;
mod database;
mod detect;
mod error;
mod events;
mod history;
mod locks;
mod pragma;
mod recent;
mod schema;
mod value;
mod worker;

pub mod search;

pub use analyzer::{AnalyzerEmission, DatabaseStatistics, TableStatistics, parse_analyzer_output};
pub use checksum::ChecksumEmission;
pub use config::{CoreConfig, DB_EXTENSIONS, SQLITE_MAGIC};
pub use database::{
    ActionOutcome, Database, PopulateProgress, RelatedOptions, is_sqlite_file,
};
pub use detect::DetectEmission;
pub use error::DbError;
pub use events::{CoreEvent, EventBus};
pub use history::{ActionEntry, HistoryStore};
pub use locks::{LockOwner, LockRegistry};
pub use recent::{RecentFile, RecentFiles};
pub use pragma::{CATALOG as PRAGMA_CATALOG, PragmaChange, PragmaInfo, PragmaType, find as find_pragma};
pub use schema::{
    ColumnInfo, KeyRelation, RelatedItems, SchemaCache, SchemaCategory, SchemaItem,
};
pub use value::{Row, Value};
pub use worker::{
    CancelToken, TaskEmission, Worker, analyzer_worker, checksum_worker, detect_worker,
    import_folder_worker, search_worker, task_worker,
};
