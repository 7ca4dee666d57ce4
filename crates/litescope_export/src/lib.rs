//! Iterator-driven export orchestration: rows stream from a SQLite
//! source into a pluggable sink, with progress, cooperative
//! cancellation, and per-subtask status on multi-table jobs.

mod csv;
mod database;
mod json;
mod sql;

use litescope_core::{CancelToken, Database, DbError, Value};
use thiserror::Error;

pub use csv::CsvSink;
pub use database::{DatabaseExportRequest, export_to_database};
pub use json::JsonSink;
pub use sql::SqlSink;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] ::csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("Export failed: {0}")]
    Failed(String),
}

/// Receives one export stream; format writers implement this.
pub trait RowSink {
    fn begin(&mut self, relation: &str, columns: &[String]) -> Result<(), ExportError>;
    fn row(&mut self, values: &[Value]) -> Result<(), ExportError>;
    fn end(&mut self) -> Result<(), ExportError>;
}

/// One export source: a query plus display metadata.
#[derive(Debug, Clone)]
pub struct ExportSource {
    /// Label for progress and subtask status, usually the table name.
    pub title: String,
    pub query: String,
    pub params: Vec<Value>,
    pub estimated_total: Option<u64>,
    pub is_total_estimated: bool,
}

impl ExportSource {
    pub fn table(db: &Database, name: &str) -> Result<Self, DbError> {
        let (count, estimated) = db.count_rows(name)?;
        Ok(Self {
            title: name.to_string(),
            query: format!("SELECT * FROM {}", litescope_grammar::quote(name)),
            params: Vec::new(),
            estimated_total: Some(count),
            is_total_estimated: estimated,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SubtaskStatus {
    pub title: String,
    pub rows: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ExportOutcome {
    pub subtasks: Vec<SubtaskStatus>,
    pub cancelled: bool,
}

impl ExportOutcome {
    pub fn is_complete_success(&self) -> bool {
        !self.cancelled && self.subtasks.iter().all(|s| s.error.is_none())
    }
}

/// Streams one source into the sink in `seek_length` windows, reporting
/// `(done, index, count)` and checking the cancel flag between rows.
pub fn export_source(
    db: &Database,
    source: &ExportSource,
    sink: &mut dyn RowSink,
    token: &CancelToken,
    progress: &mut dyn FnMut(bool, u64, Option<u64>) -> bool,
) -> Result<u64, ExportError> {
    let chunk = db.config().seek_length.max(1);
    let mut exported = 0u64;
    let mut offset = 0usize;
    let mut begun = false;
    loop {
        let page_sql = format!("{} LIMIT {chunk} OFFSET {offset}", source.query);
        let page = db.execute(&page_sql, &source.params)?;
        if !begun {
            let columns: Vec<String> = match page.first() {
                Some(row) => row.columns.as_ref().clone(),
                None => db.query_columns(&source.query)?,
            };
            sink.begin(&source.title, &columns)?;
            begun = true;
        }
        let page_len = page.len();
        for row in page {
            if token.is_cancelled() {
                return Err(ExportError::Db(DbError::Cancelled));
            }
            sink.row(&row.values)?;
            exported += 1;
        }
        if !progress(false, exported, source.estimated_total) {
            return Err(ExportError::Db(DbError::Cancelled));
        }
        if page_len < chunk {
            break;
        }
        offset += chunk;
    }
    sink.end()?;
    progress(true, exported, Some(exported));
    Ok(exported)
}

/// Runs several sources against sinks produced per source. A failing
/// subtask is recorded and does not abort its siblings; cancellation
/// stops the whole job.
pub fn export_many(
    db: &Database,
    sources: &[ExportSource],
    mut sink_for: impl FnMut(&ExportSource) -> Result<Box<dyn RowSink>, ExportError>,
    token: &CancelToken,
    progress: &mut dyn FnMut(&str, bool, u64, Option<u64>) -> bool,
) -> ExportOutcome {
    let mut outcome = ExportOutcome::default();
    for source in sources {
        if token.is_cancelled() {
            outcome.cancelled = true;
            break;
        }
        let result = sink_for(source).and_then(|mut sink| {
            export_source(db, source, sink.as_mut(), token, &mut |done, index, count| {
                progress(&source.title, done, index, count)
            })
        });
        match result {
            Ok(rows) => outcome.subtasks.push(SubtaskStatus {
                title: source.title.clone(),
                rows,
                error: None,
            }),
            Err(ExportError::Db(DbError::Cancelled)) => {
                outcome.cancelled = true;
                outcome.subtasks.push(SubtaskStatus {
                    title: source.title.clone(),
                    rows: 0,
                    error: None,
                });
                break;
            }
            Err(error) => {
                log::warn!("export of \"{}\" failed: {error}", source.title);
                outcome.subtasks.push(SubtaskStatus {
                    title: source.title.clone(),
                    rows: 0,
                    error: Some(error.to_string()),
                });
            }
        }
    }
    outcome
}
