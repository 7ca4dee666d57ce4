//! Export into another SQLite database: a structure phase in dependency
//! order with optional renames, then a per-table transactional data
//! phase.

use litescope_core::{
    CancelToken, Database, DbError, SchemaCategory, SchemaItem,
};
use litescope_grammar::{Renames, transform};

use crate::{ExportError, ExportOutcome, SubtaskStatus};

#[derive(Debug, Clone)]
pub struct DatabaseExportRequest {
    /// Items to create in the target.
    pub items: Vec<(SchemaCategory, String)>,
    /// Copy table rows after the structure phase.
    pub with_data: bool,
    /// Renames to apply, e.g. to dodge name conflicts in the target.
    pub renames: Option<Renames>,
}

/// Creates the requested items in the target and optionally streams
/// their rows. Fails before writing anything when a dependency of a
/// requested item is missing from both the target and the request.
pub fn export_to_database(
    source: &Database,
    target: &Database,
    request: &DatabaseExportRequest,
    token: &CancelToken,
    progress: &mut dyn FnMut(&str, bool, u64, Option<u64>) -> bool,
) -> Result<ExportOutcome, ExportError> {
    source.ensure_parsed()?;
    let items = resolve_items(source, &request.items)?;
    check_dependencies(target, &request.items, &items)?;

    let renamed = |item: &SchemaItem| -> String {
        let map = match item.category {
            SchemaCategory::Table => request.renames.as_ref().map(|r| &r.table),
            SchemaCategory::View => request.renames.as_ref().map(|r| &r.view),
            SchemaCategory::Index => request.renames.as_ref().map(|r| &r.index),
            SchemaCategory::Trigger => request.renames.as_ref().map(|r| &r.trigger),
        };
        map.and_then(|m| {
            m.iter()
                .find(|(from, _)| from.eq_ignore_ascii_case(&item.name))
                .map(|(_, to)| to.clone())
        })
        .unwrap_or_else(|| item.name.clone())
    };

    // Structure phase, in dependency order.
    let mut outcome = ExportOutcome::default();
    for item in &items {
        if token.is_cancelled() {
            outcome.cancelled = true;
            return Ok(outcome);
        }
        let sql = match &request.renames {
            Some(renames) => transform(&item.sql, None, Some(renames), None)
                .map_err(DbError::from)?,
            None => item.sql.clone(),
        };
        target.execute_action(&sql, Some("export structure"))?;
    }

    if !request.with_data {
        return Ok(outcome);
    }

    // Data phase: one transaction per table; a failing table does not
    // abort its siblings.
    let chunk = source.config().seek_length.max(1);
    for item in items.iter().filter(|i| i.category == SchemaCategory::Table) {
        if token.is_cancelled() {
            outcome.cancelled = true;
            break;
        }
        let target_name = renamed(item);
        match copy_table(source, target, item, &target_name, chunk, token, progress) {
            Ok(rows) => outcome.subtasks.push(SubtaskStatus {
                title: item.name.clone(),
                rows,
                error: None,
            }),
            Err(ExportError::Db(DbError::Cancelled)) => {
                let _ = target.execute_script("ROLLBACK", None);
                outcome.cancelled = true;
                break;
            }
            Err(error) => {
                let _ = target.execute_script("ROLLBACK", None);
                log::warn!("data copy of \"{}\" failed: {error}", item.name);
                outcome.subtasks.push(SubtaskStatus {
                    title: item.name.clone(),
                    rows: 0,
                    error: Some(error.to_string()),
                });
            }
        }
    }
    Ok(outcome)
}

/// Resolves the request into items, ordered tables, indexes, triggers,
/// then views in dependency order.
fn resolve_items(
    source: &Database,
    requested: &[(SchemaCategory, String)],
) -> Result<Vec<SchemaItem>, ExportError> {
    let mut items = Vec::new();
    let categories = [
        SchemaCategory::Table,
        SchemaCategory::Index,
        SchemaCategory::Trigger,
        SchemaCategory::View,
    ];
    for category in categories {
        let mut in_category: Vec<&(SchemaCategory, String)> = requested
            .iter()
            .filter(|(c, _)| *c == category)
            .collect();
        if category == SchemaCategory::View {
            // Views must land after the views they select from; the
            // category dump is already in that order.
            let sql_order = source.get_sql(Some(SchemaCategory::View), None)?;
            in_category.sort_by_key(|(_, name)| {
                sql_order
                    .find(&format!("VIEW {}", litescope_grammar::quote(name)))
                    .unwrap_or(usize::MAX)
            });
        }
        for (category, name) in in_category {
            let item = source.get_item(*category, name)?.ok_or_else(|| {
                ExportError::Failed(format!("no such {category}: {name}"))
            })?;
            items.push(item);
        }
    }
    Ok(items)
}

/// Every dependency of a requested item must exist in the target or be
/// part of the request.
fn check_dependencies(
    target: &Database,
    requested: &[(SchemaCategory, String)],
    items: &[SchemaItem],
) -> Result<(), ExportError> {
    let in_request = |name: &str| {
        requested
            .iter()
            .any(|(_, n)| n.eq_ignore_ascii_case(name))
    };
    for item in items {
        let mut needed: Vec<String> = item
            .referenced_tables()
            .iter()
            .map(|t| t.to_string())
            .collect();
        if let Some(owner) = item.owner_table() {
            needed.push(owner);
        }
        for name in needed {
            if name.eq_ignore_ascii_case(&item.name) || in_request(&name) {
                continue;
            }
            let exists = target.get_item(SchemaCategory::Table, &name)?.is_some()
                || target.get_item(SchemaCategory::View, &name)?.is_some();
            if !exists {
                return Err(ExportError::Db(DbError::DependencyMissing {
                    category: SchemaCategory::Table,
                    name,
                    required_by: item.name.clone(),
                }));
            }
        }
    }
    Ok(())
}

fn copy_table(
    source: &Database,
    target: &Database,
    item: &SchemaItem,
    target_name: &str,
    chunk: usize,
    token: &CancelToken,
    progress: &mut dyn FnMut(&str, bool, u64, Option<u64>) -> bool,
) -> Result<u64, ExportError> {
    let source_name = litescope_grammar::quote(&item.name);
    let quoted_target = litescope_grammar::quote(target_name);
    target.execute_script("BEGIN", None)?;
    let mut copied = 0u64;
    let mut offset = 0usize;
    loop {
        let page = source.execute(
            &format!("SELECT * FROM {source_name} LIMIT {chunk} OFFSET {offset}"),
            &[],
        )?;
        if page.is_empty() {
            break;
        }
        let placeholders = vec!["?"; page[0].values.len()].join(", ");
        let insert = format!("INSERT INTO {quoted_target} VALUES ({placeholders})");
        let page_len = page.len();
        for row in page {
            if token.is_cancelled() {
                return Err(ExportError::Db(DbError::Cancelled));
            }
            target.execute_params(&insert, &row.values)?;
            copied += 1;
        }
        if !progress(&item.name, false, copied, item.row_count) {
            return Err(ExportError::Db(DbError::Cancelled));
        }
        if page_len < chunk {
            break;
        }
        offset += chunk;
    }
    target.execute_script("COMMIT", None)?;
    progress(&item.name, true, copied, Some(copied));
    Ok(copied)
}
