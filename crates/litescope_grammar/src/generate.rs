//! Canonical SQL generation from the meta tree.
//!
//! Column alignment is done with salted placeholder tokens that are
//! resolved once the per-group maximum widths are known. If user data
//! happens to contain a placeholder, the whole pass is retried with a
//! fresh salt; the attempt count is bounded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::ast::*;
use crate::error::GrammarError;
use crate::quoting::quote;

static SALT_COUNTER: AtomicU64 = AtomicU64::new(1);

const MAX_ATTEMPTS: usize = 3;

/// Generates canonical SQL for the statement. With an empty `indent` the
/// output is a single line without linefeeds.
pub fn generate(statement: &Statement, indent: &str) -> Result<String, GrammarError> {
    for _ in 0..MAX_ATTEMPTS {
        let salt = SALT_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut writer = Writer::new(indent, salt);
        match statement {
            Statement::Table(d) => writer.table(d),
            Statement::Index(d) => writer.index(d),
            Statement::Trigger(d) => writer.trigger(d),
            Statement::View(d) => writer.view(d),
            Statement::VirtualTable(d) => writer.virtual_table(d),
        }
        if let Some(result) = writer.finish() {
            return Ok(result);
        }
        log::debug!("generated SQL collided with a padding token, retrying");
    }
    Err(GrammarError::Generate(
        "statement data keeps colliding with padding tokens".to_string(),
    ))
}

struct Writer {
    indent: String,
    out: String,
    /// `[[PAD-salt-group-width]]` placeholder prefix.
    marker: String,
    /// Group name to maximum rendered width.
    widths: HashMap<&'static str, usize>,
    padded: bool,
}

impl Writer {
    fn new(indent: &str, salt: u64) -> Self {
        Self {
            indent: indent.to_string(),
            out: String::new(),
            marker: format!("[[PAD-{salt:x}-"),
            widths: HashMap::new(),
            padded: false,
        }
    }

    fn indented(&self) -> bool {
        !self.indent.is_empty()
    }

    fn push(&mut self, text: &str) {
        self.out.push_str(text);
    }

    /// Leads a body item: newline plus indent, or a single space between
    /// items in single-line mode.
    fn item_lead(&mut self, first: bool) {
        if self.indented() {
            self.out.push('\n');
            self.out.push_str(&self.indent.clone());
        } else if !first {
            self.out.push(' ');
        }
    }

    /// Emits a padding placeholder sizing `value` within `group`.
    /// Resolves to spaces up to the group maximum; nothing when the
    /// output is unindented.
    fn pad(&mut self, group: &'static str, value: &str) {
        if !self.indented() {
            return;
        }
        let width = value.chars().count();
        let entry = self.widths.entry(group).or_insert(0);
        *entry = (*entry).max(width);
        self.out.push_str(&format!("{}{group}-{width}]]", self.marker));
        self.padded = true;
    }

    /// Resolves padding placeholders; `None` when data collided with the
    /// placeholder syntax and the pass must be retried.
    fn finish(self) -> Option<String> {
        let Writer { out, marker, widths, padded, .. } = self;
        if !padded {
            return (!out.contains(&marker)).then_some(out);
        }
        let mut result = String::with_capacity(out.len());
        let mut rest = out.as_str();
        while let Some(at) = rest.find(&marker) {
            result.push_str(&rest[..at]);
            let tail = &rest[at + marker.len()..];
            let Some(close) = tail.find("]]") else {
                return None;
            };
            let body = &tail[..close];
            let (group, width) = body.rsplit_once('-')?;
            let width: usize = width.parse().ok()?;
            let max = widths.get(group).copied().unwrap_or(width);
            result.push_str(&" ".repeat(max.saturating_sub(width)));
            rest = &tail[close + 2..];
        }
        result.push_str(rest);
        if result.contains(&marker) {
            return None;
        }
        Some(result)
    }

    fn qualified(&self, schema: Option<&str>, name: &str) -> String {
        match schema {
            Some(schema) => format!("{}.{}", quote(schema), quote(name)),
            None => quote(name),
        }
    }

    fn header_prefix(&mut self, header: &StatementHeader, keyword: &str, unique: bool) {
        self.push("CREATE ");
        if header.temporary {
            self.push("TEMPORARY ");
        }
        if unique {
            self.push("UNIQUE ");
        }
        self.push(keyword);
        self.push(" ");
        if header.if_not_exists {
            self.push("IF NOT EXISTS ");
        }
        let qualified = self.qualified(header.schema.as_deref(), &header.name);
        self.push(&qualified);
    }

    // ------------------------------------------------------------------

    fn table(&mut self, def: &TableDef) {
        self.header_prefix(&def.header, "TABLE", false);
        self.push(" (");
        let count = def.columns.len() + def.constraints.len();
        for (i, column) in def.columns.iter().enumerate() {
            self.item_lead(i == 0);
            self.column_def(column);
            if i + 1 < count {
                self.push(",");
            }
        }
        for (i, constraint) in def.constraints.iter().enumerate() {
            self.item_lead(false);
            self.table_constraint(constraint);
            if def.columns.len() + i + 1 < count {
                self.push(",");
            }
        }
        if self.indented() {
            self.push("\n)");
        } else {
            self.push(")");
        }
        if def.without_rowid {
            self.push(" WITHOUT ROWID");
        }
    }

    fn column_def(&mut self, column: &ColumnDef) {
        let name = quote(&column.name);
        self.push(&name);
        if let Some(col_type) = &column.col_type {
            self.pad("colname", &name);
            self.push(" ");
            self.push(col_type);
        }
        for constraint in &column.constraints {
            self.push(" ");
            self.column_constraint(constraint);
        }
    }

    fn column_constraint(&mut self, constraint: &ColumnConstraint) {
        if let Some(name) = &constraint.name {
            self.push("CONSTRAINT ");
            self.push(&quote(name));
            self.push(" ");
        }
        match &constraint.kind {
            ColumnConstraintKind::PrimaryKey { order, conflict, autoincrement } => {
                self.push("PRIMARY KEY");
                if let Some(order) = order {
                    self.push(" ");
                    self.push(order.as_str());
                }
                self.conflict(*conflict);
                if *autoincrement {
                    self.push(" AUTOINCREMENT");
                }
            }
            ColumnConstraintKind::NotNull { conflict } => {
                self.push("NOT NULL");
                self.conflict(*conflict);
            }
            ColumnConstraintKind::Unique { conflict } => {
                self.push("UNIQUE");
                self.conflict(*conflict);
            }
            ColumnConstraintKind::Default { expr } => {
                self.push("DEFAULT ");
                self.push(expr);
            }
            ColumnConstraintKind::Check { expr } => {
                self.push("CHECK (");
                self.push(expr);
                self.push(")");
            }
            ColumnConstraintKind::Collate { collation } => {
                self.push("COLLATE ");
                self.push(collation);
            }
            ColumnConstraintKind::ForeignKey(clause) => self.references(clause),
        }
    }

    fn conflict(&mut self, conflict: Option<ConflictAction>) {
        if let Some(action) = conflict {
            self.push(" ON CONFLICT ");
            self.push(action.as_str());
        }
    }

    fn references(&mut self, clause: &ForeignKeyClause) {
        self.push("REFERENCES ");
        self.push(&quote(&clause.table));
        if !clause.columns.is_empty() {
            self.push(" (");
            self.name_list(&clause.columns);
            self.push(")");
        }
        if let Some(action) = &clause.on_delete {
            self.push(" ON DELETE ");
            self.push(action);
        }
        if let Some(action) = &clause.on_update {
            self.push(" ON UPDATE ");
            self.push(action);
        }
        if let Some(value) = &clause.match_clause {
            self.push(" MATCH ");
            self.push(value);
        }
        if let Some(deferrable) = &clause.deferrable {
            if deferrable.not {
                self.push(" NOT");
            }
            self.push(" DEFERRABLE");
            if let Some(initially) = &deferrable.initially {
                self.push(" INITIALLY ");
                self.push(initially);
            }
        }
    }

    fn name_list(&mut self, names: &[String]) {
        for (i, name) in names.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.push(&quote(name));
        }
    }

    fn table_constraint(&mut self, constraint: &TableConstraint) {
        if let Some(name) = &constraint.name {
            self.push("CONSTRAINT ");
            self.push(&quote(name));
            self.push(" ");
        }
        match &constraint.kind {
            TableConstraintKind::PrimaryKey { columns, conflict } => {
                self.push("PRIMARY KEY (");
                self.indexed_columns(columns);
                self.push(")");
                self.conflict(*conflict);
            }
            TableConstraintKind::Unique { columns, conflict } => {
                self.push("UNIQUE (");
                self.indexed_columns(columns);
                self.push(")");
                self.conflict(*conflict);
            }
            TableConstraintKind::Check { expr } => {
                self.push("CHECK (");
                self.push(expr);
                self.push(")");
            }
            TableConstraintKind::ForeignKey { columns, clause } => {
                self.push("FOREIGN KEY (");
                self.name_list(columns);
                self.push(") ");
                self.references(clause);
            }
        }
    }

    fn indexed_columns(&mut self, columns: &[IndexedColumn]) {
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            if let Some(name) = &column.name {
                self.push(&quote(name));
            } else if let Some(expr) = &column.expr {
                self.push(expr);
            }
            if let Some(collate) = &column.collate {
                self.push(" COLLATE ");
                self.push(collate);
            }
            if let Some(order) = column.order {
                self.push(" ");
                self.push(order.as_str());
            }
        }
    }

    // ------------------------------------------------------------------

    fn index(&mut self, def: &IndexDef) {
        self.push("CREATE ");
        if def.unique {
            self.push("UNIQUE ");
        }
        self.push("INDEX ");
        if def.header.if_not_exists {
            self.push("IF NOT EXISTS ");
        }
        let qualified = self.qualified(def.header.schema.as_deref(), &def.header.name);
        self.push(&qualified);
        self.push(" ON ");
        self.push(&quote(&def.table));
        self.push(" (");
        self.indexed_columns(&def.columns);
        self.push(")");
        if let Some(where_clause) = &def.where_clause {
            if self.indented() {
                self.out.push('\n');
            } else {
                self.out.push(' ');
            }
            self.push("WHERE ");
            self.push(where_clause);
        }
    }

    fn trigger(&mut self, def: &TriggerDef) {
        self.header_prefix(&def.header, "TRIGGER", false);
        self.push(" ");
        if let Some(timing) = def.timing {
            self.push(timing.as_str());
            self.push(" ");
        }
        self.push(def.action.as_str());
        if !def.update_columns.is_empty() {
            self.push(" OF ");
            self.name_list(&def.update_columns);
        }
        self.push(" ON ");
        self.push(&quote(&def.table));
        let break_line = |w: &mut Self| {
            if w.indented() {
                w.out.push('\n');
            } else {
                w.out.push(' ');
            }
        };
        if def.for_each_row {
            break_line(self);
            self.push("FOR EACH ROW");
        }
        if let Some(when) = &def.when {
            break_line(self);
            self.push("WHEN ");
            self.push(when);
        }
        break_line(self);
        self.push("BEGIN");
        if self.indented() {
            for line in dedent(&def.body) {
                self.out.push('\n');
                if !line.is_empty() {
                    self.out.push_str(&self.indent.clone());
                    self.push(&line);
                }
            }
            self.push("\nEND");
        } else {
            self.push(" ");
            let flat = def
                .body
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            self.push(&flat);
            self.push(" END");
        }
    }

    fn view(&mut self, def: &ViewDef) {
        self.header_prefix(&def.header, "VIEW", false);
        if !def.columns.is_empty() {
            self.push(" (");
            self.name_list(&def.columns);
            self.push(")");
        }
        self.push(" AS ");
        self.push(&def.select);
    }

    fn virtual_table(&mut self, def: &VirtualTableDef) {
        self.push("CREATE VIRTUAL TABLE ");
        if def.header.if_not_exists {
            self.push("IF NOT EXISTS ");
        }
        let qualified = self.qualified(def.header.schema.as_deref(), &def.header.name);
        self.push(&qualified);
        self.push(" USING ");
        self.push(&quote(&def.module));
        if !def.arguments.is_empty() {
            self.push(" (");
            self.push(&def.arguments.join(", "));
            self.push(")");
        }
    }
}

/// Strips the common leading whitespace of the body's non-empty lines.
fn dedent(body: &str) -> Vec<String> {
    let lines: Vec<&str> = body.lines().collect();
    let common = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    lines
        .iter()
        .map(|l| {
            if l.trim().is_empty() {
                String::new()
            } else {
                l[common.min(l.len() - l.trim_start().len())..].trim_end().to_string()
            }
        })
        .collect()
}
