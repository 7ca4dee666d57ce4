//! Typed meta tree for parsed DDL statements.
//!
//! Each statement kind is a tagged variant with its own payload; the
//! shared header carries the name, schema qualifier, common flags, the
//! detached comments and the lower-cased names of every table or view the
//! statement references.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementKind {
    Table,
    Index,
    Trigger,
    View,
    VirtualTable,
}

impl StatementKind {
    /// Canonical statement tag, e.g. `CREATE TABLE`.
    pub fn sql_name(self) -> &'static str {
        match self {
            Self::Table => "CREATE TABLE",
            Self::Index => "CREATE INDEX",
            Self::Trigger => "CREATE TRIGGER",
            Self::View => "CREATE VIEW",
            Self::VirtualTable => "CREATE VIRTUAL TABLE",
        }
    }

    /// Schema category name, e.g. `table`.
    pub fn category(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Index => "index",
            Self::Trigger => "trigger",
            Self::View => "view",
            Self::VirtualTable => "virtual table",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatementHeader {
    /// Case-preserving object name.
    pub name: String,
    pub schema: Option<String>,
    pub temporary: bool,
    pub if_not_exists: bool,
    /// Detached comment tokens, in source order.
    pub comments: Vec<String>,
    /// Lower-cased names of tables and views this statement references.
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictAction {
    Rollback,
    Abort,
    Fail,
    Ignore,
    Replace,
}

impl ConflictAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rollback => "ROLLBACK",
            Self::Abort => "ABORT",
            Self::Fail => "FAIL",
            Self::Ignore => "IGNORE",
            Self::Replace => "REPLACE",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Deferrable {
    pub not: bool,
    /// `DEFERRED` or `IMMEDIATE`.
    pub initially: Option<String>,
}

/// REFERENCES payload shared by column-level and table-level foreign keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyClause {
    pub table: String,
    pub columns: Vec<String>,
    pub on_update: Option<String>,
    pub on_delete: Option<String>,
    pub match_clause: Option<String>,
    pub deferrable: Option<Deferrable>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnConstraintKind {
    PrimaryKey {
        order: Option<SortOrder>,
        conflict: Option<ConflictAction>,
        autoincrement: bool,
    },
    NotNull {
        conflict: Option<ConflictAction>,
    },
    Unique {
        conflict: Option<ConflictAction>,
    },
    Default {
        expr: String,
    },
    Check {
        expr: String,
    },
    Collate {
        collation: String,
    },
    ForeignKey(ForeignKeyClause),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnConstraint {
    pub name: Option<String>,
    pub kind: ColumnConstraintKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    /// Declared type, upper-cased, free-form per SQLite.
    pub col_type: Option<String>,
    pub constraints: Vec<ColumnConstraint>,
}

impl ColumnDef {
    pub fn constraint(&self, f: impl Fn(&ColumnConstraintKind) -> bool) -> Option<&ColumnConstraint> {
        self.constraints.iter().find(|c| f(&c.kind))
    }

    pub fn is_primary_key(&self) -> bool {
        self.constraint(|k| matches!(k, ColumnConstraintKind::PrimaryKey { .. }))
            .is_some()
    }

    pub fn is_not_null(&self) -> bool {
        self.constraint(|k| matches!(k, ColumnConstraintKind::NotNull { .. }))
            .is_some()
    }
}

/// Column reference inside PRIMARY KEY / UNIQUE / CREATE INDEX lists;
/// either a plain name or an expression.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexedColumn {
    pub name: Option<String>,
    pub expr: Option<String>,
    pub collate: Option<String>,
    pub order: Option<SortOrder>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TableConstraintKind {
    PrimaryKey {
        columns: Vec<IndexedColumn>,
        conflict: Option<ConflictAction>,
    },
    Unique {
        columns: Vec<IndexedColumn>,
        conflict: Option<ConflictAction>,
    },
    Check {
        expr: String,
    },
    ForeignKey {
        columns: Vec<String>,
        clause: ForeignKeyClause,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableConstraint {
    pub name: Option<String>,
    pub kind: TableConstraintKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub header: StatementHeader,
    pub without_rowid: bool,
    pub columns: Vec<ColumnDef>,
    pub constraints: Vec<TableConstraint>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    pub header: StatementHeader,
    pub unique: bool,
    pub table: String,
    pub columns: Vec<IndexedColumn>,
    pub where_clause: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerTiming {
    Before,
    After,
    InsteadOf,
}

impl TriggerTiming {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Before => "BEFORE",
            Self::After => "AFTER",
            Self::InsteadOf => "INSTEAD OF",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerAction {
    Delete,
    Insert,
    Update,
}

impl TriggerAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delete => "DELETE",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDef {
    pub header: StatementHeader,
    pub timing: Option<TriggerTiming>,
    pub action: TriggerAction,
    /// Columns of an `UPDATE OF` action.
    pub update_columns: Vec<String>,
    pub table: String,
    pub for_each_row: bool,
    pub when: Option<String>,
    /// Raw body between BEGIN and END.
    pub body: String,
}

impl Default for TriggerDef {
    fn default() -> Self {
        Self {
            header: StatementHeader::default(),
            timing: None,
            action: TriggerAction::Update,
            update_columns: Vec::new(),
            table: String::new(),
            for_each_row: false,
            when: None,
            body: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewDef {
    pub header: StatementHeader,
    pub columns: Vec<String>,
    /// Raw SELECT text.
    pub select: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualTableDef {
    pub header: StatementHeader,
    pub module: String,
    pub arguments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    Table(TableDef),
    Index(IndexDef),
    Trigger(TriggerDef),
    View(ViewDef),
    VirtualTable(VirtualTableDef),
}

impl Statement {
    pub fn kind(&self) -> StatementKind {
        match self {
            Self::Table(_) => StatementKind::Table,
            Self::Index(_) => StatementKind::Index,
            Self::Trigger(_) => StatementKind::Trigger,
            Self::View(_) => StatementKind::View,
            Self::VirtualTable(_) => StatementKind::VirtualTable,
        }
    }

    pub fn header(&self) -> &StatementHeader {
        match self {
            Self::Table(d) => &d.header,
            Self::Index(d) => &d.header,
            Self::Trigger(d) => &d.header,
            Self::View(d) => &d.header,
            Self::VirtualTable(d) => &d.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut StatementHeader {
        match self {
            Self::Table(d) => &mut d.header,
            Self::Index(d) => &mut d.header,
            Self::Trigger(d) => &mut d.header,
            Self::View(d) => &mut d.header,
            Self::VirtualTable(d) => &mut d.header,
        }
    }

    pub fn name(&self) -> &str {
        &self.header().name
    }

    /// The table an index or trigger belongs to.
    pub fn owner_table(&self) -> Option<&str> {
        match self {
            Self::Index(d) => Some(&d.table),
            Self::Trigger(d) => Some(&d.table),
            _ => None,
        }
    }

    /// Toggles the statement flags named in `flags`; flags that do not
    /// apply to this statement kind are ignored.
    pub fn apply_flags(&mut self, flags: &FlagToggles) {
        if let Some(v) = flags.if_not_exists {
            self.header_mut().if_not_exists = v;
        }
        if let Some(v) = flags.temporary {
            self.header_mut().temporary = v;
        }
        if let Some(v) = flags.unique
            && let Self::Index(d) = self
        {
            d.unique = v;
        }
        if let Some(v) = flags.without_rowid
            && let Self::Table(d) = self
        {
            d.without_rowid = v;
        }
    }
}

/// Statement flag toggles for [`crate::transform`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagToggles {
    pub if_not_exists: Option<bool>,
    pub temporary: Option<bool>,
    pub unique: Option<bool>,
    pub without_rowid: Option<bool>,
}

impl FlagToggles {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Schema-qualifier rename request.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaRename {
    /// Set or replace the qualifier on the statement.
    Set(String),
    /// Drop the qualifier.
    Remove,
    /// Per-name mapping; `None` target drops the qualifier.
    Map(HashMap<String, Option<String>>),
}

/// Structural rename request applied over the token stream.
///
/// Column maps are keyed by the owning table or view; when the same
/// request also renames the owner, the key is the renamed value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Renames {
    pub schema: Option<SchemaRename>,
    pub table: HashMap<String, String>,
    pub view: HashMap<String, String>,
    pub index: HashMap<String, String>,
    pub trigger: HashMap<String, String>,
    pub column: HashMap<String, HashMap<String, String>>,
}

impl Renames {
    pub fn is_empty(&self) -> bool {
        self.schema.is_none()
            && self.table.is_empty()
            && self.view.is_empty()
            && self.index.is_empty()
            && self.trigger.is_empty()
            && self.column.is_empty()
    }
}
