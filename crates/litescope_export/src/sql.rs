use std::io::Write;

use litescope_core::Value;

use crate::{ExportError, RowSink};

/// SQL text sink: INSERT statements, optionally preceded by the CREATE
/// statement of the relation.
pub struct SqlSink<W: Write> {
    writer: W,
    /// CREATE SQL to emit before the first row.
    pub create_sql: Option<String>,
    /// Declared types per column, for JSON normalization and hex blobs.
    pub declared_types: Vec<Option<String>>,
    relation: String,
    columns: Vec<String>,
}

impl<W: Write> SqlSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            create_sql: None,
            declared_types: Vec::new(),
            relation: String::new(),
            columns: Vec::new(),
        }
    }

    pub fn with_create_sql(mut self, sql: impl Into<String>) -> Self {
        self.create_sql = Some(sql.into());
        self
    }

    pub fn with_declared_types(mut self, types: Vec<Option<String>>) -> Self {
        self.declared_types = types;
        self
    }
}

impl<W: Write> RowSink for SqlSink<W> {
    fn begin(&mut self, relation: &str, columns: &[String]) -> Result<(), ExportError> {
        self.relation = litescope_grammar::quote(relation);
        self.columns = columns
            .iter()
            .map(|c| litescope_grammar::quote(c))
            .collect();
        if let Some(create_sql) = &self.create_sql {
            writeln!(self.writer, "{};", create_sql.trim_end_matches(';'))?;
            writeln!(self.writer)?;
        }
        Ok(())
    }

    fn row(&mut self, values: &[Value]) -> Result<(), ExportError> {
        let rendered: Vec<String> = values
            .iter()
            .enumerate()
            .map(|(i, value)| {
                let declared = self.declared_types.get(i).and_then(|t| t.as_deref());
                value.to_sql_literal(declared)
            })
            .collect();
        writeln!(
            self.writer,
            "INSERT INTO {} ({}) VALUES ({});",
            self.relation,
            self.columns.join(", "),
            rendered.join(", ")
        )?;
        Ok(())
    }

    fn end(&mut self) -> Result<(), ExportError> {
        self.writer.flush()?;
        Ok(())
    }
}
