use serde::{Deserialize, Serialize};

/// A single SQLite cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn from_sql(value: rusqlite::types::ValueRef<'_>) -> Self {
        use rusqlite::types::ValueRef;
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).to_string()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Stringified form used for display and search highlighting.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Integer(i) => i.to_string(),
            Value::Real(f) => f.to_string(),
            Value::Text(t) => t.clone(),
            Value::Blob(b) => hex::encode_upper(b),
        }
    }

    /// SQL literal form for generated INSERT statements.
    pub fn to_sql_literal(&self, declared_type: Option<&str>) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Real(f) => {
                if f.is_nan() || f.is_infinite() {
                    // SQLite has no NaN/Infinity literal.
                    "NULL".to_string()
                } else {
                    f.to_string()
                }
            }
            Value::Text(t) => litescope_grammar::format_text(t, declared_type),
            Value::Blob(b) => litescope_grammar::format_blob(b),
        }
    }

    pub fn to_param(&self) -> rusqlite::types::Value {
        use rusqlite::types::Value as Sql;
        match self {
            Value::Null => Sql::Null,
            Value::Integer(i) => Sql::Integer(*i),
            Value::Real(f) => Sql::Real(*f),
            Value::Text(t) => Sql::Text(t.clone()),
            Value::Blob(b) => Sql::Blob(b.clone()),
        }
    }
}

/// One result row: column names in statement order plus the cell
/// values; the name list is shared across the rows of one result.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub columns: std::sync::Arc<Vec<String>>,
    pub values: Vec<Value>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|i| self.values.get(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals() {
        assert_eq!(Value::Null.to_sql_literal(None), "NULL");
        assert_eq!(Value::Integer(42).to_sql_literal(None), "42");
        assert_eq!(Value::Real(f64::NAN).to_sql_literal(None), "NULL");
        assert_eq!(Value::Text("it's".into()).to_sql_literal(None), "'it''s'");
        assert_eq!(Value::Blob(vec![0x1f]).to_sql_literal(None), "X'1F'");
    }

    #[test]
    fn row_lookup_is_case_insensitive() {
        let row = Row {
            columns: std::sync::Arc::new(vec!["Id".to_string()]),
            values: vec![Value::Integer(1)],
        };
        assert_eq!(row.get("id"), Some(&Value::Integer(1)));
        assert_eq!(row.get("missing"), None);
    }
}
