use std::io::Write;

use litescope_core::Value;
use serde_json::{Map, Value as Json, json};

use crate::{ExportError, RowSink};

/// JSON sink: an array of objects keyed by column name.
pub struct JsonSink<W: Write> {
    writer: W,
    pretty: bool,
    columns: Vec<String>,
    rows: Vec<Json>,
}

impl<W: Write> JsonSink<W> {
    pub fn new(writer: W, pretty: bool) -> Self {
        Self { writer, pretty, columns: Vec::new(), rows: Vec::new() }
    }
}

fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Integer(i) => json!(i),
        Value::Real(f) => json!(f),
        Value::Text(t) => json!(t),
        Value::Blob(b) => json!(litescope_grammar::format_blob(b)),
    }
}

impl<W: Write> RowSink for JsonSink<W> {
    fn begin(&mut self, _relation: &str, columns: &[String]) -> Result<(), ExportError> {
        self.columns = columns.to_vec();
        Ok(())
    }

    fn row(&mut self, values: &[Value]) -> Result<(), ExportError> {
        let mut object = Map::new();
        for (column, value) in self.columns.iter().zip(values) {
            object.insert(column.clone(), value_to_json(value));
        }
        self.rows.push(Json::Object(object));
        Ok(())
    }

    fn end(&mut self) -> Result<(), ExportError> {
        let document = Json::Array(std::mem::take(&mut self.rows));
        if self.pretty {
            serde_json::to_writer_pretty(&mut self.writer, &document)?;
        } else {
            serde_json::to_writer(&mut self.writer, &document)?;
        }
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_array_of_objects() {
        let mut buffer = Vec::new();
        {
            let mut sink = JsonSink::new(&mut buffer, false);
            sink.begin("t", &["id".to_string(), "name".to_string()]).unwrap();
            sink.row(&[Value::Integer(1), Value::Text("ada".to_string())]).unwrap();
            sink.row(&[Value::Integer(2), Value::Null]).unwrap();
            sink.end().unwrap();
        }
        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(
            text,
            "[{\"id\":1,\"name\":\"ada\"},{\"id\":2,\"name\":null}]\n"
        );
    }
}
