use std::io::Write;

use litescope_core::Value;

use crate::{ExportError, RowSink};

/// CSV writer sink: header row first, cells stringified, blobs hexed.
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> CsvSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer: csv::Writer::from_writer(writer) }
    }
}

impl<W: Write> RowSink for CsvSink<W> {
    fn begin(&mut self, _relation: &str, columns: &[String]) -> Result<(), ExportError> {
        self.writer.write_record(columns)?;
        Ok(())
    }

    fn row(&mut self, values: &[Value]) -> Result<(), ExportError> {
        self.writer
            .write_record(values.iter().map(Value::to_display_string))?;
        Ok(())
    }

    fn end(&mut self) -> Result<(), ExportError> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_header_and_rows() {
        let mut buffer = Vec::new();
        {
            let mut sink = CsvSink::new(&mut buffer);
            sink.begin("t", &["id".to_string(), "name".to_string()]).unwrap();
            sink.row(&[Value::Integer(1), Value::Text("with,comma".to_string())]).unwrap();
            sink.row(&[Value::Null, Value::Blob(vec![0xAB])]).unwrap();
            sink.end().unwrap();
        }
        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(text, "id,name\n1,\"with,comma\"\n,AB\n");
    }
}
