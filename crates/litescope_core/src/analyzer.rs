//! Runs the external `sqlite3_analyzer` tool and normalizes its
//! line-oriented text output into structured statistics.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use indexmap::IndexMap;
use regex::Regex;
use std::sync::OnceLock;

use crate::worker::CancelToken;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableStatistics {
    pub name: String,
    pub entries: Option<u64>,
    pub payload_bytes: Option<u64>,
    pub storage_bytes: Option<u64>,
    /// Share of the whole file, 0..100.
    pub percentage_of_total: Option<f64>,
    /// Payload share of storage, 0..100.
    pub fill_factor: Option<f64>,
    pub fragmentation: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseStatistics {
    pub page_size: Option<u64>,
    pub page_count: Option<u64>,
    pub file_bytes: Option<u64>,
    pub tables: IndexMap<String, TableStatistics>,
}

#[derive(Debug, Clone)]
pub enum AnalyzerEmission {
    Done {
        path: PathBuf,
        statistics: Option<DatabaseStatistics>,
        error: Option<String>,
        cancelled: bool,
    },
}

/// Spawns the analyzer on the database path, reading its output in
/// chunks with cancel checks in between; the child is killed on cancel.
pub fn analyze(analyzer_path: &Path, db_path: &Path, token: &CancelToken) -> AnalyzerEmission {
    let done = |statistics, error, cancelled| AnalyzerEmission::Done {
        path: db_path.to_path_buf(),
        statistics,
        error,
        cancelled,
    };
    if token.is_cancelled() {
        return done(None, None, true);
    }

    let mut child = match Command::new(analyzer_path)
        .arg(db_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(error) => {
            log::error!("could not spawn {}: {error}", analyzer_path.display());
            return done(None, Some(error.to_string()), false);
        }
    };

    let mut output = String::new();
    if let Some(mut stdout) = child.stdout.take() {
        let mut buffer = [0u8; 65536];
        loop {
            if token.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                return done(None, None, true);
            }
            match stdout.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => output.push_str(&String::from_utf8_lossy(&buffer[..read])),
                Err(error) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return done(None, Some(error.to_string()), false);
                }
            }
        }
    }
    match child.wait() {
        Ok(status) if !status.success() => {
            return done(None, Some(format!("analyzer exited with {status}")), false);
        }
        Err(error) => return done(None, Some(error.to_string()), false),
        _ => {}
    }
    done(Some(parse_analyzer_output(&output)), None, false)
}

fn key_value_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // "Key........ 123   45.6%" style lines.
        Regex::new(r"^(.*?)\.{2,}\s*(-?[\d.]+)%?(?:\s+([\d.]+)%)?\s*$").expect("static pattern")
    })
}

fn section_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\*\*\*\s+(.+?)\s*\**\s*$").expect("static pattern"))
}

/// Parses the analyzer's report: database-level key/value pairs followed
/// by per-table blocks introduced with `*** Table NAME ***` headers.
pub fn parse_analyzer_output(output: &str) -> DatabaseStatistics {
    let mut statistics = DatabaseStatistics::default();
    let mut current_table: Option<String> = None;

    for line in output.lines() {
        let line = line.trim_end();
        if let Some(captures) = section_pattern().captures(line) {
            let title = captures[1].trim();
            if let Some(rest) = title.strip_prefix("Table ") {
                let name = rest
                    .strip_suffix(" and all its indices")
                    .unwrap_or(rest)
                    .split(" w/o")
                    .next()
                    .unwrap_or(rest)
                    .trim()
                    .trim_matches('"')
                    .to_string();
                statistics
                    .tables
                    .entry(name.clone())
                    .or_insert_with(|| TableStatistics { name: name.clone(), ..Default::default() });
                current_table = Some(name);
            } else {
                // Index blocks and global sections carry no extra
                // per-table fields: the combined table block wins.
                current_table = None;
            }
            continue;
        }
        let Some(captures) = key_value_pattern().captures(line) else {
            continue;
        };
        let key = captures[1].trim().to_lowercase();
        let number: f64 = match captures[2].parse() {
            Ok(number) => number,
            Err(_) => continue,
        };
        let is_percent = line.trim_end().ends_with('%') && captures.get(3).is_none();
        let extra_percent: Option<f64> =
            captures.get(3).and_then(|m| m.as_str().parse().ok());

        match current_table.as_ref() {
            None => match key.as_str() {
                "page size in bytes" => statistics.page_size = Some(number as u64),
                "pages in the whole file (measured)" => {
                    statistics.page_count = Some(number as u64)
                }
                "size of the file in bytes" => statistics.file_bytes = Some(number as u64),
                _ => {}
            },
            Some(table) => {
                let entry = statistics
                    .tables
                    .entry(table.clone())
                    .or_insert_with(|| TableStatistics { name: table.clone(), ..Default::default() });
                // First block per table wins: the combined
                // table-and-indices section precedes the table-only one.
                match key.as_str() {
                    "number of entries" => {
                        entry.entries.get_or_insert(number as u64);
                    }
                    "bytes of storage consumed" => {
                        entry.storage_bytes.get_or_insert(number as u64);
                    }
                    "bytes of payload" => {
                        entry.payload_bytes.get_or_insert(number as u64);
                        if let Some(percent) = extra_percent {
                            entry.fill_factor.get_or_insert(percent);
                        }
                    }
                    "percentage of total database" if is_percent => {
                        entry.percentage_of_total.get_or_insert(number);
                    }
                    "fragmentation" if is_percent => {
                        entry.fragmentation.get_or_insert(number);
                    }
                    _ => {}
                }
            }
        }
    }
    statistics
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
/** Disk-Space Utilization Report For test.db

Page size in bytes................................ 4096
Pages in the whole file (measured)................ 120
Size of the file in bytes......................... 491520

*** Table CUSTOMER ********************************************************

Percentage of total database......................  35.2%
Number of entries................................. 500
Bytes of storage consumed......................... 40960
Bytes of payload.................................. 30000   73.2%
Fragmentation.....................................   1.2%

*** Index IDX_NAME of table CUSTOMER **************************************

Number of entries................................. 500
Bytes of storage consumed......................... 8192
";

    #[test]
    fn parses_database_totals_and_tables() {
        let stats = parse_analyzer_output(SAMPLE);
        assert_eq!(stats.page_size, Some(4096));
        assert_eq!(stats.page_count, Some(120));
        assert_eq!(stats.file_bytes, Some(491520));

        let table = &stats.tables["CUSTOMER"];
        assert_eq!(table.entries, Some(500));
        assert_eq!(table.storage_bytes, Some(40960));
        assert_eq!(table.payload_bytes, Some(30000));
        assert_eq!(table.fill_factor, Some(73.2));
        assert_eq!(table.percentage_of_total, Some(35.2));
        assert_eq!(table.fragmentation, Some(1.2));
    }

    #[test]
    fn missing_binary_reports_error() {
        let emission = analyze(
            Path::new("/no/such/analyzer-binary"),
            Path::new("test.db"),
            &CancelToken::new(),
        );
        let AnalyzerEmission::Done { error, statistics, cancelled, .. } = emission;
        assert!(error.is_some());
        assert!(statistics.is_none());
        assert!(!cancelled);
    }
}
