//! Database file detection: magic-byte validation and directory walks
//! for the detect and import-folder workers.

use std::path::{Path, PathBuf};

use crate::database::is_sqlite_file;
use crate::worker::CancelToken;

#[derive(Debug, Clone)]
pub enum DetectEmission {
    Found { paths: Vec<PathBuf> },
    Done { count: usize, cancelled: bool },
}

/// Directories commonly holding user databases.
fn standard_directories() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    for candidate in [
        dirs::home_dir(),
        dirs::document_dir(),
        dirs::download_dir(),
        dirs::data_dir(),
        dirs::config_dir(),
    ]
    .into_iter()
    .flatten()
    {
        if !dirs.contains(&candidate) {
            dirs.push(candidate);
        }
    }
    dirs
}

/// Walks common user-data directories checking file magic, emitting
/// found paths in batches. Cancel is observed between directory
/// entries.
pub fn detect_databases(
    extensions: &[String],
    token: &CancelToken,
    emit: &mut dyn FnMut(DetectEmission),
) {
    let mut found = 0usize;
    for dir in standard_directories() {
        if walk(&dir, extensions, 2, token, &mut found, emit).is_break() {
            emit(DetectEmission::Done { count: found, cancelled: true });
            return;
        }
    }
    emit(DetectEmission::Done { count: found, cancelled: false });
}

/// Walks one folder recursively for database files.
pub fn walk_folder(
    folder: &Path,
    extensions: &[String],
    token: &CancelToken,
    emit: &mut dyn FnMut(DetectEmission),
) {
    let mut found = 0usize;
    if walk(folder, extensions, usize::MAX, token, &mut found, emit).is_break() {
        emit(DetectEmission::Done { count: found, cancelled: true });
        return;
    }
    emit(DetectEmission::Done { count: found, cancelled: false });
}

fn has_known_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .is_some_and(|ext| extensions.iter().any(|known| *known == ext))
}

fn walk(
    dir: &Path,
    extensions: &[String],
    depth: usize,
    token: &CancelToken,
    found: &mut usize,
    emit: &mut dyn FnMut(DetectEmission),
) -> std::ops::ControlFlow<()> {
    use std::ops::ControlFlow;

    let Ok(entries) = std::fs::read_dir(dir) else {
        return ControlFlow::Continue(());
    };
    let mut batch = Vec::new();
    for entry in entries.flatten() {
        if token.is_cancelled() {
            if !batch.is_empty() {
                emit(DetectEmission::Found { paths: batch });
            }
            return ControlFlow::Break(());
        }
        let path = entry.path();
        if path.is_dir() {
            if depth > 0
                && !path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.'))
                && walk(&path, extensions, depth - 1, token, found, emit).is_break()
            {
                if !batch.is_empty() {
                    emit(DetectEmission::Found { paths: batch });
                }
                return ControlFlow::Break(());
            }
            continue;
        }
        if has_known_extension(&path, extensions)
            && is_sqlite_file(&path).unwrap_or(false)
        {
            *found += 1;
            batch.push(path);
            if batch.len() >= 20 {
                emit(DetectEmission::Found { paths: std::mem::take(&mut batch) });
            }
        }
    }
    if !batch.is_empty() {
        emit(DetectEmission::Found { paths: batch });
    }
    ControlFlow::Continue(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SQLITE_MAGIC;
    use std::io::Write;

    #[test]
    fn finds_only_real_databases() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("real.db");
        std::fs::File::create(&good)
            .unwrap()
            .write_all(SQLITE_MAGIC)
            .unwrap();
        let fake = dir.path().join("fake.db");
        std::fs::File::create(&fake)
            .unwrap()
            .write_all(b"not a database")
            .unwrap();
        std::fs::File::create(dir.path().join("other.txt")).unwrap();

        let mut found = Vec::new();
        walk_folder(
            dir.path(),
            &["db".to_string()],
            &CancelToken::new(),
            &mut |emission| {
                if let DetectEmission::Found { paths } = emission {
                    found.extend(paths);
                }
            },
        );
        assert_eq!(found, vec![good]);
    }

    #[test]
    fn cancelled_walk_reports_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("a.db")).unwrap();
        let token = CancelToken::new();
        token.cancel();
        let mut terminal = None;
        walk_folder(dir.path(), &["db".to_string()], &token, &mut |emission| {
            if let DetectEmission::Done { cancelled, .. } = emission {
                terminal = Some(cancelled);
            }
        });
        assert_eq!(terminal, Some(true));
    }
}
