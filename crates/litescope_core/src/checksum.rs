//! File checksum computation for the checksum worker.

use std::io::Read;
use std::path::{Path, PathBuf};

use md5::Md5;
use sha1::{Digest, Sha1};

use crate::worker::CancelToken;

const BLOCK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub enum ChecksumEmission {
    Progress {
        path: PathBuf,
        bytes_done: u64,
        bytes_total: u64,
    },
    Done {
        path: PathBuf,
        sha1: Option<String>,
        md5: Option<String>,
        error: Option<String>,
        cancelled: bool,
    },
}

/// Streams the file in 1 MiB blocks, updating SHA-1 and MD5 and
/// checking the cancel flag between blocks.
pub fn checksum_file(
    path: &Path,
    token: &CancelToken,
    emit: &mut dyn FnMut(ChecksumEmission),
) {
    let done = |error: Option<String>, cancelled: bool, sha1: Option<String>, md5: Option<String>| {
        ChecksumEmission::Done { path: path.to_path_buf(), sha1, md5, error, cancelled }
    };

    let total = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let mut file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(error) => {
            emit(done(Some(error.to_string()), false, None, None));
            return;
        }
    };

    let mut sha1 = Sha1::new();
    let mut md5 = Md5::new();
    let mut buffer = vec![0u8; BLOCK_SIZE];
    let mut bytes_done = 0u64;
    let mut blocks = 0u64;
    loop {
        if token.is_cancelled() {
            emit(done(None, true, None, None));
            return;
        }
        let read = match file.read(&mut buffer) {
            Ok(read) => read,
            Err(error) => {
                emit(done(Some(error.to_string()), false, None, None));
                return;
            }
        };
        if read == 0 {
            break;
        }
        sha1.update(&buffer[..read]);
        md5.update(&buffer[..read]);
        bytes_done += read as u64;
        blocks += 1;
        if blocks % 16 == 0 {
            emit(ChecksumEmission::Progress {
                path: path.to_path_buf(),
                bytes_done,
                bytes_total: total,
            });
        }
    }
    emit(done(
        None,
        false,
        Some(hex::encode(sha1.finalize())),
        Some(hex::encode(md5.finalize())),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn known_digests() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();
        let mut results = Vec::new();
        checksum_file(file.path(), &CancelToken::new(), &mut |e| results.push(e));
        let Some(ChecksumEmission::Done { sha1, md5, error, cancelled, .. }) = results.last()
        else {
            panic!("no terminal emission")
        };
        assert!(error.is_none());
        assert!(!cancelled);
        assert_eq!(sha1.as_deref(), Some("a9993e364706816aba3e25717850c26c9cd0d89d"));
        assert_eq!(md5.as_deref(), Some("900150983cd24fb0d6963f7d28e17f72"));
    }

    #[test]
    fn cancelled_before_start_emits_cancelled() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let token = CancelToken::new();
        token.cancel();
        let mut results = Vec::new();
        checksum_file(file.path(), &token, &mut |e| results.push(e));
        assert!(matches!(
            results.last(),
            Some(ChecksumEmission::Done { cancelled: true, .. })
        ));
    }
}
