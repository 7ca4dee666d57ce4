//! Wire format of the handoff channel.
//!
//! Every message travels in one frame: a two-byte tag, the protocol
//! revision, a little-endian payload length, then the bincode payload.
//! The tag and revision let a listener reject garbage written to the
//! socket by unrelated software before it tries to decode anything.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use thiserror::Error;

const FRAME_TAG: [u8; 2] = *b"LS";
const PROTOCOL_REVISION: u8 = 1;
/// A handoff carries a command line; anything larger is not ours.
const MAX_PAYLOAD: u32 = 64 * 1024;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Encoding(#[from] bincode::Error),

    #[error("not a handoff frame: {0}")]
    BadFrame(String),

    #[error("peer speaks protocol revision {got}, this build expects {PROTOCOL_REVISION}")]
    RevisionMismatch { got: u8 },

    #[error("handoff rejected: {0}")]
    Rejected(String),
}

/// Argument handoff from a second process: its command line, verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenRequest {
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenResponse {
    Accepted,
    Rejected { message: String },
}

pub(crate) fn write_frame<T: Serialize>(
    writer: &mut impl Write,
    message: &T,
) -> Result<(), IpcError> {
    let payload = bincode::serialize(message)?;
    if payload.len() > MAX_PAYLOAD as usize {
        return Err(IpcError::BadFrame(format!(
            "{}-byte payload exceeds the {MAX_PAYLOAD}-byte cap",
            payload.len()
        )));
    }
    let length = (payload.len() as u32).to_le_bytes();
    let header = [
        FRAME_TAG[0],
        FRAME_TAG[1],
        PROTOCOL_REVISION,
        length[0],
        length[1],
        length[2],
        length[3],
    ];
    writer.write_all(&header)?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

pub(crate) fn read_frame<T: DeserializeOwned>(reader: &mut impl Read) -> Result<T, IpcError> {
    let mut header = [0u8; 7];
    reader.read_exact(&mut header)?;
    if header[..2] != FRAME_TAG {
        return Err(IpcError::BadFrame("missing frame tag".to_string()));
    }
    if header[2] != PROTOCOL_REVISION {
        return Err(IpcError::RevisionMismatch { got: header[2] });
    }
    let length = u32::from_le_bytes([header[3], header[4], header[5], header[6]]);
    if length > MAX_PAYLOAD {
        return Err(IpcError::BadFrame(format!(
            "{length}-byte payload exceeds the {MAX_PAYLOAD}-byte cap"
        )));
    }
    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload)?;
    Ok(bincode::deserialize(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_round_trip() {
        let request = OpenRequest {
            args: vec!["one.db".to_string(), "two.db".to_string()],
        };
        let mut buffer = Vec::new();
        write_frame(&mut buffer, &request).unwrap();
        let decoded: OpenRequest = read_frame(&mut buffer.as_slice()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn foreign_bytes_are_refused_before_decoding() {
        let mut garbage: &[u8] = b"GET / HTTP/1.1\r\n\r\n";
        let error = read_frame::<OpenRequest>(&mut garbage).unwrap_err();
        assert!(matches!(error, IpcError::BadFrame(_)));
    }

    #[test]
    fn future_revisions_are_refused() {
        let request = OpenRequest { args: vec![] };
        let mut buffer = Vec::new();
        write_frame(&mut buffer, &request).unwrap();
        buffer[2] = PROTOCOL_REVISION + 1;
        let error = read_frame::<OpenRequest>(&mut buffer.as_slice()).unwrap_err();
        assert!(matches!(
            error,
            IpcError::RevisionMismatch { got } if got == PROTOCOL_REVISION + 1
        ));
    }
}
