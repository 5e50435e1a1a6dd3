// Record Encoding
//
// Versioned container for a persisted consensus metadata record:
//
//   magic "CMET" | version u32 | body length u32 | crc32(body) u32 | body
//
// Integers are little-endian, the body is JSON. Anything that does not
// decode exactly is reported as corruption; no field is defaulted.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::config::RaftConfig;
use crate::error::{Error, Result};
use crate::invariants::verify_raft_config;

pub const MAGIC: &[u8; 4] = b"CMET";
pub const FORMAT_VERSION: u32 = 1;
pub const HEADER_LEN: usize = 16;

/// The durable part of a replica's consensus state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub current_term: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voted_for: Option<String>,
    pub committed_config: RaftConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_config: Option<RaftConfig>,
}

fn corrupt(msg: impl Into<String>) -> Error {
    Error::Corruption(msg.into())
}

pub fn encode(state: &PersistedState) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(state)
        .map_err(|e| Error::io("encode consensus metadata", e.into()))?;
    let body_len = u32::try_from(body.len()).map_err(|_| {
        Error::InvalidArgument(format!("consensus metadata body of {} bytes", body.len()))
    })?;

    let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
    let written: std::io::Result<()> = (|| {
        buf.write_all(MAGIC)?;
        buf.write_u32::<LittleEndian>(FORMAT_VERSION)?;
        buf.write_u32::<LittleEndian>(body_len)?;
        buf.write_u32::<LittleEndian>(crc32fast::hash(&body))?;
        buf.write_all(&body)
    })();
    written.map_err(|e| Error::io("encode consensus metadata", e))?;
    Ok(buf)
}

pub fn decode(bytes: &[u8]) -> Result<PersistedState> {
    if bytes.len() < HEADER_LEN {
        return Err(corrupt(format!(
            "record is {} bytes, shorter than the {HEADER_LEN} byte header",
            bytes.len()
        )));
    }

    let mut cursor = bytes;
    let header: std::io::Result<([u8; 4], u32, u32, u32)> = (|| {
        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic)?;
        let version = cursor.read_u32::<LittleEndian>()?;
        let len = cursor.read_u32::<LittleEndian>()?;
        let crc = cursor.read_u32::<LittleEndian>()?;
        Ok((magic, version, len, crc))
    })();
    let (magic, version, len, crc) = header.map_err(|e| corrupt(format!("bad header: {e}")))?;

    if &magic != MAGIC {
        return Err(corrupt(format!("bad magic {magic:02x?}")));
    }
    if version != FORMAT_VERSION {
        return Err(corrupt(format!("unsupported format version {version}")));
    }
    let body = cursor;
    if body.len() != len as usize {
        return Err(corrupt(format!(
            "body length mismatch: header says {len}, found {}",
            body.len()
        )));
    }
    let actual = crc32fast::hash(body);
    if actual != crc {
        return Err(corrupt(format!(
            "checksum mismatch: expected {crc:#010x}, got {actual:#010x}"
        )));
    }

    let state: PersistedState =
        serde_json::from_slice(body).map_err(|e| corrupt(format!("malformed body: {e}")))?;

    if state.current_term < 0 {
        return Err(corrupt(format!("negative term {}", state.current_term)));
    }
    verify_raft_config(&state.committed_config)
        .map_err(|v| corrupt(format!("committed config: {v}")))?;
    if let Some(pending) = &state.pending_config {
        verify_raft_config(pending).map_err(|v| corrupt(format!("pending config: {v}")))?;
    }
    Ok(state)
}
