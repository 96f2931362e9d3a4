//! Binary frame protocol: 4-byte big-endian header length + JSON header + raw chunk.

use mhserver_protocol::constants::BINARY_HEADER_LEN_SIZE;
use mhserver_protocol::messages::SaveChunkHeader;
use serde::Serialize;

/// A parsed binary `save_data` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryFrame {
    pub header: SaveChunkHeader,
    pub chunk: Vec<u8>,
}

/// Parses a raw binary WebSocket frame.
///
/// Wire format: `[4 bytes: header_len (big-endian)][header_len bytes: JSON][rest: chunk]`
pub fn parse_binary_frame(data: &[u8]) -> Result<BinaryFrame, ParseError> {
    let Some((len_bytes, rest)) = data.split_first_chunk::<BINARY_HEADER_LEN_SIZE>() else {
        return Err(ParseError::TooShort);
    };
    let header_len = u32::from_be_bytes(*len_bytes) as usize;

    if rest.len() < header_len {
        return Err(ParseError::HeaderTruncated {
            expected: header_len,
            got: rest.len(),
        });
    }
    let (header_bytes, chunk) = rest.split_at(header_len);

    let header: SaveChunkHeader =
        serde_json::from_slice(header_bytes).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    Ok(BinaryFrame {
        header,
        chunk: chunk.to_vec(),
    })
}

/// Encodes a header and chunk into a binary frame.
pub fn encode_binary_frame<T: Serialize>(
    header: &T,
    chunk: &[u8],
) -> Result<Vec<u8>, serde_json::Error> {
    let header_json = serde_json::to_vec(header)?;
    let header_len = header_json.len() as u32;

    let mut buf = Vec::with_capacity(BINARY_HEADER_LEN_SIZE + header_json.len() + chunk.len());
    buf.extend_from_slice(&header_len.to_be_bytes());
    buf.extend_from_slice(&header_json);
    buf.extend_from_slice(chunk);
    Ok(buf)
}

/// Errors from binary frame parsing.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("frame too short (need at least 4 bytes)")]
    TooShort,

    #[error("header truncated: expected {expected} bytes, got {got}")]
    HeaderTruncated { expected: usize, got: usize },

    #[error("invalid header JSON: {0}")]
    InvalidJson(String),
}
