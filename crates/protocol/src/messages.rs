use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Opens a transfer for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConnectionRequest {
    pub username: String,
    pub filename: String,
    /// `file`, `image` or `music`.
    pub category: String,
    pub size: u64,
}

/// Asks for chunk `chunk_id` of a transfer's file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetDataRequest {
    pub handle: String,
    pub chunk_id: u64,
}

/// Uploads one chunk. `chunk` is base64 in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveDataRequest {
    pub handle: String,
    #[serde(with = "base64_bytes")]
    pub chunk: Vec<u8>,
    pub offset: u64,
}

/// Asks for the SHA-256 of chunk `chunk_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetSumRequest {
    pub handle: String,
    pub chunk_id: u64,
}

/// JSON header of a binary `SaveData` frame; the chunk follows it raw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveChunkHeader {
    pub id: String,
    pub handle: String,
    pub offset: u64,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionCreated {
    pub handle: String,
    pub chunk_size: u64,
    pub chunks_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPart {
    #[serde(with = "base64_bytes")]
    pub chunk: Vec<u8>,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaSum {
    /// 32-byte SHA-256 digest, base64 in JSON.
    #[serde(with = "base64_bytes")]
    pub sum: Vec<u8>,
}

/// Byte fields travel as standard base64 strings.
mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
