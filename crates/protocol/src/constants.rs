use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Time allowed to write a WebSocket message.
pub const WS_WRITE_WAIT: Duration = Duration::from_secs(30);

/// Time to wait for any incoming frame (pong, request, ...).
///
/// If nothing arrives within this window the connection is considered
/// dead and is closed.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// How often the server pings each client.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(5);

/// Default maximum frame size in bytes (64 MiB).
pub const WS_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Deadline for one RPC call, measured from dispatch to reply.
pub const RPC_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Length of the big-endian header length prefix of a binary frame.
pub const BINARY_HEADER_LEN_SIZE: usize = 4;

/// WebSocket message type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    // Requests
    CreateConnection,
    GetData,
    SaveData,
    GetSum,
    Ping,

    // Responses
    ConnectionCreated,
    DataPart,
    DataSaved,
    ShaSum,
    Pong,
    Error,

    /// Forward compatibility: unknown message types deserialize here.
    #[serde(other)]
    Unknown,
}

/// Request payload does not parse, or a required field is missing.
pub const WS_ERR_CODE_BAD_REQUEST: i32 = 400;
pub const WS_ERR_CODE_NOT_FOUND: i32 = 404;
/// A chunk larger than the transfer's chunk size.
pub const WS_ERR_CODE_PAYLOAD_TOO_LARGE: i32 = 413;
/// A read starting at or past the end of the file.
pub const WS_ERR_CODE_END_OF_DATA: i32 = 416;
pub const WS_ERR_CODE_INTERNAL: i32 = 500;
pub const WS_ERR_CODE_NOT_IMPLEMENTED: i32 = 501;
/// The call did not finish within [`RPC_CALL_TIMEOUT`].
pub const WS_ERR_CODE_TIMEOUT: i32 = 504;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_serialization() {
        assert_eq!(
            serde_json::to_string(&MessageType::CreateConnection).unwrap(),
            "\"create_connection\""
        );
        assert_eq!(
            serde_json::to_string(&MessageType::ShaSum).unwrap(),
            "\"sha_sum\""
        );
        assert_eq!(
            serde_json::to_string(&MessageType::DataSaved).unwrap(),
            "\"data_saved\""
        );
    }

    #[test]
    fn message_type_deserialization() {
        let mt: MessageType = serde_json::from_str("\"get_data\"").unwrap();
        assert_eq!(mt, MessageType::GetData);
    }

    #[test]
    fn unknown_message_type() {
        let mt: MessageType = serde_json::from_str("\"delete_file\"").unwrap();
        assert_eq!(mt, MessageType::Unknown);
    }
}
