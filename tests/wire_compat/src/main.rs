fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use mhserver_protocol::messages::{
        ConnectionCreated, CreateConnectionRequest, DataPart, GetDataRequest, GetSumRequest,
        SaveChunkHeader, SaveDataRequest, ShaSum,
    };
    use mhserver_protocol::{Message, MessageType};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn read_fixture(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    /// Parses a fixture into a Rust type, re-serializes it, and compares the
    /// JSON values (key order independent).
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let data = read_fixture(name);
        let fixture: serde_json::Value = serde_json::from_str(&data).unwrap();
        let parsed: T = serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  Rust:    {reserialized}"
        );
        parsed
    }

    // --- Envelope ---

    #[test]
    fn fixture_message_envelope() {
        let msg = roundtrip_test::<Message>("message_envelope.json");
        assert_eq!(msg.msg_type, MessageType::GetData);
        let req: GetDataRequest = msg.parse_payload().unwrap().unwrap();
        assert_eq!(req.chunk_id, 3);
    }

    #[test]
    fn fixture_message_error() {
        let msg = roundtrip_test::<Message>("message_error.json");
        assert_eq!(msg.msg_type, MessageType::Error);
        assert_eq!(msg.error.unwrap().code, 416);
    }

    // --- Requests ---

    #[test]
    fn fixture_create_connection_request() {
        let req = roundtrip_test::<CreateConnectionRequest>("create_connection_request.json");
        assert_eq!(req.category, "image");
        assert_eq!(req.size, 5 * 1024 * 1024);
    }

    #[test]
    fn fixture_get_data_request() {
        roundtrip_test::<GetDataRequest>("get_data_request.json");
    }

    #[test]
    fn fixture_save_data_request() {
        let req = roundtrip_test::<SaveDataRequest>("save_data_request.json");
        assert_eq!(req.chunk, b"hello");
    }

    #[test]
    fn fixture_get_sum_request() {
        roundtrip_test::<GetSumRequest>("get_sum_request.json");
    }

    #[test]
    fn fixture_save_chunk_header() {
        let header = roundtrip_test::<SaveChunkHeader>("save_chunk_header.json");
        assert_eq!(header.offset, 196_608);
    }

    // --- Responses ---

    #[test]
    fn fixture_connection_created() {
        let resp = roundtrip_test::<ConnectionCreated>("connection_created.json");
        assert_eq!(resp.chunk_size, 98_304);
        assert_eq!(resp.chunks_count, 54);
    }

    #[test]
    fn fixture_data_part() {
        let part = roundtrip_test::<DataPart>("data_part.json");
        assert_eq!(part.chunk, b"Anton Chigurh never killed anyone!\n");
    }

    #[test]
    fn fixture_sha_sum() {
        let sum = roundtrip_test::<ShaSum>("sha_sum.json");
        // SHA-256 of "hello".
        let expected: Vec<u8> = (0..32)
            .map(|i| {
                u8::from_str_radix(
                    &"2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
                        [i * 2..i * 2 + 2],
                    16,
                )
                .unwrap()
            })
            .collect();
        assert_eq!(sum.sum, expected);
    }

    #[test]
    fn all_fixtures_are_covered() {
        let mut names: Vec<String> = fs::read_dir(fixtures_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(
            names,
            [
                "connection_created.json",
                "create_connection_request.json",
                "data_part.json",
                "get_data_request.json",
                "get_sum_request.json",
                "message_envelope.json",
                "message_error.json",
                "save_chunk_header.json",
                "save_data_request.json",
                "sha_sum.json",
            ]
        );
    }
}
