fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use chunkup_protocol::{
        ChunkAck, ErrorBody, FileMetadata, FileStatus, InitUploadResponse, LoginResponse,
    };

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    fn parse_fixture<T: serde::de::DeserializeOwned>(name: &str) -> T {
        serde_json::from_value(load_fixture(name))
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"))
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values (order-independent).
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));
        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  Go:   {fixture}\n  Rust: {reserialized}"
        );
        parsed
    }

    // --- Success bodies ---

    #[test]
    fn fixture_login_response() {
        let login: LoginResponse = roundtrip_test("login_response.json");
        assert_eq!(login.token_type, "bearer");
        assert!(!login.access_token.is_empty());
    }

    #[test]
    fn fixture_init_upload_response() {
        let init: InitUploadResponse = roundtrip_test("init_upload_response.json");
        assert_eq!(init.file_id, init.metadata.file_id);
        assert_eq!(init.metadata.status, FileStatus::Pending);
        assert_eq!(init.metadata.next_expected_byte, 0);
        assert_eq!(init.metadata.checksum(), None);
    }

    #[test]
    fn fixture_chunk_ack() {
        let ack: ChunkAck = roundtrip_test("chunk_ack.json");
        assert!(!ack.is_duplicate());
        assert_eq!(ack.received_bytes, Some(1_048_576));
        assert_eq!(ack.total_bytes, Some(2_500_000));
    }

    #[test]
    fn fixture_chunk_ack_duplicate() {
        let ack: ChunkAck = roundtrip_test("chunk_ack_duplicate.json");
        assert!(ack.is_duplicate());
        assert_eq!(ack.next_expected_byte, 2_097_152);
    }

    #[test]
    fn fixture_status_partial() {
        let meta: FileMetadata = roundtrip_test("status_partial.json");
        assert_eq!(meta.status, FileStatus::Partial);
        assert!(meta.is_consistent());
        assert_eq!(meta.remaining_bytes(), 2_500_000 - 2_097_152);
    }

    #[test]
    fn fixture_status_fully_received() {
        // The status endpoint keeps answering `partial` after the last chunk.
        let meta: FileMetadata = roundtrip_test("status_fully_received.json");
        assert_eq!(meta.status, FileStatus::Partial);
        assert!(meta.is_fully_received());
        assert_eq!(meta.percentage(), 100.0);

        let settled = meta.settled();
        assert!(settled.status.is_terminal());
        assert_eq!(settled.checksum(), None);
    }

    // --- Error bodies ---

    #[test]
    fn fixture_error_not_initialized() {
        let body: ErrorBody = parse_fixture("error_not_initialized.json");
        assert_eq!(body.describe("fallback"), "upload not initialized");
        assert_eq!(body.message.as_deref(), Some("please call /init_upload first"));
    }

    #[test]
    fn fixture_error_size_mismatch_ignores_extra_fields() {
        let body: ErrorBody = parse_fixture("error_size_mismatch.json");
        assert_eq!(body.describe("fallback"), "total size mismatch");
        assert_eq!(body.message, None);
    }

    #[test]
    fn fixture_error_invalid_token() {
        let body: ErrorBody = parse_fixture("error_invalid_token.json");
        assert_eq!(body.describe("fallback"), "Invalid token");
    }

    #[test]
    fn fixture_status_strings() {
        for status in [
            FileStatus::Complete,
            FileStatus::Partial,
            FileStatus::Pending,
            FileStatus::NotFound,
            FileStatus::NotUploaded,
        ] {
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json, serde_json::json!(status.as_str()));
        }
    }
}
