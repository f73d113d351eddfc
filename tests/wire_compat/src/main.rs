fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    /// Fixtures are captured from the storage service's actual request and
    /// response bodies and checked in next to these tests.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("fixtures")
            .join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Rewrites every number as f64 so `65` and `65.0` compare equal.
    ///
    /// The service emits JavaScript numbers and serde may produce either
    /// form; both are semantically identical.
    fn normalized(v: serde_json::Value) -> serde_json::Value {
        use serde_json::Value;
        match v {
            Value::Number(n) => match n.as_f64() {
                Some(f) => serde_json::json!(f),
                None => Value::Number(n),
            },
            Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, normalized(v))).collect())
            }
            Value::Array(items) => Value::Array(items.into_iter().map(normalized).collect()),
            other => other,
        }
    }

    /// Parses a fixture into `T`, serializes it back, and requires the two
    /// JSON documents to match key for key (order-independent,
    /// float-normalized).
    fn assert_roundtrip<T>(name: &str)
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let emitted = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            normalized(fixture.clone()),
            normalized(emitted.clone()),
            "roundtrip mismatch for {name}:\n  service: {fixture}\n  Rust:    {emitted}"
        );
    }

    // --- Session fixtures ---

    #[test]
    fn fixture_init_session_request() {
        assert_roundtrip::<stevedore_protocol::InitSessionRequest>("init_session_request.json");
    }

    #[test]
    fn fixture_session_snapshot() {
        assert_roundtrip::<stevedore_protocol::SessionSnapshot>("session_snapshot.json");
    }

    #[test]
    fn fixture_abort_request() {
        assert_roundtrip::<stevedore_protocol::AbortRequest>("abort_request.json");
    }

    // --- Chunk fixtures ---

    #[test]
    fn fixture_chunk_upload_request() {
        assert_roundtrip::<stevedore_protocol::ChunkUploadRequest>("chunk_upload_request.json");
    }

    #[test]
    fn fixture_chunk_ack() {
        assert_roundtrip::<stevedore_protocol::ChunkAck>("chunk_ack.json");
    }

    // --- Finalize fixtures ---

    #[test]
    fn fixture_finalize_request() {
        assert_roundtrip::<stevedore_protocol::FinalizeRequest>("finalize_request.json");
    }

    #[test]
    fn fixture_finalize_response() {
        assert_roundtrip::<stevedore_protocol::FinalizeResponse>("finalize_response.json");
    }

    // --- Direct upload fixtures ---

    #[test]
    fn fixture_direct_upload_request() {
        assert_roundtrip::<stevedore_protocol::DirectUploadRequest>("direct_upload_request.json");

        let parsed: stevedore_protocol::DirectUploadRequest =
            serde_json::from_value(load_fixture("direct_upload_request.json")).unwrap();
        assert_eq!(parsed.kind, stevedore_protocol::FileKind::Image);
    }

    #[test]
    fn fixture_direct_upload_response() {
        assert_roundtrip::<stevedore_protocol::DirectUploadResponse>("direct_upload_response.json");
    }

    // --- Error and receipt fixtures ---

    #[test]
    fn fixture_upload_error() {
        assert_roundtrip::<stevedore_transfer::UploadError>("upload_error.json");

        let parsed: stevedore_transfer::UploadError =
            serde_json::from_value(load_fixture("upload_error.json")).unwrap();
        assert_eq!(parsed.kind, stevedore_transfer::ErrorKind::ServerError);
        assert_eq!(parsed.kind.as_code(), "SERVER_ERROR");
    }

    #[test]
    fn fixture_upload_receipt() {
        assert_roundtrip::<stevedore_engine::UploadReceipt>("upload_receipt.json");
    }

    // --- Backward compatibility: older service responses ---

    #[test]
    fn legacy_chunk_ack_no_count() {
        // Older service builds acknowledge without a running count.
        let json = r#"{
            "fileId": "f-legacy",
            "chunkIndex": 9
        }"#;
        let ack: stevedore_protocol::ChunkAck = serde_json::from_str(json).unwrap();
        assert_eq!(
            ack.acknowledged_count, 0,
            "missing acknowledgedCount should default to 0"
        );
    }

    #[test]
    fn legacy_error_without_details() {
        let json = r#"{
            "kind": "TIMEOUT",
            "message": "request timed out",
            "retryable": true,
            "maxRetries": 10
        }"#;
        let err: stevedore_transfer::UploadError = serde_json::from_str(json).unwrap();
        assert!(err.details.is_none(), "missing details should default to None");
        assert_eq!(err.kind, stevedore_transfer::ErrorKind::Timeout);
    }

    #[test]
    fn legacy_receipt_without_metadata() {
        // Unprocessed uploads carry no metadata block.
        let json = r#"{
            "uploadId": "u-legacy",
            "fileUrl": "https://cdn.example.com/files/u-legacy/raw.bin",
            "fileName": "raw.bin",
            "fileSize": 2048,
            "mimeType": "application/octet-stream"
        }"#;
        let receipt: stevedore_engine::UploadReceipt = serde_json::from_str(json).unwrap();
        assert!(
            receipt.metadata.is_none(),
            "missing metadata should default to None"
        );
    }

    // --- Algorithm parity ---

    #[test]
    fn fixture_checksum_contract() {
        let fixture = load_fixture("checksum_contract.json");
        let body = fixture["body"].as_str().unwrap();
        let sha256 = fixture["sha256"].as_str().unwrap();
        let crc32 = fixture["crc32"].as_str().unwrap();

        let got = stevedore_transfer::checksum_bytes(body.as_bytes());
        assert_eq!(got, sha256, "SHA-256 mismatch for body {body:?}");

        let got = stevedore_transfer::crc32_digest(body.as_bytes());
        assert_eq!(got, crc32, "CRC32 mismatch for body {body:?}");
    }

    #[test]
    fn fixture_file_signature() {
        // The service keys resumable sessions by this exact string.
        let fixture = load_fixture("file_signature.json");
        let signature = stevedore_transfer::FileSignature {
            file_name: fixture["fileName"].as_str().unwrap().to_string(),
            file_size: fixture["fileSize"].as_u64().unwrap(),
            last_modified: fixture["lastModified"].as_u64().unwrap(),
        };
        let expected = fixture["signature"].as_str().unwrap();
        assert_eq!(
            signature.to_string(),
            expected,
            "signature format drifted from the service contract"
        );
    }
}
