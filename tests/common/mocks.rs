//! Mock implementations for test fixtures.
//!
//! Re-exports the mock implementations from `ota_agent::adapters::mock`
//! and adds builders for archives and announcements.

pub use ota_agent::adapters::mock::{
    MockControlChannel, MockHttpClient, MockPlatform, MockResponse, RecordedRequest,
};

use std::io::{Cursor, Write};

use bytes::Bytes;
use zip::write::SimpleFileOptions;

/// Build an in-memory zip archive from `(name, contents)` pairs.
pub fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// A small valid update package.
pub fn app_package() -> Vec<u8> {
    build_zip(&[
        ("app/bin/agent", b"#!/bin/sh\necho updated\n"),
        ("app/VERSION", b"2.0.0\n"),
    ])
}

/// Builder for announcement payloads.
pub struct AnnouncementBuilder {
    value: serde_json::Value,
}

impl AnnouncementBuilder {
    /// Announcement for `id` served from `url`.
    pub fn new(id: &str, url: &str) -> Self {
        Self {
            value: serde_json::json!({
                "Id": id,
                "Version": "2.0.0",
                "MpakDownloadUrl": url,
                "PublishedOn": "2024-06-01T08:00:00Z",
                "TargetDevices": ["test-device"],
            }),
        }
    }

    /// Announce the archive size and hash.
    pub fn with_archive(mut self, archive: &[u8]) -> Self {
        self.value["DownloadSize"] = serde_json::json!(archive.len());
        self.value["DownloadHash"] = serde_json::json!(ota_agent::store::hash_bytes(archive));
        self
    }

    /// Announce a wrong hash.
    pub fn with_hash(mut self, hash: &str) -> Self {
        self.value["DownloadHash"] = serde_json::json!(hash);
        self
    }

    pub fn build(self) -> String {
        self.value.to_string()
    }
}

/// Mock HTTP client serving `archive` at `url` with range support.
pub fn serving(url: &str, archive: &[u8]) -> MockHttpClient {
    let client = MockHttpClient::new();
    client.set_response(url, MockResponse::File(Bytes::copy_from_slice(archive)));
    client
}
