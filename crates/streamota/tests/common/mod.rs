//! Shared fixtures: firmware archives, device roots and a mock update server

#![allow(dead_code)]

use std::io;
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;
use streamota::{UpdateError, UpdatePolicy, sha256_hex};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// One entry of a test archive
pub enum Entry<'a> {
    File(&'a str, &'a [u8]),
    Dir(&'a str),
}

/// Build a gzip-compressed tar archive from entries, in order
pub fn firmware_archive(entries: &[Entry<'_>]) -> io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for entry in entries {
        let mut header = tar::Header::new_gnu();
        match entry {
            Entry::File(name, data) => {
                header.set_entry_type(tar::EntryType::Regular);
                header.set_size(data.len() as u64);
                header.set_mode(0o644);
                builder.append_data(&mut header, name, *data)?;
            }
            Entry::Dir(name) => {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_size(0);
                header.set_mode(0o755);
                builder.append_data(&mut header, name, io::empty())?;
            }
        }
    }
    builder.into_inner()?.finish()
}

/// Manifest line with free space 0 and the archive's hash
pub fn hashed_manifest(version: &str, filename: &str, archive: &[u8]) -> String {
    format!("{version};{filename};0;{}", sha256_hex(archive))
}

/// Device root with an installed version file
pub fn device_root(installed_version: Option<&str>) -> io::Result<TempDir> {
    let dir = TempDir::new()?;
    if let Some(version) = installed_version {
        std::fs::write(dir.path().join("version"), format!("{version}\n"))?;
    }
    Ok(dir)
}

/// Validated policy pointing at the mock server's `/ota/` path
pub fn policy(server: &MockServer, root: &Path) -> Result<UpdatePolicy, UpdateError> {
    UpdatePolicy::new(format!("{}/ota", server.uri()), root).validate()
}

/// Serve the manifest record at `/ota/latest`
pub async fn serve_manifest(server: &MockServer, manifest: &str) {
    Mock::given(method("GET"))
        .and(path("/ota/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_string(manifest))
        .expect(1..)
        .mount(server)
        .await;
}

/// Serve a firmware archive at `/ota/<name>`, expecting exactly `hits` requests
pub async fn serve_firmware(server: &MockServer, name: &str, archive: Vec<u8>, hits: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/ota/{name}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
        .expect(hits)
        .mount(server)
        .await;
}
