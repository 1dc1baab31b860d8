//! Network access to the update server
//!
//! The session never talks to `reqwest` directly; it goes through
//! [`FirmwareSource`], so tests and alternative transports can stand in.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::error::UpdateError;

/// Largest manifest body accepted, in bytes
pub const MAX_MANIFEST_BYTES: usize = 4096;

/// Body of the manifest request plus the certificate the server presented
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestResponse {
    /// Raw manifest bytes
    pub body: Bytes,
    /// DER-encoded leaf certificate, when the connection used TLS
    pub peer_certificate: Option<Vec<u8>>,
}

/// Streaming firmware response body
#[async_trait::async_trait]
pub trait FirmwareStream: Send {
    /// Next chunk of the body, or `None` once it has been fully received
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, UpdateError>;

    /// DER-encoded leaf certificate of the connection
    fn peer_certificate(&self) -> Option<&[u8]> {
        None
    }
}

/// Server holding the manifest and firmware archives
#[async_trait::async_trait]
pub trait FirmwareSource: Send + Sync {
    /// Fetch the manifest record in one response
    async fn fetch_manifest(&self, url: &str) -> Result<ManifestResponse, UpdateError>;

    /// Open a firmware archive as a streaming body
    async fn open_firmware(&self, url: &str) -> Result<Box<dyn FirmwareStream>, UpdateError>;
}

/// [`FirmwareSource`] over HTTP(S) with `reqwest`
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpSource {
    /// Build a client with the given stall timeout
    ///
    /// `timeout` bounds connecting and every read. It bounds the whole
    /// manifest request, but a firmware download may take as long as it
    /// needs while bytes keep arriving.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Network`] if the TLS backend cannot be set up.
    pub fn new(timeout: Duration) -> Result<Self, UpdateError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .tls_info(true)
            .user_agent(concat!("streamota/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, timeout })
    }

    async fn get(
        &self,
        url: &str,
        total: Option<Duration>,
    ) -> Result<reqwest::Response, UpdateError> {
        debug!("GET {url}");
        let mut request = self.client.get(url);
        if let Some(total) = total {
            request = request.timeout(total);
        }
        let response = request.send().await?.error_for_status()?;
        Ok(response)
    }
}

fn oversized_manifest() -> UpdateError {
    UpdateError::ManifestParse(format!("manifest exceeds {MAX_MANIFEST_BYTES} bytes"))
}

fn peer_certificate(response: &reqwest::Response) -> Option<Vec<u8>> {
    response
        .extensions()
        .get::<reqwest::tls::TlsInfo>()
        .and_then(|info| info.peer_certificate())
        .map(<[u8]>::to_vec)
}

struct HttpFirmwareStream {
    response: reqwest::Response,
    peer_certificate: Option<Vec<u8>>,
}

#[async_trait::async_trait]
impl FirmwareStream for HttpFirmwareStream {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, UpdateError> {
        Ok(self.response.chunk().await?)
    }

    fn peer_certificate(&self) -> Option<&[u8]> {
        self.peer_certificate.as_deref()
    }
}

#[async_trait::async_trait]
impl FirmwareSource for HttpSource {
    async fn fetch_manifest(&self, url: &str) -> Result<ManifestResponse, UpdateError> {
        let mut response = self.get(url, Some(self.timeout)).await?;
        if response
            .content_length()
            .is_some_and(|len| len > MAX_MANIFEST_BYTES as u64)
        {
            return Err(oversized_manifest());
        }

        let peer_certificate = peer_certificate(&response);
        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > MAX_MANIFEST_BYTES {
                return Err(oversized_manifest());
            }
            body.extend_from_slice(&chunk);
        }

        Ok(ManifestResponse {
            body: body.freeze(),
            peer_certificate,
        })
    }

    async fn open_firmware(&self, url: &str) -> Result<Box<dyn FirmwareStream>, UpdateError> {
        let response = self.get(url, None).await?;
        if let Some(length) = response.content_length() {
            debug!("Firmware body is {length} B");
        }
        let peer_certificate = peer_certificate(&response);
        Ok(Box::new(HttpFirmwareStream {
            response,
            peer_certificate,
        }))
    }
}
