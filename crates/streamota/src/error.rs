//! Error types for over-the-air update operations

use thiserror::Error;

/// Errors that can occur while checking for or installing a firmware update
#[derive(Error, Debug)]
pub enum UpdateError {
    /// Update policy is malformed or cannot be loaded
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Connection or transport failure
    #[error("Network error: {0}")]
    Network(String),

    /// Remote manifest record is malformed
    #[error("Malformed manifest: {0}")]
    ManifestParse(String),

    /// Declared free space requirement exceeds what the filesystem has left
    #[error("Insufficient free space: {required_kb} kB required, {available_kb} kB available")]
    InsufficientSpace {
        /// Free space declared by the manifest, in kB
        required_kb: u64,
        /// Free space reported by the filesystem, in kB
        available_kb: u64,
    },

    /// Downloaded archive does not match the declared SHA-256 hash
    #[error("Integrity check failed: expected {expected}, got {actual}")]
    Integrity {
        /// Hex digest declared by the manifest
        expected: String,
        /// Hex digest of the downloaded bytes
        actual: String,
    },

    /// Compressed stream is structurally invalid
    #[error("Decompression failed at compressed offset {offset}: {reason}")]
    Decompress {
        /// Bytes consumed from the compressed stream when the fault surfaced
        offset: u64,
        /// Decoder error description
        reason: String,
    },

    /// Archive container is malformed
    #[error("Malformed archive: {0}")]
    ArchiveFormat(String),

    /// Server certificate does not match the pinned key hash
    #[error("Certificate pinning failed: {0}")]
    Pinning(String),

    /// `install_new_firmware` was called without a verified archive
    #[error("No staged update: check_for_updates must stage a verified archive first")]
    NoStagedUpdate,

    /// Filesystem failure while writing the firmware tree
    #[error("I/O error during extraction: {0}")]
    Extraction(#[source] std::io::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UpdateError {
    /// Whether the device filesystem is guaranteed untouched by the failed attempt.
    ///
    /// Decompression, archive and extraction I/O errors are raised after some
    /// entries may already have been overwritten.
    pub fn is_safe_failure(&self) -> bool {
        !matches!(
            self,
            UpdateError::Decompress { .. }
                | UpdateError::ArchiveFormat(_)
                | UpdateError::Extraction(_)
        )
    }

    /// Reclassify a plain I/O error as one raised while writing the firmware tree
    pub(crate) fn during_extraction(self) -> Self {
        match self {
            UpdateError::Io(e) => UpdateError::Extraction(e),
            other => other,
        }
    }

    /// Short stable name of the error kind, used for logs and machine output
    pub fn kind(&self) -> &'static str {
        match self {
            UpdateError::Config(_) => "config",
            UpdateError::Network(_) => "network",
            UpdateError::ManifestParse(_) => "manifest_parse",
            UpdateError::InsufficientSpace { .. } => "insufficient_space",
            UpdateError::Integrity { .. } => "integrity",
            UpdateError::Decompress { .. } => "decompress",
            UpdateError::ArchiveFormat(_) => "archive_format",
            UpdateError::Pinning(_) => "pinning",
            UpdateError::NoStagedUpdate => "no_staged_update",
            UpdateError::Extraction(_) => "extraction_io",
            UpdateError::Io(_) => "io",
        }
    }
}

impl From<serde_json::Error> for UpdateError {
    fn from(e: serde_json::Error) -> Self {
        UpdateError::Config(e.to_string())
    }
}

impl From<reqwest::Error> for UpdateError {
    fn from(e: reqwest::Error) -> Self {
        UpdateError::Network(e.to_string())
    }
}
