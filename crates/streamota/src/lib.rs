//! Streaming over-the-air firmware updates for file-tree firmware
//!
//! This crate replaces the files of a device's live firmware tree from a
//! gzip-compressed tar archive published over HTTP(S), with:
//! - A single-line remote manifest (`version;filename[;free_kb[;sha256]]`)
//! - Free space checking before any firmware byte is downloaded
//! - One-pass download and SHA-256 verification
//! - Streaming decompression and extraction through a fixed-size buffer
//! - Exclusion of paths that must survive updates (configuration, data)
//! - Optional certificate pinning of the update server
//!
//! # Architecture
//!
//! - [`manifest`]: Manifest record parsing
//! - [`space`]: Free space gate
//! - [`hasher`]: Incremental SHA-256
//! - [`decompress`]: Pull-based gzip stage
//! - [`extract`]: Tar extraction state machine
//! - [`session`]: Check and install orchestration
//! - [`transport`]: HTTP access to the update server
//! - [`pinning`]: Certificate pinning
//! - [`config`]: Update policy
//! - [`error`]: Error types
//!
//! # Failure safety
//!
//! Everything up to and including hash verification leaves the firmware tree
//! untouched. Extraction overwrites files as it goes, so a corrupt archive
//! that passed verification (or one published without a hash) can leave a
//! mix of old and new files; see [`UpdateError::is_safe_failure`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use streamota::prelude::*;
//!
//! # async fn example() -> Result<(), UpdateError> {
//! let policy = UpdatePolicy::load("streamota.json".as_ref()).await?;
//! let source = HttpSource::new(policy.request_timeout())?;
//! let mut session = UpdateSession::new(policy, Arc::new(source))?;
//!
//! if session.check_for_updates(true, None).await? {
//!     let report = session.install_new_firmware().await?;
//!     println!("Installed {}, restart to apply", report.version);
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod cleanup;
pub mod config;
pub mod decompress;
pub mod error;
pub mod extract;
pub mod hasher;
pub mod manifest;
pub mod pinning;
pub mod prelude;
pub mod session;
pub mod space;
pub mod stream;
pub mod transport;
pub mod version;

pub use cleanup::remove_path_recursive;
pub use config::{MANIFEST_NAME, UpdatePolicy, WriteStrategy};
pub use decompress::{DEFAULT_CHUNK_SIZE, GzipStage};
pub use error::UpdateError;
pub use extract::{
    ArchiveEntry, EntryKind, ExclusionSet, ExtractOptions, ExtractReport, Extractor,
    TAR_BLOCK_SIZE,
};
pub use hasher::{StreamingHasher, sha256, sha256_hex};
pub use manifest::{DIGEST_LEN, FirmwareManifest, MANIFEST_DELIMITER};
pub use pinning::{CertificateSha256, KeyPinVerifier, SubjectPublicKeySha256, verify_pin};
pub use session::{InstallReport, SessionState, StagedUpdate, UpdateCheck, UpdateSession};
pub use space::{FilesystemStats, FixedFreeSpace, SystemDiskStats, check_free_space};
pub use stream::StreamCursor;
pub use transport::{
    FirmwareSource, FirmwareStream, HttpSource, MAX_MANIFEST_BYTES, ManifestResponse,
};
pub use version::{FirmwareVersion, VersionError, is_newer};
