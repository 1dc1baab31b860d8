//! Convenience re-exports for common update types

pub use crate::config::{UpdatePolicy, WriteStrategy};
pub use crate::error::UpdateError;
pub use crate::extract::{ExclusionSet, ExtractOptions, ExtractReport, Extractor};
pub use crate::manifest::FirmwareManifest;
pub use crate::pinning::{KeyPinVerifier, SubjectPublicKeySha256};
pub use crate::session::{InstallReport, SessionState, UpdateCheck, UpdateSession};
pub use crate::space::{FilesystemStats, FixedFreeSpace, SystemDiskStats};
pub use crate::transport::{FirmwareSource, FirmwareStream, HttpSource};
pub use crate::version::FirmwareVersion;
