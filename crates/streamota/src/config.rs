//! Update policy configuration
//!
//! The policy is read from a JSON file owned by the device integrator and is
//! never modified by the update pipeline.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::decompress::DEFAULT_CHUNK_SIZE;
use crate::error::UpdateError;
use crate::extract::{ExclusionSet, relative_path};

/// Name of the manifest record under the base URL
pub const MANIFEST_NAME: &str = "latest";

/// How extracted files replace their existing counterparts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteStrategy {
    /// Truncate and overwrite the destination file directly
    #[default]
    InPlace,

    /// Write next to the destination, then rename over it
    ///
    /// Each file switches atomically where the filesystem supports atomic
    /// rename, at the cost of holding two copies of one file at a time.
    ShadowRename,
}

/// Settings consumed by the update session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePolicy {
    /// Base URL of the update server; always ends with `/` after validation
    pub base_url: String,

    /// File name of the downloaded archive, relative to `root`
    #[serde(default = "default_temp_archive_name")]
    pub temp_archive_name: String,

    /// Archive paths that must never be written (exact path or ancestor)
    #[serde(default)]
    pub excluded: Vec<String>,

    /// Paths removed, in order, after a successful install
    #[serde(default)]
    pub delete_after_install: Vec<String>,

    /// Device filesystem root every relative path resolves against
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// File holding the installed version, relative to `root`
    #[serde(default = "default_version_file")]
    pub version_file: String,

    /// Size of the bounded I/O buffers, in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// How extracted files replace existing ones
    #[serde(default)]
    pub write_strategy: WriteStrategy,

    /// HTTP stall timeout in seconds: connect, each read, and the whole
    /// manifest request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_temp_archive_name() -> String {
    "ota_update.tar.gz".to_string()
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_version_file() -> String {
    "version".to_string()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn invalid(reason: impl Into<String>) -> UpdateError {
    UpdateError::Config(reason.into())
}

impl UpdatePolicy {
    /// Create a policy with default settings for the given server and root
    pub fn new(base_url: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            base_url: base_url.into(),
            temp_archive_name: default_temp_archive_name(),
            excluded: Vec::new(),
            delete_after_install: Vec::new(),
            root: root.into(),
            version_file: default_version_file(),
            chunk_size: default_chunk_size(),
            write_strategy: WriteStrategy::default(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    /// Load and validate a policy from a JSON file
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Config`] if the file cannot be read, is not
    /// valid JSON, or fails [`UpdatePolicy::validate`].
    pub async fn load(path: &Path) -> Result<Self, UpdateError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| invalid(format!("cannot read {}: {e}", path.display())))?;

        let policy: UpdatePolicy = serde_json::from_str(&content)
            .map_err(|e| invalid(format!("cannot parse {}: {e}", path.display())))?;

        debug!("Loaded update policy from {}", path.display());
        policy.validate()
    }

    /// Check the policy and normalise the base URL
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Config`] for an empty or non-HTTP(S) base URL,
    /// an empty or escaping temp archive or version file name, or a zero
    /// chunk size.
    pub fn validate(mut self) -> Result<Self, UpdateError> {
        let url = self.base_url.trim();
        if url.is_empty() {
            return Err(invalid("base_url is empty"));
        }

        let parsed = reqwest::Url::parse(url)
            .map_err(|e| invalid(format!("base_url `{url}` is not a valid URL: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(invalid(format!(
                "base_url scheme must be http or https, got `{}`",
                parsed.scheme()
            )));
        }

        let mut url = url.to_string();
        if !url.ends_with('/') {
            debug!("Appending trailing separator to base_url {url}");
            url.push('/');
        }
        self.base_url = url;

        for (field, value) in [
            ("temp_archive_name", &self.temp_archive_name),
            ("version_file", &self.version_file),
        ] {
            relative_path(Path::new(value.as_str()))
                .ok()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| invalid(format!("{field} `{value}` must be a relative file path")))?;
        }

        if self.chunk_size == 0 {
            return Err(invalid("chunk_size must be greater than zero"));
        }

        Ok(self)
    }

    /// URL of the manifest record
    pub fn manifest_url(&self) -> String {
        format!("{}{MANIFEST_NAME}", self.base_url)
    }

    /// URL of a firmware archive named by the manifest
    pub fn firmware_url(&self, archive_filename: &str) -> String {
        format!("{}{archive_filename}", self.base_url)
    }

    /// Location of the downloaded archive on the device
    pub fn temp_archive_path(&self) -> PathBuf {
        self.root.join(&self.temp_archive_name)
    }

    /// Location of the installed version file on the device
    pub fn version_file_path(&self) -> PathBuf {
        self.root.join(&self.version_file)
    }

    /// Exclusion set built from [`UpdatePolicy::excluded`]
    pub fn exclusion_set(&self) -> ExclusionSet {
        ExclusionSet::new(&self.excluded)
    }

    /// HTTP stall timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
