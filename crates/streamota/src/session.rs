//! Update session: check, download, verify, install
//!
//! An [`UpdateSession`] holds everything that lives between
//! [`UpdateSession::check_for_updates`] and
//! [`UpdateSession::install_new_firmware`]. The sequence is strictly ordered:
//!
//! 1. read the installed version (skipped when version checking is off)
//! 2. fetch and parse the manifest, after pinning the server if requested
//! 3. stop when the published version is not newer
//! 4. check free space against the declared requirement
//! 5. open the firmware archive as a streaming body
//! 6. write it to the temp file while hashing, in one pass
//! 7. compare the digest with the declared hash, deleting the file on mismatch
//! 8. decompress and extract the verified archive into the root
//! 9. delete the temp archive and the configured stale paths
//!
//! Restarting the device afterwards is up to the caller.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::cleanup::remove_path_recursive;
use crate::config::UpdatePolicy;
use crate::error::UpdateError;
use crate::extract::{ExtractOptions, ExtractReport, Extractor};
use crate::hasher::StreamingHasher;
use crate::manifest::FirmwareManifest;
use crate::pinning::{KeyPinVerifier, SubjectPublicKeySha256, verify_pin};
use crate::space::{FilesystemStats, SystemDiskStats, check_free_space};
use crate::transport::{FirmwareSource, FirmwareStream};
use crate::version::is_newer;

/// Where a session stands after its last operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SessionState {
    /// Nothing attempted yet
    #[default]
    Idle,

    /// The server has nothing newer than the installed firmware
    UpToDate,

    /// A verified archive is waiting to be installed
    Staged,

    /// The staged archive was installed
    Installed,

    /// The last operation failed
    Failed {
        /// Error description
        error: String,
        /// Whether the device filesystem is known to be untouched
        safe: bool,
    },
}

/// Verified archive held between check and install
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedUpdate {
    /// Manifest the archive was downloaded for
    pub manifest: FirmwareManifest,
    /// Downloaded archive on the device
    pub archive_path: PathBuf,
    /// Size of the downloaded archive
    pub archive_bytes: u64,
}

/// Outcome of comparing the published manifest with the installed firmware
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCheck {
    /// Manifest published by the server
    pub manifest: FirmwareManifest,
    /// Installed version, if it was read
    pub installed_version: Option<String>,
    /// Whether installing the published firmware is warranted
    pub update_available: bool,
}

/// Summary of a successful install
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReport {
    /// Version that was installed
    pub version: String,

    /// Extraction statistics
    pub extract: ExtractReport,

    /// Paths removed after extraction, temp archive included
    pub deleted: Vec<String>,

    /// Non-fatal cleanup problems
    pub warnings: Vec<String>,

    /// Time spent installing
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// One device's update session
pub struct UpdateSession {
    policy: UpdatePolicy,
    source: Arc<dyn FirmwareSource>,
    stats: Arc<dyn FilesystemStats>,
    pin_verifier: Arc<dyn KeyPinVerifier>,
    staged: Option<StagedUpdate>,
    state: SessionState,
}

impl UpdateSession {
    /// Create a session using the OS disk statistics and public key pinning
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Config`] if the policy fails
    /// [`UpdatePolicy::validate`].
    pub fn new(
        policy: UpdatePolicy,
        source: Arc<dyn FirmwareSource>,
    ) -> Result<Self, UpdateError> {
        Ok(Self {
            policy: policy.validate()?,
            source,
            stats: Arc::new(SystemDiskStats),
            pin_verifier: Arc::new(SubjectPublicKeySha256),
            staged: None,
            state: SessionState::Idle,
        })
    }

    /// Replace the free space source
    pub fn with_filesystem_stats(mut self, stats: Arc<dyn FilesystemStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Replace the certificate pin verifier
    pub fn with_pin_verifier(mut self, verifier: Arc<dyn KeyPinVerifier>) -> Self {
        self.pin_verifier = verifier;
        self
    }

    /// Policy the session runs with
    pub fn policy(&self) -> &UpdatePolicy {
        &self.policy
    }

    /// State after the last operation
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Archive waiting to be installed, if any
    pub fn staged(&self) -> Option<&StagedUpdate> {
        self.staged.as_ref()
    }

    /// Installed version read from the version file
    ///
    /// A missing or empty file yields `None`.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Io`] if the file exists but cannot be read.
    pub async fn installed_version(&self) -> Result<Option<String>, UpdateError> {
        let path = self.policy.version_file_path();
        match fs::read_to_string(&path).await {
            Ok(content) => {
                let version = content.lines().next().unwrap_or_default().trim();
                if version.is_empty() {
                    warn!("Version file {} is empty", path.display());
                    Ok(None)
                } else {
                    Ok(Some(version.to_string()))
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("No version file at {}", path.display());
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch the manifest and compare it with the installed firmware
    ///
    /// Nothing is downloaded beyond the manifest, and the session state is
    /// left alone.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Network`], [`UpdateError::Pinning`] or
    /// [`UpdateError::ManifestParse`] as the manifest is fetched, checked and
    /// parsed.
    pub async fn probe(
        &self,
        version_check: bool,
        pinned_key_hash: Option<&[u8]>,
    ) -> Result<UpdateCheck, UpdateError> {
        let installed_version = if version_check {
            self.installed_version().await?
        } else {
            debug!("Version check disabled");
            None
        };

        let manifest = self.fetch_manifest(pinned_key_hash).await?;

        let update_available = match &installed_version {
            Some(local) => is_newer(&manifest.version, local),
            None => true,
        };

        Ok(UpdateCheck {
            manifest,
            installed_version,
            update_available,
        })
    }

    /// Look for newer firmware and stage it when found
    ///
    /// Returns `Ok(false)` when the published version is not newer than the
    /// installed one; in that case the firmware archive is never requested.
    /// On `Ok(true)` a verified archive is staged for
    /// [`UpdateSession::install_new_firmware`]. Any earlier staging is
    /// discarded first.
    ///
    /// # Errors
    ///
    /// Fails with [`UpdateError::InsufficientSpace`] before the download,
    /// [`UpdateError::Integrity`] after it (the temp file is removed), and
    /// with the errors of [`UpdateSession::probe`].
    pub async fn check_for_updates(
        &mut self,
        version_check: bool,
        pinned_key_hash: Option<&[u8]>,
    ) -> Result<bool, UpdateError> {
        self.staged = None;

        match self.stage_update(version_check, pinned_key_hash).await {
            Ok(Some(staged)) => {
                self.staged = Some(staged);
                self.state = SessionState::Staged;
                Ok(true)
            }
            Ok(None) => {
                self.state = SessionState::UpToDate;
                Ok(false)
            }
            Err(e) => {
                error!("Update check failed: {e}");
                self.state = SessionState::Failed {
                    error: e.to_string(),
                    safe: true,
                };
                Err(e)
            }
        }
    }

    /// Install the staged archive into the root
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::NoStagedUpdate`] when nothing is staged.
    /// [`UpdateError::Decompress`], [`UpdateError::ArchiveFormat`] and
    /// [`UpdateError::Extraction`] leave the root partially updated; the
    /// session records them as unsafe.
    pub async fn install_new_firmware(&mut self) -> Result<InstallReport, UpdateError> {
        let staged = self.staged.take().ok_or(UpdateError::NoStagedUpdate)?;
        let started = Instant::now();

        info!(
            version = %staged.manifest.version,
            archive = %staged.archive_path.display(),
            "Installing firmware"
        );

        let archive = match fs::File::open(&staged.archive_path).await {
            Ok(file) => file.into_std().await,
            Err(e) => {
                self.state = SessionState::Failed {
                    error: e.to_string(),
                    safe: true,
                };
                return Err(e.into());
            }
        };

        let extractor = Extractor::new(
            self.policy.root.clone(),
            self.policy.exclusion_set(),
            ExtractOptions {
                chunk_size: self.policy.chunk_size,
                write_strategy: self.policy.write_strategy,
            },
        );

        let extracted = tokio::task::spawn_blocking(move || extractor.extract_gzip(archive))
            .await
            .map_err(|e| UpdateError::Extraction(io::Error::other(e)))
            .and_then(|result| result);

        let extract = match extracted {
            Ok(report) => report,
            Err(e) => {
                error!(
                    kind = e.kind(),
                    "Extraction failed, the firmware tree may be partially updated: {e}"
                );
                self.state = SessionState::Failed {
                    error: e.to_string(),
                    safe: false,
                };
                discard_archive(&staged.archive_path).await;
                return Err(e);
            }
        };

        let mut deleted = Vec::new();
        let mut warnings = Vec::new();
        let stale = std::iter::once(&self.policy.temp_archive_name)
            .chain(self.policy.delete_after_install.iter());
        for rel in stale {
            match remove_path_recursive(&self.policy.root, rel).await {
                Ok(true) => deleted.push(rel.clone()),
                Ok(false) => debug!("{rel} not present, nothing to delete"),
                Err(e) => {
                    warn!("Could not delete {rel}: {e}");
                    warnings.push(format!("{rel}: {e}"));
                }
            }
        }

        let report = InstallReport {
            version: staged.manifest.version,
            extract,
            deleted,
            warnings,
            duration: started.elapsed(),
        };

        info!(
            version = %report.version,
            files = report.extract.files_written,
            warnings = report.warnings.len(),
            "Firmware installed, restart required"
        );
        self.state = SessionState::Installed;
        Ok(report)
    }

    /// Check and, when newer firmware is staged, install it
    ///
    /// Returns `Ok(None)` when the device is up to date.
    ///
    /// # Errors
    ///
    /// Any error of [`UpdateSession::check_for_updates`] or
    /// [`UpdateSession::install_new_firmware`].
    pub async fn run_update(
        &mut self,
        version_check: bool,
        pinned_key_hash: Option<&[u8]>,
    ) -> Result<Option<InstallReport>, UpdateError> {
        if !self.check_for_updates(version_check, pinned_key_hash).await? {
            return Ok(None);
        }
        self.install_new_firmware().await.map(Some)
    }

    async fn fetch_manifest(
        &self,
        pinned_key_hash: Option<&[u8]>,
    ) -> Result<FirmwareManifest, UpdateError> {
        let url = self.policy.manifest_url();
        info!("Fetching manifest from {url}");

        let response = self.source.fetch_manifest(&url).await?;
        if let Some(pin) = pinned_key_hash {
            verify_pin(
                self.pin_verifier.as_ref(),
                response.peer_certificate.as_deref(),
                pin,
            )?;
        }

        let text = std::str::from_utf8(&response.body)
            .map_err(|e| UpdateError::ManifestParse(format!("manifest is not UTF-8: {e}")))?;
        let record = text
            .lines()
            .find(|line| !line.trim().is_empty())
            .unwrap_or_default();

        let manifest = FirmwareManifest::parse(record)?;
        info!(
            version = %manifest.version,
            archive = %manifest.archive_filename,
            required_kb = manifest.required_free_kb,
            hashed = manifest.expected_hash.is_some(),
            "Manifest received"
        );
        Ok(manifest)
    }

    async fn stage_update(
        &self,
        version_check: bool,
        pinned_key_hash: Option<&[u8]>,
    ) -> Result<Option<StagedUpdate>, UpdateError> {
        let check = self.probe(version_check, pinned_key_hash).await?;
        if !check.update_available {
            info!(
                installed = check.installed_version.as_deref().unwrap_or_default(),
                published = %check.manifest.version,
                "No update available"
            );
            return Ok(None);
        }

        check_free_space(
            check.manifest.required_free_kb,
            self.stats.as_ref(),
            &self.policy.root,
        )?;

        self.download(check.manifest, pinned_key_hash).await.map(Some)
    }

    async fn download(
        &self,
        manifest: FirmwareManifest,
        pinned_key_hash: Option<&[u8]>,
    ) -> Result<StagedUpdate, UpdateError> {
        let url = self.policy.firmware_url(&manifest.archive_filename);
        info!("Downloading firmware from {url}");

        let stream = self.source.open_firmware(&url).await?;
        if let Some(pin) = pinned_key_hash {
            verify_pin(self.pin_verifier.as_ref(), stream.peer_certificate(), pin)?;
        }

        let archive_path = self.policy.temp_archive_path();
        let (archive_bytes, hasher) = match receive(stream, &archive_path).await {
            Ok(received) => received,
            Err(e) => {
                discard_archive(&archive_path).await;
                return Err(e);
            }
        };

        match &manifest.expected_hash {
            Some(expected) => {
                let actual = hasher.finalize();
                if &actual != expected {
                    discard_archive(&archive_path).await;
                    return Err(UpdateError::Integrity {
                        expected: hex::encode(expected),
                        actual: hex::encode(actual),
                    });
                }
                info!("Archive hash verified");
            }
            None => warn!("Manifest declares no hash, archive integrity is unverified"),
        }

        info!("Firmware staged: {archive_bytes} B at {}", archive_path.display());
        Ok(StagedUpdate {
            manifest,
            archive_path,
            archive_bytes,
        })
    }
}

/// Write the firmware body to `path`, hashing each chunk on the way
async fn receive(
    mut stream: Box<dyn FirmwareStream>,
    path: &Path,
) -> Result<(u64, StreamingHasher), UpdateError> {
    let mut file = fs::File::create(path).await?;
    let mut hasher = StreamingHasher::new();

    while let Some(chunk) = stream.next_chunk().await? {
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok((hasher.bytes_hashed(), hasher))
}

async fn discard_archive(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {e}", path.display()),
    }
}
