//! Firmware version parsing and ordering
//!
//! Installed and remote firmware versions are dotted-numeric strings such as
//! `2.0.10`. Comparing them as plain strings misorders releases
//! (`"2.0.9" > "2.0.10"`), so versions are split into numeric components and
//! compared segment by segment, with missing trailing segments counting as 0.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::warn;

/// Error type for firmware version parsing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// Version string is empty
    #[error("empty version string")]
    Empty,

    /// Version component is not a valid number
    #[error("invalid version component '{0}': {1}")]
    InvalidComponent(String, String),
}

/// A firmware version with numeric component ordering
///
/// `1.2` and `1.2.0` compare equal; `2.0.9` sorts before `2.0.10`.
#[derive(Debug, Clone)]
pub struct FirmwareVersion {
    original: String,
    components: Vec<u32>,
}

impl FirmwareVersion {
    /// Parse a dotted-numeric version string
    ///
    /// Surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is empty or any component is not a
    /// valid `u32`.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let trimmed = s.trim();

        if trimmed.is_empty() {
            return Err(VersionError::Empty);
        }

        let components = trimmed
            .split('.')
            .map(|part| {
                if part.is_empty() {
                    return Err(VersionError::InvalidComponent(
                        part.to_string(),
                        "empty component".to_string(),
                    ));
                }
                part.parse::<u32>()
                    .map_err(|e| VersionError::InvalidComponent(part.to_string(), e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            original: trimmed.to_string(),
            components,
        })
    }

    /// Get the version string as it was parsed (trimmed)
    pub fn as_str(&self) -> &str {
        &self.original
    }

    /// Get the numeric components
    pub fn components(&self) -> &[u32] {
        &self.components
    }
}

/// Decide whether `remote` is a newer release than `local`
///
/// Both sides are compared as [`FirmwareVersion`]s. When either side is not
/// dotted-numeric the comparison falls back to plain string ordering.
pub fn is_newer(remote: &str, local: &str) -> bool {
    match (FirmwareVersion::parse(remote), FirmwareVersion::parse(local)) {
        (Ok(remote), Ok(local)) => remote > local,
        (remote_result, local_result) => {
            warn!(
                remote,
                local,
                remote_valid = remote_result.is_ok(),
                local_valid = local_result.is_ok(),
                "version is not dotted-numeric, falling back to string comparison"
            );
            remote.trim() > local.trim()
        }
    }
}

impl Ord for FirmwareVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let max_len = self.components.len().max(other.components.len());

        for i in 0..max_len {
            let a = self.components.get(i).copied().unwrap_or(0);
            let b = other.components.get(i).copied().unwrap_or(0);

            match a.cmp(&b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }

        Ordering::Equal
    }
}

impl PartialOrd for FirmwareVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for FirmwareVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FirmwareVersion {}

impl FromStr for FirmwareVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}
