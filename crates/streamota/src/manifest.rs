//! Remote update manifest
//!
//! The server publishes a single-line record next to the firmware archives:
//!
//! ```text
//! version;filename[;required_free_kb[;sha256_hex]]
//! ```
//!
//! Fields are positional, so a hash can only appear after a numeric free
//! space field.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::UpdateError;

/// Field separator of the manifest record
pub const MANIFEST_DELIMITER: char = ';';

/// Length in bytes of the declared archive digest (SHA-256)
pub const DIGEST_LEN: usize = 32;

const MAX_FIELDS: usize = 4;

/// Descriptor of the latest firmware published by the update server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareManifest {
    /// Version string of the published firmware
    pub version: String,

    /// Archive file name, relative to the update base URL
    pub archive_filename: String,

    /// Free space the install needs, in kB (0 when undeclared)
    pub required_free_kb: u64,

    /// SHA-256 of the compressed archive, if declared
    pub expected_hash: Option<[u8; DIGEST_LEN]>,
}

fn malformed(reason: impl Into<String>) -> UpdateError {
    UpdateError::ManifestParse(reason.into())
}

impl FirmwareManifest {
    /// Parse a manifest record
    ///
    /// Surrounding whitespace and trailing delimiters are tolerated.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::ManifestParse`] if the record has fewer than two
    /// or more than four fields, an empty version or file name, a non-numeric
    /// free space field, or a hash that is not 64 hex characters.
    pub fn parse(line: &str) -> Result<Self, UpdateError> {
        let record = line.trim().trim_end_matches(MANIFEST_DELIMITER);

        let fields: Vec<&str> = record.split(MANIFEST_DELIMITER).map(str::trim).collect();

        let (version, archive_filename, optional) = match fields.as_slice() {
            [version, filename, optional @ ..] if optional.len() <= MAX_FIELDS - 2 => {
                (*version, *filename, optional)
            }
            [_, _, ..] => {
                return Err(malformed(format!(
                    "expected at most {MAX_FIELDS} fields, got {}",
                    fields.len()
                )));
            }
            _ => return Err(malformed("expected at least `version;filename`")),
        };

        if version.is_empty() {
            return Err(malformed("version field is empty"));
        }
        if archive_filename.is_empty() {
            return Err(malformed("archive filename field is empty"));
        }

        let required_free_kb = match optional.first() {
            Some(field) => field.parse::<u64>().map_err(|e| {
                malformed(format!("free space field `{field}` is not a number: {e}"))
            })?,
            None => 0,
        };

        let expected_hash = optional.get(1).map(|field| parse_digest(field)).transpose()?;

        Ok(Self {
            version: version.to_string(),
            archive_filename: archive_filename.to_string(),
            required_free_kb,
            expected_hash,
        })
    }

    /// Declared hash rendered as lowercase hex
    pub fn expected_hash_hex(&self) -> Option<String> {
        self.expected_hash.map(hex::encode)
    }
}

fn parse_digest(field: &str) -> Result<[u8; DIGEST_LEN], UpdateError> {
    let mut digest = [0u8; DIGEST_LEN];
    hex::decode_to_slice(field, &mut digest).map_err(|e| {
        malformed(format!(
            "hash field must be {} hex characters: {e}",
            DIGEST_LEN * 2
        ))
    })?;
    Ok(digest)
}

impl FromStr for FirmwareManifest {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FirmwareManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{}", self.version, self.archive_filename)?;
        if self.required_free_kb > 0 || self.expected_hash.is_some() {
            write!(f, ";{}", self.required_free_kb)?;
        }
        if let Some(hash) = &self.expected_hash {
            write!(f, ";{}", hex::encode(hash))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "916f0027a575074ce72a331777c3478d6513f786a591bd892da1a577bf2335f9";

    #[test]
    fn test_parse_minimal_record() -> Result<(), UpdateError> {
        let m = FirmwareManifest::parse("2.0.1;firmware.tar.gz")?;
        assert_eq!(m.version, "2.0.1");
        assert_eq!(m.archive_filename, "firmware.tar.gz");
        assert_eq!(m.required_free_kb, 0);
        assert!(m.expected_hash.is_none());
        Ok(())
    }

    #[test]
    fn test_parse_with_free_space() -> Result<(), UpdateError> {
        let m = FirmwareManifest::parse("2.0.1;firmware.tar.gz;2")?;
        assert_eq!(m.required_free_kb, 2);
        assert!(m.expected_hash.is_none());
        Ok(())
    }

    #[test]
    fn test_parse_with_hash() -> Result<(), UpdateError> {
        let m = FirmwareManifest::parse(&format!("2.0.1;firmware.tar.gz;0;{HASH}\n"))?;
        assert_eq!(m.required_free_kb, 0);
        assert_eq!(m.expected_hash_hex().as_deref(), Some(HASH));
        Ok(())
    }

    #[test]
    fn test_parse_tolerates_trailing_delimiter() -> Result<(), UpdateError> {
        let m = FirmwareManifest::parse("1.0;fw.tar.gz;")?;
        assert_eq!(m.archive_filename, "fw.tar.gz");

        let m = FirmwareManifest::parse("1.0;fw.tar.gz;64;\r\n")?;
        assert_eq!(m.required_free_kb, 64);

        let m = FirmwareManifest::parse("2.0.1;fw.tar.gz;;")?;
        assert_eq!(m.archive_filename, "fw.tar.gz");
        assert_eq!(m.required_free_kb, 0);
        Ok(())
    }

    #[test]
    fn test_missing_filename_rejected() {
        assert!(matches!(
            FirmwareManifest::parse("2.0.1"),
            Err(UpdateError::ManifestParse(_))
        ));
        assert!(matches!(
            FirmwareManifest::parse("2.0.1;"),
            Err(UpdateError::ManifestParse(_))
        ));
        assert!(matches!(
            FirmwareManifest::parse(";fw.tar.gz"),
            Err(UpdateError::ManifestParse(_))
        ));
    }

    #[test]
    fn test_non_numeric_free_space_rejected() {
        assert!(matches!(
            FirmwareManifest::parse("2.0.1;fw.tar.gz;lots"),
            Err(UpdateError::ManifestParse(_))
        ));
    }

    #[test]
    fn test_hash_without_free_space_rejected() {
        assert!(matches!(
            FirmwareManifest::parse(&format!("2.0.1;fw.tar.gz;{HASH}")),
            Err(UpdateError::ManifestParse(_))
        ));
    }

    #[test]
    fn test_wrong_hash_length_rejected() {
        assert!(matches!(
            FirmwareManifest::parse("2.0.1;fw.tar.gz;0;abcd"),
            Err(UpdateError::ManifestParse(_))
        ));
    }

    #[test]
    fn test_too_many_fields_rejected() {
        assert!(matches!(
            FirmwareManifest::parse(&format!("2.0.1;fw.tar.gz;0;{HASH};extra")),
            Err(UpdateError::ManifestParse(_))
        ));
    }

    #[test]
    fn test_display_is_wire_format() -> Result<(), UpdateError> {
        let record = format!("1.2.0;fw.tar.gz;0;{HASH}");
        let m = FirmwareManifest::parse(&record)?;
        assert_eq!(m.to_string(), record);

        let m = FirmwareManifest::parse("1.2.0;fw.tar.gz")?;
        assert_eq!(m.to_string(), "1.2.0;fw.tar.gz");
        Ok(())
    }
}
