//! Streaming archive extraction into the live filesystem
//!
//! The extractor walks the decompressed tar stream one entry at a time and
//! writes each payload straight to its destination through a single bounded
//! buffer, so neither the whole archive nor a whole file is ever held in
//! memory. The per-entry state machine is:
//!
//! ```text
//! ReadHeader ──end/zero block──▶ EndOfArchive
//!     │
//!     ▼
//! DispatchEntry ──excluded / unsupported──▶ SkipPayload ──▶ ReadHeader
//!     │
//!     ▼
//! WriteEntry ──▶ ReadHeader
//! ```
//!
//! Skipping leaves the payload unread; the tar layer advances past the entry
//! size rounded up to the 512-byte block when the next header is requested,
//! which keeps the stream aligned.
//!
//! Files are replaced in place before the rest of the archive is known to be
//! valid. A failure mid-stream leaves a mix of old and new files behind.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tar::{Archive, EntryType};
use tracing::{debug, info, warn};

use crate::config::WriteStrategy;
use crate::decompress::{DEFAULT_CHUNK_SIZE, GzipStage, find_decompress_fault};
use crate::error::UpdateError;
use crate::stream::StreamCursor;

/// Block granularity of the tar container format
pub const TAR_BLOCK_SIZE: u64 = 512;

const SHADOW_SUFFIX: &str = ".ota-new";

/// Normalise a path to `a/b/c` form relative to the update root
///
/// `.` components and trailing separators are dropped. Absolute paths and
/// `..` components are rejected so nothing can land outside the root.
pub(crate) fn relative_path(path: &Path) -> Result<String, String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(
                part.to_str()
                    .ok_or_else(|| format!("path {} is not valid UTF-8", path.display()))?,
            ),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(format!(
                    "path `{}` escapes the update root",
                    path.display()
                ));
            }
        }
    }
    Ok(parts.join("/"))
}

/// Set of archive paths that must not be written
///
/// A path is excluded when it equals a member or lies below a member
/// directory. Matching is plain string comparison on normalised paths; there
/// is no glob support.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    paths: BTreeSet<String>,
}

impl ExclusionSet {
    /// Build a set from policy entries
    ///
    /// Entries are normalised like archive paths, so `data/`, `./data` and
    /// `/data` all exclude the `data` tree. Entries that cannot name a path
    /// below the root are dropped with a warning.
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for raw in paths {
            let raw = raw.as_ref().trim();
            let stripped = raw.trim_start_matches('/');
            match relative_path(Path::new(stripped)) {
                Ok(path) if !path.is_empty() => {
                    set.insert(path);
                }
                Ok(_) => warn!("Ignoring exclusion `{raw}`: it names the whole root"),
                Err(e) => warn!("Ignoring exclusion `{raw}`: {e}"),
            }
        }
        Self { paths: set }
    }

    /// Whether a normalised archive path is excluded
    pub fn is_excluded(&self, path: &str) -> bool {
        if self.paths.contains(path) {
            return true;
        }
        path.match_indices('/')
            .any(|(idx, _)| path.get(..idx).is_some_and(|ancestor| self.paths.contains(ancestor)))
    }

    /// Number of excluded paths
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether nothing is excluded
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Iterate over the normalised excluded paths
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }
}

/// Kind of filesystem object an archive entry creates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// Regular file with a payload
    File,
    /// Directory, no payload
    Directory,
}

/// One archive entry, readable for exactly `size` payload bytes
pub struct ArchiveEntry<'a, R: 'a + Read> {
    /// Normalised path relative to the update root
    pub path: String,
    /// Object kind
    pub kind: EntryKind,
    /// Payload length in bytes
    pub size: u64,
    payload: tar::Entry<'a, R>,
}

impl<R: Read> Read for ArchiveEntry<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.payload.read(buf)
    }
}

/// Outcome of dispatching a header
enum Dispatch<'a, R: 'a + Read> {
    Write(ArchiveEntry<'a, R>),
    Skip { path: String, reason: SkipReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SkipReason {
    Excluded,
    Unsupported(EntryType),
    Root,
}

/// Tunables for one extraction run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Size of the payload copy buffer, in bytes
    pub chunk_size: usize,
    /// How files replace their existing counterparts
    pub write_strategy: WriteStrategy,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            write_strategy: WriteStrategy::InPlace,
        }
    }
}

/// Summary of a completed extraction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractReport {
    /// Files created or overwritten
    pub files_written: usize,
    /// Directories newly created
    pub directories_created: usize,
    /// Payload bytes written to files
    pub bytes_written: u64,
    /// Entries skipped because of the exclusion set
    pub excluded: usize,
    /// Entries skipped because their kind is not installed (links, devices)
    pub unsupported: usize,
    /// Largest single payload chunk copied, in bytes
    pub largest_chunk: usize,
    /// Bytes consumed from the decompressed tar stream
    pub archive_bytes: u64,
    /// Bytes consumed from the compressed stream (0 for plain tar input)
    pub compressed_bytes: u64,
}

/// Writes archive entries below a root directory
#[derive(Debug, Clone)]
pub struct Extractor {
    root: PathBuf,
    exclusions: ExclusionSet,
    options: ExtractOptions,
}

impl Extractor {
    /// Create an extractor rooted at `root`
    pub fn new(root: impl Into<PathBuf>, exclusions: ExclusionSet, options: ExtractOptions) -> Self {
        Self {
            root: root.into(),
            exclusions,
            options: ExtractOptions {
                chunk_size: options.chunk_size.max(1),
                ..options
            },
        }
    }

    /// Root directory entries are written below
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Decompress a gzip stream and extract the tar archive inside it
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Decompress`] for an invalid gzip stream,
    /// [`UpdateError::ArchiveFormat`] for an invalid tar stream or an entry
    /// path escaping the root, and [`UpdateError::Extraction`] for filesystem
    /// failures. Entries written before the failure stay written.
    pub fn extract_gzip<R: Read>(&self, compressed: R) -> Result<ExtractReport, UpdateError> {
        let stage = GzipStage::with_chunk_size(compressed, self.options.chunk_size);
        let (mut report, mut stage) = self.run(stage).map_err(UpdateError::during_extraction)?;

        // Tar stops at its end blocks; drain the rest so the gzip trailer is checked
        io::copy(&mut stage, &mut io::sink())
            .map_err(|e| read_error(e).during_extraction())?;
        report.compressed_bytes = stage.compressed_position();
        Ok(report)
    }

    /// Extract an uncompressed tar stream
    ///
    /// # Errors
    ///
    /// Same as [`Extractor::extract_gzip`], minus decompression failures.
    pub fn extract_tar<R: Read>(&self, reader: R) -> Result<ExtractReport, UpdateError> {
        self.run(reader)
            .map(|(report, _)| report)
            .map_err(UpdateError::during_extraction)
    }

    fn run<R: Read>(&self, reader: R) -> Result<(ExtractReport, R), UpdateError> {
        let mut archive = Archive::new(StreamCursor::new(reader));
        let mut report = ExtractReport::default();
        let mut buffer = vec![0u8; self.options.chunk_size];

        info!(root = %self.root.display(), "Extracting firmware archive");

        for raw in archive.entries().map_err(read_error)? {
            let raw = raw.map_err(read_error)?;

            match dispatch(raw, &self.exclusions)? {
                Dispatch::Skip { path, reason } => {
                    match reason {
                        SkipReason::Excluded => {
                            info!("Skipping excluded entry {path}");
                            report.excluded += 1;
                        }
                        SkipReason::Unsupported(kind) => {
                            warn!("Skipping unsupported {kind:?} entry {path}");
                            report.unsupported += 1;
                        }
                        SkipReason::Root => debug!("Skipping root directory entry"),
                    }
                }
                Dispatch::Write(entry) => self.write_entry(entry, &mut buffer, &mut report)?,
            }
        }

        let cursor = archive.into_inner();
        report.archive_bytes = cursor.position();

        info!(
            files = report.files_written,
            directories = report.directories_created,
            excluded = report.excluded,
            bytes = report.bytes_written,
            "Archive extracted"
        );
        Ok((report, cursor.into_inner()))
    }

    fn write_entry<R: Read>(
        &self,
        mut entry: ArchiveEntry<'_, R>,
        buffer: &mut [u8],
        report: &mut ExtractReport,
    ) -> Result<(), UpdateError> {
        let dest = self.root.join(&entry.path);

        match entry.kind {
            EntryKind::Directory => {
                if dest.is_dir() {
                    debug!("Directory {} already exists", entry.path);
                } else {
                    fs::create_dir_all(&dest)?;
                    debug!("Created directory {}", entry.path);
                    report.directories_created += 1;
                }
            }
            EntryKind::File => {
                if let Some(parent) = dest.parent() {
                    if !parent.is_dir() {
                        fs::create_dir_all(parent)?;
                    }
                }

                let target = match self.options.write_strategy {
                    WriteStrategy::InPlace => dest.clone(),
                    WriteStrategy::ShadowRename => shadow_path(&dest),
                };

                let written = {
                    let mut out = File::create(&target)?;
                    let written = copy_bounded(&mut entry, &mut out, buffer, report)?;
                    out.flush()?;
                    if self.options.write_strategy == WriteStrategy::ShadowRename {
                        out.sync_all()?;
                    }
                    written
                };

                if written != entry.size {
                    return Err(UpdateError::ArchiveFormat(format!(
                        "entry {} truncated: header declares {} bytes, stream held {written}",
                        entry.path, entry.size
                    )));
                }

                if target != dest {
                    fs::rename(&target, &dest)?;
                }

                info!("File {} ({written} B) written", entry.path);
                report.files_written += 1;
                report.bytes_written = report.bytes_written.saturating_add(written);
            }
        }
        Ok(())
    }
}

fn dispatch<'a, R: 'a + Read>(
    raw: tar::Entry<'a, R>,
    exclusions: &ExclusionSet,
) -> Result<Dispatch<'a, R>, UpdateError> {
    let path = {
        let header_path = raw.path().map_err(read_error)?;
        relative_path(&header_path).map_err(UpdateError::ArchiveFormat)?
    };

    if path.is_empty() {
        return Ok(Dispatch::Skip {
            path,
            reason: SkipReason::Root,
        });
    }

    if exclusions.is_excluded(&path) {
        return Ok(Dispatch::Skip {
            path,
            reason: SkipReason::Excluded,
        });
    }

    let entry_type = raw.header().entry_type();
    let kind = match entry_type {
        EntryType::Regular | EntryType::Continuous if is_legacy_directory(&raw) => {
            EntryKind::Directory
        }
        EntryType::Regular | EntryType::Continuous => EntryKind::File,
        EntryType::Directory => EntryKind::Directory,
        other => {
            return Ok(Dispatch::Skip {
                path,
                reason: SkipReason::Unsupported(other),
            });
        }
    };

    let size = raw.size();
    debug!(
        path = %path,
        ?kind,
        size,
        padded = size.div_ceil(TAR_BLOCK_SIZE) * TAR_BLOCK_SIZE,
        offset = raw.raw_file_position(),
        "Archive entry"
    );

    Ok(Dispatch::Write(ArchiveEntry {
        path,
        kind,
        size,
        payload: raw,
    }))
}

/// Pre-POSIX headers mark directories only by a trailing `/` in the name
fn is_legacy_directory<R: Read>(raw: &tar::Entry<'_, R>) -> bool {
    raw.header().as_ustar().is_none() && raw.path_bytes().ends_with(b"/")
}

fn copy_bounded<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    buffer: &mut [u8],
    report: &mut ExtractReport,
) -> Result<u64, UpdateError> {
    let mut total = 0u64;
    loop {
        let n = match reader.read(buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(read_error(e)),
        };
        let Some(chunk) = buffer.get(..n) else {
            break;
        };
        writer.write_all(chunk)?;
        report.largest_chunk = report.largest_chunk.max(n);
        total = total.saturating_add(n as u64);
    }
    Ok(total)
}

fn shadow_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(SHADOW_SUFFIX);
    dest.with_file_name(name)
}

/// Classify an error raised while pulling bytes out of the archive stream
fn read_error(err: io::Error) -> UpdateError {
    if let Some(fault) = find_decompress_fault(&err) {
        return fault.into();
    }
    match err.kind() {
        io::ErrorKind::InvalidData
        | io::ErrorKind::InvalidInput
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::Other => UpdateError::ArchiveFormat(err.to_string()),
        _ => UpdateError::Io(err),
    }
}
