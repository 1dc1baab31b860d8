//! Gzip decompression stage
//!
//! Decodes the downloaded archive lazily: the tar layer pulls decoded bytes
//! through [`GzipStage`]'s `Read` impl, and callers that only need the raw
//! decoded stream can use [`GzipStage::next_chunk`]. Memory is bounded by the
//! input buffer, the output chunk buffer and the inflate window (32 KiB),
//! independent of the archive size.

use std::error::Error as StdError;
use std::io::{self, BufRead, BufReader, Read};

use flate2::bufread::GzDecoder;
use thiserror::Error;

use crate::error::UpdateError;
use crate::stream::StreamCursor;

/// Default size of the bounded I/O buffers, in bytes
pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// Gzip failure carried through `io::Error` so it survives the tar layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason} (compressed offset {offset})")]
pub(crate) struct DecompressFault {
    pub(crate) offset: u64,
    pub(crate) reason: String,
}

impl From<DecompressFault> for UpdateError {
    fn from(fault: DecompressFault) -> Self {
        UpdateError::Decompress {
            offset: fault.offset,
            reason: fault.reason,
        }
    }
}

/// Find a [`DecompressFault`] anywhere in an I/O error chain
///
/// `io::Error::source` skips the wrapped error itself, so the walk goes
/// through `get_ref` for every `io::Error` layer.
pub(crate) fn find_decompress_fault(err: &io::Error) -> Option<DecompressFault> {
    let mut current: &(dyn StdError + 'static) = err.get_ref()?;
    loop {
        if let Some(fault) = current.downcast_ref::<DecompressFault>() {
            return Some(fault.clone());
        }
        if let Some(inner) = current
            .downcast_ref::<io::Error>()
            .and_then(|io_err| io_err.get_ref())
        {
            current = inner;
            continue;
        }
        current = current.source()?;
    }
}

/// Pull-based gzip decoder over a compressed byte source
pub struct GzipStage<R: Read> {
    decoder: GzDecoder<BufReader<StreamCursor<R>>>,
    chunk: Box<[u8]>,
    finished: bool,
}

impl<R: Read> GzipStage<R> {
    /// Create a stage with [`DEFAULT_CHUNK_SIZE`] buffers
    pub fn new(reader: R) -> Self {
        Self::with_chunk_size(reader, DEFAULT_CHUNK_SIZE)
    }

    /// Create a stage whose input and output buffers hold `chunk_size` bytes
    pub fn with_chunk_size(reader: R, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let input = BufReader::with_capacity(chunk_size, StreamCursor::new(reader));
        Self {
            decoder: GzDecoder::new(input),
            chunk: vec![0u8; chunk_size].into_boxed_slice(),
            finished: false,
        }
    }

    /// Compressed bytes actually decoded so far (read-ahead excluded)
    pub fn compressed_position(&self) -> u64 {
        let input = self.decoder.get_ref();
        input
            .get_ref()
            .position()
            .saturating_sub(input.buffer().len() as u64)
    }

    /// Decode the next chunk of the stream
    ///
    /// Returns `Ok(None)` once the gzip member and its trailer have been
    /// fully consumed.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Decompress`] for a bad header, corrupt deflate
    /// data, a checksum mismatch or a truncated stream, and
    /// [`UpdateError::Io`] when the underlying source fails.
    pub fn next_chunk(&mut self) -> Result<Option<&[u8]>, UpdateError> {
        if self.finished {
            return Ok(None);
        }

        let n = loop {
            match self.decoder.read(&mut self.chunk) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let err = self.tag(e);
                    return Err(match find_decompress_fault(&err) {
                        Some(fault) => fault.into(),
                        None => UpdateError::Io(err),
                    });
                }
            }
        };

        if n == 0 {
            self.finished = true;
            return Ok(None);
        }
        Ok(self.chunk.get(..n))
    }

    fn tag(&self, err: io::Error) -> io::Error {
        match err.kind() {
            io::ErrorKind::InvalidInput
            | io::ErrorKind::InvalidData
            | io::ErrorKind::UnexpectedEof => {
                let fault = DecompressFault {
                    offset: self.compressed_position(),
                    reason: err.to_string(),
                };
                io::Error::new(err.kind(), fault)
            }
            _ => err,
        }
    }
}

impl<R: Read> Read for GzipStage<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.decoder.read(buf).map_err(|e| self.tag(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn gzip(data: &[u8]) -> io::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        encoder.finish()
    }

    #[test]
    fn test_next_chunk_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
        let original: Vec<u8> = (0..20_000u32).map(|i| (i % 97) as u8).collect();
        let compressed = gzip(&original)?;

        let mut stage = GzipStage::with_chunk_size(compressed.as_slice(), 64);
        let mut decoded = Vec::new();
        while let Some(chunk) = stage.next_chunk()? {
            assert!(chunk.len() <= 64);
            decoded.extend_from_slice(chunk);
        }

        assert_eq!(decoded, original);
        assert_eq!(stage.compressed_position(), compressed.len() as u64);
        assert!(stage.next_chunk()?.is_none());
        Ok(())
    }

    #[test]
    fn test_bad_header_is_decompress_error() {
        let mut stage = GzipStage::new(&b"this is not gzip data at all"[..]);
        assert!(matches!(
            stage.next_chunk(),
            Err(UpdateError::Decompress { .. })
        ));
    }

    #[test]
    fn test_checksum_mismatch_is_decompress_error() -> io::Result<()> {
        let mut compressed = gzip(b"firmware payload")?;
        let crc_offset = compressed.len() - 8;
        if let Some(byte) = compressed.get_mut(crc_offset) {
            *byte ^= 0xff;
        }

        let mut stage = GzipStage::new(compressed.as_slice());
        let mut outcome = Ok(());
        loop {
            match stage.next_chunk() {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }
        assert!(matches!(outcome, Err(UpdateError::Decompress { .. })));
        Ok(())
    }

    #[test]
    fn test_read_errors_keep_fault_tag() -> io::Result<()> {
        let compressed = gzip(b"some data that will be cut short")?;
        let truncated = compressed.get(..compressed.len() / 2).unwrap_or_default();

        let mut stage = GzipStage::new(truncated);
        let mut sink = Vec::new();
        let err = match stage.read_to_end(&mut sink) {
            Ok(_) => return Err(io::Error::other("truncated stream decoded cleanly")),
            Err(e) => e,
        };
        assert!(find_decompress_fault(&err).is_some());
        Ok(())
    }
}
