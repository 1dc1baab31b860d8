//! Byte-counting reader adapter

use std::io::{self, Read};

/// Reader wrapper that counts how many bytes were consumed from a stream
///
/// The install pipeline stacks one cursor on the compressed archive file and
/// one on the decompressed tar stream, so failures and reports can name an
/// exact offset in either layer.
#[derive(Debug)]
pub struct StreamCursor<R> {
    inner: R,
    position: u64,
}

impl<R> StreamCursor<R> {
    /// Wrap a reader, starting at position 0
    pub fn new(inner: R) -> Self {
        Self { inner, position: 0 }
    }

    /// Bytes consumed from the wrapped reader so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Borrow the wrapped reader
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Unwrap the reader
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for StreamCursor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.position = self.position.saturating_add(n as u64);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_tracks_reads() -> io::Result<()> {
        let data = [7u8; 100];
        let mut cursor = StreamCursor::new(&data[..]);
        let mut buf = [0u8; 30];

        cursor.read_exact(&mut buf)?;
        assert_eq!(cursor.position(), 30);

        let mut rest = Vec::new();
        cursor.read_to_end(&mut rest)?;
        assert_eq!(cursor.position(), 100);
        assert_eq!(rest.len(), 70);
        Ok(())
    }
}
