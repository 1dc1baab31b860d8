//! Incremental SHA-256 over a byte stream

use sha2::{Digest, Sha256};

use crate::manifest::DIGEST_LEN;

/// Running SHA-256 digest fed chunk by chunk as bytes arrive
///
/// Chunk boundaries do not affect the result: feeding `ab` then `c` yields
/// the same digest as feeding `abc` at once.
#[derive(Clone, Default)]
pub struct StreamingHasher {
    inner: Sha256,
    bytes_hashed: u64,
}

impl StreamingHasher {
    /// Create a hasher with empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk of the stream
    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
        self.bytes_hashed = self.bytes_hashed.saturating_add(chunk.len() as u64);
    }

    /// Total number of bytes fed so far
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes_hashed
    }

    /// Consume the hasher and return the digest
    pub fn finalize(self) -> [u8; DIGEST_LEN] {
        self.inner.finalize().into()
    }

    /// Consume the hasher and compare the digest against an expected one
    pub fn matches(self, expected: &[u8; DIGEST_LEN]) -> bool {
        &self.finalize() == expected
    }
}

impl std::fmt::Debug for StreamingHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingHasher")
            .field("bytes_hashed", &self.bytes_hashed)
            .finish_non_exhaustive()
    }
}

/// SHA-256 of an in-memory buffer
pub fn sha256(data: &[u8]) -> [u8; DIGEST_LEN] {
    Sha256::digest(data).into()
}

/// SHA-256 of an in-memory buffer rendered as lowercase hex
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            sha256_hex(b"test data"),
            "916f0027a575074ce72a331777c3478d6513f786a591bd892da1a577bf2335f9"
        );
    }

    #[test]
    fn test_chunked_matches_one_shot() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

        let mut hasher = StreamingHasher::new();
        for chunk in data.chunks(7) {
            hasher.update(chunk);
        }
        assert_eq!(hasher.bytes_hashed(), data.len() as u64);
        assert_eq!(hasher.finalize(), sha256(&data));
    }

    #[test]
    fn test_empty_chunks_are_neutral() {
        let mut hasher = StreamingHasher::new();
        hasher.update(b"");
        hasher.update(b"test ");
        hasher.update(b"");
        hasher.update(b"data");
        assert_eq!(hex::encode(hasher.finalize()), sha256_hex(b"test data"));
    }

    #[test]
    fn test_matches() {
        let mut hasher = StreamingHasher::new();
        hasher.update(b"firmware");
        let other = hasher.clone();

        assert!(hasher.matches(&sha256(b"firmware")));
        assert!(!other.matches(&sha256(b"firmwarf")));
    }
}
