//! Extraction engine tests over gzip-compressed archives

mod common;

use anyhow::Result;
use common::{Entry, firmware_archive};
use streamota::prelude::*;
use streamota::{DEFAULT_CHUNK_SIZE, GzipStage, TAR_BLOCK_SIZE};
use tempfile::TempDir;

fn extractor(root: &TempDir, excluded: &[&str], chunk_size: usize) -> Extractor {
    Extractor::new(
        root.path(),
        ExclusionSet::new(excluded),
        ExtractOptions {
            chunk_size,
            ..ExtractOptions::default()
        },
    )
}

#[test]
fn test_large_archive_through_small_buffer() -> Result<()> {
    let root = TempDir::new()?;
    // Pseudo-random so the archive stays large after compression
    let mut state = 0x2545_f491_u32;
    let payload: Vec<u8> = (0..2 * 1024 * 1024)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state.to_le_bytes()[0]
        })
        .collect();
    let archive = firmware_archive(&[
        Entry::File("blob/rootfs.img", &payload),
        Entry::File("tail.txt", b"end"),
    ])?;

    let report = extractor(&root, &[], DEFAULT_CHUNK_SIZE).extract_gzip(archive.as_slice())?;

    assert!(report.largest_chunk <= DEFAULT_CHUNK_SIZE);
    assert_eq!(report.bytes_written, payload.len() as u64 + 3);
    assert_eq!(report.compressed_bytes, archive.len() as u64);
    assert!(report.archive_bytes >= payload.len() as u64 + 3 * TAR_BLOCK_SIZE);
    assert!(std::fs::read(root.path().join("blob/rootfs.img"))? == payload);
    assert_eq!(std::fs::read(root.path().join("tail.txt"))?, b"end");
    Ok(())
}

#[test]
fn test_excluded_tree_is_untouched() -> Result<()> {
    let root = TempDir::new()?;
    std::fs::create_dir_all(root.path().join("user/photos"))?;
    std::fs::write(root.path().join("user/photos/cat.jpg"), b"meow")?;

    let archive = firmware_archive(&[
        Entry::Dir("user/"),
        Entry::Dir("user/photos/"),
        Entry::File("user/photos/cat.jpg", b"overwritten"),
        Entry::File("user/new.txt", b"should not appear"),
        Entry::File("boot.py", b"boot"),
    ])?;

    let report = extractor(&root, &["/user"], 64).extract_gzip(archive.as_slice())?;

    assert_eq!(report.files_written, 1);
    assert_eq!(report.excluded, 4);
    assert_eq!(std::fs::read(root.path().join("user/photos/cat.jpg"))?, b"meow");
    assert!(!root.path().join("user/new.txt").exists());
    assert_eq!(std::fs::read(root.path().join("boot.py"))?, b"boot");
    Ok(())
}

#[test]
fn test_not_gzip_is_decompress_error() -> Result<()> {
    let root = TempDir::new()?;
    let result = extractor(&root, &[], 512).extract_gzip(&b"PK\x03\x04 zip, not gzip"[..]);

    assert!(matches!(result, Err(UpdateError::Decompress { .. })));
    Ok(())
}

#[test]
fn test_truncated_download_fails_mid_extraction() -> Result<()> {
    let root = TempDir::new()?;
    let big: Vec<u8> = (0..200_000u32).map(|i| (i * 31 % 251) as u8).collect();
    let archive = firmware_archive(&[
        Entry::File("first.txt", b"written before the cut"),
        Entry::File("second.bin", &big),
    ])?;
    let cut = archive.get(..archive.len() * 3 / 4).unwrap_or_default();

    let result = extractor(&root, &[], 512).extract_gzip(cut);

    let err = match result {
        Ok(_) => anyhow::bail!("truncated archive extracted cleanly"),
        Err(e) => e,
    };
    assert!(!err.is_safe_failure(), "unexpected error: {err}");
    assert_eq!(
        std::fs::read(root.path().join("first.txt"))?,
        b"written before the cut"
    );
    Ok(())
}

#[test]
fn test_gzip_stage_streams_tar_bytes() -> Result<()> {
    let archive = firmware_archive(&[Entry::File("a.txt", b"abc")])?;
    let mut stage = GzipStage::with_chunk_size(archive.as_slice(), 100);

    let mut total = 0usize;
    while let Some(chunk) = stage.next_chunk()? {
        assert!(chunk.len() <= 100);
        total += chunk.len();
    }
    assert_eq!(total as u64 % TAR_BLOCK_SIZE, 0);
    Ok(())
}
