//! File fingerprinting: full-content BLAKE3 for small files, three fixed samples for large ones.

use anyhow::{Context, Result};
use blake3::Hasher;
use memmap2::Mmap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::utils::config::HashingConsts;

/// Offsets of the head, middle and tail samples of a file of `size` bytes.
pub fn sample_offsets(size: u64) -> [u64; 3] {
    let window = HashingConsts::SAMPLE_SIZE;
    [0, size / 2, size.saturating_sub(window)]
}

/// Fingerprint of a file whose size was just observed as `size`.
///
/// - `size == 0`: [`HashingConsts::EMPTY_SENTINEL`]
/// - `size <= LARGE_FILE_THRESHOLD`: hex BLAKE3 of the whole content
/// - larger: hex BLAKE3 over the head, middle (`size / 2`) and tail windows of `SAMPLE_SIZE` bytes
///
/// Changes confined to unsampled regions of large files do not change the fingerprint.
pub fn fingerprint_file(path: &Path, size: u64) -> Result<String> {
    if size == 0 {
        return Ok(HashingConsts::EMPTY_SENTINEL.to_string());
    }
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let digest = if size <= HashingConsts::LARGE_FILE_THRESHOLD {
        hash_full(file, size)?
    } else {
        hash_samples(&file, size)?
    };
    Ok(digest.to_hex().to_string())
}

/// Uses memory-mapped I/O at or above the mmap threshold, chunked reading otherwise.
fn hash_full(file: File, size: u64) -> Result<blake3::Hash> {
    let mut hasher = Hasher::new();
    if size >= HashingConsts::HASH_MMAP_THRESHOLD {
        let mmap = unsafe { Mmap::map(&file)? };
        hasher.update(&mmap);
    } else {
        let mut reader =
            std::io::BufReader::with_capacity(HashingConsts::HASH_READ_CHUNK_SIZE, file);
        let mut buffer = vec![0u8; HashingConsts::HASH_READ_CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
    }
    Ok(hasher.finalize())
}

fn hash_samples(file: &File, size: u64) -> Result<blake3::Hash> {
    let mut hasher = Hasher::new();
    let mut window = vec![0u8; HashingConsts::SAMPLE_SIZE as usize];
    for offset in sample_offsets(size) {
        // Fails with UnexpectedEof when the file shrank after stat.
        read_window_at(file, offset, &mut window)
            .with_context(|| format!("read sample at offset {offset}"))?;
        hasher.update(&window);
    }
    Ok(hasher.finalize())
}

#[cfg(unix)]
fn read_window_at(file: &File, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(not(unix))]
fn read_window_at(file: &File, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
    use std::io::{Seek, SeekFrom};
    let mut f = file;
    f.seek(SeekFrom::Start(offset))?;
    f.read_exact(buf)
}
