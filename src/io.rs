//! Input file reading.
//!
//! Operator portal exports arrive as UTF-16 (usually little endian with a
//! BOM) or UTF-8, separated by tabs or commas. Large files are memory mapped
//! before decoding.
use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use encoding_rs::{Encoding, UTF_8, UTF_16BE, UTF_16LE};
use memmap2::Mmap;

/// Threshold in bytes above which we attempt to use mmap for reading.
/// Callers can override via API; this is a reasonable default.
pub const DEFAULT_MMAP_THRESHOLD_BYTES: u64 = 16 * 1024 * 1024; // 16 MiB

/// Decide whether to use mmap based on file size and threshold.
pub fn should_use_mmap(file_size_bytes: u64, threshold_bytes: u64) -> bool {
    file_size_bytes >= threshold_bytes
}

/// Decode raw file bytes to text. Honours UTF-8 and UTF-16 byte order
/// marks; BOM-less UTF-16 is recognised by its NUL bytes. Invalid sequences,
/// including a dangling odd byte in UTF-16, become U+FFFD.
pub fn decode_text(bytes: &[u8]) -> String {
    let encoding = match Encoding::for_bom(bytes) {
        Some((encoding, _)) => encoding,
        None => match memchr::memchr(0, bytes) {
            // ASCII text in UTF-16LE puts the NUL in the high (odd) byte
            Some(pos) if pos % 2 == 1 => UTF_16LE,
            Some(_) => UTF_16BE,
            None => UTF_8,
        },
    };
    let (text, _) = encoding.decode_with_bom_removal(bytes);
    text.into_owned()
}

/// Pick the field delimiter from the header line: tab if it has one,
/// otherwise comma.
pub fn sniff_delimiter(text: &str) -> u8 {
    let bytes = text.as_bytes();
    let header = match memchr::memchr(b'\n', bytes) {
        Some(end) => &bytes[..end],
        None => bytes,
    };
    if memchr::memchr(b'\t', header).is_some() {
        b'\t'
    } else {
        b','
    }
}

/// Read and decode a whole file through a memory map.
pub fn read_text_mmap<P: AsRef<Path>>(path: P) -> Result<String> {
    let file = File::open(&path).with_context(|| format!("open {}", path.as_ref().display()))?;
    let mmap =
        unsafe { Mmap::map(&file) }.with_context(|| format!("mmap {}", path.as_ref().display()))?;
    Ok(decode_text(&mmap))
}

/// Read and decode a whole file with a plain read.
pub fn read_text_buffered<P: AsRef<Path>>(path: P) -> Result<String> {
    let bytes =
        std::fs::read(&path).with_context(|| format!("read {}", path.as_ref().display()))?;
    Ok(decode_text(&bytes))
}

/// Choose mmap or a plain read by file size and return the decoded text.
pub fn read_text_auto<P: AsRef<Path>>(path: P, threshold_bytes: u64) -> Result<String> {
    let meta =
        std::fs::metadata(&path).with_context(|| format!("stat {}", path.as_ref().display()))?;
    if meta.is_file() && should_use_mmap(meta.len(), threshold_bytes) {
        read_text_mmap(path)
    } else {
        read_text_buffered(path)
    }
}
