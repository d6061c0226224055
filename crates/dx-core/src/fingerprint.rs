//! Stable file identity derived from path, size and modification time

use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Derive the 16-hex file identifier from path, size and mtime.
///
/// Moving or truncating a file produces a new identifier; two distinct
/// paths only collide if both size and mtime also match.
pub fn fingerprint(path: &str, size: u64, mtime_ms: i64) -> String {
    let digest = md5::compute(format!("{}:{}:{}", path, size, mtime_ms));
    let hex = format!("{:x}", digest);
    hex[..16].to_string()
}

/// Fingerprint a file on disk using its current metadata.
pub fn fingerprint_file(path: &Path) -> io::Result<String> {
    let meta = std::fs::metadata(path)?;
    let mtime_ms = meta
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    Ok(fingerprint(&path.to_string_lossy(), meta.len(), mtime_ms))
}
