//! Small filesystem helpers shared by the durable-state subsystems

use std::fs;
use std::path::Path;

/// Writes a file atomically: temp file in the same directory, then rename.
/// Concurrent jobs touching the same cache or fingerprint file never observe
/// a partial write.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}
