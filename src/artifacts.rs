// =============================================================================
// Artifact IO — atomic writes shared by every report writer
// =============================================================================
//
// Readers poll the reports directory while operations run, so artifacts are
// written to a temporary sibling and renamed into place. Rename is atomic on
// the same filesystem; a reader never observes a partial file.
// =============================================================================

use std::path::Path;

use crate::errors::{PulseError, PulseResult};

/// Write `bytes` to `path` atomically (tmp + rename), creating the parent
/// directory when missing.
pub fn atomic_write(path: impl AsRef<Path>, bytes: &[u8]) -> PulseResult<()> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            PulseError::Storage(format!("failed to create {}: {e}", parent.display()))
        })?;
    }

    let tmp_path = path.with_extension("tmp");

    std::fs::write(&tmp_path, bytes).map_err(|e| {
        PulseError::Storage(format!("failed to write {}: {e}", tmp_path.display()))
    })?;

    std::fs::rename(&tmp_path, path).map_err(|e| {
        PulseError::Storage(format!(
            "failed to rename {} to {}: {e}",
            tmp_path.display(),
            path.display()
        ))
    })?;

    Ok(())
}
