// crucible-governance/src/snapshot.rs
// ============================================================================
// Module: Release Snapshots
// Description: Pre-release catalog snapshots for rollback.
// Purpose: Capture the catalog and current pointer before any publish swap.
// Dependencies: flate2, tar
// ============================================================================

//! ## Overview
//! Before a publish touches the filesystem, the catalog and the `current`
//! pointer target are packed into `snapshots/snap_<release_id>.tar.gz`.
//! Rollback extracts the archive to restore the pre-release world. The
//! snapshot directory is append-only by creation and never modified in
//! place.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::path::Path;
use std::path::PathBuf;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Archive entry name for the catalog document.
const CATALOG_ENTRY: &str = "catalog.json";

/// Archive entry name for the previous current-pointer target.
const CURRENT_ENTRY: &str = "CURRENT";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Snapshot failures.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Filesystem or archive I/O failed.
    #[error("snapshot i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// SECTION: Capture
// ============================================================================

/// Packs the catalog and current pointer into a release snapshot.
///
/// Missing pieces (no catalog yet, no current release) are simply omitted;
/// restoring such a snapshot restores the empty world.
///
/// # Errors
///
/// Returns [`SnapshotError`] on I/O failure.
pub fn capture(
    snapshots_dir: &Path,
    release_id: &str,
    catalog_path: &Path,
    current_target: Option<&str>,
) -> Result<PathBuf, SnapshotError> {
    std::fs::create_dir_all(snapshots_dir)?;
    let archive_path = snapshots_dir.join(format!("snap_{release_id}.tar.gz"));
    let file = File::create(&archive_path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    if catalog_path.exists() {
        builder.append_path_with_name(catalog_path, CATALOG_ENTRY)?;
    }
    if let Some(target) = current_target {
        let bytes = target.as_bytes();
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, CURRENT_ENTRY, bytes)?;
    }
    builder.into_inner()?.finish()?;
    Ok(archive_path)
}

// ============================================================================
// SECTION: Restore
// ============================================================================

/// Restored snapshot contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredSnapshot {
    /// True when a catalog document was restored.
    pub catalog_restored: bool,
    /// Previous current-pointer target, when one existed.
    pub current_target: Option<String>,
}

/// Extracts a snapshot, rewriting the catalog in place.
///
/// # Errors
///
/// Returns [`SnapshotError`] on I/O failure.
pub fn restore(
    archive_path: &Path,
    catalog_path: &Path,
) -> Result<RestoredSnapshot, SnapshotError> {
    let file = File::open(archive_path)?;
    let decoder = GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);

    let mut restored = RestoredSnapshot {
        catalog_restored: false,
        current_target: None,
    };
    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.display().to_string();
        match name.as_str() {
            CATALOG_ENTRY => {
                entry.unpack(catalog_path)?;
                restored.catalog_restored = true;
            }
            CURRENT_ENTRY => {
                let mut target = String::new();
                std::io::Read::read_to_string(&mut entry, &mut target)?;
                restored.current_target = Some(target);
            }
            _ => {}
        }
    }
    Ok(restored)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]

    use super::*;

    #[test]
    fn capture_and_restore_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let catalog = dir.path().join("catalog.json");
        std::fs::write(&catalog, r#"{"releases": []}"#).expect("write");

        let archive = capture(
            &dir.path().join("snapshots"),
            "rel_test",
            &catalog,
            Some("releases/rel_prev"),
        )
        .expect("capture");
        assert!(archive.ends_with("snap_rel_test.tar.gz"));

        std::fs::write(&catalog, r#"{"releases": ["clobbered"]}"#).expect("write");
        let restored = restore(&archive, &catalog).expect("restore");
        assert!(restored.catalog_restored);
        assert_eq!(restored.current_target.as_deref(), Some("releases/rel_prev"));
        let text = std::fs::read_to_string(&catalog).expect("read");
        assert_eq!(text, r#"{"releases": []}"#);
    }

    #[test]
    fn empty_world_snapshot_restores_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let catalog = dir.path().join("catalog.json");
        let archive = capture(&dir.path().join("snapshots"), "rel_first", &catalog, None)
            .expect("capture");
        let restored = restore(&archive, &catalog).expect("restore");
        assert!(!restored.catalog_restored);
        assert!(restored.current_target.is_none());
        assert!(!catalog.exists());
    }
}
