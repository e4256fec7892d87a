//! In-memory active session: the change buffer and its shadow ledger.

use crate::blob_store::BlobStore;
use crate::catalog::CatalogStore;
use crate::digest::Digest;
use crate::error::{Result, SbError};
use crate::paths;
use crate::types::{detect_eol, ChangeOp, ChangeRecord, EolKind, Trigger};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Pre-session state of one path, captured at its first track.
///
/// The bytes themselves go straight into the blob store, so `digest` stays
/// resolvable at finalize even after the file has been rewritten or
/// deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreState {
    /// Digest of the pre-session content.
    pub digest: Digest,
    /// Byte length of the pre-session content.
    pub size: u64,
    /// mtime at capture, epoch milliseconds.
    pub mtime: Option<i64>,
    /// POSIX mode bits at capture.
    pub mode: Option<u32>,
    /// Line-ending flavor of the pre-session content.
    pub eol: Option<EolKind>,
}

/// The live, single-owner session buffer.
///
/// `track` appends a [`ChangeRecord`] with empty digest columns and
/// resets the idle clock; all hashing except the one-time shadow capture
/// is deferred to finalize. The buffer serializes to a catalog scratch row
/// so a crashed engine can resume mid-session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSession {
    /// Opaque session identifier.
    pub session_id: String,
    /// Workspace this session belongs to.
    pub workspace_key: String,
    /// Session start, epoch milliseconds.
    pub started_at: i64,
    /// Last `track` call, epoch milliseconds.
    pub last_activity: i64,
    /// Last scratch flush, epoch milliseconds.
    pub last_flush: i64,
    /// Boundary causes observed so far, in order, deduplicated.
    pub triggers: Vec<Trigger>,
    /// Buffered change records in arrival order.
    pub changes: Vec<ChangeRecord>,
    /// Per-path pre-session state; `None` means the path did not exist.
    pub shadows: HashMap<String, Option<PreState>>,
}

impl ActiveSession {
    /// Creates an empty session starting now.
    pub fn new(session_id: String, workspace_key: String, now: i64) -> Self {
        Self {
            session_id,
            workspace_key,
            started_at: now,
            last_activity: now,
            last_flush: now,
            triggers: Vec::new(),
            changes: Vec::new(),
            shadows: HashMap::new(),
        }
    }

    /// Number of buffered change records.
    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    /// Adds a trigger, preserving first-seen order.
    pub fn add_trigger(&mut self, trigger: Trigger) {
        if !self.triggers.contains(&trigger) {
            self.triggers.push(trigger);
        }
    }

    /// Appends a record and resets the idle clock.
    pub fn record(&mut self, change: ChangeRecord, now: i64) {
        self.changes.push(change);
        self.last_activity = now;
    }

    /// Captures the pre-session state for `rel` if this is its first track.
    ///
    /// What "pre-session state" means depends on the op of this first
    /// event:
    /// - `created`: the path did not exist before the session.
    /// - `modified`/`deleted`: the bytes currently on disk (for a delete
    ///   that already happened, nothing is recoverable and the before-side
    ///   stays empty).
    /// - `renamed`: the bytes now at the *new* location; they are the
    ///   pre-session content of the old path.
    pub fn ensure_shadow(
        &mut self,
        rel: &str,
        op: ChangeOp,
        workspace_root: &Path,
        blob_store: &BlobStore,
        catalog: &dyn CatalogStore,
    ) -> Result<()> {
        if self.shadows.contains_key(rel) {
            return Ok(());
        }

        let state = match op {
            ChangeOp::Created => None,
            ChangeOp::Modified | ChangeOp::Deleted | ChangeOp::Renamed => {
                capture_pre_state(workspace_root, rel, blob_store, catalog)?
            }
        };

        if state.is_none() && op != ChangeOp::Created {
            debug!(path = rel, %op, "no pre-session content recoverable");
        }
        self.shadows.insert(rel.to_string(), state);
        Ok(())
    }

    /// Looks up the shadow for a stored path.
    pub fn shadow(&self, rel: &str) -> Option<&PreState> {
        self.shadows.get(rel).and_then(|s| s.as_ref())
    }

    /// Serializes the buffer for the catalog scratch row.
    pub fn to_scratch_bytes(&self) -> Result<Vec<u8>> {
        postcard::to_allocvec(self).map_err(|e| SbError::Serialization(e.to_string()))
    }

    /// Restores a buffer from a catalog scratch row.
    pub fn from_scratch_bytes(bytes: &[u8]) -> Result<Self> {
        postcard::from_bytes(bytes).map_err(|e| SbError::Deserialization(e.to_string()))
    }
}

/// Reads the current content and metadata of `rel`, stores the bytes, and
/// returns the captured state. `None` when the file does not exist.
fn capture_pre_state(
    workspace_root: &Path,
    rel: &str,
    blob_store: &BlobStore,
    catalog: &dyn CatalogStore,
) -> Result<Option<PreState>> {
    let abs = paths::to_absolute(workspace_root, rel);
    let metadata = match fs::symlink_metadata(&abs) {
        Ok(m) if m.is_file() => m,
        Ok(_) => return Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(SbError::from_io(e)),
    };

    let bytes = fs::read(&abs).map_err(SbError::from_io)?;
    let digest = blob_store.put(catalog, &bytes)?;

    Ok(Some(PreState {
        digest,
        size: bytes.len() as u64,
        mtime: mtime_ms(&metadata),
        mode: mode_bits(&metadata),
        eol: detect_eol(&bytes),
    }))
}

/// mtime of a metadata record as epoch milliseconds.
pub(crate) fn mtime_ms(metadata: &fs::Metadata) -> Option<i64> {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
}

/// POSIX mode bits where the platform has them.
pub(crate) fn mode_bits(metadata: &fs::Metadata) -> Option<u32> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        Some(metadata.permissions().mode())
    }
    #[cfg(not(unix))]
    {
        let _ = metadata;
        None
    }
}
