//! Rollback engine: session inversion with a crash-safe per-file swap.
//!
//! A rollback is a short-lived function of the manifest, the blob store,
//! and the workspace root. It stages all restored content outside the
//! workspace, validates it, then swaps files into place one at a time,
//! renaming every displaced live file to `<path>.bak-<sessionId>` and
//! journaling each backup before the next mutation. A crash at any point
//! leaves a pending journal the recovery sweeper can act on.

use crate::blob_store::BlobStore;
use crate::catalog::{CatalogStore, JournalRow};
use crate::digest::Digest;
use crate::error::{Result, SbError};
use crate::journal;
use crate::paths;
use crate::types::{
    BackupPair, ChangeOp, ChangeRecord, JournalEntry, JournalStatus, SessionManifest,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Progress callback: (current, total, phase) with phases
/// `stage`, `verify`, `swap`, `commit`.
pub type RollbackProgressCallback = dyn Fn(usize, usize, &str);

/// Options controlling a rollback run.
#[derive(Debug, Clone, Default)]
pub struct RollbackOptions {
    /// Plan and validate only; report affected paths without touching the
    /// workspace.
    pub dry_run: bool,
    /// Skip re-hashing staged content before the swap phase.
    pub skip_verification: bool,
}

/// Everything a rollback needs from its caller.
pub struct RollbackEnv<'a> {
    /// Blob store holding the pre-session content.
    pub blob_store: &'a BlobStore,
    /// Catalog for journal status mirroring.
    pub catalog: &'a dyn CatalogStore,
    /// Absolute workspace root.
    pub workspace_root: &'a Path,
    /// Journal area (`.sb_journal`).
    pub journal_dir: &'a Path,
    /// Parent directory for per-session staging, outside the workspace.
    pub staging_root: &'a Path,
    /// Current time, epoch milliseconds.
    pub now_ms: i64,
}

/// One file the swap phase could not revert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    /// Workspace-relative path.
    pub path: String,
    /// Why it was skipped.
    pub reason: String,
}

/// Per-file accounting of a rollback attempt.
#[derive(Debug, Default)]
pub struct RollbackOutcome {
    /// Whether the rollback ran to completion (possibly with skips).
    pub success: bool,
    /// Paths restored to their pre-session state, in swap order.
    pub files_reverted: Vec<String>,
    /// Paths that could not be reverted, with reasons.
    pub files_skipped: Vec<SkippedFile>,
    /// Non-fatal errors encountered along the way.
    pub errors: Vec<String>,
    /// Final location of the journal, when one survives the run.
    pub journal_path: Option<PathBuf>,
}

/// Computes the inverse change sequence for a session.
///
/// The result is in reversed order, so an earlier `renamed` in the
/// original timeline is undone after the later events that targeted its
/// new name.
pub fn invert_changes(changes: &[ChangeRecord]) -> Vec<ChangeRecord> {
    changes.iter().rev().map(invert_one).collect()
}

fn invert_one(change: &ChangeRecord) -> ChangeRecord {
    let mut inv = ChangeRecord::new(change.path.clone(), change.op);
    match change.op {
        ChangeOp::Created => {
            inv.op = ChangeOp::Deleted;
            inv.digest_before = change.digest_after;
            inv.size_before = change.size_after;
            inv.mtime_before = change.mtime_after;
            inv.mode_before = change.mode_after;
            inv.eol_before = change.eol_after;
        }
        ChangeOp::Deleted => {
            inv.op = ChangeOp::Created;
            inv.digest_after = change.digest_before;
            inv.size_after = change.size_before;
            inv.mtime_after = change.mtime_before;
            inv.mode_after = change.mode_before;
            inv.eol_after = change.eol_before;
        }
        ChangeOp::Modified => {
            inv.digest_before = change.digest_after;
            inv.digest_after = change.digest_before;
            inv.size_before = change.size_after;
            inv.size_after = change.size_before;
            inv.mtime_before = change.mtime_after;
            inv.mtime_after = change.mtime_before;
            inv.mode_before = change.mode_after;
            inv.mode_after = change.mode_before;
            inv.eol_before = change.eol_after;
            inv.eol_after = change.eol_before;
        }
        ChangeOp::Renamed => {
            if let Some(from) = &change.from_path {
                inv.path = from.clone();
                inv.from_path = Some(change.path.clone());
            }
            inv.digest_before = change.digest_after;
            inv.digest_after = change.digest_before;
            inv.size_before = change.size_after;
            inv.size_after = change.size_before;
            inv.mtime_before = change.mtime_after;
            inv.mtime_after = change.mtime_before;
            inv.mode_before = change.mode_after;
            inv.mode_after = change.mode_before;
            inv.eol_before = change.eol_after;
            inv.eol_after = change.eol_before;
        }
    }
    inv
}

/// What the swap phase does for one path.
#[derive(Debug, Clone)]
enum Action {
    /// Move staged content into the workspace at `rel`.
    Swap { rel: String, digest: Digest },
    /// Rename the live file at `rel` aside (realizes a deletion).
    Remove { rel: String },
}

impl Action {
    fn rel(&self) -> &str {
        match self {
            Action::Swap { rel, .. } | Action::Remove { rel } => rel,
        }
    }
}

/// Reverts a session, returning per-file accounting.
///
/// # Errors
///
/// Integrity failures (missing or mismatching blobs) abort before any
/// workspace mutation and surface as `Err`; per-file I/O failures during
/// the swap phase are recorded in `files_skipped` and do not fail the
/// call.
pub fn rollback(
    manifest: &SessionManifest,
    env: &RollbackEnv<'_>,
    options: &RollbackOptions,
    progress: Option<&RollbackProgressCallback>,
) -> Result<RollbackOutcome> {
    let session_id = manifest.session_id.as_str();
    journal::ensure_dirs(env.journal_dir)?;

    for change in &manifest.changes {
        paths::validate_stored(&change.path)?;
        if let Some(from) = &change.from_path {
            paths::validate_stored(from)?;
        }
        if change.op == ChangeOp::Renamed && change.from_path.is_none() {
            return Err(SbError::InvalidInput(format!(
                "renamed change for {} has no fromPath",
                change.path
            )));
        }
    }

    let inverse = invert_changes(&manifest.changes);
    let mut outcome = RollbackOutcome::default();
    let (actions, planned_skips) = plan_actions(&inverse);
    outcome.files_skipped = planned_skips;

    let pending_path = journal::journal_file(&journal::pending_dir(env.journal_dir), session_id);
    let mut entry = JournalEntry {
        session_id: session_id.to_string(),
        created_at: env.now_ms,
        workspace_root: env.workspace_root.to_path_buf(),
        changes: inverse,
        backups: Vec::new(),
        status: JournalStatus::Pending,
    };
    journal::write_entry(&pending_path, &entry)?;
    env.catalog.upsert_journal(
        session_id,
        &JournalRow {
            created_at: env.now_ms,
            status: JournalStatus::Pending,
        },
    )?;

    let staging = env.staging_root.join(session_id);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    // Staging phase: materialize every blob the swap will need. Any
    // integrity problem aborts here, before the workspace is touched.
    let total = actions.len();
    for (idx, action) in actions.iter().enumerate() {
        if let Some(cb) = progress {
            cb(idx + 1, total, "stage");
        }
        let (rel, digest, change) = match action {
            Action::Swap { rel, digest } => {
                let change = entry.changes.iter().rev().find(|c| c.path == *rel);
                (rel, digest, change)
            }
            Action::Remove { .. } => continue,
        };

        let bytes = match env.blob_store.get(digest) {
            Ok(bytes) => bytes,
            Err(e) => {
                return abort(env, &pending_path, &staging, entry, e);
            }
        };

        let staged = paths::to_absolute(&staging, rel);
        if let Some(parent) = staged.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&staged, &bytes).map_err(SbError::from_io)?;
        if let Some(change) = change {
            restore_metadata(&staged, change.mtime_after, change.mode_after);
        }
    }

    // Validation phase: re-hash staged files against the expected digests.
    if !options.skip_verification {
        for (idx, action) in actions.iter().enumerate() {
            if let Some(cb) = progress {
                cb(idx + 1, total, "verify");
            }
            let (rel, digest) = match action {
                Action::Swap { rel, digest } => (rel, digest),
                Action::Remove { .. } => continue,
            };
            let staged = paths::to_absolute(&staging, rel);
            let bytes = fs::read(&staged)?;
            let actual = Digest::of(&bytes);
            if actual != *digest {
                return abort(
                    env,
                    &pending_path,
                    &staging,
                    entry,
                    SbError::HashMismatch {
                        expected: digest.as_hex(),
                        actual: actual.as_hex(),
                    },
                );
            }
        }
    }

    if options.dry_run {
        outcome.success = true;
        outcome.files_reverted = actions.iter().map(|a| a.rel().to_string()).collect();
        fs::remove_dir_all(&staging)?;
        fs::remove_file(&pending_path)?;
        env.catalog.remove_journal(session_id)?;
        return Ok(outcome);
    }

    // Swap phase: one file at a time, journaling every displaced original
    // before the next mutation.
    for (idx, action) in actions.iter().enumerate() {
        if let Some(cb) = progress {
            cb(idx + 1, total, "swap");
        }
        let rel = action.rel();
        let dest = paths::to_absolute(env.workspace_root, rel);
        let dest_exists = fs::symlink_metadata(&dest).is_ok();

        let mut backed_up = None;
        if dest_exists {
            let backup = backup_path(&dest, session_id);
            if let Err(e) = rename_or_copy(&dest, &backup) {
                warn!(path = rel, error = %e, "failed to move live file aside");
                outcome.files_skipped.push(SkippedFile {
                    path: rel.to_string(),
                    reason: format!("backup rename failed: {}", e),
                });
                continue;
            }
            entry.backups.push(BackupPair {
                original: dest.clone(),
                backup: backup.clone(),
            });
            if let Err(e) = journal::write_entry(&pending_path, &entry) {
                outcome
                    .errors
                    .push(format!("journal rewrite failed: {}", e));
            }
            backed_up = Some(backup);
        }

        match action {
            Action::Remove { .. } => {
                // The rename aside *is* the deletion; the backup is
                // unlinked at commit.
                outcome.files_reverted.push(rel.to_string());
            }
            Action::Swap { .. } => {
                let staged = paths::to_absolute(&staging, rel);
                if let Some(parent) = dest.parent() {
                    if let Err(e) = fs::create_dir_all(parent) {
                        outcome.files_skipped.push(SkippedFile {
                            path: rel.to_string(),
                            reason: format!("cannot create parent: {}", e),
                        });
                        restore_backup(&mut entry, &pending_path, backed_up, &dest, &mut outcome);
                        continue;
                    }
                }
                match rename_or_copy(&staged, &dest) {
                    Ok(()) => outcome.files_reverted.push(rel.to_string()),
                    Err(e) => {
                        warn!(path = rel, error = %e, "swap failed");
                        outcome.files_skipped.push(SkippedFile {
                            path: rel.to_string(),
                            reason: e.to_string(),
                        });
                        restore_backup(&mut entry, &pending_path, backed_up, &dest, &mut outcome);
                    }
                }
            }
        }
    }

    // Commit phase: journal first, then backups, then staging. No window
    // exists where the journal is committed while its backups are gone.
    if let Some(cb) = progress {
        cb(total, total, "commit");
    }
    entry.status = JournalStatus::Committed;
    if let Err(e) = journal::write_entry(&pending_path, &entry) {
        outcome.errors.push(format!("journal rewrite failed: {}", e));
    }
    let committed_path =
        journal::journal_file(&journal::committed_dir(env.journal_dir), session_id);
    if let Err(e) = rename_or_copy(&pending_path, &committed_path) {
        // The journal stays pending; the sweeper will restore the backups
        // and the workspace returns to its pre-rollback state.
        outcome
            .errors
            .push(format!("failed to commit journal: {}", e));
        outcome.success = false;
        outcome.journal_path = Some(pending_path);
        return Ok(outcome);
    }
    env.catalog.upsert_journal(
        session_id,
        &JournalRow {
            created_at: entry.created_at,
            status: JournalStatus::Committed,
        },
    )?;

    for pair in &entry.backups {
        if let Err(e) = fs::remove_file(&pair.backup) {
            if e.kind() != std::io::ErrorKind::NotFound {
                outcome.errors.push(format!(
                    "failed to unlink backup {}: {}",
                    pair.backup.display(),
                    e
                ));
            }
        }
    }
    if let Err(e) = fs::remove_dir_all(&staging) {
        outcome
            .errors
            .push(format!("failed to clean staging: {}", e));
    }

    outcome.success = true;
    outcome.journal_path = Some(committed_path);
    info!(
        session_id,
        reverted = outcome.files_reverted.len(),
        skipped = outcome.files_skipped.len(),
        "rollback complete"
    );
    Ok(outcome)
}

/// Converts the inverse list into swap-phase actions, deduplicating by
/// path (the later inverse operation is the one that lands on disk) and
/// pre-recording skips for changes with no restorable content.
fn plan_actions(inverse: &[ChangeRecord]) -> (Vec<Action>, Vec<SkippedFile>) {
    let mut raw: Vec<Action> = Vec::new();
    let mut skips = Vec::new();

    for change in inverse {
        match change.op {
            ChangeOp::Deleted => raw.push(Action::Remove {
                rel: change.path.clone(),
            }),
            ChangeOp::Created | ChangeOp::Modified => match change.digest_after {
                Some(digest) => raw.push(Action::Swap {
                    rel: change.path.clone(),
                    digest,
                }),
                None => skips.push(SkippedFile {
                    path: change.path.clone(),
                    reason: "no content digest recorded".into(),
                }),
            },
            ChangeOp::Renamed => {
                match change.digest_after {
                    Some(digest) => raw.push(Action::Swap {
                        rel: change.path.clone(),
                        digest,
                    }),
                    None => skips.push(SkippedFile {
                        path: change.path.clone(),
                        reason: "no content digest recorded".into(),
                    }),
                }
                if let Some(from) = &change.from_path {
                    raw.push(Action::Remove { rel: from.clone() });
                }
            }
        }
    }

    // Keep only the last action per path, preserving relative order of the
    // survivors.
    let mut last: HashMap<&str, usize> = HashMap::new();
    for (idx, action) in raw.iter().enumerate() {
        last.insert(action.rel(), idx);
    }
    let actions = raw
        .iter()
        .enumerate()
        .filter(|(idx, action)| last.get(action.rel()) == Some(idx))
        .map(|(_, action)| action.clone())
        .collect();

    (actions, skips)
}

/// Abort before any workspace mutation: mark the journal rolled-back,
/// drop staging, and propagate the error.
fn abort(
    env: &RollbackEnv<'_>,
    pending_path: &Path,
    staging: &Path,
    mut entry: JournalEntry,
    error: SbError,
) -> Result<RollbackOutcome> {
    entry.status = JournalStatus::RolledBack;
    if let Err(e) = journal::write_entry(pending_path, &entry) {
        warn!(error = %e, "failed to mark journal rolled-back");
    }
    let _ = env.catalog.upsert_journal(
        &entry.session_id,
        &JournalRow {
            created_at: entry.created_at,
            status: JournalStatus::RolledBack,
        },
    );
    let _ = fs::remove_dir_all(staging);
    Err(error)
}

/// Undo a failed swap for one file by renaming its backup into place.
fn restore_backup(
    entry: &mut JournalEntry,
    pending_path: &Path,
    backed_up: Option<PathBuf>,
    dest: &Path,
    outcome: &mut RollbackOutcome,
) {
    let backup = match backed_up {
        Some(b) => b,
        None => return,
    };
    match rename_or_copy(&backup, dest) {
        Ok(()) => {
            entry.backups.retain(|p| p.backup != backup);
            if let Err(e) = journal::write_entry(pending_path, entry) {
                outcome
                    .errors
                    .push(format!("journal rewrite failed: {}", e));
            }
        }
        Err(e) => outcome.errors.push(format!(
            "failed to restore {} from backup: {}",
            dest.display(),
            e
        )),
    }
}

/// Backup naming: `<path>.bak-<sessionId>` beside the original.
pub(crate) fn backup_path(original: &Path, session_id: &str) -> PathBuf {
    let mut name = original
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".bak-{}", session_id));
    original.with_file_name(name)
}

/// Rename with copy+unlink fallback for cross-device moves.
pub(crate) fn rename_or_copy(src: &Path, dst: &Path) -> std::io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            debug!(src = %src.display(), dst = %dst.display(), "EXDEV, falling back to copy");
            fs::copy(src, dst)?;
            fs::remove_file(src)
        }
        Err(e) => Err(e),
    }
}

fn is_cross_device(e: &std::io::Error) -> bool {
    #[cfg(unix)]
    {
        e.raw_os_error() == Some(18) // EXDEV
    }
    #[cfg(windows)]
    {
        e.raw_os_error() == Some(17) // ERROR_NOT_SAME_DEVICE
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = e;
        false
    }
}

/// Applies recorded mtime and mode to a staged or recovered file.
pub(crate) fn restore_metadata(path: &Path, mtime_ms: Option<i64>, mode: Option<u32>) {
    if let Some(ms) = mtime_ms {
        let ft = filetime::FileTime::from_unix_time(
            ms.div_euclid(1000),
            (ms.rem_euclid(1000) * 1_000_000) as u32,
        );
        if let Err(e) = filetime::set_file_mtime(path, ft) {
            debug!(path = %path.display(), error = %e, "could not restore mtime");
        }
    }
    #[cfg(unix)]
    if let Some(mode) = mode {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
            debug!(path = %path.display(), error = %e, "could not restore mode");
        }
    }
    #[cfg(not(unix))]
    let _ = mode;
}
