//! Startup recovery sweeper.
//!
//! Runs once when the engine opens: brings the workspace back to a
//! consistent state with respect to any pending rollback journals, prunes
//! committed journals past retention, and optionally removes orphaned
//! `*.bak-<sessionId>` files left behind by interrupted runs.
//!
//! A pending journal carries the full inverse change list, so the sweeper
//! first tries to *complete* the interrupted rollback by re-applying those
//! changes idempotently (every touched file ends at its pre-session
//! content). Only when completion is impossible (a blob is missing, or a
//! change has no recorded content) does it fall back to renaming the
//! `.bak-<sessionId>` backups into place, which returns the touched files
//! to their pre-rollback content instead. Either way no file is left torn.

use crate::blob_store::BlobStore;
use crate::catalog::CatalogStore;
use crate::digest::Digest;
use crate::error::{Result, SbError};
use crate::journal;
use crate::paths;
use crate::rollback::{rename_or_copy, restore_metadata};
use crate::types::{ChangeOp, JournalEntry};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Options for a sweep pass.
#[derive(Debug, Clone)]
pub struct SweepOptions {
    /// Age at which committed journals are pruned.
    pub retention_ms: u64,
    /// Whether to walk the workspace for orphan backup files.
    pub sweep_orphan_backups: bool,
    /// Session id of the live session, if any; its backups are never
    /// treated as orphans.
    pub live_session: Option<String>,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            retention_ms: 604_800_000,
            sweep_orphan_backups: true,
            live_session: None,
        }
    }
}

/// Report from one sweep pass.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Pending journals completed by re-applying their inverse changes.
    pub journals_replayed: usize,
    /// Pending journals resolved by restoring backups instead.
    pub journals_unwound: usize,
    /// Pending journals deleted because nothing remained to do.
    pub journals_discarded: usize,
    /// Backup files restored to their original paths.
    pub backups_restored: usize,
    /// Committed journals pruned past retention.
    pub committed_pruned: usize,
    /// Orphan backup files removed from the workspace.
    pub orphans_removed: usize,
    /// Non-fatal errors; the sweeper logs and moves on rather than retry.
    pub errors: Vec<String>,
}

impl SweepReport {
    /// Whether the sweep changed anything.
    pub fn did_work(&self) -> bool {
        self.journals_replayed > 0
            || self.journals_unwound > 0
            || self.journals_discarded > 0
            || self.backups_restored > 0
            || self.committed_pruned > 0
            || self.orphans_removed > 0
    }
}

/// Runs one sweep pass over the journal area and workspace.
pub fn sweep(
    journal_dir: &Path,
    workspace_root: &Path,
    blob_store: &BlobStore,
    catalog: &dyn CatalogStore,
    options: &SweepOptions,
    now_ms: i64,
) -> Result<SweepReport> {
    let mut report = SweepReport::default();
    journal::ensure_dirs(journal_dir)?;

    sweep_pending(journal_dir, blob_store, &mut report)?;
    prune_committed(journal_dir, catalog, options.retention_ms, now_ms, &mut report)?;
    reconcile_catalog(journal_dir, catalog, &mut report)?;

    if options.sweep_orphan_backups {
        sweep_orphans(journal_dir, workspace_root, options.live_session.as_deref(), &mut report);
    }

    if report.did_work() {
        info!(
            replayed = report.journals_replayed,
            unwound = report.journals_unwound,
            discarded = report.journals_discarded,
            backups = report.backups_restored,
            pruned = report.committed_pruned,
            orphans = report.orphans_removed,
            "recovery sweep finished"
        );
    }
    Ok(report)
}

fn journal_files(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            out.push(path);
        }
    }
    Ok(out)
}

fn sweep_pending(
    journal_dir: &Path,
    blob_store: &BlobStore,
    report: &mut SweepReport,
) -> Result<()> {
    for path in journal_files(&journal::pending_dir(journal_dir))? {
        let entry = match journal::read_entry(&path) {
            Ok(entry) => entry,
            Err(SbError::JournalCorrupted { reason, .. }) => {
                // Set the file aside so the next sweep doesn't trip on it
                // again; replaying garbage is worse than leaving it.
                let aside = path.with_extension("json.corrupt");
                warn!(path = %path.display(), reason = %reason, "unreadable journal, setting aside");
                if let Err(e) = fs::rename(&path, &aside) {
                    report
                        .errors
                        .push(format!("failed to set aside {}: {}", path.display(), e));
                }
                continue;
            }
            Err(e) => return Err(e),
        };

        let has_live_backup = entry.backups.iter().any(|pair| pair.backup.exists());
        if !has_live_backup {
            // Either the rollback never renamed anything aside, or it got
            // all the way through its unlink loop. The journal is spent.
            remove_file_logged(&path, report);
            report.journals_discarded += 1;
            continue;
        }

        match replay_entry(&entry, blob_store) {
            Ok(()) => {
                for pair in &entry.backups {
                    if pair.backup.exists() {
                        if let Err(e) = fs::remove_file(&pair.backup) {
                            report.errors.push(format!(
                                "failed to unlink backup {}: {}",
                                pair.backup.display(),
                                e
                            ));
                        }
                    }
                }
                remove_file_logged(&path, report);
                report.journals_replayed += 1;
                info!(session_id = %entry.session_id, "completed interrupted rollback");
            }
            Err(e) => {
                warn!(
                    session_id = %entry.session_id,
                    error = %e,
                    "cannot complete rollback, restoring backups"
                );
                unwind_entry(&entry, &path, report);
            }
        }
    }
    Ok(())
}

/// Re-applies a journal's inverse change list. Idempotent: files already
/// at their target content are left alone.
fn replay_entry(entry: &JournalEntry, blob_store: &BlobStore) -> Result<()> {
    for change in &entry.changes {
        paths::validate_stored(&change.path)?;
        if let Some(from) = &change.from_path {
            paths::validate_stored(from)?;
        }
    }

    for change in &entry.changes {
        let target = paths::to_absolute(&entry.workspace_root, &change.path);
        match change.op {
            ChangeOp::Deleted => {
                remove_if_exists(&target)?;
            }
            ChangeOp::Created | ChangeOp::Modified | ChangeOp::Renamed => {
                let digest = change.digest_after.ok_or_else(|| {
                    SbError::InvalidInput(format!("no content recorded for {}", change.path))
                })?;
                apply_content(&target, &digest, change.mtime_after, change.mode_after, blob_store)?;
                if change.op == ChangeOp::Renamed {
                    if let Some(from) = &change.from_path {
                        remove_if_exists(&paths::to_absolute(&entry.workspace_root, from))?;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Materializes blob content at `target` unless it already matches.
fn apply_content(
    target: &Path,
    digest: &Digest,
    mtime: Option<i64>,
    mode: Option<u32>,
    blob_store: &BlobStore,
) -> Result<()> {
    if let Ok(existing) = fs::read(target) {
        if Digest::of(&existing) == *digest {
            debug!(path = %target.display(), "already at target content");
            return Ok(());
        }
    }

    let bytes = blob_store.get(digest)?;
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = target.with_extension("sb_recover.tmp");
    fs::write(&tmp, &bytes).map_err(SbError::from_io)?;
    restore_metadata(&tmp, mtime, mode);
    fs::rename(&tmp, target).map_err(SbError::from_io)?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SbError::from_io(e)),
    }
}

/// Fallback per-file unwind: rename every surviving backup onto its
/// original, returning those files to their pre-rollback content.
fn unwind_entry(entry: &JournalEntry, journal_path: &Path, report: &mut SweepReport) {
    let mut failed = false;
    for pair in &entry.backups {
        if !pair.backup.exists() {
            continue;
        }
        if let Some(parent) = pair.original.parent() {
            let _ = fs::create_dir_all(parent);
        }
        match rename_or_copy(&pair.backup, &pair.original) {
            Ok(()) => report.backups_restored += 1,
            Err(e) => {
                failed = true;
                report.errors.push(format!(
                    "failed to restore {} from {}: {}",
                    pair.original.display(),
                    pair.backup.display(),
                    e
                ));
            }
        }
    }

    if failed {
        // Partial success stays partial; a backup still on disk keeps its
        // journal alive.
        warn!(session_id = %entry.session_id, "pending journal only partially unwound");
    } else {
        remove_file_logged(journal_path, report);
        report.journals_unwound += 1;
    }
}

fn prune_committed(
    journal_dir: &Path,
    catalog: &dyn CatalogStore,
    retention_ms: u64,
    now_ms: i64,
    report: &mut SweepReport,
) -> Result<()> {
    let cutoff = now_ms - retention_ms as i64;
    for path in journal_files(&journal::committed_dir(journal_dir))? {
        let created_at = match journal::read_entry(&path) {
            Ok(entry) => entry.created_at,
            Err(_) => fs::metadata(&path)
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or(i64::MIN),
        };

        if created_at < cutoff {
            let session_id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            remove_file_logged(&path, report);
            if let Err(e) = catalog.remove_journal(&session_id) {
                report
                    .errors
                    .push(format!("failed to drop journal row {}: {}", session_id, e));
            }
            report.committed_pruned += 1;
        }
    }
    Ok(())
}

/// Drops catalog journal rows whose files are gone from both areas.
fn reconcile_catalog(
    journal_dir: &Path,
    catalog: &dyn CatalogStore,
    report: &mut SweepReport,
) -> Result<()> {
    let on_disk: HashSet<String> = known_session_ids(journal_dir)?;
    for (session_id, _) in catalog.journals()? {
        if !on_disk.contains(&session_id) {
            if let Err(e) = catalog.remove_journal(&session_id) {
                report
                    .errors
                    .push(format!("failed to drop journal row {}: {}", session_id, e));
            }
        }
    }
    Ok(())
}

fn known_session_ids(journal_dir: &Path) -> Result<HashSet<String>> {
    let mut ids = HashSet::new();
    for dir in [
        journal::pending_dir(journal_dir),
        journal::committed_dir(journal_dir),
    ] {
        for path in journal_files(&dir)? {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.insert(stem.to_string());
            }
        }
    }
    Ok(ids)
}

/// Removes `*.bak-<sessionId>` files whose session has no journal in
/// either area and is not the live session.
fn sweep_orphans(
    journal_dir: &Path,
    workspace_root: &Path,
    live_session: Option<&str>,
    report: &mut SweepReport,
) {
    let known = match known_session_ids(journal_dir) {
        Ok(ids) => ids,
        Err(e) => {
            report.errors.push(format!("orphan scan skipped: {}", e));
            return;
        }
    };

    for entry in walkdir::WalkDir::new(workspace_root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        let session_id = match name.rsplit_once(".bak-") {
            Some((_, sid)) if !sid.is_empty() => sid.to_string(),
            _ => continue,
        };
        if known.contains(&session_id) || live_session == Some(session_id.as_str()) {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => {
                report.orphans_removed += 1;
                info!(path = %entry.path().display(), "removed orphan backup");
            }
            Err(e) => report.errors.push(format!(
                "failed to remove orphan {}: {}",
                entry.path().display(),
                e
            )),
        }
    }
}

fn remove_file_logged(path: &Path, report: &mut SweepReport) {
    if let Err(e) = fs::remove_file(path) {
        report
            .errors
            .push(format!("failed to delete journal {}: {}", path.display(), e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{JournalRow, MemoryCatalog};
    use crate::types::{BackupPair, ChangeRecord, JournalEntry, JournalStatus};
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        ws: PathBuf,
        journal_dir: PathBuf,
        store: BlobStore,
        cat: MemoryCatalog,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let ws = tmp.path().join("ws");
            let journal_dir = tmp.path().join("data/.sb_journal");
            fs::create_dir_all(&ws).unwrap();
            journal::ensure_dirs(&journal_dir).unwrap();
            let store = BlobStore::new(tmp.path().join("data/blobs"));
            Self { _tmp: tmp, ws, journal_dir, store, cat: MemoryCatalog::new() }
        }

        fn write_pending(&self, sid: &str, changes: Vec<ChangeRecord>, backups: Vec<BackupPair>) {
            let entry = JournalEntry {
                session_id: sid.into(),
                created_at: 0,
                workspace_root: self.ws.clone(),
                changes,
                backups,
                status: JournalStatus::Pending,
            };
            let path = journal::journal_file(&journal::pending_dir(&self.journal_dir), sid);
            journal::write_entry(&path, &entry).unwrap();
            self.cat
                .upsert_journal(sid, &JournalRow { created_at: 0, status: JournalStatus::Pending })
                .unwrap();
        }

        fn sweep(&self, options: &SweepOptions, now_ms: i64) -> SweepReport {
            sweep(&self.journal_dir, &self.ws, &self.store, &self.cat, options, now_ms).unwrap()
        }
    }

    fn modified_change(path: &str, target: Digest) -> ChangeRecord {
        let mut change = ChangeRecord::new(path.into(), crate::types::ChangeOp::Modified);
        change.digest_after = Some(target);
        change
    }

    #[test]
    fn test_pending_without_backups_is_discarded() {
        let fx = Fixture::new();
        fx.write_pending("s1", vec![], vec![]);

        let report = fx.sweep(&SweepOptions::default(), 1_000);
        assert_eq!(report.journals_discarded, 1);
        assert!(!journal::journal_file(&journal::pending_dir(&fx.journal_dir), "s1").exists());
        assert!(fx.cat.journals().unwrap().is_empty());
    }

    #[test]
    fn test_pending_replay_completes_the_rollback() {
        let fx = Fixture::new();
        // Interrupted mid-swap: a.txt already swapped to its pre-session
        // content (backup holds the displaced version), b.txt not yet.
        let pre_a = fx.store.put(&fx.cat, b"a pre").unwrap();
        let pre_b = fx.store.put(&fx.cat, b"b pre").unwrap();
        fs::write(fx.ws.join("a.txt"), b"a pre").unwrap();
        fs::write(fx.ws.join("a.txt.bak-s1"), b"a post").unwrap();
        fs::write(fx.ws.join("b.txt"), b"b post").unwrap();

        fx.write_pending(
            "s1",
            vec![modified_change("a.txt", pre_a), modified_change("b.txt", pre_b)],
            vec![BackupPair {
                original: fx.ws.join("a.txt"),
                backup: fx.ws.join("a.txt.bak-s1"),
            }],
        );

        let report = fx.sweep(&SweepOptions::default(), 1_000);
        assert_eq!(report.journals_replayed, 1);
        assert_eq!(fs::read(fx.ws.join("a.txt")).unwrap(), b"a pre");
        assert_eq!(fs::read(fx.ws.join("b.txt")).unwrap(), b"b pre");
        assert!(!fx.ws.join("a.txt.bak-s1").exists());
        assert!(!journal::journal_file(&journal::pending_dir(&fx.journal_dir), "s1").exists());
    }

    #[test]
    fn test_pending_unwinds_when_content_is_gone() {
        let fx = Fixture::new();
        // The blob for b.txt was never stored, so completion is
        // impossible; the sweeper falls back to the backups.
        let original = fx.ws.join("a.txt");
        let backup = fx.ws.join("a.txt.bak-s1");
        fs::write(&original, b"half-swapped").unwrap();
        fs::write(&backup, b"pre-rollback").unwrap();

        fx.write_pending(
            "s1",
            vec![modified_change("b.txt", Digest::of(b"never stored"))],
            vec![BackupPair { original: original.clone(), backup: backup.clone() }],
        );

        let report = fx.sweep(&SweepOptions::default(), 1_000);
        assert_eq!(report.journals_unwound, 1);
        assert_eq!(report.backups_restored, 1);
        assert_eq!(fs::read(&original).unwrap(), b"pre-rollback");
        assert!(!backup.exists());
        assert!(!journal::journal_file(&journal::pending_dir(&fx.journal_dir), "s1").exists());
    }

    #[test]
    fn test_replay_handles_deletes_and_renames() {
        let fx = Fixture::new();
        let content = fx.store.put(&fx.cat, b"old content").unwrap();

        // Inverse list: delete created.txt, rename new.txt back to old.txt.
        fs::write(fx.ws.join("created.txt"), b"fresh").unwrap();
        fs::write(fx.ws.join("new.txt"), b"old content").unwrap();
        fs::write(fx.ws.join("created.txt.bak-s1"), b"dangling").unwrap();

        let delete = ChangeRecord::new("created.txt".into(), crate::types::ChangeOp::Deleted);
        let mut rename = ChangeRecord::new("old.txt".into(), crate::types::ChangeOp::Renamed);
        rename.from_path = Some("new.txt".into());
        rename.digest_after = Some(content);

        fx.write_pending(
            "s1",
            vec![delete, rename],
            vec![BackupPair {
                original: fx.ws.join("created.txt"),
                backup: fx.ws.join("created.txt.bak-s1"),
            }],
        );

        let report = fx.sweep(&SweepOptions::default(), 1_000);
        assert_eq!(report.journals_replayed, 1);
        assert!(!fx.ws.join("created.txt").exists());
        assert!(!fx.ws.join("new.txt").exists());
        assert_eq!(fs::read(fx.ws.join("old.txt")).unwrap(), b"old content");
    }

    #[test]
    fn test_committed_pruned_after_retention() {
        let fx = Fixture::new();
        let entry = JournalEntry {
            session_id: "old".into(),
            created_at: 100,
            workspace_root: fx.ws.clone(),
            changes: vec![],
            backups: vec![],
            status: JournalStatus::Committed,
        };
        let path = journal::journal_file(&journal::committed_dir(&fx.journal_dir), "old");
        journal::write_entry(&path, &entry).unwrap();

        let options = SweepOptions { retention_ms: 1_000, ..Default::default() };
        // Young enough: kept.
        let report = fx.sweep(&options, 500);
        assert_eq!(report.committed_pruned, 0);
        assert!(path.exists());

        // Past retention: pruned.
        let report = fx.sweep(&options, 2_000);
        assert_eq!(report.committed_pruned, 1);
        assert!(!path.exists());
    }

    #[test]
    fn test_orphan_backups_removed_unless_correlated() {
        let fx = Fixture::new();
        fs::create_dir_all(fx.ws.join("src")).unwrap();
        let orphan = fx.ws.join("src/f.rs.bak-dead");
        let journaled = fx.ws.join("src/g.rs.bak-s1");
        let live = fx.ws.join("src/h.rs.bak-active");
        fs::write(&orphan, b"x").unwrap();
        fs::write(&journaled, b"x").unwrap();
        fs::write(&live, b"x").unwrap();

        // s1 has a pending journal that unwinds via its backup.
        fx.write_pending(
            "s1",
            vec![modified_change("src/g.rs", Digest::of(b"not stored"))],
            vec![BackupPair { original: fx.ws.join("src/g.rs"), backup: journaled.clone() }],
        );

        let options = SweepOptions { live_session: Some("active".into()), ..Default::default() };
        let report = fx.sweep(&options, 1_000);

        assert_eq!(report.orphans_removed, 1);
        assert!(!orphan.exists());
        assert!(live.exists());
        // g.rs was restored by the unwind, so its backup is gone too.
        assert!(fx.ws.join("src/g.rs").exists());
    }

    #[test]
    fn test_corrupted_journal_set_aside() {
        let fx = Fixture::new();
        let path = journal::journal_file(&journal::pending_dir(&fx.journal_dir), "bad");
        fs::write(&path, b"{ nope").unwrap();

        let report = fx.sweep(&SweepOptions::default(), 1_000);
        assert!(!path.exists());
        assert!(path.with_extension("json.corrupt").exists());
        assert_eq!(report.journals_replayed, 0);
        assert_eq!(report.journals_discarded, 0);
    }

    #[test]
    fn test_catalog_rows_reconciled() {
        let fx = Fixture::new();
        fx.cat
            .upsert_journal("ghost", &JournalRow { created_at: 0, status: JournalStatus::Committed })
            .unwrap();

        fx.sweep(&SweepOptions::default(), 1_000);
        assert!(fx.cat.journals().unwrap().is_empty());
    }
}
