//! The history engine: session lifecycle, boundary detection, and the
//! public API tying the catalog, blob store, rollback, and recovery
//! together.

use crate::blob_store::{BlobStore, GcOptions, GcProgressCallback, GcReport};
use crate::catalog::{BlobStats, Catalog, CatalogStore};
use crate::config::Config;
use crate::dedup::{fingerprint, FingerprintCache};
use crate::digest::Digest;
use crate::error::{Result, SbError};
use crate::journal;
use crate::paths;
use crate::recovery::{self, SweepOptions, SweepReport};
use crate::rollback::{self, RollbackEnv, RollbackOptions, RollbackOutcome, RollbackProgressCallback};
use crate::session::{mode_bits, mtime_ms, ActiveSession};
use crate::summary::{self, BurstMetrics, EditStats};
use crate::types::{detect_eol, ChangeOp, ChangeRecord, SessionManifest, SessionSummary, Trigger, MANIFEST_SCHEMA};
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// `track` calls slower than this are logged; the common path only
/// appends to the buffer.
const SLOW_TRACK_MS: u128 = 10;

/// Extra metadata an editor may attach to a change event.
#[derive(Debug, Clone, Default)]
pub struct TrackMeta {
    /// Old absolute path for `renamed` events.
    pub from_path: Option<PathBuf>,
    /// Size hint at event time.
    pub size: Option<u64>,
    /// mtime hint at event time, epoch milliseconds.
    pub mtime: Option<i64>,
    /// Mode hint at event time.
    pub mode: Option<u32>,
}

/// Result of finalizing (or deduplicating) a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeOutcome {
    /// The persisted session, or the earlier session this one collapsed
    /// into when deduplicated.
    pub session_id: String,
    /// Number of change records in the finalized buffer.
    pub change_count: u32,
    /// Whether an equivalent recent session absorbed this one.
    pub deduplicated: bool,
}

/// The active session as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentSession {
    /// Session identifier.
    pub session_id: String,
    /// Buffered change count.
    pub change_count: u32,
}

/// Local code-history engine for one workspace.
///
/// Owns the catalog, the blob store, and the single in-memory active
/// session. The public surface is single-threaded cooperative: hosts feed
/// change events through [`HistoryEngine::track`], call
/// [`HistoryEngine::tick`] periodically to drive the idle and duration
/// boundaries, and invoke rollback on demand.
pub struct HistoryEngine {
    workspace_root: PathBuf,
    data_dir: PathBuf,
    workspace_key: String,
    config: Config,
    catalog: Box<dyn CatalogStore>,
    blob_store: BlobStore,
    ignore: globset::GlobSet,
    active: Option<ActiveSession>,
    session_lock: Option<LockGuard>,
    fingerprints: FingerprintCache,
    holder_id: String,
    time: Arc<dyn Fn() -> i64 + Send + Sync>,
}

impl HistoryEngine {
    /// Opens the engine for a workspace with the embedded catalog.
    ///
    /// Runs the recovery sweeper, then resumes any crashed session from
    /// the catalog scratch area.
    pub fn open(workspace_root: impl AsRef<Path>, data_dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_inner(workspace_root, data_dir, None, Arc::new(crate::now_ms))
    }

    /// Opens the engine with an injected clock (epoch ms) for tests.
    pub fn open_with_clock(
        workspace_root: impl AsRef<Path>,
        data_dir: impl AsRef<Path>,
        provider: impl Fn() -> i64 + Send + Sync + 'static,
    ) -> Result<Self> {
        Self::open_inner(workspace_root, data_dir, None, Arc::new(provider))
    }

    /// Opens the engine with a caller-provided catalog variant.
    pub fn open_with_catalog(
        workspace_root: impl AsRef<Path>,
        data_dir: impl AsRef<Path>,
        catalog: Box<dyn CatalogStore>,
        provider: impl Fn() -> i64 + Send + Sync + 'static,
    ) -> Result<Self> {
        Self::open_inner(workspace_root, data_dir, Some(catalog), Arc::new(provider))
    }

    fn open_inner(
        workspace_root: impl AsRef<Path>,
        data_dir: impl AsRef<Path>,
        catalog: Option<Box<dyn CatalogStore>>,
        time: Arc<dyn Fn() -> i64 + Send + Sync>,
    ) -> Result<Self> {
        let workspace_root = workspace_root.as_ref().canonicalize()?;
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;

        let config = Config::load(&data_dir)?;
        let workspace_key = derive_workspace_key(&workspace_root);

        let catalog: Box<dyn CatalogStore> = match catalog {
            Some(catalog) => catalog,
            None => {
                let time = time.clone();
                Box::new(
                    Catalog::open_or_create(data_dir.join("catalog.db"))?
                        .with_time_provider(move || time()),
                )
            }
        };

        let store_time = time.clone();
        let blob_store = BlobStore::new(data_dir.join("blobs"))
            .with_compression_level(config.storage.compression_level)
            .with_time_provider(move || store_time());

        let ignore = build_ignore_set(&config.ignore.patterns);

        let mut engine = Self {
            fingerprints: FingerprintCache::new(config.dedup.cache_size),
            holder_id: uuid::Uuid::new_v4().to_string(),
            workspace_root,
            data_dir,
            workspace_key,
            config,
            catalog,
            blob_store,
            ignore,
            active: None,
            session_lock: None,
            time,
        };

        engine.resume_scratch()?;
        engine.recover()?;
        Ok(engine)
    }

    /// Returns the canonical workspace root.
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Returns the opaque workspace key.
    pub fn workspace_key(&self) -> &str {
        &self.workspace_key
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Starts a session explicitly, finalizing any active one first.
    pub fn start(&mut self) -> Result<String> {
        if self.active.is_some() {
            self.finalize(&[Trigger::Manual])?;
        }
        let session_id = self.activate_session()?;
        Ok(session_id)
    }

    /// Accepts one file-change event.
    ///
    /// Normalizes the path, drops it if an ignore pattern matches, starts
    /// a session if none is active, captures the pre-session shadow on the
    /// path's first appearance, and appends a digest-less record. All
    /// remaining hashing is deferred to finalize.
    pub fn track(&mut self, absolute: &Path, op: ChangeOp, meta: Option<TrackMeta>) -> Result<()> {
        let begun = Instant::now();
        let rel = paths::normalize_rel(&self.workspace_root, absolute)?;

        if self.ignore.is_match(&rel) {
            debug!(path = %rel, "ignored by pattern");
            return Ok(());
        }

        let meta = meta.unwrap_or_default();
        let from_rel = match op {
            ChangeOp::Renamed => match &meta.from_path {
                Some(from) => Some(paths::normalize_rel(&self.workspace_root, from)?),
                None => {
                    return Err(SbError::InvalidInput(format!(
                        "renamed event for {} carries no fromPath",
                        rel
                    )))
                }
            },
            _ => None,
        };

        if self.active.is_none() {
            self.activate_session()?;
        }
        let now = (self.time)();

        // Field-splitting borrow: the session needs the store and catalog
        // for shadow capture while it is mutated.
        let Self {
            active,
            blob_store,
            catalog,
            workspace_root,
            ..
        } = self;
        let session = active.as_mut().expect("session activated above");
        session.add_trigger(Trigger::Filewatch);
        session.ensure_shadow(&rel, op, workspace_root, blob_store, catalog.as_ref())?;

        let mut change = ChangeRecord::new(rel, op);
        change.from_path = from_rel;
        if op != ChangeOp::Deleted {
            change.size_after = meta.size;
            change.mtime_after = meta.mtime;
            change.mode_after = meta.mode;
        }
        session.record(change, now);

        let batch = self.config.session.flush_batch_size.max(1);
        if self.active.as_ref().map(|s| s.change_count() % batch == 0) == Some(true) {
            self.flush()?;
        }

        let elapsed = begun.elapsed().as_millis();
        if elapsed > SLOW_TRACK_MS {
            warn!(elapsed_ms = elapsed as u64, "slow track call");
        }
        Ok(())
    }

    /// Persists the live buffer to the catalog scratch row so a crash
    /// loses at most the unflushed tail.
    pub fn flush(&mut self) -> Result<()> {
        let now = (self.time)();
        if let Some(session) = self.active.as_mut() {
            session.last_flush = now;
            let bytes = session.to_scratch_bytes()?;
            self.catalog.save_scratch(&self.workspace_key, &bytes)?;
            debug!(
                session_id = %session.session_id,
                changes = session.change_count(),
                "flushed session scratch"
            );
        }
        Ok(())
    }

    /// Drives timer-based boundaries; hosts call this periodically.
    ///
    /// Applies, in order: idle-finalize (with the zero-change discard
    /// guard), the max-duration cap, and the scratch flush cadence.
    pub fn tick(&mut self) -> Result<Option<FinalizeOutcome>> {
        let session = match &self.active {
            Some(session) => session,
            None => return Ok(None),
        };
        let now = (self.time)();
        let idle_ms = (now - session.last_activity).max(0) as u64;
        let age_ms = (now - session.started_at).max(0) as u64;

        if idle_ms >= self.config.session.idle_ms {
            if session.change_count() == 0
                && age_ms < self.config.session.min_session_duration_ms
            {
                debug!(session_id = %session.session_id, "discarding empty short session");
                self.discard_active()?;
                return Ok(None);
            }
            return self.finalize(&[Trigger::IdleFinalize]).map(Some);
        }

        if age_ms > self.config.session.max_session_duration_ms {
            return self.finalize(&[Trigger::MaxDuration]).map(Some);
        }

        if session.change_count() > 0
            && (now - session.last_flush).max(0) as u64 >= self.config.session.flush_interval_ms
        {
            self.flush()?;
        }
        Ok(None)
    }

    /// The editor window lost focus.
    pub fn on_blur(&mut self) -> Result<Option<FinalizeOutcome>> {
        self.boundary(Trigger::Blur)
    }

    /// A commit was made.
    pub fn on_commit(&mut self) -> Result<Option<FinalizeOutcome>> {
        self.boundary(Trigger::PreCommit)
    }

    /// A pre-commit hook is about to run.
    pub fn on_pre_commit(&mut self) -> Result<Option<FinalizeOutcome>> {
        self.boundary(Trigger::PreCommit)
    }

    /// A task runner reported completion.
    pub fn on_task_complete(&mut self) -> Result<Option<FinalizeOutcome>> {
        self.boundary(Trigger::Task)
    }

    /// The user asked for a boundary.
    pub fn on_manual_finalize(&mut self) -> Result<Option<FinalizeOutcome>> {
        self.boundary(Trigger::Manual)
    }

    fn boundary(&mut self, trigger: Trigger) -> Result<Option<FinalizeOutcome>> {
        if self.active.is_none() {
            return Ok(None);
        }
        self.finalize(&[trigger]).map(Some)
    }

    /// Finalizes the active session: computes deferred digests, consults
    /// the deduplicator, and persists the manifest atomically.
    pub fn finalize(&mut self, reasons: &[Trigger]) -> Result<FinalizeOutcome> {
        self.finalize_with_burst(reasons, None)
    }

    /// [`HistoryEngine::finalize`] with collaborator-supplied burst
    /// metrics for tagging.
    pub fn finalize_with_burst(
        &mut self,
        reasons: &[Trigger],
        burst: Option<BurstMetrics>,
    ) -> Result<FinalizeOutcome> {
        let mut session = self.active.take().ok_or(SbError::NoActiveSession)?;
        self.session_lock = None;
        for &trigger in reasons {
            session.add_trigger(trigger);
        }

        let now = (self.time)();
        let edits = self.compute_digests(&mut session)?;
        let change_count = session.change_count() as u32;

        // Dedup: a recent session with the same canonical change set
        // absorbs this one. Small sessions always persist.
        let fp = fingerprint(&session.changes);
        if session.change_count() >= self.config.dedup.min_files {
            if let Some(entry) = self.fingerprints.lookup(&fp) {
                if (now - entry.finalized_at).max(0) as u64 <= self.config.dedup.window_ms {
                    let existing = entry.session_id.clone();
                    info!(
                        session_id = %session.session_id,
                        absorbed_by = %existing,
                        "suppressing duplicate session"
                    );
                    self.catalog.clear_scratch(&self.workspace_key)?;
                    return Ok(FinalizeOutcome {
                        session_id: existing,
                        change_count,
                        deduplicated: true,
                    });
                }
            }
        }

        let name = summary::session_name(&session.changes);
        let tags = summary::session_tags(
            &session.changes,
            session.started_at,
            now,
            &session.triggers,
            &self.config.tags,
            Some(&edits),
            burst.as_ref(),
        );

        let manifest = SessionManifest {
            schema: MANIFEST_SCHEMA.to_string(),
            session_id: session.session_id.clone(),
            workspace_key: self.workspace_key.clone(),
            started_at: session.started_at,
            ended_at: now,
            triggers: session.triggers.clone(),
            name,
            tags,
            changes: session.changes.clone(),
            change_count,
        };

        self.with_writer(|engine| engine.catalog.save_manifest(&manifest))?;
        self.fingerprints
            .insert(fp, manifest.session_id.clone(), now);
        self.catalog.clear_scratch(&self.workspace_key)?;

        info!(
            session_id = %manifest.session_id,
            changes = change_count,
            name = %manifest.name,
            "session finalized"
        );
        Ok(FinalizeOutcome {
            session_id: manifest.session_id,
            change_count,
            deduplicated: false,
        })
    }

    /// Returns the active session, if any.
    pub fn current(&self) -> Option<CurrentSession> {
        self.active.as_ref().map(|session| CurrentSession {
            session_id: session.session_id.clone(),
            change_count: session.change_count() as u32,
        })
    }

    /// Lists recorded sessions for this workspace, newest first.
    pub fn list(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        self.catalog.list_sessions(&self.workspace_key, limit)
    }

    /// Loads a session manifest.
    pub fn get_manifest(&self, session_id: &str) -> Result<SessionManifest> {
        self.catalog
            .get_manifest(session_id)?
            .ok_or_else(|| SbError::SessionNotFound(session_id.to_string()))
    }

    /// Deletes a recorded session, releasing its blob references.
    pub fn delete_session(&mut self, session_id: &str) -> Result<bool> {
        self.with_writer(|engine| engine.catalog.delete_manifest(session_id))
    }

    /// Reverts a recorded session. See [`crate::rollback::rollback`].
    pub fn rollback(
        &mut self,
        session_id: &str,
        options: &RollbackOptions,
        progress: Option<&RollbackProgressCallback>,
    ) -> Result<RollbackOutcome> {
        let manifest = self.get_manifest(session_id)?;
        let now_ms = (self.time)();
        self.with_writer(|engine| {
            let journal_dir = engine.data_dir.join(journal::JOURNAL_DIR);
            let staging_root = engine.data_dir.join("staging");
            let env = RollbackEnv {
                blob_store: &engine.blob_store,
                catalog: engine.catalog.as_ref(),
                workspace_root: &engine.workspace_root,
                journal_dir: &journal_dir,
                staging_root: &staging_root,
                now_ms,
            };
            rollback::rollback(&manifest, &env, options, progress)
        })
    }

    /// Runs the recovery sweeper over this workspace's journal area.
    pub fn recover(&mut self) -> Result<SweepReport> {
        let options = SweepOptions {
            retention_ms: self.config.journal.retention_ms,
            sweep_orphan_backups: self.config.journal.sweep_orphan_backups,
            live_session: self.active.as_ref().map(|s| s.session_id.clone()),
        };
        recovery::sweep(
            &self.data_dir.join(journal::JOURNAL_DIR),
            &self.workspace_root,
            &self.blob_store,
            self.catalog.as_ref(),
            &options,
            (self.time)(),
        )
    }

    /// Collects zero-reference blobs past the grace window.
    pub fn gc(&mut self, dry_run: bool, progress: Option<&GcProgressCallback>) -> Result<GcReport> {
        let options = GcOptions {
            dry_run,
            grace_ms: self.config.storage.blob_grace_ms,
        };
        self.with_writer(|engine| {
            engine
                .blob_store
                .gc(engine.catalog.as_ref(), &options, progress)
        })
    }

    /// Aggregate blob store statistics.
    pub fn stats(&self) -> Result<BlobStats> {
        self.blob_store.stats(self.catalog.as_ref())
    }

    /// Read access to the blob store (rollback tooling, tests).
    pub fn blob_store(&self) -> &BlobStore {
        &self.blob_store
    }

    fn activate_session(&mut self) -> Result<String> {
        if self.session_lock.is_none() {
            self.session_lock = Some(acquire_lock(&self.data_dir)?);
        }
        let session_id = uuid::Uuid::new_v4().to_string();
        let now = (self.time)();
        self.active = Some(ActiveSession::new(
            session_id.clone(),
            self.workspace_key.clone(),
            now,
        ));
        debug!(session_id = %session_id, "session started");
        Ok(session_id)
    }

    fn discard_active(&mut self) -> Result<()> {
        self.active = None;
        self.session_lock = None;
        self.catalog.clear_scratch(&self.workspace_key)
    }

    /// Resurrects a crashed session from the catalog scratch row.
    fn resume_scratch(&mut self) -> Result<()> {
        let bytes = match self.catalog.load_scratch(&self.workspace_key)? {
            Some(bytes) => bytes,
            None => return Ok(()),
        };
        match ActiveSession::from_scratch_bytes(&bytes) {
            Ok(session) => {
                info!(
                    session_id = %session.session_id,
                    changes = session.change_count(),
                    "resumed crashed session from scratch"
                );
                self.session_lock = Some(acquire_lock(&self.data_dir)?);
                self.active = Some(session);
            }
            Err(e) => {
                warn!(error = %e, "discarding unreadable session scratch");
                self.catalog.clear_scratch(&self.workspace_key)?;
            }
        }
        Ok(())
    }

    /// Deferred digesting: resolves the before-side from the shadow ledger
    /// and the after-side from terminal on-disk content, storing new blobs
    /// along the way. Returns the aggregate edit stats for tagging.
    fn compute_digests(&self, session: &mut ActiveSession) -> Result<EditStats> {
        // Terminal content per path, read and stored once.
        struct Terminal {
            digest: Digest,
            size: u64,
            mtime: Option<i64>,
            mode: Option<u32>,
            eol: Option<crate::types::EolKind>,
            lines: u64,
        }
        let mut terminals: HashMap<String, Option<Terminal>> = HashMap::new();
        let mut before_lines: HashMap<Digest, u64> = HashMap::new();
        let mut edits = EditStats::default();

        let shadows = session.shadows.clone();
        for change in &mut session.changes {
            if let Some(pre) = shadows.get(&change.path).and_then(|s| s.as_ref()) {
                change.digest_before = Some(pre.digest);
                change.size_before = Some(pre.size);
                change.mtime_before = pre.mtime;
                change.mode_before = pre.mode;
                change.eol_before = pre.eol;
            }

            if change.op == ChangeOp::Deleted {
                continue;
            }

            let terminal = match terminals.entry(change.path.clone()) {
                std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
                std::collections::hash_map::Entry::Vacant(e) => {
                    let abs = paths::to_absolute(&self.workspace_root, &change.path);
                    let loaded = match fs::read(&abs) {
                        Ok(bytes) => {
                            let digest = self.blob_store.put(self.catalog.as_ref(), &bytes)?;
                            let metadata = fs::symlink_metadata(&abs).ok();
                            Some(Terminal {
                                digest,
                                size: bytes.len() as u64,
                                mtime: metadata.as_ref().and_then(mtime_ms),
                                mode: metadata.as_ref().and_then(mode_bits),
                                eol: detect_eol(&bytes),
                                lines: summary::line_count(&bytes),
                            })
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                            debug!(path = %change.path, "file vanished before finalize");
                            None
                        }
                        Err(e) => return Err(SbError::from_io(e)),
                    };
                    e.insert(loaded)
                }
            };

            if let Some(terminal) = terminal {
                change.digest_after = Some(terminal.digest);
                change.size_after = Some(terminal.size);
                change.mtime_after = terminal.mtime;
                change.mode_after = terminal.mode;
                change.eol_after = terminal.eol;

                let before = match change.digest_before {
                    Some(digest) => match before_lines.entry(digest) {
                        std::collections::hash_map::Entry::Occupied(e) => *e.get(),
                        std::collections::hash_map::Entry::Vacant(e) => {
                            let lines = self
                                .blob_store
                                .get(&digest)
                                .map(|bytes| summary::line_count(&bytes))
                                .unwrap_or(0);
                            *e.insert(lines)
                        }
                    },
                    None => 0,
                };
                edits.added_lines += terminal.lines.saturating_sub(before);
            }
        }
        Ok(edits)
    }

    /// Runs `f` under the catalog writer lease.
    fn with_writer<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let holder = self.holder_id.clone();
        self.catalog
            .acquire_writer(&holder, self.config.session.lock_timeout_ms)?;
        let result = f(self);
        if let Err(e) = self.catalog.release_writer(&holder) {
            warn!(error = %e, "failed to release writer lease");
        }
        result
    }
}

/// Opaque workspace identifier: a truncated digest of the canonical root.
/// Never a path, stable across runs.
fn derive_workspace_key(workspace_root: &Path) -> String {
    let digest = Digest::of(workspace_root.to_string_lossy().as_bytes());
    digest.as_hex()[..16].to_string()
}

fn build_ignore_set(patterns: &[String]) -> globset::GlobSet {
    let mut builder = globset::GlobSetBuilder::new();
    for pattern in patterns {
        match globset::Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => warn!(pattern = %pattern, error = %e, "invalid ignore pattern skipped"),
        }
    }
    builder.build().unwrap_or_else(|e| {
        warn!(error = %e, "failed to build ignore set; tracking everything");
        globset::GlobSet::empty()
    })
}

/// RAII guard for the cross-process active-session lock.
///
/// Holds an exclusive lock on `<data_dir>/LOCK` while a session is live.
/// The file carries the owner's PID so a stale lock from a dead process
/// can be reclaimed.
struct LockGuard {
    file: Option<File>,
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            drop(file);
        }
        let _ = fs::remove_file(&self.path);
    }
}

fn acquire_lock(data_dir: &Path) -> Result<LockGuard> {
    acquire_lock_with_retry(&data_dir.join("LOCK"), 0)
}

fn acquire_lock_with_retry(lock_path: &Path, retry_count: u32) -> Result<LockGuard> {
    if retry_count > 2 {
        return Err(SbError::WorkspaceLockHeld { pid: 0 });
    }

    match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path)
    {
        Ok(mut file) => {
            let pid = std::process::id();
            writeln!(file, "{}", pid)?;
            file.flush()?;
            file.try_lock_exclusive()
                .map_err(|_| SbError::WorkspaceLockHeld { pid })?;
            Ok(LockGuard {
                file: Some(file),
                path: lock_path.to_path_buf(),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            handle_existing_lock(lock_path, retry_count)
        }
        Err(e) => Err(SbError::Io(e)),
    }
}

fn handle_existing_lock(lock_path: &Path, retry_count: u32) -> Result<LockGuard> {
    match fs::read_to_string(lock_path) {
        Ok(content) => {
            if let Ok(pid) = content.trim().parse::<u32>() {
                if is_process_alive(pid) {
                    return Err(SbError::WorkspaceLockHeld { pid });
                }
                warn!(pid, "removing stale lock from dead process");
                if let Err(e) = fs::remove_file(lock_path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        return Err(SbError::Io(e));
                    }
                }
                return acquire_lock_with_retry(lock_path, retry_count + 1);
            }
            warn!("lock file has invalid content, attempting cleanup");
            let _ = fs::remove_file(lock_path);
            acquire_lock_with_retry(lock_path, retry_count + 1)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            acquire_lock_with_retry(lock_path, retry_count + 1)
        }
        Err(e) => Err(SbError::Io(e)),
    }
}

#[cfg(target_os = "linux")]
fn is_process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{}/stat", pid)).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{}", pid)).exists()
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    // No cheap probe; assume the holder is alive.
    true
}
