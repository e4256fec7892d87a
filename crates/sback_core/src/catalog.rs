//! Durable catalog of sessions, changes, blob metadata, and journals.
//!
//! The embedded variant stores everything in a single redb database
//! (`catalog.db`) with ACID transactions. A manifest and its refcount
//! adjustments commit atomically, which is what keeps the blob-reference
//! invariants true across crashes.

use crate::digest::Digest;
use crate::error::{Result, SbError};
use crate::types::{ChangeRecord, JournalStatus, SessionManifest, SessionSummary, Trigger, MANIFEST_SCHEMA};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Catalog schema version for migration support.
pub const CATALOG_SCHEMA_VERSION: u32 = 1;

/// How long a writer lease stays valid before another holder may steal it.
const WRITER_LEASE_MS: i64 = 30_000;

const META_TABLE: TableDefinition<&str, u32> = TableDefinition::new("meta");
const SESSIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");
const SESSIONS_BY_WORKSPACE_TABLE: TableDefinition<&[u8], &str> =
    TableDefinition::new("sessions_by_workspace");
const CHANGES_TABLE: TableDefinition<(&str, u32), &[u8]> = TableDefinition::new("session_changes");
const BLOBS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("blobs");
const JOURNALS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("journals");
const WRITER_LOCK_TABLE: TableDefinition<u8, &[u8]> = TableDefinition::new("writer_lock");
const SCRATCH_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("scratch");

/// Metadata row for one stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMeta {
    /// Uncompressed size in bytes.
    pub size: u64,
    /// On-disk (compressed) size in bytes.
    pub compressed_size: u64,
    /// Digest algorithm, currently `"sha256"`.
    pub algo: String,
    /// Number of durable manifests referencing this blob.
    pub ref_count: u64,
    /// Creation time, epoch milliseconds.
    pub created_at: i64,
}

/// Aggregate blob store statistics.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BlobStats {
    /// Number of stored blobs.
    pub total_blobs: u64,
    /// Sum of uncompressed sizes.
    pub total_uncompressed: u64,
    /// Sum of on-disk sizes.
    pub total_compressed: u64,
}

impl BlobStats {
    /// On-disk bytes per uncompressed byte (0.0 for an empty store).
    pub fn compression_ratio(&self) -> f64 {
        if self.total_uncompressed == 0 {
            0.0
        } else {
            self.total_compressed as f64 / self.total_uncompressed as f64
        }
    }
}

/// Catalog mirror of a journal file's lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRow {
    /// Journal creation time, epoch milliseconds.
    pub created_at: i64,
    /// Current status.
    pub status: JournalStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionRow {
    workspace_key: String,
    started_at: i64,
    ended_at: i64,
    name: String,
    triggers: Vec<Trigger>,
    change_count: u32,
    tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockRow {
    holder_id: String,
    acquired_at: i64,
    expires_at: i64,
}

/// Manifest persistence capability set.
///
/// Concrete variants: [`Catalog`] (embedded redb) and [`MemoryCatalog`]
/// (tests and ephemeral use). The variant is chosen at construction; the
/// engine only sees this interface.
pub trait ManifestStore: Send + Sync {
    /// Persists a manifest atomically and increments the refcount of every
    /// distinct digest it mentions.
    fn save_manifest(&self, manifest: &SessionManifest) -> Result<()>;

    /// Loads a manifest by session id.
    fn get_manifest(&self, session_id: &str) -> Result<Option<SessionManifest>>;

    /// Lists sessions for a workspace, most recent first.
    fn list_sessions(&self, workspace_key: &str, limit: usize) -> Result<Vec<SessionSummary>>;

    /// Deletes a manifest and decrements the refcounts it held. Returns
    /// whether the session existed.
    fn delete_manifest(&self, session_id: &str) -> Result<bool>;
}

/// Full catalog capability set: manifests plus blob metadata, journal
/// rows, the active-session scratch area, and the writer lease.
pub trait CatalogStore: ManifestStore {
    /// Records metadata for a newly stored blob (refcount starts at 0).
    /// Idempotent for an existing digest.
    fn record_blob(&self, digest: &Digest, meta: &BlobMeta) -> Result<()>;

    /// Reads metadata for one blob.
    fn blob_meta(&self, digest: &Digest) -> Result<Option<BlobMeta>>;

    /// Increments a blob's refcount by `n`.
    fn inc_ref(&self, digest: &Digest, n: u64) -> Result<()>;

    /// Decrements a blob's refcount by `n`, saturating at zero.
    fn dec_ref(&self, digest: &Digest, n: u64) -> Result<()>;

    /// Blobs with `ref_count == 0` created before the cutoff: the GC
    /// candidate set.
    fn zero_ref_blobs(&self, created_before: i64) -> Result<Vec<(Digest, BlobMeta)>>;

    /// Removes a blob's metadata row (after its file is deleted).
    fn remove_blob(&self, digest: &Digest) -> Result<()>;

    /// Aggregate statistics over all blob rows.
    fn blob_stats(&self) -> Result<BlobStats>;

    /// Inserts or updates the catalog mirror of a journal file.
    fn upsert_journal(&self, session_id: &str, row: &JournalRow) -> Result<()>;

    /// Removes a journal mirror row.
    fn remove_journal(&self, session_id: &str) -> Result<()>;

    /// All journal mirror rows.
    fn journals(&self) -> Result<Vec<(String, JournalRow)>>;

    /// Persists the serialized active-session buffer for a workspace.
    fn save_scratch(&self, workspace_key: &str, bytes: &[u8]) -> Result<()>;

    /// Loads the serialized active-session buffer, if any.
    fn load_scratch(&self, workspace_key: &str) -> Result<Option<Vec<u8>>>;

    /// Clears the active-session buffer for a workspace.
    fn clear_scratch(&self, workspace_key: &str) -> Result<()>;

    /// Acquires the single-writer lease, waiting with exponential backoff
    /// up to `timeout_ms`. Expired leases are stolen.
    fn acquire_writer(&self, holder_id: &str, timeout_ms: u64) -> Result<()>;

    /// Releases the writer lease if `holder_id` still owns it.
    fn release_writer(&self, holder_id: &str) -> Result<()>;
}

fn cat_err(e: impl std::fmt::Display) -> SbError {
    SbError::Catalog(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    postcard::to_allocvec(value).map_err(|e| SbError::Serialization(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    postcard::from_bytes(bytes).map_err(|e| SbError::Deserialization(e.to_string()))
}

/// Index key: workspace_key ‖ 0x00 ‖ (u64::MAX − started_at) BE ‖ session_id.
///
/// The inverted timestamp makes a forward range scan yield newest-first.
fn encode_workspace_key(workspace_key: &str, started_at: i64, session_id: &str) -> Vec<u8> {
    let inverted = u64::MAX - started_at.max(0) as u64;
    let mut key = Vec::with_capacity(workspace_key.len() + 1 + 8 + session_id.len());
    key.extend_from_slice(workspace_key.as_bytes());
    key.push(0);
    key.extend_from_slice(&inverted.to_be_bytes());
    key.extend_from_slice(session_id.as_bytes());
    key
}

fn workspace_range(workspace_key: &str) -> (Vec<u8>, Vec<u8>) {
    let mut lo = workspace_key.as_bytes().to_vec();
    lo.push(0);
    let mut hi = workspace_key.as_bytes().to_vec();
    hi.push(1);
    (lo, hi)
}

/// Embedded transactional catalog backed by redb.
pub struct Catalog {
    db: Database,
    path: PathBuf,
    time: Arc<dyn Fn() -> i64 + Send + Sync>,
}

impl Catalog {
    /// Opens the catalog at `path`, creating and initializing it if absent.
    ///
    /// # Errors
    ///
    /// Returns `SchemaTooNew` if the catalog was written by a newer build,
    /// or `Catalog` for database-level failures.
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let existed = path.exists();
        let db = if existed {
            Database::open(&path).map_err(cat_err)?
        } else {
            Database::create(&path).map_err(cat_err)?
        };

        let catalog = Self {
            db,
            path,
            time: Arc::new(system_now_ms),
        };
        catalog.init_schema(existed)?;
        Ok(catalog)
    }

    /// Sets a custom time provider (epoch ms) for lease expiry in tests.
    pub fn with_time_provider(
        mut self,
        provider: impl Fn() -> i64 + Send + Sync + 'static,
    ) -> Self {
        self.time = Arc::new(provider);
        self
    }

    /// Returns the path of the catalog database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn now(&self) -> i64 {
        (self.time)()
    }

    /// Creates all tables and checks/installs the schema version.
    fn init_schema(&self, existed: bool) -> Result<()> {
        let txn = self.db.begin_write().map_err(cat_err)?;
        {
            let mut meta = txn.open_table(META_TABLE).map_err(cat_err)?;
            let version = meta.get("version").map_err(cat_err)?.map(|v| v.value());
            match version {
                Some(found) if found > CATALOG_SCHEMA_VERSION => {
                    return Err(SbError::SchemaTooNew {
                        found,
                        supported: CATALOG_SCHEMA_VERSION,
                    });
                }
                Some(found) if found < CATALOG_SCHEMA_VERSION => {
                    // Migration chain runs here when version 2 appears.
                    debug!(from = found, to = CATALOG_SCHEMA_VERSION, "migrating catalog schema");
                    meta.insert("version", CATALOG_SCHEMA_VERSION).map_err(cat_err)?;
                }
                Some(_) => {}
                None => {
                    if existed {
                        warn!("catalog has no schema version; stamping current");
                    }
                    meta.insert("version", CATALOG_SCHEMA_VERSION).map_err(cat_err)?;
                }
            }

            txn.open_table(SESSIONS_TABLE).map_err(cat_err)?;
            txn.open_table(SESSIONS_BY_WORKSPACE_TABLE).map_err(cat_err)?;
            txn.open_table(CHANGES_TABLE).map_err(cat_err)?;
            txn.open_table(BLOBS_TABLE).map_err(cat_err)?;
            txn.open_table(JOURNALS_TABLE).map_err(cat_err)?;
            txn.open_table(WRITER_LOCK_TABLE).map_err(cat_err)?;
            txn.open_table(SCRATCH_TABLE).map_err(cat_err)?;
        }
        txn.commit().map_err(cat_err)?;
        Ok(())
    }

    fn adjust_ref(table: &mut redb::Table<&str, &[u8]>, digest: &Digest, delta: i64) -> Result<()> {
        let hex = digest.as_hex();
        let mut meta: BlobMeta = match table.get(hex.as_str()).map_err(cat_err)? {
            Some(guard) => decode(guard.value())?,
            None => {
                return Err(SbError::ManifestIncomplete {
                    session_id: String::new(),
                    digest: hex,
                })
            }
        };

        meta.ref_count = if delta >= 0 {
            meta.ref_count.saturating_add(delta as u64)
        } else {
            meta.ref_count.saturating_sub((-delta) as u64)
        };

        let bytes = encode(&meta)?;
        table.insert(hex.as_str(), bytes.as_slice()).map_err(cat_err)?;
        Ok(())
    }
}

fn system_now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl ManifestStore for Catalog {
    fn save_manifest(&self, manifest: &SessionManifest) -> Result<()> {
        let txn = self.db.begin_write().map_err(cat_err)?;
        {
            let mut sessions = txn.open_table(SESSIONS_TABLE).map_err(cat_err)?;
            let row = SessionRow {
                workspace_key: manifest.workspace_key.clone(),
                started_at: manifest.started_at,
                ended_at: manifest.ended_at,
                name: manifest.name.clone(),
                triggers: manifest.triggers.clone(),
                change_count: manifest.change_count,
                tags: manifest.tags.clone(),
            };
            let bytes = encode(&row)?;
            sessions
                .insert(manifest.session_id.as_str(), bytes.as_slice())
                .map_err(cat_err)?;

            let mut by_workspace = txn
                .open_table(SESSIONS_BY_WORKSPACE_TABLE)
                .map_err(cat_err)?;
            let key = encode_workspace_key(
                &manifest.workspace_key,
                manifest.started_at,
                &manifest.session_id,
            );
            by_workspace
                .insert(key.as_slice(), manifest.session_id.as_str())
                .map_err(cat_err)?;

            let mut changes = txn.open_table(CHANGES_TABLE).map_err(cat_err)?;
            for (seq, change) in manifest.changes.iter().enumerate() {
                let bytes = encode(change)?;
                changes
                    .insert((manifest.session_id.as_str(), seq as u32), bytes.as_slice())
                    .map_err(cat_err)?;
            }

            let mut blobs = txn.open_table(BLOBS_TABLE).map_err(cat_err)?;
            for digest in manifest.distinct_digests() {
                Self::adjust_ref(&mut blobs, &digest, 1).map_err(|e| match e {
                    SbError::ManifestIncomplete { digest, .. } => SbError::ManifestIncomplete {
                        session_id: manifest.session_id.clone(),
                        digest,
                    },
                    other => other,
                })?;
            }
        }
        txn.commit().map_err(cat_err)?;
        Ok(())
    }

    fn get_manifest(&self, session_id: &str) -> Result<Option<SessionManifest>> {
        let txn = self.db.begin_read().map_err(cat_err)?;
        let sessions = txn.open_table(SESSIONS_TABLE).map_err(cat_err)?;

        let row: SessionRow = match sessions.get(session_id).map_err(cat_err)? {
            Some(guard) => decode(guard.value())?,
            None => return Ok(None),
        };

        let changes_table = txn.open_table(CHANGES_TABLE).map_err(cat_err)?;
        let mut changes: Vec<ChangeRecord> = Vec::with_capacity(row.change_count as usize);
        for item in changes_table
            .range((session_id, 0u32)..=(session_id, u32::MAX))
            .map_err(cat_err)?
        {
            let (_, value) = item.map_err(cat_err)?;
            changes.push(decode(value.value())?);
        }

        Ok(Some(SessionManifest {
            schema: MANIFEST_SCHEMA.to_string(),
            session_id: session_id.to_string(),
            workspace_key: row.workspace_key,
            started_at: row.started_at,
            ended_at: row.ended_at,
            triggers: row.triggers,
            name: row.name,
            tags: row.tags,
            changes,
            change_count: row.change_count,
        }))
    }

    fn list_sessions(&self, workspace_key: &str, limit: usize) -> Result<Vec<SessionSummary>> {
        let txn = self.db.begin_read().map_err(cat_err)?;
        let by_workspace = txn
            .open_table(SESSIONS_BY_WORKSPACE_TABLE)
            .map_err(cat_err)?;
        let sessions = txn.open_table(SESSIONS_TABLE).map_err(cat_err)?;

        let (lo, hi) = workspace_range(workspace_key);
        let mut out = Vec::new();
        for item in by_workspace
            .range(lo.as_slice()..hi.as_slice())
            .map_err(cat_err)?
        {
            if out.len() >= limit {
                break;
            }
            let (_, sid) = item.map_err(cat_err)?;
            let sid = sid.value().to_string();
            let row: SessionRow = match sessions.get(sid.as_str()).map_err(cat_err)? {
                Some(guard) => decode(guard.value())?,
                None => continue,
            };
            out.push(SessionSummary {
                session_id: sid,
                workspace_key: row.workspace_key,
                started_at: row.started_at,
                ended_at: row.ended_at,
                name: row.name,
                change_count: row.change_count,
                tags: row.tags,
            });
        }
        Ok(out)
    }

    fn delete_manifest(&self, session_id: &str) -> Result<bool> {
        let txn = self.db.begin_write().map_err(cat_err)?;
        let existed;
        {
            let mut sessions = txn.open_table(SESSIONS_TABLE).map_err(cat_err)?;
            let row: Option<SessionRow> = match sessions.remove(session_id).map_err(cat_err)? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            existed = row.is_some();

            if let Some(row) = row {
                let mut by_workspace = txn
                    .open_table(SESSIONS_BY_WORKSPACE_TABLE)
                    .map_err(cat_err)?;
                let key = encode_workspace_key(&row.workspace_key, row.started_at, session_id);
                by_workspace.remove(key.as_slice()).map_err(cat_err)?;

                let mut changes_table = txn.open_table(CHANGES_TABLE).map_err(cat_err)?;
                let mut digests = std::collections::BTreeSet::new();
                let mut seqs = Vec::new();
                for item in changes_table
                    .range((session_id, 0u32)..=(session_id, u32::MAX))
                    .map_err(cat_err)?
                {
                    let (key, value) = item.map_err(cat_err)?;
                    seqs.push(key.value().1);
                    let change: ChangeRecord = decode(value.value())?;
                    digests.extend(change.digests());
                }
                for seq in seqs {
                    changes_table.remove((session_id, seq)).map_err(cat_err)?;
                }

                let mut blobs = txn.open_table(BLOBS_TABLE).map_err(cat_err)?;
                for digest in digests {
                    // A missing row here means the blob was already GC'd out
                    // from under the manifest; deletion still proceeds.
                    if let Err(SbError::ManifestIncomplete { digest, .. }) =
                        Self::adjust_ref(&mut blobs, &digest, -1)
                    {
                        warn!(%digest, session_id, "deleting manifest with missing blob row");
                    }
                }
            }
        }
        txn.commit().map_err(cat_err)?;
        Ok(existed)
    }
}

impl CatalogStore for Catalog {
    fn record_blob(&self, digest: &Digest, meta: &BlobMeta) -> Result<()> {
        let txn = self.db.begin_write().map_err(cat_err)?;
        {
            let mut blobs = txn.open_table(BLOBS_TABLE).map_err(cat_err)?;
            let hex = digest.as_hex();
            if blobs.get(hex.as_str()).map_err(cat_err)?.is_none() {
                let bytes = encode(meta)?;
                blobs.insert(hex.as_str(), bytes.as_slice()).map_err(cat_err)?;
            }
        }
        txn.commit().map_err(cat_err)?;
        Ok(())
    }

    fn blob_meta(&self, digest: &Digest) -> Result<Option<BlobMeta>> {
        let txn = self.db.begin_read().map_err(cat_err)?;
        let blobs = txn.open_table(BLOBS_TABLE).map_err(cat_err)?;
        match blobs.get(digest.as_hex().as_str()).map_err(cat_err)? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    fn inc_ref(&self, digest: &Digest, n: u64) -> Result<()> {
        let txn = self.db.begin_write().map_err(cat_err)?;
        {
            let mut blobs = txn.open_table(BLOBS_TABLE).map_err(cat_err)?;
            Self::adjust_ref(&mut blobs, digest, n as i64)?;
        }
        txn.commit().map_err(cat_err)?;
        Ok(())
    }

    fn dec_ref(&self, digest: &Digest, n: u64) -> Result<()> {
        let txn = self.db.begin_write().map_err(cat_err)?;
        {
            let mut blobs = txn.open_table(BLOBS_TABLE).map_err(cat_err)?;
            Self::adjust_ref(&mut blobs, digest, -(n as i64))?;
        }
        txn.commit().map_err(cat_err)?;
        Ok(())
    }

    fn zero_ref_blobs(&self, created_before: i64) -> Result<Vec<(Digest, BlobMeta)>> {
        let txn = self.db.begin_read().map_err(cat_err)?;
        let blobs = txn.open_table(BLOBS_TABLE).map_err(cat_err)?;
        let mut out = Vec::new();
        for item in blobs.iter().map_err(cat_err)? {
            let (key, value) = item.map_err(cat_err)?;
            let meta: BlobMeta = decode(value.value())?;
            if meta.ref_count == 0 && meta.created_at < created_before {
                out.push((Digest::from_hex(key.value())?, meta));
            }
        }
        Ok(out)
    }

    fn remove_blob(&self, digest: &Digest) -> Result<()> {
        let txn = self.db.begin_write().map_err(cat_err)?;
        {
            let mut blobs = txn.open_table(BLOBS_TABLE).map_err(cat_err)?;
            blobs.remove(digest.as_hex().as_str()).map_err(cat_err)?;
        }
        txn.commit().map_err(cat_err)?;
        Ok(())
    }

    fn blob_stats(&self) -> Result<BlobStats> {
        let txn = self.db.begin_read().map_err(cat_err)?;
        let blobs = txn.open_table(BLOBS_TABLE).map_err(cat_err)?;
        let mut stats = BlobStats::default();
        for item in blobs.iter().map_err(cat_err)? {
            let (_, value) = item.map_err(cat_err)?;
            let meta: BlobMeta = decode(value.value())?;
            stats.total_blobs += 1;
            stats.total_uncompressed += meta.size;
            stats.total_compressed += meta.compressed_size;
        }
        Ok(stats)
    }

    fn upsert_journal(&self, session_id: &str, row: &JournalRow) -> Result<()> {
        let txn = self.db.begin_write().map_err(cat_err)?;
        {
            let mut journals = txn.open_table(JOURNALS_TABLE).map_err(cat_err)?;
            let bytes = encode(row)?;
            journals
                .insert(session_id, bytes.as_slice())
                .map_err(cat_err)?;
        }
        txn.commit().map_err(cat_err)?;
        Ok(())
    }

    fn remove_journal(&self, session_id: &str) -> Result<()> {
        let txn = self.db.begin_write().map_err(cat_err)?;
        {
            let mut journals = txn.open_table(JOURNALS_TABLE).map_err(cat_err)?;
            journals.remove(session_id).map_err(cat_err)?;
        }
        txn.commit().map_err(cat_err)?;
        Ok(())
    }

    fn journals(&self) -> Result<Vec<(String, JournalRow)>> {
        let txn = self.db.begin_read().map_err(cat_err)?;
        let journals = txn.open_table(JOURNALS_TABLE).map_err(cat_err)?;
        let mut out = Vec::new();
        for item in journals.iter().map_err(cat_err)? {
            let (key, value) = item.map_err(cat_err)?;
            out.push((key.value().to_string(), decode(value.value())?));
        }
        Ok(out)
    }

    fn save_scratch(&self, workspace_key: &str, bytes: &[u8]) -> Result<()> {
        let txn = self.db.begin_write().map_err(cat_err)?;
        {
            let mut scratch = txn.open_table(SCRATCH_TABLE).map_err(cat_err)?;
            scratch.insert(workspace_key, bytes).map_err(cat_err)?;
        }
        txn.commit().map_err(cat_err)?;
        Ok(())
    }

    fn load_scratch(&self, workspace_key: &str) -> Result<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(cat_err)?;
        let scratch = txn.open_table(SCRATCH_TABLE).map_err(cat_err)?;
        Ok(scratch
            .get(workspace_key)
            .map_err(cat_err)?
            .map(|guard| guard.value().to_vec()))
    }

    fn clear_scratch(&self, workspace_key: &str) -> Result<()> {
        let txn = self.db.begin_write().map_err(cat_err)?;
        {
            let mut scratch = txn.open_table(SCRATCH_TABLE).map_err(cat_err)?;
            scratch.remove(workspace_key).map_err(cat_err)?;
        }
        txn.commit().map_err(cat_err)?;
        Ok(())
    }

    fn acquire_writer(&self, holder_id: &str, timeout_ms: u64) -> Result<()> {
        let start = self.now();
        let mut backoff_ms = 10u64;

        loop {
            let now = self.now();
            let mut blocked_by: Option<String> = None;

            let txn = self.db.begin_write().map_err(cat_err)?;
            {
                let mut lock = txn.open_table(WRITER_LOCK_TABLE).map_err(cat_err)?;
                let current: Option<LockRow> = match lock.get(1u8).map_err(cat_err)? {
                    Some(guard) => Some(decode(guard.value())?),
                    None => None,
                };

                let free = match &current {
                    None => true,
                    Some(row) => row.holder_id == holder_id || row.expires_at <= now,
                };

                if free {
                    if let Some(row) = &current {
                        if row.holder_id != holder_id {
                            warn!(stale = %row.holder_id, "stealing expired writer lease");
                        }
                    }
                    let row = LockRow {
                        holder_id: holder_id.to_string(),
                        acquired_at: now,
                        expires_at: now + WRITER_LEASE_MS,
                    };
                    let bytes = encode(&row)?;
                    lock.insert(1u8, bytes.as_slice()).map_err(cat_err)?;
                } else {
                    blocked_by = current.map(|row| row.holder_id);
                }
            }
            txn.commit().map_err(cat_err)?;

            let holder = match blocked_by {
                None => return Ok(()),
                Some(holder) => holder,
            };

            let waited = (self.now() - start).max(0) as u64;
            if waited >= timeout_ms {
                return Err(SbError::LockTimeout {
                    holder,
                    waited_ms: waited,
                });
            }

            std::thread::sleep(Duration::from_millis(backoff_ms.min(timeout_ms - waited)));
            backoff_ms = (backoff_ms * 2).min(500);
        }
    }

    fn release_writer(&self, holder_id: &str) -> Result<()> {
        let txn = self.db.begin_write().map_err(cat_err)?;
        {
            let mut lock = txn.open_table(WRITER_LOCK_TABLE).map_err(cat_err)?;
            let current: Option<LockRow> = match lock.get(1u8).map_err(cat_err)? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            if let Some(row) = current {
                if row.holder_id == holder_id {
                    lock.remove(1u8).map_err(cat_err)?;
                }
            }
        }
        txn.commit().map_err(cat_err)?;
        Ok(())
    }
}

/// In-memory catalog variant for tests and ephemeral engines.
#[derive(Default)]
pub struct MemoryCatalog {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    manifests: HashMap<String, SessionManifest>,
    blobs: HashMap<String, BlobMeta>,
    journals: HashMap<String, JournalRow>,
    scratch: HashMap<String, Vec<u8>>,
}

impl MemoryCatalog {
    /// Creates an empty in-memory catalog.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

impl ManifestStore for MemoryCatalog {
    fn save_manifest(&self, manifest: &SessionManifest) -> Result<()> {
        let mut inner = self.lock();
        let digests = manifest.distinct_digests();
        // Validate before mutating so a failure leaves no partial refs.
        for digest in &digests {
            if !inner.blobs.contains_key(&digest.as_hex()) {
                return Err(SbError::ManifestIncomplete {
                    session_id: manifest.session_id.clone(),
                    digest: digest.as_hex(),
                });
            }
        }
        for digest in &digests {
            if let Some(meta) = inner.blobs.get_mut(&digest.as_hex()) {
                meta.ref_count += 1;
            }
        }
        inner
            .manifests
            .insert(manifest.session_id.clone(), manifest.clone());
        Ok(())
    }

    fn get_manifest(&self, session_id: &str) -> Result<Option<SessionManifest>> {
        Ok(self.lock().manifests.get(session_id).cloned())
    }

    fn list_sessions(&self, workspace_key: &str, limit: usize) -> Result<Vec<SessionSummary>> {
        let inner = self.lock();
        let mut rows: Vec<&SessionManifest> = inner
            .manifests
            .values()
            .filter(|m| m.workspace_key == workspace_key)
            .collect();
        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(rows
            .into_iter()
            .take(limit)
            .map(|m| SessionSummary {
                session_id: m.session_id.clone(),
                workspace_key: m.workspace_key.clone(),
                started_at: m.started_at,
                ended_at: m.ended_at,
                name: m.name.clone(),
                change_count: m.change_count,
                tags: m.tags.clone(),
            })
            .collect())
    }

    fn delete_manifest(&self, session_id: &str) -> Result<bool> {
        let mut inner = self.lock();
        let manifest = match inner.manifests.remove(session_id) {
            Some(m) => m,
            None => return Ok(false),
        };
        for digest in manifest.distinct_digests() {
            if let Some(meta) = inner.blobs.get_mut(&digest.as_hex()) {
                meta.ref_count = meta.ref_count.saturating_sub(1);
            }
        }
        Ok(true)
    }
}

impl CatalogStore for MemoryCatalog {
    fn record_blob(&self, digest: &Digest, meta: &BlobMeta) -> Result<()> {
        self.lock()
            .blobs
            .entry(digest.as_hex())
            .or_insert_with(|| meta.clone());
        Ok(())
    }

    fn blob_meta(&self, digest: &Digest) -> Result<Option<BlobMeta>> {
        Ok(self.lock().blobs.get(&digest.as_hex()).cloned())
    }

    fn inc_ref(&self, digest: &Digest, n: u64) -> Result<()> {
        let mut inner = self.lock();
        let hex = digest.as_hex();
        let meta = inner
            .blobs
            .get_mut(&hex)
            .ok_or(SbError::BlobNotFound(hex.clone()))?;
        meta.ref_count += n;
        Ok(())
    }

    fn dec_ref(&self, digest: &Digest, n: u64) -> Result<()> {
        let mut inner = self.lock();
        let hex = digest.as_hex();
        let meta = inner
            .blobs
            .get_mut(&hex)
            .ok_or(SbError::BlobNotFound(hex.clone()))?;
        meta.ref_count = meta.ref_count.saturating_sub(n);
        Ok(())
    }

    fn zero_ref_blobs(&self, created_before: i64) -> Result<Vec<(Digest, BlobMeta)>> {
        let inner = self.lock();
        let mut out = Vec::new();
        for (hex, meta) in &inner.blobs {
            if meta.ref_count == 0 && meta.created_at < created_before {
                out.push((Digest::from_hex(hex)?, meta.clone()));
            }
        }
        Ok(out)
    }

    fn remove_blob(&self, digest: &Digest) -> Result<()> {
        self.lock().blobs.remove(&digest.as_hex());
        Ok(())
    }

    fn blob_stats(&self) -> Result<BlobStats> {
        let inner = self.lock();
        let mut stats = BlobStats::default();
        for meta in inner.blobs.values() {
            stats.total_blobs += 1;
            stats.total_uncompressed += meta.size;
            stats.total_compressed += meta.compressed_size;
        }
        Ok(stats)
    }

    fn upsert_journal(&self, session_id: &str, row: &JournalRow) -> Result<()> {
        self.lock()
            .journals
            .insert(session_id.to_string(), row.clone());
        Ok(())
    }

    fn remove_journal(&self, session_id: &str) -> Result<()> {
        self.lock().journals.remove(session_id);
        Ok(())
    }

    fn journals(&self) -> Result<Vec<(String, JournalRow)>> {
        Ok(self
            .lock()
            .journals
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn save_scratch(&self, workspace_key: &str, bytes: &[u8]) -> Result<()> {
        self.lock()
            .scratch
            .insert(workspace_key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn load_scratch(&self, workspace_key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lock().scratch.get(workspace_key).cloned())
    }

    fn clear_scratch(&self, workspace_key: &str) -> Result<()> {
        self.lock().scratch.remove(workspace_key);
        Ok(())
    }

    fn acquire_writer(&self, _holder_id: &str, _timeout_ms: u64) -> Result<()> {
        Ok(())
    }

    fn release_writer(&self, _holder_id: &str) -> Result<()> {
        Ok(())
    }
}
