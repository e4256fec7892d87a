//! Snapback core library.
//!
//! A local code-history engine: file-change events are grouped into
//! *sessions* (delimited by idleness, explicit boundary signals, or a
//! duration cap), every file version is stored once in a content-addressed
//! blob store, and any recorded session can later be reverted with a
//! crash-safe, per-file atomic swap.
//!
//! # Quick start
//!
//! ```no_run
//! use sback_core::{ChangeOp, HistoryEngine, RollbackOptions, Trigger};
//! use std::path::Path;
//!
//! # fn main() -> sback_core::Result<()> {
//! let mut engine = HistoryEngine::open("/work", "/work/.sback")?;
//!
//! // The editor integration feeds change events...
//! engine.track(Path::new("/work/src/main.rs"), ChangeOp::Modified, None)?;
//!
//! // ...and boundaries finalize them into an immutable manifest.
//! let outcome = engine.finalize(&[Trigger::Manual])?;
//!
//! // Any recorded session can be reverted later.
//! engine.rollback(&outcome.session_id, &RollbackOptions::default(), None)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Crash safety
//!
//! Rollbacks stage all restored content outside the workspace, then swap
//! files in one at a time, renaming each displaced original to
//! `<path>.bak-<sessionId>` and journaling the pair before the next
//! mutation. On startup the recovery sweeper replays or discards any
//! journal a crash left pending, so every touched file ends up at either
//! its pre-rollback or post-rollback content, never torn.

mod blob_store;
mod catalog;
mod config;
mod dedup;
mod digest;
mod engine;
mod error;
mod journal;
mod paths;
mod recovery;
mod rollback;
mod session;
mod summary;
mod types;

pub use blob_store::{BlobStore, GcOptions, GcProgressCallback, GcReport};
pub use catalog::{
    BlobMeta, BlobStats, Catalog, CatalogStore, JournalRow, ManifestStore, MemoryCatalog,
    CATALOG_SCHEMA_VERSION,
};
pub use config::{
    Config, DedupConfig, IgnoreConfig, JournalConfig, SessionConfig, StorageConfig, TagConfig,
};
pub use dedup::{fingerprint, FingerprintCache, FingerprintEntry};
pub use digest::Digest;
pub use engine::{CurrentSession, FinalizeOutcome, HistoryEngine, TrackMeta};
pub use error::{Result, SbError};
pub use journal::JOURNAL_DIR;
pub use recovery::{sweep, SweepOptions, SweepReport};
pub use rollback::{
    invert_changes, rollback, RollbackEnv, RollbackOptions, RollbackOutcome,
    RollbackProgressCallback, SkippedFile,
};
pub use session::{ActiveSession, PreState};
pub use summary::{line_count, session_name, session_tags, BurstMetrics, EditStats};
pub use types::{
    detect_eol, BackupPair, ChangeOp, ChangeRecord, EolKind, JournalEntry, JournalStatus,
    SessionManifest, SessionSummary, Trigger, MANIFEST_SCHEMA,
};

/// Time provider trait for driving boundary detection deterministically.
///
/// All engine timekeeping flows through an injectable epoch-milliseconds
/// clock; tests pass a fake via [`HistoryEngine::open_with_clock`].
pub trait TimeProvider: Send + Sync {
    /// Returns the current Unix timestamp in milliseconds.
    fn now_ms(&self) -> i64;
}

impl<F> TimeProvider for F
where
    F: Fn() -> i64 + Send + Sync,
{
    fn now_ms(&self) -> i64 {
        self()
    }
}

/// Current Unix time in milliseconds from the system clock.
pub(crate) fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
