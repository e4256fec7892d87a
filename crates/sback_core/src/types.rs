//! Core data model: change records, session manifests, and rollback journals.

use crate::digest::Digest;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Schema tag written into every persisted manifest.
pub const MANIFEST_SCHEMA: &str = "session.v1";

/// The kind of file event a [`ChangeRecord`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    /// File did not exist before the session and does after.
    Created,
    /// File existed before and after with (possibly) different content.
    Modified,
    /// File existed before the session and does not after.
    Deleted,
    /// File moved; `from_path` carries the old location.
    Renamed,
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeOp::Created => "created",
            ChangeOp::Modified => "modified",
            ChangeOp::Deleted => "deleted",
            ChangeOp::Renamed => "renamed",
        };
        write!(f, "{}", s)
    }
}

/// What caused a session boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Trigger {
    /// Change events arriving from the file watcher.
    Filewatch,
    /// A pre-commit hook asked for a boundary.
    PreCommit,
    /// The user requested a boundary explicitly.
    Manual,
    /// The idle timer elapsed.
    IdleFinalize,
    /// The editor window lost focus.
    Blur,
    /// A task runner reported completion.
    Task,
    /// The session hit the hard duration cap.
    MaxDuration,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Trigger::Filewatch => "filewatch",
            Trigger::PreCommit => "pre-commit",
            Trigger::Manual => "manual",
            Trigger::IdleFinalize => "idle-finalize",
            Trigger::Blur => "blur",
            Trigger::Task => "task",
            Trigger::MaxDuration => "max-duration",
        };
        write!(f, "{}", s)
    }
}

/// Line-ending flavor of a text blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EolKind {
    /// `\n` only.
    Lf,
    /// `\r\n` only.
    Crlf,
    /// `\r` only (classic Mac).
    Cr,
    /// More than one flavor present.
    Mixed,
}

/// Detects the line-ending flavor of `bytes`.
///
/// Returns `None` when the content has no line terminators at all.
pub fn detect_eol(bytes: &[u8]) -> Option<EolKind> {
    let mut lf = 0usize;
    let mut crlf = 0usize;
    let mut cr = 0usize;

    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\r' => {
                if bytes.get(i + 1) == Some(&b'\n') {
                    crlf += 1;
                    i += 2;
                    continue;
                }
                cr += 1;
            }
            b'\n' => lf += 1,
            _ => {}
        }
        i += 1;
    }

    let kinds = [lf > 0, crlf > 0, cr > 0].iter().filter(|&&k| k).count();
    match kinds {
        0 => None,
        1 if lf > 0 => Some(EolKind::Lf),
        1 if crlf > 0 => Some(EolKind::Crlf),
        1 => Some(EolKind::Cr),
        _ => Some(EolKind::Mixed),
    }
}

/// One file event within a session.
///
/// `path` is always a POSIX-normalized path relative to the workspace root.
/// Digest columns stay empty until finalize (deferred digesting); the
/// before-side is absent for `created` and the after-side for `deleted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    /// Workspace-relative POSIX path.
    pub path: String,
    /// What happened.
    pub op: ChangeOp,
    /// Old location; present iff `op == Renamed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_path: Option<String>,
    /// Digest of the pre-session content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest_before: Option<Digest>,
    /// Digest of the post-session content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest_after: Option<Digest>,
    /// Size of the pre-session content in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_before: Option<u64>,
    /// Size of the post-session content in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_after: Option<u64>,
    /// Pre-session mtime, epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime_before: Option<i64>,
    /// Post-session mtime, epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime_after: Option<i64>,
    /// Pre-session POSIX mode bits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode_before: Option<u32>,
    /// Post-session POSIX mode bits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode_after: Option<u32>,
    /// Pre-session line-ending flavor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eol_before: Option<EolKind>,
    /// Post-session line-ending flavor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eol_after: Option<EolKind>,
}

impl ChangeRecord {
    /// Creates a bare record for a freshly tracked event (no digests yet).
    pub fn new(path: String, op: ChangeOp) -> Self {
        Self {
            path,
            op,
            from_path: None,
            digest_before: None,
            digest_after: None,
            size_before: None,
            size_after: None,
            mtime_before: None,
            mtime_after: None,
            mode_before: None,
            mode_after: None,
            eol_before: None,
            eol_after: None,
        }
    }

    /// All digests this record mentions (0, 1, or 2).
    pub fn digests(&self) -> impl Iterator<Item = Digest> + '_ {
        self.digest_before.into_iter().chain(self.digest_after)
    }
}

/// The persisted, immutable description of a finalized session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionManifest {
    /// Schema tag, always [`MANIFEST_SCHEMA`].
    pub schema: String,
    /// Opaque collision-resistant session identifier.
    pub session_id: String,
    /// Opaque workspace identifier (never a path).
    pub workspace_key: String,
    /// Session start, epoch milliseconds.
    pub started_at: i64,
    /// Session end, epoch milliseconds (`>= started_at`).
    pub ended_at: i64,
    /// Boundary causes, in the order they were observed (deduplicated).
    pub triggers: Vec<Trigger>,
    /// Short deterministic display name.
    pub name: String,
    /// Ordered set of short classification tokens.
    pub tags: Vec<String>,
    /// File events in arrival order.
    pub changes: Vec<ChangeRecord>,
    /// Always equal to `changes.len()`.
    pub change_count: u32,
}

impl SessionManifest {
    /// External wire form: the manifest as JSON with ISO-8601 timestamps.
    ///
    /// Internally timestamps are epoch milliseconds; the wire form swaps
    /// `startedAt`/`endedAt` for RFC 3339 strings.
    pub fn wire_json(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            obj.insert("startedAt".into(), iso8601(self.started_at).into());
            obj.insert("endedAt".into(), iso8601(self.ended_at).into());
        }
        value
    }

    /// Distinct digests referenced by this manifest's changes.
    pub fn distinct_digests(&self) -> Vec<Digest> {
        let mut seen = std::collections::BTreeSet::new();
        for change in &self.changes {
            for d in change.digests() {
                seen.insert(d);
            }
        }
        seen.into_iter().collect()
    }
}

fn iso8601(epoch_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(epoch_ms)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_else(|| epoch_ms.to_string())
}

/// Lightweight listing row for a recorded session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Session identifier.
    pub session_id: String,
    /// Workspace identifier.
    pub workspace_key: String,
    /// Session start, epoch milliseconds.
    pub started_at: i64,
    /// Session end, epoch milliseconds.
    pub ended_at: i64,
    /// Display name.
    pub name: String,
    /// Number of change records.
    pub change_count: u32,
    /// Classification tokens.
    pub tags: Vec<String>,
}

/// Lifecycle state of a rollback journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JournalStatus {
    /// Rollback in flight; the sweeper must reconcile this on startup.
    Pending,
    /// Swap phase completed; backups have been (or are being) unlinked.
    Committed,
    /// Aborted before any filesystem mutation.
    RolledBack,
}

/// One `(original, backup)` pair renamed aside during the swap phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupPair {
    /// Absolute path of the live file.
    pub original: PathBuf,
    /// Absolute path it was renamed to (`<original>.bak-<sessionId>`).
    pub backup: PathBuf,
}

/// On-disk record of an in-flight rollback.
///
/// Serialized as JSON under `.sb_journal/pending/<sessionId>.json` and
/// rewritten after every backup rename so a crash at any point leaves
/// enough state for the recovery sweeper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    /// Session being rolled back.
    pub session_id: String,
    /// Journal creation time, epoch milliseconds.
    pub created_at: i64,
    /// Absolute workspace root the paths below are relative to.
    pub workspace_root: PathBuf,
    /// The inverse change sequence being applied.
    pub changes: Vec<ChangeRecord>,
    /// Backups renamed aside so far, in swap order.
    pub backups: Vec<BackupPair>,
    /// Journal lifecycle state.
    pub status: JournalStatus,
}
