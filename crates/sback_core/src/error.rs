//! Error types for sback_core operations.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for sback_core operations.
#[derive(Error, Debug)]
pub enum SbError {
    /// Blob with the given digest was not found in the store.
    #[error("blob not found: {0}")]
    BlobNotFound(String),

    /// Digest verification failed during blob read.
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        /// The digest the blob was requested under
        expected: String,
        /// The digest actually computed from the stored bytes
        actual: String,
    },

    /// The blob file is corrupted or has invalid format.
    #[error("corrupted blob at {}: {}", path.display(), reason)]
    CorruptedBlob {
        /// Path to the corrupted blob file
        path: PathBuf,
        /// Description of the corruption
        reason: String,
    },

    /// Invalid hex string for Digest parsing.
    #[error("invalid hex digest: {0}")]
    InvalidHex(String),

    /// A tracked or stored path violates the normalization rules.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath {
        /// The offending path as received
        path: String,
        /// Which rule it violates
        reason: String,
    },

    /// A change event was malformed (e.g. rename without a source path).
    #[error("invalid change event: {0}")]
    InvalidInput(String),

    /// Compression failed while writing a blob.
    #[error("compression error: {0}")]
    Compression(String),

    /// Decompression failed while reading a blob.
    #[error("decompression error: {0}")]
    Decompression(String),

    /// Blob exceeds maximum allowed size.
    #[error("blob too large: {size} bytes exceeds limit of {limit} bytes")]
    BlobTooLarge {
        /// Actual size of the blob
        size: usize,
        /// Maximum allowed size
        limit: usize,
    },

    /// The underlying device is out of space.
    #[error("storage full: {0}")]
    StorageFull(String),

    /// Serialization error for catalog rows or journal bodies.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error for catalog rows or journal bodies.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Catalog (embedded database) error.
    #[error("catalog error: {0}")]
    Catalog(String),

    /// The catalog schema is newer than this build understands.
    #[error("catalog schema version {found} is newer than supported version {supported}")]
    SchemaTooNew {
        /// Version found in the catalog
        found: u32,
        /// Highest version this build can open
        supported: u32,
    },

    /// Writer lease could not be acquired within the timeout.
    #[error("writer lock held by {holder} (waited {waited_ms}ms)")]
    LockTimeout {
        /// Holder id recorded in the lease row
        holder: String,
        /// How long acquisition was attempted
        waited_ms: u64,
    },

    /// Another process owns the active-session lock.
    #[error("workspace locked by another process (PID: {pid})")]
    WorkspaceLockHeld {
        /// Process ID holding the lock
        pid: u32,
    },

    /// No session with the given id exists in the catalog.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// No active session exists.
    #[error("no active session")]
    NoActiveSession,

    /// A journal file exists but cannot be parsed.
    #[error("corrupted journal at {}: {}", path.display(), reason)]
    JournalCorrupted {
        /// Path to the journal file
        path: PathBuf,
        /// Description of the corruption
        reason: String,
    },

    /// A manifest references content the blob store no longer has.
    #[error("manifest {session_id} references missing blob {digest}")]
    ManifestIncomplete {
        /// The session whose manifest is incomplete
        session_id: String,
        /// The digest that could not be resolved
        digest: String,
    },

    /// Configuration error (loading, parsing, invalid values).
    #[error("configuration error: {0}")]
    Config(String),
}

impl SbError {
    /// Returns a user-friendly recovery suggestion for the error, if available.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Self::CorruptedBlob { .. } | Self::HashMismatch { .. } => {
                Some("The blob store has a damaged object. Run 'sback gc' after resolving; rollbacks that need this content will refuse to run.")
            }
            Self::BlobNotFound(_) | Self::ManifestIncomplete { .. } => {
                Some("History data is missing content. The session can no longer be rolled back; consider 'sback delete <session>' to drop it.")
            }
            Self::WorkspaceLockHeld { .. } => {
                Some("Another process is recording this workspace. Stop it first, or remove the stale LOCK file if the process is dead.")
            }
            Self::LockTimeout { .. } => {
                Some("The catalog writer is busy. Retry shortly; if this persists, check for a hung sback process.")
            }
            Self::JournalCorrupted { .. } => {
                Some("Run 'sback recover' to sweep journals; an unreadable journal is set aside rather than replayed.")
            }
            Self::SessionNotFound(_) => Some("Run 'sback list' to see recorded sessions."),
            Self::NoActiveSession => None,
            _ => None,
        }
    }

    /// Maps an I/O error, promoting out-of-space conditions to `StorageFull`.
    pub(crate) fn from_io(e: std::io::Error) -> Self {
        #[cfg(unix)]
        {
            // ENOSPC
            if e.raw_os_error() == Some(28) {
                return Self::StorageFull(e.to_string());
            }
        }
        Self::Io(e)
    }
}

/// Convenience Result type for sback_core operations.
pub type Result<T> = std::result::Result<T, SbError>;
