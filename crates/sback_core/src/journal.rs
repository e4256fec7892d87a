//! Rollback journal files under `.sb_journal/`.

use crate::error::{Result, SbError};
use crate::types::JournalEntry;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Directory name of the journal area inside the data dir.
pub const JOURNAL_DIR: &str = ".sb_journal";

/// Returns the pending-journal directory under `journal_dir`.
pub fn pending_dir(journal_dir: &Path) -> PathBuf {
    journal_dir.join("pending")
}

/// Returns the committed-journal directory under `journal_dir`.
pub fn committed_dir(journal_dir: &Path) -> PathBuf {
    journal_dir.join("committed")
}

/// Path of a session's journal file inside `dir`.
pub fn journal_file(dir: &Path, session_id: &str) -> PathBuf {
    dir.join(format!("{}.json", session_id))
}

/// Creates both journal subdirectories.
pub fn ensure_dirs(journal_dir: &Path) -> Result<()> {
    fs::create_dir_all(pending_dir(journal_dir))?;
    fs::create_dir_all(committed_dir(journal_dir))?;
    Ok(())
}

/// Writes a journal entry atomically (temp file + fsync + rename).
///
/// The journal is rewritten after every backup rename during a rollback,
/// so a crash at any point leaves a parseable file.
pub fn write_entry(path: &Path, entry: &JournalEntry) -> Result<()> {
    let json = serde_json::to_vec_pretty(entry)
        .map_err(|e| SbError::Serialization(e.to_string()))?;

    let tmp_path = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp_path).map_err(SbError::from_io)?;
        file.write_all(&json).map_err(SbError::from_io)?;
        file.sync_all().map_err(SbError::from_io)?;
    }
    fs::rename(&tmp_path, path).map_err(SbError::from_io)?;
    Ok(())
}

/// Reads and parses a journal entry.
///
/// # Errors
///
/// Returns `JournalCorrupted` when the file exists but cannot be parsed.
pub fn read_entry(path: &Path) -> Result<JournalEntry> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| SbError::JournalCorrupted {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
