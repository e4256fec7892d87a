//! Command implementations.

pub mod delete;
pub mod gc;
pub mod init;
pub mod list;
pub mod recover;
pub mod rollback;
pub mod show;
pub mod stats;

use anyhow::{bail, Context, Result};
use sback_core::HistoryEngine;
use std::path::Path;

/// How many sessions prefix resolution searches through.
const RESOLVE_SCAN_LIMIT: usize = 500;

pub(crate) fn open_engine(workspace: &Path, data_dir: &Path) -> Result<HistoryEngine> {
    HistoryEngine::open(workspace, data_dir).with_context(|| {
        format!(
            "failed to open history for workspace {}",
            workspace.display()
        )
    })
}

/// Resolves a full session id or a unique prefix.
pub(crate) fn resolve_session_id(engine: &HistoryEngine, needle: &str) -> Result<String> {
    let sessions = engine.list(RESOLVE_SCAN_LIMIT)?;

    if sessions.iter().any(|s| s.session_id == needle) {
        return Ok(needle.to_string());
    }

    let matches: Vec<&str> = sessions
        .iter()
        .filter(|s| s.session_id.starts_with(needle))
        .map(|s| s.session_id.as_str())
        .collect();

    match matches.as_slice() {
        [] => bail!(sback_core::SbError::SessionNotFound(needle.to_string())),
        [only] => Ok(only.to_string()),
        many => bail!(
            "session id prefix '{}' is ambiguous ({} matches)",
            needle,
            many.len()
        ),
    }
}

/// Formats an epoch-ms timestamp for terminal output.
pub(crate) fn format_ts(epoch_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(epoch_ms)
        .map(|dt| {
            dt.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| epoch_ms.to_string())
}
