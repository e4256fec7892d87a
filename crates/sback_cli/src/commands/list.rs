//! `sback list`: recorded sessions, newest first.

use crate::exit;
use anyhow::Result;
use console::style;
use std::path::Path;

pub fn run(workspace: &Path, data_dir: &Path, limit: usize, json: bool) -> Result<u8> {
    let engine = super::open_engine(workspace, data_dir)?;
    let sessions = engine.list(limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(exit::OK);
    }

    if sessions.is_empty() {
        println!("no sessions recorded");
        return Ok(exit::OK);
    }

    for session in sessions {
        let short_id = &session.session_id[..session.session_id.len().min(8)];
        let tags = if session.tags.is_empty() {
            String::new()
        } else {
            format!("  [{}]", session.tags.join(", "))
        };
        println!(
            "{}  {}  {:>4} change{}  {}{}",
            style(short_id).cyan(),
            super::format_ts(session.started_at),
            session.change_count,
            if session.change_count == 1 { "" } else { "s" },
            session.name,
            style(tags).dim(),
        );
    }
    Ok(exit::OK)
}
