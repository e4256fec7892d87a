//! `sback delete`: drop a recorded session.

use crate::exit;
use anyhow::Result;
use console::style;
use std::path::Path;

pub fn run(workspace: &Path, data_dir: &Path, session_id: &str) -> Result<u8> {
    let mut engine = super::open_engine(workspace, data_dir)?;
    let session_id = super::resolve_session_id(&engine, session_id)?;

    if engine.delete_session(&session_id)? {
        println!(
            "{} session {} (its content is reclaimed by the next gc)",
            style("Deleted").green().bold(),
            &session_id[..session_id.len().min(8)]
        );
    } else {
        println!("session {} was already gone", session_id);
    }
    Ok(exit::OK)
}
