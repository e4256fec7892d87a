//! `sback show`: one session manifest in detail.

use crate::exit;
use anyhow::Result;
use console::style;
use std::path::Path;

pub fn run(workspace: &Path, data_dir: &Path, session_id: &str, json: bool) -> Result<u8> {
    let engine = super::open_engine(workspace, data_dir)?;
    let session_id = super::resolve_session_id(&engine, session_id)?;
    let manifest = engine.get_manifest(&session_id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&manifest.wire_json())?);
        return Ok(exit::OK);
    }

    println!("{} {}", style("session").bold(), manifest.session_id);
    println!("name:     {}", manifest.name);
    println!(
        "when:     {} .. {}",
        super::format_ts(manifest.started_at),
        super::format_ts(manifest.ended_at)
    );
    println!(
        "triggers: {}",
        manifest
            .triggers
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    if !manifest.tags.is_empty() {
        println!("tags:     {}", manifest.tags.join(", "));
    }
    println!("changes:  {}", manifest.change_count);

    for change in &manifest.changes {
        let detail = match (&change.from_path, change.size_after) {
            (Some(from), _) => format!("  (from {})", from),
            (None, Some(size)) => format!("  ({} bytes)", size),
            _ => String::new(),
        };
        println!(
            "  {:<8} {}{}",
            style(change.op.to_string()).yellow(),
            change.path,
            style(detail).dim()
        );
    }
    Ok(exit::OK)
}
