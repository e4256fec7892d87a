//! `sback rollback`: revert a recorded session.

use crate::exit;
use anyhow::Result;
use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use sback_core::RollbackOptions;
use std::path::Path;

pub fn run(
    workspace: &Path,
    data_dir: &Path,
    session_id: &str,
    dry_run: bool,
    skip_verification: bool,
    yes: bool,
) -> Result<u8> {
    let mut engine = super::open_engine(workspace, data_dir)?;
    let session_id = super::resolve_session_id(&engine, session_id)?;
    let manifest = engine.get_manifest(&session_id)?;

    println!(
        "{} {} ({}, {} changes, {})",
        style("Reverting").bold(),
        manifest.name,
        &session_id[..session_id.len().min(8)],
        manifest.change_count,
        super::format_ts(manifest.started_at),
    );

    if !yes && !dry_run && !confirm()? {
        println!("aborted");
        return Ok(exit::OK);
    }

    let bar = ProgressBar::new(manifest.change_count as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg:8} [{bar:30}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let bar_ref = bar.clone();
    let progress = move |current: usize, total: usize, phase: &str| {
        bar_ref.set_length(total as u64);
        bar_ref.set_position(current as u64);
        bar_ref.set_message(phase.to_string());
    };

    let options = RollbackOptions {
        dry_run,
        skip_verification,
    };
    let outcome = engine.rollback(&session_id, &options, Some(&progress));
    bar.finish_and_clear();
    let outcome = outcome?;

    if dry_run {
        println!("{} would revert:", style("dry-run").yellow().bold());
        for path in &outcome.files_reverted {
            println!("  {}", path);
        }
        for skip in &outcome.files_skipped {
            println!("  {} {} ({})", style("skip").red(), skip.path, skip.reason);
        }
        return Ok(exit::OK);
    }

    for path in &outcome.files_reverted {
        println!("  {} {}", style("reverted").green(), path);
    }
    for skip in &outcome.files_skipped {
        println!(
            "  {} {} ({})",
            style("skipped").red().bold(),
            skip.path,
            skip.reason
        );
    }
    for error in &outcome.errors {
        eprintln!("warning: {}", error);
    }

    if !outcome.success || !outcome.files_skipped.is_empty() {
        println!(
            "{}: {} reverted, {} skipped",
            style("partial rollback").red().bold(),
            outcome.files_reverted.len(),
            outcome.files_skipped.len()
        );
        return Ok(exit::PARTIAL_ROLLBACK);
    }

    println!(
        "{}: {} file{} restored",
        style("done").green().bold(),
        outcome.files_reverted.len(),
        if outcome.files_reverted.len() == 1 { "" } else { "s" }
    );
    Ok(exit::OK)
}

fn confirm() -> Result<bool> {
    let term = Term::stderr();
    term.write_str("proceed? [y/N] ")?;
    let answer = term.read_line()?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
