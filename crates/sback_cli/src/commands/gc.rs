//! `sback gc`: collect unreferenced blobs.

use crate::exit;
use anyhow::Result;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;

pub fn run(workspace: &Path, data_dir: &Path, dry_run: bool) -> Result<u8> {
    let mut engine = super::open_engine(workspace, data_dir)?;

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg:6} [{bar:30}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let bar_ref = bar.clone();
    let progress = move |current: usize, total: usize, phase: &str| {
        bar_ref.set_length(total as u64);
        bar_ref.set_position(current as u64);
        bar_ref.set_message(phase.to_string());
    };

    let report = engine.gc(dry_run, Some(&progress));
    bar.finish_and_clear();
    let report = report?;

    let verb = if dry_run { "would delete" } else { "deleted" };
    println!(
        "{}: {} of {} candidate blob{}, {} freed",
        style(verb).bold(),
        report.deleted,
        report.candidates,
        if report.candidates == 1 { "" } else { "s" },
        human_bytes(report.bytes_freed),
    );
    for error in &report.errors {
        eprintln!("warning: {}", error);
    }
    Ok(exit::OK)
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
