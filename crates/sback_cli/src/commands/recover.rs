//! `sback recover`: run the recovery sweeper.

use crate::exit;
use anyhow::Result;
use console::style;
use std::path::Path;

pub fn run(workspace: &Path, data_dir: &Path) -> Result<u8> {
    // Opening already sweeps once; run again so the user sees a report for
    // this invocation specifically.
    let mut engine = super::open_engine(workspace, data_dir)?;
    let report = engine.recover()?;

    if !report.did_work() && report.errors.is_empty() {
        println!("{}", style("nothing to recover").green());
        return Ok(exit::OK);
    }

    println!("journals replayed:  {}", report.journals_replayed);
    println!("journals unwound:   {}", report.journals_unwound);
    println!("journals discarded: {}", report.journals_discarded);
    println!("backups restored:   {}", report.backups_restored);
    println!("committed pruned:   {}", report.committed_pruned);
    println!("orphans removed:    {}", report.orphans_removed);
    for error in &report.errors {
        eprintln!("warning: {}", error);
    }
    Ok(exit::OK)
}
