//! `sback init`: set up the data directory.

use crate::exit;
use anyhow::Result;
use console::style;
use sback_core::Config;
use std::path::Path;

pub fn run(workspace: &Path, data_dir: &Path) -> Result<u8> {
    let fresh = !data_dir.join("config.toml").exists();
    std::fs::create_dir_all(data_dir)?;

    if fresh {
        Config::default().save(data_dir)?;
    }

    // Opening creates the catalog and journal areas.
    let engine = super::open_engine(workspace, data_dir)?;

    if fresh {
        println!(
            "{} snapback data directory at {}",
            style("Initialized").green().bold(),
            data_dir.display()
        );
    } else {
        println!(
            "{} data directory at {}",
            style("Reusing").yellow(),
            data_dir.display()
        );
    }
    println!("workspace key: {}", engine.workspace_key());
    Ok(exit::OK)
}
