//! `sback stats`: blob store statistics.

use crate::exit;
use anyhow::Result;
use std::path::Path;

pub fn run(workspace: &Path, data_dir: &Path) -> Result<u8> {
    let engine = super::open_engine(workspace, data_dir)?;
    let stats = engine.stats()?;

    println!("blobs:        {}", stats.total_blobs);
    println!("uncompressed: {} bytes", stats.total_uncompressed);
    println!("on disk:      {} bytes", stats.total_compressed);
    println!(
        "ratio:        {:.1}%",
        stats.compression_ratio() * 100.0
    );
    Ok(exit::OK)
}
