use super::MockClock;
use anyhow::{Context, Result};
use sback_core::HistoryEngine;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Manages an isolated workspace plus its data directory.
///
/// The data directory lives beside the workspace, not inside it, so
/// "leaves all other files untouched" assertions can walk the whole tree.
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    /// Create an empty workspace.
    pub fn empty() -> Result<Self> {
        let dir = TempDir::new().context("failed to create temp directory")?;
        fs::create_dir_all(dir.path().join("ws"))?;
        Ok(Self { dir })
    }

    /// Create a workspace with initial files.
    pub fn with_files(files: &[(&str, &[u8])]) -> Result<Self> {
        let workspace = Self::empty()?;
        for (path, content) in files {
            workspace.write_file(path, content)?;
        }
        Ok(workspace)
    }

    /// Workspace root path (canonical, so assertions agree with the
    /// engine's own canonicalized root).
    pub fn root(&self) -> PathBuf {
        self.dir
            .path()
            .join("ws")
            .canonicalize()
            .expect("workspace root exists")
    }

    /// Data directory path.
    pub fn data_dir(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    /// Opens an engine over this workspace with the given clock.
    pub fn engine(&self, clock: &MockClock) -> Result<HistoryEngine> {
        Ok(HistoryEngine::open_with_clock(
            self.root(),
            self.data_dir(),
            clock.as_provider(),
        )?)
    }

    /// Absolute path of a workspace-relative file.
    pub fn abs(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    /// Write a file into the workspace.
    pub fn write_file(&self, rel: &str, content: &[u8]) -> Result<()> {
        let path = self.abs(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directories for {}", rel))?;
        }
        fs::write(&path, content).with_context(|| format!("failed to write {}", rel))?;
        Ok(())
    }

    /// Read a file from the workspace.
    pub fn read_file(&self, rel: &str) -> Result<Vec<u8>> {
        fs::read(self.abs(rel)).with_context(|| format!("failed to read {}", rel))
    }

    /// Check if a workspace file exists.
    pub fn file_exists(&self, rel: &str) -> bool {
        self.abs(rel).exists()
    }

    /// Delete a workspace file.
    pub fn remove_file(&self, rel: &str) -> Result<()> {
        fs::remove_file(self.abs(rel)).with_context(|| format!("failed to remove {}", rel))
    }

    /// All `*.bak-*` files anywhere in the workspace tree.
    pub fn backup_files(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        collect_backups(&self.root(), &mut out);
        out
    }
}

fn collect_backups(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_dir() {
            collect_backups(&path, out);
        } else if path
            .file_name()
            .map(|n| n.to_string_lossy().contains(".bak-"))
            .unwrap_or(false)
        {
            out.push(path);
        }
    }
}
