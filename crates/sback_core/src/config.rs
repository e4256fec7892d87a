//! Configuration for the history engine.

use crate::error::{Result, SbError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Comprehensive configuration, persisted as `config.toml` in the data dir.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Session boundary and buffering knobs.
    #[serde(default)]
    pub session: SessionConfig,

    /// Near-duplicate session suppression.
    #[serde(default)]
    pub dedup: DedupConfig,

    /// Blob storage knobs.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Rollback journal retention and sweeping.
    #[serde(default)]
    pub journal: JournalConfig,

    /// Paths never tracked.
    #[serde(default)]
    pub ignore: IgnoreConfig,

    /// Session tagging thresholds.
    #[serde(default)]
    pub tags: TagConfig,
}

impl Config {
    /// Loads configuration from `<data_dir>/config.toml`, falling back to
    /// defaults when the file is absent.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join("config.toml");
        if path.exists() {
            let content = fs::read_to_string(&path)
                .map_err(|e| SbError::Config(format!("failed to read config: {}", e)))?;
            toml::from_str(&content)
                .map_err(|e| SbError::Config(format!("failed to parse config: {}", e)))
        } else {
            Ok(Config::default())
        }
    }

    /// Saves configuration to `<data_dir>/config.toml`.
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let path = data_dir.join("config.toml");
        let content = toml::to_string_pretty(self)
            .map_err(|e| SbError::Config(format!("failed to serialize config: {}", e)))?;
        fs::write(&path, content)
            .map_err(|e| SbError::Config(format!("failed to write config: {}", e)))?;
        Ok(())
    }
}

/// Session boundary detection and buffering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Inactivity gap that triggers idle-finalize (default: 105 s).
    pub idle_ms: u64,

    /// Idle sessions with zero changes younger than this are discarded
    /// rather than finalized (default: 5 s).
    pub min_session_duration_ms: u64,

    /// Hard session duration cap (default: 1 h).
    pub max_session_duration_ms: u64,

    /// Buffer size that forces an intermediate scratch flush (default: 50).
    pub flush_batch_size: usize,

    /// Timer-based scratch flush cadence (default: 5 s).
    pub flush_interval_ms: u64,

    /// Bounded wait for the catalog writer lease (default: 5 s).
    pub lock_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_ms: 105_000,
            min_session_duration_ms: 5_000,
            max_session_duration_ms: 3_600_000,
            flush_batch_size: 50,
            flush_interval_ms: 5_000,
            lock_timeout_ms: 5_000,
        }
    }
}

/// Near-duplicate session suppression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// How recent a matching fingerprint must be to suppress (default: 5 min).
    pub window_ms: u64,

    /// Sessions with fewer changes than this are always persisted (default: 5).
    pub min_files: usize,

    /// LRU capacity for recent fingerprints (default: 100).
    pub cache_size: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_ms: 300_000,
            min_files: 5,
            cache_size: 100,
        }
    }
}

/// Blob storage knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// zstd compression level (default: 3).
    pub compression_level: i32,

    /// Delay before zero-reference blobs are physically collected
    /// (default: 24 h).
    pub blob_grace_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            compression_level: 3,
            blob_grace_ms: 86_400_000,
        }
    }
}

/// Rollback journal retention and sweeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    /// Age at which committed journals are pruned (default: 7 d).
    pub retention_ms: u64,

    /// Whether the sweeper walks the workspace for orphan `.bak-*` files
    /// (default: true).
    pub sweep_orphan_backups: bool,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            retention_ms: 604_800_000,
            sweep_orphan_backups: true,
        }
    }
}

/// Glob patterns never tracked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IgnoreConfig {
    /// Glob patterns matched against the stored relative path.
    pub patterns: Vec<String>,
}

impl Default for IgnoreConfig {
    fn default() -> Self {
        Self {
            patterns: vec![
                "**/node_modules/**".into(),
                "**/target/**".into(),
                "**/.git/**".into(),
                "**/dist/**".into(),
                "**/build/**".into(),
                "**/out/**".into(),
                "**/vendor/**".into(),
                "**/__pycache__/**".into(),
                "**/*.log".into(),
            ],
        }
    }
}

/// Session tagging thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagConfig {
    /// Duration above which a session is tagged `long-session` (default: 30 min).
    pub long_session_ms: u64,

    /// Duration below which a session is tagged `short-session` (default: 60 s).
    pub short_session_ms: u64,

    /// Added-lines total above which a session is tagged `large-edits`
    /// (default: 1000).
    pub large_edit_lines: u64,

    /// Distinct-path count above which a session is tagged `multi-file`
    /// (default: 5).
    pub multi_file_paths: usize,

    /// Events-per-minute above which a session is tagged `burst`
    /// (default: 30).
    pub burst_events_per_min: u32,
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            long_session_ms: 1_800_000,
            short_session_ms: 60_000,
            large_edit_lines: 1_000,
            multi_file_paths: 5,
            burst_events_per_min: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_design_values() {
        let config = Config::default();
        assert_eq!(config.session.idle_ms, 105_000);
        assert_eq!(config.session.max_session_duration_ms, 3_600_000);
        assert_eq!(config.dedup.window_ms, 300_000);
        assert_eq!(config.dedup.min_files, 5);
        assert_eq!(config.dedup.cache_size, 100);
        assert_eq!(config.storage.blob_grace_ms, 86_400_000);
        assert_eq!(config.journal.retention_ms, 604_800_000);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = Config::load(tmp.path()).unwrap();
        assert_eq!(config.session.flush_batch_size, 50);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.session.idle_ms = 42;
        config.ignore.patterns = vec!["**/skip/**".into()];
        config.save(tmp.path()).unwrap();

        let loaded = Config::load(tmp.path()).unwrap();
        assert_eq!(loaded.session.idle_ms, 42);
        assert_eq!(loaded.ignore.patterns, vec!["**/skip/**".to_string()]);
    }

    #[test]
    fn test_partial_file_fills_missing_sections() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "[dedup]\nwindow_ms = 1\nmin_files = 2\ncache_size = 3\n",
        )
        .unwrap();

        let loaded = Config::load(tmp.path()).unwrap();
        assert_eq!(loaded.dedup.window_ms, 1);
        assert_eq!(loaded.session.idle_ms, 105_000);
    }
}
