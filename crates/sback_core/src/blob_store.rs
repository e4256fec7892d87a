//! Content-addressed blob storage with integrity verification.

use crate::catalog::{BlobMeta, BlobStats, CatalogStore};
use crate::digest::Digest;
use crate::error::{Result, SbError};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Maximum size for a single blob (100 MB).
/// This prevents OOM from pathological inputs the watcher might hand us.
const MAX_BLOB_SIZE: usize = 100 * 1024 * 1024;

/// Default zstd compression level; fast with a reasonable ratio.
const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Digest algorithm identifier recorded with every blob.
const ALGO: &str = "sha256";

/// Progress callback for GC: (current, total, phase).
pub type GcProgressCallback = dyn Fn(usize, usize, &str);

/// Options for a blob garbage collection pass.
#[derive(Debug, Clone)]
pub struct GcOptions {
    /// Report what would be deleted without deleting.
    pub dry_run: bool,
    /// Keep zero-reference blobs younger than this many milliseconds.
    pub grace_ms: u64,
}

impl Default for GcOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            grace_ms: 86_400_000,
        }
    }
}

/// Report from a blob garbage collection pass.
#[derive(Debug, Default)]
pub struct GcReport {
    /// Zero-reference blobs considered.
    pub candidates: usize,
    /// Blobs deleted (or that would be, under dry-run).
    pub deleted: usize,
    /// On-disk bytes freed.
    pub bytes_freed: u64,
    /// Non-fatal errors encountered.
    pub errors: Vec<String>,
}

/// Content-addressed blob store.
///
/// Every file version is stored once, as a zstd-compressed file whose path
/// is derived from the SHA-256 of the *uncompressed* bytes:
/// `<root>/sha256/aa/bb/<full-digest>.zst`. Reads re-verify the digest, so
/// corruption is detected before content ever reaches a rollback.
///
/// Metadata and refcounts live in the catalog; the store itself never
/// interprets session semantics.
pub struct BlobStore {
    root: PathBuf,
    compression_level: i32,
    time: Arc<dyn Fn() -> i64 + Send + Sync>,
}

impl BlobStore {
    /// Creates a store rooted at the given directory (created lazily).
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            time: Arc::new(crate::now_ms),
        }
    }

    /// Overrides the zstd compression level.
    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    /// Sets a custom time provider (epoch ms) used for blob `created_at`.
    pub fn with_time_provider(
        mut self,
        provider: impl Fn() -> i64 + Send + Sync + 'static,
    ) -> Self {
        self.time = Arc::new(provider);
        self
    }

    /// Returns the root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stores bytes and returns their digest.
    ///
    /// Idempotent: if the blob already exists this is a no-op that leaves
    /// its refcount untouched. New blobs are recorded in the catalog with
    /// `ref_count = 0`; references are taken when a manifest that mentions
    /// the digest becomes durable.
    ///
    /// # Errors
    ///
    /// Returns `BlobTooLarge`, `Compression`, `StorageFull`, or `Io`.
    pub fn put(&self, catalog: &dyn CatalogStore, data: &[u8]) -> Result<Digest> {
        if data.len() > MAX_BLOB_SIZE {
            return Err(SbError::BlobTooLarge {
                size: data.len(),
                limit: MAX_BLOB_SIZE,
            });
        }

        let digest = Digest::of(data);
        let path = self.blob_path(&digest);

        if path.exists() {
            // Already stored; make sure the metadata row exists too.
            let compressed_size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            catalog.record_blob(&digest, &self.meta(data.len() as u64, compressed_size))?;
            return Ok(digest);
        }

        let compressed = zstd::encode_all(data, self.compression_level)
            .map_err(|e| SbError::Compression(e.to_string()))?;

        self.write_atomic(&path, &compressed)?;
        catalog.record_blob(&digest, &self.meta(data.len() as u64, compressed.len() as u64))?;

        debug!(digest = %digest, size = data.len(), "stored blob");
        Ok(digest)
    }

    /// Retrieves and verifies a blob.
    ///
    /// # Errors
    ///
    /// Returns `BlobNotFound` if the digest has no file, `Decompression`
    /// if the stored bytes cannot be inflated, and `HashMismatch` if the
    /// inflated bytes do not hash back to `digest`. An integrity failure is
    /// always distinguishable from absence.
    pub fn get(&self, digest: &Digest) -> Result<Vec<u8>> {
        let path = self.blob_path(digest);
        if !path.exists() {
            return Err(SbError::BlobNotFound(digest.as_hex()));
        }

        let compressed = fs::read(&path)?;
        let data = zstd::decode_all(compressed.as_slice())
            .map_err(|e| SbError::Decompression(e.to_string()))?;

        let actual = Digest::of(&data);
        if actual != *digest {
            return Err(SbError::HashMismatch {
                expected: digest.as_hex(),
                actual: actual.as_hex(),
            });
        }

        Ok(data)
    }

    /// Cheap existence check.
    pub fn has(&self, digest: &Digest) -> bool {
        self.blob_path(digest).exists()
    }

    /// Increments a blob's refcount (serialized through the catalog writer).
    pub fn inc_ref(&self, catalog: &dyn CatalogStore, digest: &Digest, n: u64) -> Result<()> {
        catalog.inc_ref(digest, n)
    }

    /// Decrements a blob's refcount. Reaching zero does not delete the
    /// blob; physical deletion is deferred to [`BlobStore::gc`].
    pub fn dec_ref(&self, catalog: &dyn CatalogStore, digest: &Digest, n: u64) -> Result<()> {
        catalog.dec_ref(digest, n)
    }

    /// Deletes blobs whose refcount is zero and whose age exceeds the
    /// grace window.
    pub fn gc(
        &self,
        catalog: &dyn CatalogStore,
        options: &GcOptions,
        progress: Option<&GcProgressCallback>,
    ) -> Result<GcReport> {
        let mut report = GcReport::default();
        let cutoff = (self.time)() - options.grace_ms as i64;
        let candidates = catalog.zero_ref_blobs(cutoff)?;
        report.candidates = candidates.len();
        let total = candidates.len();

        for (idx, (digest, meta)) in candidates.into_iter().enumerate() {
            if let Some(cb) = progress {
                cb(idx + 1, total, "sweep");
            }

            if options.dry_run {
                report.deleted += 1;
                report.bytes_freed += meta.compressed_size;
                continue;
            }

            let path = self.blob_path(&digest);
            if path.exists() {
                if let Err(e) = fs::remove_file(&path) {
                    report
                        .errors
                        .push(format!("failed to delete {}: {}", digest, e));
                    continue;
                }
            }
            catalog.remove_blob(&digest)?;
            report.deleted += 1;
            report.bytes_freed += meta.compressed_size;
        }

        if !report.errors.is_empty() {
            warn!(errors = report.errors.len(), "blob gc finished with errors");
        }
        Ok(report)
    }

    /// Aggregate statistics for the store.
    pub fn stats(&self, catalog: &dyn CatalogStore) -> Result<BlobStats> {
        catalog.blob_stats()
    }

    /// Computes the filesystem path for a digest.
    fn blob_path(&self, digest: &Digest) -> PathBuf {
        let (aa, bb) = digest.shard();
        self.root
            .join(ALGO)
            .join(aa)
            .join(bb)
            .join(format!("{}.zst", digest.as_hex()))
    }

    fn meta(&self, size: u64, compressed_size: u64) -> BlobMeta {
        BlobMeta {
            size,
            compressed_size,
            algo: ALGO.to_string(),
            ref_count: 0,
            created_at: (self.time)(),
        }
    }

    /// Atomic publish: temp file + fsync + rename, then fsync the dir.
    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let dir = path.parent().expect("blob path has a parent");
        fs::create_dir_all(dir).map_err(SbError::from_io)?;

        let tmp_path = path.with_extension("tmp");
        {
            let mut file = File::create(&tmp_path).map_err(SbError::from_io)?;
            file.write_all(bytes).map_err(SbError::from_io)?;
            file.sync_all().map_err(SbError::from_io)?;
        }
        fs::rename(&tmp_path, path).map_err(SbError::from_io)?;

        #[cfg(unix)]
        {
            if let Ok(dir_file) = File::open(dir) {
                let _ = dir_file.sync_all();
            }
        }

        Ok(())
    }
}
