use std::fs;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use crate::asset::Asset;
use crate::identity;
use crate::result::MetricResult;

/// External key-value cache mapping (asset, computation identity) to a
/// previously computed result.
///
/// Implementations must be safe for concurrent access across distinct
/// keys; write-write races on the *same* key are prevented by the
/// per-asset lock, not by the store.
pub trait ResultStore: Send + Sync {
    fn load(&self, asset: &Asset, computation_id: &str) -> Result<Option<MetricResult>>;

    fn save(&self, result: &MetricResult) -> Result<()>;

    fn delete(&self, asset: &Asset, computation_id: &str) -> Result<()>;
}

/// Result cache backed by one JSON document per entry, laid out as
/// `<root>/<computation_id>/<sha1-of-asset-string>.json`.
pub struct FileSystemResultStore {
    root: PathBuf,
}

impl FileSystemResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn entry_path(&self, asset_string: &str, computation_id: &str) -> PathBuf {
        self.root
            .join(computation_id)
            .join(format!("{}.json", identity::sha1_hex(asset_string)))
    }
}

impl ResultStore for FileSystemResultStore {
    fn load(&self, asset: &Asset, computation_id: &str) -> Result<Option<MetricResult>> {
        let path = self.entry_path(&asset.canonical_string(), computation_id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read cache entry: {}", path.display()))
            }
        };

        let result: MetricResult = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse cache entry: {}", path.display()))?;
        debug!(path = %path.display(), "cache entry loaded");
        Ok(Some(result))
    }

    fn save(&self, result: &MetricResult) -> Result<()> {
        let path = self.entry_path(&result.asset_string, &result.computation_id);
        let parent = path
            .parent()
            .context("cache entry path has no parent directory")?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create cache directory: {}", parent.display()))?;

        let encoded =
            serde_json::to_string_pretty(result).context("failed to serialize cache entry")?;
        fs::write(&path, encoded)
            .with_context(|| format!("failed to write cache entry: {}", path.display()))?;
        debug!(path = %path.display(), "cache entry saved");
        Ok(())
    }

    fn delete(&self, asset: &Asset, computation_id: &str) -> Result<()> {
        let path = self.entry_path(&asset.canonical_string(), computation_id);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "cache entry deleted");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("failed to delete cache entry: {}", path.display()))
            }
        }
    }
}
