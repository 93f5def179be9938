//! Shard metadata file.
//!
//! `metadata.json` holds the shard identity and mode plus a dirty flag that
//! is set while the shard is open. Finding it set on open means the previous
//! run did not close cleanly and the metabase may be stale.

use crate::ShardMode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;
use vaultio_core::Result;

pub(crate) const METADATA_FILE: &str = "metadata.json";

/// Persisted shard metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct ShardMetadata {
    pub id: Uuid,
    pub mode: ShardMode,
    pub dirty: bool,
}

impl ShardMetadata {
    /// Load the metadata file, or create a fresh identity when absent.
    pub fn load_or_create(dir: &Path, read_only: bool) -> Result<Self> {
        let path = dir.join(METADATA_FILE);
        if path.exists() {
            let data = std::fs::read(&path)?;
            return Ok(serde_json::from_slice(&data)?);
        }

        Ok(Self {
            id: Uuid::new_v4(),
            mode: if read_only {
                ShardMode::ReadOnly
            } else {
                ShardMode::ReadWrite
            },
            dirty: false,
        })
    }

    /// Persist the metadata file.
    pub fn store(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(dir.join(METADATA_FILE), data)?;
        Ok(())
    }
}
