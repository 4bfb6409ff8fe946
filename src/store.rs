//! Atomic single-file snapshot persistence. A single rolling AddrMan table
//! has no need for a full LSM store, so this follows the
//! write-tmp-then-rename pattern with `bincode`+`serde`, applied to one
//! flat file instead of a database.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::addrman::Snapshot;
use crate::error::StoreError;

pub struct AddressStore {
    path: PathBuf,
}

impl AddressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load a snapshot from disk. A missing file is not an error — a brand
    /// new node has nothing to load yet — but a present, corrupt file is.
    pub fn load(&self) -> Result<Option<Snapshot>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&self.path)?;
        if bytes.is_empty() {
            warn!(path = %self.path.display(), "snapshot file is empty, starting fresh");
            return Ok(None);
        }
        let snapshot: Snapshot = bincode::deserialize(&bytes)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        info!(path = %self.path.display(), peers = snapshot.entries.len(), "loaded addrman snapshot");
        Ok(Some(snapshot))
    }

    /// Serialize `snapshot` to a temp file in the same directory, then
    /// atomically rename it over the target path, so a crash mid-write never
    /// leaves a half-written snapshot in place of a good one.
    pub fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let bytes = bincode::serialize(snapshot)?;
        let tmp_path = Self::tmp_path(&self.path);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        {
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        info!(path = %self.path.display(), peers = snapshot.entries.len(), "saved addrman snapshot");
        Ok(())
    }

    fn tmp_path(path: &Path) -> PathBuf {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }
}
