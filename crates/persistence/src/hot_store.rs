//! Local hot-tier store: one state document at a fixed path, written with
//! atomic replace (spec §5 "Shared resources": write to temp, fsync, rename).

use std::path::PathBuf;

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::document::StateDocument;
use crate::error::Result;

pub struct HotStore {
    path: PathBuf,
}

impl HotStore {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Loads the document if the file exists and parses, otherwise `None`.
    /// A corrupt file is logged and treated as missing rather than
    /// propagated, since durable or empty state is a safe fallback.
    pub fn load(&self) -> Result<Option<StateDocument>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&self.path)?;
        match serde_json::from_slice(&bytes) {
            Ok(document) => Ok(Some(document)),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "hot state file corrupt, ignoring");
                Ok(None)
            }
        }
    }

    /// Writes `document` via write-temp + fsync + rename in the same
    /// directory as the target path, so the rename is atomic on the same
    /// filesystem.
    pub fn save(&self, document: &StateDocument) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        std::fs::create_dir_all(dir)?;

        let mut temp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut temp, document)?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| e.error)?;

        debug!(path = %self.path.display(), "wrote hot state");
        Ok(())
    }
}
