//! JSON state file with atomic replacement.

use ledgerbridge_engine::SyncState;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// State file errors. Messages never include the file contents.
#[derive(Debug, thiserror::Error)]
pub enum StateFileError {
    #[error("Failed to read state file: {0}")]
    Read(#[source] std::io::Error),

    #[error("Failed to write state file: {0}")]
    Write(#[source] std::io::Error),

    #[error("State file is corrupt: {0}")]
    Corrupt(#[source] ledgerbridge_engine::Error),
}

/// The sync state on disk.
///
/// Saving writes a sibling temp file, fsyncs it and renames it over the
/// target, so a crash leaves either the old or the new state, never a torn
/// file.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Load the state. A missing file is the empty state of a first run; an
    /// unreadable or unparseable file is an error and is left untouched.
    pub async fn load(&self) -> Result<SyncState, StateFileError> {
        match fs::read_to_string(&self.path).await {
            Ok(json) => SyncState::from_json(&json).map_err(StateFileError::Corrupt),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(SyncState::new()),
            Err(e) => Err(StateFileError::Read(e)),
        }
    }

    /// Atomically replace the file with `state`.
    pub async fn save(&self, state: &SyncState) -> Result<(), StateFileError> {
        let json = state.to_json_pretty().map_err(StateFileError::Corrupt)?;
        let temp_path = self.temp_path();

        let write = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(json.as_bytes()).await?;
            file.write_all(b"\n").await?;
            file.sync_all().await?;
            drop(file);
            // Atomic replace (rename is atomic on POSIX)
            fs::rename(&temp_path, &self.path).await
        };

        if let Err(e) = write.await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StateFileError::Write(e));
        }
        Ok(())
    }
}
