//! Local JSON-array sink

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{Sink, SinkError, WriteOutcome};
use crate::config::FileConfig;
use crate::mapping::ValidatedEntity;

#[derive(Default)]
struct FileState {
    writer: Option<BufWriter<File>>,
    written: u64,
    finalized: bool,
}

/// Writes every entity as one element of a single JSON array
///
/// The file is created with `[` on the first write and closed with `]` on
/// finalize. One lock serializes every write.
pub struct FileSink {
    path: Option<PathBuf>,
    add_blank_line: bool,
    state: Mutex<FileState>,
}

impl FileSink {
    pub fn new(path: Option<PathBuf>, add_blank_line: bool) -> Self {
        debug!(?path, add_blank_line, "FileSink::new: called");
        Self {
            path,
            add_blank_line,
            state: Mutex::new(FileState::default()),
        }
    }

    pub fn from_config(config: &FileConfig) -> Self {
        Self::new(config.path.clone(), config.add_blank_line)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn open(path: &Path) -> Result<BufWriter<File>, SinkError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut writer = BufWriter::new(File::create(path).await?);
        writer.write_all(b"[").await?;
        Ok(writer)
    }

    async fn append(&self, state: &mut FileState, path: &Path, entity: &ValidatedEntity) -> Result<(), SinkError> {
        if state.finalized {
            return Err(SinkError::Config("file sink already finalized".to_string()));
        }
        let json = serde_json::to_vec(entity)?;
        if state.writer.is_none() {
            state.writer = Some(Self::open(path).await?);
        }
        let Some(writer) = state.writer.as_mut() else {
            return Err(SinkError::Config("file sink not open".to_string()));
        };
        if state.written > 0 {
            writer.write_all(b",").await?;
        }
        writer.write_all(&json).await?;
        if self.add_blank_line {
            writer.write_all(b"\n").await?;
        }
        state.written += 1;
        Ok(())
    }
}

#[async_trait]
impl Sink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn write(&self, ordinal: u64, entity: &ValidatedEntity) -> WriteOutcome {
        let Some(path) = &self.path else {
            debug!(ordinal, "FileSink::write: no output path, nothing written");
            return WriteOutcome::Skipped;
        };

        let mut state = self.state.lock().await;
        match self.append(&mut state, path, entity).await {
            Ok(()) => {
                debug!(ordinal, id = %entity.id, "FileSink::write: written");
                WriteOutcome::Created
            }
            Err(e) => WriteOutcome::Failed(e.to_string()),
        }
    }

    async fn finalize(&self) -> Result<(), SinkError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut state = self.state.lock().await;
        if state.finalized {
            return Ok(());
        }
        let mut writer = match state.writer.take() {
            Some(writer) => writer,
            None => Self::open(path).await?,
        };
        writer.write_all(b"]").await?;
        writer.flush().await?;
        writer.into_inner().sync_all().await?;
        state.finalized = true;

        info!(?path, written = state.written, "Output file closed");
        Ok(())
    }
}
