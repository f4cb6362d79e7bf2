use crate::error::PipelineError;
use crate::storage::history::{HistoryBackend, HistoryLog};
use anyhow::Context;
use std::io::Write;
use std::path::{Path, PathBuf};

/// History persisted as one pretty-printed JSON document keyed by symbol.
#[derive(Debug, Clone)]
pub struct JsonFileHistoryBackend {
    path: PathBuf,
}

impl JsonFileHistoryBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl HistoryBackend for JsonFileHistoryBackend {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    async fn load(&self) -> Result<HistoryLog, PipelineError> {
        let corruption = |detail: String| PipelineError::HistoryCorruption {
            location: self.location(),
            detail,
        };

        let path = self.path.clone();
        let read = tokio::task::spawn_blocking(move || std::fs::read_to_string(path))
            .await
            .map_err(|e| corruption(format!("read task failed: {e}")))?;
        let text = match read {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "no recommendation history yet; starting empty");
                return Ok(HistoryLog::default());
            }
            Err(e) => return Err(corruption(format!("read failed: {e}"))),
        };

        let stored: HistoryLog =
            serde_json::from_str(&text).map_err(|e| corruption(format!("invalid JSON: {e}")))?;
        stored.check_consistency().map_err(corruption)?;

        // Stored order is not trusted; rebuilding sorts each symbol's entries by time.
        HistoryLog::from_entries(stored.iter().cloned().collect()).map_err(corruption)
    }

    async fn persist(&self, log: &HistoryLog) -> anyhow::Result<()> {
        let body = serde_json::to_vec_pretty(log).context("serialize recommendation history failed")?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &body))
            .await
            .context("history write task failed")?
    }
}

/// Writes `body` to a sibling temp file, fsyncs it, then renames it over `path`. Readers see either
/// the previous complete file or the new one.
pub fn write_atomic(path: &Path, body: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let file_name = path
        .file_name()
        .with_context(|| format!("{} has no file name", path.display()))?
        .to_string_lossy();
    let tmp_path = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    let res = (|| -> anyhow::Result<()> {
        let mut f = std::fs::File::create(&tmp_path)
            .with_context(|| format!("failed to create {}", tmp_path.display()))?;
        f.write_all(body)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        f.sync_all()
            .with_context(|| format!("failed to sync {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename {} over {}", tmp_path.display(), path.display()))?;
        Ok(())
    })();

    if res.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    res
}
