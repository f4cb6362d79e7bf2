use anyhow::Context;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

// Advisory locks are scoped to the Postgres session. They keep a scheduled run and a manual run
// from both deciding the same symbol is eligible.
const HISTORY_LOCK_KEY: i64 = 0x534D_4152_544D; // "SMARTM"

/// Takes the run lock on `conn`. The lock lives as long as that session, so the caller must keep
/// the same connection checked out until [`release_history_lock`].
pub async fn try_acquire_history_lock(conn: &mut sqlx::PgConnection) -> anyhow::Result<bool> {
    let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(HISTORY_LOCK_KEY)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("failed to acquire advisory lock (key={HISTORY_LOCK_KEY})"))?;
    Ok(acquired.0)
}

/// Returns `false` when `conn` did not hold the lock.
pub async fn release_history_lock(conn: &mut sqlx::PgConnection) -> anyhow::Result<bool> {
    let released: (bool,) = sqlx::query_as("SELECT pg_advisory_unlock($1)")
        .persistent(false)
        .bind(HISTORY_LOCK_KEY)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("failed to release advisory lock (key={HISTORY_LOCK_KEY})"))?;
    Ok(released.0)
}

/// OS advisory lock on `<history>.lock` for the file-backed history.
///
/// The kernel drops the lock when the process exits, so a lock file left behind by a crashed run
/// does not block the next one. The file itself is never removed.
#[derive(Debug)]
pub struct FileRunLock {
    path: PathBuf,
    file: File,
}

impl FileRunLock {
    /// The lock file for a history file at `history_path`.
    pub fn path_for(history_path: &Path) -> PathBuf {
        let mut name = history_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        history_path.with_file_name(name)
    }

    /// Returns `Ok(None)` when another run holds the lock.
    pub fn try_acquire(history_path: &Path) -> anyhow::Result<Option<Self>> {
        let path = Self::path_for(history_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to open lock {}", path.display()))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { path, file })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to lock {}", path.display())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileRunLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release run lock");
        }
    }
}
