//! Owned temporary files and directories that are removed on every exit path.

use std::path::{Path, PathBuf};

/// A local file owned by one transfer.
///
/// Removal happens in `Drop`, so it also runs when the owning future is
/// cancelled. Removal failures are logged and swallowed.
#[derive(Debug)]
pub struct ScratchFile {
    path: Option<PathBuf>,
}

impl ScratchFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or(Path::new(""))
    }

    /// Track a rename of the underlying file.
    pub fn moved_to(&mut self, path: PathBuf) {
        self.path = Some(path);
    }

    /// Stop tracking the file (another owner removes it now).
    pub fn release(mut self) -> PathBuf {
        self.path.take().unwrap_or_default()
    }

    /// Remove now, off the async executor thread.
    pub async fn remove(mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove scratch file"),
        }
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed scratch file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove scratch file"),
        }
    }
}

/// A per-transfer working directory; everything inside goes with it.
#[derive(Debug)]
pub struct ScratchDir {
    path: Option<PathBuf>,
}

impl ScratchDir {
    pub async fn create(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self { path: Some(path) })
    }

    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or(Path::new(""))
    }

    pub async fn remove(mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove scratch dir"),
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        match std::fs::remove_dir_all(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed scratch dir"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove scratch dir"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a.bin");
        std::fs::write(&p, b"x").unwrap();
        drop(ScratchFile::new(&p));
        assert!(!p.exists());
    }

    #[test]
    fn drop_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        drop(ScratchFile::new(dir.path().join("never-created")));
    }

    #[tokio::test]
    async fn tracks_renames_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::write(&a, b"x").unwrap();
        let mut f = ScratchFile::new(&a);
        std::fs::rename(&a, &b).unwrap();
        f.moved_to(b.clone());
        assert_eq!(f.path(), b.as_path());

        let released = f.release();
        assert!(released.exists(), "released file is left alone");

        ScratchFile::new(&released).remove().await;
        assert!(!b.exists());
    }

    #[tokio::test]
    async fn cancelled_owner_still_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("c");
        std::fs::write(&p, b"x").unwrap();

        let guard = ScratchFile::new(&p);
        let task = tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });
        task.abort();
        let _ = task.await;
        assert!(!p.exists());
    }

    #[tokio::test]
    async fn scratch_dir_takes_its_contents_along() {
        let root = tempfile::tempdir().unwrap();
        let work = ScratchDir::create(root.path().join("1-2-3")).await.unwrap();
        std::fs::write(work.path().join("a.part000.bin"), b"x").unwrap();
        let path = work.path().to_path_buf();
        drop(work);
        assert!(!path.exists());

        let work = ScratchDir::create(root.path().join("again")).await.unwrap();
        let path = work.path().to_path_buf();
        work.remove().await;
        assert!(!path.exists());
    }
}
