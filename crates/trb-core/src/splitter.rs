//! Fixed-size partitioning of oversize files, uploaded part by part.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncWriteExt},
};

use crate::{errors::TransferError, scratch::ScratchFile, Result};

/// Receives each part file; the splitter deletes it once this returns.
#[async_trait]
pub trait PartUploader: Send + Sync {
    async fn upload_part(&self, path: &Path, caption: &str, index: usize) -> Result<()>;
}

/// Sibling path for part `index`: `name.part007.ext`.
pub fn part_path(source: &Path, index: usize) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = source
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    source.with_file_name(format!("{stem}.part{index:03}{suffix}"))
}

pub fn part_caption(caption: Option<&str>, index: usize) -> String {
    match caption.filter(|c| !c.trim().is_empty()) {
        Some(c) => format!("{c}\n\nPart: {}", index + 1),
        None => format!("Part: {}", index + 1),
    }
}

fn disk(context: &str, path: &Path, e: std::io::Error) -> TransferError {
    TransferError::DiskFailure(format!("{context} {}: {e}", path.display()))
}

/// Split `path` into `part_size` chunks and upload them in order.
///
/// Each part file is removed as soon as its upload finishes, whatever the
/// outcome. The first failed upload stops the run; earlier parts stay
/// delivered. The source file is removed on every exit path. Returns the
/// number of parts uploaded.
pub async fn split_and_upload(
    path: &Path,
    part_size: u64,
    caption: Option<&str>,
    uploader: &dyn PartUploader,
) -> Result<usize> {
    let source = ScratchFile::new(path);
    let result = upload_parts(path, part_size.max(1), caption, uploader).await;
    source.remove().await;
    result
}

async fn upload_parts(
    path: &Path,
    part_size: u64,
    caption: Option<&str>,
    uploader: &dyn PartUploader,
) -> Result<usize> {
    let mut file = File::open(path)
        .await
        .map_err(|e| disk("open", path, e))?;
    let len = file
        .metadata()
        .await
        .map_err(|e| disk("stat", path, e))?
        .len();
    let parts = len.div_ceil(part_size) as usize;

    tracing::info!(path = %path.display(), len, part_size, parts, "splitting file");

    for index in 0..parts {
        let part = ScratchFile::new(part_path(path, index));
        write_part(&mut file, part.path(), part_size).await?;

        let res = uploader
            .upload_part(part.path(), &part_caption(caption, index), index)
            .await;
        part.remove().await;
        if let Err(e) = res {
            tracing::warn!(index, parts, error = %e, "part upload failed; aborting split");
            return Err(e);
        }
    }

    Ok(parts)
}

async fn write_part(source: &mut File, dest: &Path, part_size: u64) -> Result<()> {
    let mut out = File::create(dest)
        .await
        .map_err(|e| disk("create", dest, e))?;
    let mut chunk = source.take(part_size);
    tokio::io::copy(&mut chunk, &mut out)
        .await
        .map_err(|e| disk("write", dest, e))?;
    out.flush().await.map_err(|e| disk("flush", dest, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingUploader {
        parts: Mutex<Vec<(usize, String, Vec<u8>)>>,
        fail_at: Option<usize>,
    }

    #[async_trait]
    impl PartUploader for RecordingUploader {
        async fn upload_part(&self, path: &Path, caption: &str, index: usize) -> Result<()> {
            let bytes = tokio::fs::read(path).await?;
            self.parts
                .lock()
                .unwrap()
                .push((index, caption.to_string(), bytes));
            if self.fail_at == Some(index) {
                return Err(TransferError::BackendFailure("upload rejected".into()).into());
            }
            Ok(())
        }
    }

    fn no_part_files(dir: &Path) -> bool {
        std::fs::read_dir(dir)
            .unwrap()
            .all(|e| !e.unwrap().file_name().to_string_lossy().contains(".part"))
    }

    #[test]
    fn part_names_and_captions() {
        assert_eq!(
            part_path(Path::new("/t/movie.mkv"), 7),
            PathBuf::from("/t/movie.part007.mkv")
        );
        assert_eq!(part_path(Path::new("/t/blob"), 0), PathBuf::from("/t/blob.part000"));
        assert_eq!(part_caption(Some("Hi"), 0), "Hi\n\nPart: 1");
        assert_eq!(part_caption(None, 2), "Part: 3");
        assert_eq!(part_caption(Some(" "), 0), "Part: 1");
    }

    #[tokio::test]
    async fn parts_reassemble_to_the_original() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("data.bin");
        let original: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&src, &original).unwrap();

        let up = RecordingUploader::default();
        let n = split_and_upload(&src, 1000, Some("cap"), &up).await.unwrap();
        assert_eq!(n, 3);

        let parts = up.parts.lock().unwrap();
        let joined: Vec<u8> = parts.iter().flat_map(|(_, _, b)| b.clone()).collect();
        assert_eq!(joined, original);
        assert_eq!(parts[0].1, "cap\n\nPart: 1");
        assert_eq!(parts[2].1, "cap\n\nPart: 3");
        assert_eq!(parts[2].2.len(), 500);

        assert!(!src.exists());
        assert!(no_part_files(dir.path()));
    }

    #[tokio::test]
    async fn exact_multiple_has_no_empty_tail() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("even.bin");
        std::fs::write(&src, vec![1u8; 2000]).unwrap();
        let up = RecordingUploader::default();
        assert_eq!(split_and_upload(&src, 1000, None, &up).await.unwrap(), 2);
        assert_eq!(up.parts.lock().unwrap()[1].1, "Part: 2");
    }

    #[tokio::test]
    async fn failed_part_aborts_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("data.bin");
        std::fs::write(&src, vec![7u8; 3500]).unwrap();

        let up = RecordingUploader {
            fail_at: Some(1),
            ..Default::default()
        };
        let err = split_and_upload(&src, 1000, None, &up).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Transfer(TransferError::BackendFailure(_))
        ));
        assert_eq!(up.parts.lock().unwrap().len(), 2, "remaining parts skipped");
        assert!(!src.exists());
        assert!(no_part_files(dir.path()));
    }

    #[tokio::test]
    async fn missing_source_is_a_disk_failure() {
        let dir = tempfile::tempdir().unwrap();
        let up = RecordingUploader::default();
        let err = split_and_upload(&dir.path().join("gone.bin"), 1000, None, &up)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transfer(TransferError::DiskFailure(_))));
        assert!(up.parts.lock().unwrap().is_empty());
    }
}
