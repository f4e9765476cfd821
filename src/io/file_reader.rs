//! Positional reads from local files.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::sync::Mutex;

use super::RangeReader;
use crate::error::IoError;

/// [`RangeReader`] over a local file.
///
/// The file may still be growing (a container that is being written while
/// readers access finished pages). Reads past the size seen at open time
/// re-check the file length before failing.
pub struct LocalFileReader {
    path: PathBuf,
    identifier: String,
    file: Mutex<File>,
    size: AtomicU64,
}

impl LocalFileReader {
    /// Open `path` for reading.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .await
            .map_err(|e| IoError::from_io(&path, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| IoError::from_io(&path, e))?
            .len();

        Ok(Self {
            identifier: path.display().to_string(),
            path,
            file: Mutex::new(file),
            size: AtomicU64::new(size),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn refresh_size(&self, file: &File) -> Result<u64, IoError> {
        let size = file
            .metadata()
            .await
            .map_err(|e| IoError::from_io(&self.path, e))?
            .len();
        self.size.store(size, Ordering::Release);
        Ok(size)
    }
}

#[async_trait]
impl RangeReader for LocalFileReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let mut file = self.file.lock().await;

        let end = offset.saturating_add(len as u64);
        let mut size = self.size.load(Ordering::Acquire);
        if end > size {
            size = self.refresh_size(&file).await?;
            if end > size {
                return Err(IoError::RangeOutOfBounds {
                    offset,
                    requested: len as u64,
                    size,
                });
            }
        }

        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| IoError::from_io(&self.path, e))?;
        let mut buf = BytesMut::zeroed(len);
        file.read_exact(&mut buf[..])
            .await
            .map_err(|e| IoError::from_io(&self.path, e))?;

        Ok(buf.freeze())
    }

    fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_read_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        tokio::fs::write(&path, (0u8..100).collect::<Vec<_>>())
            .await
            .unwrap();

        let reader = LocalFileReader::open(&path).await.unwrap();
        assert_eq!(reader.size(), 100);
        assert_eq!(reader.read_exact_at(10, 3).await.unwrap().as_ref(), &[10, 11, 12]);
        assert_eq!(reader.read_exact_at(0, 1).await.unwrap().as_ref(), &[0]);
    }

    #[tokio::test]
    async fn test_out_of_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.bin");
        tokio::fs::write(&path, [1u8, 2, 3]).await.unwrap();

        let reader = LocalFileReader::open(&path).await.unwrap();
        let err = reader.read_exact_at(2, 5).await.unwrap_err();
        assert!(matches!(err, IoError::RangeOutOfBounds { size: 3, .. }));
        assert_eq!(reader.read_head(8).await.unwrap().as_ref(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_sees_appended_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("growing.bin");
        tokio::fs::write(&path, [1u8, 2]).await.unwrap();
        let reader = LocalFileReader::open(&path).await.unwrap();

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .unwrap();
        file.write_all(&[3, 4]).await.unwrap();
        file.flush().await.unwrap();

        assert_eq!(reader.read_exact_at(2, 2).await.unwrap().as_ref(), &[3, 4]);
        assert_eq!(reader.size(), 4);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = LocalFileReader::open(dir.path().join("nope.bin")).await;
        assert!(matches!(result, Err(IoError::NotFound(_))));
    }
}
