//! Format detection for dataset directories.
//!
//! Detection only ever reads file headers:
//!
//! - **MMStack container**: a `*.tif` whose TIFF header is followed by the
//!   index-map offset marker
//! - **Single-plane TIFF series**: a directory with a `metadata.txt`
//!   companion describing one TIFF per image
//!
//! Missing directories are `NotFound`; anything else is `CorruptStore`.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{DataError, IoError};
use crate::io::{LocalFileReader, RangeReader};

use super::mmstack::is_container_header;

/// Companion file of a single-plane TIFF series.
pub const SINGLE_PLANE_METADATA_FILE: &str = "metadata.txt";

/// Bytes needed to recognize a container header.
const SIGNATURE_BYTES: u64 = 12;

// =============================================================================
// DatasetFormat
// =============================================================================

/// On-disk layout of a dataset directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatasetFormat {
    /// One or more MMStack multipage containers
    MultipageTiff,

    /// One TIFF per image plus a `metadata.txt` companion
    SinglePlaneTiffSeries,
}

impl DatasetFormat {
    pub const fn name(&self) -> &'static str {
        match self {
            DatasetFormat::MultipageTiff => "Multipage TIFF",
            DatasetFormat::SinglePlaneTiffSeries => "Single-plane TIFF series",
        }
    }
}

// =============================================================================
// Format Detection
// =============================================================================

/// Detect the format of the dataset stored in `dir`.
///
/// # Errors
/// * `NotFound` - `dir` does not exist or is not a directory
/// * `CorruptStore` - the directory holds neither layout
/// * `StorageIo` - the directory or a header could not be read
pub async fn detect_format(dir: &Path) -> Result<DatasetFormat, DataError> {
    match tokio::fs::metadata(dir).await {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(DataError::NotFound(format!(
                "{} is not a directory",
                dir.display()
            )))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(DataError::NotFound(dir.display().to_string()))
        }
        Err(e) => return Err(IoError::from_io(dir, e).into()),
    }

    for path in list_tiff_files(dir).await? {
        if has_container_signature(&path).await? {
            debug!(path = %path.display(), "Detected MMStack container");
            return Ok(DatasetFormat::MultipageTiff);
        }
    }

    let companion = dir.join(SINGLE_PLANE_METADATA_FILE);
    if tokio::fs::try_exists(&companion)
        .await
        .map_err(|e| IoError::from_io(&companion, e))?
    {
        debug!(dir = %dir.display(), "Detected single-plane TIFF series");
        return Ok(DatasetFormat::SinglePlaneTiffSeries);
    }

    Err(DataError::CorruptStore(format!(
        "{} does not contain a recognized dataset",
        dir.display()
    )))
}

/// All `*.tif` files directly inside `dir`, sorted by name.
pub(crate) async fn list_tiff_files(dir: &Path) -> Result<Vec<PathBuf>, DataError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| IoError::from_io(dir, e))?;

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| IoError::from_io(dir, e))?
    {
        let path = entry.path();
        let is_tif = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("tif"));
        if is_tif && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

async fn has_container_signature(path: &Path) -> Result<bool, DataError> {
    let reader = LocalFileReader::open(path).await?;
    if reader.size() < SIGNATURE_BYTES {
        return Ok(false);
    }
    let header = reader.read_exact_at(0, SIGNATURE_BYTES as usize).await?;
    Ok(is_container_header(&header))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::mmstack::encode_container_header;
    use crate::format::tiff::encode_header;

    #[test]
    fn test_dataset_format_name() {
        assert_eq!(DatasetFormat::MultipageTiff.name(), "Multipage TIFF");
        assert_eq!(
            DatasetFormat::SinglePlaneTiffSeries.name(),
            "Single-plane TIFF series"
        );
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = detect_format(&dir.path().join("absent")).await;
        assert!(matches!(result, Err(DataError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_file_is_not_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        tokio::fs::write(&file, b"x").await.unwrap();
        assert!(matches!(
            detect_format(&file).await,
            Err(DataError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_directory_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            detect_format(dir.path()).await,
            Err(DataError::CorruptStore(_))
        ));
    }

    #[tokio::test]
    async fn test_unrelated_files_are_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), b"hello").await.unwrap();
        tokio::fs::write(dir.path().join("photo.tif"), encode_header(8))
            .await
            .unwrap();
        assert!(matches!(
            detect_format(dir.path()).await,
            Err(DataError::CorruptStore(_))
        ));
    }

    #[tokio::test]
    async fn test_detects_container() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a_plain.tif"), encode_header(8))
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("b_MMStack.tif"), encode_container_header())
            .await
            .unwrap();
        assert_eq!(
            detect_format(dir.path()).await.unwrap(),
            DatasetFormat::MultipageTiff
        );
    }

    #[tokio::test]
    async fn test_detects_single_plane_series() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("img.tif"), encode_header(8))
            .await
            .unwrap();
        tokio::fs::write(dir.path().join(SINGLE_PLANE_METADATA_FILE), b"{}")
            .await
            .unwrap();
        assert_eq!(
            detect_format(dir.path()).await.unwrap(),
            DatasetFormat::SinglePlaneTiffSeries
        );
    }

    #[tokio::test]
    async fn test_list_tiff_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["c.tif", "a.tif", "b.TIF", "d.txt"] {
            tokio::fs::write(dir.path().join(name), b"").await.unwrap();
        }
        let names: Vec<String> = list_tiff_files(dir.path())
            .await
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.tif", "b.TIF", "c.tif"]);
    }
}
