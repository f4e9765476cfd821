//! Single-plane TIFF series storage.
//!
//! Every image is its own classic TIFF named after its coordinate:
//! `img.tif` for the origin, otherwise `img` followed by `_<axis><index>`
//! (index zero-padded to nine digits) for each non-zero axis in sorted order.
//! Equal coordinates therefore always map to the same file.
//!
//! A `metadata.txt` companion holds the summary and one record per image
//! (coordinates, file name, geometry, metadata). It is rewritten atomically
//! after every change so that the directory is always readable.
//!
//! Planes are written to `<name>.tmp` and renamed into place while the
//! record is swapped, so a reader sees either the old plane or the new one.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::data::{Coords, Image, SummaryMetadata};
use crate::error::{DataError, IoError};
use crate::format::tiff::{encode_header, encode_page, TiffHeader, TiffPage, TIFF_HEADER_SIZE};
use crate::format::SINGLE_PLANE_METADATA_FILE;
use crate::io::{LocalFileReader, RangeReader};

use super::{CoordsIter, DatasetDescription, ImageRecord, Storage, StorageKind};

struct SeriesState {
    records: HashMap<Coords, ImageRecord>,
    summary: SummaryMetadata,
}

/// Storage holding one TIFF file per image.
///
/// Writing past the declared `intended_dimensions` widens them. Writing an
/// existing coordinate replaces its file.
pub struct SinglePlaneStorage {
    dir: PathBuf,
    state: RwLock<SeriesState>,
    write_lock: Mutex<()>,
    writable: bool,
    closed: AtomicBool,
}

impl SinglePlaneStorage {
    /// Start a new series in `dir`, creating the directory if needed.
    pub async fn create(dir: impl AsRef<Path>) -> Result<Self, DataError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| IoError::from_io(&dir, e))?;

        let companion = dir.join(SINGLE_PLANE_METADATA_FILE);
        if tokio::fs::try_exists(&companion)
            .await
            .map_err(|e| IoError::from_io(&companion, e))?
        {
            return Err(DataError::InvalidArgument(format!(
                "{} already contains a single-plane dataset",
                dir.display()
            )));
        }

        let summary = SummaryMetadata::builder()
            .directory(dir.display().to_string())
            .build();
        let storage = Self {
            dir,
            state: RwLock::new(SeriesState {
                records: HashMap::new(),
                summary,
            }),
            write_lock: Mutex::new(()),
            writable: true,
            closed: AtomicBool::new(false),
        };
        {
            let state = storage.state.read().await;
            storage
                .write_companion(describe(&state.summary, state.records.values()))
                .await?;
        }

        info!(dir = %storage.dir.display(), "Creating single-plane dataset");
        Ok(storage)
    }

    /// Open an existing series read-only.
    ///
    /// Fails with `CorruptStore` if the companion cannot be parsed.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, DataError> {
        let dir = dir.as_ref().to_path_buf();
        let companion = dir.join(SINGLE_PLANE_METADATA_FILE);
        let json = tokio::fs::read_to_string(&companion)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => DataError::NotFound(companion.display().to_string()),
                std::io::ErrorKind::InvalidData => DataError::CorruptStore(format!(
                    "{} is not valid UTF-8",
                    companion.display()
                )),
                _ => IoError::from_io(&companion, e).into(),
            })?;
        let description = DatasetDescription::from_json(&json)?;

        let mut records = HashMap::with_capacity(description.images.len());
        for record in description.images {
            match record.file_name.as_deref() {
                None => {
                    return Err(DataError::CorruptStore(format!(
                        "companion entry for {} has no file name",
                        record.coords
                    )))
                }
                Some(name) if !is_plain_file_name(name) => {
                    return Err(DataError::CorruptStore(format!(
                        "companion entry for {} names a file outside the dataset: {}",
                        record.coords, name
                    )))
                }
                Some(_) => {}
            }
            records.insert(record.coords.clone(), record);
        }

        info!(dir = %dir.display(), images = records.len(), "Opened single-plane dataset");
        Ok(Self {
            dir,
            state: RwLock::new(SeriesState {
                records,
                summary: description.summary,
            }),
            write_lock: Mutex::new(()),
            writable: false,
            closed: AtomicBool::new(false),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ensure_open(&self) -> Result<(), DataError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DataError::closed("single-plane storage"));
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<(), DataError> {
        self.ensure_open()?;
        if !self.writable {
            return Err(DataError::IllegalState(format!(
                "single-plane dataset {} was opened read-only",
                self.dir.display()
            )));
        }
        Ok(())
    }

    /// Replace the companion with `description` via a temporary file.
    async fn write_companion(&self, description: DatasetDescription) -> Result<(), DataError> {
        let json = description.to_pretty_json()?;

        let path = self.dir.join(SINGLE_PLANE_METADATA_FILE);
        let tmp = self.dir.join(format!("{}.tmp", SINGLE_PLANE_METADATA_FILE));
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| IoError::from_io(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| IoError::from_io(&path, e))?;
        Ok(())
    }
}

fn describe<'a>(
    summary: &SummaryMetadata,
    records: impl Iterator<Item = &'a ImageRecord>,
) -> DatasetDescription {
    DatasetDescription::new(summary.clone(), records.cloned().collect())
}

/// True for a bare file name with no directory part.
fn is_plain_file_name(name: &str) -> bool {
    if name.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(part)), None) if part.to_str() == Some(name)
    )
}

/// File name of the plane stored at `coords`.
pub fn plane_file_name(coords: &Coords) -> String {
    let mut name = String::from("img");
    for (axis, index) in coords.nonzero() {
        name.push_str(&format!("_{}{:09}", axis, index));
    }
    name.push_str(".tif");
    name
}

#[async_trait]
impl Storage for SinglePlaneStorage {
    async fn put_image(&self, image: Image) -> Result<(), DataError> {
        self.ensure_writable()?;
        let _guard = self.write_lock.lock().await;
        self.ensure_open()?;

        let coords = image.coords().clone();
        let file_name = plane_file_name(&coords);
        let record = ImageRecord::describe(&image).with_file_name(file_name.clone());

        let page = encode_page(
            TIFF_HEADER_SIZE as u64,
            image.pixels(),
            &image.geometry(),
            &record.to_json()?,
        )?;
        let mut bytes = Vec::with_capacity(TIFF_HEADER_SIZE + page.bytes.len());
        bytes.extend_from_slice(&encode_header(page.ifd_offset as u32));
        bytes.extend_from_slice(&page.bytes);

        let path = self.dir.join(&file_name);
        let tmp = self.dir.join(format!("{}.tmp", file_name));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| IoError::from_io(&tmp, e))?;

        let mut state = self.state.write().await;
        let summary = state
            .summary
            .widened_to(&coords)?
            .unwrap_or_else(|| state.summary.clone());
        let others = state.records.iter().filter(|(c, _)| **c != coords).map(|(_, r)| r);
        let description = describe(&summary, others.chain(std::iter::once(&record)));

        let committed: Result<(), DataError> = match self.write_companion(description).await {
            Ok(()) => tokio::fs::rename(&tmp, &path)
                .await
                .map_err(|e| IoError::from_io(&path, e).into()),
            Err(e) => Err(e),
        };
        if let Err(e) = committed {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }

        state.summary = summary;
        let replaced = state.records.insert(coords.clone(), record).is_some();
        debug!(%coords, file = %file_name, replaced, "Wrote plane");
        Ok(())
    }

    async fn get_image(&self, coords: &Coords) -> Result<Image, DataError> {
        self.ensure_open()?;

        // The file is opened under the read guard so that the record and the
        // plane belong to the same write
        let (record, reader) = {
            let state = self.state.read().await;
            let record = state
                .records
                .get(coords)
                .cloned()
                .ok_or_else(|| DataError::NotFound(format!("no image at {}", coords)))?;

            let file_name = record.file_name.clone().unwrap_or_else(|| plane_file_name(coords));
            let path = self.dir.join(&file_name);
            let reader = LocalFileReader::open(&path).await.map_err(|e| match e {
                IoError::NotFound(p) => DataError::NotFound(format!("plane file {} is missing", p)),
                other => other.into(),
            })?;
            (record, reader)
        };

        let header_bytes = reader.read_head(TIFF_HEADER_SIZE).await?;
        let header = TiffHeader::parse(&header_bytes, reader.size())?;
        let page = TiffPage::read(&reader, header.byte_order, header.first_ifd_offset).await?;
        let pixels = page.read_pixels(&reader).await?;
        record.into_image(pixels)
    }

    async fn has_image(&self, coords: &Coords) -> Result<bool, DataError> {
        self.ensure_open()?;
        Ok(self.state.read().await.records.contains_key(coords))
    }

    async fn summary_metadata(&self) -> Result<SummaryMetadata, DataError> {
        self.ensure_open()?;
        Ok(self.state.read().await.summary.clone())
    }

    async fn set_summary_metadata(&self, mut summary: SummaryMetadata) -> Result<(), DataError> {
        self.ensure_writable()?;
        let _guard = self.write_lock.lock().await;

        let mut state = self.state.write().await;
        for coords in state.records.keys() {
            if let Some(widened) = summary.widened_to(coords)? {
                summary = widened;
            }
        }
        self.write_companion(describe(&summary, state.records.values()))
            .await?;
        state.summary = summary;
        Ok(())
    }

    async fn coords(&self) -> Result<CoordsIter, DataError> {
        self.ensure_open()?;
        let coords = self.state.read().await.records.keys().cloned().collect();
        Ok(CoordsIter::new(coords))
    }

    async fn image_count(&self) -> Result<usize, DataError> {
        self.ensure_open()?;
        Ok(self.state.read().await.records.len())
    }

    async fn close(&self) -> Result<(), DataError> {
        let _guard = self.write_lock.lock().await;
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut state = self.state.write().await;
        info!(dir = %self.dir.display(), images = state.records.len(), "Closed single-plane dataset");
        state.records.clear();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn kind(&self) -> StorageKind {
        StorageKind::SinglePlaneTiffSeries
    }
}
