//! MMStack multipage TIFF storage.
//!
//! Images are appended as pages to containers named
//! `<prefix>_MMStack[_Pos<n>][_<k>].tif`, where `<prefix>` is the dataset
//! directory's name, `_Pos<n>` appears when stage positions are split into
//! separate files and `_<k>` numbers the files a sequence rolled over into.
//!
//! # Extents
//!
//! Axes declared in the summary's `intended_dimensions` are fixed: an image
//! at or beyond a declared length is rejected with `ExtentViolation`. Axes
//! that were not declared grow freely and their observed extent is recorded
//! in the persisted summary.
//!
//! # Reading
//!
//! Opening an existing dataset reads only the header and trailer of every
//! container. Pixels are read on demand and never cached.
//!
//! # Finalization
//!
//! A container that rolls over keeps the trailer written at that moment.
//! Only the last file of each sequence is finalized at close, so only those
//! carry the final summary. A summary that would push an open container
//! past `max_file_bytes` is rejected with `InvalidArgument`.

mod writer;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, info};

use crate::config::StorageOptions;
use crate::data::{Coords, Image, SummaryMetadata};
use crate::error::{DataError, IoError};
use crate::format::detect::list_tiff_files;
use crate::format::mmstack::read_container;
use crate::format::tiff::{ByteOrder, TiffPage};
use crate::io::LocalFileReader;

use super::{CoordsIter, DatasetDescription, ImageRecord, Storage, StorageKind};

use writer::{empty_container_len, page_len, ContainerWriter};

/// Room left in every container for the summary to grow between the
/// rollover check and the trailer written at close.
const SUMMARY_HEADROOM: usize = 256;

// =============================================================================
// Layout options
// =============================================================================

/// How a writable multipage dataset lays out its files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    separate_metadata: bool,
    split_positions: bool,
    max_file_bytes: u64,
}

// =============================================================================
// Internal state
// =============================================================================

/// Where a page lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PageLocation {
    file: usize,
    ifd_offset: u64,
}

/// One container file, with its reader opened on first use.
struct ContainerFile {
    path: PathBuf,
    reader: OnceCell<LocalFileReader>,
}

impl ContainerFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            reader: OnceCell::new(),
        }
    }

    async fn reader(&self) -> Result<&LocalFileReader, DataError> {
        let reader = self
            .reader
            .get_or_try_init(|| LocalFileReader::open(&self.path))
            .await?;
        Ok(reader)
    }
}

/// The summary as the caller declared it and as it is persisted.
struct SummaryState {
    declared: SummaryMetadata,
    effective: SummaryMetadata,
}

/// The file sequence for one position (or the whole dataset when positions
/// are not split).
struct Stream {
    position: Option<u32>,
    sequence: u32,
    active: ContainerWriter,
}

struct WriterState {
    layout: Layout,
    streams: HashMap<Option<u32>, Stream>,
    records: Vec<ImageRecord>,
}

// =============================================================================
// MultipageStorage
// =============================================================================

/// Storage backed by MMStack multipage containers. Append-only.
pub struct MultipageStorage {
    dir: PathBuf,
    prefix: String,
    index: RwLock<HashMap<Coords, PageLocation>>,
    files: RwLock<Vec<Arc<ContainerFile>>>,
    summary: RwLock<SummaryState>,
    writer: Mutex<Option<WriterState>>,
    writable: bool,
    closed: AtomicBool,
}

impl MultipageStorage {
    /// Start a new dataset in `dir`, creating the directory if needed.
    ///
    /// Fails with `StorageIo` if the directory cannot be created and with
    /// `InvalidArgument` if it already holds MMStack containers.
    pub async fn create(
        dir: impl AsRef<Path>,
        separate_metadata: bool,
        split_positions: bool,
        options: StorageOptions,
    ) -> Result<Self, DataError> {
        options.validate()?;
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| IoError::from_io(&dir, e))?;

        let prefix = dataset_prefix(&dir);
        let existing = list_tiff_files(&dir).await?;
        if existing.iter().any(|p| is_container_name(p, &prefix)) {
            return Err(DataError::InvalidArgument(format!(
                "{} already contains a multipage dataset",
                dir.display()
            )));
        }

        info!(
            dir = %dir.display(),
            separate_metadata,
            split_positions,
            max_file_bytes = options.max_file_bytes,
            "Creating multipage dataset"
        );

        let summary = SummaryMetadata::builder()
            .prefix(prefix.clone())
            .directory(dir.display().to_string())
            .build();

        Ok(Self {
            dir,
            prefix,
            index: RwLock::new(HashMap::new()),
            files: RwLock::new(Vec::new()),
            summary: RwLock::new(SummaryState {
                declared: summary.clone(),
                effective: summary,
            }),
            writer: Mutex::new(Some(WriterState {
                layout: Layout {
                    separate_metadata,
                    split_positions,
                    max_file_bytes: options.max_file_bytes,
                },
                streams: HashMap::new(),
                records: Vec::new(),
            })),
            writable: true,
            closed: AtomicBool::new(false),
        })
    }

    /// Open an existing dataset read-only.
    ///
    /// Every `*.tif` in `dir` must be a finalized container. A container
    /// that was never closed, or whose trailer is malformed, fails with
    /// `CorruptStore`.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, DataError> {
        let dir = dir.as_ref().to_path_buf();
        let paths = list_tiff_files(&dir).await?;
        if paths.is_empty() {
            return Err(DataError::CorruptStore(format!(
                "{} contains no multipage containers",
                dir.display()
            )));
        }

        let mut index = HashMap::new();
        let mut files = Vec::with_capacity(paths.len());
        // Summary of the latest file in any sequence, which is the one
        // finalized at close
        let mut summary: Option<(u32, SummaryMetadata)> = None;

        for (file_id, path) in paths.into_iter().enumerate() {
            let reader = LocalFileReader::open(&path).await?;
            let container = read_container(&reader).await.map_err(|e| {
                DataError::CorruptStore(format!("{}: {}", path.display(), e))
            })?;

            let sequence = container_sequence(&path);
            if summary.as_ref().map_or(true, |(best, _)| sequence > *best) {
                let parsed = serde_json::from_str(&container.summary_json).map_err(|e| {
                    DataError::CorruptStore(format!(
                        "{}: unreadable summary: {}",
                        path.display(),
                        e
                    ))
                })?;
                summary = Some((sequence, parsed));
            }

            for entry in container.entries {
                let location = PageLocation {
                    file: file_id,
                    ifd_offset: entry.ifd_offset as u64,
                };
                if index.insert(entry.coords.clone(), location).is_some() {
                    return Err(DataError::CorruptStore(format!(
                        "{} is indexed more than once",
                        entry.coords
                    )));
                }
            }

            debug!(path = %path.display(), "Indexed container");
            let file = ContainerFile::new(path);
            let _ = file.reader.set(reader);
            files.push(Arc::new(file));
        }

        let mut effective = summary.map(|(_, summary)| summary).unwrap_or_default();
        for coords in index.keys() {
            if let Some(widened) = effective.widened_to(coords)? {
                effective = widened;
            }
        }

        info!(
            dir = %dir.display(),
            files = files.len(),
            images = index.len(),
            "Opened multipage dataset"
        );

        Ok(Self {
            prefix: dataset_prefix(&dir),
            dir,
            index: RwLock::new(index),
            files: RwLock::new(files),
            summary: RwLock::new(SummaryState {
                declared: effective.clone(),
                effective,
            }),
            writer: Mutex::new(None),
            writable: false,
            closed: AtomicBool::new(false),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Paths of every container file, in creation (or directory) order.
    pub async fn files(&self) -> Vec<PathBuf> {
        self.files
            .read()
            .await
            .iter()
            .map(|f| f.path.clone())
            .collect()
    }

    fn ensure_open(&self) -> Result<(), DataError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DataError::closed("multipage storage"));
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<(), DataError> {
        self.ensure_open()?;
        if !self.writable {
            return Err(DataError::IllegalState(format!(
                "multipage dataset {} was opened read-only",
                self.dir.display()
            )));
        }
        Ok(())
    }

    fn container_path(&self, position: Option<u32>, sequence: u32) -> PathBuf {
        let mut name = format!("{}_MMStack", self.prefix);
        if let Some(position) = position {
            name.push_str(&format!("_Pos{}", position));
        }
        if sequence > 0 {
            name.push_str(&format!("_{}", sequence));
        }
        name.push_str(".tif");
        self.dir.join(name)
    }

    async fn register_file(&self, path: PathBuf) -> usize {
        let mut files = self.files.write().await;
        files.push(Arc::new(ContainerFile::new(path)));
        files.len() - 1
    }

    async fn open_container(
        &self,
        position: Option<u32>,
        sequence: u32,
    ) -> Result<ContainerWriter, DataError> {
        let path = self.container_path(position, sequence);
        let file_id = self.files.read().await.len();
        let writer = ContainerWriter::create(path.clone(), file_id).await?;
        let registered = self.register_file(path).await;
        debug_assert_eq!(registered, file_id);
        debug!(path = %writer.path().display(), "Started container");
        Ok(writer)
    }

    async fn summary_json(&self) -> Result<String, DataError> {
        let state = self.summary.read().await;
        serde_json::to_string(&state.effective)
            .map_err(|e| DataError::InvalidArgument(format!("cannot serialize summary: {}", e)))
    }

    /// Length of the summary once `coords` is stored, plus headroom.
    async fn projected_summary_len(&self, coords: &Coords) -> Result<usize, DataError> {
        let state = self.summary.read().await;
        let json = match state.effective.widened_to(coords)? {
            Some(widened) => serde_json::to_string(&widened),
            None => serde_json::to_string(&state.effective),
        }
        .map_err(|e| DataError::InvalidArgument(format!("cannot serialize summary: {}", e)))?;
        Ok(json.len() + SUMMARY_HEADROOM)
    }

    /// Finalize every open container and write the separate metadata file.
    /// Safe to repeat after a failure.
    async fn finish(&self, state: &mut WriterState) -> Result<(), DataError> {
        if state.streams.is_empty() {
            let active = self.open_container(None, 0).await?;
            state.streams.insert(
                None,
                Stream {
                    position: None,
                    sequence: 0,
                    active,
                },
            );
        }

        let summary_json = self.summary_json().await?;
        for stream in state.streams.values_mut() {
            stream.active.finalize(&summary_json).await?;
        }

        if state.layout.separate_metadata {
            let summary = self.summary.read().await.effective.clone();
            let description = DatasetDescription::new(summary, state.records.clone());
            let path = self.dir.join(format!("{}_metadata.txt", self.prefix));
            tokio::fs::write(&path, description.to_pretty_json()?)
                .await
                .map_err(|e| IoError::from_io(&path, e))?;
        }

        let images = self.index.read().await.len();
        info!(dir = %self.dir.display(), images, "Closed multipage dataset");
        Ok(())
    }

    async fn page_location(&self, coords: &Coords) -> Result<Option<PageLocation>, DataError> {
        self.ensure_open()?;
        Ok(self.index.read().await.get(coords).copied())
    }
}

#[async_trait]
impl Storage for MultipageStorage {
    async fn put_image(&self, image: Image) -> Result<(), DataError> {
        self.ensure_writable()?;
        let mut guard = self.writer.lock().await;
        let Some(state) = guard.as_mut() else {
            return Err(DataError::closed("multipage storage"));
        };

        let coords = image.coords().clone();
        if self.index.read().await.contains_key(&coords) {
            return Err(DataError::DuplicateCoordinate(coords));
        }
        self.summary.read().await.declared.check_extents(&coords)?;

        let record = ImageRecord::describe(&image);
        let payload = record.to_json()?;
        let page_len = page_len(&image, &payload);
        let summary_len = self.projected_summary_len(&coords).await?;
        let max_file_bytes = state.layout.max_file_bytes;

        let key = if state.layout.split_positions {
            Some(coords.position())
        } else {
            None
        };

        if !state.streams.contains_key(&key) {
            let active = self.open_container(key, 0).await?;
            state.streams.insert(
                key,
                Stream {
                    position: key,
                    sequence: 0,
                    active,
                },
            );
        }

        let needs_rollover = match state.streams.get(&key) {
            Some(stream) => {
                let projected = stream.active.projected_len(page_len, &coords, summary_len);
                if projected <= max_file_bytes {
                    false
                } else if stream.active.is_empty() {
                    return Err(DataError::InvalidArgument(format!(
                        "image at {} needs {} bytes, more than the {} byte container limit",
                        coords, projected, max_file_bytes
                    )));
                } else {
                    true
                }
            }
            None => false,
        };

        if needs_rollover {
            let summary_json = self.summary_json().await?;
            if let Some(stream) = state.streams.get_mut(&key) {
                let next = self
                    .open_container(stream.position, stream.sequence + 1)
                    .await?;
                let mut previous = std::mem::replace(&mut stream.active, next);
                stream.sequence += 1;
                previous.finalize(&summary_json).await?;
                info!(
                    path = %previous.path().display(),
                    next = %stream.active.path().display(),
                    "Container full, rolled over"
                );
            }
        }

        let Some(stream) = state.streams.get_mut(&key) else {
            return Err(DataError::IllegalState(
                "container stream disappeared while writing".into(),
            ));
        };
        let ifd_offset = stream.active.append(&image, &payload).await?;
        let location = PageLocation {
            file: stream.active.file_id(),
            ifd_offset,
        };

        self.index.write().await.insert(coords.clone(), location);
        {
            let mut summary = self.summary.write().await;
            if let Some(widened) = summary.effective.widened_to(&coords)? {
                summary.effective = widened;
            }
        }
        if state.layout.separate_metadata {
            state.records.push(record);
        }

        debug!(%coords, file = location.file, ifd_offset, "Appended page");
        Ok(())
    }

    async fn get_image(&self, coords: &Coords) -> Result<Image, DataError> {
        let location = self
            .page_location(coords)
            .await?
            .ok_or_else(|| DataError::NotFound(format!("no image at {}", coords)))?;

        let file = self
            .files
            .read()
            .await
            .get(location.file)
            .cloned()
            .ok_or_else(|| DataError::CorruptStore(format!("unknown file for {}", coords)))?;
        let reader = file.reader().await?;

        let page = TiffPage::read(reader, ByteOrder::LittleEndian, location.ifd_offset).await?;
        let payload = page.payload.as_deref().ok_or_else(|| {
            DataError::CorruptStore(format!(
                "page at {} in {} has no metadata",
                location.ifd_offset,
                file.path.display()
            ))
        })?;
        let record = ImageRecord::from_json(payload)?;
        if &record.coords != coords {
            return Err(DataError::CorruptStore(format!(
                "index points {} at a page holding {}",
                coords, record.coords
            )));
        }
        let pixels = page.read_pixels(reader).await?;
        record.into_image(pixels)
    }

    async fn has_image(&self, coords: &Coords) -> Result<bool, DataError> {
        Ok(self.page_location(coords).await?.is_some())
    }

    async fn summary_metadata(&self) -> Result<SummaryMetadata, DataError> {
        self.ensure_open()?;
        Ok(self.summary.read().await.effective.clone())
    }

    async fn set_summary_metadata(&self, summary: SummaryMetadata) -> Result<(), DataError> {
        self.ensure_writable()?;
        let writer = self.writer.lock().await;

        let index = self.index.read().await;
        let mut effective = summary.clone();
        for coords in index.keys() {
            summary.check_extents(coords)?;
            if let Some(widened) = effective.widened_to(coords)? {
                effective = widened;
            }
        }

        if let Some(state) = writer.as_ref() {
            let summary_len = serde_json::to_string(&effective)
                .map_err(|e| DataError::InvalidArgument(format!("cannot serialize summary: {}", e)))?
                .len();
            let max_file_bytes = state.layout.max_file_bytes;
            let largest = state
                .streams
                .values()
                .map(|stream| stream.active.finalized_len(summary_len))
                .fold(empty_container_len(summary_len), u64::max);
            if largest > max_file_bytes {
                return Err(DataError::InvalidArgument(format!(
                    "a {} byte summary would grow a container to {} bytes, over the {} byte limit",
                    summary_len, largest, max_file_bytes
                )));
            }
        }

        *self.summary.write().await = SummaryState {
            declared: summary,
            effective,
        };
        Ok(())
    }

    async fn coords(&self) -> Result<CoordsIter, DataError> {
        self.ensure_open()?;
        let coords = self.index.read().await.keys().cloned().collect();
        Ok(CoordsIter::new(coords))
    }

    async fn image_count(&self) -> Result<usize, DataError> {
        self.ensure_open()?;
        Ok(self.index.read().await.len())
    }

    async fn close(&self) -> Result<(), DataError> {
        let mut guard = self.writer.lock().await;
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }

        // A failed finish leaves the state in place so close can be retried
        if let Some(state) = guard.as_mut() {
            self.finish(state).await?;
        }
        *guard = None;
        self.closed.store(true, Ordering::Release);

        self.index.write().await.clear();
        self.files.write().await.clear();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn kind(&self) -> StorageKind {
        StorageKind::MultipageTiff
    }
}


/// File name prefix for a dataset stored in `dir`.
fn dataset_prefix(dir: &Path) -> String {
    dir.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "dataset".to_string())
}

/// Rollover number `<k>` of a container named `..._MMStack[_Pos<n>][_<k>].tif`.
fn container_sequence(path: &Path) -> u32 {
    let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
        return 0;
    };
    let Some((_, suffix)) = stem.rsplit_once("_MMStack") else {
        return 0;
    };
    suffix
        .rsplit('_')
        .next()
        .and_then(|last| last.parse().ok())
        .unwrap_or(0)
}

fn is_container_name(path: &Path, prefix: &str) -> bool {
    path.file_name()
        .map(|name| {
            name.to_string_lossy()
                .starts_with(&format!("{}_MMStack", prefix))
        })
        .unwrap_or(false)
}
