//! Data manager: datastore factory and dataset loading.
//!
//! The [`DataManager`] is the entry point for client code. It creates
//! datastores already bound to a backend, opens existing datasets after
//! detecting their on-disk format, and hands out the value builders.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mm_datastore::{DataManager, LoadMode, NoopPublisher};
//!
//! # async fn run() -> Result<(), mm_datastore::DataError> {
//! let manager = DataManager::new(Arc::new(NoopPublisher));
//! let store = manager.load_data("/data/acq_1", LoadMode::Virtual).await?;
//! for coords in store.coords().await? {
//!     let image = store.get_image(&coords).await?;
//!     println!("{} -> {}", coords, image.geometry());
//! }
//! store.close().await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tracing::info;

use crate::config::StorageOptions;
use crate::data::{
    convert_raw_buffer, Coords, CoordsBuilder, Image, Metadata, MetadataBuilder, PixelGeometry,
    PropertyMapBuilder, RawBuffer, SummaryMetadataBuilder,
};
use crate::datastore::Datastore;
use crate::error::DataError;
use crate::events::EventPublisher;
use crate::format::{detect_format, DatasetFormat};
use crate::storage::{MultipageStorage, RamStorage, SinglePlaneStorage, Storage};

/// How [`DataManager::load_data`] brings a dataset into the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    /// Read pixels from disk on demand.
    #[default]
    Virtual,
    /// Copy every image into memory and release the files.
    InMemory,
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadMode::Virtual => f.write_str("virtual"),
            LoadMode::InMemory => f.write_str("in-memory"),
        }
    }
}

/// Factory for datastores and dataset values.
#[derive(Clone)]
pub struct DataManager {
    publisher: Arc<dyn EventPublisher>,
    options: StorageOptions,
}

impl DataManager {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            publisher,
            options: StorageOptions::default(),
        }
    }

    /// Manager whose file-backed datastores use `options`.
    pub fn with_options(
        publisher: Arc<dyn EventPublisher>,
        options: StorageOptions,
    ) -> Result<Self, DataError> {
        options.validate()?;
        Ok(Self { publisher, options })
    }

    pub fn options(&self) -> StorageOptions {
        self.options
    }

    fn bind(&self, storage: Box<dyn Storage>) -> Result<Datastore, DataError> {
        let store = Datastore::new(Arc::clone(&self.publisher));
        store.set_storage(storage)?;
        Ok(store)
    }

    // -------------------------------------------------------------------------
    // Datastore creation
    // -------------------------------------------------------------------------

    pub fn create_ram_datastore(&self) -> Result<Datastore, DataError> {
        self.bind(Box::new(RamStorage::new()))
    }

    /// New multipage dataset in `dir`. The directory is created if needed.
    pub async fn create_multipage_datastore(
        &self,
        dir: impl AsRef<Path>,
        separate_metadata: bool,
        split_positions: bool,
    ) -> Result<Datastore, DataError> {
        let storage =
            MultipageStorage::create(dir, separate_metadata, split_positions, self.options)
                .await?;
        self.bind(Box::new(storage))
    }

    pub async fn create_single_plane_datastore(
        &self,
        dir: impl AsRef<Path>,
    ) -> Result<Datastore, DataError> {
        let storage = SinglePlaneStorage::create(dir).await?;
        self.bind(Box::new(storage))
    }

    // -------------------------------------------------------------------------
    // Loading
    // -------------------------------------------------------------------------

    /// Open the dataset in `dir`.
    ///
    /// The format is detected from file headers. With [`LoadMode::InMemory`]
    /// the images are copied into a RAM datastore and the file-backed one is
    /// closed before returning.
    pub async fn load_data(
        &self,
        dir: impl AsRef<Path>,
        mode: LoadMode,
    ) -> Result<Datastore, DataError> {
        let dir = dir.as_ref();
        let format = detect_format(dir).await?;
        info!(dir = %dir.display(), format = format.name(), %mode, "Loading dataset");

        let storage: Box<dyn Storage> = match format {
            DatasetFormat::MultipageTiff => Box::new(MultipageStorage::open(dir).await?),
            DatasetFormat::SinglePlaneTiffSeries => Box::new(SinglePlaneStorage::open(dir).await?),
        };
        let on_disk = self.bind(storage)?;

        match mode {
            LoadMode::Virtual => Ok(on_disk),
            LoadMode::InMemory => {
                let in_memory = self.create_ram_datastore()?;
                let copied = in_memory.copy_from(&on_disk).await;
                let closed = on_disk.close().await;
                copied?;
                closed?;
                Ok(in_memory)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Values
    // -------------------------------------------------------------------------

    pub fn create_image(
        &self,
        pixels: impl Into<Bytes>,
        geometry: PixelGeometry,
        coords: Coords,
        metadata: Metadata,
    ) -> Result<Image, DataError> {
        Image::new(pixels, geometry, coords, metadata)
    }

    /// Convert an acquisition buffer into an [`Image`]; explicit values
    /// override the buffer's tags.
    pub fn convert_raw_buffer(
        &self,
        raw: &RawBuffer,
        geometry: Option<PixelGeometry>,
        coords: Option<Coords>,
        metadata: Option<Metadata>,
    ) -> Result<Image, DataError> {
        convert_raw_buffer(raw, geometry, coords, metadata)
    }

    pub fn coords_builder(&self) -> CoordsBuilder {
        Coords::builder()
    }

    pub fn metadata_builder(&self) -> MetadataBuilder {
        Metadata::builder()
    }

    pub fn summary_metadata_builder(&self) -> SummaryMetadataBuilder {
        SummaryMetadataBuilder::new()
    }

    pub fn property_map_builder(&self) -> PropertyMapBuilder {
        PropertyMapBuilder::new()
    }
}

impl fmt::Debug for DataManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataManager")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
