//! # mm-datastore
//!
//! Coordinate-addressed storage for acquired microscope images.
//!
//! A [`Datastore`] holds images placed at multi-dimensional coordinates
//! (channel, slice, frame, position, ...) together with dataset-wide summary
//! metadata. Every datastore is backed by exactly one storage backend:
//!
//! - **RAM**: images kept in memory
//! - **Multipage TIFF**: MMStack containers, one or more per dataset
//! - **Single-plane TIFF series**: one TIFF per image plus `metadata.txt`
//!
//! Callers read and write through the datastore and never see which backend
//! holds the bytes. Existing datasets are opened with
//! [`DataManager::load_data`], which detects the on-disk layout and either
//! reads pixels on demand or copies everything into memory.
//!
//! ## Architecture
//!
//! - [`data`] - Immutable coordinates, metadata, images and their builders
//! - [`storage`] - The [`Storage`] backend trait and its three backends
//! - [`mod@format`] - TIFF page codec, MMStack container layout, format detection
//! - [`io`] - Positional file reads
//! - [`datastore`] - The datastore façade
//! - [`manager`] - Datastore factory and dataset loading
//! - [`events`] - Lifecycle event publishing
//! - [`config`] - Storage options and CLI types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mm_datastore::{DataManager, Metadata, NoopPublisher, PixelGeometry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mm_datastore::DataError> {
//!     let manager = DataManager::new(Arc::new(NoopPublisher));
//!     let store = manager
//!         .create_multipage_datastore("/data/acq_1", false, true)
//!         .await?;
//!
//!     let coords = manager.coords_builder().channel(1)?.frame(0)?.build();
//!     let image = manager.create_image(
//!         vec![0u8; 512 * 512 * 2],
//!         PixelGeometry::gray(512, 512, 2)?,
//!         coords,
//!         Metadata::builder().camera("Camera-1").build(),
//!     )?;
//!     store.put_image(image).await?;
//!     store.close().await
//! }
//! ```

pub mod config;
pub mod data;
pub mod datastore;
pub mod error;
pub mod events;
pub mod format;
pub mod io;
pub mod manager;
pub mod storage;

// Re-export commonly used types
pub use config::{Cli, Command, ConvertConfig, InfoConfig, StorageOptions, TargetFormat};
pub use data::{
    convert_raw_buffer, Coords, CoordsBuilder, Image, Metadata, MetadataBuilder, PixelGeometry,
    PropertyMap, PropertyMapBuilder, PropertyValue, RawBuffer, SummaryMetadata,
    SummaryMetadataBuilder, CHANNEL, FRAME, POSITION, SLICE,
};
pub use datastore::Datastore;
pub use error::{DataError, IoError, TiffError};
pub use events::{
    BroadcastPublisher, DatastoreEvent, DatastoreId, EventPublisher, NoopPublisher,
};
pub use format::{detect_format, DatasetFormat};
pub use io::{LocalFileReader, RangeReader};
pub use manager::{DataManager, LoadMode};
pub use storage::{
    CoordsIter, MultipageStorage, RamStorage, SinglePlaneStorage, Storage, StorageKind,
};
