//! Storage backends for datastores.
//!
//! A [`Storage`] owns the physical copy of a dataset: the image bytes, the
//! registry mapping coordinates to where those bytes live, and the dataset's
//! [`SummaryMetadata`]. Three backends are provided:
//!
//! - [`RamStorage`]: images held in memory, no I/O
//! - [`MultipageStorage`]: MMStack multipage TIFF containers
//! - [`SinglePlaneStorage`]: one TIFF per image plus a `metadata.txt` companion
//!
//! # Concurrency
//!
//! Every backend guards its registry with a tokio `RwLock` and serializes
//! writes, so one writer and any number of readers may share a backend.
//! A coordinate appears in the registry only once its bytes are in place.
//!
//! # Lifecycle
//!
//! `close` is idempotent. After it, every other operation fails with
//! `IllegalState`.

mod multipage;
mod ram;
mod record;
mod single_plane;

use std::fmt;

use async_trait::async_trait;

use crate::data::{Coords, Image, SummaryMetadata};
use crate::error::DataError;

pub use multipage::MultipageStorage;
pub use ram::RamStorage;
pub use single_plane::SinglePlaneStorage;

pub(crate) use record::{DatasetDescription, ImageRecord};

// =============================================================================
// StorageKind
// =============================================================================

/// Which backend a [`Storage`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    Ram,
    MultipageTiff,
    SinglePlaneTiffSeries,
}

impl StorageKind {
    pub const fn name(&self) -> &'static str {
        match self {
            StorageKind::Ram => "RAM",
            StorageKind::MultipageTiff => "Multipage TIFF",
            StorageKind::SinglePlaneTiffSeries => "Single-plane TIFF series",
        }
    }

    /// Whether the backend keeps its data on disk.
    pub const fn is_file_backed(&self) -> bool {
        !matches!(self, StorageKind::Ram)
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// CoordsIter
// =============================================================================

/// Snapshot of a backend's coordinates, in sorted order.
///
/// Each call to [`Storage::coords`] takes a fresh snapshot, so iteration is
/// restartable and unaffected by later writes.
#[derive(Debug, Clone)]
pub struct CoordsIter {
    inner: std::vec::IntoIter<Coords>,
}

impl CoordsIter {
    pub(crate) fn new(mut coords: Vec<Coords>) -> Self {
        coords.sort();
        Self {
            inner: coords.into_iter(),
        }
    }
}

impl Iterator for CoordsIter {
    type Item = Coords;

    fn next(&mut self) -> Option<Coords> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for CoordsIter {}

// =============================================================================
// Storage Trait
// =============================================================================

/// Physical storage behind a datastore.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store `image` at its own coordinates.
    ///
    /// Backends that allow overwrites replace an existing image; append-only
    /// backends fail with `DuplicateCoordinate`.
    async fn put_image(&self, image: Image) -> Result<(), DataError>;

    /// Image stored at `coords`, `NotFound` if there is none.
    async fn get_image(&self, coords: &Coords) -> Result<Image, DataError>;

    async fn has_image(&self, coords: &Coords) -> Result<bool, DataError>;

    async fn summary_metadata(&self) -> Result<SummaryMetadata, DataError>;

    async fn set_summary_metadata(&self, summary: SummaryMetadata) -> Result<(), DataError>;

    /// Snapshot of every stored coordinate.
    async fn coords(&self) -> Result<CoordsIter, DataError>;

    async fn image_count(&self) -> Result<usize, DataError>;

    /// Flush and release resources. Safe to call more than once.
    async fn close(&self) -> Result<(), DataError>;

    fn is_closed(&self) -> bool;

    fn kind(&self) -> StorageKind;
}
