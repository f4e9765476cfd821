//! The datastore: a logical, coordinate-addressed dataset.
//!
//! A [`Datastore`] is created empty and bound exactly once to a
//! [`Storage`] backend. From then on it forwards reads and writes to the
//! backend and publishes lifecycle events. Callers never need to know which
//! backend holds the bytes.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::{debug, info, warn};

use crate::data::{Coords, Image, SummaryMetadata};
use crate::error::DataError;
use crate::events::{DatastoreEvent, DatastoreId, EventPublisher};
use crate::storage::{CoordsIter, Storage, StorageKind};

static NEXT_DATASTORE_ID: AtomicU64 = AtomicU64::new(1);

/// Coordinate-addressed image dataset backed by one storage backend.
pub struct Datastore {
    id: DatastoreId,
    publisher: Arc<dyn EventPublisher>,
    storage: OnceLock<Box<dyn Storage>>,
    closed: AtomicBool,
}

impl Datastore {
    /// Create an unbound datastore and publish `Created`.
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        let id = NEXT_DATASTORE_ID.fetch_add(1, Ordering::Relaxed);
        publisher.publish(&DatastoreEvent::Created { id });
        debug!(id, "Created datastore");
        Self {
            id,
            publisher,
            storage: OnceLock::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> DatastoreId {
        self.id
    }

    /// Bind the storage backend. Only the first call succeeds; later calls
    /// fail with `IllegalState` and leave the original backend in place.
    pub fn set_storage(&self, storage: Box<dyn Storage>) -> Result<(), DataError> {
        let kind = storage.kind();
        self.storage.set(storage).map_err(|_| {
            DataError::IllegalState(format!("datastore {} already has storage", self.id))
        })?;
        self.publisher
            .publish(&DatastoreEvent::StorageAttached { id: self.id, kind });
        debug!(id = self.id, %kind, "Attached storage");
        Ok(())
    }

    fn storage(&self) -> Result<&dyn Storage, DataError> {
        self.storage
            .get()
            .map(|s| s.as_ref())
            .ok_or_else(|| DataError::IllegalState(format!("datastore {} has no storage", self.id)))
    }

    /// Kind of the bound backend, `None` while unbound.
    pub fn storage_kind(&self) -> Option<StorageKind> {
        self.storage.get().map(|s| s.kind())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn put_image(&self, image: Image) -> Result<(), DataError> {
        let coords = image.coords().clone();
        self.storage()?.put_image(image).await?;
        self.publisher
            .publish(&DatastoreEvent::ImageAdded { id: self.id, coords });
        Ok(())
    }

    pub async fn get_image(&self, coords: &Coords) -> Result<Image, DataError> {
        self.storage()?.get_image(coords).await
    }

    pub async fn has_image(&self, coords: &Coords) -> Result<bool, DataError> {
        self.storage()?.has_image(coords).await
    }

    pub async fn coords(&self) -> Result<CoordsIter, DataError> {
        self.storage()?.coords().await
    }

    pub async fn image_count(&self) -> Result<usize, DataError> {
        self.storage()?.image_count().await
    }

    pub async fn summary_metadata(&self) -> Result<SummaryMetadata, DataError> {
        self.storage()?.summary_metadata().await
    }

    pub async fn set_summary_metadata(&self, summary: SummaryMetadata) -> Result<(), DataError> {
        self.storage()?.set_summary_metadata(summary).await?;
        self.publisher
            .publish(&DatastoreEvent::SummaryChanged { id: self.id });
        Ok(())
    }

    /// Every axis named by any stored coordinate, sorted.
    pub async fn axes(&self) -> Result<Vec<String>, DataError> {
        let mut axes = BTreeSet::new();
        for coords in self.coords().await? {
            axes.extend(coords.axes().map(str::to_string));
        }
        Ok(axes.into_iter().collect())
    }

    /// One past the largest stored index along `axis`, or 0 if no stored
    /// coordinate names the axis.
    pub async fn axis_length(&self, axis: &str) -> Result<u32, DataError> {
        let length = self
            .coords()
            .await?
            .filter(|c| c.has_axis(axis))
            .map(|c| c.index(axis).saturating_add(1))
            .max()
            .unwrap_or(0);
        Ok(length)
    }

    /// Copy every image of `source`, then its summary, into this datastore.
    ///
    /// A failure part way leaves the images copied so far in place.
    pub async fn copy_from(&self, source: &Datastore) -> Result<(), DataError> {
        let coords = source.coords().await?;
        let total = coords.len();
        for coords in coords {
            let image = source.get_image(&coords).await?;
            self.put_image(image).await?;
        }
        self.set_summary_metadata(source.summary_metadata().await?)
            .await?;
        info!(from = source.id, to = self.id, images = total, "Copied datastore");
        Ok(())
    }

    /// Close the backend and publish `Closed` once it succeeds.
    ///
    /// A failed close leaves the datastore open and the call can be
    /// repeated. Closing a closed datastore does nothing.
    pub async fn close(&self) -> Result<(), DataError> {
        let storage = self.storage()?;
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        storage.close().await?;
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.publisher.publish(&DatastoreEvent::Closed { id: self.id });
            debug!(id = self.id, "Closed datastore");
        }
        Ok(())
    }
}

impl fmt::Debug for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datastore")
            .field("id", &self.id)
            .field("storage_kind", &self.storage_kind())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for Datastore {
    fn drop(&mut self) {
        if let Some(storage) = self.storage.get() {
            if storage.kind().is_file_backed() && !storage.is_closed() {
                warn!(
                    id = self.id,
                    kind = %storage.kind(),
                    "Datastore dropped without close(); files may be incomplete"
                );
            }
        }
    }
}
