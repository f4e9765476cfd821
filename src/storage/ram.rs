//! In-memory storage backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::data::{Coords, Image, SummaryMetadata};
use crate::error::DataError;

use super::{CoordsIter, Storage, StorageKind};

/// Images held directly in a map. Performs no I/O.
///
/// Writing past the declared `intended_dimensions` widens them.
#[derive(Default)]
pub struct RamStorage {
    images: RwLock<HashMap<Coords, Image>>,
    summary: RwLock<SummaryMetadata>,
    closed: AtomicBool,
}

impl RamStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> Result<(), DataError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DataError::closed("RAM storage"));
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for RamStorage {
    async fn put_image(&self, image: Image) -> Result<(), DataError> {
        self.ensure_open()?;
        let coords = image.coords().clone();

        {
            let mut summary = self.summary.write().await;
            if let Some(widened) = summary.widened_to(&coords)? {
                *summary = widened;
            }
        }

        let replaced = self.images.write().await.insert(coords.clone(), image);
        debug!(%coords, replaced = replaced.is_some(), "Stored image in RAM");
        Ok(())
    }

    async fn get_image(&self, coords: &Coords) -> Result<Image, DataError> {
        self.ensure_open()?;
        self.images
            .read()
            .await
            .get(coords)
            .cloned()
            .ok_or_else(|| DataError::NotFound(format!("no image at {}", coords)))
    }

    async fn has_image(&self, coords: &Coords) -> Result<bool, DataError> {
        self.ensure_open()?;
        Ok(self.images.read().await.contains_key(coords))
    }

    async fn summary_metadata(&self) -> Result<SummaryMetadata, DataError> {
        self.ensure_open()?;
        Ok(self.summary.read().await.clone())
    }

    async fn set_summary_metadata(&self, mut summary: SummaryMetadata) -> Result<(), DataError> {
        self.ensure_open()?;
        let mut current = self.summary.write().await;
        for coords in self.images.read().await.keys() {
            if let Some(widened) = summary.widened_to(coords)? {
                summary = widened;
            }
        }
        *current = summary;
        Ok(())
    }

    async fn coords(&self) -> Result<CoordsIter, DataError> {
        self.ensure_open()?;
        let coords = self.images.read().await.keys().cloned().collect();
        Ok(CoordsIter::new(coords))
    }

    async fn image_count(&self) -> Result<usize, DataError> {
        self.ensure_open()?;
        Ok(self.images.read().await.len())
    }

    async fn close(&self) -> Result<(), DataError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.images.write().await.clear();
        debug!("Closed RAM storage");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn kind(&self) -> StorageKind {
        StorageKind::Ram
    }
}
