//! Per-image record shared by the file-backed layouts.
//!
//! The same JSON shape is embedded in every MMStack page and listed in the
//! single-plane `metadata.txt` companion.

use serde::{Deserialize, Serialize};

use crate::data::{Coords, Image, Metadata, PixelGeometry, SummaryMetadata};
use crate::error::DataError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ImageRecord {
    pub coords: Coords,
    pub geometry: PixelGeometry,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl ImageRecord {
    pub fn describe(image: &Image) -> Self {
        Self {
            coords: image.coords().clone(),
            geometry: image.geometry(),
            metadata: image.metadata().clone(),
            file_name: None,
        }
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// Rebuild the image from pixels read back from disk.
    pub fn into_image(self, pixels: bytes::Bytes) -> Result<Image, DataError> {
        Image::new(pixels, self.geometry, self.coords, self.metadata).map_err(|e| match e {
            DataError::MalformedBuffer {
                expected, actual, ..
            } => DataError::CorruptStore(format!(
                "stored pixels are {} bytes, geometry requires {}",
                actual, expected
            )),
            other => DataError::CorruptStore(other.to_string()),
        })
    }

    pub fn to_json(&self) -> Result<String, DataError> {
        serde_json::to_string(self)
            .map_err(|e| DataError::InvalidArgument(format!("cannot serialize image record: {}", e)))
    }

    pub fn from_json(json: &str) -> Result<Self, DataError> {
        serde_json::from_str(json)
            .map_err(|e| DataError::CorruptStore(format!("unreadable image record: {}", e)))
    }
}

/// Summary plus per-image records, written as pretty JSON beside the image
/// files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DatasetDescription {
    #[serde(default)]
    pub summary: SummaryMetadata,
    #[serde(default)]
    pub images: Vec<ImageRecord>,
}

impl DatasetDescription {
    pub fn new(summary: SummaryMetadata, mut images: Vec<ImageRecord>) -> Self {
        images.sort_by(|a, b| a.coords.cmp(&b.coords));
        Self { summary, images }
    }

    pub fn to_pretty_json(&self) -> Result<String, DataError> {
        serde_json::to_string_pretty(self).map_err(|e| {
            DataError::InvalidArgument(format!("cannot serialize dataset description: {}", e))
        })
    }

    pub fn from_json(json: &str) -> Result<Self, DataError> {
        serde_json::from_str(json)
            .map_err(|e| DataError::CorruptStore(format!("unreadable dataset description: {}", e)))
    }
}
