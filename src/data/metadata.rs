//! Per-image acquisition metadata.
//!
//! Every field is optional: an absent field means "not recorded", which is
//! distinct from a recorded zero.

use serde::{Deserialize, Serialize};

use crate::error::DataError;

use super::property_map::PropertyMap;

/// Immutable description of the conditions under which one image was acquired.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    camera: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    binning: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bit_depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exposure_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    elapsed_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    received_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pixel_size_um: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    position_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    x_position_um: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    y_position_um: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    z_position_um: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_shutter_open: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_name: Option<String>,
    #[serde(skip_serializing_if = "PropertyMap::is_empty")]
    scope_data: PropertyMap,
    #[serde(skip_serializing_if = "PropertyMap::is_empty")]
    user_data: PropertyMap,
}

impl Metadata {
    pub fn builder() -> MetadataBuilder {
        MetadataBuilder::default()
    }

    /// Start a builder from a copy of this metadata.
    pub fn to_builder(&self) -> MetadataBuilder {
        MetadataBuilder {
            inner: self.clone(),
        }
    }

    pub fn camera(&self) -> Option<&str> {
        self.camera.as_deref()
    }

    pub fn binning(&self) -> Option<u32> {
        self.binning
    }

    pub fn bit_depth(&self) -> Option<u32> {
        self.bit_depth
    }

    pub fn exposure_ms(&self) -> Option<f64> {
        self.exposure_ms
    }

    /// Milliseconds since the start of the acquisition.
    pub fn elapsed_time_ms(&self) -> Option<f64> {
        self.elapsed_time_ms
    }

    pub fn received_time(&self) -> Option<&str> {
        self.received_time.as_deref()
    }

    pub fn pixel_size_um(&self) -> Option<f64> {
        self.pixel_size_um
    }

    pub fn position_name(&self) -> Option<&str> {
        self.position_name.as_deref()
    }

    pub fn x_position_um(&self) -> Option<f64> {
        self.x_position_um
    }

    pub fn y_position_um(&self) -> Option<f64> {
        self.y_position_um
    }

    pub fn z_position_um(&self) -> Option<f64> {
        self.z_position_um
    }

    pub fn image_number(&self) -> Option<u64> {
        self.image_number
    }

    pub fn keep_shutter_open(&self) -> Option<bool> {
        self.keep_shutter_open
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// Device property snapshot taken with the image.
    pub fn scope_data(&self) -> &PropertyMap {
        &self.scope_data
    }

    pub fn user_data(&self) -> &PropertyMap {
        &self.user_data
    }
}

// =============================================================================
// MetadataBuilder
// =============================================================================

/// Mutable accumulator for [`Metadata`].
///
/// Setters for measured quantities validate their input and return
/// `InvalidArgument` for negative or non-finite values.
#[derive(Debug, Clone, Default)]
pub struct MetadataBuilder {
    inner: Metadata,
}

impl MetadataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn camera(mut self, camera: impl Into<String>) -> Self {
        self.inner.camera = Some(camera.into());
        self
    }

    pub fn binning(mut self, binning: u32) -> Result<Self, DataError> {
        if binning == 0 {
            return Err(DataError::InvalidArgument(
                "binning must be at least 1".to_string(),
            ));
        }
        self.inner.binning = Some(binning);
        Ok(self)
    }

    pub fn bit_depth(mut self, bit_depth: u32) -> Self {
        self.inner.bit_depth = Some(bit_depth);
        self
    }

    pub fn exposure_ms(mut self, exposure_ms: f64) -> Result<Self, DataError> {
        self.inner.exposure_ms = Some(non_negative("exposure_ms", exposure_ms)?);
        Ok(self)
    }

    pub fn elapsed_time_ms(mut self, elapsed_ms: f64) -> Result<Self, DataError> {
        self.inner.elapsed_time_ms = Some(non_negative("elapsed_time_ms", elapsed_ms)?);
        Ok(self)
    }

    pub fn received_time(mut self, received: impl Into<String>) -> Self {
        self.inner.received_time = Some(received.into());
        self
    }

    pub fn pixel_size_um(mut self, size: f64) -> Result<Self, DataError> {
        self.inner.pixel_size_um = Some(non_negative("pixel_size_um", size)?);
        Ok(self)
    }

    pub fn position_name(mut self, name: impl Into<String>) -> Self {
        self.inner.position_name = Some(name.into());
        self
    }

    pub fn x_position_um(mut self, x: f64) -> Self {
        self.inner.x_position_um = Some(x);
        self
    }

    pub fn y_position_um(mut self, y: f64) -> Self {
        self.inner.y_position_um = Some(y);
        self
    }

    pub fn z_position_um(mut self, z: f64) -> Self {
        self.inner.z_position_um = Some(z);
        self
    }

    pub fn image_number(mut self, number: u64) -> Self {
        self.inner.image_number = Some(number);
        self
    }

    pub fn keep_shutter_open(mut self, keep_open: bool) -> Self {
        self.inner.keep_shutter_open = Some(keep_open);
        self
    }

    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        self.inner.file_name = Some(name.into());
        self
    }

    pub fn scope_data(mut self, data: PropertyMap) -> Self {
        self.inner.scope_data = data;
        self
    }

    pub fn user_data(mut self, data: PropertyMap) -> Self {
        self.inner.user_data = data;
        self
    }

    pub fn build(&self) -> Metadata {
        self.inner.clone()
    }
}

pub(crate) fn non_negative(field: &str, value: f64) -> Result<f64, DataError> {
    if !value.is_finite() || value < 0.0 {
        return Err(DataError::InvalidArgument(format!(
            "{} must be a finite, non-negative number, got {}",
            field, value
        )));
    }
    Ok(value)
}
