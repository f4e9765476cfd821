//! Dataset-wide summary metadata.

use serde::{Deserialize, Serialize};

use crate::error::DataError;

use super::coords::Coords;
use super::metadata::non_negative;
use super::property_map::PropertyMap;

/// Immutable description of a dataset as a whole.
///
/// `intended_dimensions` is a [`Coords`] whose value on each axis is the
/// declared length of that axis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SummaryMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    computer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    directory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel_group: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    channel_names: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    z_step_um: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    wait_interval_ms: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    axis_order: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    intended_dimensions: Option<Coords>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    comments: Option<String>,
    #[serde(skip_serializing_if = "PropertyMap::is_empty")]
    user_data: PropertyMap,
}

impl SummaryMetadata {
    pub fn builder() -> SummaryMetadataBuilder {
        SummaryMetadataBuilder::default()
    }

    pub fn to_builder(&self) -> SummaryMetadataBuilder {
        SummaryMetadataBuilder {
            inner: self.clone(),
        }
    }

    /// File name prefix for the dataset.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref()
    }

    pub fn computer_name(&self) -> Option<&str> {
        self.computer_name.as_deref()
    }

    pub fn directory(&self) -> Option<&str> {
        self.directory.as_deref()
    }

    pub fn channel_group(&self) -> Option<&str> {
        self.channel_group.as_deref()
    }

    pub fn channel_names(&self) -> &[String] {
        &self.channel_names
    }

    pub fn z_step_um(&self) -> Option<f64> {
        self.z_step_um
    }

    pub fn wait_interval_ms(&self) -> Option<f64> {
        self.wait_interval_ms
    }

    pub fn axis_order(&self) -> &[String] {
        &self.axis_order
    }

    pub fn intended_dimensions(&self) -> Option<&Coords> {
        self.intended_dimensions.as_ref()
    }

    pub fn start_date(&self) -> Option<&str> {
        self.start_date.as_deref()
    }

    pub fn comments(&self) -> Option<&str> {
        self.comments.as_deref()
    }

    pub fn user_data(&self) -> &PropertyMap {
        &self.user_data
    }

    /// Summary whose declared extents cover `coords`.
    ///
    /// Returns `None` when the current extents already cover it, so callers
    /// can skip a rewrite.
    pub(crate) fn widened_to(&self, coords: &Coords) -> Result<Option<SummaryMetadata>, DataError> {
        let current = self.intended_dimensions.clone().unwrap_or_default();
        let mut builder = current.to_builder();
        let mut changed = self.intended_dimensions.is_none();
        for (axis, index) in coords.iter() {
            let length = index.saturating_add(1);
            if !current.has_axis(axis) || current.index(axis) < length {
                builder = builder.index(axis, i64::from(length))?;
                changed = true;
            }
        }
        if !changed {
            return Ok(None);
        }
        let mut widened = self.clone();
        widened.intended_dimensions = Some(builder.build());
        Ok(Some(widened))
    }

    /// Check `coords` against the declared extents without widening them.
    ///
    /// Axes declared with length 0 count as undeclared.
    pub(crate) fn check_extents(&self, coords: &Coords) -> Result<(), DataError> {
        let Some(dims) = &self.intended_dimensions else {
            return Ok(());
        };
        for (axis, length) in dims.nonzero() {
            let index = coords.index(axis);
            if index >= length {
                return Err(DataError::ExtentViolation {
                    coords: coords.clone(),
                    axis: axis.to_string(),
                    extent: length,
                });
            }
        }
        Ok(())
    }
}

// =============================================================================
// SummaryMetadataBuilder
// =============================================================================

/// Mutable accumulator for [`SummaryMetadata`].
#[derive(Debug, Clone, Default)]
pub struct SummaryMetadataBuilder {
    inner: SummaryMetadata,
}

impl SummaryMetadataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.inner.prefix = Some(prefix.into());
        self
    }

    pub fn user_name(mut self, name: impl Into<String>) -> Self {
        self.inner.user_name = Some(name.into());
        self
    }

    pub fn computer_name(mut self, name: impl Into<String>) -> Self {
        self.inner.computer_name = Some(name.into());
        self
    }

    pub fn directory(mut self, directory: impl Into<String>) -> Self {
        self.inner.directory = Some(directory.into());
        self
    }

    pub fn channel_group(mut self, group: impl Into<String>) -> Self {
        self.inner.channel_group = Some(group.into());
        self
    }

    pub fn channel_names(mut self, names: Vec<String>) -> Self {
        self.inner.channel_names = names;
        self
    }

    pub fn z_step_um(mut self, step: f64) -> Result<Self, DataError> {
        self.inner.z_step_um = Some(non_negative("z_step_um", step)?);
        Ok(self)
    }

    pub fn wait_interval_ms(mut self, interval: f64) -> Result<Self, DataError> {
        self.inner.wait_interval_ms = Some(non_negative("wait_interval_ms", interval)?);
        Ok(self)
    }

    pub fn axis_order(mut self, order: Vec<String>) -> Self {
        self.inner.axis_order = order;
        self
    }

    /// Declare the length of each axis.
    pub fn intended_dimensions(mut self, dims: Coords) -> Self {
        self.inner.intended_dimensions = Some(dims);
        self
    }

    pub fn start_date(mut self, date: impl Into<String>) -> Self {
        self.inner.start_date = Some(date.into());
        self
    }

    pub fn comments(mut self, comments: impl Into<String>) -> Self {
        self.inner.comments = Some(comments.into());
        self
    }

    pub fn user_data(mut self, data: PropertyMap) -> Self {
        self.inner.user_data = data;
        self
    }

    pub fn build(&self) -> SummaryMetadata {
        self.inner.clone()
    }
}
