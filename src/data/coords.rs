//! Multi-axis image coordinates.
//!
//! A [`Coords`] maps axis names to non-negative indices and identifies a
//! single image plane within a dataset.
//!
//! # Equality
//!
//! An axis that is absent from a coordinate is treated as index 0. This means
//! `{channel: 0, frame: 1}` and `{frame: 1}` are the same coordinate: they
//! compare equal, hash identically and order identically. Zero-valued axes
//! are still remembered, so [`Coords::axes`] reports every axis that was set.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::DataError;

/// Axis along which channels vary.
pub const CHANNEL: &str = "channel";

/// Axis along which focal planes vary.
pub const SLICE: &str = "slice";

/// Axis along which time points vary.
pub const FRAME: &str = "frame";

/// Axis along which stage positions vary.
pub const POSITION: &str = "position";

/// Immutable coordinate of one image within a dataset.
///
/// Serialized as a plain `{axis: index}` map. Deserialization applies the
/// same axis-name rules as [`CoordsBuilder`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(into = "BTreeMap<String, u32>", try_from = "BTreeMap<String, u32>")]
pub struct Coords {
    axes: BTreeMap<String, u32>,
}

impl Coords {
    /// Start building a new coordinate.
    pub fn builder() -> CoordsBuilder {
        CoordsBuilder::default()
    }

    /// Start a builder pre-populated with this coordinate's axes.
    pub fn to_builder(&self) -> CoordsBuilder {
        CoordsBuilder {
            axes: self.axes.clone(),
        }
    }

    /// Index along `axis`, 0 if the axis was never set.
    pub fn index(&self, axis: &str) -> u32 {
        self.axes.get(axis).copied().unwrap_or(0)
    }

    /// Whether `axis` was explicitly set (even to 0).
    pub fn has_axis(&self, axis: &str) -> bool {
        self.axes.contains_key(axis)
    }

    /// Every explicitly set axis, in sorted order.
    pub fn axes(&self) -> impl Iterator<Item = &str> {
        self.axes.keys().map(String::as_str)
    }

    /// `(axis, index)` pairs for every explicitly set axis.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.axes.iter().map(|(axis, index)| (axis.as_str(), *index))
    }

    /// `(axis, index)` pairs with a non-zero index; the canonical form used
    /// for equality, hashing and file naming.
    pub fn nonzero(&self) -> impl Iterator<Item = (&str, u32)> {
        self.iter().filter(|(_, index)| *index != 0)
    }

    /// Number of explicitly set axes.
    pub fn len(&self) -> usize {
        self.axes.len()
    }

    /// True when no axis has been set.
    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    pub fn channel(&self) -> u32 {
        self.index(CHANNEL)
    }

    pub fn slice(&self) -> u32 {
        self.index(SLICE)
    }

    pub fn frame(&self) -> u32 {
        self.index(FRAME)
    }

    pub fn position(&self) -> u32 {
        self.index(POSITION)
    }
}

impl From<Coords> for BTreeMap<String, u32> {
    fn from(coords: Coords) -> Self {
        coords.axes
    }
}

impl TryFrom<BTreeMap<String, u32>> for Coords {
    type Error = DataError;

    fn try_from(axes: BTreeMap<String, u32>) -> Result<Self, Self::Error> {
        for axis in axes.keys() {
            validate_axis_name(axis)?;
        }
        Ok(Self { axes })
    }
}

impl PartialEq for Coords {
    fn eq(&self, other: &Self) -> bool {
        self.nonzero().eq(other.nonzero())
    }
}

impl Eq for Coords {}

impl Hash for Coords {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for (axis, index) in self.nonzero() {
            axis.hash(state);
            index.hash(state);
        }
    }
}

impl PartialOrd for Coords {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Coords {
    fn cmp(&self, other: &Self) -> Ordering {
        self.nonzero().cmp(other.nonzero())
    }
}

impl fmt::Display for Coords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<")?;
        for (i, (axis, index)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", axis, index)?;
        }
        write!(f, ">")
    }
}

// =============================================================================
// CoordsBuilder
// =============================================================================

/// Mutable accumulator for [`Coords`].
///
/// ```
/// use mm_datastore::Coords;
///
/// let coords = Coords::builder().channel(1)?.frame(3)?.build();
/// assert_eq!(coords.channel(), 1);
/// assert_eq!(coords.slice(), 0);
/// # Ok::<(), mm_datastore::DataError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct CoordsBuilder {
    axes: BTreeMap<String, u32>,
}

impl CoordsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the index along `axis`.
    ///
    /// Fails with `InvalidArgument` for negative indices, indices that do not
    /// fit in a `u32`, or axis names that are not ASCII alphanumerics and `-`.
    pub fn index(mut self, axis: &str, index: i64) -> Result<Self, DataError> {
        validate_axis_name(axis)?;
        if index < 0 {
            return Err(DataError::InvalidArgument(format!(
                "index for axis '{}' must be non-negative, got {}",
                axis, index
            )));
        }
        let index = u32::try_from(index).map_err(|_| {
            DataError::InvalidArgument(format!("index {} for axis '{}' is too large", index, axis))
        })?;
        self.axes.insert(axis.to_string(), index);
        Ok(self)
    }

    pub fn channel(self, index: i64) -> Result<Self, DataError> {
        self.index(CHANNEL, index)
    }

    pub fn slice(self, index: i64) -> Result<Self, DataError> {
        self.index(SLICE, index)
    }

    pub fn frame(self, index: i64) -> Result<Self, DataError> {
        self.index(FRAME, index)
    }

    pub fn position(self, index: i64) -> Result<Self, DataError> {
        self.index(POSITION, index)
    }

    /// Forget an axis entirely.
    pub fn remove_axis(mut self, axis: &str) -> Self {
        self.axes.remove(axis);
        self
    }

    /// Produce an immutable coordinate. The builder stays usable.
    pub fn build(&self) -> Coords {
        Coords {
            axes: self.axes.clone(),
        }
    }
}

fn validate_axis_name(axis: &str) -> Result<(), DataError> {
    if axis.is_empty() {
        return Err(DataError::InvalidArgument(
            "axis name must not be empty".to_string(),
        ));
    }
    if !axis.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
        return Err(DataError::InvalidArgument(format!(
            "axis name '{}' may only contain ASCII letters, digits and '-'",
            axis
        )));
    }
    Ok(())
}
