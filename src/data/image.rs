//! Image values and conversion from raw acquisition buffers.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DataError;

use super::coords::{Coords, CHANNEL, FRAME, POSITION, SLICE};
use super::metadata::Metadata;

// =============================================================================
// PixelGeometry
// =============================================================================

/// Shape of a pixel buffer.
///
/// `bytes_per_pixel` covers all components of a pixel, so an RGB32 image has
/// `bytes_per_pixel = 4` and `components = 3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PixelGeometry {
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u32,
    pub components: u32,
}

impl PixelGeometry {
    /// Create a geometry, rejecting zero-sized dimensions.
    pub fn new(
        width: u32,
        height: u32,
        bytes_per_pixel: u32,
        components: u32,
    ) -> Result<Self, DataError> {
        let geometry = Self {
            width,
            height,
            bytes_per_pixel,
            components,
        };
        geometry.validate()?;
        Ok(geometry)
    }

    /// Single-component geometry.
    pub fn gray(width: u32, height: u32, bytes_per_pixel: u32) -> Result<Self, DataError> {
        Self::new(width, height, bytes_per_pixel, 1)
    }

    pub(crate) fn validate(&self) -> Result<(), DataError> {
        if self.width == 0 || self.height == 0 || self.bytes_per_pixel == 0 || self.components == 0
        {
            return Err(DataError::InvalidArgument(format!(
                "pixel geometry must have non-zero dimensions, got {}",
                self
            )));
        }
        if self.buffer_len().is_none() {
            return Err(DataError::InvalidArgument(format!(
                "pixel geometry {} is too large to address",
                self
            )));
        }
        Ok(())
    }

    /// Required pixel buffer length, `None` on overflow.
    pub fn buffer_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.bytes_per_pixel as usize)
    }
}

impl fmt::Display for PixelGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} ({} bytes/pixel, {} components)",
            self.width, self.height, self.bytes_per_pixel, self.components
        )
    }
}

// =============================================================================
// Image
// =============================================================================

/// Immutable image plane: pixels, their geometry, where the plane lives in
/// the dataset, and how it was acquired.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pixels: Bytes,
    geometry: PixelGeometry,
    coords: Coords,
    metadata: Metadata,
}

impl Image {
    /// Create an image, checking the buffer length against the geometry.
    ///
    /// Fails with `InvalidArgument` for a zero-sized geometry and
    /// `MalformedBuffer` when the buffer length differs from
    /// `width * height * bytes_per_pixel`.
    pub fn new(
        pixels: impl Into<Bytes>,
        geometry: PixelGeometry,
        coords: Coords,
        metadata: Metadata,
    ) -> Result<Self, DataError> {
        geometry.validate()?;
        let pixels = pixels.into();
        let expected = geometry.buffer_len().unwrap_or(usize::MAX);
        if pixels.len() != expected {
            return Err(DataError::MalformedBuffer {
                geometry,
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            pixels,
            geometry,
            coords,
            metadata,
        })
    }

    pub fn pixels(&self) -> &Bytes {
        &self.pixels
    }

    pub fn geometry(&self) -> PixelGeometry {
        self.geometry
    }

    pub fn width(&self) -> u32 {
        self.geometry.width
    }

    pub fn height(&self) -> u32 {
        self.geometry.height
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        self.geometry.bytes_per_pixel
    }

    pub fn components(&self) -> u32 {
        self.geometry.components
    }

    pub fn coords(&self) -> &Coords {
        &self.coords
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Same pixels at a different coordinate.
    pub fn with_coords(&self, coords: Coords) -> Image {
        Image {
            coords,
            ..self.clone()
        }
    }

    /// Same pixels with different metadata.
    pub fn with_metadata(&self, metadata: Metadata) -> Image {
        Image {
            metadata,
            ..self.clone()
        }
    }
}

// =============================================================================
// Raw tagged buffers
// =============================================================================

/// Pixel bytes as delivered by the acquisition layer, together with the JSON
/// tag set describing them.
#[derive(Debug, Clone)]
pub struct RawBuffer {
    pub pixels: Bytes,
    pub tags: String,
}

impl RawBuffer {
    pub fn new(pixels: impl Into<Bytes>, tags: impl Into<String>) -> Self {
        Self {
            pixels: pixels.into(),
            tags: tags.into(),
        }
    }
}

/// Convert a raw buffer into an [`Image`].
///
/// `geometry`, `coords` and `metadata` override what the tags would provide.
/// The tags are parsed only when something must be derived from them.
pub fn convert_raw_buffer(
    raw: &RawBuffer,
    geometry: Option<PixelGeometry>,
    coords: Option<Coords>,
    metadata: Option<Metadata>,
) -> Result<Image, DataError> {
    let tags = if geometry.is_some() && coords.is_some() && metadata.is_some() {
        Tags::new()
    } else {
        parse_tags(&raw.tags)?
    };

    let geometry = match geometry {
        Some(g) => g,
        None => geometry_from_tags(&tags)?,
    };
    let coords = match coords {
        Some(c) => c,
        None => coords_from_tags(&tags)?,
    };
    let metadata = match metadata {
        Some(m) => m,
        None => metadata_from_tags(&tags)?,
    };

    Image::new(raw.pixels.clone(), geometry, coords, metadata)
}

fn parse_tags(tags: &str) -> Result<Tags, DataError> {
    match serde_json::from_str::<Value>(tags) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(DataError::TagParse("tag set is not a JSON object".to_string())),
        Err(e) => Err(DataError::TagParse(e.to_string())),
    }
}

type Tags = serde_json::Map<String, Value>;

/// Integer tag; acquisition software writes numbers both as JSON numbers and
/// as strings.
fn int_tag(tags: &Tags, key: &str) -> Result<Option<i64>, DataError> {
    match tags.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| DataError::TagParse(format!("tag {} is not an integer: {}", key, n))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| DataError::TagParse(format!("tag {} is not an integer: {:?}", key, s))),
        Some(other) => Err(DataError::TagParse(format!(
            "tag {} has unexpected type: {}",
            key, other
        ))),
    }
}

fn float_tag(tags: &Tags, key: &str) -> Result<Option<f64>, DataError> {
    match tags.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| DataError::TagParse(format!("tag {} is not a number: {:?}", key, s))),
        Some(other) => Err(DataError::TagParse(format!(
            "tag {} has unexpected type: {}",
            key, other
        ))),
    }
}

fn string_tag(tags: &Tags, key: &str) -> Option<String> {
    match tags.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn required_u32(tags: &Tags, key: &str) -> Result<u32, DataError> {
    let value = int_tag(tags, key)?
        .ok_or_else(|| DataError::TagParse(format!("missing required tag {}", key)))?;
    u32::try_from(value)
        .map_err(|_| DataError::TagParse(format!("tag {} out of range: {}", key, value)))
}

fn geometry_from_tags(tags: &Tags) -> Result<PixelGeometry, DataError> {
    let width = required_u32(tags, "Width")?;
    let height = required_u32(tags, "Height")?;
    let pixel_type = string_tag(tags, "PixelType")
        .ok_or_else(|| DataError::TagParse("missing required tag PixelType".to_string()))?;
    let (bytes_per_pixel, components) = match pixel_type.as_str() {
        "GRAY8" => (1, 1),
        "GRAY16" => (2, 1),
        "GRAY32" => (4, 1),
        "RGB32" => (4, 3),
        "RGB64" => (8, 3),
        other => {
            return Err(DataError::TagParse(format!(
                "unsupported pixel type {}",
                other
            )))
        }
    };
    PixelGeometry::new(width, height, bytes_per_pixel, components)
}

fn coords_from_tags(tags: &Tags) -> Result<Coords, DataError> {
    let mut builder = Coords::builder();
    for (key, axis) in [
        ("ChannelIndex", CHANNEL),
        ("SliceIndex", SLICE),
        ("FrameIndex", FRAME),
        ("PositionIndex", POSITION),
    ] {
        if let Some(index) = int_tag(tags, key)? {
            builder = builder.index(axis, index)?;
        }
    }
    Ok(builder.build())
}

fn metadata_from_tags(tags: &Tags) -> Result<Metadata, DataError> {
    let mut builder = Metadata::builder();
    if let Some(camera) = string_tag(tags, "Camera") {
        builder = builder.camera(camera);
    }
    if let Some(binning) = int_tag(tags, "Binning")? {
        let binning = u32::try_from(binning)
            .map_err(|_| DataError::TagParse(format!("binning out of range: {}", binning)))?;
        builder = builder.binning(binning)?;
    }
    if let Some(exposure) = float_tag(tags, "Exposure-ms")? {
        builder = builder.exposure_ms(exposure)?;
    }
    if let Some(elapsed) = float_tag(tags, "ElapsedTime-ms")? {
        builder = builder.elapsed_time_ms(elapsed)?;
    }
    if let Some(size) = float_tag(tags, "PixelSizeUm")? {
        builder = builder.pixel_size_um(size)?;
    }
    if let Some(x) = float_tag(tags, "XPositionUm")? {
        builder = builder.x_position_um(x);
    }
    if let Some(y) = float_tag(tags, "YPositionUm")? {
        builder = builder.y_position_um(y);
    }
    if let Some(z) = float_tag(tags, "ZPositionUm")? {
        builder = builder.z_position_um(z);
    }
    if let Some(number) = int_tag(tags, "ImageNumber")? {
        let number = u64::try_from(number)
            .map_err(|_| DataError::TagParse(format!("image number out of range: {}", number)))?;
        builder = builder.image_number(number);
    }
    if let Some(name) = string_tag(tags, "PositionName") {
        builder = builder.position_name(name);
    }
    if let Some(received) = string_tag(tags, "ReceivedTime") {
        builder = builder.received_time(received);
    }
    Ok(builder.build())
}
