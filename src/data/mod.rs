//! Immutable dataset values and their builders.
//!
//! Every value in this module is immutable once built. Builders are plain
//! mutable structs: setters consume and return the builder, and `build()`
//! hands out a frozen copy without affecting values built earlier.

mod coords;
mod image;
mod metadata;
mod property_map;
mod summary;

pub use coords::{Coords, CoordsBuilder, CHANNEL, FRAME, POSITION, SLICE};
pub use image::{convert_raw_buffer, Image, PixelGeometry, RawBuffer};
pub use metadata::{Metadata, MetadataBuilder};
pub use property_map::{PropertyMap, PropertyMapBuilder, PropertyValue};
pub use summary::{SummaryMetadata, SummaryMetadataBuilder};
