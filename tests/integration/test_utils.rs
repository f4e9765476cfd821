//! Test utilities for integration tests.
//!
//! Helpers for building images at given coordinates and for comparing the
//! contents of two datastores.

use std::sync::Arc;

use mm_datastore::{
    Coords, DataManager, Datastore, Metadata, NoopPublisher, PixelGeometry, StorageOptions,
};

pub fn manager() -> DataManager {
    DataManager::new(Arc::new(NoopPublisher))
}

/// Manager whose multipage containers roll over at `max_file_bytes`.
pub fn manager_with_limit(max_file_bytes: u64) -> DataManager {
    let options = StorageOptions::with_max_file_bytes(max_file_bytes).unwrap();
    DataManager::with_options(Arc::new(NoopPublisher), options).unwrap()
}

/// Coordinates from `(axis, index)` pairs.
pub fn coords(axes: &[(&str, i64)]) -> Coords {
    let mut builder = Coords::builder();
    for (axis, index) in axes {
        builder = builder.index(axis, *index).unwrap();
    }
    builder.build()
}

/// 16-bit grayscale image whose pixels are derived from the coordinates so
/// that every image in a test dataset is distinct.
pub fn gray16(at: Coords, width: u32, height: u32) -> mm_datastore::Image {
    let seed = at
        .iter()
        .fold(7u32, |acc, (_, index)| acc.wrapping_mul(31).wrapping_add(index));
    let len = (width * height * 2) as usize;
    let pixels: Vec<u8> = (0..len)
        .map(|i| (seed as usize).wrapping_add(i * 13) as u8)
        .collect();
    let metadata = Metadata::builder()
        .camera("Camera-1")
        .exposure_ms(12.5)
        .unwrap()
        .image_number(u64::from(seed))
        .build();
    mm_datastore::Image::new(
        pixels,
        PixelGeometry::gray(width, height, 2).unwrap(),
        at,
        metadata,
    )
    .unwrap()
}

/// Every combination of `channels` x `frames` x `positions`.
pub fn grid(channels: i64, frames: i64, positions: i64) -> Vec<Coords> {
    let mut all = Vec::new();
    for position in 0..positions {
        for frame in 0..frames {
            for channel in 0..channels {
                all.push(coords(&[
                    ("channel", channel),
                    ("frame", frame),
                    ("position", position),
                ]));
            }
        }
    }
    all
}

pub async fn fill(store: &Datastore, at: &[Coords], width: u32, height: u32) {
    for c in at {
        store.put_image(gray16(c.clone(), width, height)).await.unwrap();
    }
}

/// Assert both datastores hold the same coordinates and byte-identical images.
pub async fn assert_same_images(a: &Datastore, b: &Datastore) {
    let left: Vec<Coords> = a.coords().await.unwrap().collect();
    let right: Vec<Coords> = b.coords().await.unwrap().collect();
    assert_eq!(left, right);
    for c in &left {
        let x = a.get_image(c).await.unwrap();
        let y = b.get_image(c).await.unwrap();
        assert_eq!(x.pixels(), y.pixels(), "pixels differ at {}", c);
        assert_eq!(x.geometry(), y.geometry());
        assert_eq!(x.metadata(), y.metadata());
    }
}
