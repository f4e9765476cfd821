//! In-memory datastore tests.
//!
//! Tests verify:
//! - Images read back byte-for-byte with their coordinates
//! - Coordinate snapshots list every image exactly once
//! - Writes beyond the declared extent widen it
//! - Close is idempotent and disables further access

use std::collections::HashSet;
use std::sync::Arc;

use mm_datastore::{
    BroadcastPublisher, Coords, DataError, DataManager, DatastoreEvent, Metadata, PixelGeometry,
    StorageKind,
};

use super::test_utils::{coords, gray16, manager};

// =============================================================================
// Two-image Scenario
// =============================================================================

#[tokio::test]
async fn test_two_images_at_distinct_frames() {
    let manager = manager();
    let store = manager.create_ram_datastore().unwrap();
    assert_eq!(store.storage_kind(), Some(StorageKind::Ram));

    let first_at = coords(&[("channel", 0), ("frame", 0)]);
    let first = manager
        .create_image(
            vec![1u8, 2, 3, 4],
            PixelGeometry::gray(2, 2, 1).unwrap(),
            first_at.clone(),
            Metadata::default(),
        )
        .unwrap();
    store.put_image(first).await.unwrap();

    let read = store.get_image(&first_at).await.unwrap();
    assert_eq!(read.pixels().as_ref(), &[1u8, 2, 3, 4]);
    assert_eq!(read.coords(), &first_at);

    let second_at = coords(&[("channel", 0), ("frame", 1)]);
    let second = manager
        .create_image(
            vec![5u8, 6, 7, 8],
            PixelGeometry::gray(2, 2, 1).unwrap(),
            second_at.clone(),
            Metadata::default(),
        )
        .unwrap();
    store.put_image(second).await.unwrap();

    let all: Vec<Coords> = store.coords().await.unwrap().collect();
    assert_eq!(all.len(), 2);
    let unique: HashSet<Coords> = all.into_iter().collect();
    assert_eq!(unique, HashSet::from([first_at, second_at]));

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_absent_axis_equals_zero() {
    let store = manager().create_ram_datastore().unwrap();
    store
        .put_image(gray16(coords(&[("channel", 0), ("frame", 2)]), 2, 2))
        .await
        .unwrap();

    assert!(store.has_image(&coords(&[("frame", 2)])).await.unwrap());
    assert!(!store.has_image(&coords(&[("frame", 1)])).await.unwrap());
}

#[tokio::test]
async fn test_overwrite_replaces_image() {
    let store = manager().create_ram_datastore().unwrap();
    let at = coords(&[("slice", 3)]);
    store.put_image(gray16(at.clone(), 2, 2)).await.unwrap();

    let replacement = gray16(at.clone(), 4, 1);
    store.put_image(replacement.clone()).await.unwrap();

    assert_eq!(store.image_count().await.unwrap(), 1);
    assert_eq!(store.get_image(&at).await.unwrap(), replacement);
}

#[tokio::test]
async fn test_missing_image_not_found() {
    let store = manager().create_ram_datastore().unwrap();
    let err = store.get_image(&coords(&[("channel", 9)])).await.unwrap_err();
    assert!(matches!(err, DataError::NotFound(_)));
}

// =============================================================================
// Extents
// =============================================================================

#[tokio::test]
async fn test_write_beyond_extent_widens_summary() {
    let manager = manager();
    let store = manager.create_ram_datastore().unwrap();
    let declared = manager
        .summary_metadata_builder()
        .intended_dimensions(coords(&[("channel", 2), ("frame", 2)]))
        .build();
    store.set_summary_metadata(declared).await.unwrap();

    store
        .put_image(gray16(coords(&[("channel", 4), ("frame", 1)]), 2, 2))
        .await
        .unwrap();

    let summary = store.summary_metadata().await.unwrap();
    let dims = summary.intended_dimensions().unwrap();
    assert_eq!(dims.channel(), 5);
    assert_eq!(dims.frame(), 2);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_close_twice_then_reject() {
    let store = manager().create_ram_datastore().unwrap();
    store
        .put_image(gray16(coords(&[("channel", 1)]), 2, 2))
        .await
        .unwrap();

    store.close().await.unwrap();
    store.close().await.unwrap();
    assert!(store.is_closed());

    assert!(matches!(
        store.image_count().await,
        Err(DataError::IllegalState(_))
    ));
    assert!(matches!(
        store.put_image(gray16(coords(&[("channel", 2)]), 2, 2)).await,
        Err(DataError::IllegalState(_))
    ));
}

#[tokio::test]
async fn test_events_follow_lifecycle() {
    let publisher = BroadcastPublisher::new();
    let mut events = publisher.subscribe();
    let manager = DataManager::new(Arc::new(publisher));

    let store = manager.create_ram_datastore().unwrap();
    let at = coords(&[("frame", 1)]);
    store.put_image(gray16(at.clone(), 2, 2)).await.unwrap();
    store.close().await.unwrap();
    store.close().await.unwrap();

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.datastore_id(), store.id());
        received.push(event);
    }

    let id = store.id();
    assert_eq!(
        received,
        vec![
            DatastoreEvent::Created { id },
            DatastoreEvent::StorageAttached {
                id,
                kind: StorageKind::Ram
            },
            DatastoreEvent::ImageAdded { id, coords: at },
            DatastoreEvent::Closed { id },
        ]
    );
}
