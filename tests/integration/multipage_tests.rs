//! Multipage container tests.
//!
//! Tests verify:
//! - Datasets with split positions reopen as one logical datastore
//! - Rollover spreads pages over several files that all reopen
//! - Append-only and declared-extent rules
//! - The separate metadata file and container signatures on disk

use std::path::Path;

use tempfile::TempDir;

use mm_datastore::format::mmstack::is_container_header;
use mm_datastore::{Coords, DataError, LoadMode, StorageKind};

use super::test_utils::{assert_same_images, coords, fill, gray16, grid, manager, manager_with_limit};

async fn tif_names(dir: &Path) -> Vec<String> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await.unwrap();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".tif") {
            names.push(name);
        }
    }
    names.sort();
    names
}

// =============================================================================
// Split Positions
// =============================================================================

#[tokio::test]
async fn test_split_positions_reopen_virtually() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("acq");
    let manager = manager();

    let writer = manager
        .create_multipage_datastore(&dir, false, true)
        .await
        .unwrap();
    let all = grid(2, 2, 2);
    fill(&writer, &all, 8, 4).await;
    writer.close().await.unwrap();

    assert_eq!(
        tif_names(&dir).await,
        vec!["acq_MMStack_Pos0.tif", "acq_MMStack_Pos1.tif"]
    );

    let reader = manager.load_data(&dir, LoadMode::Virtual).await.unwrap();
    assert_eq!(reader.storage_kind(), Some(StorageKind::MultipageTiff));
    assert_eq!(reader.image_count().await.unwrap(), all.len());
    assert_eq!(reader.axis_length("position").await.unwrap(), 2);

    for at in &all {
        let image = reader.get_image(at).await.unwrap();
        assert_eq!(image, gray16(at.clone(), 8, 4));
    }

    let positions: Vec<u32> = reader
        .coords()
        .await
        .unwrap()
        .map(|c| c.position())
        .collect();
    assert!(positions.contains(&0));
    assert!(positions.contains(&1));
    reader.close().await.unwrap();
}

#[tokio::test]
async fn test_every_container_has_signature() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("sig");

    let store = manager()
        .create_multipage_datastore(&dir, false, true)
        .await
        .unwrap();
    fill(&store, &grid(1, 1, 3), 4, 4).await;
    store.close().await.unwrap();

    for name in tif_names(&dir).await {
        let bytes = tokio::fs::read(dir.join(&name)).await.unwrap();
        assert!(is_container_header(&bytes[..24]), "{} lacks signature", name);
    }
}

// =============================================================================
// Rollover
// =============================================================================

#[tokio::test]
async fn test_rollover_files_reopen_together() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("roll");
    let manager = manager_with_limit(4096);

    let writer = manager
        .create_multipage_datastore(&dir, false, false)
        .await
        .unwrap();
    let all = grid(3, 4, 1);
    // 32x16x2 = 1 KiB of pixels per page, so a 4 KiB file holds only a few
    fill(&writer, &all, 32, 16).await;
    writer.close().await.unwrap();

    let names = tif_names(&dir).await;
    assert!(names.len() > 1, "expected rollover, got {:?}", names);
    assert_eq!(names[0], "roll_MMStack.tif");
    for name in &names {
        let len = tokio::fs::metadata(dir.join(name)).await.unwrap().len();
        assert!(len <= 4096, "{} is {} bytes", name, len);
    }

    let reader = manager.load_data(&dir, LoadMode::Virtual).await.unwrap();
    assert_eq!(reader.image_count().await.unwrap(), all.len());
    for at in &all {
        assert_eq!(reader.get_image(at).await.unwrap(), gray16(at.clone(), 32, 16));
    }
    reader.close().await.unwrap();
}

#[tokio::test]
async fn test_image_larger_than_file_limit() {
    let tmp = TempDir::new().unwrap();
    let store = manager_with_limit(1024)
        .create_multipage_datastore(tmp.path().join("big"), false, false)
        .await
        .unwrap();

    let err = store
        .put_image(gray16(Coords::default(), 64, 64))
        .await
        .unwrap_err();
    assert!(matches!(err, DataError::InvalidArgument(_)));
    store.close().await.unwrap();
}

// =============================================================================
// Append-only and Extents
// =============================================================================

#[tokio::test]
async fn test_duplicate_coordinate_rejected() {
    let tmp = TempDir::new().unwrap();
    let store = manager()
        .create_multipage_datastore(tmp.path().join("dup"), false, false)
        .await
        .unwrap();

    let at = coords(&[("channel", 1)]);
    store.put_image(gray16(at.clone(), 2, 2)).await.unwrap();
    let err = store.put_image(gray16(at.clone(), 2, 2)).await.unwrap_err();
    assert!(matches!(err, DataError::DuplicateCoordinate(c) if c == at));
    assert_eq!(store.image_count().await.unwrap(), 1);
    store.close().await.unwrap();
}

#[tokio::test]
async fn test_declared_extent_is_fixed() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("ext");
    let manager = manager();
    let store = manager
        .create_multipage_datastore(&dir, false, false)
        .await
        .unwrap();

    let summary = manager
        .summary_metadata_builder()
        .intended_dimensions(coords(&[("channel", 2)]))
        .build();
    store.set_summary_metadata(summary).await.unwrap();

    let err = store
        .put_image(gray16(coords(&[("channel", 2)]), 2, 2))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DataError::ExtentViolation { ref axis, extent: 2, .. } if axis == "channel"
    ));

    // Undeclared axes are free; their observed extent is persisted
    store
        .put_image(gray16(coords(&[("channel", 1), ("frame", 6)]), 2, 2))
        .await
        .unwrap();
    store.close().await.unwrap();

    let reader = manager.load_data(&dir, LoadMode::Virtual).await.unwrap();
    let dims = reader
        .summary_metadata()
        .await
        .unwrap()
        .intended_dimensions()
        .cloned()
        .unwrap();
    assert_eq!(dims.channel(), 2);
    assert_eq!(dims.frame(), 7);
    reader.close().await.unwrap();
}

// =============================================================================
// Read Mode and Metadata
// =============================================================================

#[tokio::test]
async fn test_reopened_dataset_is_read_only() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("ro");
    let manager = manager();

    let writer = manager
        .create_multipage_datastore(&dir, false, false)
        .await
        .unwrap();
    fill(&writer, &grid(2, 1, 1), 2, 2).await;
    writer.close().await.unwrap();

    let reader = manager.load_data(&dir, LoadMode::Virtual).await.unwrap();
    let err = reader
        .put_image(gray16(coords(&[("frame", 5)]), 2, 2))
        .await
        .unwrap_err();
    assert!(matches!(err, DataError::IllegalState(_)));
    reader.close().await.unwrap();
}

#[tokio::test]
async fn test_separate_metadata_written_at_close() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("meta");
    let store = manager()
        .create_multipage_datastore(&dir, true, false)
        .await
        .unwrap();
    fill(&store, &grid(2, 1, 1), 2, 2).await;

    let companion = dir.join("meta_metadata.txt");
    assert!(!companion.exists());
    store.close().await.unwrap();

    let text = tokio::fs::read_to_string(&companion).await.unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["images"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn test_copy_between_containers_preserves_images() {
    let tmp = TempDir::new().unwrap();
    let manager = manager();

    let source = manager
        .create_multipage_datastore(tmp.path().join("a"), false, true)
        .await
        .unwrap();
    fill(&source, &grid(2, 2, 2), 4, 4).await;
    source.close().await.unwrap();

    let source = manager
        .load_data(tmp.path().join("a"), LoadMode::Virtual)
        .await
        .unwrap();
    let copy = manager
        .create_multipage_datastore(tmp.path().join("b"), false, false)
        .await
        .unwrap();
    copy.copy_from(&source).await.unwrap();
    copy.close().await.unwrap();

    let copy = manager
        .load_data(tmp.path().join("b"), LoadMode::Virtual)
        .await
        .unwrap();
    assert_same_images(&source, &copy).await;
    source.close().await.unwrap();
    copy.close().await.unwrap();
}
