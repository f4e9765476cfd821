//! Single-plane TIFF series tests.
//!
//! Tests verify:
//! - One file per image, named after its coordinate
//! - The companion metadata file describes every image
//! - Missing plane files and malformed companions are reported

use tempfile::TempDir;

use mm_datastore::{DataError, LoadMode, StorageKind};

use super::test_utils::{coords, fill, gray16, grid, manager};

#[tokio::test]
async fn test_series_written_and_reopened() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("series");
    let manager = manager();

    let writer = manager.create_single_plane_datastore(&dir).await.unwrap();
    let all = grid(2, 2, 1);
    fill(&writer, &all, 6, 3).await;
    writer.close().await.unwrap();

    assert!(dir.join("img.tif").exists());
    assert!(dir.join("img_channel000000001.tif").exists());
    assert!(dir.join("img_channel000000001_frame000000001.tif").exists());
    assert!(dir.join("metadata.txt").exists());

    let reader = manager.load_data(&dir, LoadMode::Virtual).await.unwrap();
    assert_eq!(
        reader.storage_kind(),
        Some(StorageKind::SinglePlaneTiffSeries)
    );
    assert_eq!(reader.image_count().await.unwrap(), all.len());
    for at in &all {
        assert_eq!(reader.get_image(at).await.unwrap(), gray16(at.clone(), 6, 3));
    }
    reader.close().await.unwrap();
}

#[tokio::test]
async fn test_extent_widens_and_persists() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("widen");
    let manager = manager();

    let writer = manager.create_single_plane_datastore(&dir).await.unwrap();
    let summary = manager
        .summary_metadata_builder()
        .intended_dimensions(coords(&[("slice", 1)]))
        .comments("z stack")
        .build();
    writer.set_summary_metadata(summary).await.unwrap();
    writer
        .put_image(gray16(coords(&[("slice", 3)]), 2, 2))
        .await
        .unwrap();
    writer.close().await.unwrap();

    let reader = manager.load_data(&dir, LoadMode::Virtual).await.unwrap();
    let summary = reader.summary_metadata().await.unwrap();
    assert_eq!(summary.comments(), Some("z stack"));
    assert_eq!(summary.intended_dimensions().unwrap().slice(), 4);
    reader.close().await.unwrap();
}

#[tokio::test]
async fn test_missing_plane_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("gone");
    let manager = manager();

    let writer = manager.create_single_plane_datastore(&dir).await.unwrap();
    let at = coords(&[("frame", 2)]);
    writer.put_image(gray16(at.clone(), 2, 2)).await.unwrap();
    writer.close().await.unwrap();

    tokio::fs::remove_file(dir.join("img_frame000000002.tif"))
        .await
        .unwrap();

    let reader = manager.load_data(&dir, LoadMode::Virtual).await.unwrap();
    assert!(reader.has_image(&at).await.unwrap());
    assert!(matches!(
        reader.get_image(&at).await,
        Err(DataError::NotFound(_))
    ));
    reader.close().await.unwrap();
}

#[tokio::test]
async fn test_malformed_companion_is_corrupt() {
    let tmp = TempDir::new().unwrap();
    tokio::fs::write(tmp.path().join("metadata.txt"), "{ not json")
        .await
        .unwrap();

    let err = manager()
        .load_data(tmp.path(), LoadMode::Virtual)
        .await
        .unwrap_err();
    assert!(matches!(err, DataError::CorruptStore(_)));
}

#[tokio::test]
async fn test_create_refuses_existing_series() {
    let tmp = TempDir::new().unwrap();
    let manager = manager();

    let first = manager.create_single_plane_datastore(tmp.path()).await.unwrap();
    first.close().await.unwrap();

    assert!(matches!(
        manager.create_single_plane_datastore(tmp.path()).await,
        Err(DataError::InvalidArgument(_))
    ));
}
