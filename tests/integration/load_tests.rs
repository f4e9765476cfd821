//! Loading and format detection tests.
//!
//! Tests verify:
//! - Virtual and in-memory loads expose the same coordinates and pixels
//! - Each layout is detected as itself and never as the other
//! - Empty, unrelated and missing directories are rejected

use std::path::Path;

use tempfile::TempDir;

use mm_datastore::{detect_format, DataError, DatasetFormat, LoadMode, StorageKind};

use super::test_utils::{assert_same_images, fill, grid, manager};

async fn write_multipage(dir: &Path) {
    let store = manager()
        .create_multipage_datastore(dir, true, true)
        .await
        .unwrap();
    fill(&store, &grid(2, 3, 2), 5, 5).await;
    store.close().await.unwrap();
}

async fn write_single_plane(dir: &Path) {
    let store = manager().create_single_plane_datastore(dir).await.unwrap();
    fill(&store, &grid(3, 2, 1), 5, 5).await;
    store.close().await.unwrap();
}

// =============================================================================
// Virtual vs In-memory
// =============================================================================

#[tokio::test]
async fn test_multipage_virtual_matches_in_memory() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("mp");
    write_multipage(&dir).await;
    let manager = manager();

    let virtual_store = manager.load_data(&dir, LoadMode::Virtual).await.unwrap();
    let memory_store = manager.load_data(&dir, LoadMode::InMemory).await.unwrap();
    assert_eq!(
        virtual_store.storage_kind(),
        Some(StorageKind::MultipageTiff)
    );
    assert_eq!(memory_store.storage_kind(), Some(StorageKind::Ram));

    assert_same_images(&virtual_store, &memory_store).await;
    assert_eq!(
        virtual_store.summary_metadata().await.unwrap(),
        memory_store.summary_metadata().await.unwrap()
    );

    virtual_store.close().await.unwrap();
    memory_store.close().await.unwrap();
}

#[tokio::test]
async fn test_single_plane_virtual_matches_in_memory() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("sp");
    write_single_plane(&dir).await;
    let manager = manager();

    let virtual_store = manager.load_data(&dir, LoadMode::Virtual).await.unwrap();
    let memory_store = manager.load_data(&dir, LoadMode::InMemory).await.unwrap();
    assert_same_images(&virtual_store, &memory_store).await;

    virtual_store.close().await.unwrap();
    memory_store.close().await.unwrap();
}

#[tokio::test]
async fn test_convert_multipage_to_single_plane() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    let dst = tmp.path().join("dst");
    write_multipage(&src).await;
    let manager = manager();

    let source = manager.load_data(&src, LoadMode::Virtual).await.unwrap();
    let target = manager.create_single_plane_datastore(&dst).await.unwrap();
    target.copy_from(&source).await.unwrap();
    target.close().await.unwrap();

    let target = manager.load_data(&dst, LoadMode::Virtual).await.unwrap();
    assert_same_images(&source, &target).await;
    source.close().await.unwrap();
    target.close().await.unwrap();
}

// =============================================================================
// Detection
// =============================================================================

#[tokio::test]
async fn test_detects_each_layout() {
    let tmp = TempDir::new().unwrap();
    let mp = tmp.path().join("mp");
    let sp = tmp.path().join("sp");
    write_multipage(&mp).await;
    write_single_plane(&sp).await;

    assert_eq!(
        detect_format(&mp).await.unwrap(),
        DatasetFormat::MultipageTiff
    );
    assert_eq!(
        detect_format(&sp).await.unwrap(),
        DatasetFormat::SinglePlaneTiffSeries
    );
}

#[tokio::test]
async fn test_empty_directory_rejected() {
    let tmp = TempDir::new().unwrap();
    let err = manager()
        .load_data(tmp.path(), LoadMode::InMemory)
        .await
        .unwrap_err();
    assert!(matches!(err, DataError::CorruptStore(_)));
}

#[tokio::test]
async fn test_unrelated_directory_rejected() {
    let tmp = TempDir::new().unwrap();
    // A plain TIFF header without the container signature
    let mut bytes = vec![b'I', b'I', 42, 0, 8, 0, 0, 0];
    bytes.extend_from_slice(&[0u8; 64]);
    tokio::fs::write(tmp.path().join("photo.tif"), &bytes)
        .await
        .unwrap();
    tokio::fs::write(tmp.path().join("notes.txt"), "hello")
        .await
        .unwrap();

    let err = detect_format(tmp.path()).await.unwrap_err();
    assert!(matches!(err, DataError::CorruptStore(_)));
}

#[tokio::test]
async fn test_missing_directory_not_found() {
    let tmp = TempDir::new().unwrap();
    let err = detect_format(&tmp.path().join("nowhere")).await.unwrap_err();
    assert!(matches!(err, DataError::NotFound(_)));
}
