//! One writer with concurrent readers, on a multi-threaded runtime.
//!
//! Tests verify:
//! - Every coordinate listed by a backend can be read back in full while the
//!   writer keeps adding images
//! - Overwriting a single-plane coordinate never exposes a torn plane

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tempfile::TempDir;

use mm_datastore::{Coords, Datastore, LoadMode};

use super::test_utils::{gray16, grid, manager, manager_with_limit};

const READERS: usize = 3;

/// Write `all` from one task while `READERS` tasks read back everything the
/// store lists. Returns the number of reads performed.
async fn write_while_reading(store: Arc<Datastore>, all: Vec<Coords>) -> usize {
    let total = all.len();

    let writer = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            for at in all {
                store.put_image(gray16(at, 16, 8)).await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let mut reads = 0usize;
                loop {
                    let done = store.image_count().await.unwrap() == total;
                    for at in store.coords().await.unwrap() {
                        let image = store.get_image(&at).await.unwrap();
                        assert_eq!(image, gray16(at.clone(), 16, 8), "wrong image at {}", at);
                        reads += 1;
                    }
                    if done {
                        break reads;
                    }
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    writer.await.unwrap();
    let mut reads = 0;
    for reader in readers {
        reads += reader.await.unwrap();
    }
    reads
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ram_reads_during_writes() {
    let store = Arc::new(manager().create_ram_datastore().unwrap());
    let all = grid(4, 6, 2);
    let reads = write_while_reading(Arc::clone(&store), all.clone()).await;

    assert!(reads >= all.len() * READERS);
    assert_eq!(store.image_count().await.unwrap(), all.len());
    store.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_multipage_reads_during_writes() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("live");
    // Small containers so readers also cross rollover boundaries
    let store = manager_with_limit(4096)
        .create_multipage_datastore(&dir, false, true)
        .await
        .unwrap();
    let store = Arc::new(store);
    let all = grid(4, 6, 2);
    let reads = write_while_reading(Arc::clone(&store), all.clone()).await;

    assert!(reads >= all.len() * READERS);
    store.close().await.unwrap();

    let reopened = manager()
        .load_data(&dir, LoadMode::Virtual)
        .await
        .unwrap();
    assert_eq!(reopened.image_count().await.unwrap(), all.len());
    reopened.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_plane_reads_during_writes() {
    let tmp = TempDir::new().unwrap();
    let store = manager()
        .create_single_plane_datastore(tmp.path().join("live"))
        .await
        .unwrap();
    let store = Arc::new(store);
    let all = grid(4, 6, 2);
    let reads = write_while_reading(Arc::clone(&store), all.clone()).await;

    assert!(reads >= all.len() * READERS);
    store.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_plane_overwrite_never_torn() {
    let tmp = TempDir::new().unwrap();
    let store = manager()
        .create_single_plane_datastore(tmp.path().join("overwrite"))
        .await
        .unwrap();
    let store = Arc::new(store);

    let origin = Coords::default();
    let small = gray16(origin.clone(), 32, 32);
    let large = gray16(origin.clone(), 64, 64);
    store.put_image(small.clone()).await.unwrap();

    let finished = Arc::new(AtomicBool::new(false));
    let writer = {
        let store = Arc::clone(&store);
        let finished = Arc::clone(&finished);
        let (small, large) = (small.clone(), large.clone());
        tokio::spawn(async move {
            for i in 0..200 {
                let image = if i % 2 == 0 { large.clone() } else { small.clone() };
                store.put_image(image).await.unwrap();
            }
            finished.store(true, Ordering::Release);
        })
    };

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let store = Arc::clone(&store);
            let finished = Arc::clone(&finished);
            let origin = origin.clone();
            let (small, large) = (small.clone(), large.clone());
            tokio::spawn(async move {
                let mut reads = 0usize;
                while !finished.load(Ordering::Acquire) {
                    let image = store.get_image(&origin).await.unwrap();
                    assert!(image == small || image == large, "torn plane");
                    reads += 1;
                }
                reads
            })
        })
        .collect();

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }

    // 200 writes end on the small plane
    assert_eq!(store.get_image(&origin).await.unwrap(), small);
    assert_eq!(store.image_count().await.unwrap(), 1);
    store.close().await.unwrap();
}
