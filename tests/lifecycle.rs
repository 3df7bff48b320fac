mod common;

use common::*;
use rt_cache::prelude::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn operations_require_initialization() {
    let cache = memory_cache(Arc::new(TagCatalog::new().with_tags(1)), &MemoryStorage::new());

    assert!(matches!(cache.get(&key("tag_0")).await, Err(CacheError::NotInitialized(ref name)) if name == "tags"));
    assert!(matches!(cache.clear().await, Err(CacheError::NotInitialized(_))));
    assert!(matches!(
        cache.insert(key("tag_0"), Tag::new(0, "tag_0", 0)).await,
        Err(CacheError::NotInitialized(_))
    ));
    assert!(matches!(cache.flush().await, Err(CacheError::NotInitialized(_))));
    assert!(matches!(cache.len().await, Err(CacheError::NotInitialized(_))));
    assert!(matches!(cache.is_empty().await, Err(CacheError::NotInitialized(_))));
    assert!(matches!(
        cache.contains_key(&key("tag_0")).await,
        Err(CacheError::NotInitialized(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn initialize_runs_once() -> Result<(), Box<dyn std::error::Error>> {
    let storage = MemoryStorage::new();
    storage.write_file(SNAPSHOT, r#"{"tag_0":{"id":0,"name":"tag_0","post_count":0}}"#);
    let cache = memory_cache(Arc::new(TagCatalog::new()), &storage);

    let (a, b) = tokio::join!(cache.initialize(), cache.initialize());
    assert_eq!(a?, 1);
    assert_eq!(b?, 1);

    cache.insert(key("tag_1"), Tag::new(1, "tag_1", 3)).await?;
    // A repeated call doesn't reload and wipe what has been added since.
    assert_eq!(cache.initialize().await?, 1);
    assert_eq!(cache.len().await?, 2);

    cache.dispose().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn dispose_is_idempotent_and_final() -> Result<(), Box<dyn std::error::Error>> {
    let storage = MemoryStorage::new();
    let cache = memory_cache(Arc::new(TagCatalog::new().with_tags(2)), &storage);
    cache.initialize().await?;
    cache.get(&key("tag_1")).await?;

    cache.dispose().await;
    assert!(cache.is_disposed());
    let written = storage.read_file(SNAPSHOT).expect("flushed on dispose");

    cache.dispose().await;
    assert_eq!(storage.read_file(SNAPSHOT), Some(written));

    assert!(matches!(cache.get(&key("tag_1")).await, Err(CacheError::Disposed(_))));
    assert!(matches!(cache.clear().await, Err(CacheError::Disposed(_))));
    assert!(matches!(cache.invalidate(&key("tag_1")).await, Err(CacheError::Disposed(_))));
    assert!(matches!(cache.initialize().await, Err(CacheError::Disposed(_))));
    assert!(matches!(cache.len().await, Err(CacheError::Disposed(_))));
    assert!(matches!(cache.contains_key(&key("tag_1")).await, Err(CacheError::Disposed(_))));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn dispose_waits_for_a_running_miss() -> Result<(), Box<dyn std::error::Error>> {
    let storage = MemoryStorage::new();
    let catalog = Arc::new(TagCatalog::with_latency(Duration::from_secs(1)).with_tags(1));
    let cache = memory_cache(catalog, &storage);
    cache.initialize().await?;

    let lookup = tokio::spawn({
        let cache = cache.clone();
        async move { cache.get(&key("tag_0")).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    cache.dispose().await;

    assert_eq!(lookup.await??, Some(Tag::new(0, "tag_0", 0)));
    // The miss landed before the final snapshot was taken.
    let snapshot = read_snapshot(&storage).expect("snapshot written on dispose");
    assert_eq!(snapshot.into_keys().collect::<Vec<_>>(), vec![key("tag_0")]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn dispose_stops_waiting_for_a_stuck_miss() -> Result<(), Box<dyn std::error::Error>> {
    let storage = MemoryStorage::new();
    let cache = ReadThroughCache::builder()
        .data_source(Arc::new(TagCatalog::with_latency(Duration::from_secs(60)).with_tags(1)))
        .codec(Arc::new(JsonCodec::<String, Tag>::new()))
        .path(SNAPSHOT)
        .storage(Arc::new(storage.clone()))
        .dispose_timeout(Duration::from_secs(1))
        .build()?;
    cache.initialize().await?;

    let lookup = tokio::spawn({
        let cache = cache.clone();
        async move { cache.get(&key("tag_0")).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let started = tokio::time::Instant::now();
    cache.dispose().await;
    assert!(started.elapsed() <= Duration::from_secs(1));
    assert!(cache.is_disposed());

    // The miss still completes for its caller but is never persisted.
    assert!(lookup.await??.is_some());
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(read_snapshot(&storage).is_none());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn dispose_gives_up_on_a_stuck_flush() -> Result<(), Box<dyn std::error::Error>> {
    let storage = KillSwitchStorage::default();
    let cache = ReadThroughCache::builder()
        .data_source(Arc::new(TagCatalog::new().with_tags(1)))
        .codec(Arc::new(JsonCodec::<String, Tag>::new()))
        .path(SNAPSHOT)
        .storage(Arc::new(storage.clone()))
        .dispose_timeout(Duration::from_secs(1))
        .build()?;
    cache.initialize().await?;
    cache.get(&key("tag_0")).await?;

    storage.kill(true);
    // The failure is logged, not returned; the cache is disposed either way.
    cache.dispose().await;
    assert!(cache.is_disposed());
    assert!(storage.inner.read_file(SNAPSHOT).is_none());

    // No retries once disposed.
    storage.kill(false);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(storage.inner.read_file(SNAPSHOT).is_none());
    Ok(())
}

#[tokio::test]
async fn default_configuration() -> Result<(), Box<dyn std::error::Error>> {
    let cache = ReadThroughCache::builder()
        .data_source(Arc::new(TagCatalog::new()))
        .codec(Arc::new(JsonCodec::<String, Tag>::new()))
        .path("/nonexistent/dir/tags.cache")
        .build()?;

    assert_eq!(cache.name(), std::any::type_name::<Tag>());
    assert_eq!(cache.quiet_period(), Duration::from_secs(2));
    assert_eq!(cache.max_delay(), Duration::from_secs(30));
    assert_eq!(cache.dispose_timeout(), Duration::from_secs(30));
    assert_eq!(cache.max_readers(), 8);
    assert!(cache.coalesce_misses());
    assert_eq!(cache.recovery(), SnapshotRecovery::Fail);
    assert_eq!(cache.snapshot_path(), std::path::Path::new("/nonexistent/dir/tags.cache"));

    // Missing file in a missing directory is just an empty start.
    assert_eq!(cache.initialize().await?, 0);
    cache.dispose().await;
    Ok(())
}
