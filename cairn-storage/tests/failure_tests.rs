//! Backend Failure Tests
//!
//! Each facade mutation is driven through a store that fails at a chosen
//! point. The error must reach the caller, the index lock must be released,
//! and any drift between index and store must be recoverable.

use std::collections::HashMap;

use cairn_storage::{Cache, CleanMode};
use cairn_test_utils::assertions::{
    assert_index_matches_store, assert_lock_contention, assert_storage_error, assert_unlocked,
};
use cairn_test_utils::fixtures::failing_cache;
use cairn_test_utils::{BackendKind, CacheConfig, CairnError, ConfigError, FailPoint};

#[tokio::test]
async fn test_data_save_failure_releases_lock() {
    let (cache, store) = failing_cache("app");

    store.arm(FailPoint::DataSave);
    let result = cache.set("x", "a", Some("g"), None).await;
    assert_storage_error(&result);
    store.disarm(FailPoint::DataSave);

    assert_unlocked(&cache).await;
    assert!(cache.get::<String>("a", Some("g")).await.unwrap().is_none());

    // The key was indexed before the write failed; purging drops it again.
    let dropped = cache.purge_expired().await.unwrap();
    assert_eq!(dropped, vec!["app-cache-g-a"]);
    assert_index_matches_store(&cache).await;
}

#[tokio::test]
async fn test_index_save_failure_writes_nothing() {
    let (cache, store) = failing_cache("app");

    store.arm(FailPoint::IndexSave);
    let result = cache.set("x", "a", Some("g"), None).await;
    assert_storage_error(&result);
    store.disarm(FailPoint::IndexSave);

    assert_unlocked(&cache).await;
    assert!(cache.get::<String>("a", Some("g")).await.unwrap().is_none());
    assert_index_matches_store(&cache).await;
}

#[tokio::test]
async fn test_read_failure_during_clean_keeps_data() {
    let (cache, store) = failing_cache("app");
    cache.set("x", "a", Some("g"), None).await.unwrap();

    store.arm(FailPoint::Read);
    let result = cache.clean("g", CleanMode::Group).await;
    assert_storage_error(&result);
    store.disarm(FailPoint::Read);

    assert_unlocked(&cache).await;
    assert_eq!(
        cache.get::<String>("a", Some("g")).await.unwrap().as_deref(),
        Some("x")
    );
    assert_index_matches_store(&cache).await;
}

#[tokio::test]
async fn test_data_delete_failure_in_clean_leaves_index_intact() {
    let (cache, store) = failing_cache("app");
    cache.set("x", "a", Some("g"), None).await.unwrap();
    cache.set("y", "b", Some("g"), None).await.unwrap();

    store.arm(FailPoint::DataDelete);
    let result = cache.clean("g", CleanMode::Group).await;
    assert_storage_error(&result);
    store.disarm(FailPoint::DataDelete);

    assert_unlocked(&cache).await;
    assert_index_matches_store(&cache).await;

    let removed = cache.clean("g", CleanMode::Group).await.unwrap();
    assert_eq!(removed, vec!["app-cache-g-a", "app-cache-g-b"]);
}

#[tokio::test]
async fn test_data_delete_failure_is_recovered_by_scan() {
    let (cache, store) = failing_cache("app");
    cache.set("x", "a", Some("g"), None).await.unwrap();

    store.arm(FailPoint::DataDelete);
    let result = cache.delete("a", Some("g")).await;
    assert_storage_error(&result);
    store.disarm(FailPoint::DataDelete);

    assert_unlocked(&cache).await;
    // The index already forgot the key but the item is still stored.
    assert!(cache.index_snapshot().await.unwrap().is_empty());
    assert!(cache.get::<String>("a", Some("g")).await.unwrap().is_some());

    let removed = cache.clean_by_scan("g", CleanMode::Group).await.unwrap();
    assert_eq!(removed, vec!["app-cache-g-a"]);
    assert_index_matches_store(&cache).await;
}

#[tokio::test]
async fn test_lock_release_failure_does_not_fail_the_operation() {
    let (cache, store) = failing_cache("app");

    store.arm(FailPoint::LockRelease);
    cache.set("x", "a", Some("g"), None).await.unwrap();
    store.disarm(FailPoint::LockRelease);

    // Reads never take the lock.
    assert_eq!(
        cache.get::<String>("a", Some("g")).await.unwrap().as_deref(),
        Some("x")
    );

    // The sentinel outlives the short retry budget of the next writer.
    let result = cache.set("y", "b", Some("g"), None).await;
    assert_lock_contention(&result);
}

#[tokio::test]
async fn test_none_backend_accepts_and_forgets() {
    let cache = Cache::open(&CacheConfig::new(BackendKind::None).with_namespace("app"))
        .await
        .unwrap();

    cache.set("x", "a", None, None).await.unwrap();
    assert!(cache.get::<String>("a", None).await.unwrap().is_none());
    cache.delete("a", None).await.unwrap();
    assert!(cache.clean("default", CleanMode::Group).await.unwrap().is_empty());
    assert!(cache.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_open_from_options() {
    let options: HashMap<String, String> = [
        ("adapter", "runtime"),
        ("context", "shop"),
        ("default_group", "products"),
        ("ttl", "60"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    let config = CacheConfig::from_options(&options).unwrap();
    let cache = Cache::open(&config).await.unwrap();
    assert_eq!(cache.store().backend_name(), "memory");
    assert_eq!(cache.namespace(), "shop");
    assert_eq!(cache.default_group(), "products");

    cache.set(&42, "sku", None, None).await.unwrap();
    assert_eq!(cache.get::<i32>("sku", Some("products")).await.unwrap(), Some(42));
}

#[tokio::test]
async fn test_unknown_adapter_is_rejected() {
    let options: HashMap<String, String> =
        [("adapter".to_string(), "memcached".to_string())].into_iter().collect();

    let err = CacheConfig::from_options(&options).unwrap_err();
    assert!(matches!(
        err,
        CairnError::Config(ConfigError::ProviderNotSupported { .. })
    ));
}
