use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::test;

#[test]
fn test_set_and_get() {
    let cache = TtlCache::new();
    assert_eq!(cache.get("a"), None);

    assert!(cache.set("a", "1", SetOptions::default()));
    assert_eq!(cache.get("a").as_deref(), Some("1"));

    assert!(cache.set("a", "2", SetOptions::default()));
    assert_eq!(cache.get("a").as_deref(), Some("2"));
    assert_eq!(cache.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_zero_ttl_never_expires() {
    let cache = TtlCache::new();
    assert!(cache.set("a", "1", SetOptions::default().with_ttl(Duration::ZERO)));

    tokio::time::advance(Duration::from_secs(24 * 3600)).await;
    assert_eq!(cache.sweep(), 0);
    assert_eq!(cache.get("a").as_deref(), Some("1"));
}

#[tokio::test(start_paused = true)]
async fn test_ttl_expiry() {
    let cache = TtlCache::new();
    cache.set("a", "1", SetOptions::default().with_ttl(Duration::from_millis(100)));

    tokio::time::advance(Duration::from_millis(50)).await;
    assert_eq!(cache.get("a").as_deref(), Some("1"));

    tokio::time::advance(Duration::from_millis(50)).await;
    assert_eq!(cache.get("a").as_deref(), Some("1"));

    // logically gone, even though nothing was swept yet
    tokio::time::advance(Duration::from_millis(1)).await;
    assert_eq!(cache.get("a"), None);
    assert_eq!(cache.len(), 1);

    assert_eq!(cache.sweep(), 1);
    assert!(cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_overwrite_replaces_expiration() {
    let cache = TtlCache::new();
    cache.set("a", "1", SetOptions::default().with_ttl(Duration::from_millis(10)));
    cache.set("a", "2", SetOptions::default());

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(cache.get("a").as_deref(), Some("2"));

    cache.set("a", "3", SetOptions::default().with_ttl(Duration::from_millis(10)));
    tokio::time::advance(Duration::from_millis(11)).await;
    assert_eq!(cache.get("a"), None);
}

#[test]
fn test_only_if_absent() {
    let cache = TtlCache::new();
    let nx = SetOptions::default().only_if_absent();

    assert!(cache.set("c", "v", nx));
    assert!(!cache.set("c", "w", nx));
    assert_eq!(cache.get("c").as_deref(), Some("v"));

    // a plain set still overwrites
    assert!(cache.set("c", "w", SetOptions::default()));
    assert_eq!(cache.get("c").as_deref(), Some("w"));
}

#[tokio::test(start_paused = true)]
async fn test_lock_expires() {
    let cache = TtlCache::new();
    let lock = SetOptions::default()
        .with_ttl(Duration::from_secs(10))
        .only_if_absent();

    assert!(cache.set("k", "", lock));
    tokio::time::advance(Duration::from_secs(5)).await;
    assert!(!cache.set("k", "", lock));

    // the abandoned lock can be taken over without a sweep
    tokio::time::advance(Duration::from_secs(6)).await;
    assert!(cache.set("k", "", lock));
}

#[test]
fn test_delete() {
    let cache = TtlCache::new();
    cache.delete("missing");

    cache.set("a", "1", SetOptions::default());
    cache.delete("a");
    assert_eq!(cache.get("a"), None);
    assert!(cache.set("a", "2", SetOptions::default().only_if_absent()));
}

#[tokio::test(start_paused = true)]
async fn test_delete_if() {
    let cache = TtlCache::new();
    assert!(!cache.delete_if("missing", |_| true));

    cache.set("a", "1", SetOptions::default());
    assert!(!cache.delete_if("a", |value| value.is_empty()));
    assert_eq!(cache.get("a").as_deref(), Some("1"));

    // expired entries still match
    cache.set("b", "", SetOptions::default().with_ttl(Duration::from_millis(10)));
    tokio::time::advance(Duration::from_millis(20)).await;
    assert!(cache.delete_if("b", |value| value.is_empty()));
    assert_eq!(cache.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_evicts() {
    test::setup();

    let cache = Arc::new(TtlCache::new());
    let _sweeper = cache.spawn_sweeper(Duration::from_millis(100));

    cache.set("short", "1", SetOptions::default().with_ttl(Duration::from_millis(50)));
    cache.set("long", "2", SetOptions::default().with_ttl(Duration::from_secs(60)));
    cache.set("forever", "3", SetOptions::default());

    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get("long").as_deref(), Some("2"));
    assert_eq!(cache.get("forever").as_deref(), Some("3"));
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_stops_with_cache() {
    let cache = Arc::new(TtlCache::new());
    let sweeper = cache.spawn_sweeper(Duration::from_millis(100));
    drop(cache);

    tokio::time::timeout(Duration::from_secs(1), sweeper)
        .await
        .expect("sweeper should stop")
        .unwrap();
}
