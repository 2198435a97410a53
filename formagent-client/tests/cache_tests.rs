mod common;

use common::sleep_ms;
use formagent_client::{ApiClientError, CacheEvent, QueryCache, QueryKey, Snapshot};
use formagent_test_utils::generators::arb_key_segments;
use proptest::prelude::*;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type BoxedFetch<T> = Pin<Box<dyn Future<Output = Result<T, ApiClientError>> + Send>>;

/// Fetcher returning `value` after `delay_ms`, counting its invocations.
fn counted(calls: &Arc<AtomicUsize>, value: u32, delay_ms: u64) -> impl FnOnce() -> BoxedFetch<u32> {
    let calls = calls.clone();
    move || -> BoxedFetch<u32> {
        Box::pin(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            if delay_ms > 0 {
                sleep_ms(delay_ms).await;
            }
            Ok(value)
        })
    }
}

fn key(segments: &[&str]) -> QueryKey {
    QueryKey::new(segments.iter().copied())
}

#[tokio::test(start_paused = true)]
async fn concurrent_reads_share_one_fetch() {
    let cache = QueryCache::new(Duration::from_secs(30));
    let calls = Arc::new(AtomicUsize::new(0));
    let k = key(&["agents", "1"]);

    let (a, b) = tokio::join!(
        cache.fetch(&k, counted(&calls, 7, 100)),
        cache.fetch(&k, counted(&calls, 8, 100)),
    );
    assert_eq!(a.unwrap(), 7);
    assert_eq!(b.unwrap(), 7);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.fetch_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn fresh_entries_are_served_until_stale_time() {
    let cache = QueryCache::new(Duration::from_secs(30));
    let calls = Arc::new(AtomicUsize::new(0));
    let k = key(&["webhooks"]);

    assert_eq!(cache.fetch(&k, counted(&calls, 1, 0)).await.unwrap(), 1);
    assert_eq!(cache.fetch(&k, counted(&calls, 2, 0)).await.unwrap(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    sleep_ms(30_001).await;
    assert!(cache.is_stale(&k));
    assert_eq!(cache.fetch(&k, counted(&calls, 3, 0)).await.unwrap(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn invalidation_causes_exactly_one_refetch() {
    let cache = QueryCache::new(Duration::from_secs(30));
    let calls = Arc::new(AtomicUsize::new(0));
    let list = key(&["agents", "list", "{}"]);
    let detail = key(&["agents", "42"]);
    let other = key(&["webhooks"]);

    cache.fetch(&list, counted(&calls, 1, 0)).await.unwrap();
    cache.fetch(&detail, counted(&calls, 1, 0)).await.unwrap();
    cache.fetch(&other, counted(&calls, 1, 0)).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    assert_eq!(cache.invalidate(&key(&["agents"])), 2);
    assert!(cache.is_stale(&list));
    assert!(cache.is_stale(&detail));
    assert!(!cache.is_stale(&other));

    assert_eq!(cache.fetch(&list, counted(&calls, 2, 0)).await.unwrap(), 2);
    assert_eq!(cache.fetch(&list, counted(&calls, 3, 0)).await.unwrap(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn fetch_started_before_invalidation_stays_stale() {
    let cache = QueryCache::new(Duration::from_secs(30));
    let calls = Arc::new(AtomicUsize::new(0));
    let k = key(&["agents", "1"]);

    let slow = {
        let cache = cache.clone();
        let k = k.clone();
        let fetcher = counted(&calls, 1, 500);
        tokio::spawn(async move { cache.fetch(&k, fetcher).await })
    };
    sleep_ms(100).await;
    cache.invalidate(&key(&["agents"]));

    assert_eq!(slow.await.unwrap().unwrap(), 1);
    assert_eq!(
        cache.peek::<u32>(&k).unwrap(),
        Snapshot::Ready { value: 1, stale: true }
    );
    assert_eq!(cache.fetch(&k, counted(&calls, 2, 0)).await.unwrap(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn outdated_fetch_never_replaces_newer_value() {
    let cache = QueryCache::new(Duration::from_secs(30));
    let calls = Arc::new(AtomicUsize::new(0));
    let k = key(&["agents", "1"]);

    let slow = {
        let cache = cache.clone();
        let k = k.clone();
        let fetcher = counted(&calls, 1, 500);
        tokio::spawn(async move { cache.fetch(&k, fetcher).await })
    };
    sleep_ms(100).await;
    cache.invalidate(&key(&["agents"]));

    // A read after the invalidation does not join the outdated fetch.
    let fresh = cache.fetch(&k, counted(&calls, 2, 0)).await.unwrap();
    assert_eq!(fresh, 2);
    assert_eq!(slow.await.unwrap().unwrap(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        cache.peek::<u32>(&k).unwrap(),
        Snapshot::Ready { value: 2, stale: false }
    );
}

#[tokio::test(start_paused = true)]
async fn read_serves_stale_value_while_revalidating() {
    let cache = QueryCache::new(Duration::from_secs(30));
    let calls = Arc::new(AtomicUsize::new(0));
    let mut events = cache.subscribe();
    let k = key(&["invoices"]);

    let first = cache.read::<u32, _, _>(&k, counted(&calls, 1, 0)).unwrap();
    assert_eq!(first, Snapshot::Loading);
    assert_eq!(events.recv().await.unwrap(), CacheEvent::Updated(k.clone()));

    let hit = cache.read::<u32, _, _>(&k, counted(&calls, 9, 0)).unwrap();
    assert_eq!(hit, Snapshot::Ready { value: 1, stale: false });

    cache.invalidate(&k);
    assert_eq!(events.recv().await.unwrap(), CacheEvent::Invalidated(k.clone()));
    let stale = cache.read::<u32, _, _>(&k, counted(&calls, 2, 0)).unwrap();
    assert_eq!(stale, Snapshot::Ready { value: 1, stale: true });
    assert_eq!(events.recv().await.unwrap(), CacheEvent::Updated(k.clone()));

    let refreshed = cache.peek::<u32>(&k).unwrap();
    assert_eq!(refreshed, Snapshot::Ready { value: 2, stale: false });
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_fetch_is_not_cached() {
    let cache = QueryCache::new(Duration::from_secs(30));
    let k = key(&["session", "9"]);

    let err = cache
        .fetch::<u32, _, _>(&k, || async {
            Err(ApiClientError::Api {
                status: 503,
                message: "API Error: 503".to_string(),
            })
        })
        .await
        .unwrap_err();
    assert_eq!(err.api_error().and_then(ApiClientError::status), Some(503));
    assert_eq!(err.to_string(), "API Error: 503");
    assert_eq!(cache.peek::<u32>(&k).unwrap(), Snapshot::Loading);

    let value = cache.fetch(&k, || async { Ok::<_, ApiClientError>(5u32) }).await.unwrap();
    assert_eq!(value, 5);
}

#[tokio::test(start_paused = true)]
async fn mutate_invalidates_only_on_success() {
    let cache = QueryCache::new(Duration::from_secs(30));
    let k = key(&["webhooks"]);
    cache.fetch(&k, || async { Ok::<_, ApiClientError>(1u32) }).await.unwrap();

    let failed = cache
        .mutate::<(), _>(&[k.clone()], async {
            Err(ApiClientError::Api {
                status: 400,
                message: "bad".to_string(),
            })
        })
        .await;
    assert!(failed.is_err());
    assert!(!cache.is_stale(&k));

    cache
        .mutate(&[k.clone()], async { Ok::<_, ApiClientError>(()) })
        .await
        .unwrap();
    assert!(cache.is_stale(&k));
}

#[tokio::test(start_paused = true)]
async fn clear_drops_everything() {
    let cache = QueryCache::new(Duration::from_secs(30));
    let mut events = cache.subscribe();
    let k = key(&["agents"]);
    cache.fetch(&k, || async { Ok::<_, ApiClientError>(1u32) }).await.unwrap();
    cache.clear();
    assert_eq!(cache.peek::<u32>(&k).unwrap(), Snapshot::Loading);
    assert_eq!(events.recv().await.unwrap(), CacheEvent::Updated(k));
    assert_eq!(events.recv().await.unwrap(), CacheEvent::Cleared);
}

#[tokio::test(start_paused = true)]
async fn fetch_from_before_clear_is_never_stored() {
    let cache = QueryCache::new(Duration::from_secs(30));
    let calls = Arc::new(AtomicUsize::new(0));
    let k = key(&["agents", "7"]);

    assert_eq!(cache.read::<u32, _, _>(&k, counted(&calls, 111, 100)).unwrap(), Snapshot::Loading);
    sleep_ms(10).await;
    cache.clear();
    let failing = || -> BoxedFetch<u32> {
        Box::pin(async {
            sleep_ms(200).await;
            Err(ApiClientError::Unauthorized)
        })
    };
    assert_eq!(cache.read::<u32, _, _>(&k, failing).unwrap(), Snapshot::Loading);
    sleep_ms(500).await;

    assert!(cache.is_stale(&k));
    assert_eq!(cache.peek::<u32>(&k).unwrap(), Snapshot::Loading);
}

#[tokio::test(start_paused = true)]
async fn fetch_from_before_clear_does_not_replace_newer_value() {
    let cache = QueryCache::new(Duration::from_secs(30));
    let calls = Arc::new(AtomicUsize::new(0));
    let k = key(&["agents", "7"]);

    let _ = cache.read::<u32, _, _>(&k, counted(&calls, 111, 100)).unwrap();
    sleep_ms(10).await;
    cache.clear();
    assert_eq!(cache.fetch(&k, counted(&calls, 222, 20)).await.unwrap(), 222);
    sleep_ms(200).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        cache.peek::<u32>(&k).unwrap(),
        Snapshot::Ready { value: 222, stale: false }
    );
}

proptest! {
    #[test]
    fn every_leading_slice_is_a_prefix(segments in arb_key_segments(), cut in 0usize..5) {
        let full = QueryKey::new(segments.clone());
        let n = cut.min(segments.len());
        let prefix = QueryKey::new(segments[..n].to_vec());
        prop_assert!(full.starts_with(&prefix));
        prop_assert!(full.child("extra").starts_with(&full));
        if n < segments.len() {
            prop_assert!(!prefix.starts_with(&full));
        }
    }

    #[test]
    fn diverging_segment_breaks_prefix(segments in arb_key_segments()) {
        let full = QueryKey::new(segments.clone());
        let mut other = segments.clone();
        other[0].push('x');
        prop_assert!(!full.starts_with(&QueryKey::new(other)));
    }
}
