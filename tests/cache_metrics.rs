mod support;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use metrics_util::debugging::DebuggingRecorder;
use serde_json::json;

use stockpile::application::repos::CacheRepo;
use stockpile::cache::{CacheConfig, CacheStore, GetOptions};

use support::MemoryRepo;

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let repo = Arc::new(MemoryRepo::new());
    let cache_repo: Arc<dyn CacheRepo> = repo.clone();
    let config = CacheConfig {
        l1_max_entries: 1,
        ..Default::default()
    };
    let cache = CacheStore::new(config, cache_repo).provider("igdb", "game");

    // Concurrent misses: fetch, latency, coalescing, in-flight gauge, L2 miss.
    let requests = (0..4).map(|_| {
        let cache = cache.clone();
        async move {
            cache
                .get_with_cache(
                    "1",
                    || async {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, std::io::Error>(json!({ "id": "1", "name": "Celeste" }))
                    },
                    GetOptions::default(),
                )
                .await
        }
    });
    for result in join_all(requests).await {
        result.expect("lookup should succeed");
    }

    // L1 hit, then an eviction once a second key is cached.
    cache
        .get_with_cache(
            "1",
            || async { Ok::<_, std::io::Error>(json!({ "id": "1" })) },
            GetOptions::default(),
        )
        .await
        .expect("l1 hit");
    cache
        .get_with_cache(
            "2",
            || async { Ok::<_, std::io::Error>(json!({ "id": "2", "name": "Hades" })) },
            GetOptions::default(),
        )
        .await
        .expect("second key");

    // The evicted key is answered by the durable tier.
    cache
        .get_with_cache(
            "1",
            || async { Ok::<_, std::io::Error>(json!({ "id": "1" })) },
            GetOptions::default(),
        )
        .await
        .expect("l2 hit");

    // Upstream failure.
    let failed = cache
        .get_with_cache(
            "3",
            || async { Err::<serde_json::Value, _>(std::io::Error::other("upstream down")) },
            GetOptions::default(),
        )
        .await;
    assert!(failed.is_err());

    // Store outage: the read and the write both fail open.
    repo.set_offline(true);
    cache
        .get_with_cache(
            "4",
            || async { Ok::<_, std::io::Error>(json!({ "id": "4" })) },
            GetOptions::default(),
        )
        .await
        .expect("fails open");

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "stockpile_cache_l1_hit_total",
        "stockpile_cache_l1_miss_total",
        "stockpile_cache_l1_evict_total",
        "stockpile_cache_l2_hit_total",
        "stockpile_cache_l2_miss_total",
        "stockpile_cache_l2_error_total",
        "stockpile_cache_write_error_total",
        "stockpile_cache_fetch_total",
        "stockpile_cache_fetch_error_total",
        "stockpile_cache_fetch_coalesced_total",
        "stockpile_cache_fetch_ms",
        "stockpile_cache_in_flight",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
