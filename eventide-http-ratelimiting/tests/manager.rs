use eventide_http_ratelimiting::{
    BucketManager, CompiledRoute, Method, RatelimitErrorType, RouteTemplate,
};
use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::time::{self, Duration, Instant};

static MESSAGES: RouteTemplate =
    RouteTemplate::new("/channels/{channel_id}/messages", &["channel_id"]);

const POLL_PERIOD: Duration = Duration::from_millis(100);
const EXPIRE_AFTER: Duration = Duration::from_millis(100);
const MAX_RATE_LIMIT: Duration = Duration::from_secs(300);

fn epoch_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs_f64()
}

fn message_route(channel_id: &str) -> CompiledRoute {
    MESSAGES.compile(Method::Post, &[("channel_id", channel_id)])
}

fn started_manager() -> BucketManager {
    let manager = BucketManager::new(MAX_RATE_LIMIT);
    manager.start(POLL_PERIOD, EXPIRE_AFTER).unwrap();

    manager
}

#[tokio::test(start_paused = true)]
async fn lifecycle() {
    let manager = BucketManager::new(MAX_RATE_LIMIT);
    assert!(!manager.is_alive());

    assert!(matches!(
        manager.close().unwrap_err().kind(),
        RatelimitErrorType::ComponentState { alive: false },
    ));

    manager.start(POLL_PERIOD, EXPIRE_AFTER).unwrap();
    assert!(manager.is_alive());

    assert!(matches!(
        manager.start(POLL_PERIOD, EXPIRE_AFTER).unwrap_err().kind(),
        RatelimitErrorType::ComponentState { alive: true },
    ));

    manager.close().unwrap();
    assert!(!manager.is_alive());
}

#[tokio::test(start_paused = true)]
async fn operations_require_alive() {
    let manager = BucketManager::new(MAX_RATE_LIMIT);
    let route = message_route("123");

    assert!(matches!(
        manager.acquire_bucket(&route, None).unwrap_err().kind(),
        RatelimitErrorType::ComponentState { alive: false },
    ));
    assert!(matches!(
        manager
            .update_rate_limits(&route, None, "abc", 4, 5, epoch_now() + 1.0, 1.0)
            .unwrap_err()
            .kind(),
        RatelimitErrorType::ComponentState { alive: false },
    ));
    assert!(matches!(
        manager.acquire_global().await.unwrap_err().kind(),
        RatelimitErrorType::ComponentState { alive: false },
    ));
}

#[tokio::test(start_paused = true)]
async fn update_resolves_and_remaps() {
    let manager = started_manager();
    let route = message_route("123");

    let unknown = manager.acquire_bucket(&route, Some("Bot token")).unwrap();
    assert!(unknown.is_unknown());

    manager
        .update_rate_limits(&route, Some("Bot token"), "abc", 4, 5, epoch_now() + 1.0, 1.0)
        .unwrap();

    let resolved = manager.acquire_bucket(&route, Some("Bot token")).unwrap();

    assert!(
        Arc::ptr_eq(&unknown, &resolved),
        "the unknown bucket was not remapped in place",
    );
    assert!(!resolved.is_unknown());
    assert!(resolved.name().starts_with("abc;"));
    assert_eq!(5, resolved.limit());

    manager.close().unwrap();
}

#[tokio::test(start_paused = true)]
async fn learned_hash_splits_major_parameters() {
    let manager = started_manager();
    let first_route = message_route("123");
    let second_route = message_route("456");

    manager
        .update_rate_limits(&first_route, None, "abc", 4, 5, epoch_now() + 1.0, 1.0)
        .unwrap();

    let first = manager.acquire_bucket(&first_route, None).unwrap();
    let second = manager.acquire_bucket(&second_route, None).unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    // The route family's hash is known, so the second bucket is born resolved.
    assert!(!second.is_unknown());

    manager.close().unwrap();
}

#[tokio::test(start_paused = true)]
async fn repeated_updates_reuse_the_bucket() {
    let manager = started_manager();
    let route = message_route("123");

    manager
        .update_rate_limits(&route, None, "abc", 4, 5, epoch_now() + 1.0, 1.0)
        .unwrap();
    let first = manager.acquire_bucket(&route, None).unwrap();

    manager
        .update_rate_limits(&route, None, "abc", 3, 5, epoch_now() + 2.0, 2.0)
        .unwrap();
    let second = manager.acquire_bucket(&route, None).unwrap();

    assert!(Arc::ptr_eq(&first, &second));

    manager.close().unwrap();
}

#[tokio::test(start_paused = true)]
async fn throttle_stalls_bucketed_acquisitions() {
    let manager = started_manager();
    let route = message_route("123");

    manager.throttle(Duration::from_millis(2500));

    let now = Instant::now();
    let bucket = manager.acquire_bucket(&route, None).unwrap();
    let lease = bucket.acquire().await.unwrap();

    assert!(
        now.elapsed() >= Duration::from_millis(2500),
        "acquisition did not wait out the global throttle",
    );

    drop(lease);
    manager.close().unwrap();
}

#[tokio::test(start_paused = true)]
async fn acquire_global_honors_throttle() {
    let manager = started_manager();

    let now = Instant::now();
    manager.acquire_global().await.unwrap();
    assert!(now.elapsed() < Duration::from_millis(1), "did not run instantly");

    manager.throttle(Duration::from_secs(1));
    manager.acquire_global().await.unwrap();
    assert!(now.elapsed() >= Duration::from_secs(1));

    manager.close().unwrap();
}

#[tokio::test(start_paused = true)]
async fn close_cancels_queued_acquisitions() {
    let manager = started_manager();
    let route = message_route("123");

    let bucket = manager.acquire_bucket(&route, None).unwrap();
    let lease = bucket.acquire().await.unwrap();

    let queued = {
        let bucket = Arc::clone(&bucket);

        tokio::spawn(async move { bucket.acquire().await.map(drop) })
    };

    tokio::task::yield_now().await;
    manager.close().unwrap();
    drop(lease);

    assert!(matches!(
        queued.await.unwrap().unwrap_err().kind(),
        RatelimitErrorType::Cancelled,
    ));
}

#[tokio::test(start_paused = true)]
async fn gc_purges_idle_buckets() {
    let manager = started_manager();
    let route = message_route("123");

    let bucket = manager.acquire_bucket(&route, None).unwrap();

    // Fresh buckets reset one second out; let that and the expiry grace pass
    // with a few collection periods to spare.
    time::advance(Duration::from_secs(2)).await;
    time::sleep(POLL_PERIOD * 3).await;

    let recreated = manager.acquire_bucket(&route, None).unwrap();
    assert!(
        !Arc::ptr_eq(&bucket, &recreated),
        "the idle bucket was not purged",
    );

    manager.close().unwrap();
}

#[tokio::test(start_paused = true)]
async fn gc_spares_buckets_with_queued_acquisitions() {
    let manager = started_manager();
    let route = message_route("123");

    // Learn the hash and leave the bucket with nothing remaining for 30s.
    manager
        .update_rate_limits(&route, None, "abc", 0, 1, epoch_now() + 30.0, 30.0)
        .unwrap();

    let bucket = manager.acquire_bucket(&route, None).unwrap();

    let queued = {
        let bucket = Arc::clone(&bucket);

        tokio::spawn(async move { bucket.acquire().await.map(drop) })
    };

    tokio::task::yield_now().await;
    assert!(!bucket.is_empty());

    // Several collection passes run while the acquisition is queued.
    time::advance(Duration::from_millis(500)).await;
    time::sleep(Duration::from_millis(50)).await;

    let same = manager.acquire_bucket(&route, None).unwrap();
    assert!(Arc::ptr_eq(&bucket, &same), "a queued bucket was purged");

    manager.close().unwrap();

    assert!(matches!(
        queued.await.unwrap().unwrap_err().kind(),
        RatelimitErrorType::Cancelled,
    ));
}
