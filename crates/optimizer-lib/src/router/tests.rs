use super::*;
use crate::cache::MemoryResponseCache;
use crate::engine::HeuristicEngine;
use crate::testing::ScriptedEngine;

const ANSWER: &str = "Decision: rightsize-smaller\nConfidence: 0.8\nReasoning: idle";

fn shared(engine: &Arc<ScriptedEngine>) -> Arc<dyn DecisionEngine> {
    engine.clone()
}

fn router_with(
    engines: Vec<Arc<dyn DecisionEngine>>,
    cache: Arc<MemoryResponseCache>,
    tracker: Option<Arc<TokenTracker>>,
) -> DecisionRouter {
    let mut builder = DecisionRouter::builder(RouterConfig::default()).cache(cache);
    for engine in engines {
        builder = builder.engine(engine);
    }
    if let Some(tracker) = tracker {
        builder = builder.tracker(tracker);
    }
    builder.build().unwrap()
}

#[test]
fn test_tier_selection_bands() {
    let bounds = RouterConfig::default().tier_thresholds;
    assert_eq!(select_tier(&bounds, 0.0), Tier::HEURISTIC);
    assert_eq!(select_tier(&bounds, 2.99), Tier::HEURISTIC);
    assert_eq!(select_tier(&bounds, 3.0), Tier::SMALL);
    assert_eq!(select_tier(&bounds, 4.4), Tier::SMALL);
    assert_eq!(select_tier(&bounds, 5.0), Tier::MEDIUM);
    assert_eq!(select_tier(&bounds, 7.0), Tier::LARGE);
    assert_eq!(select_tier(&bounds, 9.0), Tier::REASONING);
    assert_eq!(select_tier(&bounds, 10.0), Tier::REASONING);
    assert_eq!(select_tier(&bounds, f64::NAN), Tier::HEURISTIC);
    assert_eq!(select_tier(&bounds, -1.0), Tier::HEURISTIC);
}

#[test]
fn test_backoff_doubles_and_caps() {
    let config = RouterConfig {
        backoff_max: Duration::from_secs(5),
        ..Default::default()
    };
    assert_eq!(config.backoff_for(1), Duration::ZERO);
    assert_eq!(config.backoff_for(2), Duration::from_secs(1));
    assert_eq!(config.backoff_for(3), Duration::from_secs(2));
    assert_eq!(config.backoff_for(4), Duration::from_secs(4));
    assert_eq!(config.backoff_for(5), Duration::from_secs(5));
    assert_eq!(config.backoff_for(60), Duration::from_secs(5));
}

#[test]
fn test_builder_requires_engine() {
    let cache = Arc::new(MemoryResponseCache::new(8));
    let err = DecisionRouter::builder(RouterConfig::default())
        .cache(cache)
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, Error::Invalid(_)));
}

#[tokio::test(start_paused = true)]
async fn test_cascade_after_exhausting_tier() {
    let medium = Arc::new(ScriptedEngine::new(Tier::MEDIUM, "medium-model", ANSWER).failing(3));
    let small = Arc::new(ScriptedEngine::new(Tier::SMALL, "small-model", ANSWER));
    let cache = Arc::new(MemoryResponseCache::new(8));
    let router = router_with(vec![shared(&medium), shared(&small)], cache.clone(), None);

    let deadline = Deadline::after(Duration::from_secs(60));
    let started = Instant::now();
    let routed = router.route("prompt", 6.0, &deadline).await.unwrap();

    assert_eq!(medium.calls(), 3);
    assert_eq!(small.calls(), 1);
    assert_eq!(routed.requested_tier, Tier::MEDIUM);
    assert_eq!(routed.served_tier, Tier::SMALL);
    assert_eq!(routed.response.model, "small-model");
    assert!(!routed.cached);
    // 1s then 2s of backoff inside the failing tier
    assert!(started.elapsed() >= Duration::from_secs(3));

    let entry = cache.peek(&routed.cache_key).unwrap();
    assert_eq!(entry.response.model, "small-model");
    assert_eq!(entry.response.tier, Tier::SMALL);
    assert_eq!(cache.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_error_cascades_immediately() {
    let medium = Arc::new(
        ScriptedEngine::new(Tier::MEDIUM, "medium-model", ANSWER)
            .failing_with(5, || Error::Invalid("bad request".to_string())),
    );
    let heuristic: Arc<dyn DecisionEngine> = Arc::new(HeuristicEngine::new());
    let router = router_with(
        vec![shared(&medium), heuristic],
        Arc::new(MemoryResponseCache::new(8)),
        None,
    );

    let deadline = Deadline::after(Duration::from_secs(60));
    let prompt = "Risk score: 6.00\nPreliminary recommendation: stop\n";
    let routed = router.route(prompt, 6.0, &deadline).await.unwrap();
    assert_eq!(medium.calls(), 1);
    assert_eq!(routed.served_tier, Tier::HEURISTIC);
    assert_eq!(routed.response.model, "heuristic-v1");
}

#[tokio::test(start_paused = true)]
async fn test_missing_tiers_are_skipped() {
    let small = Arc::new(ScriptedEngine::new(Tier::SMALL, "small-model", ANSWER));
    let router = router_with(vec![shared(&small)], Arc::new(MemoryResponseCache::new(8)), None);

    let deadline = Deadline::after(Duration::from_secs(60));
    let routed = router.route("prompt", 9.5, &deadline).await.unwrap();
    assert_eq!(routed.requested_tier, Tier::REASONING);
    assert_eq!(routed.served_tier, Tier::SMALL);
}

#[tokio::test(start_paused = true)]
async fn test_exhausting_every_tier_is_unavailable() {
    let small = Arc::new(ScriptedEngine::new(Tier::SMALL, "small-model", ANSWER).failing(10));
    let router = router_with(vec![shared(&small)], Arc::new(MemoryResponseCache::new(8)), None);

    let deadline = Deadline::after(Duration::from_secs(60));
    let err = router.route("prompt", 4.0, &deadline).await.unwrap_err();
    assert!(matches!(err, Error::Unavailable(_)));

    // Nothing cheaper than the requested tier is registered
    let large = Arc::new(ScriptedEngine::new(Tier::LARGE, "large-model", ANSWER));
    let router = router_with(vec![shared(&large)], Arc::new(MemoryResponseCache::new(8)), None);
    let err = router.route("prompt", 4.0, &deadline).await.unwrap_err();
    assert!(matches!(err, Error::Unavailable(_)));
}

#[tokio::test(start_paused = true)]
async fn test_warm_cache_matches_cold_answer() {
    let small = Arc::new(ScriptedEngine::new(Tier::SMALL, "small-model", ANSWER));
    let tracker = Arc::new(TokenTracker::default());
    let router = router_with(
        vec![shared(&small)],
        Arc::new(MemoryResponseCache::new(8)),
        Some(tracker.clone()),
    );

    let deadline = Deadline::after(Duration::from_secs(60));
    let cold = router.route("prompt", 4.0, &deadline).await.unwrap();
    let warm = router.route("prompt", 4.0, &deadline).await.unwrap();

    assert_eq!(small.calls(), 1);
    assert!(!cold.cached);
    assert!(warm.cached);
    assert_eq!(cold.response.content, warm.response.content);
    assert_eq!(cold.response.model, warm.response.model);
    assert_eq!(cold.response.confidence, warm.response.confidence);
    assert_eq!(cold.served_tier, warm.served_tier);
    assert_eq!(cold.cache_key, warm.cache_key);

    // Only the engine call is billed
    assert_eq!(tracker.snapshot().models["small-model"].requests, 1);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_cancels_in_flight_call() {
    let small = Arc::new(
        ScriptedEngine::new(Tier::SMALL, "small-model", ANSWER).with_delay(Duration::from_secs(10)),
    );
    let heuristic = Arc::new(ScriptedEngine::new(Tier::HEURISTIC, "local", ANSWER));
    let cache = Arc::new(MemoryResponseCache::new(8));
    let router = router_with(vec![shared(&small), shared(&heuristic)], cache.clone(), None);

    let deadline = Deadline::after(Duration::from_secs(2));
    let err = router.route("prompt", 4.0, &deadline).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(small.calls(), 1);
    assert_eq!(heuristic.calls(), 0);
    assert!(cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_engine_timeout_is_retried() {
    let config = RouterConfig {
        engine_timeouts: [Duration::from_secs(1); 5],
        ..Default::default()
    };
    let slow = Arc::new(
        ScriptedEngine::new(Tier::SMALL, "small-model", ANSWER).with_delay(Duration::from_secs(5)),
    );
    let heuristic = Arc::new(ScriptedEngine::new(Tier::HEURISTIC, "local", ANSWER));
    let router = DecisionRouter::builder(config)
        .engine(shared(&slow))
        .engine(shared(&heuristic))
        .cache(Arc::new(MemoryResponseCache::new(8)))
        .build()
        .unwrap();

    let deadline = Deadline::after(Duration::from_secs(60));
    let routed = router.route("prompt", 4.0, &deadline).await.unwrap();
    assert_eq!(slow.calls(), 3);
    assert_eq!(routed.served_tier, Tier::HEURISTIC);
}
