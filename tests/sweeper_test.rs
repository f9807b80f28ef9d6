//! Background sweeper over live engine caches

use cpq_engine::*;
use std::sync::Arc;
use std::time::Duration;

fn model() -> Model {
    Model::builder("m", "M")
        .group(Group::multi("g", "G", 0, 2))
        .option(ModelOption::new("a", "A", "g", 10.0))
        .option(ModelOption::new("b", "B", "g", 20.0))
        .rule(Rule::requires("R1", "a -> b"))
        .build()
        .unwrap()
}

fn short_ttl_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.cache.validation_ttl_ms = 10;
    config.cache.pricing_ttl_ms = 10;
    config
}

#[tokio::test]
async fn test_sweeper_reclaims_engine_caches() {
    let config = short_ttl_config();
    let shared = Arc::new(model());
    let engine = ConfigurationEngine::from_shared(shared.clone(), &config).unwrap();
    let pricing = PricingCalculator::new(shared, &config).unwrap();

    engine.validate(&[Selection::one("a")]).unwrap();
    engine.is_valid(&[Selection::one("a")]).unwrap();
    pricing.calculate_price(&[Selection::one("a")]).unwrap();

    let mut caches = engine.sweepables();
    caches.extend(pricing.sweepables());
    let sweeper = spawn_sweeper(caches, Duration::from_millis(20));

    tokio::time::sleep(Duration::from_millis(120)).await;
    let swept = sweeper.shutdown().await;
    assert!(swept >= 3, "expected at least 3 swept entries, got {}", swept);

    // Expired entries are gone; the next lookup recomputes
    let again = engine.validate(&[Selection::one("a")]).unwrap();
    assert!(!again.cached);
    assert!(!again.is_valid);
}

#[tokio::test]
async fn test_sweeper_stops_on_shutdown() {
    let cache: Arc<TtlCache<String, u32>> = Arc::new(TtlCache::new(
        "idle",
        Duration::from_secs(60),
        1024 * 1024,
    ));
    cache.set("k".into(), 1).unwrap();

    let sweeper = spawn_sweeper(vec![cache.clone() as Arc<dyn Sweepable>], Duration::from_millis(5));
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(sweeper.shutdown().await, 0);
    assert_eq!(cache.get(&"k".to_string()).unwrap(), Some(1));
}

#[tokio::test]
async fn test_entity_cache_pattern_invalidation() {
    let cache = EntityCache::new(&EngineConfig::default().cache);
    let model = model();
    cache.set_model(&model).unwrap();
    assert_eq!(cache.get_model("m").unwrap().map(|m| m.id), Some("m".to_string()));

    let removed = cache.invalidate_model("m").unwrap();
    assert!(removed >= 1);
    assert!(cache.get_model("m").unwrap().is_none());

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}
