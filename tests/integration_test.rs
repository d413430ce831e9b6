mod helpers;

use cloutscape_pricing::error::AppError;
use cloutscape_pricing::models::*;
use cloutscape_pricing::services::*;
use helpers::*;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

// ============================================================================
// PriceService: cache and recomputation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_first_read_samples_and_prices() {
    let sources = vec![
        Arc::new(ScriptedSource::fixed("Eldorado", cents(100))),
        Arc::new(ScriptedSource::fixed("PlayerAuctions", cents(110))),
        Arc::new(ScriptedSource::fixed("RPGStash", cents(120))),
    ];
    let history = Arc::new(MemoryHistory::new());
    let service = price_service(&sources, history.clone());

    let quote = service.get_current().await;

    // median 1.10 * 0.85 = 0.935 -> 0.94
    assert_eq!(quote.our_price, cents(94));
    assert_eq!(quote.origin, PriceOrigin::Computed);
    assert_eq!(quote.raw_samples.len(), 3);
    assert_eq!(quote.average_competitor_price, cents(110));
    assert_eq!(quote.savings_percent, Decimal::new(1455, 2));
    assert_eq!(service.rounds_computed(), 1);

    // One history row per source, all stamped with the round time
    let records = history.records.lock().unwrap().clone();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.our_price == cents(94)));
    assert!(records.iter().all(|r| r.observed_at == quote.computed_at));
}

#[tokio::test(start_paused = true)]
async fn test_reads_within_ttl_hit_cache() {
    let source = Arc::new(ScriptedSource::new(
        "Eldorado",
        vec![Ok(cents(100)), Ok(cents(200))],
    ));
    let service = price_service(&[source.clone()], Arc::new(MemoryHistory::new()));

    let first = service.get_current().await;
    tokio::time::advance(Duration::from_secs(3599)).await;
    let second = service.get_current().await;

    assert_eq!(first, second);
    assert_eq!(source.calls(), 1);
    assert_eq!(service.rounds_computed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_read_after_ttl_recomputes() {
    let source = Arc::new(ScriptedSource::new(
        "Eldorado",
        vec![Ok(cents(100)), Ok(cents(200))],
    ));
    let history = Arc::new(MemoryHistory::new());
    let service = price_service(&[source.clone()], history.clone());

    assert_eq!(service.get_current().await.our_price, cents(85));
    tokio::time::advance(Duration::from_secs(3600)).await;

    let refreshed = service.get_current().await;
    assert_eq!(refreshed.our_price, cents(170));
    assert_eq!(source.calls(), 2);
    assert_eq!(history.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_reads_share_one_round() {
    let source = Arc::new(
        ScriptedSource::fixed("Eldorado", cents(100)).with_delay(Duration::from_millis(500)),
    );
    let service = price_service(&[source.clone()], Arc::new(MemoryHistory::new()));

    let readers: Vec<_> = (0..10)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.get_current().await })
        })
        .collect();

    let mut prices = Vec::new();
    for reader in readers {
        prices.push(reader.await.unwrap().our_price);
    }

    assert!(prices.iter().all(|p| *p == cents(85)));
    assert_eq!(source.calls(), 1);
    assert_eq!(service.rounds_computed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_forced_refresh_ignores_ttl() {
    let source = Arc::new(ScriptedSource::new(
        "Eldorado",
        vec![Ok(cents(100)), Ok(cents(120))],
    ));
    let service = price_service(&[source.clone()], Arc::new(MemoryHistory::new()));

    service.get_current().await;
    let refreshed = service.refresh().await;

    assert_eq!(refreshed.our_price, cents(102));
    assert_eq!(service.get_current().await.our_price, cents(102));
    assert_eq!(source.calls(), 2);
}

// ============================================================================
// PriceService: degraded rounds
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_no_samples_and_no_cache_gives_floor() {
    let sources = vec![
        Arc::new(ScriptedSource::failing("Eldorado")),
        Arc::new(ScriptedSource::failing("RPGStash")),
    ];
    let history = Arc::new(MemoryHistory::new());
    let service = price_service(&sources, history.clone());

    let quote = service.get_current().await;

    assert_eq!(quote.our_price, cents(21));
    assert_eq!(quote.origin, PriceOrigin::Floor);
    assert!(quote.raw_samples.is_empty());
    assert_eq!(quote.savings_percent, Decimal::ZERO);
    assert_eq!(history.len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_no_samples_reuses_last_good_quote() {
    let source = Arc::new(ScriptedSource::new(
        "Eldorado",
        vec![Ok(cents(100)), Err(SampleError::Status(503))],
    ));
    let history = Arc::new(MemoryHistory::new());
    let service = price_service(&[source.clone()], history.clone());

    let good = service.get_current().await;
    let fallback = service.refresh().await;

    assert_eq!(fallback.origin, PriceOrigin::LastKnownGood);
    assert_eq!(fallback.our_price, good.our_price);
    assert_eq!(fallback.raw_samples, good.raw_samples);
    // Only the computed round is recorded
    assert_eq!(history.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_source_is_dropped() {
    let sources = vec![
        Arc::new(ScriptedSource::fixed("Eldorado", cents(100))),
        Arc::new(ScriptedSource::fixed("Sythe", cents(500)).with_delay(Duration::from_secs(60))),
    ];
    let service = price_service(&sources, Arc::new(MemoryHistory::new()));

    let quote = service.get_current().await;

    assert_eq!(quote.our_price, cents(85));
    assert!(!quote.raw_samples.contains_key("Sythe"));
}

#[tokio::test(start_paused = true)]
async fn test_history_failure_does_not_block_price() {
    let source = Arc::new(ScriptedSource::fixed("Eldorado", cents(100)));
    let service = price_service(&[source], Arc::new(MemoryHistory::failing()));

    let quote = service.get_current().await;

    assert_eq!(quote.origin, PriceOrigin::Computed);
    assert_eq!(quote.our_price, cents(85));
    assert!(service.cache().get_fresh().await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_outlier_source_does_not_move_price() {
    let sources = vec![
        Arc::new(ScriptedSource::fixed("A", cents(100))),
        Arc::new(ScriptedSource::fixed("B", cents(100))),
        Arc::new(ScriptedSource::fixed("C", cents(100))),
        Arc::new(ScriptedSource::fixed("D", cents(1000))),
    ];
    let service = price_service(&sources, Arc::new(MemoryHistory::new()));

    let quote = service.get_current().await;

    assert_eq!(quote.our_price, cents(85));
    // Raw samples keep the outlier; the average is pre-filter
    assert_eq!(quote.raw_samples.len(), 4);
    assert_eq!(quote.average_competitor_price, cents(325));
}

#[tokio::test(start_paused = true)]
async fn test_absurd_quotes_are_discarded() {
    let sources = vec![
        Arc::new(ScriptedSource::fixed("Broken1", Decimal::MAX)),
        Arc::new(ScriptedSource::fixed("Broken2", Decimal::MAX)),
    ];
    let history = Arc::new(MemoryHistory::new());
    let service = price_service(&sources, history.clone());

    let quote = service.get_current().await;

    assert_eq!(quote.origin, PriceOrigin::Floor);
    assert_eq!(quote.our_price, cents(21));
    assert!(quote.raw_samples.is_empty());
    assert_eq!(history.len(), 0);

    let mixed = vec![
        Arc::new(ScriptedSource::fixed("Eldorado", cents(100))),
        Arc::new(ScriptedSource::fixed("Broken", Decimal::MAX)),
    ];
    let service = price_service(&mixed, Arc::new(MemoryHistory::new()));
    let quote = service.get_current().await;

    assert_eq!(quote.origin, PriceOrigin::Computed);
    assert_eq!(quote.our_price, cents(85));
    assert!(!quote.raw_samples.contains_key("Broken"));
}

// ============================================================================
// PriceService: overrides
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_override_short_circuits_sampling() {
    let source = Arc::new(ScriptedSource::fixed("Eldorado", cents(100)));
    let service = price_service(&[source.clone()], Arc::new(MemoryHistory::new()));

    let computed = service.get_current().await;
    assert_ok!(service.set_override("$0.92").await);
    tokio::time::advance(Duration::from_secs(1800)).await;

    let quote = service.get_current().await;
    assert_eq!(quote.origin, PriceOrigin::Override);
    assert_eq!(quote.our_price, cents(92));
    assert_eq!(quote.raw_samples, computed.raw_samples);

    // Forced refresh also honours the override
    assert_eq!(service.refresh().await.our_price, cents(92));
    assert_eq!(source.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_override_before_any_round_has_no_samples() {
    let source = Arc::new(ScriptedSource::fixed("Eldorado", cents(100)));
    let service = price_service(&[source.clone()], Arc::new(MemoryHistory::new()));

    service.set_override_value(cents(90)).await.unwrap();
    let quote = service.get_current().await;

    assert_eq!(quote.our_price, cents(90));
    assert!(quote.raw_samples.is_empty());
    assert_eq!(source.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_override_expires() {
    let source = Arc::new(ScriptedSource::fixed("Eldorado", cents(100)));
    let service = price_service(&[source.clone()], Arc::new(MemoryHistory::new()));

    service.set_override("0.92").await.unwrap();
    tokio::time::advance(Duration::from_secs(3600)).await;

    let quote = service.get_current().await;
    assert_eq!(quote.origin, PriceOrigin::Computed);
    assert_eq!(quote.our_price, cents(85));
}

#[tokio::test(start_paused = true)]
async fn test_clear_override() {
    let source = Arc::new(ScriptedSource::fixed("Eldorado", cents(100)));
    let service = price_service(&[source], Arc::new(MemoryHistory::new()));

    assert_ok!(service.set_override("0.92").await);
    assert!(service.clear_override().await);
    assert!(!service.clear_override().await);
    assert_eq!(service.get_current().await.origin, PriceOrigin::Computed);
}

#[tokio::test]
async fn test_invalid_overrides_rejected() {
    let source = Arc::new(ScriptedSource::fixed("Eldorado", cents(100)));
    let service = price_service(&[source], Arc::new(MemoryHistory::new()));

    assert!(matches!(
        service.set_override("abc").await,
        Err(AppError::InvalidDecimal(_))
    ));
    assert_err!(service.set_override("0").await);
    assert_err!(service.set_override("-1.00").await);
    // Below the 0.21 floor
    assert!(matches!(
        service.set_override("0.10").await,
        Err(AppError::Validation(_))
    ));
    assert!(service.cache().active_override().await.is_none());
}

#[tokio::test]
async fn test_override_below_floor_when_allowed() {
    let mut config = pricing_config();
    config.allow_override_below_floor = true;
    let source = Arc::new(ScriptedSource::fixed("Eldorado", cents(100)));
    let cache = Arc::new(QuoteCache::new(config.cache_ttl()));
    let service = PriceService::new(&config, sampler_for(&[source]), cache);

    let applied = assert_ok!(service.set_override("0.10").await);
    assert_eq!(applied.value, cents(10));
    assert_eq!(service.get_current().await.our_price, cents(10));
}

// ============================================================================
// PriceScheduler
// ============================================================================

#[tokio::test]
async fn test_first_round_never_notifies() {
    let source = Arc::new(ScriptedSource::fixed("Eldorado", cents(100)));
    let service = price_service(&[source], Arc::new(MemoryHistory::new()));
    let notifier = Arc::new(RecordingNotifier::new());
    let mut scheduler = PriceScheduler::new(service, notifier.clone());

    assert!(scheduler.run_once().await.is_none());
    assert_eq!(scheduler.last_price(), Some(cents(85)));
    assert_eq!(notifier.change_count(), 0);
    assert_eq!(notifier.quote_count(), 1);
}

#[tokio::test]
async fn test_change_at_threshold_notifies() {
    let source = Arc::new(ScriptedSource::fixed("Eldorado", cents(100)));
    let service = price_service(&[source], Arc::new(MemoryHistory::new()));
    let notifier = Arc::new(RecordingNotifier::new());
    let mut scheduler = PriceScheduler::new(service.clone(), notifier.clone());

    service.set_override_value(cents(100)).await.unwrap();
    scheduler.run_once().await;

    service.set_override_value(cents(102)).await.unwrap();
    let change = scheduler.run_once().await.expect("2% move should notify");

    assert_eq!(change.old_price, cents(100));
    assert_eq!(change.new_price, cents(102));
    assert_eq!(change.percent_change, Decimal::new(2, 0));
    assert_eq!(notifier.change_count(), 1);
}

#[tokio::test]
async fn test_change_below_threshold_is_silent() {
    let source = Arc::new(ScriptedSource::fixed("Eldorado", cents(100)));
    let service = price_service(&[source], Arc::new(MemoryHistory::new()));
    let notifier = Arc::new(RecordingNotifier::new());
    let mut scheduler = PriceScheduler::new(service.clone(), notifier.clone());

    service.set_override_value(cents(100)).await.unwrap();
    scheduler.run_once().await;

    service.set_override_value(cents(101)).await.unwrap();
    assert!(scheduler.run_once().await.is_none());
    assert_eq!(scheduler.last_price(), Some(cents(101)));
    assert_eq!(notifier.change_count(), 0);
}

#[tokio::test]
async fn test_scheduler_uses_configured_threshold() {
    let source = Arc::new(ScriptedSource::fixed("Eldorado", cents(100)));
    let service = price_service(&[source], Arc::new(MemoryHistory::new()));
    let notifier = Arc::new(RecordingNotifier::new());
    let mut scheduler = PriceScheduler::new(service.clone(), notifier.clone())
        .with_change_threshold(Decimal::new(20, 0));

    service.set_override_value(cents(100)).await.unwrap();
    scheduler.run_once().await;

    service.set_override_value(Decimal::new(11999, 4)).await.unwrap();
    assert!(scheduler.run_once().await.is_some()); // rounds to 1.20

    service.set_override_value(cents(100)).await.unwrap();
    assert!(scheduler.run_once().await.is_none()); // -16.7%
}

#[tokio::test]
async fn test_notifier_failure_does_not_stop_rounds() {
    let source = Arc::new(ScriptedSource::fixed("Eldorado", cents(100)));
    let service = price_service(&[source], Arc::new(MemoryHistory::new()));
    let notifier = Arc::new(RecordingNotifier::failing());
    let mut scheduler = PriceScheduler::new(service.clone(), notifier.clone());

    service.set_override_value(cents(100)).await.unwrap();
    scheduler.run_once().await;
    service.set_override_value(cents(150)).await.unwrap();

    assert!(scheduler.run_once().await.is_some());
    assert_eq!(scheduler.last_price(), Some(cents(150)));
    assert_eq!(notifier.change_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_runs_immediately_then_on_interval() {
    let source = Arc::new(ScriptedSource::fixed("Eldorado", cents(100)));
    let service = price_service(&[source.clone()], Arc::new(MemoryHistory::new()));
    let notifier = Arc::new(RecordingNotifier::new());

    let handle = PriceScheduler::new(service.clone(), notifier.clone())
        .with_poll_interval(Duration::from_secs(900))
        .start();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(service.rounds_computed(), 1);

    tokio::time::sleep(Duration::from_secs(900)).await;
    assert_eq!(service.rounds_computed(), 2);
    assert_eq!(notifier.quote_count(), 2);
    assert!(!handle.is_finished());

    handle.stop().await;
    let rounds = service.rounds_computed();
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(service.rounds_computed(), rounds);
}

// ============================================================================
// Notifier fan-out
// ============================================================================

#[tokio::test]
async fn test_fanout_delivers_to_every_target() {
    let first = Arc::new(RecordingNotifier::new());
    let second = Arc::new(RecordingNotifier::new());
    let fanout = FanoutNotifier::new()
        .with_target(first.clone())
        .with_target(second.clone());

    let change = PriceChange::detect(cents(100), cents(110), Decimal::new(2, 0)).unwrap();
    fanout.notify_change(&change).await.unwrap();

    assert_eq!(first.change_count(), 1);
    assert_eq!(second.change_count(), 1);
    assert!(!fanout.is_empty());
}
