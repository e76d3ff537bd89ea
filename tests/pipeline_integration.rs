//! Event Pipeline Integration Tests
//!
//! End-to-end flows through the public API:
//! 1. Swap text -> ledger -> large-buy alert -> sampler start
//! 2. Large-buy hysteresis across several events
//! 3. Cross-channel correlation fires once per address
//!    (including the fresh-launch then whale-buy walkthrough)
//! 4. Sampler dip and revival driven by the pipeline
//! 5. `run` over an event source with transport errors
//!
//! All tests are deterministic (no real network calls) and use the
//! recording doubles from `swapwatch::ports::mocks`.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;

use swapwatch::application::{EventPipeline, IngestOutcome, SamplerScheduler, SessionStatus};
use swapwatch::domain::{
    Address, AlertKind, Category, CorrelationConfig, CorrelationEngine, ExtractError, LedgerRegistry,
    RawEvent, SamplerConfig, SessionOutcome, ThresholdAlertEngine, ThresholdConfig,
};
use swapwatch::ports::mocks::{RecordingAlertSink, ScriptedMarketData, VecEventSource};

// ============================================================================
// Test Fixtures
// ============================================================================

fn addr(s: &str) -> Address {
    Address::parse(s).unwrap()
}

fn sampler_config() -> SamplerConfig {
    SamplerConfig {
        baseline_delays: vec![Duration::from_secs(1)],
        poll_interval: Duration::from_secs(10),
        max_duration: Duration::from_secs(600),
        retry_attempts: 2,
        retry_backoff: Duration::from_secs(1),
        max_consecutive_failures: 3,
        ..SamplerConfig::default()
    }
}

fn build_pipeline(data: ScriptedMarketData, sink: &RecordingAlertSink) -> EventPipeline {
    let scheduler = SamplerScheduler::new(sampler_config(), Arc::new(data), Arc::new(sink.clone()));
    EventPipeline::new(
        LedgerRegistry::default(),
        CorrelationEngine::new(CorrelationConfig::default()),
        ThresholdAlertEngine::new(ThresholdConfig::default()),
        scheduler,
        Arc::new(sink.clone()),
    )
}

async fn wait_finished(pipeline: &EventPipeline, address: &Address) -> SessionOutcome {
    loop {
        if let Some(SessionStatus::Finished(outcome)) = pipeline.scheduler().status(address) {
            return outcome;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

// ============================================================================
// Ledger and threshold flows
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_whale_buy_records_and_alerts() {
    let sink = RecordingAlertSink::new();
    let pipeline = build_pipeline(ScriptedMarketData::new(), &sink);

    let outcome = pipeline.ingest(RawEvent::new(
        "Whale",
        "TokenMint1",
        "WhaleWallet has swapped 15 SOL for 1,000,000 TOKEN on Raydium",
    ));

    let IngestOutcome::Applied { alerts, sampler_started } = outcome else {
        panic!("expected applied outcome");
    };
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::LargeBuy);
    assert_eq!(alerts[0].amount("largest_buy"), Some(dec!(15)));
    assert!(sampler_started);

    let token = addr("tokenmint1");
    let snapshot = pipeline.ledgers().snapshot(&token).unwrap();
    let whale = snapshot.per_category.get(&Category::Whale).unwrap();
    assert_eq!(whale.buy_total, dec!(15));
    assert_eq!(whale.buy_count, 1);
    assert_eq!(snapshot.total_sells, dec!(0));

    assert_eq!(sink.count_of(AlertKind::LargeBuy), 1);
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_large_buy_hysteresis() {
    let sink = RecordingAlertSink::new();
    let pipeline = build_pipeline(ScriptedMarketData::new(), &sink);

    let first = pipeline.ingest(RawEvent::new("Whale", "tok", "a swapped 12 SOL for T"));
    assert_eq!(first.alerts().len(), 1);

    // Small follow-up buy stays inside the margin
    let second = pipeline.ingest(RawEvent::new("Whale", "tok", "b swapped 0.5 SOL for T"));
    assert!(second.is_applied());
    assert!(second.alerts().is_empty());

    // Cumulative buys grow past the margin
    let third = pipeline.ingest(RawEvent::new("Whale", "tok", "c swapped 20 SOL for T"));
    assert_eq!(third.alerts().len(), 1);
    assert_eq!(third.alerts()[0].kind, AlertKind::LargeBuy);
    assert_eq!(third.alerts()[0].amount("total_buys"), Some(dec!(32.5)));

    assert_eq!(sink.count_of(AlertKind::LargeBuy), 2);
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_oversized_amounts_are_dropped() {
    let sink = RecordingAlertSink::new();
    let pipeline = build_pipeline(ScriptedMarketData::new(), &sink);

    for text in [
        "w swapped 79,228,162,514,264,337,593,543,950,335 SOL for T",
        "w swapped 999999999999999999999999999999999999 SOL for T",
        "w swapped 1,000,000,001 SOL for T",
    ] {
        let outcome = pipeline.ingest(RawEvent::new("Whale", "tok", text));
        assert!(
            matches!(outcome, IngestOutcome::Dropped(ExtractError::InvalidAmount(_))),
            "{text}: {outcome:?}"
        );
    }
    assert!(!pipeline.ledgers().contains(&addr("tok")));

    // The cap itself is still a valid amount
    let outcome = pipeline.ingest(RawEvent::new("Whale", "tok", "w swapped 1,000,000,000 SOL for T"));
    assert!(outcome.is_applied());
    assert_eq!(pipeline.stats(&addr("tok")).unwrap().total_buys, dec!(1000000000));
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_sells_reduce_nothing_but_are_counted() {
    let sink = RecordingAlertSink::new();
    let pipeline = build_pipeline(ScriptedMarketData::new(), &sink);

    pipeline.ingest(RawEvent::new("Smart", "tok", "a swapped 2 SOL for T"));
    pipeline.ingest(RawEvent::new("Smart", "tok", "a swapped 1,000 T for 1.5 SOL"));

    let stats = pipeline.stats(&addr("tok")).unwrap();
    assert_eq!(stats.buy_count, 1);
    assert_eq!(stats.sell_count, 1);
    assert_eq!(stats.total_buys, dec!(2));
    assert_eq!(stats.total_sells, dec!(1.5));
}

// ============================================================================
// Correlation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_correlation_fires_once_per_address() {
    let sink = RecordingAlertSink::new();
    let pipeline = build_pipeline(ScriptedMarketData::new(), &sink);

    pipeline.ingest(RawEvent::new("Fresh", "tok", "a swapped 1 SOL for T"));
    let second = pipeline.ingest(RawEvent::new("Smart", "tok", "b swapped 2 SOL for T"));
    pipeline.ingest(RawEvent::new("Whale", "tok", "c swapped 3 SOL for T"));
    pipeline.ingest(RawEvent::new("Fresh 1h", "tok", "d swapped 4 SOL for T"));

    let correlation = second
        .alerts()
        .iter()
        .find(|a| a.kind == AlertKind::Correlation)
        .expect("correlation alert");
    assert_eq!(correlation.category_context[0], Category::Fresh);
    assert_eq!(correlation.category_context[1], Category::Smart);

    assert_eq!(sink.count_of(AlertKind::Correlation), 1);
    assert!(pipeline.correlation().is_correlated(&addr("tok")));

    // Other addresses correlate independently
    pipeline.ingest(RawEvent::new("Fresh", "other", "a swapped 1 SOL for T"));
    pipeline.ingest(RawEvent::new("Insider", "other", "b swapped 1 SOL for T"));
    assert_eq!(sink.count_of(AlertKind::Correlation), 2);
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_fresh_launch_then_whale_buy() {
    let sink = RecordingAlertSink::new();
    let pipeline = build_pipeline(ScriptedMarketData::new(), &sink);
    let token = addr("abc123");

    let fresh = pipeline.ingest(RawEvent::new(
        "Fresh",
        "`ABC123`",
        "DevWallet has swapped 1 SOL for 50,000 TOKEN on Raydium",
    ));
    assert!(fresh.is_applied());
    assert!(fresh.alerts().is_empty());

    let whale = pipeline.ingest(RawEvent::new(
        "Whale",
        "ABC123",
        "WhaleWallet has swapped 15 SOL for 1,000,000 TOKEN on Raydium",
    ));
    let kinds: Vec<AlertKind> = whale.alerts().iter().map(|a| a.kind).collect();
    assert_eq!(kinds, vec![AlertKind::Correlation, AlertKind::LargeBuy]);
    assert_eq!(whale.alerts()[0].category_context, vec![Category::Fresh, Category::Whale]);
    assert_eq!(whale.alerts()[1].category_context, vec![Category::Whale]);
    assert_eq!(whale.alerts()[1].amount("largest_buy"), Some(dec!(15)));

    let snapshot = pipeline.ledgers().snapshot(&token).unwrap();
    assert_eq!(snapshot.per_category.get(&Category::Whale).unwrap().buy_total, dec!(15));
    assert_eq!(snapshot.per_category.get(&Category::Fresh).unwrap().buy_total, dec!(1));

    // Another whale buy on the same token neither re-correlates nor clears the margin
    let repeat = pipeline.ingest(RawEvent::new(
        "Whale",
        "ABC123",
        "OtherWhale has swapped 2 SOL for 130,000 TOKEN on Raydium",
    ));
    assert!(repeat.is_applied());
    assert!(repeat.alerts().is_empty());

    // The same message again is a duplicate
    let duplicate = pipeline.ingest(RawEvent::new(
        "Whale",
        "ABC123",
        "WhaleWallet has swapped 15 SOL for 1,000,000 TOKEN on Raydium",
    ));
    assert!(matches!(duplicate, IngestOutcome::Duplicate));

    assert_eq!(sink.count_of(AlertKind::Correlation), 1);
    assert_eq!(sink.count_of(AlertKind::LargeBuy), 1);
    assert_eq!(pipeline.stats(&token).unwrap().total_buys, dec!(18));
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_untrack_allows_fresh_correlation() {
    let sink = RecordingAlertSink::new();
    let pipeline = build_pipeline(ScriptedMarketData::new(), &sink);
    let token = addr("tok");

    pipeline.ingest(RawEvent::new("Fresh", "tok", "a swapped 1 SOL for T"));
    pipeline.ingest(RawEvent::new("Smart", "tok", "b swapped 2 SOL for T"));
    assert!(pipeline.untrack(&token));
    assert!(!pipeline.ledgers().contains(&token));

    pipeline.ingest(RawEvent::new("Fresh", "tok", "a swapped 1 SOL for T"));
    pipeline.ingest(RawEvent::new("Smart", "tok", "b swapped 2 SOL for T"));
    assert_eq!(sink.count_of(AlertKind::Correlation), 2);
    pipeline.shutdown().await;
}

// ============================================================================
// Sampler
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_sampler_dip_and_revival_through_pipeline() {
    let token = addr("tok");
    let data = ScriptedMarketData::new()
        .with_script(&token, [Some(dec!(100000)), Some(dec!(88000)), Some(dec!(112000))])
        .with_fallback(&token, dec!(113000));
    let sink = RecordingAlertSink::new();
    let pipeline = build_pipeline(data, &sink);

    let outcome = pipeline.ingest(RawEvent::new("Whale", "tok", "w swapped 15 SOL for T"));
    let IngestOutcome::Applied { sampler_started, .. } = outcome else {
        panic!("expected applied outcome");
    };
    assert!(sampler_started);

    assert_eq!(wait_finished(&pipeline, &token).await, SessionOutcome::Revived);
    assert_eq!(
        sink.kinds(),
        vec![AlertKind::LargeBuy, AlertKind::SamplerDip, AlertKind::SamplerRevival]
    );

    let revival = sink
        .alerts()
        .into_iter()
        .find(|a| a.kind == AlertKind::SamplerRevival)
        .unwrap();
    assert_eq!(revival.amount("baseline"), Some(dec!(100000)));
    assert_eq!(revival.amount("market_cap"), Some(dec!(112000)));

    // A later trigger for the same address does not start a second session
    let again = pipeline.ingest(RawEvent::new("Smart", "tok", "s swapped 30 SOL for T"));
    let IngestOutcome::Applied { sampler_started, .. } = again else {
        panic!("expected applied outcome");
    };
    assert!(!sampler_started);
}

#[tokio::test(start_paused = true)]
async fn test_small_buys_do_not_start_sampler() {
    let sink = RecordingAlertSink::new();
    let data = ScriptedMarketData::new();
    let pipeline = build_pipeline(data.clone(), &sink);

    let outcome = pipeline.ingest(RawEvent::new("Whale", "tok", "w swapped 2 SOL for T"));
    let IngestOutcome::Applied { sampler_started, .. } = outcome else {
        panic!("expected applied outcome");
    };
    assert!(!sampler_started);
    assert!(pipeline.scheduler().status(&addr("tok")).is_none());
    assert!(data.get_calls().is_empty());
}

// ============================================================================
// Event source loop
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_run_consumes_source_and_reports() {
    let sink = RecordingAlertSink::new();
    let pipeline = build_pipeline(ScriptedMarketData::new(), &sink);

    let mut source = VecEventSource::new([
        RawEvent::new("Fresh", "tok", "a swapped 1 SOL for T"),
        RawEvent::new("Smart", "tok", "b swapped 2 SOL for T"),
    ])
    .with_error("connection reset")
    .with_event(RawEvent::new("Smart", "tok", "b swapped 2 SOL for T"))
    .with_event(RawEvent::new("Whale", "[wallet]", "c swapped 5 SOL for T"))
    .with_event(RawEvent::new("Whale", "tok", "nothing to see here"));

    let report = pipeline.run(&mut source, CancellationToken::new()).await;

    assert_eq!(report.events, 5);
    assert_eq!(report.applied, 2);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.rejected, 1);
    assert_eq!(report.dropped, 1);
    assert_eq!(report.poll_errors, 1);
    assert_eq!(report.alerts, 1);
    assert_eq!(report.samplers_started, 1);
    assert_eq!(source.remaining(), 0);
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_run_stops_on_shutdown() {
    let sink = RecordingAlertSink::new();
    let pipeline = build_pipeline(ScriptedMarketData::new(), &sink);
    let mut source = VecEventSource::new([RawEvent::new("Whale", "tok", "w swapped 15 SOL for T")]);

    let shutdown = CancellationToken::new();
    shutdown.cancel();
    let report = pipeline.run(&mut source, shutdown).await;

    assert_eq!(report.events, 0);
    assert_eq!(source.remaining(), 1);
}
