//! End-to-end scenarios against a scripted source
//!
//! All tests run on a paused clock; sleeps and polling intervals advance
//! instantly once every task is idle.

use futures_util::StreamExt;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use ticker_clock::ManualClock;
use ticker_core::Symbol;
use ticker_streaming::{
    ErrorKind, ScriptStep, ScriptedSource, StreamError, StreamingConfig, StreamingService,
};

fn service_with(source: Arc<ScriptedSource>, config: StreamingConfig) -> StreamingService {
    StreamingService::new(source, Arc::new(ManualClock::starting_now()), config).unwrap()
}

fn service(source: Arc<ScriptedSource>) -> StreamingService {
    service_with(source, StreamingConfig::default())
}

fn sym(s: &str) -> Symbol {
    Symbol::new(s).unwrap()
}

/// Let actors and readers settle
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test(start_paused = true)]
async fn test_changes_only_and_late_joiner_gets_cache() {
    let source = Arc::new(ScriptedSource::new().with_quotes(
        "BTCUSD",
        &["61234.5", "61234.5", "61300.0"],
    ));
    let service = service(Arc::clone(&source));

    let mut alice = service.subscribe("BTCUSD", Some("alice")).await.unwrap();
    let first = alice.next().await.unwrap().unwrap();
    assert_eq!(first.price, dec!(61234.5));
    assert_eq!(first.symbol, sym("BTCUSD"));

    // Joins after the first emission: served from cache, no second reader
    let mut bob = service.subscribe("btc-usd", Some("bob")).await.unwrap();
    let cached = tokio::time::timeout(Duration::from_millis(1), bob.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(cached.price, dec!(61234.5));

    let second = alice.next().await.unwrap().unwrap();
    assert_eq!(second.price, dec!(61300.0));
    assert_eq!(bob.next().await.unwrap().unwrap().price, dec!(61300.0));

    // The script holds on its last quote: nothing else arrives
    let quiet = tokio::time::timeout(Duration::from_secs(10), alice.next()).await;
    assert!(quiet.is_err());

    let stats = service.stats();
    assert_eq!(stats.readers_started, 1);
    assert_eq!(stats.active_readers, 1);
    assert_eq!(stats.subscribers, 2);
    assert_eq!(source.opens_for("BTCUSD"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_subscribers_share_one_reader() {
    let source = Arc::new(
        ScriptedSource::new()
            .with_quotes("ETHUSD", &["3120.75"])
            .with_provision_delay(Duration::from_millis(100)),
    );
    let service = Arc::new(service(Arc::clone(&source)));

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                let mut stream = service
                    .subscribe("ETHUSD", Some(&format!("client-{i}")))
                    .await
                    .unwrap();
                let sample = stream.next().await.unwrap().unwrap();
                (sample.price, stream)
            })
        })
        .collect();

    let mut streams = Vec::new();
    for task in tasks {
        let (price, stream) = task.await.unwrap();
        assert_eq!(price, dec!(3120.75));
        streams.push(stream);
    }

    assert_eq!(source.opens_for("ETHUSD"), 1);
    assert_eq!(source.provisions(), 1);
    assert_eq!(service.stats().readers_started, 1);
    assert_eq!(service.stats().subscribers, 20);
}

#[tokio::test(start_paused = true)]
async fn test_resubscribe_after_cleanup_starts_fresh_reader() {
    let source = Arc::new(ScriptedSource::new().with_quotes("SOLUSD", &["150.25"]));
    let service = service(Arc::clone(&source));

    let mut stream = service.subscribe("SOLUSD", Some("carol")).await.unwrap();
    assert!(stream.next().await.unwrap().is_ok());
    stream.close().await;
    settle().await;

    assert!(!service.registry().is_active(&sym("SOLUSD")));
    assert_eq!(service.stats().active_readers, 0);
    assert_eq!(service.stats().pooled_resources, 0);
    assert_eq!(source.live_sessions(), 0);

    let mut again = service.subscribe("SOLUSD", Some("carol")).await.unwrap();
    assert_eq!(again.next().await.unwrap().unwrap().price, dec!(150.25));
    assert_eq!(source.opens_for("SOLUSD"), 2);
    assert_eq!(service.stats().readers_started, 2);
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_ends_stream_and_releases_reader() {
    let source = Arc::new(ScriptedSource::new().with_quotes("BTCUSD", &["100.5"]));
    let service = service(Arc::clone(&source));

    let mut stream = service.subscribe("BTCUSD", Some("dave")).await.unwrap();
    assert!(stream.next().await.unwrap().is_ok());

    let ack = service.unsubscribe("BTCUSD", "dave").await.unwrap();
    assert!(ack.removed);
    assert!(stream.next().await.is_none());
    settle().await;

    assert_eq!(service.stats().active_symbols, 0);
    assert_eq!(service.stats().subscribers, 0);
    assert_eq!(source.contexts_closed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_token_ends_stream() {
    let source = Arc::new(ScriptedSource::new().with_quotes("BTCUSD", &["100.5", "101.5"]));
    let service = service(Arc::clone(&source));

    let mut stream = service.subscribe("BTCUSD", Some("erin")).await.unwrap();
    let disconnect = stream.disconnect_handle();
    assert!(stream.next().await.unwrap().is_ok());

    disconnect.cancel();
    assert!(stream.next().await.is_none());
    assert!(stream.next().await.is_none());
    settle().await;

    assert!(!service.registry().is_active(&sym("BTCUSD")));
    assert_eq!(service.stats().subscribers, 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_stream_unsubscribes() {
    let source = Arc::new(ScriptedSource::new().with_quotes("BTCUSD", &["100.5"]));
    let service = service(Arc::clone(&source));

    let stream = service.subscribe("BTCUSD", Some("frank")).await.unwrap();
    settle().await;
    drop(stream);
    settle().await;

    assert!(!service.registry().is_active(&sym("BTCUSD")));
    assert_eq!(source.live_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_out_of_range_prices_are_dropped() {
    let source = Arc::new(
        ScriptedSource::new().with_quotes("ODD", &["5000000", "0", "0.01", "42.5"]),
    );
    let service = service(Arc::clone(&source));

    let stream = service.subscribe("ODD", None).await.unwrap();
    let prices: Vec<_> = stream
        .into_stream()
        .take(1)
        .map(|item| item.unwrap().price)
        .collect()
        .await;
    assert_eq!(prices, vec![dec!(42.5)]);
}

#[tokio::test(start_paused = true)]
async fn test_fallback_scan_used_when_locators_miss() {
    let source = Arc::new(ScriptedSource::new().with_script(
        "XAUUSD",
        vec![
            ScriptStep::Quote("n/a".into()),
            ScriptStep::Text("Gold spot $2,345.10 per ounce".into()),
        ],
    ));
    let service = service(Arc::clone(&source));

    let mut stream = service.subscribe("XAUUSD", None).await.unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap().price, dec!(2345.10));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_symbol_reaches_every_subscriber() {
    let source = Arc::new(ScriptedSource::new());
    let service = service(Arc::clone(&source));

    let mut a = service.subscribe("NOSUCH", Some("a")).await.unwrap();
    let mut b = service.subscribe("NOSUCH", Some("b")).await.unwrap();

    for stream in [&mut a, &mut b] {
        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSymbol);
        assert!(!err.is_retryable());
        assert!(stream.next().await.is_none());
    }
    settle().await;

    assert_eq!(service.stats().subscribers, 0);
    assert_eq!(service.stats().active_symbols, 0);
    assert_eq!(service.stats().pooled_resources, 0);
}

#[tokio::test(start_paused = true)]
async fn test_source_outage_is_retryable() {
    let source = Arc::new(ScriptedSource::new().with_script(
        "BTCUSD",
        vec![ScriptStep::Quote("100.5".into()), ScriptStep::Unavailable],
    ));
    let service = service(Arc::clone(&source));

    let mut stream = service.subscribe("BTCUSD", None).await.unwrap();
    assert!(stream.next().await.unwrap().is_ok());
    let err = stream.next().await.unwrap().unwrap_err();
    assert!(matches!(err, StreamError::SourceUnavailable { .. }));
    assert!(err.is_retryable());
    assert!(stream.next().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_pool_bound_evicts_least_recent_symbol() {
    let source = Arc::new(
        ScriptedSource::new()
            .with_quotes("AAA", &["1.5"])
            .with_quotes("BBB", &["2.5"])
            .with_quotes("CCC", &["3.5"]),
    );
    let config = StreamingConfig {
        max_resources: 2,
        ..Default::default()
    };
    let service = service_with(Arc::clone(&source), config);

    let mut a = service.subscribe("AAA", None).await.unwrap();
    assert!(a.next().await.unwrap().is_ok());
    let mut b = service.subscribe("BBB", None).await.unwrap();
    assert!(b.next().await.unwrap().is_ok());
    let mut c = service.subscribe("CCC", None).await.unwrap();
    assert!(c.next().await.unwrap().is_ok());

    // AAA was provisioned first and touched no later than BBB
    let err = a.next().await.unwrap().unwrap_err();
    assert!(matches!(err, StreamError::SourceUnavailable { .. }));
    settle().await;

    let stats = service.stats();
    assert!(stats.pooled_resources <= 2);
    assert_eq!(stats.symbols, vec!["BBB".to_string(), "CCC".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_ends_all_streams() {
    let source = Arc::new(
        ScriptedSource::new()
            .with_quotes("AAA", &["1.5"])
            .with_quotes("BBB", &["2.5"]),
    );
    let service = service(Arc::clone(&source));

    let mut a = service.subscribe("AAA", None).await.unwrap();
    let mut b = service.subscribe("BBB", None).await.unwrap();
    settle().await;

    service.shutdown().await;

    while let Some(item) = a.next().await {
        assert!(item.is_ok());
    }
    while let Some(item) = b.next().await {
        assert!(item.is_ok());
    }
    assert_eq!(source.live_sessions(), 0);
    assert_eq!(
        service.subscribe("AAA", None).await.unwrap_err(),
        StreamError::ShuttingDown
    );
}

#[tokio::test(start_paused = true)]
async fn test_late_finish_of_old_stream_keeps_resubscription() {
    let source = Arc::new(ScriptedSource::new().with_quotes("BTCUSD", &["100.5"]));
    let service = service(Arc::clone(&source));

    let mut old = service.subscribe("BTCUSD", Some("web-1:BTCUSD")).await.unwrap();
    assert!(old.next().await.unwrap().is_ok());
    assert!(service.unsubscribe("BTCUSD", "web-1:BTCUSD").await.unwrap().removed);

    // Same id again before the old stream has noticed it was ended
    let mut fresh = service.subscribe("BTCUSD", Some("web-1:BTCUSD")).await.unwrap();
    assert_ne!(old.ticket(), fresh.ticket());
    assert!(old.next().await.is_none());
    settle().await;

    assert_eq!(fresh.next().await.unwrap().unwrap().price, dec!(100.5));
    let quiet = tokio::time::timeout(Duration::from_secs(5), fresh.next()).await;
    assert!(quiet.is_err(), "fresh stream must stay open");

    let stats = service.stats();
    assert_eq!(stats.subscribers, 1);
    assert_eq!(stats.active_symbols, 1);
    assert_eq!(stats.active_readers, 1);
}

#[tokio::test(start_paused = true)]
async fn test_resubscribe_right_after_drop() {
    let source = Arc::new(ScriptedSource::new().with_quotes("BTCUSD", &["100.5"]));
    let service = service(Arc::clone(&source));

    let mut first = service.subscribe("BTCUSD", Some("grace")).await.unwrap();
    assert!(first.next().await.unwrap().is_ok());
    drop(first);

    let mut again = service.subscribe("BTCUSD", Some("grace")).await.unwrap();
    assert_eq!(again.next().await.unwrap().unwrap().price, dec!(100.5));
    settle().await;

    let stats = service.stats();
    assert_eq!(stats.subscribers, 1);
    assert_eq!(stats.active_symbols, 1);
    assert_eq!(service.registry().binding(again.subscriber()), Some(sym("BTCUSD")));
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_during_teardown_waits_for_fresh_actor() {
    let source = Arc::new(
        ScriptedSource::new()
            .with_quotes("BTCUSD", &["100.5"])
            .with_close_stall(Duration::from_millis(500)),
    );
    let service = service(Arc::clone(&source));

    let mut a = service.subscribe("BTCUSD", Some("a")).await.unwrap();
    assert!(a.next().await.unwrap().is_ok());
    assert!(service.unsubscribe("BTCUSD", "a").await.unwrap().removed);

    // The retiring actor is still listed while its reader closes the session
    let started = tokio::time::Instant::now();
    let mut b = service.subscribe("BTCUSD", Some("b")).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(500));

    assert_eq!(b.next().await.unwrap().unwrap().price, dec!(100.5));
    assert!(a.next().await.is_none());

    let stats = service.stats();
    assert_eq!(stats.readers_started, 2);
    assert_eq!(stats.subscribers, 1);
    assert_eq!(stats.active_symbols, 1);
    assert_eq!(source.opens_for("BTCUSD"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stuck_reader_is_aborted_and_cleaned_up() {
    let source = Arc::new(
        ScriptedSource::new()
            .with_quotes("BTCUSD", &["100.5"])
            .with_close_stall(Duration::from_secs(60)),
    );
    let config = StreamingConfig {
        stop_timeout_ms: 100,
        ..Default::default()
    };
    let service = service_with(Arc::clone(&source), config);

    let mut stream = service.subscribe("BTCUSD", Some("hank")).await.unwrap();
    assert!(stream.next().await.unwrap().is_ok());
    assert!(service.unsubscribe("BTCUSD", "hank").await.unwrap().removed);
    tokio::time::sleep(Duration::from_secs(1)).await;

    let stats = service.stats();
    assert_eq!(stats.active_symbols, 0);
    assert_eq!(stats.active_readers, 0);
    assert_eq!(stats.pooled_resources, 0);
    assert_eq!(source.live_sessions(), 0);
    assert_eq!(source.contexts_closed(), 1);
}
