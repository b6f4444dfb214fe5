use std::time::Duration;

use tokio::time::timeout;

use mom_streams::{
    //
    BackpressureStrategy,
    BrokerRecord,
    CountingMetrics,
    Destination,
    MemoryBroker,
    MultiplexerConfig,
    Result,
    SubscriptionMultiplexer,
};

const WAIT: Duration = Duration::from_secs(5);

fn config() -> MultiplexerConfig {
    MultiplexerConfig::new("test-mux")
        .with_poll_interval(Duration::from_millis(10))
        .with_poll_timeout(Duration::from_millis(10))
}

fn dest(name: &str) -> Destination {
    Destination::from(name)
}

/// Poll `cond` until it holds, failing the test after `WAIT`.
async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    // ---
    let waited = timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_no_connection_without_subscribers() {
    // ---
    let broker = MemoryBroker::new();
    let mux = SubscriptionMultiplexer::spawn(broker.factory(), config(), mom_streams::noop_metrics());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(broker.stats().opens, 0);
    assert!(broker.subscription_log().is_empty());

    mux.shutdown().await;
    assert_eq!(broker.stats().closes, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_orders_lifecycle() -> Result<()> {
    // ---
    let broker = MemoryBroker::new();
    let mux = SubscriptionMultiplexer::spawn(broker.factory(), config(), mom_streams::noop_metrics());

    let mut view = mux.subscribe("orders")?;
    eventually("orders subscription", || broker.subscribed() == vec![dest("orders")]).await;

    broker.publish(BrokerRecord::new("orders", "o-1"));
    broker.publish(BrokerRecord::new("orders", "o-2"));

    let first = timeout(WAIT, view.recv()).await.expect("recv").expect("open")?;
    let second = timeout(WAIT, view.recv()).await.expect("recv").expect("open")?;
    assert_eq!(first.payload.as_ref(), b"o-1");
    assert_eq!(second.payload.as_ref(), b"o-2");

    view.dispose();
    eventually("connection released", || broker.open_connections() == 0).await;

    assert_eq!(broker.subscription_log(), vec![vec![dest("orders")]]);
    assert_eq!(broker.stats().closes, 1);

    mux.shutdown().await;
    assert_eq!(broker.stats().closes, 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shared_destination_is_subscribed_once() -> Result<()> {
    // ---
    let broker = MemoryBroker::new();
    let mux = SubscriptionMultiplexer::spawn(broker.factory(), config(), mom_streams::noop_metrics());

    let mut a = mux.subscribe("orders")?;
    let mut b = mux.subscribe("orders")?;
    let mut audit = mux.subscribe("audit")?;
    eventually("both destinations", || broker.subscribed().len() == 2).await;

    broker.publish(BrokerRecord::new("orders", "o-1"));
    broker.publish(BrokerRecord::new("audit", "a-1"));

    for view in [&mut a, &mut b] {
        let env = timeout(WAIT, view.recv()).await.expect("recv").expect("open")?;
        assert_eq!(env.payload.as_ref(), b"o-1");
    }
    let env = timeout(WAIT, audit.recv()).await.expect("recv").expect("open")?;
    assert_eq!(env.destination, dest("audit"));

    // Dropping one of two views keeps the destination subscribed.
    drop(a);
    assert_eq!(mux.reference_count(&dest("orders")), 1);
    drop(audit);
    eventually("audit removed", || broker.subscribed() == vec![dest("orders")]).await;

    let log = broker.subscription_log();
    assert_eq!(log.last(), Some(&vec![dest("orders")]));
    assert_eq!(broker.stats().opens, 1);

    drop(b);
    mux.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reopens_after_idle() -> Result<()> {
    // ---
    let broker = MemoryBroker::new();
    let mux = SubscriptionMultiplexer::spawn(broker.factory(), config(), mom_streams::noop_metrics());

    let view = mux.subscribe("orders")?;
    eventually("first open", || broker.open_connections() == 1).await;
    drop(view);
    eventually("idle close", || broker.open_connections() == 0).await;

    let mut view = mux.subscribe("orders")?;
    eventually("second open", || broker.subscribed() == vec![dest("orders")]).await;
    broker.publish(BrokerRecord::new("orders", "again"));

    let env = timeout(WAIT, view.recv()).await.expect("recv").expect("open")?;
    assert_eq!(env.payload.as_ref(), b"again");
    assert_eq!(broker.stats().opens, 2);

    mux.shutdown().await;
    assert_eq!(broker.stats().closes, 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_survives_broker_failures() -> Result<()> {
    // ---
    let broker = MemoryBroker::new();
    broker.fail_next_opens(2);
    let mux = SubscriptionMultiplexer::spawn(broker.factory(), config(), mom_streams::noop_metrics());

    let mut view = mux.subscribe("orders")?;
    eventually("subscription after failed opens", || {
        broker.subscribed() == vec![dest("orders")]
    })
    .await;

    broker.fail_next_polls(3);
    broker.publish(BrokerRecord::new("orders", "still-here"));

    let env = timeout(WAIT, view.recv()).await.expect("recv").expect("open")?;
    assert_eq!(env.payload.as_ref(), b"still-here");
    assert_eq!(broker.stats().opens, 1);

    mux.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unparsable_records_are_counted_and_skipped() -> Result<()> {
    // ---
    let broker = MemoryBroker::new();
    let metrics = CountingMetrics::new();
    let mux = SubscriptionMultiplexer::spawn(broker.factory(), config(), metrics.clone());

    let mut view = mux.subscribe("orders")?;
    eventually("orders subscription", || broker.subscribed() == vec![dest("orders")]).await;

    broker.inject(BrokerRecord::new("", "garbage"));
    broker.publish(BrokerRecord::new("orders", "good"));

    let env = timeout(WAIT, view.recv()).await.expect("recv").expect("open")?;
    assert_eq!(env.payload.as_ref(), b"good");

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.unparsable_messages, 1);
    assert_eq!(snapshot.messages_received, 1);

    mux.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_closes_once_and_ends_views() -> Result<()> {
    // ---
    let broker = MemoryBroker::new();
    broker.fail_close(true);
    let mux = SubscriptionMultiplexer::spawn(broker.factory(), config(), mom_streams::noop_metrics());

    let mut orders = mux.subscribe("orders")?;
    let mut audit = mux.subscribe("audit")?;
    eventually("both destinations", || broker.subscribed().len() == 2).await;

    mux.shutdown().await;
    mux.shutdown().await;

    assert_eq!(broker.stats().closes, 1);
    assert_eq!(broker.open_connections(), 0);
    assert_eq!(timeout(WAIT, orders.recv()).await.expect("recv"), None);
    assert_eq!(timeout(WAIT, audit.recv()).await.expect("recv"), None);
    assert!(mux.subscribe("orders").is_err());

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_busy_destination_never_evicts_another_views_records() -> Result<()> {
    // ---
    let broker = MemoryBroker::new();
    let metrics = CountingMetrics::new();
    let mux = SubscriptionMultiplexer::spawn(
        broker.factory(),
        config().with_view_capacity(4),
        metrics.clone(),
    );

    let mut audit = mux.subscribe_with_backpressure("audit", BackpressureStrategy::ErrorOnOverflow)?;
    let mut orders = mux.subscribe_with_backpressure("orders", BackpressureStrategy::DropLatest)?;
    eventually("both destinations", || broker.subscribed().len() == 2).await;

    broker.publish(BrokerRecord::new("audit", "a-1"));
    for i in 0..20 {
        broker.publish(BrokerRecord::new("orders", format!("o-{i}")));
    }
    broker.publish(BrokerRecord::new("audit", "a-2"));

    // Records are routed in arrival order, so a-2 means every order was too.
    for expected in [&b"a-1"[..], &b"a-2"[..]] {
        let env = timeout(WAIT, audit.recv()).await.expect("recv").expect("open")?;
        assert_eq!(env.payload.as_ref(), expected);
    }
    assert_eq!(metrics.snapshot().messages_received, 22);

    // The orders view dropped its own overflow and nothing else.
    assert_eq!(orders.pending(), 4);
    for i in 0..4 {
        let env = orders.try_recv().expect("open")?.expect("buffered");
        assert_eq!(env.payload.as_ref(), format!("o-{i}").as_bytes());
    }
    assert_eq!(orders.try_recv(), Some(Ok(None)));

    mux.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_view_strategy_applies_to_that_view_only() -> Result<()> {
    // ---
    let broker = MemoryBroker::new();
    let mux = SubscriptionMultiplexer::spawn(broker.factory(), config(), mom_streams::noop_metrics());

    let mut latest = mux.subscribe_with_backpressure("orders", BackpressureStrategy::KeepLatest)?;
    let mut all = mux.subscribe("orders")?;
    assert_eq!(latest.strategy(), BackpressureStrategy::KeepLatest);
    assert_eq!(all.strategy(), BackpressureStrategy::Unbounded);
    eventually("orders subscription", || broker.subscribed() == vec![dest("orders")]).await;

    for i in 1..=3 {
        broker.publish(BrokerRecord::new("orders", format!("b-{i}")));
    }

    for i in 1..=3 {
        let env = timeout(WAIT, all.recv()).await.expect("recv").expect("open")?;
        assert_eq!(env.payload.as_ref(), format!("b-{i}").as_bytes());
    }

    let env = latest.try_recv().expect("open")?.expect("buffered");
    assert_eq!(env.payload.as_ref(), b"b-3");
    assert_eq!(latest.try_recv(), Some(Ok(None)));

    latest.dispose();
    all.dispose();
    assert_eq!(mux.reference_count(&dest("orders")), 0);
    eventually("connection released", || broker.open_connections() == 0).await;

    mux.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_releases_loop_held_by_full_block_view() -> Result<()> {
    // ---
    let broker = MemoryBroker::new();
    let metrics = CountingMetrics::new();
    let mux = SubscriptionMultiplexer::spawn(
        broker.factory(),
        config().with_view_capacity(1),
        metrics.clone(),
    );

    let mut view = mux.subscribe_with_backpressure("orders", BackpressureStrategy::Block)?;
    eventually("orders subscription", || broker.subscribed() == vec![dest("orders")]).await;

    for i in 0..3 {
        broker.publish(BrokerRecord::new("orders", format!("o-{i}")));
    }
    eventually("records polled", || metrics.snapshot().messages_received == 3).await;
    eventually("view full", || view.pending() == 1).await;

    timeout(WAIT, mux.shutdown()).await.expect("shutdown stalled");
    assert_eq!(broker.stats().closes, 1);

    let env = timeout(WAIT, view.recv()).await.expect("recv").expect("open")?;
    assert_eq!(env.payload.as_ref(), b"o-0");
    assert_eq!(timeout(WAIT, view.recv()).await.expect("recv"), None);

    Ok(())
}
