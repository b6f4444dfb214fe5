use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use mom_streams::{
    //
    BackpressureStrategy,
    CountingMetrics,
    Destination,
    DestinationRegistry,
    Dispatch,
    Envelope,
    Error,
    EventBus,
    ListenerExit,
    RegistryConfig,
    Result,
};

const WAIT: Duration = Duration::from_secs(5);

fn quiet_config() -> RegistryConfig {
    RegistryConfig::default().with_warn_on_no_listener(false)
}

#[tokio::test]
async fn test_every_subscriber_receives_each_payload_once() -> Result<()> {
    // ---
    let registry: DestinationRegistry<String, u32> =
        DestinationRegistry::with_config(quiet_config(), mom_streams::noop_metrics());
    let key = "prices".to_string();

    let mut subs = Vec::new();
    for _ in 0..3 {
        subs.push(registry.subscribe(&key, BackpressureStrategy::Unbounded)?);
    }

    for value in 0..10 {
        assert_eq!(registry.emit(&key, value)?, Dispatch::Delivered(3));
    }
    registry.complete(&key)?;

    for mut sub in subs {
        let mut seen = Vec::new();
        while let Some(item) = timeout(WAIT, sub.recv()).await.expect("recv timed out") {
            seen.push(item?);
        }
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    Ok(())
}

#[tokio::test]
async fn test_failing_callback_does_not_affect_siblings() -> Result<()> {
    // ---
    let bus = EventBus::with_config(quiet_config(), mom_streams::noop_metrics());
    let orders = Destination::new("orders")?;

    let failing = bus.subscribe_with(&orders, BackpressureStrategy::Unbounded, |env: Envelope| {
        if env.payload.as_ref() == b"bad" {
            return Err("cannot handle payload");
        }
        Ok(())
    })?;

    let healthy_seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&healthy_seen);
    let healthy = bus.subscribe_with(&orders, BackpressureStrategy::Unbounded, move |_env| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok::<(), Error>(())
    })?;

    bus.publish(Envelope::new(orders.clone(), "good".into()))?;
    bus.publish(Envelope::new(orders.clone(), "bad".into()))?;

    let exit = timeout(WAIT, failing.join()).await.expect("listener did not end");
    assert!(matches!(exit, ListenerExit::Faulted(Error::SubscriberFault(_))));

    // The channel keeps delivering to the surviving subscriber.
    bus.publish(Envelope::new(orders.clone(), "after".into()))?;
    assert_eq!(bus.subscriber_count(&orders), 1);

    bus.complete(&orders)?;
    let exit = timeout(WAIT, healthy.join()).await.expect("listener did not end");
    assert_eq!(exit, ListenerExit::Completed);
    assert_eq!(healthy_seen.load(Ordering::SeqCst), 3);

    Ok(())
}

#[tokio::test]
async fn test_panicking_callback_is_isolated() -> Result<()> {
    // ---
    let registry: DestinationRegistry<String, u32> =
        DestinationRegistry::with_config(quiet_config(), mom_streams::noop_metrics());
    let key = "ticks".to_string();

    let panicking = registry.subscribe_with(&key, BackpressureStrategy::Unbounded, |value| {
        if value == 2 {
            panic!("boom");
        }
        Ok::<(), Error>(())
    })?;
    let mut sibling = registry.subscribe(&key, BackpressureStrategy::Unbounded)?;

    for value in 1..=3 {
        registry.emit(&key, value)?;
    }

    let exit = timeout(WAIT, panicking.join()).await.expect("listener did not end");
    assert!(matches!(exit, ListenerExit::Faulted(_)));

    for expected in 1..=3 {
        let got = timeout(WAIT, sibling.recv()).await.expect("recv timed out");
        assert_eq!(got, Some(Ok(expected)));
    }

    Ok(())
}

#[tokio::test]
async fn test_cancelled_listener_detaches() -> Result<()> {
    // ---
    let registry: DestinationRegistry<String, u32> =
        DestinationRegistry::with_config(quiet_config(), mom_streams::noop_metrics());
    let key = "ticks".to_string();

    let listener =
        registry.subscribe_with(&key, BackpressureStrategy::Unbounded, |_| Ok::<(), Error>(()))?;
    assert_eq!(registry.subscriber_count(&key), 1);

    listener.cancel();
    assert_eq!(timeout(WAIT, listener.join()).await.expect("join"), ListenerExit::Cancelled);
    assert_eq!(registry.emit(&key, 1)?, Dispatch::NoListener);

    Ok(())
}

#[test]
fn test_no_listener_is_counted() -> Result<()> {
    // ---
    let metrics = CountingMetrics::new();
    let registry: DestinationRegistry<String, u32> =
        DestinationRegistry::with_config(quiet_config(), metrics.clone());
    let key = "nobody".to_string();

    assert_eq!(registry.emit(&key, 1)?, Dispatch::NoListener);
    assert_eq!(registry.emit(&key, 2)?, Dispatch::NoListener);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.no_listener, 2);
    assert_eq!(snapshot.channels_created, 1);
    assert_eq!(snapshot.deliveries, 0);

    Ok(())
}

#[test]
fn test_strategies_are_independent_per_subscriber() -> Result<()> {
    // ---
    let registry: DestinationRegistry<String, u32> = DestinationRegistry::with_config(
        quiet_config().with_subscriber_capacity(2),
        mom_streams::noop_metrics(),
    );
    let key = "burst".to_string();

    let mut unbounded = registry.subscribe(&key, BackpressureStrategy::Unbounded)?;
    let mut drop_latest = registry.subscribe(&key, BackpressureStrategy::DropLatest)?;
    let mut keep_latest = registry.subscribe(&key, BackpressureStrategy::KeepLatest)?;
    let mut strict = registry.subscribe(&key, BackpressureStrategy::ErrorOnOverflow)?;

    for value in 1..=4 {
        registry.emit(&key, value)?;
    }

    let drain = |sub: &mut mom_streams::RegistrySubscription<u32>| {
        let mut out = Vec::new();
        while let Some(Ok(Some(value))) = sub.try_recv() {
            out.push(value);
        }
        out
    };

    assert_eq!(drain(&mut unbounded), vec![1, 2, 3, 4]);
    assert_eq!(drain(&mut drop_latest), vec![1, 2]);
    assert_eq!(drain(&mut keep_latest), vec![4]);

    // Buffered payloads first, then a single overflow error, then the end.
    assert_eq!(strict.try_recv(), Some(Ok(Some(1))));
    assert_eq!(strict.try_recv(), Some(Ok(Some(2))));
    assert_eq!(strict.try_recv(), Some(Err(Error::Overflow { capacity: 2 })));
    assert_eq!(strict.try_recv(), None);
    assert!(!strict.is_active());

    Ok(())
}

#[test]
fn test_block_strategy_stalls_emitter_until_consumed() -> Result<()> {
    // ---
    let registry: Arc<DestinationRegistry<String, u32>> =
        Arc::new(DestinationRegistry::with_config(
            quiet_config()
                .with_subscriber_capacity(1)
                .with_block_wait(Duration::from_millis(10)),
            mom_streams::noop_metrics(),
        ));
    let key = "slow".to_string();
    let mut sub = registry.subscribe(&key, BackpressureStrategy::Block)?;

    registry.emit(&key, 1)?;

    let emitted = Arc::new(AtomicUsize::new(0));
    let emitter = {
        let registry = Arc::clone(&registry);
        let emitted = Arc::clone(&emitted);
        let key = key.clone();
        std::thread::spawn(move || {
            registry.emit(&key, 2).expect("emit");
            emitted.store(1, Ordering::SeqCst);
        })
    };

    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(emitted.load(Ordering::SeqCst), 0);

    assert_eq!(sub.try_recv(), Some(Ok(Some(1))));
    emitter.join().expect("emitter thread");
    assert_eq!(emitted.load(Ordering::SeqCst), 1);
    assert_eq!(sub.try_recv(), Some(Ok(Some(2))));

    Ok(())
}

#[test]
fn test_concurrent_first_access_creates_one_channel() -> Result<()> {
    // ---
    const THREADS: usize = 8;

    let metrics = CountingMetrics::new();
    let registry: DestinationRegistry<String, u32> =
        DestinationRegistry::with_config(quiet_config(), metrics.clone());
    let key = "fresh".to_string();
    let start = std::sync::Barrier::new(THREADS);

    let subs = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..THREADS)
            .map(|n| {
                let (registry, key, start) = (&registry, &key, &start);
                scope.spawn(move || -> Result<_> {
                    start.wait();
                    let sub = registry.subscribe(key, BackpressureStrategy::Unbounded)?;
                    registry.emit(key, n as u32)?;
                    Ok(sub)
                })
            })
            .collect();

        workers
            .into_iter()
            .map(|worker| worker.join().expect("worker panicked"))
            .collect::<Result<Vec<_>>>()
    })?;

    assert_eq!(registry.channel_count(), 1);
    assert_eq!(metrics.snapshot().channels_created, 1);
    assert_eq!(registry.subscriber_count(&key), THREADS);
    assert_eq!(metrics.snapshot().dispatches, THREADS as u64);

    drop(subs);
    assert_eq!(registry.subscriber_count(&key), 0);
    Ok(())
}
