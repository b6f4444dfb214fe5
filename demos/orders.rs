//! Orders pipeline using the in-memory broker.
//!
//! A blocking producer thread feeds orders through an `AsyncSourceBridge`
//! into the broker. A `SubscriptionMultiplexer` consumes the "orders"
//! destination and republishes each envelope on an `EventBus`, where an
//! audit listener and a latest-price dashboard consume it independently.
//!
//! Run with: RUST_LOG=debug cargo run --example orders

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt as tracing_format, EnvFilter};

use mom_streams::{
    //
    AsyncSourceBridge,
    BackpressureStrategy,
    BridgeConfig,
    BrokerRecord,
    CountingMetrics,
    Destination,
    EventBus,
    MemoryBroker,
    MultiplexerConfig,
    RegistryConfig,
    SubscriptionMultiplexer,
};

#[derive(Debug, Serialize, Deserialize)]
struct Order {
    id: u32,
    symbol: String,
    price: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_format()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .init();

    let broker = MemoryBroker::new();
    let metrics = CountingMetrics::new();

    let mux = SubscriptionMultiplexer::spawn(
        broker.factory(),
        MultiplexerConfig::new("orders-demo").with_poll_interval(Duration::from_millis(20)),
        metrics.clone(),
    );
    let bus = Arc::new(EventBus::with_config(
        RegistryConfig::default().with_subscriber_capacity(8),
        metrics.clone(),
    ));
    let orders = Destination::new("orders")?;

    // ---
    // Consumers on the bus
    let audit = bus.subscribe_with(&orders, BackpressureStrategy::Unbounded, |env| {
        let order: Order = serde_json::from_slice(&env.payload)?;
        println!("audit: order {} {} @ {:.2}", order.id, order.symbol, order.price);
        Ok::<(), serde_json::Error>(())
    })?;
    let mut dashboard = bus.subscribe(&orders, BackpressureStrategy::KeepLatest)?;

    // ---
    // Broker -> bus
    let mut view = mux.subscribe(orders.clone())?;
    let forwarder = {
        let bus = Arc::clone(&bus);
        tokio::spawn(async move {
            while let Some(Ok(env)) = view.recv().await {
                if bus.publish(env).is_err() {
                    break;
                }
            }
        })
    };
    while broker.subscribed().is_empty() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // ---
    // Blocking producer -> bridge -> broker
    let (source, mut stream) = AsyncSourceBridge::new(BridgeConfig::default().with_capacity(2))
        .on_release(|| println!("producer released"))
        .start()?;

    let producer = std::thread::spawn(move || {
        for id in 1..=5 {
            let order = Order {
                id,
                symbol: "ACME".to_string(),
                price: 100.0 + f64::from(id),
            };
            let payload = serde_json::to_vec(&order).expect("serializable order");
            if source.push(payload).is_err() {
                break;
            }
        }
        source.signal_done();
    });

    while let Some(payload) = stream.recv().await {
        broker.publish(BrokerRecord::new("orders", payload).with_key("ACME"));
    }
    producer.join().expect("producer thread");

    // ---
    // Let the pipeline settle, then tear down.
    tokio::time::sleep(Duration::from_millis(200)).await;

    if let Some(Ok(Some(env))) = dashboard.try_recv() {
        let latest: Order = serde_json::from_slice(&env.payload)?;
        println!("dashboard: latest price {:.2}", latest.price);
    }

    mux.shutdown().await;
    forwarder.await?;
    bus.complete(&orders)?;
    println!("audit listener ended: {:?}", audit.join().await);
    println!("metrics: {:?}", metrics.snapshot());

    Ok(())
}
