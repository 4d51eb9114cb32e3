//! Hardware-free example: watch the queue serialize simulated GATT calls
//!
//! Run with: cargo run --example serialized_operations

use ble_operation_queue::{
    ClientOperationQueue, ConnectionOperationQueue, ConnectionSubscriptionWatcher,
    DisconnectionRouter, InteractionContext, OperationInfo, OperationObserver, OperationType,
    Priority, Result, SingleResponseOperation, TimeoutConfiguration,
};
use std::sync::Arc;
use std::time::Duration;

const ADDRESS: &str = "00:11:22:33:44:55";

/// Prints every lifecycle event.
struct PrintingObserver;

impl OperationObserver for PrintingObserver {
    fn on_queued(&self, operation: &OperationInfo) {
        println!("  queued   {} [{}]", operation, operation.priority);
    }

    fn on_started(&self, operation: &OperationInfo) {
        println!("  started  {}", operation);
    }

    fn on_finished(&self, operation: &OperationInfo, elapsed: Duration) {
        println!("  finished {} in {} ms", operation, elapsed.as_millis());
    }

    fn on_removed(&self, operation: &OperationInfo) {
        println!("  removed  {}", operation);
    }
}

/// A read that answers after `latency`.
fn simulated_read(latency: Duration, value: u8) -> SingleResponseOperation<Vec<u8>> {
    SingleResponseOperation::new(
        OperationType::CharacteristicRead,
        ADDRESS,
        TimeoutConfiguration::new(Duration::from_secs(1)),
        move || {
            Ok(async move {
                tokio::time::sleep(latency).await;
                Ok(vec![value])
            })
        },
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ble_operation_queue=debug".parse().unwrap()),
        )
        .init();

    let context = InteractionContext::dedicated("ble-interaction")?;
    let client = ClientOperationQueue::with_observer(context.clone(), Arc::new(PrintingObserver));

    println!("Queueing reads with mixed priorities...");
    let low = client.queue(simulated_read(Duration::from_millis(50), 3).with_priority(Priority::Low));
    let normal = client.queue(simulated_read(Duration::from_millis(50), 2));
    let high = client.queue(simulated_read(Duration::from_millis(50), 1).with_priority(Priority::High));
    let cancelled = client.queue(simulated_read(Duration::from_millis(50), 4));
    cancelled.cancel();

    println!("High:   {:?}", high.single().await?);
    println!("Normal: {:?}", normal.single().await?);
    println!("Low:    {:?}", low.single().await?);

    println!("\nTimeout of an unanswered read...");
    let silent = client.queue(simulated_read(Duration::from_secs(10), 0));
    match silent.single().await {
        Ok(value) => println!("Unexpected value: {:?}", value),
        Err(e) => println!("Failed as expected: {}", e),
    }

    println!("\nLink loss on a connection queue...");
    let router = DisconnectionRouter::new(ADDRESS);
    let connection = ConnectionOperationQueue::new(router.clone(), context, None);
    connection.on_connection_subscribed();

    let pending: Vec<_> = (0..3)
        .map(|i| connection.queue(simulated_read(Duration::from_millis(200), i)))
        .collect();

    tokio::time::sleep(Duration::from_millis(50)).await;
    router.on_disconnected(Some(8));

    for (i, handle) in pending.into_iter().enumerate() {
        match handle.single().await {
            Ok(value) => println!("Read {}: {:?}", i, value),
            Err(e) => println!("Read {} failed: {}", i, e),
        }
    }

    match connection.queue(simulated_read(Duration::ZERO, 9)).single().await {
        Ok(value) => println!("Unexpected value: {:?}", value),
        Err(e) => println!("Late read rejected: {}", e),
    }

    Ok(())
}
