//! Behavioral tests of the queue scopes through the public API.

use async_trait::async_trait;
use ble_operation_queue::{
    ClientOperationQueue, ConnectionOperationQueue, ConnectionSubscriptionWatcher,
    DisconnectionRouter, Emitter, Error, InteractionContext, Operation, OperationInfo,
    OperationObserver, Priority, QueueReleaser, QueueSemaphore, Result,
};
use futures::StreamExt;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

/// Holds the radio until the test lets it go.
struct Blocker(oneshot::Receiver<()>);

#[async_trait]
impl Operation for Blocker {
    type Output = ();

    fn priority(&self) -> Priority {
        Priority::High
    }

    async fn run(self, emitter: Emitter<()>, releaser: QueueReleaser) -> Result<()> {
        let _ = self.0.await;
        releaser.release();
        emitter.success(());
        Ok(())
    }
}

/// Records its label when started.
struct Labeled {
    label: usize,
    priority: Priority,
    started: Arc<Mutex<Vec<usize>>>,
}

#[async_trait]
impl Operation for Labeled {
    type Output = usize;

    fn priority(&self) -> Priority {
        self.priority
    }

    async fn run(self, emitter: Emitter<usize>, releaser: QueueReleaser) -> Result<()> {
        self.started.lock().push(self.label);
        releaser.release();
        emitter.success(self.label);
        Ok(())
    }
}

/// Tracks how many operations are between start and release.
#[derive(Default)]
struct Radio {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    starts: AtomicUsize,
}

struct Exclusive(Arc<Radio>);

#[async_trait]
impl Operation for Exclusive {
    type Output = ();

    async fn run(self, emitter: Emitter<()>, releaser: QueueReleaser) -> Result<()> {
        let radio = self.0;
        let now = radio.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        radio.max_in_flight.fetch_max(now, Ordering::SeqCst);
        radio.starts.fetch_add(1, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(1)).await;

        radio.in_flight.fetch_sub(1, Ordering::SeqCst);
        releaser.release();
        // A second release must not let another operation in.
        releaser.release();
        emitter.success(());
        Ok(())
    }
}

struct Value(u32);

#[async_trait]
impl Operation for Value {
    type Output = u32;

    async fn run(self, emitter: Emitter<u32>, releaser: QueueReleaser) -> Result<()> {
        releaser.release();
        emitter.success(self.0);
        Ok(())
    }
}

struct PanicsOnStart;

#[async_trait]
impl Operation for PanicsOnStart {
    type Output = u32;

    async fn run(self, _emitter: Emitter<u32>, _releaser: QueueReleaser) -> Result<()> {
        panic!("start call blew up");
    }
}

struct FailsOnStart;

#[async_trait]
impl Operation for FailsOnStart {
    type Output = u32;

    async fn run(self, _emitter: Emitter<u32>, _releaser: QueueReleaser) -> Result<()> {
        Err(Error::Internal("status 133".to_string()))
    }
}

#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl OperationObserver for RecordingObserver {
    fn on_queued(&self, operation: &OperationInfo) {
        self.events.lock().push(format!("queued {}", operation.name));
    }

    fn on_started(&self, operation: &OperationInfo) {
        self.events.lock().push(format!("started {}", operation.name));
    }

    fn on_finished(&self, operation: &OperationInfo, _elapsed: Duration) {
        self.events.lock().push(format!("finished {}", operation.name));
    }

    fn on_removed(&self, operation: &OperationInfo) {
        self.events.lock().push(format!("removed {}", operation.name));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_at_most_one_operation_in_flight() {
    let queue = ClientOperationQueue::new(InteractionContext::current());
    let radio = Arc::new(Radio::default());

    let submitters: Vec<_> = (0..8)
        .map(|_| {
            let queue = queue.clone();
            let radio = radio.clone();
            tokio::spawn(async move {
                let handles: Vec<_> = (0..5).map(|_| queue.queue(Exclusive(radio.clone()))).collect();
                for handle in handles {
                    handle.single().await.unwrap();
                }
            })
        })
        .collect();

    for submitter in submitters {
        submitter.await.unwrap();
    }

    assert_eq!(radio.starts.load(Ordering::SeqCst), 40);
    assert_eq!(radio.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_priority_then_fifo_order() {
    let queue = ClientOperationQueue::new(InteractionContext::current());
    let started = Arc::new(Mutex::new(Vec::new()));
    let (unblock, blocked) = oneshot::channel();

    let blocker = queue.queue(Blocker(blocked));
    tokio::task::yield_now().await;

    let handles: Vec<_> = [Priority::Low, Priority::Normal, Priority::Low, Priority::Normal]
        .into_iter()
        .enumerate()
        .map(|(label, priority)| {
            queue.queue(Labeled {
                label,
                priority,
                started: started.clone(),
            })
        })
        .collect();

    let _ = unblock.send(());
    blocker.single().await.unwrap();
    for handle in handles {
        handle.single().await.unwrap();
    }

    assert_eq!(*started.lock(), vec![1, 3, 0, 2]);
}

#[tokio::test]
async fn test_strict_priority_without_aging() {
    let queue = ClientOperationQueue::new(InteractionContext::current());
    let started = Arc::new(Mutex::new(Vec::new()));
    let (unblock, blocked) = oneshot::channel();

    let blocker = queue.queue(Blocker(blocked));
    tokio::task::yield_now().await;

    let oldest = queue.queue(Labeled {
        label: 0,
        priority: Priority::Low,
        started: started.clone(),
    });
    let newer: Vec<_> = (1..=10)
        .map(|label| {
            queue.queue(Labeled {
                label,
                priority: Priority::High,
                started: started.clone(),
            })
        })
        .collect();

    let _ = unblock.send(());
    blocker.single().await.unwrap();
    for handle in newer {
        handle.single().await.unwrap();
    }
    oldest.single().await.unwrap();

    assert_eq!(*started.lock(), (1..=10).chain([0]).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_cancel_before_start() {
    let queue = ClientOperationQueue::new(InteractionContext::current());
    let started = Arc::new(Mutex::new(Vec::new()));
    let (unblock, blocked) = oneshot::channel();

    let blocker = queue.queue(Blocker(blocked));
    tokio::task::yield_now().await;

    let withdrawn = queue.queue(Labeled {
        label: 1,
        priority: Priority::Normal,
        started: started.clone(),
    });
    let kept = queue.queue(Labeled {
        label: 2,
        priority: Priority::Normal,
        started: started.clone(),
    });

    assert_eq!(queue.pending(), 2);
    withdrawn.cancel();
    assert_eq!(queue.pending(), 1);

    let _ = unblock.send(());
    blocker.single().await.unwrap();
    assert_eq!(kept.single().await.unwrap(), 2);

    assert_eq!(*started.lock(), vec![2]);
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let semaphore = Arc::new(QueueSemaphore::new());
    let releaser = QueueReleaser::new(semaphore.clone());

    let waiter = {
        let semaphore = semaphore.clone();
        tokio::spawn(async move { semaphore.await_release().await })
    };
    tokio::task::yield_now().await;

    releaser.release();
    releaser.release();
    assert!(releaser.is_released());
    assert!(!semaphore.release());

    waiter.await.unwrap();
    assert!(semaphore.is_released());
    // Already released: resolves immediately.
    semaphore.await_release().await;
}

#[tokio::test]
async fn test_terminate_drains_pending() {
    let router = DisconnectionRouter::new(ADDRESS);
    let queue = ConnectionOperationQueue::new(router, InteractionContext::current(), None);

    // The worker has not been polled yet, so nothing is in flight.
    let pending: Vec<_> = (0..3).map(|i| queue.queue(Value(i))).collect();
    assert_eq!(queue.pending(), 3);

    assert!(queue.terminate(Error::Disconnected {
        address: ADDRESS.to_string(),
        status: Some(8),
    }));
    assert_eq!(queue.pending(), 0);

    for handle in pending {
        assert!(matches!(
            handle.single().await,
            Err(Error::Disconnected { status: Some(8), .. })
        ));
    }

    let late = tokio::time::timeout(Duration::from_secs(1), queue.queue(Value(9)).single())
        .await
        .expect("queueing on a terminated connection must not hang");
    assert!(matches!(late, Err(Error::Disconnected { status: Some(8), .. })));
}

#[tokio::test]
async fn test_link_loss_reaches_every_caller() {
    let router = DisconnectionRouter::new(ADDRESS);
    let queue = ConnectionOperationQueue::new(router.clone(), InteractionContext::current(), None);
    queue.on_connection_subscribed();

    let (_unblock, blocked) = oneshot::channel();
    let in_flight = queue.queue(Blocker(blocked));
    tokio::task::yield_now().await;
    let waiting = queue.queue(Value(1));

    router.on_adapter_state_changed(false);

    assert!(matches!(in_flight.single().await, Err(Error::AdapterDisabled { .. })));
    assert!(matches!(waiting.single().await, Err(Error::AdapterDisabled { .. })));
    assert!(matches!(
        queue.queue(Value(2)).single().await,
        Err(Error::AdapterDisabled { .. })
    ));
}

#[tokio::test]
async fn test_round_trip_single_terminal_signal() {
    let queue = ClientOperationQueue::new(InteractionContext::current());
    let mut handle = queue.queue(Value(42));

    assert!(matches!(handle.next().await, Some(Ok(42))));
    assert!(handle.next().await.is_none());
    assert!(handle.next().await.is_none());
}

#[tokio::test]
async fn test_worker_survives_failing_operations() {
    let queue = ClientOperationQueue::new(InteractionContext::current());

    let panicked = queue.queue(PanicsOnStart);
    let failed = queue.queue(FailsOnStart);
    let healthy = queue.queue(Value(5));

    match panicked.single().await {
        Err(Error::OperationPanicked { operation, message }) => {
            assert_eq!(operation, "PanicsOnStart");
            assert!(message.contains("start call blew up"));
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(matches!(failed.single().await, Err(Error::Internal(_))));
    assert_eq!(healthy.single().await.unwrap(), 5);
}

#[tokio::test]
async fn test_scopes_run_independently() {
    let context = InteractionContext::current();
    let client = ClientOperationQueue::new(context.clone());
    let connection =
        ConnectionOperationQueue::new(DisconnectionRouter::new(ADDRESS), context, None);

    let (unblock, blocked) = oneshot::channel();
    let busy = client.queue(Blocker(blocked));
    tokio::task::yield_now().await;

    assert_eq!(connection.queue(Value(3)).single().await.unwrap(), 3);

    let _ = unblock.send(());
    busy.single().await.unwrap();
}

#[tokio::test]
async fn test_observer_receives_lifecycle() {
    let observer = Arc::new(RecordingObserver::default());
    let queue = ClientOperationQueue::with_observer(InteractionContext::current(), observer.clone());
    let (unblock, blocked) = oneshot::channel();

    let blocker = queue.queue(Blocker(blocked));
    tokio::task::yield_now().await;
    queue.queue(Value(1)).cancel();
    let value = queue.queue(Value(2));

    let _ = unblock.send(());
    blocker.single().await.unwrap();
    assert_eq!(value.single().await.unwrap(), 2);

    // The worker reports completion after the caller sees the value.
    let expected = vec![
        "queued Blocker",
        "started Blocker",
        "queued Value",
        "removed Value",
        "queued Value",
        "finished Blocker",
        "started Value",
        "finished Value",
    ];
    for _ in 0..100 {
        if observer.events.lock().len() == expected.len() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(*observer.events.lock(), expected);
}
