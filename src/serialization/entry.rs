//! Type-erased queue entries.

use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::error;

use crate::error::Error;
use crate::observer::OperationInfo;
use crate::operation::{Emitter, Operation, Priority, ResultSink};
use crate::serialization::{InteractionContext, QueueReleaser};

/// Position of an entry in the queue: priority first, then sequence.
///
/// Sequence numbers are unique per queue, so two keys compare equal only
/// when they belong to the same entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct EntryKey {
    pub(crate) priority: Priority,
    pub(crate) sequence: u64,
}

type StartFn = Box<dyn FnOnce(QueueReleaser) -> BoxFuture<'static, ()> + Send>;

/// An operation waiting in a queue, with its result channel.
pub(crate) struct FifoRunnableEntry {
    info: OperationInfo,
    sink: Arc<dyn ResultSink>,
    start: StartFn,
}

impl FifoRunnableEntry {
    pub(crate) fn new<O: Operation>(sequence: u64, operation: O, emitter: Emitter<O::Output>) -> Self {
        let info = OperationInfo {
            name: operation.name(),
            sequence,
            priority: operation.priority(),
            queued_at: Utc::now(),
        };
        let sink: Arc<dyn ResultSink> = Arc::new(emitter.clone());
        let start: StartFn = Box::new(move |releaser| run_guarded(operation, emitter, releaser).boxed());

        Self { info, sink, start }
    }

    pub(crate) fn key(&self) -> EntryKey {
        EntryKey {
            priority: self.info.priority,
            sequence: self.info.sequence,
        }
    }

    pub(crate) fn info(&self) -> &OperationInfo {
        &self.info
    }

    /// Whether the caller already withdrew interest.
    pub(crate) fn is_disposed(&self) -> bool {
        self.sink.is_disposed()
    }

    /// Start the operation on `context`. Returns the sink used to fail it
    /// if the queue terminates while it is running.
    pub(crate) fn run(self, releaser: QueueReleaser, context: &InteractionContext) -> Arc<dyn ResultSink> {
        context.spawn((self.start)(releaser));
        self.sink
    }

    /// Resolve the entry with `error` without running it.
    pub(crate) fn fail(self, error: Error) -> bool {
        self.sink.try_error(error)
    }
}

impl std::fmt::Debug for FifoRunnableEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FifoRunnableEntry")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Run an operation, turning errors and panics into its terminal error.
async fn run_guarded<O: Operation>(operation: O, emitter: Emitter<O::Output>, releaser: QueueReleaser) {
    let name = operation.name();
    let outcome = AssertUnwindSafe(operation.run(emitter.clone(), releaser.clone()))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!("Operation {} failed: {}", name, e);
            releaser.release();
            emitter.error(e);
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!("Operation {} panicked: {}", name, message);
            releaser.release();
            emitter.error(Error::OperationPanicked {
                operation: name.into_owned(),
                message,
            });
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
