//! The operation contract and the channel that carries its results.
//!
//! An [`Operation`] is a unit of work that needs exclusive access to the
//! Bluetooth radio. When a queue runs it, the operation receives an
//! [`Emitter`] for its results and a [`QueueReleaser`] that it must release
//! once the hardware is ready for the next operation. The caller holds the
//! matching [`OperationHandle`], which is a [`Stream`] of results.

use async_trait::async_trait;
use futures::Stream;
use parking_lot::Mutex;
use std::borrow::Cow;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, Notify};

use crate::error::{Error, Result};
use crate::serialization::QueueReleaser;

/// Scheduling class of an operation. Lower values are executed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Priority {
    /// Executed before anything else in the queue.
    High = 0,
    /// The default class.
    #[default]
    Normal = 1,
    /// Executed only when nothing of a higher class is waiting.
    Low = 2,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "High"),
            Self::Normal => write!(f, "Normal"),
            Self::Low => write!(f, "Low"),
        }
    }
}

/// A unit of work executed exclusively on a queue.
///
/// Implementations must call [`QueueReleaser::release`] exactly once on every
/// path: success, hardware error, timeout, or after noticing that the caller
/// disposed the result handle. [`QueueReleasingEmitter`] does this
/// automatically on terminal signals.
///
/// Returning an error from `run` (or panicking) is converted into a terminal
/// error for this operation and releases the queue.
#[async_trait]
pub trait Operation: Send + 'static {
    /// The type of values the operation emits.
    type Output: Send + 'static;

    /// The scheduling class of this operation.
    fn priority(&self) -> Priority {
        Priority::Normal
    }

    /// A human readable name used in logs and observer events.
    fn name(&self) -> Cow<'static, str> {
        let full = std::any::type_name::<Self>();
        let base = full.split('<').next().unwrap_or(full);
        Cow::Borrowed(base.rsplit("::").next().unwrap_or(base))
    }

    /// Perform the operation.
    async fn run(self, emitter: Emitter<Self::Output>, releaser: QueueReleaser) -> Result<()>;
}

/// Disposal flag shared between an emitter and its handle.
#[derive(Debug, Default)]
struct Disposal {
    disposed: AtomicBool,
    notify: Notify,
}

impl Disposal {
    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_disposed() {
                return;
            }
            notified.await;
        }
    }
}

/// Create a connected emitter/handle pair.
pub(crate) fn operation_channel<T>() -> (Emitter<T>, OperationHandle<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let disposal = Arc::new(Disposal::default());

    let emitter = Emitter {
        tx: Arc::new(Mutex::new(Some(tx))),
        disposal: disposal.clone(),
    };
    let handle = OperationHandle {
        rx,
        disposal,
        on_dispose: None,
    };

    (emitter, handle)
}

/// The producing side of an operation's result channel.
///
/// At most one terminal signal (`complete` or `error`) is ever delivered.
/// Calls after the terminal signal are ignored.
pub struct Emitter<T> {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<Result<T>>>>>,
    disposal: Arc<Disposal>,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            disposal: self.disposal.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("terminated", &self.is_terminated())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl<T> Emitter<T> {
    /// Emit an intermediate value. Returns `false` if the value was dropped.
    pub fn next(&self, value: T) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(Ok(value)).is_ok(),
            None => false,
        }
    }

    /// Signal successful completion. Returns `false` if already terminated.
    pub fn complete(&self) -> bool {
        self.tx.lock().take().is_some()
    }

    /// Signal failure. Returns `false` if already terminated.
    pub fn error(&self, error: Error) -> bool {
        match self.tx.lock().take() {
            Some(tx) => {
                let _ = tx.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Emit a single value followed by completion.
    pub fn success(&self, value: T) -> bool {
        let mut tx = self.tx.lock();
        match tx.take() {
            Some(sender) => {
                let _ = sender.send(Ok(value));
                true
            }
            None => false,
        }
    }

    /// Whether a terminal signal was already delivered.
    pub fn is_terminated(&self) -> bool {
        self.tx.lock().is_none()
    }

    /// Whether the caller withdrew interest in the result.
    pub fn is_disposed(&self) -> bool {
        self.disposal.is_disposed()
    }

    /// Resolves once the caller withdraws interest in the result.
    pub async fn disposed(&self) {
        self.disposal.wait().await
    }
}

/// Type-erased view of an emitter used by the queue machinery.
pub(crate) trait ResultSink: Send + Sync {
    /// Deliver a terminal error if nothing terminal was delivered yet.
    fn try_error(&self, error: Error) -> bool;

    /// Whether the caller withdrew interest.
    fn is_disposed(&self) -> bool;
}

impl<T: Send> ResultSink for Emitter<T> {
    fn try_error(&self, error: Error) -> bool {
        self.error(error)
    }

    fn is_disposed(&self) -> bool {
        Emitter::is_disposed(self)
    }
}

/// An emitter that releases the queue when it delivers a terminal signal.
#[derive(Debug)]
pub struct QueueReleasingEmitter<T> {
    emitter: Emitter<T>,
    releaser: QueueReleaser,
}

impl<T> QueueReleasingEmitter<T> {
    /// Wrap an emitter and the queue releaser it belongs to.
    pub fn new(emitter: Emitter<T>, releaser: QueueReleaser) -> Self {
        Self { emitter, releaser }
    }

    /// Emit an intermediate value.
    pub fn next(&self, value: T) -> bool {
        self.emitter.next(value)
    }

    /// Release the queue, then signal completion.
    pub fn complete(&self) -> bool {
        self.releaser.release();
        self.emitter.complete()
    }

    /// Release the queue, then signal failure.
    pub fn error(&self, error: Error) -> bool {
        self.releaser.release();
        self.emitter.error(error)
    }

    /// Release the queue, then emit a single value followed by completion.
    pub fn success(&self, value: T) -> bool {
        self.releaser.release();
        self.emitter.success(value)
    }

    /// Release the queue without emitting anything.
    pub fn release(&self) {
        self.releaser.release();
    }

    /// Whether the caller withdrew interest in the result.
    pub fn is_disposed(&self) -> bool {
        self.emitter.is_disposed()
    }

    /// Resolves once the caller withdraws interest in the result.
    pub async fn disposed(&self) {
        self.emitter.disposed().await
    }
}

/// The caller's side of a queued operation.
///
/// Yields every emitted value, then ends. An `Err` item is always the last
/// one. Dropping the handle withdraws interest: an operation still waiting in
/// the queue is removed, a running one observes [`Emitter::is_disposed`].
pub struct OperationHandle<T> {
    rx: mpsc::UnboundedReceiver<Result<T>>,
    disposal: Arc<Disposal>,
    on_dispose: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl<T> OperationHandle<T> {
    /// A handle that immediately fails with `error`.
    pub(crate) fn failed(error: Error) -> Self {
        let (emitter, handle) = operation_channel();
        emitter.error(error);
        handle
    }

    /// Register the action run when the caller withdraws interest.
    pub(crate) fn set_on_dispose(&mut self, on_dispose: impl FnOnce() + Send + Sync + 'static) {
        self.on_dispose = Some(Box::new(on_dispose));
    }

    /// Wait for the first value of a single-response operation.
    pub async fn single(mut self) -> Result<T> {
        match self.rx.recv().await {
            Some(result) => result,
            None => Err(Error::Internal(
                "operation completed without emitting a value".to_string(),
            )),
        }
    }

    /// Collect every value until completion.
    pub async fn collect_values(mut self) -> Result<Vec<T>> {
        let mut values = Vec::new();
        while let Some(result) = self.rx.recv().await {
            values.push(result?);
        }
        Ok(values)
    }

    /// Withdraw interest in the result.
    pub fn cancel(self) {
        drop(self);
    }
}

impl<T> Stream for OperationHandle<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl<T> Drop for OperationHandle<T> {
    fn drop(&mut self) {
        self.disposal.dispose();
        if let Some(f) = self.on_dispose.take() {
            f();
        }
    }
}

impl<T> std::fmt::Debug for OperationHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationHandle").finish_non_exhaustive()
    }
}
