//! Queueable Bluetooth operations.
//!
//! Most hardware calls follow one shape: start a call, then wait for exactly
//! one answer. [`SingleResponseOperation`] implements that shape once,
//! including the timeout and the release of the queue on every path. The
//! functions in this module build it for the btleplug calls.

use async_trait::async_trait;
use btleplug::api::{
    Central, CharPropFlags, Characteristic, Descriptor, Peripheral, ScanFilter, Service, WriteType,
};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::borrow::Cow;
use std::future::Future;
use std::ops::Range;
use tracing::{debug, trace, warn};

use crate::config::{ConnectionSetup, TimeoutConfiguration};
use crate::error::{Error, OperationType, Result};
use crate::operation::{Emitter, Operation, Priority, QueueReleasingEmitter};
use crate::serialization::QueueReleaser;

/// Address used in errors of adapter-level operations.
const ADAPTER_ADDRESS: &str = "adapter";

type StartFn<T> = Box<dyn FnOnce() -> Result<BoxFuture<'static, Result<T>>> + Send>;
type FallbackFn<T> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T>> + Send>;
type BatchWriteFn = Box<dyn FnMut(Bytes) -> BoxFuture<'static, Result<()>> + Send>;
type LongWriteStartFn = Box<dyn FnOnce() -> Result<BatchWriteFn> + Send>;

/// An operation that starts one hardware call and waits for its single
/// answer.
///
/// The start closure runs when the queue hands the radio to this operation.
/// Returning an error from it means the call could not be started. The
/// returned future is raced against the timeout and against the caller
/// dropping the result handle.
pub struct SingleResponseOperation<T> {
    operation_type: OperationType,
    address: String,
    priority: Priority,
    timeout: TimeoutConfiguration,
    start: StartFn<T>,
    timeout_fallback: Option<FallbackFn<T>>,
}

impl<T: Send + 'static> SingleResponseOperation<T> {
    /// Create an operation from its start closure.
    pub fn new<F, Fut>(
        operation_type: OperationType,
        address: impl Into<String>,
        timeout: TimeoutConfiguration,
        start: F,
    ) -> Self
    where
        F: FnOnce() -> Result<Fut> + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            operation_type,
            address: address.into(),
            priority: Priority::Normal,
            timeout,
            start: Box::new(move || start().map(FutureExt::boxed)),
            timeout_fallback: None,
        }
    }

    /// Set the scheduling class.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Replace the default [`Error::Timeout`] with the result of `fallback`.
    pub fn with_timeout_fallback<F, Fut>(mut self, fallback: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.timeout_fallback = Some(Box::new(move || fallback().boxed()));
        self
    }

    /// The kind of hardware call this operation makes.
    pub fn operation_type(&self) -> OperationType {
        self.operation_type
    }
}

#[async_trait]
impl<T: Send + 'static> Operation for SingleResponseOperation<T> {
    type Output = T;

    fn priority(&self) -> Priority {
        self.priority
    }

    fn name(&self) -> Cow<'static, str> {
        Cow::Owned(self.operation_type.to_string())
    }

    async fn run(self, emitter: Emitter<T>, releaser: QueueReleaser) -> Result<()> {
        let emitter = QueueReleasingEmitter::new(emitter, releaser);
        let operation_type = self.operation_type;

        let response = match (self.start)() {
            Ok(response) => response,
            Err(e) => {
                warn!("{} on {} could not start: {}", operation_type, self.address, e);
                emitter.error(e);
                return Ok(());
            }
        };

        let outcome = tokio::select! {
            result = tokio::time::timeout(self.timeout.timeout, response) => Some(result),
            _ = emitter.disposed() => None,
        };

        let result = match outcome {
            Some(Ok(result)) => result,
            Some(Err(_)) => {
                debug!("{} on {} timed out", operation_type, self.address);
                match self.timeout_fallback {
                    Some(fallback) => fallback().await,
                    None => Err(Error::Timeout {
                        operation: operation_type,
                        address: self.address,
                    }),
                }
            }
            None => {
                debug!("{} on {} cancelled by caller", operation_type, self.address);
                emitter.release();
                return Ok(());
            }
        };

        match result {
            Ok(value) => emitter.success(value),
            Err(e) => emitter.error(e),
        };

        Ok(())
    }
}

/// A write split into batches that are all sent while holding the queue.
///
/// No other operation of the scope starts between two batches. Each batch
/// gets the full timeout window. The first failing batch ends the
/// operation; on success the whole payload is emitted.
pub struct LongWriteOperation {
    address: String,
    priority: Priority,
    timeout: TimeoutConfiguration,
    data: Bytes,
    batch_size: usize,
    start: LongWriteStartFn,
}

impl LongWriteOperation {
    /// Create a long write.
    ///
    /// `start` runs when the queue hands over the radio and returns the
    /// function that writes one batch.
    pub fn new<S, W, Fut>(
        address: impl Into<String>,
        data: Bytes,
        batch_size: usize,
        timeout: TimeoutConfiguration,
        start: S,
    ) -> Self
    where
        S: FnOnce() -> Result<W> + Send + 'static,
        W: FnMut(Bytes) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            address: address.into(),
            priority: Priority::Normal,
            timeout,
            data,
            batch_size,
            start: Box::new(move || -> Result<BatchWriteFn> {
                let mut write_batch = start()?;
                Ok(Box::new(move |batch: Bytes| write_batch(batch).boxed()))
            }),
        }
    }

    /// Set the scheduling class.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Byte ranges of the batches of a `len` byte payload.
///
/// An empty payload is still written once.
fn batch_ranges(len: usize, batch_size: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return vec![0..0];
    }
    (0..len)
        .step_by(batch_size)
        .map(|start| start..(start + batch_size).min(len))
        .collect()
}

#[async_trait]
impl Operation for LongWriteOperation {
    type Output = Bytes;

    fn priority(&self) -> Priority {
        self.priority
    }

    fn name(&self) -> Cow<'static, str> {
        Cow::Owned(OperationType::CharacteristicLongWrite.to_string())
    }

    async fn run(self, emitter: Emitter<Bytes>, releaser: QueueReleaser) -> Result<()> {
        let emitter = QueueReleasingEmitter::new(emitter, releaser);
        let operation = OperationType::CharacteristicLongWrite;

        if self.batch_size == 0 {
            emitter.error(Error::CannotStart {
                operation,
                address: self.address,
                reason: "batch size must be greater than zero".to_string(),
            });
            return Ok(());
        }

        let mut write_batch = match (self.start)() {
            Ok(write_batch) => write_batch,
            Err(e) => {
                warn!("{} on {} could not start: {}", operation, self.address, e);
                emitter.error(e);
                return Ok(());
            }
        };

        let batches = batch_ranges(self.data.len(), self.batch_size);
        let count = batches.len();

        for (index, range) in batches.into_iter().enumerate() {
            let batch = self.data.slice(range);
            trace!("Writing batch #{:04} of {} to {}: {:02X?}", index, count, self.address, &batch[..]);

            let outcome = tokio::select! {
                result = tokio::time::timeout(self.timeout.timeout, write_batch(batch)) => Some(result),
                _ = emitter.disposed() => None,
            };

            match outcome {
                Some(Ok(Ok(()))) => {}
                Some(Ok(Err(e))) => {
                    debug!("{} on {} failed at batch #{:04}: {}", operation, self.address, index, e);
                    emitter.error(e);
                    return Ok(());
                }
                Some(Err(_)) => {
                    debug!("{} on {} timed out at batch #{:04}", operation, self.address, index);
                    emitter.error(Error::Timeout {
                        operation,
                        address: self.address,
                    });
                    return Ok(());
                }
                None => {
                    debug!("{} on {} cancelled by caller", operation, self.address);
                    emitter.release();
                    return Ok(());
                }
            }
        }

        emitter.success(self.data);
        Ok(())
    }
}

/// What to do when a characteristic lacks the property an operation needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IllegalOperationCheck {
    /// Fail the operation with [`Error::IllegalOperation`].
    #[default]
    Enforce,
    /// Log a warning and try anyway.
    Warn,
}

impl From<&ConnectionSetup> for IllegalOperationCheck {
    fn from(setup: &ConnectionSetup) -> Self {
        if setup.suppress_illegal_operation_check {
            Self::Warn
        } else {
            Self::Enforce
        }
    }
}

impl IllegalOperationCheck {
    /// Check that `characteristic` has any of the `required` properties.
    pub fn verify(
        self,
        characteristic: &Characteristic,
        required: CharPropFlags,
        operation: OperationType,
    ) -> Result<()> {
        if characteristic.properties.intersects(required) {
            return Ok(());
        }

        let error = Error::IllegalOperation {
            uuid: characteristic.uuid,
            operation,
            properties: format!("{:?}", characteristic.properties),
        };

        match self {
            Self::Enforce => Err(error),
            Self::Warn => {
                warn!("{}", error);
                Ok(())
            }
        }
    }
}

/// Connect to a peripheral.
pub fn connect<P>(peripheral: P, timeout: TimeoutConfiguration) -> SingleResponseOperation<()>
where
    P: Peripheral + 'static,
{
    let address = peripheral.address().to_string();
    SingleResponseOperation::new(OperationType::ConnectionState, address, timeout, move || {
        Ok(async move { peripheral.connect().await.map_err(Error::from) })
    })
}

/// Disconnect from a peripheral.
pub fn disconnect<P>(peripheral: P, timeout: TimeoutConfiguration) -> SingleResponseOperation<()>
where
    P: Peripheral + 'static,
{
    let address = peripheral.address().to_string();
    SingleResponseOperation::new(OperationType::ConnectionState, address, timeout, move || {
        Ok(async move { peripheral.disconnect().await.map_err(Error::from) })
    })
}

/// Discover the services of a connected peripheral.
pub fn discover_services<P>(
    peripheral: P,
    timeout: TimeoutConfiguration,
) -> SingleResponseOperation<Vec<Service>>
where
    P: Peripheral + 'static,
{
    let address = peripheral.address().to_string();
    SingleResponseOperation::new(OperationType::ServiceDiscovery, address, timeout, move || {
        Ok(async move {
            peripheral.discover_services().await?;
            Ok::<_, Error>(peripheral.services().into_iter().collect())
        })
    })
}

/// Read a characteristic value.
pub fn read_characteristic<P>(
    peripheral: P,
    characteristic: Characteristic,
    check: IllegalOperationCheck,
    timeout: TimeoutConfiguration,
) -> SingleResponseOperation<Vec<u8>>
where
    P: Peripheral + 'static,
{
    let address = peripheral.address().to_string();
    let operation = OperationType::CharacteristicRead;
    SingleResponseOperation::new(operation, address, timeout, move || {
        check.verify(&characteristic, CharPropFlags::READ, operation)?;
        Ok(async move { peripheral.read(&characteristic).await.map_err(Error::from) })
    })
}

/// Write a characteristic value.
pub fn write_characteristic<P>(
    peripheral: P,
    characteristic: Characteristic,
    data: Bytes,
    write_type: WriteType,
    check: IllegalOperationCheck,
    timeout: TimeoutConfiguration,
) -> SingleResponseOperation<()>
where
    P: Peripheral + 'static,
{
    let address = peripheral.address().to_string();
    let operation = OperationType::CharacteristicWrite;
    let required = match write_type {
        WriteType::WithResponse => CharPropFlags::WRITE,
        WriteType::WithoutResponse => CharPropFlags::WRITE_WITHOUT_RESPONSE,
    };
    SingleResponseOperation::new(operation, address, timeout, move || {
        check.verify(&characteristic, required, operation)?;
        Ok(async move {
            peripheral
                .write(&characteristic, &data, write_type)
                .await
                .map_err(Error::from)
        })
    })
}

/// Write a payload larger than one packet in `batch_size` byte batches.
///
/// Batches use a write with response when the characteristic supports it.
pub fn long_write_characteristic<P>(
    peripheral: P,
    characteristic: Characteristic,
    data: Bytes,
    batch_size: usize,
    check: IllegalOperationCheck,
    timeout: TimeoutConfiguration,
) -> LongWriteOperation
where
    P: Peripheral + 'static,
{
    let address = peripheral.address().to_string();
    let write_type = if characteristic.properties.contains(CharPropFlags::WRITE) {
        WriteType::WithResponse
    } else {
        WriteType::WithoutResponse
    };
    LongWriteOperation::new(address, data, batch_size, timeout, move || {
        check.verify(
            &characteristic,
            CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE,
            OperationType::CharacteristicLongWrite,
        )?;
        Ok(move |batch: Bytes| {
            let peripheral = peripheral.clone();
            let characteristic = characteristic.clone();
            async move {
                peripheral
                    .write(&characteristic, &batch, write_type)
                    .await
                    .map_err(Error::from)
            }
        })
    })
}

/// Read a descriptor value.
pub fn read_descriptor<P>(
    peripheral: P,
    descriptor: Descriptor,
    timeout: TimeoutConfiguration,
) -> SingleResponseOperation<Vec<u8>>
where
    P: Peripheral + 'static,
{
    let address = peripheral.address().to_string();
    SingleResponseOperation::new(OperationType::DescriptorRead, address, timeout, move || {
        Ok(async move { peripheral.read_descriptor(&descriptor).await.map_err(Error::from) })
    })
}

/// Write a descriptor value.
pub fn write_descriptor<P>(
    peripheral: P,
    descriptor: Descriptor,
    data: Bytes,
    timeout: TimeoutConfiguration,
) -> SingleResponseOperation<()>
where
    P: Peripheral + 'static,
{
    let address = peripheral.address().to_string();
    SingleResponseOperation::new(OperationType::DescriptorWrite, address, timeout, move || {
        Ok(async move {
            peripheral
                .write_descriptor(&descriptor, &data)
                .await
                .map_err(Error::from)
        })
    })
}

/// Enable notifications or indications of a characteristic.
pub fn enable_notifications<P>(
    peripheral: P,
    characteristic: Characteristic,
    check: IllegalOperationCheck,
    timeout: TimeoutConfiguration,
) -> SingleResponseOperation<()>
where
    P: Peripheral + 'static,
{
    let address = peripheral.address().to_string();
    let operation = OperationType::NotificationSetup;
    SingleResponseOperation::new(operation, address, timeout, move || {
        check.verify(
            &characteristic,
            CharPropFlags::NOTIFY | CharPropFlags::INDICATE,
            operation,
        )?;
        Ok(async move { peripheral.subscribe(&characteristic).await.map_err(Error::from) })
    })
}

/// Disable notifications or indications of a characteristic.
pub fn disable_notifications<P>(
    peripheral: P,
    characteristic: Characteristic,
    timeout: TimeoutConfiguration,
) -> SingleResponseOperation<()>
where
    P: Peripheral + 'static,
{
    let address = peripheral.address().to_string();
    SingleResponseOperation::new(OperationType::NotificationSetup, address, timeout, move || {
        Ok(async move { peripheral.unsubscribe(&characteristic).await.map_err(Error::from) })
    })
}

/// Start scanning on an adapter.
pub fn start_scan<C>(
    central: C,
    filter: ScanFilter,
    timeout: TimeoutConfiguration,
) -> SingleResponseOperation<()>
where
    C: Central + 'static,
{
    SingleResponseOperation::new(OperationType::ScanStart, ADAPTER_ADDRESS, timeout, move || {
        Ok(async move { central.start_scan(filter).await.map_err(Error::from) })
    })
}

/// Stop scanning on an adapter.
pub fn stop_scan<C>(central: C, timeout: TimeoutConfiguration) -> SingleResponseOperation<()>
where
    C: Central + 'static,
{
    SingleResponseOperation::new(OperationType::ScanStop, ADAPTER_ADDRESS, timeout, move || {
        Ok(async move { central.stop_scan().await.map_err(Error::from) })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::disconnection::DisconnectionRouter;
    use crate::serialization::{ClientOperationQueue, ConnectionOperationQueue, InteractionContext};
    use parking_lot::Mutex;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

    fn characteristic(properties: CharPropFlags) -> Characteristic {
        Characteristic {
            uuid: Uuid::new_v4(),
            service_uuid: Uuid::new_v4(),
            properties,
            descriptors: BTreeSet::new(),
        }
    }

    fn timeout(secs: u64) -> TimeoutConfiguration {
        TimeoutConfiguration::new(Duration::from_secs(secs))
    }

    #[test]
    fn test_illegal_operation_enforced() {
        let notify_only = characteristic(CharPropFlags::NOTIFY);

        let result = IllegalOperationCheck::Enforce.verify(
            &notify_only,
            CharPropFlags::READ,
            OperationType::CharacteristicRead,
        );

        match result {
            Err(Error::IllegalOperation { uuid, operation, .. }) => {
                assert_eq!(uuid, notify_only.uuid);
                assert_eq!(operation, OperationType::CharacteristicRead);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_illegal_operation_warn_only() {
        let notify_only = characteristic(CharPropFlags::NOTIFY);

        assert!(IllegalOperationCheck::Warn
            .verify(&notify_only, CharPropFlags::READ, OperationType::CharacteristicRead)
            .is_ok());
    }

    #[test]
    fn test_indicate_satisfies_notification_setup() {
        let indicate = characteristic(CharPropFlags::INDICATE);

        assert!(IllegalOperationCheck::Enforce
            .verify(
                &indicate,
                CharPropFlags::NOTIFY | CharPropFlags::INDICATE,
                OperationType::NotificationSetup
            )
            .is_ok());
    }

    #[test]
    fn test_check_from_setup() {
        let setup = ConnectionSetup::default();
        assert_eq!(IllegalOperationCheck::from(&setup), IllegalOperationCheck::Enforce);

        let setup = setup.with_suppressed_illegal_operation_check(true);
        assert_eq!(IllegalOperationCheck::from(&setup), IllegalOperationCheck::Warn);
    }

    #[tokio::test]
    async fn test_single_response_success() {
        let queue = ClientOperationQueue::new(InteractionContext::current());
        let operation = SingleResponseOperation::new(
            OperationType::CharacteristicRead,
            ADDRESS,
            timeout(5),
            || Ok(async { Ok(vec![0x01, 0x02]) }),
        );

        assert_eq!(operation.name(), "CHARACTERISTIC_READ");
        assert_eq!(queue.queue(operation).single().await.unwrap(), vec![0x01, 0x02]);
    }

    #[tokio::test]
    async fn test_start_failure_does_not_block_queue() {
        let queue = ClientOperationQueue::new(InteractionContext::current());
        let failing = SingleResponseOperation::<()>::new(
            OperationType::CharacteristicWrite,
            ADDRESS,
            timeout(5),
            || -> Result<futures::future::Ready<Result<()>>> {
                Err(Error::CannotStart {
                    operation: OperationType::CharacteristicWrite,
                    address: ADDRESS.to_string(),
                    reason: "gatt busy".to_string(),
                })
            },
        );
        let following = SingleResponseOperation::new(
            OperationType::CharacteristicRead,
            ADDRESS,
            timeout(5),
            || Ok(async { Ok(7u8) }),
        );

        let failing = queue.queue(failing);
        let following = queue.queue(following);

        assert!(matches!(failing.single().await, Err(Error::CannotStart { .. })));
        assert_eq!(following.single().await.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_queue() {
        let queue = ClientOperationQueue::new(InteractionContext::current());
        let silent = SingleResponseOperation::<u8>::new(
            OperationType::DescriptorRead,
            ADDRESS,
            timeout(30),
            || Ok(futures::future::pending()),
        );
        let following = SingleResponseOperation::new(
            OperationType::DescriptorRead,
            ADDRESS,
            timeout(30),
            || Ok(async { Ok(1u8) }),
        );

        let silent = queue.queue(silent);
        let following = queue.queue(following);

        match silent.single().await {
            Err(Error::Timeout { operation, address }) => {
                assert_eq!(operation, OperationType::DescriptorRead);
                assert_eq!(address, ADDRESS);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(following.single().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fallback() {
        let queue = ClientOperationQueue::new(InteractionContext::current());
        let operation = SingleResponseOperation::<Vec<u8>>::new(
            OperationType::ServiceDiscovery,
            ADDRESS,
            timeout(10),
            || Ok(futures::future::pending()),
        )
        .with_timeout_fallback(|| async { Ok(Vec::new()) });

        assert_eq!(queue.queue(operation).single().await.unwrap(), Vec::<u8>::new());
    }

    #[tokio::test]
    async fn test_cancel_running_operation_releases_queue() {
        let queue = ClientOperationQueue::new(InteractionContext::current());
        let started = Arc::new(AtomicBool::new(false));
        let flag = started.clone();

        let hanging = SingleResponseOperation::<()>::new(
            OperationType::ConnectionState,
            ADDRESS,
            timeout(3600),
            move || {
                flag.store(true, Ordering::SeqCst);
                Ok(futures::future::pending())
            },
        )
        .with_priority(Priority::High);
        let following = SingleResponseOperation::new(
            OperationType::CharacteristicRead,
            ADDRESS,
            timeout(5),
            || Ok(async { Ok("after") }),
        );

        let hanging = queue.queue(hanging);
        let following = queue.queue(following);

        while !started.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        hanging.cancel();

        assert_eq!(following.single().await.unwrap(), "after");
    }

    #[test]
    fn test_batch_ranges() {
        assert_eq!(batch_ranges(5, 2), vec![0..2, 2..4, 4..5]);
        assert_eq!(batch_ranges(4, 2), vec![0..2, 2..4]);
        assert_eq!(batch_ranges(3, 20), vec![0..3]);
        assert_eq!(batch_ranges(0, 20), vec![0..0]);
    }

    /// A long write whose batches land in `log`.
    fn logged_long_write(
        data: &'static [u8],
        batch_size: usize,
        log: Arc<Mutex<Vec<String>>>,
    ) -> LongWriteOperation {
        LongWriteOperation::new(
            ADDRESS,
            Bytes::from_static(data),
            batch_size,
            timeout(5),
            move || {
                Ok(move |batch: Bytes| {
                    let log = log.clone();
                    async move {
                        tokio::task::yield_now().await;
                        log.lock().push(format!("batch {:?}", &batch[..]));
                        Ok(())
                    }
                })
            },
        )
    }

    #[tokio::test]
    async fn test_long_write_holds_queue_between_batches() {
        let router = DisconnectionRouter::new(ADDRESS);
        let queue = ConnectionOperationQueue::new(router, InteractionContext::current(), None);
        let log = Arc::new(Mutex::new(Vec::new()));

        let long_write = queue.queue(logged_long_write(&[1, 2, 3, 4, 5], 2, log.clone()));
        let other_log = log.clone();
        let other = queue.queue(SingleResponseOperation::new(
            OperationType::CharacteristicRead,
            ADDRESS,
            timeout(5),
            move || {
                other_log.lock().push("read".to_string());
                Ok(async { Ok(()) })
            },
        ));

        assert_eq!(
            long_write.single().await.unwrap(),
            Bytes::from_static(&[1, 2, 3, 4, 5])
        );
        other.single().await.unwrap();

        assert_eq!(
            *log.lock(),
            vec!["batch [1, 2]", "batch [3, 4]", "batch [5]", "read"]
        );
    }

    #[tokio::test]
    async fn test_long_write_stops_at_first_failed_batch() {
        let queue = ClientOperationQueue::new(InteractionContext::current());
        let written = Arc::new(Mutex::new(Vec::new()));
        let log = written.clone();

        let failing = LongWriteOperation::new(
            ADDRESS,
            Bytes::from_static(&[1, 2, 3, 4, 5, 6]),
            2,
            timeout(5),
            move || {
                Ok(move |batch: Bytes| {
                    let log = log.clone();
                    async move {
                        if batch[..] == [3, 4] {
                            return Err(Error::Internal("write rejected".to_string()));
                        }
                        log.lock().push(batch);
                        Ok(())
                    }
                })
            },
        );
        let following = SingleResponseOperation::new(
            OperationType::CharacteristicRead,
            ADDRESS,
            timeout(5),
            || Ok(async { Ok(9u8) }),
        );

        let failing = queue.queue(failing);
        let following = queue.queue(following);

        assert!(matches!(failing.single().await, Err(Error::Internal(_))));
        assert_eq!(following.single().await.unwrap(), 9);
        assert_eq!(*written.lock(), vec![Bytes::from_static(&[1, 2])]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_write_batch_timeout() {
        let queue = ClientOperationQueue::new(InteractionContext::current());
        let operation = LongWriteOperation::new(
            ADDRESS,
            Bytes::from_static(&[1, 2, 3]),
            1,
            timeout(10),
            || Ok(|_batch: Bytes| futures::future::pending::<Result<()>>()),
        );

        match queue.queue(operation).single().await {
            Err(Error::Timeout { operation, .. }) => {
                assert_eq!(operation, OperationType::CharacteristicLongWrite);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_long_write_rejects_zero_batch_size() {
        let queue = ClientOperationQueue::new(InteractionContext::current());
        let log = Arc::new(Mutex::new(Vec::new()));

        let result = queue
            .queue(logged_long_write(&[1, 2], 0, log.clone()))
            .single()
            .await;

        assert!(matches!(result, Err(Error::CannotStart { .. })));
        assert!(log.lock().is_empty());
    }
}
