//! Per-connection bounded message queue and its delivery loop.
//!
//! Each connection owns exactly one [`Mailbox`]. Producers append with
//! [`Mailbox::enqueue`], which never blocks: when the queue is full the
//! oldest queued message is evicted to make room. A single delivery task
//! started by [`spawn_delivery`] drains the queue head-first and writes each
//! message to the connection's [`Transport`], so messages reach the client
//! in enqueue order.
//!
//! The delivery loop exits when it is cancelled through its shutdown signal
//! or when a transport write fails. In both cases it closes the transport
//! exactly once before returning. A failed write is also reported on the
//! failure channel so the registry can tear the connection down.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::BoxFuture;
use serde::Serialize;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{ConnectionId, Message};
use crate::error::TransportError;

/// Write side of a client connection.
///
/// Implemented by the WebSocket layer; tests substitute an in-memory
/// transport. A transport is exclusively owned by one delivery loop.
pub trait Transport: Send + 'static {
    /// Writes one text frame to the client.
    fn send_text(&mut self, text: String) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Closes the transport. Called at most once, when delivery stops.
    fn close(&mut self) -> BoxFuture<'_, ()>;
}

/// Result of a single [`Mailbox::enqueue`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Appended without loss.
    Queued,
    /// Appended after evicting the oldest queued message.
    QueuedWithEviction,
    /// The delivery loop has stopped; the message was discarded.
    Closed,
}

/// Point-in-time counters of one mailbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MailboxStats {
    /// Maximum number of queued messages.
    pub capacity: usize,
    /// Messages currently waiting for delivery.
    pub queued: usize,
    /// Messages accepted by `enqueue`.
    pub enqueued: u64,
    /// Messages successfully written to the transport.
    pub delivered: u64,
    /// Messages dropped by the drop-oldest policy.
    pub evicted: u64,
}

/// Bounded FIFO queue with drop-oldest overflow.
#[derive(Debug)]
pub struct Mailbox {
    owner: ConnectionId,
    capacity: usize,
    queue: Mutex<VecDeque<Arc<Message>>>,
    ready: Notify,
    closed: AtomicBool,
    enqueued: AtomicU64,
    delivered: AtomicU64,
    evicted: AtomicU64,
}

impl Mailbox {
    /// Creates an empty mailbox. A `capacity` of zero is raised to one.
    #[must_use]
    pub fn new(owner: ConnectionId, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            owner,
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            ready: Notify::new(),
            closed: AtomicBool::new(false),
            enqueued: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Returns the identity this mailbox delivers to.
    #[must_use]
    pub fn owner(&self) -> &ConnectionId {
        &self.owner
    }

    /// Returns the configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends a message without blocking.
    ///
    /// If the queue already holds `capacity` messages, the oldest one is
    /// evicted first.
    pub fn enqueue(&self, message: Arc<Message>) -> EnqueueOutcome {
        let evicted = {
            let mut queue = self.lock_queue();
            if self.is_closed() {
                return EnqueueOutcome::Closed;
            }
            let evicted = if queue.len() >= self.capacity {
                queue.pop_front()
            } else {
                None
            };
            queue.push_back(message);
            evicted
        };
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.ready.notify_one();

        match evicted {
            Some(dropped) => {
                let total = self.evicted.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    identity = %self.owner,
                    kind = dropped.kind(),
                    capacity = self.capacity,
                    evicted = total,
                    "mailbox full, dropped oldest message"
                );
                EnqueueOutcome::QueuedWithEviction
            }
            None => EnqueueOutcome::Queued,
        }
    }

    /// Waits for and removes the head message.
    pub async fn next(&self) -> Arc<Message> {
        loop {
            if let Some(message) = self.lock_queue().pop_front() {
                return message;
            }
            // `notify_one` stores a permit when nobody is waiting, so an
            // enqueue between the check above and this await is not lost.
            self.ready.notified().await;
        }
    }

    /// Returns the number of queued messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_queue().len()
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_queue().is_empty()
    }

    /// Returns `true` once the delivery loop has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> MailboxStats {
        MailboxStats {
            capacity: self.capacity(),
            queued: self.len(),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }

    /// Marks the mailbox closed and discards anything still queued,
    /// returning how many messages were dropped.
    pub fn close(&self) -> usize {
        let mut queue = self.lock_queue();
        self.closed.store(true, Ordering::Release);
        let discarded = queue.len();
        queue.clear();
        discarded
    }

    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<Arc<Message>>> {
        // Critical sections never panic, so a poisoned lock still holds a
        // consistent queue.
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Report sent by a delivery loop whose transport failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    /// Identity of the failed connection.
    pub identity: ConnectionId,
    /// Session of the failed connection, so a replacement is left alone.
    pub session: Uuid,
    /// What went wrong.
    pub error: TransportError,
}

/// Why a delivery loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryExit {
    /// Shutdown was requested (or the shutdown handle was dropped).
    Cancelled,
    /// A transport write failed.
    TransportFailed(TransportError),
}

/// Handle to a running delivery loop.
#[derive(Debug)]
pub struct DeliveryTask {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<DeliveryExit>,
}

impl DeliveryTask {
    /// Requests cooperative cancellation and returns the join handle so the
    /// caller can wait for termination.
    pub fn cancel(self) -> JoinHandle<DeliveryExit> {
        // The loop may already have exited on its own; that is fine.
        let _ = self.shutdown.send(());
        self.handle
    }
}

/// Starts the delivery loop draining `mailbox` into `transport`.
pub fn spawn_delivery(
    mailbox: Arc<Mailbox>,
    transport: Box<dyn Transport>,
    session: Uuid,
    failures: mpsc::UnboundedSender<DeliveryFailure>,
) -> DeliveryTask {
    let (shutdown, shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(run_delivery(
        mailbox,
        transport,
        session,
        shutdown_rx,
        failures,
    ));
    DeliveryTask { shutdown, handle }
}

async fn run_delivery(
    mailbox: Arc<Mailbox>,
    mut transport: Box<dyn Transport>,
    session: Uuid,
    mut shutdown: oneshot::Receiver<()>,
    failures: mpsc::UnboundedSender<DeliveryFailure>,
) -> DeliveryExit {
    let identity = mailbox.owner().clone();
    tracing::debug!(%identity, %session, "delivery loop started");

    let exit = loop {
        let message = tokio::select! {
            biased;
            _ = &mut shutdown => break DeliveryExit::Cancelled,
            message = mailbox.next() => message,
        };

        let frame = match message.to_frame() {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(
                    %identity,
                    kind = message.kind(),
                    error = %err,
                    "skipping unserializable message"
                );
                continue;
            }
        };

        tokio::select! {
            biased;
            _ = &mut shutdown => break DeliveryExit::Cancelled,
            result = transport.send_text(frame) => match result {
                Ok(()) => {
                    mailbox.delivered.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(%identity, kind = message.kind(), "message delivered");
                }
                Err(err) => break DeliveryExit::TransportFailed(err),
            },
        }
    };

    let discarded = mailbox.close();

    // Reported ahead of `close`, which may never return.
    match &exit {
        DeliveryExit::Cancelled => {
            tracing::debug!(%identity, %session, discarded, "delivery loop cancelled");
        }
        DeliveryExit::TransportFailed(err) => {
            tracing::warn!(
                %identity,
                %session,
                discarded,
                error = %err,
                "transport write failed, stopping delivery"
            );
            let _ = failures.send(DeliveryFailure {
                identity,
                session,
                error: err.clone(),
            });
        }
    }

    transport.close().await;
    exit
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transport for exercising delivery without sockets.

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use futures_util::future::BoxFuture;
    use tokio::sync::{Semaphore, mpsc};

    use super::Transport;
    use crate::error::TransportError;

    /// Shared controls and observations for a [`MockTransport`].
    #[derive(Debug, Default)]
    pub(crate) struct MockControl {
        pub(crate) fail_writes: AtomicBool,
        pub(crate) closes: AtomicUsize,
        /// When set, `close` never completes.
        pub(crate) stall_close: AtomicBool,
        /// When set, each write waits for one permit.
        pub(crate) gate: Option<Semaphore>,
    }

    /// Transport that forwards frames into a channel.
    #[derive(Debug)]
    pub(crate) struct MockTransport {
        frames: mpsc::UnboundedSender<String>,
        control: Arc<MockControl>,
    }

    impl MockTransport {
        pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<String>, Arc<MockControl>) {
            Self::with_control(MockControl::default())
        }

        /// Writes block until permits are added to the gate.
        pub(crate) fn gated() -> (Self, mpsc::UnboundedReceiver<String>, Arc<MockControl>) {
            Self::with_control(MockControl {
                gate: Some(Semaphore::new(0)),
                ..MockControl::default()
            })
        }

        fn with_control(
            control: MockControl,
        ) -> (Self, mpsc::UnboundedReceiver<String>, Arc<MockControl>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let control = Arc::new(control);
            let transport = Self {
                frames: tx,
                control: Arc::clone(&control),
            };
            (transport, rx, control)
        }
    }

    impl Transport for MockTransport {
        fn send_text(&mut self, text: String) -> BoxFuture<'_, Result<(), TransportError>> {
            Box::pin(async move {
                if let Some(gate) = &self.control.gate {
                    let Ok(permit) = gate.acquire().await else {
                        return Err(TransportError::Closed);
                    };
                    permit.forget();
                }
                if self.control.fail_writes.load(Ordering::SeqCst) {
                    return Err(TransportError::Write("simulated failure".to_string()));
                }
                self.frames
                    .send(text)
                    .map_err(|_| TransportError::Closed)
            })
        }

        fn close(&mut self) -> BoxFuture<'_, ()> {
            Box::pin(async move {
                self.control.closes.fetch_add(1, Ordering::SeqCst);
                if self.control.stall_close.load(Ordering::SeqCst) {
                    std::future::pending::<()>().await;
                }
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Duration;

    use super::testing::MockTransport;
    use super::*;
    use crate::domain::{JobStatus, TaskUpdate};

    fn task(id: &str) -> Arc<Message> {
        Arc::new(TaskUpdate::new(id, JobStatus::Processing).into())
    }

    fn task_id_of(frame: &str) -> String {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(frame) else {
            panic!("frame is not JSON: {frame}");
        };
        value["task_id"].as_str().unwrap_or_default().to_string()
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        let Ok(Some(frame)) = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await else {
            panic!("expected a frame");
        };
        frame
    }

    #[test]
    fn overflow_drops_oldest() {
        let mailbox = Mailbox::new(ConnectionId::from("u1"), 2);
        assert_eq!(mailbox.enqueue(task("m1")), EnqueueOutcome::Queued);
        assert_eq!(mailbox.enqueue(task("m2")), EnqueueOutcome::Queued);
        assert_eq!(mailbox.enqueue(task("m3")), EnqueueOutcome::QueuedWithEviction);

        let stats = mailbox.stats();
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.evicted, 1);
        assert_eq!(stats.enqueued, 3);

        let survivors: Vec<String> = mailbox
            .lock_queue()
            .iter()
            .map(|m| match m.payload() {
                crate::domain::Payload::TaskUpdate(t) => t.task_id.clone(),
                _ => String::new(),
            })
            .collect();
        assert_eq!(survivors, vec!["m2".to_string(), "m3".to_string()]);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let mailbox = Mailbox::new(ConnectionId::from("u1"), 0);
        assert_eq!(mailbox.capacity(), 1);
        assert_eq!(mailbox.stats().capacity, 1);
    }

    #[test]
    fn closed_mailbox_rejects() {
        let mailbox = Mailbox::new(ConnectionId::from("u1"), 4);
        mailbox.enqueue(task("m1"));
        assert_eq!(mailbox.close(), 1);
        assert_eq!(mailbox.enqueue(task("m2")), EnqueueOutcome::Closed);
        assert!(mailbox.is_empty());
    }

    #[tokio::test]
    async fn next_waits_for_enqueue() {
        let mailbox = Arc::new(Mailbox::new(ConnectionId::from("u1"), 4));
        let waiter = {
            let mailbox = Arc::clone(&mailbox);
            tokio::spawn(async move { mailbox.next().await })
        };
        tokio::task::yield_now().await;
        mailbox.enqueue(task("late"));
        let Ok(Ok(message)) = tokio::time::timeout(Duration::from_secs(2), waiter).await else {
            panic!("next() never woke up");
        };
        assert_eq!(message.kind(), "task_update");
    }

    #[test]
    fn next_is_pending_until_enqueue() {
        let mailbox = Mailbox::new(ConnectionId::from("u1"), 4);
        let mut next = tokio_test::task::spawn(mailbox.next());
        tokio_test::assert_pending!(next.poll());

        mailbox.enqueue(task("first"));
        assert!(next.is_woken());
        let message = tokio_test::assert_ready!(next.poll());
        assert_eq!(message.kind(), "task_update");
    }

    #[tokio::test]
    async fn delivers_in_fifo_order() {
        let mailbox = Arc::new(Mailbox::new(ConnectionId::from("u1"), 16));
        let (transport, mut rx, _control) = MockTransport::new();
        let (failures, _failures_rx) = mpsc::unbounded_channel();
        let task_handle = spawn_delivery(
            Arc::clone(&mailbox),
            Box::new(transport),
            Uuid::new_v4(),
            failures,
        );

        for i in 0..10 {
            mailbox.enqueue(task(&format!("m{i}")));
        }
        for i in 0..10 {
            assert_eq!(task_id_of(&recv(&mut rx).await), format!("m{i}"));
        }
        assert_eq!(mailbox.stats().delivered, 10);

        let Ok(exit) = task_handle.cancel().await else {
            panic!("delivery task panicked");
        };
        assert_eq!(exit, DeliveryExit::Cancelled);
    }

    #[tokio::test]
    async fn overflow_while_transport_is_stalled() {
        let mailbox = Arc::new(Mailbox::new(ConnectionId::from("u1"), 2));
        let (transport, mut rx, control) = MockTransport::gated();
        let (failures, _failures_rx) = mpsc::unbounded_channel();
        let _task = spawn_delivery(
            Arc::clone(&mailbox),
            Box::new(transport),
            Uuid::new_v4(),
            failures,
        );

        // The loop takes m0 and blocks writing it; m1..m3 pile up behind it.
        mailbox.enqueue(task("m0"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        mailbox.enqueue(task("m1"));
        mailbox.enqueue(task("m2"));
        mailbox.enqueue(task("m3"));
        assert_eq!(mailbox.stats().evicted, 1);

        let Some(gate) = &control.gate else {
            panic!("gated transport without gate");
        };
        gate.add_permits(3);
        assert_eq!(task_id_of(&recv(&mut rx).await), "m0");
        assert_eq!(task_id_of(&recv(&mut rx).await), "m2");
        assert_eq!(task_id_of(&recv(&mut rx).await), "m3");
    }

    #[tokio::test]
    async fn write_failure_reports_and_closes_once() {
        let mailbox = Arc::new(Mailbox::new(ConnectionId::from("u1"), 4));
        let (transport, _rx, control) = MockTransport::new();
        control.fail_writes.store(true, Ordering::SeqCst);
        let (failures, mut failures_rx) = mpsc::unbounded_channel();
        let session = Uuid::new_v4();
        let task_handle = spawn_delivery(
            Arc::clone(&mailbox),
            Box::new(transport),
            session,
            failures,
        );

        mailbox.enqueue(task("m1"));
        mailbox.enqueue(task("m2"));

        let Ok(Some(failure)) =
            tokio::time::timeout(Duration::from_secs(2), failures_rx.recv()).await
        else {
            panic!("expected failure report");
        };
        assert_eq!(failure.identity.as_str(), "u1");
        assert_eq!(failure.session, session);

        let Ok(exit) = task_handle.cancel().await else {
            panic!("delivery task panicked");
        };
        assert!(matches!(exit, DeliveryExit::TransportFailed(_)));
        assert_eq!(control.closes.load(Ordering::SeqCst), 1);
        assert!(mailbox.is_closed());
        assert_eq!(mailbox.enqueue(task("m3")), EnqueueOutcome::Closed);
    }

    #[tokio::test]
    async fn write_failure_is_reported_while_close_stalls() {
        let mailbox = Arc::new(Mailbox::new(ConnectionId::from("u1"), 4));
        let (transport, _rx, control) = MockTransport::new();
        control.fail_writes.store(true, Ordering::SeqCst);
        control.stall_close.store(true, Ordering::SeqCst);
        let (failures, mut failures_rx) = mpsc::unbounded_channel();
        let task_handle = spawn_delivery(
            Arc::clone(&mailbox),
            Box::new(transport),
            Uuid::new_v4(),
            failures,
        );

        mailbox.enqueue(task("m1"));

        let Ok(Some(failure)) =
            tokio::time::timeout(Duration::from_secs(2), failures_rx.recv()).await
        else {
            panic!("failure was not reported while close stalled");
        };
        assert!(matches!(failure.error, TransportError::Write(_)));
        assert!(mailbox.is_closed());
        task_handle.cancel().abort();
    }

    #[tokio::test]
    async fn cancel_interrupts_stalled_write() {
        let mailbox = Arc::new(Mailbox::new(ConnectionId::from("u1"), 4));
        let (transport, _rx, control) = MockTransport::gated();
        let (failures, mut failures_rx) = mpsc::unbounded_channel();
        let task_handle = spawn_delivery(
            Arc::clone(&mailbox),
            Box::new(transport),
            Uuid::new_v4(),
            failures,
        );

        mailbox.enqueue(task("stuck"));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let Ok(Ok(exit)) =
            tokio::time::timeout(Duration::from_secs(2), task_handle.cancel()).await
        else {
            panic!("cancel did not stop the loop");
        };
        assert_eq!(exit, DeliveryExit::Cancelled);
        assert_eq!(control.closes.load(Ordering::SeqCst), 1);
        assert!(failures_rx.try_recv().is_err());
    }
}
