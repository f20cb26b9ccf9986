//! Bounded hand-off between event producers and the ingestion loop.

use crate::configuration::Backpressure;
use crate::errors::{ObserverError, Result};
use crate::events::MonitorEvent;
use flume::TrySendError;
use std::sync::atomic::{fence, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Create a queue holding up to `capacity` events. A capacity of 0 makes
/// every send wait until the loop takes the event.
pub(crate) fn event_queue(
    capacity: usize,
    backpressure: Backpressure,
) -> (EventSender, EventReceiver) {
    let (sender, receiver) = flume::bounded(capacity);
    let closed = CancellationToken::new();
    let in_flight = Arc::new(AtomicUsize::new(0));
    (
        EventSender {
            sender,
            closed: closed.clone(),
            in_flight: Arc::clone(&in_flight),
            backpressure,
        },
        EventReceiver {
            receiver,
            closed,
            in_flight,
        },
    )
}

/// Producer handle of the inbound queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: flume::Sender<MonitorEvent>,
    closed: CancellationToken,
    /// Sends that may still land in the channel.
    in_flight: Arc<AtomicUsize>,
    backpressure: Backpressure,
}

/// Marks a send as in flight until dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        // Pairs with the fence in `EventReceiver::drain_closed`: either the
        // receiver sees this send, or this send sees the queue closed.
        fence(Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl EventSender {
    /// Offer `event` to the observer.
    ///
    /// With [`Backpressure::Block`] this waits for room; with
    /// [`Backpressure::Reject`] a full queue fails with `QueueFull`.
    pub async fn send(&self, event: MonitorEvent) -> Result<()> {
        let _in_flight = InFlight::enter(&self.in_flight);
        if self.closed.is_cancelled() {
            return Err(ObserverError::QueueClosed);
        }
        match self.backpressure {
            Backpressure::Block => {
                tokio::select! {
                    biased;
                    _ = self.closed.cancelled() => Err(ObserverError::QueueClosed),
                    sent = self.sender.send_async(event) => {
                        sent.map_err(|_| ObserverError::QueueClosed)
                    }
                }
            }
            Backpressure::Reject => self.try_send(event),
        }
    }

    /// Offer `event` without waiting, whatever the backpressure mode.
    pub fn try_send(&self, event: MonitorEvent) -> Result<()> {
        let _in_flight = InFlight::enter(&self.in_flight);
        if self.closed.is_cancelled() {
            return Err(ObserverError::QueueClosed);
        }
        self.sender.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => ObserverError::QueueFull,
            TrySendError::Disconnected(_) => ObserverError::QueueClosed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.sender.is_disconnected()
    }

    /// Events waiting to be processed.
    pub fn len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.sender.capacity()
    }

    pub fn backpressure(&self) -> Backpressure {
        self.backpressure
    }

    /// Close the queue. Later sends fail; queued events are still processed.
    pub(crate) fn close(&self) {
        self.closed.cancel();
    }

    pub(crate) fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

/// Consumer side, owned by the ingestion loop.
#[derive(Debug)]
pub(crate) struct EventReceiver {
    receiver: flume::Receiver<MonitorEvent>,
    closed: CancellationToken,
    in_flight: Arc<AtomicUsize>,
}

impl EventReceiver {
    /// Next event, or `None` once the queue is closed and drained or every
    /// sender is gone.
    pub(crate) async fn recv(&self) -> Option<MonitorEvent> {
        tokio::select! {
            biased;
            event = self.receiver.recv_async() => event.ok(),
            _ = self.closed.cancelled() => self.drain_closed().await,
        }
    }

    /// Next queued event of a closed queue. Sends that passed the closed
    /// check before `close` are waited for, so an accepted event is never
    /// left behind.
    async fn drain_closed(&self) -> Option<MonitorEvent> {
        fence(Ordering::SeqCst);
        loop {
            if let Ok(event) = self.receiver.try_recv() {
                return Some(event);
            }
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return self.receiver.try_recv().ok();
            }
            tokio::task::yield_now().await;
        }
    }
}

/// One-shot "ingestion has stopped" signal. Late waiters see it too.
#[derive(Debug, Clone)]
pub struct Stopped {
    receiver: watch::Receiver<bool>,
}

#[derive(Debug)]
pub(crate) struct StopSignal {
    sender: watch::Sender<bool>,
}

pub(crate) fn stop_signal() -> (StopSignal, Stopped) {
    let (sender, receiver) = watch::channel(false);
    (StopSignal { sender }, Stopped { receiver })
}

impl StopSignal {
    pub(crate) fn fire(&self) {
        self.sender.send_replace(true);
    }
}

impl Stopped {
    pub fn is_stopped(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait until the ingestion loop has stopped.
    pub async fn wait(&self) {
        let mut receiver = self.receiver.clone();
        // An error means the loop went away without signalling; treat as stopped.
        let _ = receiver.wait_for(|stopped| *stopped).await;
    }
}
