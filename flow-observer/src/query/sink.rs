//! Transport-neutral response sinks.

use crate::errors::DeliveryError;
use std::future::Future;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Destination of a streaming query.
///
/// Any error returned by `send` ends the query and is handed back to the
/// caller as is.
pub trait ResponseSink<T>: Send {
    fn send(&mut self, response: T) -> impl Future<Output = Result<(), DeliveryError>> + Send;

    /// Token the caller cancels to end the query.
    fn cancellation_token(&self) -> CancellationToken;
}

/// Sink backed by a bounded tokio channel.
#[derive(Debug)]
pub struct ChannelSink<T> {
    sender: mpsc::Sender<T>,
    token: CancellationToken,
}

impl<T: Send> ChannelSink<T> {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<T>) {
        Self::with_token(capacity, CancellationToken::new())
    }

    pub fn with_token(capacity: usize, token: CancellationToken) -> (Self, mpsc::Receiver<T>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender, token }, receiver)
    }
}

impl<T: Send> ResponseSink<T> for ChannelSink<T> {
    async fn send(&mut self, response: T) -> Result<(), DeliveryError> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(DeliveryError::Closed),
            sent = self.sender.send(response) => sent.map_err(|_| DeliveryError::Closed),
        }
    }

    fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }
}
