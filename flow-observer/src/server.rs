//! Local observer server
//!
//! Owns the history ring, the inbound queue and the ingestion loop, and serves
//! queries over the ring. The server can be queried in any state, including
//! after ingestion has stopped.

use crate::configuration::ObserverOptions;
use crate::errors::{ObserverError, Result};
use crate::event_processing::queue::{event_queue, stop_signal, EventReceiver, StopSignal};
use crate::event_processing::{EventSender, IngestionLoop, Stopped};
use crate::history::{Ring, RingWriter};
use crate::parser::PayloadParser;
use crate::query::{
    Context, GetAgentEventsRequest, GetAgentEventsResponse, GetFlowsRequest, GetFlowsResponse,
    QueryEngine, ResponseSink, ServerStatusResponse,
};
use log::info;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

/// Lifecycle of a [`LocalObserverServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Started,
    Stopped,
}

/// Cheap to clone; every clone is the same server.
#[derive(Clone)]
pub struct LocalObserverServer {
    inner: Arc<Inner>,
}

struct Inner {
    options: ObserverOptions,
    parser: Arc<dyn PayloadParser>,
    ring: Arc<Ring>,
    engine: QueryEngine,
    events: EventSender,
    stopped: Stopped,
    seen_flows: Arc<AtomicU64>,
    started_at: Instant,
    /// Parts handed to the ingestion loop on start.
    pending: Mutex<Option<PendingLoop>>,
}

struct PendingLoop {
    writer: RingWriter,
    receiver: EventReceiver,
    stop: StopSignal,
}

impl LocalObserverServer {
    /// Create a server. Nothing runs until [`start`](Self::start).
    pub fn new(parser: Arc<dyn PayloadParser>, options: ObserverOptions) -> Result<Self> {
        options.validate()?;

        let (ring, writer) = Ring::new(options.max_flows());
        let (events, receiver) =
            event_queue(options.monitor_buffer_size(), options.backpressure());
        let (stop, stopped) = stop_signal();
        let engine = QueryEngine::new(Arc::clone(&ring), Arc::clone(options.hooks()));

        info!(
            "Configured observer: max_flows={}, monitor_buffer_size={}, backpressure={}",
            options.max_flows(),
            options.monitor_buffer_size(),
            options.backpressure()
        );

        Ok(Self {
            inner: Arc::new(Inner {
                options,
                parser,
                ring,
                engine,
                events,
                stopped,
                seen_flows: Arc::new(AtomicU64::new(0)),
                started_at: Instant::now(),
                pending: Mutex::new(Some(PendingLoop {
                    writer,
                    receiver,
                    stop,
                })),
            }),
        })
    }

    /// Run the server-init hooks and spawn the ingestion loop on the current
    /// tokio runtime. Fails with `AlreadyStarted` on a second call.
    pub fn start(&self) -> Result<JoinHandle<()>> {
        let Some(pending) = self.inner.pending.lock().take() else {
            return Err(ObserverError::AlreadyStarted);
        };

        if let Err(e) = self.inner.options.hooks().run_server_init(self) {
            *self.inner.pending.lock() = Some(pending);
            return Err(e);
        }

        let PendingLoop {
            writer,
            receiver,
            stop,
        } = pending;

        let ingestion = IngestionLoop::new(
            Arc::clone(&self.inner.parser),
            Arc::clone(self.inner.options.hooks()),
            writer,
            receiver,
            Arc::clone(&self.inner.seen_flows),
            stop,
            Context::new(self.inner.events.closed_token()),
        );
        info!("Starting observer server");
        Ok(tokio::spawn(ingestion.run()))
    }

    pub fn state(&self) -> ServerState {
        if self.inner.stopped.is_stopped() {
            ServerState::Stopped
        } else if self.inner.pending.lock().is_some() {
            ServerState::Created
        } else {
            ServerState::Started
        }
    }

    /// Producer handle of the inbound queue.
    pub fn events(&self) -> EventSender {
        self.inner.events.clone()
    }

    /// Close the inbound queue. The ingestion loop finishes what is queued
    /// and stops.
    pub fn close_events(&self) {
        info!("Closing monitor event queue");
        self.inner.events.close();
    }

    pub fn stopped(&self) -> Stopped {
        self.inner.stopped.clone()
    }

    pub fn payload_parser(&self) -> &Arc<dyn PayloadParser> {
        &self.inner.parser
    }

    pub fn ring(&self) -> &Arc<Ring> {
        &self.inner.ring
    }

    pub fn options(&self) -> &ObserverOptions {
        &self.inner.options
    }

    pub fn server_status(&self) -> ServerStatusResponse {
        // History length first: every stored entry was counted as seen before
        // it was appended.
        let num_flows = self.inner.ring.len() as u64;
        let seen_flows = self.inner.seen_flows.load(Ordering::Relaxed);
        ServerStatusResponse {
            seen_flows,
            num_flows,
            max_flows: self.inner.ring.capacity() as u64,
            uptime: self.inner.started_at.elapsed(),
        }
    }

    pub async fn get_flows<S>(&self, request: &GetFlowsRequest, sink: &mut S) -> Result<()>
    where
        S: ResponseSink<GetFlowsResponse>,
    {
        self.inner.engine.get_flows(request, sink).await
    }

    pub async fn get_agent_events<S>(
        &self,
        request: &GetAgentEventsRequest,
        sink: &mut S,
    ) -> Result<()>
    where
        S: ResponseSink<GetAgentEventsResponse>,
    {
        self.inner.engine.get_agent_events(request, sink).await
    }
}

impl std::fmt::Debug for LocalObserverServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalObserverServer")
            .field("state", &self.state())
            .field("ring", &self.inner.ring)
            .field("options", &self.inner.options)
            .finish()
    }
}
