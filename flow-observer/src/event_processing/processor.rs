//! Ingestion loop
//!
//! The only writer of the history ring. Takes events off the inbound queue one
//! at a time, runs the monitor-event hooks, decodes, runs the decoded-flow
//! hooks and appends. A failing event is logged and dropped; the loop itself
//! only ends when the queue is closed and drained.

use super::queue::{EventReceiver, StopSignal};
use crate::errors::ParseError;
use crate::events::{MonitorEvent, Payload};
use crate::flow::LostEventRecord;
use crate::history::{EntryKind, HistoryEntry, RingWriter};
use crate::hooks::{Control, HookSet};
use crate::parser::{decode_agent_event, PayloadParser};
use crate::query::Context;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub struct IngestionLoop {
    parser: Arc<dyn PayloadParser>,
    hooks: Arc<HookSet>,
    writer: RingWriter,
    receiver: EventReceiver,
    seen: Arc<AtomicU64>,
    stop: StopSignal,
    ctx: Context,
}

/// What became of one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Stored,
    Dropped,
}

impl IngestionLoop {
    pub(crate) fn new(
        parser: Arc<dyn PayloadParser>,
        hooks: Arc<HookSet>,
        writer: RingWriter,
        receiver: EventReceiver,
        seen: Arc<AtomicU64>,
        stop: StopSignal,
        ctx: Context,
    ) -> Self {
        Self {
            parser,
            hooks,
            writer,
            receiver,
            seen,
            stop,
            ctx,
        }
    }

    /// Process events until the queue is closed and drained, then signal
    /// stopped.
    pub async fn run(mut self) {
        info!(
            "Starting ingestion loop (history capacity {})",
            self.writer.ring().capacity()
        );

        let mut dropped = 0u64;
        while let Some(event) = self.receiver.recv().await {
            if self.process(event) == Outcome::Dropped {
                dropped += 1;
            }
        }

        info!(
            "Ingestion loop stopped: {} events seen, {} dropped",
            self.seen.load(Ordering::Relaxed),
            dropped
        );
        self.stop.fire();
    }

    fn process(&mut self, event: MonitorEvent) -> Outcome {
        self.seen.fetch_add(1, Ordering::Relaxed);

        match self.hooks.run_monitor_event(&self.ctx, &event) {
            Ok(Control::Continue) => {}
            Ok(control) => {
                debug!("Monitor event dropped by hook ({:?})", control);
                return Outcome::Dropped;
            }
            Err(e) => {
                warn!("Monitor event hook failed, dropping event: {}", e);
                return Outcome::Dropped;
            }
        }

        let kind = match self.decode(&event) {
            Ok(Some(kind)) => kind,
            Ok(None) => return Outcome::Dropped,
            Err(e) => {
                warn!("Failed to decode {} event: {}", event.kind(), e);
                return Outcome::Dropped;
            }
        };

        self.writer
            .append(HistoryEntry::new(event.timestamp, event.node_name, kind));
        Outcome::Stored
    }

    /// Decode the payload. `Ok(None)` when a decoded-flow hook dropped it.
    fn decode(&self, event: &MonitorEvent) -> Result<Option<EntryKind>, ParseError> {
        let kind = match &event.payload {
            Payload::Perf(perf) => {
                let mut flow = self.parser.decode(&perf.data)?;
                flow.time = event.timestamp;
                flow.node_name = event.node_name.clone();

                match self.hooks.run_decoded_flow(&self.ctx, &flow) {
                    Ok(Control::Continue) => {}
                    Ok(control) => {
                        debug!("Decoded flow dropped by hook ({:?})", control);
                        return Ok(None);
                    }
                    Err(e) => {
                        warn!("Decoded flow hook failed, dropping flow: {}", e);
                        return Ok(None);
                    }
                }
                EntryKind::Flow(Arc::new(flow))
            }
            Payload::Agent(agent) => EntryKind::Agent(Arc::new(decode_agent_event(agent)?)),
            Payload::Lost(lost) => EntryKind::Lost(LostEventRecord {
                source: lost.source,
                num_events_lost: lost.num_lost,
                cpu: Some(lost.cpu),
            }),
        };
        Ok(Some(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::Backpressure;
    use crate::errors::HookError;
    use crate::event_processing::queue::{event_queue, stop_signal};
    use crate::events::{AgentEvent, LostEvent};
    use crate::flow::{Flow, LostEventSource};
    use crate::history::{Cursor, Read, Ring};
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::AtomicUsize;

    /// Accepts any payload whose first byte is non-zero.
    struct FirstByteParser;

    impl PayloadParser for FirstByteParser {
        fn decode(&self, data: &[u8]) -> Result<Flow, ParseError> {
            match data.first() {
                Some(0) => Err(ParseError::UnknownMessageType(0)),
                Some(_) => Ok(Flow::default()),
                None => Err(ParseError::EmptyBuffer),
            }
        }
    }

    struct Harness {
        ring: Arc<Ring>,
        seen: Arc<AtomicU64>,
        ingestion: IngestionLoop,
    }

    fn harness(hooks: HookSet, capacity: usize) -> (Harness, crate::event_processing::EventSender) {
        let (ring, writer) = Ring::new(capacity);
        let (sender, receiver) = event_queue(64, Backpressure::Block);
        let (stop, _stopped) = stop_signal();
        let seen = Arc::new(AtomicU64::new(0));
        let ingestion = IngestionLoop::new(
            Arc::new(FirstByteParser),
            Arc::new(hooks),
            writer,
            receiver,
            Arc::clone(&seen),
            stop,
            Context::default(),
        );
        (
            Harness {
                ring,
                seen,
                ingestion,
            },
            sender,
        )
    }

    fn perf(second: i64, first_byte: u8) -> MonitorEvent {
        MonitorEvent::perf(
            Utc.timestamp_opt(second, 0).unwrap(),
            format!("node #{:03}", second),
            vec![first_byte],
            0,
        )
    }

    fn stored(ring: &Ring) -> Vec<Arc<HistoryEntry>> {
        let mut cursor = Cursor::oldest();
        ring.read_from(&mut cursor, None, |_| true)
            .filter_map(|read| match read {
                Read::Entry(entry) => Some(entry),
                Read::Lapped { .. } => None,
            })
            .collect()
    }

    #[test]
    fn should_stamp_flow_with_event_time_and_node() {
        let (mut h, _sender) = harness(HookSet::new(), 7);

        assert_eq!(h.ingestion.process(perf(3, 1)), Outcome::Stored);

        let entries = stored(&h.ring);
        let flow = entries[0].flow().unwrap();
        assert_eq!(flow.time.timestamp(), 3);
        assert_eq!(flow.node_name, "node #003");
        assert_eq!(entries[0].node_name, "node #003");
    }

    #[test]
    fn should_count_undecodable_events_as_seen_but_not_store_them() {
        let (mut h, _sender) = harness(HookSet::new(), 7);

        assert_eq!(h.ingestion.process(perf(1, 0)), Outcome::Dropped);
        assert_eq!(h.ingestion.process(perf(2, 1)), Outcome::Stored);

        assert_eq!(h.seen.load(Ordering::Relaxed), 2);
        assert_eq!(h.ring.len(), 1);
    }

    #[test]
    fn should_store_agent_and_lost_events() {
        let (mut h, _sender) = harness(HookSet::new(), 7);
        let now = Utc::now();

        h.ingestion.process(MonitorEvent::agent(
            now,
            "node",
            AgentEvent::service_deleted(5).unwrap(),
        ));
        h.ingestion.process(MonitorEvent::lost(
            now,
            "node",
            LostEvent {
                source: LostEventSource::PerfEventRingBuffer,
                num_lost: 12,
                cpu: 3,
            },
        ));

        let entries = stored(&h.ring);
        assert_eq!(entries[0].agent().unwrap().service_delete().unwrap().id, 5);
        let lost = entries[1].lost().unwrap();
        assert_eq!(lost.num_events_lost, 12);
        assert_eq!(lost.cpu, Some(3));
    }

    #[test]
    fn should_drop_event_stopped_by_monitor_hook_before_decoding() {
        let decoded = Arc::new(AtomicUsize::new(0));
        let mut hooks = HookSet::new();
        hooks.add_monitor_event(Arc::new(|_: &Context, event: &MonitorEvent| {
            Ok(if event.timestamp.timestamp() % 2 == 0 {
                Control::Stop
            } else {
                Control::Continue
            })
        }));
        let counter = Arc::clone(&decoded);
        hooks.add_decoded_flow(Arc::new(move |_: &Context, _: &Flow| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Control::Continue)
        }));
        let (mut h, _sender) = harness(hooks, 15);

        for second in 0..10 {
            h.ingestion.process(perf(second, 1));
        }

        assert_eq!(h.seen.load(Ordering::Relaxed), 10);
        assert_eq!(h.ring.len(), 5);
        assert_eq!(decoded.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn should_drop_flow_when_decoded_hook_fails() {
        let mut hooks = HookSet::new();
        hooks.add_decoded_flow(Arc::new(|_: &Context, _: &Flow| {
            Err(HookError::msg("no"))
        }));
        let (mut h, _sender) = harness(hooks, 7);

        assert_eq!(h.ingestion.process(perf(1, 1)), Outcome::Dropped);
        assert!(h.ring.is_empty());
    }

    #[tokio::test]
    async fn should_drain_and_signal_stopped_on_close() {
        let (ring, writer) = Ring::new(7);
        let (sender, receiver) = event_queue(64, Backpressure::Block);
        let (stop, stopped) = stop_signal();
        let ingestion = IngestionLoop::new(
            Arc::new(FirstByteParser),
            Arc::new(HookSet::new()),
            writer,
            receiver,
            Arc::new(AtomicU64::new(0)),
            stop,
            Context::default(),
        );
        for second in 0..5 {
            sender.send(perf(second, 1)).await.unwrap();
        }
        sender.close();

        ingestion.run().await;

        assert!(stopped.is_stopped());
        assert_eq!(ring.len(), 5);
    }
}
