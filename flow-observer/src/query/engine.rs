//! Historical and live reads over the history ring.

use super::context::Context;
use super::filters::FlowFilterSet;
use super::request::{
    FlowResponse, GetAgentEventsRequest, GetAgentEventsResponse, GetFlowsRequest,
    GetFlowsResponse,
};
use super::sink::ResponseSink;
use crate::errors::{ObserverError, Result};
use crate::flow::{LostEventRecord, LostEventSource};
use crate::history::{Cursor, EntryKind, Follower, HistoryEntry, Read, Ring};
use crate::hooks::{Control, HookSet};
use chrono::Utc;
use log::{debug, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Serves flow and agent-event queries. Each query owns its own cursor, so
/// any number of them can run at once.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    ring: Arc<Ring>,
    hooks: Arc<HookSet>,
}

/// Where a query reads from: a one-off scan of what is retained, or a
/// follower that keeps waiting for the writer.
enum Position {
    History(Cursor),
    Live(Follower),
}

enum Step {
    Read(Read),
    Exhausted,
    Cancelled,
}

impl Position {
    fn new(ring: &Arc<Ring>, follow: bool) -> Self {
        if follow {
            Position::Live(ring.follow())
        } else {
            Position::History(ring.oldest_cursor())
        }
    }

    async fn next<P>(&mut self, ring: &Ring, token: &CancellationToken, mut accept: P) -> Step
    where
        P: FnMut(&HistoryEntry) -> bool,
    {
        match self {
            Position::History(cursor) => match ring.read_from(cursor, None, &mut accept).next() {
                Some(read) => Step::Read(read),
                None => Step::Exhausted,
            },
            Position::Live(follower) => loop {
                match follower.next(token).await {
                    Some(Read::Entry(entry)) if !accept(entry.as_ref()) => continue,
                    Some(read) => return Step::Read(read),
                    None => return Step::Cancelled,
                }
            },
        }
    }
}

impl QueryEngine {
    pub fn new(ring: Arc<Ring>, hooks: Arc<HookSet>) -> Self {
        Self { ring, hooks }
    }

    pub fn ring(&self) -> &Arc<Ring> {
        &self.ring
    }

    /// Stream flows matching `request` into `sink`.
    ///
    /// Returns `Ok(())` once a bounded query is exhausted or has delivered
    /// `number` flows. A follow query only ends through the sink or the
    /// sink's cancellation token.
    pub async fn get_flows<S>(&self, request: &GetFlowsRequest, sink: &mut S) -> Result<()>
    where
        S: ResponseSink<GetFlowsResponse>,
    {
        request.validate()?;
        let token = sink.cancellation_token();
        let ctx = self
            .hooks
            .run_get_flows(Context::new(token.clone()), request)?;

        let window = request.time_window();
        let filters = request.filters();
        let limit = request.limit();
        let mut position = Position::new(&self.ring, request.follow);
        let mut delivered = 0u64;

        debug!(
            "Starting flows query (follow: {}, limit: {:?})",
            request.follow, limit
        );

        loop {
            if token.is_cancelled() {
                return Err(ObserverError::Cancelled);
            }
            let read = match position
                .next(&self.ring, &token, |entry| {
                    matches!(entry.kind, EntryKind::Flow(_) | EntryKind::Lost(_))
                        && window.contains(entry.time)
                })
                .await
            {
                Step::Read(read) => read,
                Step::Exhausted => break,
                Step::Cancelled => return Err(ObserverError::Cancelled),
            };

            let Some(response) = self.flow_response(&ctx, &filters, read) else {
                continue;
            };
            let is_flow = response.flow().is_some();
            sink.send(response).await?;

            if is_flow {
                delivered += 1;
                if limit.map_or(false, |limit| delivered >= limit) {
                    break;
                }
            }
        }

        debug!("Flows query finished after {} flows", delivered);
        Ok(())
    }

    /// Stream agent notifications matching `request` into `sink`.
    pub async fn get_agent_events<S>(
        &self,
        request: &GetAgentEventsRequest,
        sink: &mut S,
    ) -> Result<()>
    where
        S: ResponseSink<GetAgentEventsResponse>,
    {
        request.validate()?;
        let token = sink.cancellation_token();
        let window = request.time_window();
        let limit = request.limit();
        let mut position = Position::new(&self.ring, request.follow);
        let mut delivered = 0u64;

        loop {
            if token.is_cancelled() {
                return Err(ObserverError::Cancelled);
            }
            let entry = match position
                .next(&self.ring, &token, |entry| {
                    entry.agent().is_some() && window.contains(entry.time)
                })
                .await
            {
                Step::Read(Read::Entry(entry)) => entry,
                Step::Read(Read::Lapped { missed }) => {
                    debug!("Agent events reader lapped, {} entries missed", missed);
                    continue;
                }
                Step::Exhausted => break,
                Step::Cancelled => return Err(ObserverError::Cancelled),
            };
            let Some(agent_event) = entry.agent() else {
                continue;
            };

            sink.send(GetAgentEventsResponse {
                time: entry.time,
                node_name: entry.node_name.clone(),
                agent_event: Arc::clone(agent_event),
            })
            .await?;

            delivered += 1;
            if limit.map_or(false, |limit| delivered >= limit) {
                break;
            }
        }

        Ok(())
    }

    fn flow_response(
        &self,
        ctx: &Context,
        filters: &FlowFilterSet,
        read: Read,
    ) -> Option<GetFlowsResponse> {
        let entry = match read {
            Read::Entry(entry) => entry,
            Read::Lapped { missed } => {
                return Some(GetFlowsResponse {
                    time: Utc::now(),
                    node_name: String::new(),
                    response: FlowResponse::LostEvents(LostEventRecord {
                        source: LostEventSource::HistoryRingBuffer,
                        num_events_lost: missed,
                        cpu: None,
                    }),
                });
            }
        };

        let response = match &entry.kind {
            EntryKind::Flow(flow) => {
                if !filters.allows(flow) {
                    return None;
                }
                match self.hooks.run_flow_delivery(ctx, flow) {
                    Ok(Control::Continue) => {}
                    Ok(_) => return None,
                    Err(e) => {
                        warn!("Flow delivery hook failed, skipping flow: {}", e);
                        return None;
                    }
                }
                FlowResponse::Flow(Arc::clone(flow))
            }
            EntryKind::Lost(record) => FlowResponse::LostEvents(*record),
            EntryKind::Agent(_) => return None,
        };

        Some(GetFlowsResponse {
            time: entry.time,
            node_name: entry.node_name.clone(),
            response,
        })
    }
}
