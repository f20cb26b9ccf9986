//! Raw monitor events as they arrive from the dataplane feed.

use crate::flow::{
    AgentEventType, EndpointRegenNotification, IpCacheNotification, LostEventSource,
    PolicyUpdateNotification, ServiceDeleteNotification, ServiceUpsertNotification,
    TimeNotification,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use flow_observer_common::message_type;
use serde::Serialize;

/// One event offered to the observer. Consumed exactly once by the ingestion loop.
#[derive(Debug, Clone)]
pub struct MonitorEvent {
    pub timestamp: DateTime<Utc>,
    pub node_name: String,
    pub payload: Payload,
}

#[derive(Debug, Clone)]
pub enum Payload {
    Perf(PerfEvent),
    Agent(AgentEvent),
    Lost(LostEvent),
}

/// Raw bytes read from a per-CPU perf ring.
#[derive(Debug, Clone)]
pub struct PerfEvent {
    pub data: Bytes,
    pub cpu: u32,
}

/// Notification emitted by the agent itself rather than the dataplane.
///
/// `message` is a JSON document whose schema is selected by `kind`.
#[derive(Debug, Clone)]
pub struct AgentEvent {
    pub msg_type: u8,
    pub kind: u8,
    pub message: String,
}

/// The dataplane reported that it could not deliver `num_lost` events.
#[derive(Debug, Clone, Copy)]
pub struct LostEvent {
    pub source: LostEventSource,
    pub num_lost: u64,
    pub cpu: u32,
}

impl MonitorEvent {
    pub fn new(timestamp: DateTime<Utc>, node_name: impl Into<String>, payload: Payload) -> Self {
        Self {
            timestamp,
            node_name: node_name.into(),
            payload,
        }
    }

    pub fn perf(
        timestamp: DateTime<Utc>,
        node_name: impl Into<String>,
        data: impl Into<Bytes>,
        cpu: u32,
    ) -> Self {
        Self::new(
            timestamp,
            node_name,
            Payload::Perf(PerfEvent {
                data: data.into(),
                cpu,
            }),
        )
    }

    pub fn agent(
        timestamp: DateTime<Utc>,
        node_name: impl Into<String>,
        event: AgentEvent,
    ) -> Self {
        Self::new(timestamp, node_name, Payload::Agent(event))
    }

    pub fn lost(timestamp: DateTime<Utc>, node_name: impl Into<String>, event: LostEvent) -> Self {
        Self::new(timestamp, node_name, Payload::Lost(event))
    }

    pub fn kind(&self) -> &'static str {
        match self.payload {
            Payload::Perf(_) => "perf",
            Payload::Agent(_) => "agent",
            Payload::Lost(_) => "lost",
        }
    }
}

impl AgentEvent {
    /// Encode `message` as the JSON body of an agent notification of `kind`.
    pub fn new<T: Serialize>(kind: AgentEventType, message: &T) -> serde_json::Result<Self> {
        Ok(Self {
            msg_type: message_type::AGENT,
            kind: kind.code(),
            message: serde_json::to_string(message)?,
        })
    }

    pub fn agent_started(start_time: DateTime<Utc>) -> serde_json::Result<Self> {
        Self::new(
            AgentEventType::AgentStarted,
            &TimeNotification { time: start_time },
        )
    }

    pub fn policy_updated(
        labels: Vec<String>,
        revision: u64,
        rule_count: u64,
    ) -> serde_json::Result<Self> {
        Self::new(
            AgentEventType::PolicyUpdated,
            &PolicyUpdateNotification {
                labels,
                revision,
                rule_count,
            },
        )
    }

    pub fn endpoint_regenerated(
        id: u64,
        labels: Vec<String>,
        error: Option<String>,
    ) -> serde_json::Result<Self> {
        let kind = if error.is_some() {
            AgentEventType::EndpointRegenerateFailure
        } else {
            AgentEventType::EndpointRegenerateSuccess
        };
        Self::new(
            kind,
            &EndpointRegenNotification {
                id,
                labels,
                error: error.unwrap_or_default(),
            },
        )
    }

    pub fn ipcache_upserted(notification: &IpCacheNotification) -> serde_json::Result<Self> {
        Self::new(AgentEventType::IpcacheUpserted, notification)
    }

    pub fn ipcache_deleted(notification: &IpCacheNotification) -> serde_json::Result<Self> {
        Self::new(AgentEventType::IpcacheDeleted, notification)
    }

    pub fn service_upserted(notification: &ServiceUpsertNotification) -> serde_json::Result<Self> {
        Self::new(AgentEventType::ServiceUpserted, notification)
    }

    pub fn service_deleted(id: u32) -> serde_json::Result<Self> {
        Self::new(
            AgentEventType::ServiceDeleted,
            &ServiceDeleteNotification { id },
        )
    }
}
