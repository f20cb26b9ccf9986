//! Decoded records stored in history and handed to readers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// A network flow decoded from a dataplane perf event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub time: DateTime<Utc>,
    pub node_name: String,
    pub verdict: Verdict,
    /// Drop reason code, 0 unless `verdict` is [`Verdict::Dropped`].
    pub drop_reason: u8,
    pub event_type: EventType,
    pub observation_point: Option<u8>,
    pub ethernet: Option<Ethernet>,
    pub ip: Option<Ip>,
    pub l4: Option<Layer4>,
    pub source: Option<Endpoint>,
    pub destination: Option<Endpoint>,
    pub source_names: Vec<String>,
    pub destination_names: Vec<String>,
    pub source_service: Option<Service>,
    pub destination_service: Option<Service>,
    pub interface: Option<NetworkInterface>,
}

impl Flow {
    pub fn protocol(&self) -> Option<Protocol> {
        self.l4.as_ref().map(Layer4::protocol)
    }

    pub fn source_port(&self) -> Option<u16> {
        self.l4.as_ref().and_then(Layer4::ports).map(|(src, _)| src)
    }

    pub fn destination_port(&self) -> Option<u16> {
        self.l4.as_ref().and_then(Layer4::ports).map(|(_, dst)| dst)
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let endpoint = |ip: Option<IpAddr>, port: Option<u16>| match (ip, port) {
            (Some(ip), Some(port)) => format!("{}:{}", ip, port),
            (Some(ip), None) => ip.to_string(),
            _ => "?".to_string(),
        };
        let source = endpoint(self.ip.as_ref().map(|ip| ip.source), self.source_port());
        let destination = endpoint(
            self.ip.as_ref().map(|ip| ip.destination),
            self.destination_port(),
        );
        let protocol = self.protocol().map(|p| p.as_str()).unwrap_or("-");

        write!(
            f,
            "{} {} -> {} {} {}",
            self.node_name,
            source,
            destination,
            protocol,
            self.verdict.as_str()
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    #[default]
    Unknown,
    Forwarded,
    Dropped,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Unknown => "UNKNOWN",
            Verdict::Forwarded => "FORWARDED",
            Verdict::Dropped => "DROPPED",
        }
    }
}

/// Monitor message type and sub type the flow was decoded from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventType {
    pub kind: u8,
    pub sub_type: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ethernet {
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpVersion {
    V4,
    V6,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ip {
    pub source: IpAddr,
    pub destination: IpAddr,
    pub version: IpVersion,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpFlags {
    pub fin: bool,
    pub syn: bool,
    pub rst: bool,
    pub psh: bool,
    pub ack: bool,
    pub urg: bool,
}

impl TcpFlags {
    pub fn from_bits(bits: u8) -> Self {
        Self {
            fin: bits & 0x01 != 0,
            syn: bits & 0x02 != 0,
            rst: bits & 0x04 != 0,
            psh: bits & 0x08 != 0,
            ack: bits & 0x10 != 0,
            urg: bits & 0x20 != 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer4 {
    Tcp {
        source_port: u16,
        destination_port: u16,
        flags: TcpFlags,
    },
    Udp {
        source_port: u16,
        destination_port: u16,
    },
    Icmpv4 {
        icmp_type: u8,
        code: u8,
    },
    Icmpv6 {
        icmp_type: u8,
        code: u8,
    },
}

impl Layer4 {
    pub fn protocol(&self) -> Protocol {
        match self {
            Layer4::Tcp { .. } => Protocol::Tcp,
            Layer4::Udp { .. } => Protocol::Udp,
            Layer4::Icmpv4 { .. } => Protocol::Icmpv4,
            Layer4::Icmpv6 { .. } => Protocol::Icmpv6,
        }
    }

    pub fn ports(&self) -> Option<(u16, u16)> {
        match *self {
            Layer4::Tcp {
                source_port,
                destination_port,
                ..
            }
            | Layer4::Udp {
                source_port,
                destination_port,
            } => Some((source_port, destination_port)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmpv4,
    Icmpv6,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Icmpv4 => "ICMPv4",
            Protocol::Icmpv6 => "ICMPv6",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: u32,
    pub identity: u32,
    pub namespace: String,
    pub pod_name: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub index: u32,
    pub name: String,
}

/// Agent notification kinds. Codes match the dataplane's agent notify types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentEventType {
    Generic,
    AgentStarted,
    EndpointRegenerateSuccess,
    EndpointRegenerateFailure,
    PolicyUpdated,
    PolicyDeleted,
    EndpointCreated,
    EndpointDeleted,
    IpcacheUpserted,
    IpcacheDeleted,
    ServiceUpserted,
    ServiceDeleted,
}

impl AgentEventType {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::Generic,
            2 => Self::AgentStarted,
            3 => Self::EndpointRegenerateSuccess,
            4 => Self::EndpointRegenerateFailure,
            5 => Self::PolicyUpdated,
            6 => Self::PolicyDeleted,
            7 => Self::EndpointCreated,
            8 => Self::EndpointDeleted,
            9 => Self::IpcacheUpserted,
            10 => Self::IpcacheDeleted,
            11 => Self::ServiceUpserted,
            12 => Self::ServiceDeleted,
            _ => return None,
        })
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::Generic => 1,
            Self::AgentStarted => 2,
            Self::EndpointRegenerateSuccess => 3,
            Self::EndpointRegenerateFailure => 4,
            Self::PolicyUpdated => 5,
            Self::PolicyDeleted => 6,
            Self::EndpointCreated => 7,
            Self::EndpointDeleted => 8,
            Self::IpcacheUpserted => 9,
            Self::IpcacheDeleted => 10,
            Self::ServiceUpserted => 11,
            Self::ServiceDeleted => 12,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::AgentStarted => "agent-started",
            Self::EndpointRegenerateSuccess => "endpoint-regenerate-success",
            Self::EndpointRegenerateFailure => "endpoint-regenerate-failure",
            Self::PolicyUpdated => "policy-updated",
            Self::PolicyDeleted => "policy-deleted",
            Self::EndpointCreated => "endpoint-created",
            Self::EndpointDeleted => "endpoint-deleted",
            Self::IpcacheUpserted => "ipcache-upserted",
            Self::IpcacheDeleted => "ipcache-deleted",
            Self::ServiceUpserted => "service-upserted",
            Self::ServiceDeleted => "service-deleted",
        }
    }
}

impl fmt::Display for AgentEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A decoded agent event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentNotification {
    pub event_type: AgentEventType,
    pub notification: Notification,
}

impl AgentNotification {
    pub fn agent_start(&self) -> Option<&TimeNotification> {
        match &self.notification {
            Notification::AgentStart(n) => Some(n),
            _ => None,
        }
    }

    pub fn ipcache_update(&self) -> Option<&IpCacheNotification> {
        match &self.notification {
            Notification::IpcacheUpdate(n) => Some(n),
            _ => None,
        }
    }

    pub fn service_delete(&self) -> Option<&ServiceDeleteNotification> {
        match &self.notification {
            Notification::ServiceDelete(n) => Some(n),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Notification {
    Generic(String),
    AgentStart(TimeNotification),
    PolicyUpdate(PolicyUpdateNotification),
    EndpointRegenerate(EndpointRegenNotification),
    EndpointUpdate(EndpointUpdateNotification),
    IpcacheUpdate(IpCacheNotification),
    ServiceUpsert(ServiceUpsertNotification),
    ServiceDelete(ServiceDeleteNotification),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeNotification {
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyUpdateNotification {
    #[serde(default)]
    pub labels: Vec<String>,
    pub revision: u64,
    #[serde(default)]
    pub rule_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRegenNotification {
    pub id: u64,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointUpdateNotification {
    pub id: u64,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub pod_name: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpCacheNotification {
    pub cidr: String,
    pub identity: u32,
    #[serde(default)]
    pub old_identity: Option<u32>,
    #[serde(default)]
    pub host_ip: String,
    #[serde(default)]
    pub old_host_ip: String,
    #[serde(default)]
    pub encrypt_key: u32,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub pod_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceUpsertNotification {
    pub id: u32,
    pub frontend_address: String,
    #[serde(default)]
    pub backend_addresses: Vec<String>,
    #[serde(default)]
    pub service_type: String,
    #[serde(default)]
    pub traffic_policy: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDeleteNotification {
    pub id: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LostEventSource {
    #[default]
    Unknown,
    /// The dataplane's per-CPU perf ring overflowed.
    PerfEventRingBuffer,
    /// A reader fell behind and the history buffer overwrote unread entries.
    HistoryRingBuffer,
}

/// Events lost before they could be observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LostEventRecord {
    pub source: LostEventSource,
    pub num_events_lost: u64,
    pub cpu: Option<u32>,
}
