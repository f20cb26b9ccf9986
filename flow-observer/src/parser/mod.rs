//! Payload decoding
//!
//! Turns raw perf event bytes into [`Flow`] records. The observer only depends
//! on the [`PayloadParser`] trait; [`L3L4Parser`] is the implementation for
//! trace and drop notifications.

pub mod agent;
pub mod getters;
pub mod packet;

pub use agent::decode_agent_event;
pub use getters::{
    DnsGetter, EndpointGetter, IdentityGetter, IpGetter, LinkGetter, NoopGetter, PodMetadata,
    Resolvers, ServiceGetter,
};

use crate::errors::ParseError;
use crate::flow::{Endpoint, EventType, Flow, NetworkInterface, Verdict};
use flow_observer_common::{message_type, TraceNotify, TRACE_NOTIFY_LEN};
use std::net::IpAddr;

/// Decodes the bytes of a perf event into a flow.
///
/// Time and node name are stamped by the caller from the monitor event.
pub trait PayloadParser: Send + Sync {
    fn decode(&self, data: &[u8]) -> Result<Flow, ParseError>;
}

/// Parser for trace and drop notifications carrying an Ethernet frame.
#[derive(Debug, Clone, Default)]
pub struct L3L4Parser {
    resolvers: Resolvers,
}

impl L3L4Parser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolvers(resolvers: Resolvers) -> Self {
        Self { resolvers }
    }

    pub fn resolvers(&self) -> &Resolvers {
        &self.resolvers
    }

    fn endpoint(&self, ip: IpAddr, identity: u32) -> Endpoint {
        let mut endpoint = self.resolvers.endpoints.endpoint_by_ip(ip).unwrap_or_else(|| {
            Endpoint {
                identity,
                labels: self.resolvers.identities.labels_of(identity).unwrap_or_default(),
                ..Default::default()
            }
        });
        if endpoint.pod_name.is_empty() {
            if let Some(pod) = self.resolvers.ips.pod_of(ip) {
                endpoint.namespace = pod.namespace;
                endpoint.pod_name = pod.pod_name;
            }
        }
        endpoint
    }

    fn enrich(&self, flow: &mut Flow, header: &TraceNotify) {
        if header.ifindex != 0 {
            flow.interface = Some(NetworkInterface {
                index: header.ifindex,
                name: self.resolvers.links.link_name(header.ifindex).unwrap_or_default(),
            });
        }

        let Some(ip) = flow.ip.clone() else {
            return;
        };
        let source = self.endpoint(ip.source, header.src_label);
        let destination = self.endpoint(ip.destination, header.dst_label);

        flow.source_names = self
            .resolvers
            .dns
            .names_of(destination.id, ip.source)
            .unwrap_or_default();
        flow.destination_names = self
            .resolvers
            .dns
            .names_of(source.id, ip.destination)
            .unwrap_or_default();

        if let (Some(source_port), Some(destination_port)) =
            (flow.source_port(), flow.destination_port())
        {
            flow.source_service = self.resolvers.services.service_by_addr(ip.source, source_port);
            flow.destination_service = self
                .resolvers
                .services
                .service_by_addr(ip.destination, destination_port);
        }

        flow.source = Some(source);
        flow.destination = Some(destination);
    }
}

impl PayloadParser for L3L4Parser {
    fn decode(&self, data: &[u8]) -> Result<Flow, ParseError> {
        let Some(&msg_type) = data.first() else {
            return Err(ParseError::EmptyBuffer);
        };
        if msg_type != message_type::TRACE && msg_type != message_type::DROP {
            return Err(ParseError::UnknownMessageType(msg_type));
        }

        let header = TraceNotify::from_bytes(data).map_err(|e| ParseError::Truncated {
            layer: "notification",
            len: e.len,
            required: TRACE_NOTIFY_LEN,
        })?;
        let captured = &data[TRACE_NOTIFY_LEN..];
        let captured = &captured[..captured.len().min(usize::from(header.cap_len))];
        let packet = packet::decode_packet(captured)?;

        let mut flow = Flow {
            ethernet: packet.ethernet,
            ip: packet.ip,
            l4: packet.l4,
            ..Default::default()
        };
        if header.is_drop() {
            flow.verdict = Verdict::Dropped;
            flow.drop_reason = header.reason;
            flow.event_type = EventType {
                kind: msg_type,
                sub_type: header.reason,
            };
        } else {
            flow.verdict = Verdict::Forwarded;
            flow.observation_point = Some(header.obs_point);
            flow.event_type = EventType {
                kind: msg_type,
                sub_type: header.obs_point,
            };
        }

        self.enrich(&mut flow, &header);
        Ok(flow)
    }
}
