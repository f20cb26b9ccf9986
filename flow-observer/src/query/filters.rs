//! Time windows and allow/deny flow filters.

use crate::flow::{Flow, Protocol, Verdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Inclusive `[since, until]` window; open on a missing side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn new(since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        Self { since, until }
    }

    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        self.since.map_or(true, |since| time >= since)
            && self.until.map_or(true, |until| time <= until)
    }
}

/// Criteria a flow must meet. Empty fields match anything; a non-empty field
/// matches if the flow's value is one of the listed values. All fields must
/// match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowFilter {
    pub source_ip: Vec<IpAddr>,
    pub destination_ip: Vec<IpAddr>,
    pub source_port: Vec<u16>,
    pub destination_port: Vec<u16>,
    pub protocol: Vec<Protocol>,
    pub verdict: Vec<Verdict>,
    pub node_name: Vec<String>,
}

impl FlowFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source_ip(mut self, ip: IpAddr) -> Self {
        self.source_ip.push(ip);
        self
    }

    pub fn with_destination_ip(mut self, ip: IpAddr) -> Self {
        self.destination_ip.push(ip);
        self
    }

    pub fn with_source_port(mut self, port: u16) -> Self {
        self.source_port.push(port);
        self
    }

    pub fn with_destination_port(mut self, port: u16) -> Self {
        self.destination_port.push(port);
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol.push(protocol);
        self
    }

    pub fn with_verdict(mut self, verdict: Verdict) -> Self {
        self.verdict.push(verdict);
        self
    }

    pub fn with_node_name(mut self, node_name: impl Into<String>) -> Self {
        self.node_name.push(node_name.into());
        self
    }

    pub fn matches(&self, flow: &Flow) -> bool {
        let ip = flow.ip.as_ref();
        any_of(&self.source_ip, ip.map(|ip| ip.source))
            && any_of(&self.destination_ip, ip.map(|ip| ip.destination))
            && any_of(&self.source_port, flow.source_port())
            && any_of(&self.destination_port, flow.destination_port())
            && any_of(&self.protocol, flow.protocol())
            && any_of(&self.verdict, Some(flow.verdict))
            && (self.node_name.is_empty() || self.node_name.contains(&flow.node_name))
    }
}

fn any_of<T: PartialEq>(allowed: &[T], value: Option<T>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    value.map_or(false, |value| allowed.contains(&value))
}

/// Whitelist and blacklist of one query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowFilterSet {
    whitelist: Vec<FlowFilter>,
    blacklist: Vec<FlowFilter>,
}

impl FlowFilterSet {
    pub fn new(whitelist: Vec<FlowFilter>, blacklist: Vec<FlowFilter>) -> Self {
        Self {
            whitelist,
            blacklist,
        }
    }

    /// A flow passes when any whitelist filter matches (or there are none) and
    /// no blacklist filter does.
    pub fn allows(&self, flow: &Flow) -> bool {
        let whitelisted =
            self.whitelist.is_empty() || self.whitelist.iter().any(|filter| filter.matches(flow));
        whitelisted && !self.blacklist.iter().any(|filter| filter.matches(flow))
    }
}
