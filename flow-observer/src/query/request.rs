//! Query requests and the responses streamed back to callers.

use super::filters::{FlowFilter, FlowFilterSet, TimeWindow};
use crate::errors::{ObserverError, Result};
use crate::flow::{AgentNotification, Flow, LostEventRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetFlowsRequest {
    /// Flows to deliver before ending the query; 0 means no limit. Ignored
    /// when following.
    pub number: u64,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub follow: bool,
    pub whitelist: Vec<FlowFilter>,
    pub blacklist: Vec<FlowFilter>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetAgentEventsRequest {
    pub number: u64,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub follow: bool,
}

impl GetFlowsRequest {
    pub fn validate(&self) -> Result<()> {
        validate_window(self.follow, self.until)
    }

    pub fn time_window(&self) -> TimeWindow {
        TimeWindow::new(self.since, self.until)
    }

    pub fn filters(&self) -> FlowFilterSet {
        FlowFilterSet::new(self.whitelist.clone(), self.blacklist.clone())
    }

    pub(crate) fn limit(&self) -> Option<u64> {
        query_limit(self.follow, self.number)
    }
}

impl GetAgentEventsRequest {
    pub fn validate(&self) -> Result<()> {
        validate_window(self.follow, self.until)
    }

    pub fn time_window(&self) -> TimeWindow {
        TimeWindow::new(self.since, self.until)
    }

    pub(crate) fn limit(&self) -> Option<u64> {
        query_limit(self.follow, self.number)
    }
}

fn validate_window(follow: bool, until: Option<DateTime<Utc>>) -> Result<()> {
    if follow && until.is_some() {
        return Err(ObserverError::InvalidRequest {
            message: "follow cannot be combined with until".to_string(),
        });
    }
    Ok(())
}

fn query_limit(follow: bool, number: u64) -> Option<u64> {
    if follow || number == 0 {
        None
    } else {
        Some(number)
    }
}

/// Point-in-time counters of the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatusResponse {
    /// Events the ingestion loop has taken off the inbound queue.
    pub seen_flows: u64,
    /// Entries currently retained in history.
    pub num_flows: u64,
    /// History capacity.
    pub max_flows: u64,
    pub uptime: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetFlowsResponse {
    pub time: DateTime<Utc>,
    pub node_name: String,
    pub response: FlowResponse,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowResponse {
    Flow(Arc<Flow>),
    LostEvents(LostEventRecord),
}

impl GetFlowsResponse {
    pub fn flow(&self) -> Option<&Flow> {
        match &self.response {
            FlowResponse::Flow(flow) => Some(flow),
            FlowResponse::LostEvents(_) => None,
        }
    }

    pub fn lost_events(&self) -> Option<&LostEventRecord> {
        match &self.response {
            FlowResponse::LostEvents(record) => Some(record),
            FlowResponse::Flow(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetAgentEventsResponse {
    pub time: DateTime<Utc>,
    pub node_name: String,
    pub agent_event: Arc<AgentNotification>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn should_reject_follow_with_until() {
        let request = GetFlowsRequest {
            follow: true,
            until: Some(Utc::now()),
            ..Default::default()
        };

        assert_matches!(request.validate(), Err(ObserverError::InvalidRequest { .. }));
    }

    #[test]
    fn should_accept_follow_with_since() {
        let request = GetAgentEventsRequest {
            follow: true,
            since: Some(Utc::now()),
            ..Default::default()
        };

        assert!(request.validate().is_ok());
    }

    #[test]
    fn should_ignore_number_when_following() {
        let request = GetFlowsRequest {
            number: 10,
            follow: true,
            ..Default::default()
        };

        assert_eq!(request.limit(), None);
        assert_eq!(GetFlowsRequest::default().limit(), None);
        assert_eq!(
            GetFlowsRequest {
                number: 10,
                ..Default::default()
            }
            .limit(),
            Some(10)
        );
    }

    #[test]
    fn should_deserialize_partial_request() {
        let request: GetFlowsRequest =
            serde_json::from_str(r#"{"number": 5, "blacklist": [{"protocol": ["udp"]}]}"#)
                .unwrap();

        assert_eq!(request.number, 5);
        assert!(!request.follow);
        assert_eq!(request.blacklist.len(), 1);
    }
}
