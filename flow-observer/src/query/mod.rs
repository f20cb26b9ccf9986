//! Query engine
//!
//! Flow and agent-event queries run against the shared history ring, each
//! with its own cursor. Responses are pushed into a caller-supplied
//! [`ResponseSink`]; any sink error ends the query and is returned unchanged.

pub mod context;
pub mod engine;
pub mod filters;
pub mod request;
pub mod sink;

pub use context::Context;
pub use engine::QueryEngine;
pub use filters::{FlowFilter, FlowFilterSet, TimeWindow};
pub use request::{
    FlowResponse, GetAgentEventsRequest, GetAgentEventsResponse, GetFlowsRequest,
    GetFlowsResponse, ServerStatusResponse,
};
pub use sink::{ChannelSink, ResponseSink};
