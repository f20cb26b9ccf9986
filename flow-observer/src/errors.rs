//! Error types for flow-observer
//!
//! Each failure is terminal to the operation that produced it: a decode or
//! hook error drops one event, a delivery error ends one query, a
//! configuration error prevents the server from being built. Nothing here is
//! retried.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObserverError {
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Observer server already started")]
    AlreadyStarted,

    #[error("{stage} hook failed: {source}")]
    HookFailed {
        stage: HookStage,
        source: HookError,
    },

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("Query cancelled by caller")]
    Cancelled,

    #[error("Monitor event queue is closed")]
    QueueClosed,

    #[error("Monitor event queue is full")]
    QueueFull,
}

impl ObserverError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// True when a query ended because its sink signalled end of stream.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::Delivery(DeliveryError::EndOfStream))
    }
}

/// Pipeline stages at which hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookStage {
    ServerInit,
    MonitorEvent,
    DecodedFlow,
    FlowDelivery,
    GetFlows,
}

impl HookStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookStage::ServerInit => "on_server_init",
            HookStage::MonitorEvent => "on_monitor_event",
            HookStage::DecodedFlow => "on_decoded_flow",
            HookStage::FlowDelivery => "on_flow_delivery",
            HookStage::GetFlows => "on_get_flows",
        }
    }
}

impl std::fmt::Display for HookStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned by a hook. Wraps whatever the hook author had at hand.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct HookError(#[from] anyhow::Error);

impl HookError {
    pub fn msg(message: impl std::fmt::Display + std::fmt::Debug + Send + Sync + 'static) -> Self {
        Self(anyhow::Error::msg(message))
    }
}

/// Error reported by a response sink.
///
/// The query engine hands these back to the caller as they were produced.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("end of stream")]
    EndOfStream,

    #[error("response sink closed")]
    Closed,

    #[error("delivery failed: {0}")]
    Failed(anyhow::Error),
}

/// Failure to decode a raw monitor payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Empty buffer provided for event parsing")]
    EmptyBuffer,

    #[error("Unknown monitor message type: {0}")]
    UnknownMessageType(u8),

    #[error("{layer} header truncated: {len} bytes available, {required} required")]
    Truncated {
        layer: &'static str,
        len: usize,
        required: usize,
    },

    #[error("Unsupported IP version: {0}")]
    UnsupportedIpVersion(u8),

    #[error("Unknown agent notification kind: {0}")]
    UnknownNotification(u8),

    #[error("Agent event is not an agent notification (type {0})")]
    NotAnAgentEvent(u8),

    #[error("Malformed {kind} notification: {message}")]
    MalformedNotification { kind: &'static str, message: String },
}

pub type Result<T> = std::result::Result<T, ObserverError>;
