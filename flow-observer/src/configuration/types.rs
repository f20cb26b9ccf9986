//! Configuration type definitions

use crate::errors::ObserverError;
use serde::{Deserialize, Serialize};

/// Default history capacity.
pub const DEFAULT_MAX_FLOWS: usize = 4095;
/// Default inbound queue capacity.
pub const DEFAULT_MONITOR_BUFFER_SIZE: usize = 1024;

/// What a producer experiences when the inbound queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backpressure {
    /// Wait until the ingestion loop makes room.
    #[default]
    Block,
    /// Fail the send with `QueueFull`.
    Reject,
}

impl Backpressure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backpressure::Block => "block",
            Backpressure::Reject => "reject",
        }
    }
}

impl std::fmt::Display for Backpressure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Backpressure {
    type Err = ObserverError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(Backpressure::Block),
            "reject" => Ok(Backpressure::Reject),
            other => Err(ObserverError::config(format!(
                "Invalid backpressure mode: {} (expected block or reject)",
                other
            ))),
        }
    }
}

/// Plain settings of the observer, as loaded from files or the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserverSettings {
    /// History capacity; 0 disables history.
    pub max_flows: usize,
    /// Inbound queue capacity; 0 hands every event over synchronously.
    pub monitor_buffer_size: usize,
    pub backpressure: Backpressure,
}

impl Default for ObserverSettings {
    fn default() -> Self {
        Self {
            max_flows: DEFAULT_MAX_FLOWS,
            monitor_buffer_size: DEFAULT_MONITOR_BUFFER_SIZE,
            backpressure: Backpressure::default(),
        }
    }
}

/// Settings as they appear in a configuration file. Missing keys leave the
/// current value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsFile {
    pub max_flows: Option<usize>,
    pub monitor_buffer_size: Option<usize>,
    pub backpressure: Option<Backpressure>,
}

impl SettingsFile {
    pub fn apply_to(self, settings: &mut ObserverSettings) {
        if let Some(max_flows) = self.max_flows {
            settings.max_flows = max_flows;
        }
        if let Some(monitor_buffer_size) = self.monitor_buffer_size {
            settings.monitor_buffer_size = monitor_buffer_size;
        }
        if let Some(backpressure) = self.backpressure {
            settings.backpressure = backpressure;
        }
    }
}
