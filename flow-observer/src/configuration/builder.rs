//! Configuration Builder
//!
//! Builds [`ObserverOptions`] from multiple sources. Later sources override
//! earlier ones key by key.

use super::{Backpressure, DaemonHandle, ObserverOptions, ObserverSettings, SettingsFile};
use crate::errors::{HookError, ObserverError};
use crate::events::MonitorEvent;
use crate::flow::Flow;
use crate::hooks::{Control, HookSet};
use crate::query::{Context, GetFlowsRequest};
use crate::server::LocalObserverServer;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

pub const ENV_MAX_FLOWS: &str = "FLOW_OBSERVER_MAX_FLOWS";
pub const ENV_MONITOR_BUFFER_SIZE: &str = "FLOW_OBSERVER_MONITOR_BUFFER_SIZE";
pub const ENV_BACKPRESSURE: &str = "FLOW_OBSERVER_BACKPRESSURE";

#[derive(Debug, Default)]
pub struct ObserverOptionsBuilder {
    settings: ObserverSettings,
    hooks: HookSet,
    daemon: Option<DaemonHandle>,
    config_file: Option<PathBuf>,
}

impl ObserverOptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_flows(mut self, max_flows: usize) -> Self {
        self.settings.max_flows = max_flows;
        self
    }

    pub fn monitor_buffer_size(mut self, size: usize) -> Self {
        self.settings.monitor_buffer_size = size;
        self
    }

    pub fn backpressure(mut self, backpressure: Backpressure) -> Self {
        self.settings.backpressure = backpressure;
        self
    }

    pub fn daemon(mut self, daemon: DaemonHandle) -> Self {
        self.daemon = Some(daemon);
        self
    }

    /// Replace every registered hook with `hooks`.
    pub fn hooks(mut self, hooks: HookSet) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn on_server_init<F>(mut self, hook: F) -> Self
    where
        F: Fn(&LocalObserverServer) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.hooks.add_server_init(Arc::new(hook));
        self
    }

    pub fn on_monitor_event<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Context, &MonitorEvent) -> Result<Control, HookError> + Send + Sync + 'static,
    {
        self.hooks.add_monitor_event(Arc::new(hook));
        self
    }

    pub fn on_decoded_flow<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Context, &Flow) -> Result<Control, HookError> + Send + Sync + 'static,
    {
        self.hooks.add_decoded_flow(Arc::new(hook));
        self
    }

    pub fn on_flow_delivery<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Context, &Flow) -> Result<Control, HookError> + Send + Sync + 'static,
    {
        self.hooks.add_flow_delivery(Arc::new(hook));
        self
    }

    pub fn on_get_flows<F>(mut self, hook: F) -> Self
    where
        F: Fn(Context, &GetFlowsRequest) -> Result<Context, HookError> + Send + Sync + 'static,
    {
        self.hooks.add_get_flows(Arc::new(hook));
        self
    }

    /// Configure from a YAML, JSON or TOML file
    pub fn from_config_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ObserverError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ObserverError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        // Auto-detect format by extension or content
        let mut builder = match path.extension().and_then(|s| s.to_str()) {
            Some("json") => self.from_json_str(&content)?,
            Some("toml") => self.from_toml_str(&content)?,
            Some("yaml") | Some("yml") => self.from_yaml_str(&content)?,
            _ if content.trim_start().starts_with('{') => self.from_json_str(&content)?,
            _ => self.from_yaml_str(&content)?,
        };

        debug!("Loaded observer settings from {}", path.display());
        builder.config_file = Some(path.to_path_buf());
        Ok(builder)
    }

    pub fn from_yaml_str(mut self, yaml: &str) -> Result<Self, ObserverError> {
        let file: SettingsFile = serde_yaml::from_str(yaml)
            .map_err(|e| ObserverError::config(format!("Failed to parse YAML config: {}", e)))?;
        file.apply_to(&mut self.settings);
        Ok(self)
    }

    pub fn from_json_str(mut self, json: &str) -> Result<Self, ObserverError> {
        let file: SettingsFile = serde_json::from_str(json)
            .map_err(|e| ObserverError::config(format!("Failed to parse JSON config: {}", e)))?;
        file.apply_to(&mut self.settings);
        Ok(self)
    }

    pub fn from_toml_str(mut self, content: &str) -> Result<Self, ObserverError> {
        let file: SettingsFile = toml::from_str(content)
            .map_err(|e| ObserverError::config(format!("Failed to parse TOML config: {}", e)))?;
        file.apply_to(&mut self.settings);
        Ok(self)
    }

    /// Configure from `FLOW_OBSERVER_*` environment variables
    pub fn from_environment(self) -> Result<Self, ObserverError> {
        self.from_env_source(|name| std::env::var(name).ok())
    }

    /// Configure from variables looked up through `lookup`.
    pub fn from_env_source<F>(mut self, lookup: F) -> Result<Self, ObserverError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_MAX_FLOWS) {
            self.settings.max_flows = parse_count(ENV_MAX_FLOWS, &value)?;
        }
        if let Some(value) = lookup(ENV_MONITOR_BUFFER_SIZE) {
            self.settings.monitor_buffer_size = parse_count(ENV_MONITOR_BUFFER_SIZE, &value)?;
        }
        if let Some(value) = lookup(ENV_BACKPRESSURE) {
            self.settings.backpressure = Backpressure::from_str(&value)?;
        }
        Ok(self)
    }

    pub fn build(self) -> Result<ObserverOptions, ObserverError> {
        let options = ObserverOptions {
            settings: self.settings,
            hooks: Arc::new(self.hooks),
            daemon: self.daemon,
            config_file: self.config_file,
        };

        options.validate()?;
        Ok(options)
    }
}

fn parse_count(name: &str, value: &str) -> Result<usize, ObserverError> {
    value
        .trim()
        .parse()
        .map_err(|_| ObserverError::config(format!("Invalid value for {}: {}", name, value)))
}
