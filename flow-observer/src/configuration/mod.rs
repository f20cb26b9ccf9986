//! Observer configuration
//!
//! Options are assembled once, through [`ObserverOptions::builder`], from any
//! mix of fluent setters, configuration files (YAML, JSON or TOML) and
//! `FLOW_OBSERVER_*` environment variables. `build()` validates the result;
//! the options never change after the server is constructed.
//!
//! ```rust
//! use flow_observer::configuration::{Backpressure, ObserverOptions};
//!
//! let options = ObserverOptions::builder()
//!     .max_flows(1023)
//!     .backpressure(Backpressure::Reject)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(options.max_flows(), 1023);
//! ```

pub mod builder;
pub mod types;
pub mod validation;

pub use builder::{ObserverOptionsBuilder, ENV_BACKPRESSURE, ENV_MAX_FLOWS, ENV_MONITOR_BUFFER_SIZE};
pub use types::*;

use crate::errors::ObserverError;
use crate::hooks::HookSet;
use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Opaque handle to the embedding agent, handed to hooks untouched.
pub type DaemonHandle = Arc<dyn Any + Send + Sync>;

#[derive(Clone, Default)]
pub struct ObserverOptions {
    pub settings: ObserverSettings,
    pub hooks: Arc<HookSet>,
    pub daemon: Option<DaemonHandle>,
    /// File the settings were loaded from, if any.
    pub config_file: Option<PathBuf>,
}

impl ObserverOptions {
    pub fn builder() -> ObserverOptionsBuilder {
        ObserverOptionsBuilder::new()
    }

    pub fn validate(&self) -> Result<(), ObserverError> {
        self.settings.validate()
    }

    pub fn max_flows(&self) -> usize {
        self.settings.max_flows
    }

    pub fn monitor_buffer_size(&self) -> usize {
        self.settings.monitor_buffer_size
    }

    pub fn backpressure(&self) -> Backpressure {
        self.settings.backpressure
    }

    pub fn hooks(&self) -> &Arc<HookSet> {
        &self.hooks
    }

    pub fn daemon(&self) -> Option<&DaemonHandle> {
        self.daemon.as_ref()
    }

    /// The daemon handle, if one was given and it is a `T`.
    pub fn daemon_as<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.daemon.as_ref()?.downcast_ref::<T>()
    }

    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }
}

impl std::fmt::Debug for ObserverOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverOptions")
            .field("settings", &self.settings)
            .field("hooks", &self.hooks)
            .field("daemon", &self.daemon.is_some())
            .field("config_file", &self.config_file)
            .finish()
    }
}
