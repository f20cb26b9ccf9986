//! Event Processing Module
//!
//! Producers push [`MonitorEvent`](crate::events::MonitorEvent)s through an
//! [`EventSender`] into a bounded queue; a single [`IngestionLoop`] task turns
//! them into history entries.

pub mod processor;
pub mod queue;

pub use processor::IngestionLoop;
pub use queue::{EventSender, Stopped};
