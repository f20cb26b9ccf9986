//! Bounded in-memory history of decoded events
//!
//! A fixed-capacity ring with one writer (the ingestion loop) and any number of
//! readers. Readers never hold references into the ring; each keeps a
//! [`Cursor`] with the last sequence number it consumed and recomputes the slot
//! to read on every call.
//!
//! Entries are published only after their slot is fully written, so a reader
//! that asks for everything right after an append sees that append. A reader
//! that falls more than `capacity` entries behind is moved forward to the
//! oldest retained entry and told how many it missed.

pub mod follow;
pub mod ring;

pub use follow::Follower;
pub use ring::{Cursor, Read, ReadFrom, Ring, RingWriter};

use crate::flow::{AgentNotification, Flow, LostEventRecord};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Largest history capacity accepted by the configuration.
pub const MAX_CAPACITY: usize = (1 << 16) - 1;

/// Unit stored in the ring.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// Assigned by [`RingWriter::append`], strictly increasing.
    pub sequence: u64,
    pub time: DateTime<Utc>,
    pub node_name: String,
    pub kind: EntryKind,
}

#[derive(Debug, Clone)]
pub enum EntryKind {
    Flow(Arc<Flow>),
    Agent(Arc<AgentNotification>),
    Lost(LostEventRecord),
}

impl HistoryEntry {
    pub fn new(time: DateTime<Utc>, node_name: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            sequence: 0,
            time,
            node_name: node_name.into(),
            kind,
        }
    }

    pub fn flow(&self) -> Option<&Arc<Flow>> {
        match &self.kind {
            EntryKind::Flow(flow) => Some(flow),
            _ => None,
        }
    }

    pub fn agent(&self) -> Option<&Arc<AgentNotification>> {
        match &self.kind {
            EntryKind::Agent(notification) => Some(notification),
            _ => None,
        }
    }

    pub fn lost(&self) -> Option<&LostEventRecord> {
        match &self.kind {
            EntryKind::Lost(record) => Some(record),
            _ => None,
        }
    }
}
