//! Blocking reads that wait for the writer.

use super::ring::{Cursor, Read, Ring};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// A reader that waits for new entries once it has caught up.
///
/// Subscribes to append notifications before its first read, so an append
/// that lands between "caught up" and "start waiting" still wakes it.
pub struct Follower {
    ring: Arc<Ring>,
    cursor: Cursor,
    changes: watch::Receiver<u64>,
}

impl Ring {
    /// Follow the ring starting at the oldest retained entry.
    pub fn follow(self: &Arc<Self>) -> Follower {
        self.follow_from(self.oldest_cursor())
    }

    pub fn follow_from(self: &Arc<Self>, cursor: Cursor) -> Follower {
        Follower {
            changes: self.subscribe(),
            ring: Arc::clone(self),
            cursor,
        }
    }
}

impl Follower {
    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// Next entry if one is already available.
    pub fn try_next(&mut self) -> Option<Read> {
        self.ring.read_next(&mut self.cursor)
    }

    /// Next entry, waiting for the writer if needed. `None` once `token` is
    /// cancelled.
    pub async fn next(&mut self, token: &CancellationToken) -> Option<Read> {
        loop {
            if token.is_cancelled() {
                return None;
            }
            if let Some(read) = self.ring.read_next(&mut self.cursor) {
                return Some(read);
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => return None,
                changed = self.changes.changed() => {
                    if changed.is_err() {
                        // Writer side is gone for good; nothing more will arrive.
                        token.cancelled().await;
                        return None;
                    }
                }
            }
        }
    }
}
