//! Fixed-capacity ring with a single writer and cursor-based readers.

use super::HistoryEntry;
use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Shared, read-only side of the history ring.
pub struct Ring {
    slots: Box<[ArcSwapOption<HistoryEntry>]>,
    /// Number of entries ever published; the next sequence number.
    written: AtomicU64,
    changes: watch::Sender<u64>,
}

/// The only handle allowed to append. Owned by the ingestion loop.
pub struct RingWriter {
    ring: Arc<Ring>,
    next: u64,
}

/// Outcome of a single read.
#[derive(Debug, Clone)]
pub enum Read {
    Entry(Arc<HistoryEntry>),
    /// The writer overwrote `missed` entries this reader had not consumed yet.
    Lapped { missed: u64 },
}

/// Per-reader position in the ring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    last: Option<u64>,
    missed: u64,
}

impl Cursor {
    /// A cursor positioned before the first entry ever written. Once the ring
    /// has wrapped, its first read reports a lap; use [`Ring::oldest_cursor`]
    /// to start at what is currently retained.
    pub fn oldest() -> Self {
        Self::default()
    }

    /// A cursor that resumes after `sequence`.
    pub fn after(sequence: u64) -> Self {
        Self {
            last: Some(sequence),
            missed: 0,
        }
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last
    }

    /// Entries skipped because the writer lapped this reader.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    fn next_sequence(&self) -> u64 {
        self.last.map_or(0, |last| last + 1)
    }
}

impl Ring {
    pub fn new(capacity: usize) -> (Arc<Ring>, RingWriter) {
        let (changes, _) = watch::channel(0);
        let ring = Arc::new(Ring {
            slots: (0..capacity).map(|_| ArcSwapOption::empty()).collect(),
            written: AtomicU64::new(0),
            changes,
        });
        let writer = RingWriter {
            ring: Arc::clone(&ring),
            next: 0,
        };
        (ring, writer)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of entries currently retained.
    pub fn len(&self) -> usize {
        let written = self.written.load(Ordering::Acquire);
        written.min(self.capacity() as u64) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of entries ever appended.
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Acquire)
    }

    /// A cursor positioned before the oldest entry retained right now.
    pub fn oldest_cursor(&self) -> Cursor {
        let written = self.written.load(Ordering::Acquire);
        match written.saturating_sub(self.capacity() as u64).checked_sub(1) {
            Some(last) => Cursor::after(last),
            None => Cursor::oldest(),
        }
    }

    /// Read the entry after `cursor`, advancing it. `None` once caught up.
    pub fn read_next(&self, cursor: &mut Cursor) -> Option<Read> {
        let capacity = self.capacity() as u64;
        loop {
            let written = self.written.load(Ordering::Acquire);
            let wanted = cursor.next_sequence();
            if wanted >= written {
                return None;
            }

            let oldest = written.saturating_sub(capacity);
            if wanted < oldest {
                let missed = oldest - wanted;
                cursor.last = Some(oldest - 1);
                cursor.missed += missed;
                return Some(Read::Lapped { missed });
            }

            match self.slots[(wanted % capacity) as usize].load_full() {
                Some(entry) if entry.sequence == wanted => {
                    cursor.last = Some(wanted);
                    return Some(Read::Entry(entry));
                }
                // Overwritten since `written` was loaded; the next pass sees the lap.
                _ => continue,
            }
        }
    }

    /// Lazily read entries after `cursor` that satisfy `predicate`, at most
    /// `max` of them. Entries rejected by the predicate still advance the cursor.
    pub fn read_from<'a, P>(
        &'a self,
        cursor: &'a mut Cursor,
        max: Option<usize>,
        predicate: P,
    ) -> ReadFrom<'a, P>
    where
        P: FnMut(&HistoryEntry) -> bool,
    {
        ReadFrom {
            ring: self,
            cursor,
            remaining: max,
            predicate,
        }
    }

    pub(super) fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }
}

impl std::fmt::Debug for Ring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ring")
            .field("capacity", &self.capacity())
            .field("written", &self.written())
            .finish()
    }
}

impl RingWriter {
    /// Append `entry`, overwriting the oldest one when full. Returns the
    /// assigned sequence number, or `None` when the ring has no capacity.
    pub fn append(&mut self, mut entry: HistoryEntry) -> Option<u64> {
        let capacity = self.ring.capacity() as u64;
        if capacity == 0 {
            return None;
        }

        let sequence = self.next;
        entry.sequence = sequence;
        self.ring.slots[(sequence % capacity) as usize].store(Some(Arc::new(entry)));

        // Publish only after the slot holds the new entry.
        self.ring.written.store(sequence + 1, Ordering::Release);
        self.ring.changes.send_replace(sequence + 1);
        self.next = sequence + 1;
        Some(sequence)
    }

    pub fn ring(&self) -> &Arc<Ring> {
        &self.ring
    }
}

/// Iterator returned by [`Ring::read_from`].
pub struct ReadFrom<'a, P> {
    ring: &'a Ring,
    cursor: &'a mut Cursor,
    remaining: Option<usize>,
    predicate: P,
}

impl<P> Iterator for ReadFrom<'_, P>
where
    P: FnMut(&HistoryEntry) -> bool,
{
    type Item = Read;

    fn next(&mut self) -> Option<Read> {
        if self.remaining == Some(0) {
            return None;
        }
        loop {
            match self.ring.read_next(self.cursor)? {
                Read::Entry(entry) => {
                    if !(self.predicate)(entry.as_ref()) {
                        continue;
                    }
                    if let Some(remaining) = self.remaining.as_mut() {
                        *remaining -= 1;
                    }
                    return Some(Read::Entry(entry));
                }
                lapped => return Some(lapped),
            }
        }
    }
}
