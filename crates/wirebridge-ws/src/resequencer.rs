//! Releases sequenced items in order.
//!
//! Each connection's reader stamps decoded frames with a sequence number
//! before handing them to the dispatcher. The [`Resequencer`] holds anything
//! that arrives ahead of a gap and releases contiguous runs as soon as the
//! gap fills, so the interceptor always sees frames in send order. Pings
//! answered out of order would otherwise produce pongs out of order.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{WsError, WsResult};

/// Default bound on items held while waiting for a gap to fill.
pub const DEFAULT_MAX_PENDING: usize = 1024;

/// Buffers out-of-order items and releases them in sequence order.
#[derive(Debug)]
pub struct Resequencer<T> {
    next: u64,
    pending: BTreeMap<u64, T>,
    max_pending: usize,
}

impl<T> Resequencer<T> {
    /// Create a resequencer expecting `first` as the next sequence number.
    pub fn new(first: u64, max_pending: usize) -> Self {
        Self {
            next: first,
            pending: BTreeMap::new(),
            max_pending,
        }
    }

    /// Sequence number that will be released next.
    pub fn next_expected(&self) -> u64 {
        self.next
    }

    /// Number of items held back.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Offer one item and return everything that is now releasable, in order.
    ///
    /// Items whose sequence number was already released, or is already
    /// held, are dropped. Fails when holding the item would exceed the bound.
    pub fn offer(&mut self, seq: u64, item: T) -> WsResult<Vec<T>> {
        if seq < self.next || self.pending.contains_key(&seq) {
            debug!(seq, next = self.next, "Dropping duplicate sequence number");
            return Ok(Vec::new());
        }

        if seq > self.next {
            if self.pending.len() >= self.max_pending {
                return Err(WsError::ResequenceOverflow {
                    expected: self.next,
                    pending: self.pending.len(),
                });
            }
            self.pending.insert(seq, item);
            return Ok(Vec::new());
        }

        let mut released = vec![item];
        self.next += 1;
        while let Some(item) = self.pending.remove(&self.next) {
            released.push(item);
            self.next += 1;
        }
        Ok(released)
    }
}

impl<T> Default for Resequencer<T> {
    fn default() -> Self {
        Self::new(0, DEFAULT_MAX_PENDING)
    }
}
