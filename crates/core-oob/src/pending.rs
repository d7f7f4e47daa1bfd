//! Request/response correlation.
//!
//! Each outbound request registers a single-slot waiter keyed by its
//! [`RequestId`]. A response, arriving on any task, is handed to the waiter
//! with [`PendingTable::deliver`]. Entries are removed by the first of:
//! delivery, the waiter's own timeout, the waiter being dropped, or
//! [`PendingTable::sweep_expired`] once the entry outlives its ttl.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::RequestId;

/// Lifetime of an unanswered entry before `sweep_expired` may reclaim it.
pub const DEFAULT_ENTRY_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum CorrelationError {
    #[error("request id {0} already has a pending waiter")]
    DuplicateRequestId(RequestId),

    #[error("no response within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug)]
struct PendingEntry {
    tx: oneshot::Sender<Vec<u8>>,
    expires: Instant,
    /// Distinguishes this registration from a later one under the same id
    gen: u64,
}

#[derive(Debug)]
struct Inner {
    entries: DashMap<RequestId, PendingEntry>,
    next_gen: AtomicU64,
    ttl: Duration,
}

/// Concurrent map of outstanding requests, shared by clone.
#[derive(Debug, Clone)]
pub struct PendingTable {
    inner: Arc<Inner>,
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingTable {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_ENTRY_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                next_gen: AtomicU64::new(1),
                ttl,
            }),
        }
    }

    /// Create the waiter for `id`.
    ///
    /// Fails while a live entry holds the id. An expired entry that has not
    /// been swept yet is replaced; its waiter then observes a timeout.
    pub fn register(&self, id: RequestId) -> Result<Waiter, CorrelationError> {
        self.register_for(id, Duration::ZERO)
    }

    /// Like [`register`](Self::register), but the entry stays live for at
    /// least `hold` even when that exceeds the table ttl.
    pub fn register_for(&self, id: RequestId, hold: Duration) -> Result<Waiter, CorrelationError> {
        let (tx, rx) = oneshot::channel();
        let now = Instant::now();
        let entry = PendingEntry {
            tx,
            expires: now + self.inner.ttl.max(hold),
            gen: self.inner.next_gen.fetch_add(1, Ordering::Relaxed),
        };
        let gen = entry.gen;

        match self.inner.entries.entry(id.clone()) {
            Entry::Occupied(mut slot) => {
                if slot.get().expires > now {
                    return Err(CorrelationError::DuplicateRequestId(id));
                }
                slot.insert(entry);
            }
            Entry::Vacant(slot) => {
                slot.insert(entry);
            }
        }
        trace!(request_id = %id, "pending entry registered");

        Ok(Waiter {
            id,
            gen,
            rx,
            table: self.clone(),
        })
    }

    /// Hand `payload` to the waiter for `id`.
    ///
    /// Returns true only if a live waiter accepted the payload. Unknown ids,
    /// expired entries, and waiters that already gave up all return false.
    pub fn deliver(&self, id: &RequestId, payload: Vec<u8>) -> bool {
        let Some((_, entry)) = self.inner.entries.remove(id) else {
            debug!(request_id = %id, "no pending waiter for response");
            return false;
        };
        if entry.expires <= Instant::now() {
            debug!(request_id = %id, "dropping response for expired entry");
            return false;
        }
        entry.tx.send(payload).is_ok()
    }

    /// Remove every entry past its ttl, returning how many were reclaimed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut reclaimed = 0;
        self.inner.entries.retain(|_, entry| {
            let live = entry.expires > now;
            if !live {
                reclaimed += 1;
            }
            live
        });
        if reclaimed > 0 {
            debug!(reclaimed, remaining = self.len(), "swept expired OOB entries");
        }
        reclaimed
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.inner.entries.contains_key(id)
    }

    fn release(&self, id: &RequestId, gen: u64) {
        self.inner.entries.remove_if(id, |_, entry| entry.gen == gen);
    }
}

/// Receiving half of one registration.
///
/// Dropping it removes the entry it created, and only that entry.
#[derive(Debug)]
pub struct Waiter {
    id: RequestId,
    gen: u64,
    rx: oneshot::Receiver<Vec<u8>>,
    table: PendingTable,
}

impl Waiter {
    pub fn request_id(&self) -> &RequestId {
        &self.id
    }

    /// Wait up to `timeout` for the payload.
    pub async fn wait(mut self, timeout: Duration) -> Result<Vec<u8>, CorrelationError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(payload)) => Ok(payload),
            // sender dropped: replaced, swept, or expired on delivery
            Ok(Err(_)) => Err(CorrelationError::Timeout(timeout)),
            Err(_) => {
                // After close() no send can succeed, so deliver() reports
                // true exactly when the payload is still in the channel.
                self.rx.close();
                self.table.release(&self.id, self.gen);
                self.rx
                    .try_recv()
                    .map_err(|_| CorrelationError::Timeout(timeout))
            }
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.table.release(&self.id, self.gen);
    }
}
