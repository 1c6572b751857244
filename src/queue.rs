//! Pending-response queue
//!
//! Holds outbound requests that are waiting for a correlated reply, in the
//! order they were sent. Every operation takes the lock once, so a scan and
//! the removal of the matched entry happen atomically: two concurrent
//! dispatches can never both claim the same entry.

use crate::matcher::Matcher;

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// A request waiting for its reply
pub(crate) struct PendingEntry<T> {
    pub id: Uuid,
    pub request: Bytes,
    pub waiter: T,
    expires_at: Option<Instant>,
}

impl<T> PendingEntry<T> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Ordered queue of pending requests; insertion order is send order
pub(crate) struct PendingQueue<T> {
    entries: Mutex<VecDeque<PendingEntry<T>>>,
}

impl<T> PendingQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a request and return the id that identifies its entry
    pub fn push(&self, request: Bytes, waiter: T, ttl: Option<Duration>) -> Uuid {
        let id = Uuid::new_v4();
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.lock().push_back(PendingEntry {
            id,
            request,
            waiter,
            expires_at,
        });
        id
    }

    /// Remove and return the earliest-sent entry that `inbound` answers.
    ///
    /// Expired entries are dropped first and can never match.
    pub fn take_match(&self, inbound: &[u8], matcher: &dyn Matcher) -> Option<PendingEntry<T>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|entry| !entry.is_expired(now));

        let index = entries
            .iter()
            .position(|entry| matcher.matches(inbound, &entry.request))?;
        entries.remove(index)
    }

    /// Remove an entry by id. Returns false if it was already gone or expired.
    pub fn remove(&self, id: Uuid) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|entry| !entry.is_expired(now));
        match entries.iter().position(|entry| entry.id == id) {
            Some(index) => entries.remove(index).is_some(),
            None => false,
        }
    }

    /// Whether a live, unexpired entry with `id` is queued
    pub fn contains(&self, id: Uuid) -> bool {
        let now = Instant::now();
        self.entries
            .lock()
            .iter()
            .any(|entry| entry.id == id && !entry.is_expired(now))
    }

    /// Drop every entry, returning how many were dropped
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let dropped = entries.len();
        entries.clear();
        dropped
    }

    /// Drop every expired entry, returning how many were dropped
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
