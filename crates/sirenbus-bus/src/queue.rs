//! Shared priority queue state
//!
//! The queue is plain data: it is loaded from a [`QueueStore`](crate::store::QueueStore),
//! mutated under the store's mutation mutex and written back. Nothing here
//! touches the store itself.

use crate::priority::PriorityClass;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One caller's claim on the bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityRequest {
    /// Opaque unique id of the claiming invocation
    pub token: String,
    /// Canonical class
    pub priority_class: PriorityClass,
    /// Numeric level (lower = more urgent)
    pub level: i32,
    /// First registration time, kept across refreshes
    pub enqueued_at: DateTime<Utc>,
    /// Absolute lease expiry
    pub expires_at: DateTime<Utc>,
    /// Set once the request reached the head and its callback started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granted_at: Option<DateTime<Utc>>,
}

impl PriorityRequest {
    /// Create a new waiting request
    #[must_use]
    pub fn new(
        token: impl Into<String>,
        priority_class: PriorityClass,
        enqueued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            token: token.into(),
            priority_class,
            level: priority_class.level(),
            enqueued_at,
            expires_at,
            granted_at: None,
        }
    }

    /// Whether the lease has elapsed at `now`
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether the request currently holds the bus
    #[must_use]
    pub fn is_granted(&self) -> bool {
        self.granted_at.is_some()
    }

    fn queue_order(&self, other: &Self) -> Ordering {
        // granted entries stay at the head until removed
        other
            .is_granted()
            .cmp(&self.is_granted())
            .then(self.level.cmp(&other.level))
            .then(self.enqueued_at.cmp(&other.enqueued_at))
            .then_with(|| self.token.cmp(&other.token))
    }
}

/// Ordered list of live requests
///
/// Absence of persisted state is equivalent to `QueueState::default()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueState {
    entries: Vec<PriorityRequest>,
}

impl QueueState {
    /// Wrap entries, restoring queue order
    #[must_use]
    pub fn from_entries(entries: Vec<PriorityRequest>) -> Self {
        let mut state = Self { entries };
        state.sort();
        state
    }

    /// Entries in queue order
    #[must_use]
    pub fn entries(&self) -> &[PriorityRequest] {
        &self.entries
    }

    /// Consume into entries
    #[must_use]
    pub fn into_entries(self) -> Vec<PriorityRequest> {
        self.entries
    }

    /// Number of entries, expired or not
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find an entry by token
    #[must_use]
    pub fn get(&self, token: &str) -> Option<&PriorityRequest> {
        self.entries.iter().find(|r| r.token == token)
    }

    /// Insert a request, or refresh the lease of an existing one.
    ///
    /// A refresh keeps the original `enqueued_at` and grant state so the
    /// caller does not lose its FIFO position.
    pub fn upsert(&mut self, request: PriorityRequest) {
        match self.entries.iter_mut().find(|r| r.token == request.token) {
            Some(existing) => {
                existing.expires_at = request.expires_at;
            }
            None => self.entries.push(request),
        }
        self.sort();
    }

    /// Drop every entry whose lease has elapsed. Returns how many were dropped.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|r| !r.is_expired(now));
        before - self.entries.len()
    }

    /// Remove an entry by token. Returns whether it was present.
    pub fn remove(&mut self, token: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|r| r.token != token);
        before != self.entries.len()
    }

    /// First entry whose lease is still valid
    #[must_use]
    pub fn head(&self, now: DateTime<Utc>) -> Option<&PriorityRequest> {
        self.entries.iter().find(|r| !r.is_expired(now))
    }

    /// Mark a request as granted and extend its lease
    pub fn grant(&mut self, token: &str, now: DateTime<Utc>, expires_at: DateTime<Utc>) -> bool {
        let granted = match self.entries.iter_mut().find(|r| r.token == token) {
            Some(entry) => {
                entry.granted_at = Some(now);
                entry.expires_at = expires_at;
                true
            }
            None => false,
        };
        self.sort();
        granted
    }

    /// Push out the lease of an existing entry. Returns whether it was present.
    pub fn extend_lease(&mut self, token: &str, expires_at: DateTime<Utc>) -> bool {
        match self.entries.iter_mut().find(|r| r.token == token) {
            Some(entry) => {
                entry.expires_at = expires_at;
                true
            }
            None => false,
        }
    }

    /// Furthest expiry among all entries (drives the persisted key TTL)
    #[must_use]
    pub fn furthest_expiry(&self) -> Option<DateTime<Utc>> {
        self.entries.iter().map(|r| r.expires_at).max()
    }

    fn sort(&mut self) {
        self.entries.sort_by(PriorityRequest::queue_order);
    }
}
