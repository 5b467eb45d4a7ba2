//! Identity cache: time-bounded memory of positive "patient exists" answers.
//!
//! Entries expire after a fixed TTL; there is no size bound. Only positive
//! answers are ever stored.

use crate::patient::PatientId;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub exists: bool,
    pub detail: String,
    pub observed_at: DateTime<Utc>,
}

pub struct IdentityCache {
    entries: DashMap<PatientId, CacheEntry>,
    ttl: Duration,
}

impl IdentityCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The entry for `id` if it was observed less than one TTL before `now`.
    pub fn fresh(&self, id: PatientId, now: DateTime<Utc>) -> Option<CacheEntry> {
        let entry = self.entries.get(&id)?;
        (now - entry.observed_at < self.ttl).then(|| entry.value().clone())
    }

    /// Record that `id` exists, superseding any previous entry.
    pub fn remember(&self, id: PatientId, detail: impl Into<String>, now: DateTime<Utc>) {
        self.entries.insert(
            id,
            CacheEntry {
                exists: true,
                detail: detail.into(),
                observed_at: now,
            },
        );
    }

    pub fn invalidate(&self, id: PatientId) {
        self.entries.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
