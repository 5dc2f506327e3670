//! Process-wide, lazily refreshed availability state for vector backends.
//!
//! Entries expire after a TTL; an expired or missing entry makes the caller
//! probe the backend again. Updates are last-write-wins and the lock is
//! never held across an await.

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use support_observability::log_cache;

/// Time source for expiry decisions
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = *now + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Available,
    Unavailable,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HealthEntry {
    pub state: HealthState,
    pub checked_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HealthEntry {
    pub fn is_available(&self) -> bool {
        self.state == HealthState::Available
    }
}

pub struct BackendHealthCache {
    entries: RwLock<HashMap<String, HealthEntry>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl BackendHealthCache {
    pub fn new(ttl: std::time::Duration, clock: Arc<dyn Clock>) -> Self {
        let ttl = Duration::from_std(ttl).unwrap_or_else(|_| Duration::seconds(30));
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    pub fn with_system_clock(ttl: std::time::Duration) -> Self {
        Self::new(ttl, Arc::new(SystemClock))
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Fresh entry for `backend`, or `None` when missing or expired.
    pub fn get(&self, backend: &str) -> Option<HealthEntry> {
        let now = self.clock.now();
        let entries = self.entries.read();

        match entries.get(backend) {
            Some(entry) if now - entry.checked_at < self.ttl => {
                log_cache!(hit, backend);
                Some(entry.clone())
            }
            _ => {
                log_cache!(miss, backend);
                None
            }
        }
    }

    /// Last recorded entry regardless of age.
    pub fn last_known(&self, backend: &str) -> Option<HealthEntry> {
        self.entries.read().get(backend).cloned()
    }

    pub fn record(&self, backend: &str, state: HealthState, detail: Option<String>) -> HealthEntry {
        let entry = HealthEntry {
            state,
            checked_at: self.clock.now(),
            detail,
        };
        self.entries.write().insert(backend.to_string(), entry.clone());
        log_cache!(set, backend);
        entry
    }

    pub fn mark_available(&self, backend: &str) -> HealthEntry {
        self.record(backend, HealthState::Available, None)
    }

    pub fn mark_unavailable(&self, backend: &str, detail: impl Into<String>) -> HealthEntry {
        self.record(backend, HealthState::Unavailable, Some(detail.into()))
    }
}
