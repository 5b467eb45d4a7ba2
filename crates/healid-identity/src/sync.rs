//! Remote record synchronizer: answers "does patient X exist" from the
//! cache, the local store or the remote service, in that order, and
//! backfills the local store from remote hits.

use crate::cache::IdentityCache;
use crate::clock::Clock;
use crate::error::IdentityError;
use crate::patient::PatientId;
use crate::remote::{NewPatient, RemoteRecords};
use crate::store::RecordStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Answer to an existence query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub exists: bool,
    /// Last-update timestamp when the patient exists, otherwise why not.
    pub detail: String,
}

impl Resolution {
    fn found(detail: impl Into<String>) -> Self {
        Self { exists: true, detail: detail.into() }
    }

    fn missing(detail: impl Into<String>) -> Self {
        Self { exists: false, detail: detail.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Registration {
    pub id: PatientId,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Display for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "patient [{}] stored at {}", self.id, self.updated_at.to_rfc3339())
    }
}

pub struct RecordSync {
    store: Arc<dyn RecordStore>,
    remote: Arc<dyn RemoteRecords>,
    cache: IdentityCache,
    clock: Arc<dyn Clock>,
}

impl RecordSync {
    pub fn new(
        store: Arc<dyn RecordStore>,
        remote: Arc<dyn RemoteRecords>,
        cache: IdentityCache,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, remote, cache, clock }
    }

    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    /// Resolve whether `id` exists. Negative answers are never cached.
    pub fn resolve_existence(&self, id: PatientId) -> Resolution {
        let now = self.clock.now();

        if let Some(entry) = self.cache.fresh(id, now) {
            return Resolution { exists: entry.exists, detail: entry.detail };
        }

        match self.store.find_record(id) {
            Ok(Some(record)) => {
                let detail = record.last_updated.to_rfc3339();
                self.cache.remember(id, detail.clone(), now);
                return Resolution::found(detail);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(patient = %id, error = %e, "record store lookup failed");
                return Resolution::missing(e.to_string());
            }
        }

        match self.remote.get_patient(id) {
            Ok(Some(_)) => {
                // Lazy backfill: the local store converges on the remote service
                if let Err(e) = self.store.upsert_record(id, now) {
                    tracing::warn!(patient = %id, error = %e, "backfill from remote record failed");
                } else {
                    tracing::info!(patient = %id, "backfilled patient from remote record");
                }
                let detail = now.to_rfc3339();
                self.cache.remember(id, detail.clone(), now);
                Resolution::found(detail)
            }
            Ok(None) => Resolution::missing("not found"),
            Err(e) => {
                tracing::warn!(patient = %id, error = %e, "remote lookup failed, treating as not found");
                Resolution::missing("not found")
            }
        }
    }

    /// Insert or refresh the local record; the cache is always overwritten.
    pub fn register_or_update(&self, id: PatientId) -> Result<Registration, IdentityError> {
        let now = self.clock.now();
        self.store.upsert_record(id, now)?;
        self.cache.remember(id, now.to_rfc3339(), now);
        tracing::debug!(patient = %id, "patient registered");
        Ok(Registration { id, updated_at: now })
    }

    /// Create the patient remotely, then register the assigned id locally.
    pub fn create_patient(&self, patient: &NewPatient) -> Result<Registration, IdentityError> {
        let id = self.remote.create_patient(patient)?;
        self.register_or_update(id)
    }

    /// Best-effort display name from the remote record.
    pub fn patient_name(&self, id: PatientId) -> Option<String> {
        match self.remote.get_patient(id) {
            Ok(found) => found.and_then(|p| p.name),
            Err(e) => {
                tracing::debug!(patient = %id, error = %e, "remote name lookup failed");
                None
            }
        }
    }

    pub fn forget(&self, id: PatientId) {
        self.cache.invalidate(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::patient::PatientRecord;
    use crate::remote::RemotePatient;
    use crate::store::SqliteRecordStore;
    use chrono::{Duration, TimeZone};
    use healid_core::Label;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Wraps the SQLite store and counts lookups; can be switched off.
    struct CountingStore {
        inner: SqliteRecordStore,
        finds: AtomicUsize,
        down: Mutex<bool>,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                inner: SqliteRecordStore::open_in_memory().unwrap(),
                finds: AtomicUsize::new(0),
                down: Mutex::new(false),
            }
        }

        fn check(&self) -> Result<(), IdentityError> {
            if *self.down.lock().unwrap() {
                return Err(IdentityError::StoreUnavailable("connection refused".into()));
            }
            Ok(())
        }
    }

    impl RecordStore for CountingStore {
        fn find_record(&self, id: PatientId) -> Result<Option<PatientRecord>, IdentityError> {
            self.finds.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            self.inner.find_record(id)
        }
        fn upsert_record(&self, id: PatientId, at: DateTime<Utc>) -> Result<(), IdentityError> {
            self.check()?;
            self.inner.upsert_record(id, at)
        }
        fn clear_all_labels(&self) -> Result<(), IdentityError> {
            self.inner.clear_all_labels()
        }
        fn set_label(&self, id: PatientId, label: Label) -> Result<(), IdentityError> {
            self.inner.set_label(id, label)
        }
        fn list_records(&self) -> Result<Vec<PatientRecord>, IdentityError> {
            self.inner.list_records()
        }
        fn allocate_sample_seq(&self, id: PatientId, at: DateTime<Utc>) -> Result<u32, IdentityError> {
            self.inner.allocate_sample_seq(id, at)
        }
        fn delete_record(&self, id: PatientId) -> Result<bool, IdentityError> {
            self.inner.delete_record(id)
        }
    }

    #[derive(Default)]
    struct FakeRemote {
        known: Mutex<HashSet<u32>>,
        lookups: AtomicUsize,
        unreachable: Mutex<bool>,
    }

    impl RemoteRecords for FakeRemote {
        fn get_patient(&self, id: PatientId) -> Result<Option<RemotePatient>, IdentityError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if *self.unreachable.lock().unwrap() {
                return Err(IdentityError::RemoteUnavailable("timed out".into()));
            }
            Ok(self
                .known
                .lock()
                .unwrap()
                .contains(&id.get())
                .then(|| RemotePatient { id, name: Some("Remote Person".into()) }))
        }

        fn create_patient(&self, _patient: &NewPatient) -> Result<PatientId, IdentityError> {
            let id = 500;
            self.known.lock().unwrap().insert(id);
            Ok(PatientId::new(id))
        }
    }

    struct Fixture {
        store: Arc<CountingStore>,
        remote: Arc<FakeRemote>,
        clock: Arc<ManualClock>,
        sync: RecordSync,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(CountingStore::new());
        let remote = Arc::new(FakeRemote::default());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()));
        let sync = RecordSync::new(
            store.clone(),
            remote.clone(),
            IdentityCache::new(Duration::seconds(300)),
            clock.clone(),
        );
        Fixture { store, remote, clock, sync }
    }

    #[test]
    fn test_unknown_patient_is_not_cached() {
        let f = fixture();
        let id = PatientId::new(11);

        let first = f.sync.resolve_existence(id);
        assert_eq!(first, Resolution::missing("not found"));
        assert!(f.sync.cache().is_empty());

        // Written straight to the store: visible at once, no TTL wait
        f.store.inner.upsert_record(id, f.clock.now()).unwrap();
        assert!(f.sync.resolve_existence(id).exists);
    }

    #[test]
    fn test_register_wins_over_cache() {
        let f = fixture();
        let id = PatientId::new(3);
        assert!(!f.sync.resolve_existence(id).exists);

        let reg = f.sync.register_or_update(id).unwrap();
        let finds_before = f.store.finds.load(Ordering::SeqCst);
        let res = f.sync.resolve_existence(id);
        assert!(res.exists);
        assert_eq!(res.detail, reg.updated_at.to_rfc3339());
        // Served from the cache
        assert_eq!(f.store.finds.load(Ordering::SeqCst), finds_before);
    }

    #[test]
    fn test_expired_entry_requeries_store() {
        let f = fixture();
        let id = PatientId::new(4);
        f.store.inner.upsert_record(id, f.clock.now()).unwrap();

        assert!(f.sync.resolve_existence(id).exists);
        assert!(f.sync.resolve_existence(id).exists);
        assert_eq!(f.store.finds.load(Ordering::SeqCst), 1);

        f.clock.advance(Duration::seconds(301));
        assert!(f.sync.resolve_existence(id).exists);
        assert_eq!(f.store.finds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_remote_hit_backfills_store() {
        let f = fixture();
        let id = PatientId::new(21);
        f.remote.known.lock().unwrap().insert(21);

        let res = f.sync.resolve_existence(id);
        assert!(res.exists);
        assert_eq!(res.detail, f.clock.now().to_rfc3339());
        assert!(f.store.inner.find_record(id).unwrap().is_some());

        // Second call comes from the cache, not the remote
        f.sync.resolve_existence(id);
        assert_eq!(f.remote.lookups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remote_outage_is_not_found_and_retried() {
        let f = fixture();
        let id = PatientId::new(22);
        f.remote.known.lock().unwrap().insert(22);
        *f.remote.unreachable.lock().unwrap() = true;

        assert!(!f.sync.resolve_existence(id).exists);

        *f.remote.unreachable.lock().unwrap() = false;
        assert!(f.sync.resolve_existence(id).exists);
    }

    #[test]
    fn test_store_outage_reports_diagnostic() {
        let f = fixture();
        *f.store.down.lock().unwrap() = true;

        let res = f.sync.resolve_existence(PatientId::new(1));
        assert!(!res.exists);
        assert!(res.detail.contains("connection refused"), "{}", res.detail);
        assert_eq!(f.remote.lookups.load(Ordering::SeqCst), 0);

        let err = f.sync.register_or_update(PatientId::new(1)).unwrap_err();
        assert!(matches!(err, IdentityError::StoreUnavailable(_)));
    }

    #[test]
    fn test_create_patient_registers_locally() {
        let f = fixture();
        let reg = f.sync.create_patient(&NewPatient::default()).unwrap();
        assert_eq!(reg.id, PatientId::new(500));
        assert!(f.store.inner.find_record(reg.id).unwrap().is_some());
        assert_eq!(f.sync.patient_name(reg.id).as_deref(), Some("Remote Person"));
    }
}
