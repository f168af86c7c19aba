//! Process-local table store for dry runs and tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::TableStore;
use crate::error::StorageError;
use crate::normalizer::{EntityKey, EntityValue, NormalizedEntity};

type Rows = BTreeMap<EntityKey, BTreeMap<String, EntityValue>>;

/// Honours create/upsert/lookup semantics and counts every call. Faults can
/// be scripted for the next N creates or lookups.
#[derive(Debug, Default)]
pub struct MemoryTableStore {
    rows: Mutex<Rows>,
    tables: Mutex<HashSet<String>>,
    create_faults: Mutex<VecDeque<StorageError>>,
    exists_faults: Mutex<VecDeque<StorageError>>,
    always_conflict_on_create: AtomicBool,
    latency: Mutex<Duration>,
    create_calls: AtomicUsize,
    upsert_calls: AtomicUsize,
    exists_calls: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds each call's simulated I/O time.
    pub fn with_latency(self, latency: Duration) -> Self {
        *lock(&self.latency) = latency;
        self
    }

    /// Places a row without counting it as a write.
    pub fn seed(&self, entity: &NormalizedEntity) {
        lock(&self.rows).insert(entity.key(), entity.fields.clone());
    }

    pub fn fail_next_creates(&self, count: usize, error: StorageError) {
        lock(&self.create_faults).extend(std::iter::repeat_n(error, count));
    }

    pub fn fail_next_lookups(&self, count: usize, error: StorageError) {
        lock(&self.exists_faults).extend(std::iter::repeat_n(error, count));
    }

    pub fn set_always_conflict_on_create(&self, enabled: bool) {
        self.always_conflict_on_create.store(enabled, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.create_calls() + self.upsert_calls()
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        lock(&self.rows).contains_key(key)
    }

    pub fn row_count(&self, table: &str) -> usize {
        lock(&self.rows).keys().filter(|key| key.table == table).count()
    }

    pub fn total_rows(&self) -> usize {
        lock(&self.rows).len()
    }

    pub fn fields(&self, key: &EntityKey) -> Option<BTreeMap<String, EntityValue>> {
        lock(&self.rows).get(key).cloned()
    }

    pub fn has_table(&self, table: &str) -> bool {
        lock(&self.tables).contains(table)
    }

    async fn simulate_io(&self) {
        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn ensure_table(&self, table: &str) -> Result<(), StorageError> {
        lock(&self.tables).insert(table.to_string());
        Ok(())
    }

    async fn create(&self, entity: &NormalizedEntity) -> Result<(), StorageError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_io().await;

        if let Some(error) = lock(&self.create_faults).pop_front() {
            return Err(error);
        }

        let conflict = || StorageError::Conflict {
            table: entity.table_name.clone(),
            partition_key: entity.partition_key.clone(),
            row_key: entity.row_key.clone(),
        };
        if self.always_conflict_on_create.load(Ordering::SeqCst) {
            return Err(conflict());
        }

        let mut rows = lock(&self.rows);
        if rows.contains_key(&entity.key()) {
            return Err(conflict());
        }
        rows.insert(entity.key(), entity.fields.clone());
        Ok(())
    }

    async fn upsert(&self, entity: &NormalizedEntity) -> Result<(), StorageError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_io().await;
        lock(&self.rows).insert(entity.key(), entity.fields.clone());
        Ok(())
    }

    async fn exists(&self, key: &EntityKey) -> Result<bool, StorageError> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_io().await;

        if let Some(error) = lock(&self.exists_faults).pop_front() {
            return Err(error);
        }
        Ok(self.contains(key))
    }
}
