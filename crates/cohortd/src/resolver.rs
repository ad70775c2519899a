//! Executor registry: the single source of truth mapping shapes and public
//! identifiers to live executors.
//!
//! Two tables under one lock. `executors` keys live executors by canonical
//! cardinality string; `keys_to_cardinalities` maps public identifiers back
//! to those strings. Invariant: every value in `keys_to_cardinalities` has a
//! matching `executors` entry.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::sync::{Arc, RwLock};

use cohort_contracts::Status;
use cohort_executor::{
    cardinalities_to_string, Executor, ExecutorFactory, ExecutorRequirements,
};

/// One live executor, shared by the registry and every client currently
/// holding its public identifier.
#[derive(Clone)]
pub struct ExecutorEntry {
    pub executor: Arc<dyn Executor>,
    /// Outstanding `get_executor` grants not yet matched by
    /// `dispose_executor`.
    pub remote_refcount: u64,
    /// The public identifier handed to clients.
    pub executor_key: String,
}

impl std::fmt::Debug for ExecutorEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorEntry")
            .field("executor_key", &self.executor_key)
            .field("remote_refcount", &self.remote_refcount)
            .finish()
    }
}

#[derive(Default)]
struct Tables {
    /// Monotonic; keeps identifiers unique across destroy/recreate cycles
    /// of the same cardinality string.
    executor_index: u64,
    executors: BTreeMap<String, ExecutorEntry>,
    keys_to_cardinalities: BTreeMap<String, String>,
}

pub struct ExecutorResolver {
    service_id: String,
    factory: ExecutorFactory,
    tables: RwLock<Tables>,
}

impl ExecutorResolver {
    pub fn new(service_id: impl Into<String>, factory: ExecutorFactory) -> Self {
        Self {
            service_id: service_id.into(),
            factory,
            tables: RwLock::new(Tables::default()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Create-or-reuse. Holding the write lock across both the lookup and
    /// the insert guarantees two concurrent calls for one shape observe a
    /// single executor.
    pub fn for_requirements(
        &self,
        requirements: &ExecutorRequirements,
    ) -> Result<ExecutorEntry, Status> {
        let cardinalities_string = cardinalities_to_string(&requirements.cardinalities);
        let mut tables = self.write();
        if let Some(entry) = tables.executors.get_mut(&cardinalities_string) {
            entry.remote_refcount += 1;
            return Ok(entry.clone());
        }

        // Construction failure propagates without registering anything.
        let executor = (self.factory)(&requirements.cardinalities).map_err(|status| {
            eprintln!("cohortd: failed to construct executor: {status}");
            status
        })?;

        let executor_key = format!(
            "{cardinalities_string}/{}/{}",
            self.service_id, tables.executor_index
        );
        tables.executor_index += 1;

        let entry = ExecutorEntry {
            executor,
            remote_refcount: 1,
            executor_key: executor_key.clone(),
        };
        tables
            .keys_to_cardinalities
            .insert(executor_key, cardinalities_string.clone());
        tables.executors.insert(cardinalities_string, entry.clone());
        Ok(entry)
    }

    /// Read-only lookup by public identifier.
    ///
    /// An unknown identifier is `FailedPrecondition`: retryable once the
    /// client re-acquires an identifier with a fresh `get_executor`. An
    /// identifier resolving to a cardinality string with no live entry is
    /// `Internal` and indicates a registry bug.
    pub fn for_id(&self, id: &str, op_label: &str) -> Result<ExecutorEntry, Status> {
        let tables = self.read();
        let cardinalities_string = tables.keys_to_cardinalities.get(id).ok_or_else(|| {
            Status::failed_precondition(format!(
                "error evaluating {op_label}: no executor found for id {id:?}"
            ))
        })?;
        match tables.executors.get(cardinalities_string) {
            Some(entry) => Ok(entry.clone()),
            None => Err(Status::internal(format!(
                "no executor found for cardinalities string {cardinalities_string:?}, \
                 referred to by executor id {id:?}"
            ))),
        }
    }

    /// Decrements the refcount; destroys the entry when it reaches zero.
    /// Unknown identifiers succeed without effect: disposal legitimately
    /// races with fault-triggered eviction.
    pub fn dispose_executor(&self, id: &str) -> Result<(), Status> {
        let should_destroy = {
            let mut tables = self.write();
            let Some(cardinalities_string) = tables.keys_to_cardinalities.get(id).cloned() else {
                return Ok(());
            };
            let Some(entry) = tables.executors.get_mut(&cardinalities_string) else {
                return Err(Status::internal(format!(
                    "no executor found for cardinalities string {cardinalities_string:?}, \
                     referred to by executor id {id:?}"
                )));
            };
            entry.remote_refcount = entry.remote_refcount.saturating_sub(1);
            entry.remote_refcount == 0
        };
        // Teardown of the underlying executor can be expensive; it happens
        // outside the lock used for the decrement.
        if should_destroy {
            self.destroy_executor(id);
        }
        Ok(())
    }

    /// Unconditionally removes both table entries for `id`. A no-op when
    /// already removed, so a refcount-zero destruction racing a fault
    /// eviction of the same id is harmless.
    pub fn destroy_executor(&self, id: &str) {
        let removed = {
            let mut tables = self.write();
            match tables.keys_to_cardinalities.remove(id) {
                Some(cardinalities_string) => tables.executors.remove(&cardinalities_string),
                None => {
                    let _ = writeln!(
                        std::io::stderr(),
                        "cohortd: attempted to double-destroy executor {id:?}"
                    );
                    None
                }
            }
        };
        // The last Arc may drop here, releasing the backend outside the lock.
        drop(removed);
    }

    /// Test and diagnostics hook: current refcount for an identifier, if
    /// the entry is live.
    pub fn refcount_for_id(&self, id: &str) -> Option<u64> {
        let tables = self.read();
        let cardinalities_string = tables.keys_to_cardinalities.get(id)?;
        tables
            .executors
            .get(cardinalities_string)
            .map(|entry| entry.remote_refcount)
    }
}
