//! Process-wide execution resource cache.
//!
//! Stores one [`ExecutionArgsSet`](crate::plan::ExecutionArgsSet) per
//! (thread, partition) pair: an explicit `ThreadId -> PartitionId -> args`
//! registry with an explicit lifecycle, rather than a `thread_local!` keyed
//! by object address. Entries are created lazily on first execution and
//! evicted when the owning partition is dropped, so no cached binding can
//! outlive the compiled partition it was derived from.
//!
//! An args set is never handed to two threads: lookups key on the calling
//! thread's id, and eviction only drops entries. The per-entry mutex is
//! therefore uncontended during execution; it exists so the registry type is
//! `Send + Sync`.

use crate::plan::{ExecutionArgsSet, PartitionId};
use crate::Result;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread::{self, ThreadId};
use tracing::debug;

type ThreadEntries = HashMap<PartitionId, Arc<Mutex<ExecutionArgsSet>>>;
type Registry = Mutex<HashMap<ThreadId, ThreadEntries>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Facade over the process-wide (thread, partition) args-set registry.
pub struct ResourceCache;

impl ResourceCache {
    /// Get the calling thread's args set for `partition`, constructing it
    /// via `ctor` on first use.
    ///
    /// The returned `Arc` keeps the args set alive for the duration of the
    /// call even if the entry is concurrently evicted.
    pub fn get_or_create<F>(
        partition: PartitionId,
        ctor: F,
    ) -> Result<Arc<Mutex<ExecutionArgsSet>>>
    where
        F: FnOnce() -> Result<ExecutionArgsSet>,
    {
        let mut map = registry().lock().unwrap_or_else(PoisonError::into_inner);
        let entries = map.entry(thread::current().id()).or_default();

        if let Some(existing) = entries.get(&partition) {
            return Ok(Arc::clone(existing));
        }

        debug!(partition = partition.raw(), "instantiating args set");
        let created = Arc::new(Mutex::new(ctor()?));
        entries.insert(partition, Arc::clone(&created));
        Ok(created)
    }

    /// Remove `partition`'s entries from every thread's cache.
    ///
    /// Invoked by `CompiledPartition::drop`. An execution in flight on
    /// another thread keeps its args set alive through its own `Arc`; the
    /// entry simply cannot be found again.
    pub fn evict(partition: PartitionId) {
        debug!(partition = partition.raw(), "evicting cached args sets");
        let mut map = registry().lock().unwrap_or_else(PoisonError::into_inner);
        for entries in map.values_mut() {
            entries.remove(&partition);
        }
        map.retain(|_, entries| !entries.is_empty());
    }

    /// Number of cached entries for `partition` across all threads.
    ///
    /// Diagnostic accessor, used by eviction tests.
    pub fn entry_count(partition: PartitionId) -> usize {
        let map = registry().lock().unwrap_or_else(PoisonError::into_inner);
        map.values()
            .filter(|entries| entries.contains_key(&partition))
            .count()
    }
}
