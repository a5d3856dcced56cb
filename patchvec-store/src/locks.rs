//! Process-wide per-collection lock registry with a double-checked creation
//! pattern, grounded on `_LOCKS`/`_LOCKS_GUARD`/`get_lock` in the source
//! store module.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use patchvec_model::{CollectionId, TenantId};

type Key = (TenantId, CollectionId);

#[derive(Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<Key, Arc<Mutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the mutex for `(tenant, collection)`, creating it on first
    /// request. Double-checked: the registry-creation mutex is only held
    /// long enough to look up or insert the entry.
    pub fn get_lock(&self, tenant: &TenantId, collection: &CollectionId) -> Arc<Mutex<()>> {
        let key = (tenant.clone(), collection.clone());
        if let Some(lock) = self.locks.lock().unwrap().get(&key) {
            return lock.clone();
        }
        let mut guard = self.locks.lock().unwrap();
        guard
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire the lock for one collection for the duration of the closure.
    pub fn with_lock<T>(&self, tenant: &TenantId, collection: &CollectionId, f: impl FnOnce() -> T) -> T {
        let lock = self.get_lock(tenant, collection);
        let _guard: MutexGuard<'_, ()> = lock.lock().unwrap();
        f()
    }

    /// Acquire both collections' locks in a stable order (by `Arc` pointer
    /// identity) to avoid deadlock against a concurrent rename/dump in the
    /// opposite direction, then run the closure, then release in reverse.
    pub fn with_two_locks<T>(
        &self,
        a: (&TenantId, &CollectionId),
        b: (&TenantId, &CollectionId),
        f: impl FnOnce() -> T,
    ) -> T {
        let lock_a = self.get_lock(a.0, a.1);
        let lock_b = self.get_lock(b.0, b.1);
        let ptr_a = Arc::as_ptr(&lock_a) as usize;
        let ptr_b = Arc::as_ptr(&lock_b) as usize;
        if ptr_a <= ptr_b {
            let _ga = lock_a.lock().unwrap();
            let _gb = lock_b.lock().unwrap();
            f()
        } else {
            let _gb = lock_b.lock().unwrap();
            let _ga = lock_a.lock().unwrap();
            f()
        }
    }

    /// Acquire every known collection's lock in deterministic (sorted) key
    /// order, for the archive engine's dump/restore critical section.
    pub fn with_all_locks<T>(&self, keys: &[(TenantId, CollectionId)], f: impl FnOnce() -> T) -> T {
        let mut sorted: Vec<_> = keys.to_vec();
        sorted.sort();
        let locks: Vec<Arc<Mutex<()>>> = sorted
            .iter()
            .map(|(t, c)| self.get_lock(t, c))
            .collect();
        let _guards: Vec<_> = locks.iter().map(|l| l.lock().unwrap()).collect();
        f()
    }
}
