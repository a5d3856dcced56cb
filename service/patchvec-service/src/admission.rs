//! Admission gate: inline check-and-increment counters guarding the search
//! and ingest worker pools, plus per-tenant caps. `AtomicUsize`
//! compare-exchange loops stand in for the coroutine-style counter the
//! source gates submission with on its single-threaded event loop.

use crate::error::ServiceError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// A bounded counter: `0` means unlimited. `try_acquire` performs an atomic
/// check-and-increment; `Drop` on the returned permit releases it.
struct BoundedCounter {
    active: AtomicUsize,
    max: usize,
}

impl BoundedCounter {
    fn new(max: usize) -> Self {
        Self { active: AtomicUsize::new(0), max }
    }

    fn try_acquire(&self) -> bool {
        if self.max == 0 {
            self.active.fetch_add(1, Ordering::SeqCst);
            return true;
        }
        loop {
            let current = self.active.load(Ordering::SeqCst);
            if current >= self.max {
                return false;
            }
            if self
                .active
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    fn release(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

struct TenantGate {
    limits: Mutex<HashMap<String, usize>>,
    default_limit: usize,
    active: Mutex<HashMap<String, usize>>,
}

impl TenantGate {
    fn new(default_limit: usize, overrides: HashMap<String, usize>) -> Self {
        Self { limits: Mutex::new(overrides), default_limit, active: Mutex::new(HashMap::new()) }
    }

    fn limit_for(&self, tenant: &str) -> usize {
        self.limits.lock().unwrap().get(tenant).copied().unwrap_or(self.default_limit)
    }

    fn try_acquire(&self, tenant: &str) -> bool {
        let limit = self.limit_for(tenant);
        let mut active = self.active.lock().unwrap();
        let count = active.entry(tenant.to_string()).or_insert(0);
        if limit != 0 && *count >= limit {
            return false;
        }
        *count += 1;
        true
    }

    fn release(&self, tenant: &str) {
        let mut active = self.active.lock().unwrap();
        if let Some(count) = active.get_mut(tenant) {
            *count = count.saturating_sub(1);
        }
    }
}

/// Admission control for the two worker pools plus per-tenant caps.
/// Per-tenant cap is checked first (cheap, per-request), then the global
/// pool counter, matching the source's stated admission order.
pub struct Admission {
    searches: BoundedCounter,
    ingests: BoundedCounter,
    tenants: TenantGate,
}

/// RAII permit: releases both the global pool slot and the tenant slot on
/// drop, regardless of how the guarded work finished.
pub struct Permit<'a> {
    admission: &'a Admission,
    tenant: String,
    kind: Kind,
}

#[derive(Clone, Copy)]
enum Kind {
    Search,
    Ingest,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        match self.kind {
            Kind::Search => self.admission.searches.release(),
            Kind::Ingest => self.admission.ingests.release(),
        }
        self.admission.tenants.release(&self.tenant);
    }
}

impl Admission {
    pub fn new(max_searches: usize, max_ingests: usize, tenant_default_limit: usize, tenant_limits: HashMap<String, usize>) -> Self {
        Self {
            searches: BoundedCounter::new(max_searches),
            ingests: BoundedCounter::new(max_ingests),
            tenants: TenantGate::new(tenant_default_limit, tenant_limits),
        }
    }

    pub fn try_admit_search(&self, tenant: &str, is_admin: bool) -> Result<Permit<'_>, ServiceError> {
        self.try_admit(tenant, is_admin, Kind::Search)
    }

    pub fn try_admit_ingest(&self, tenant: &str, is_admin: bool) -> Result<Permit<'_>, ServiceError> {
        self.try_admit(tenant, is_admin, Kind::Ingest)
    }

    fn try_admit(&self, tenant: &str, is_admin: bool, kind: Kind) -> Result<Permit<'_>, ServiceError> {
        if !is_admin && !self.tenants.try_acquire(tenant) {
            return Err(ServiceError::new("tenant_rate_limited", format!("tenant '{tenant}' is at its concurrency cap")));
        }
        let counter = match kind {
            Kind::Search => &self.searches,
            Kind::Ingest => &self.ingests,
        };
        if !counter.try_acquire() {
            if !is_admin {
                self.tenants.release(tenant);
            }
            let code = match kind {
                Kind::Search => "search_overloaded",
                Kind::Ingest => "ingest_overloaded",
            };
            return Err(ServiceError::new(code, "worker pool is at capacity"));
        }
        Ok(Permit { admission: self, tenant: tenant.to_string(), kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_cap_rejects_beyond_limit() {
        let admission = Admission::new(1, 1, 0, HashMap::new());
        let first = admission.try_admit_search("acme", false).unwrap();
        let second = admission.try_admit_search("acme", false);
        assert!(second.is_err());
        drop(first);
        assert!(admission.try_admit_search("acme", false).is_ok());
    }

    #[test]
    fn unlimited_pool_never_rejects() {
        let admission = Admission::new(0, 0, 0, HashMap::new());
        let permits: Vec<_> = (0..50).map(|_| admission.try_admit_search("acme", false).unwrap()).collect();
        assert_eq!(permits.len(), 50);
    }

    #[test]
    fn tenant_cap_is_independent_of_global_pool() {
        let mut limits = HashMap::new();
        limits.insert("acme".to_string(), 1);
        let admission = Admission::new(10, 10, 0, limits);
        let first = admission.try_admit_search("acme", false).unwrap();
        assert!(admission.try_admit_search("acme", false).is_err());
        assert!(admission.try_admit_search("other", false).is_ok());
        drop(first);
        assert!(admission.try_admit_search("acme", false).is_ok());
    }

    #[test]
    fn admin_bypasses_tenant_cap() {
        let mut limits = HashMap::new();
        limits.insert("acme".to_string(), 1);
        let admission = Admission::new(10, 10, 0, limits);
        let _p1 = admission.try_admit_search("acme", true).unwrap();
        assert!(admission.try_admit_search("acme", true).is_ok());
    }
}
