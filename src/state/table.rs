// src/state/table.rs
use super::active_request::{ActiveRequest, RequestIdGen};
use super::backend::{Backend, BackendState, Health};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// The atomically-swapped half of the table: backends and weights. Kept
/// together so a reader never observes a backend list paired with a
/// weight table from two different writes.
#[derive(Clone)]
struct Snapshot {
    backends: HashMap<Backend, BackendState>,
    weights: HashMap<String, u64>,
}

impl Snapshot {
    fn empty() -> Self {
        Self {
            backends: HashMap::new(),
            weights: HashMap::new(),
        }
    }
}

/// The authoritative in-memory model of known backends, their
/// last-observed health/version, the operator's version-weight table, and
/// the set of in-flight proxied requests.
///
/// Mutated by `set`/`add`/`remove`-style methods (atomic replace via
/// `ArcSwap`) and read by the proxy pipeline and admin surface without
/// locking.
pub struct RoutingTable {
    snapshot: ArcSwap<Snapshot>,
    requests: DashMap<u64, ActiveRequest>,
    request_ids: RequestIdGen,
}

/// RAII handle for an in-flight request. Removes its `ActiveRequest` entry
/// when dropped, so every exit path (success, error, or retry) releases it
/// without needing a matching explicit call.
pub struct ActiveRequestGuard<'a> {
    table: &'a RoutingTable,
    id: u64,
}

impl Drop for ActiveRequestGuard<'_> {
    fn drop(&mut self) {
        self.table.requests.remove(&self.id);
    }
}

impl RoutingTable {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Snapshot::empty()),
            requests: DashMap::new(),
            request_ids: RequestIdGen::default(),
        }
    }

    /// Uniformly random choice among healthy backends whose version
    /// matches `version`, or `None`.
    pub fn backend_for(&self, version: &str) -> Option<Backend> {
        let snap = self.snapshot.load();
        let candidates: Vec<&Backend> = snap
            .backends
            .iter()
            .filter(|(_, state)| state.is_healthy() && state.version.as_deref() == Some(version))
            .map(|(backend, _)| backend)
            .collect();
        candidates.choose(&mut rand::thread_rng()).map(|b| (*b).clone())
    }

    /// True iff at least one backend is healthy and, if `for_version` is
    /// given, matches that version.
    pub fn healthy(&self, for_version: Option<&str>) -> bool {
        let snap = self.snapshot.load();
        snap.backends.values().any(|state| {
            state.is_healthy()
                && for_version
                    .map(|v| state.version.as_deref() == Some(v))
                    .unwrap_or(true)
        })
    }

    /// Versions of all currently healthy backends.
    pub fn available_versions(&self) -> HashSet<String> {
        let snap = self.snapshot.load();
        snap.backends
            .values()
            .filter(|state| state.is_healthy())
            .filter_map(|state| state.version.clone())
            .collect()
    }

    pub fn weights(&self) -> HashMap<String, u64> {
        self.snapshot.load().weights.clone()
    }

    /// Replace the set of known backends atomically. Backends that were
    /// already known keep their existing state; new ones start as
    /// (unknown, absent). Wiping state on re-add would 504 all traffic
    /// until the next health-check cycle.
    pub fn set_backends(&self, backends: Vec<Backend>) {
        self.snapshot.rcu(|prev| {
            let mut next = (**prev).clone();
            let mut fresh = HashMap::with_capacity(backends.len());
            for backend in &backends {
                let state = prev
                    .backends
                    .get(backend)
                    .cloned()
                    .unwrap_or_else(BackendState::unknown);
                fresh.insert(backend.clone(), state);
            }
            next.backends = fresh;
            Arc::new(next)
        });
    }

    /// Insert if absent; do nothing if the backend is already known.
    pub fn add_backend(&self, backend: Backend) {
        self.snapshot.rcu(|prev| {
            if prev.backends.contains_key(&backend) {
                return prev.clone();
            }
            let mut next = (**prev).clone();
            next.backends.insert(backend.clone(), BackendState::unknown());
            Arc::new(next)
        });
    }

    /// Delete the backend if present.
    pub fn remove_backend(&self, backend: &Backend) {
        self.snapshot.rcu(|prev| {
            if !prev.backends.contains_key(backend) {
                return prev.clone();
            }
            let mut next = (**prev).clone();
            next.backends.remove(backend);
            Arc::new(next)
        });
    }

    pub fn set_weights(&self, weights: HashMap<String, u64>) {
        self.snapshot.rcu(|prev| {
            let mut next = (**prev).clone();
            next.weights = weights.clone();
            Arc::new(next)
        });
    }

    /// Whether `backend` is currently a member of the table (used by the
    /// health scheduler's remove-while-probing race check).
    pub fn contains(&self, backend: &Backend) -> bool {
        self.snapshot.load().backends.contains_key(backend)
    }

    /// Called by the health scheduler once a probe resolves. Discarded if
    /// the backend has been removed in the meantime.
    pub fn update_backend_state(&self, backend: &Backend, state: BackendState) {
        self.snapshot.rcu(|prev| {
            if !prev.backends.contains_key(backend) {
                return prev.clone();
            }
            let mut next = (**prev).clone();
            next.backends.insert(backend.clone(), state.clone());
            Arc::new(next)
        });
    }

    /// All known backends partitioned into (unseen, seen) for the health
    /// scheduler: unseen == never-probed (`Health::Unknown`).
    pub fn partition_for_probing(&self) -> (Vec<Backend>, Vec<Backend>) {
        let snap = self.snapshot.load();
        let mut unseen = Vec::new();
        let mut seen = Vec::new();
        for (backend, state) in snap.backends.iter() {
            if state.health == Health::Unknown {
                unseen.push(backend.clone());
            } else {
                seen.push(backend.clone());
            }
        }
        (unseen, seen)
    }

    pub fn current_state(&self, backend: &Backend) -> Option<BackendState> {
        self.snapshot.load().backends.get(backend).cloned()
    }

    /// Sorted-by-(host,port) snapshot of every known backend and its
    /// state, for the `/health` wire response.
    pub fn all_backends_sorted(&self) -> Vec<(Backend, BackendState)> {
        let snap = self.snapshot.load();
        let mut all: Vec<(Backend, BackendState)> = snap
            .backends
            .iter()
            .map(|(b, s)| (b.clone(), s.clone()))
            .collect();
        all.sort_by(|a, b| (&a.0.host, a.0.port).cmp(&(&b.0.host, b.0.port)));
        all
    }

    /// Record an in-flight request. The returned guard removes it on drop,
    /// covering every exit path from the upstream fetch including the
    /// 406-retry branch, which drops its guard and creates a new one.
    pub fn track_request(&self, source_host: String, uri: String, backend: Backend) -> ActiveRequestGuard<'_> {
        let id = self.request_ids.next();
        self.requests.insert(
            id,
            ActiveRequest {
                source_host,
                uri,
                backend,
            },
        );
        ActiveRequestGuard { table: self, id }
    }

    pub fn activity_snapshot(&self) -> Vec<ActiveRequest> {
        self.requests.iter().map(|entry| entry.value().clone()).collect()
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}
