// src/state/active_request.rs
use super::backend::Backend;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// A single in-flight proxied request, alive only for the duration of the
/// upstream fetch. Must be removed on every exit path (success, failure,
/// or retry); the retry branch removes the old one and inserts a new one.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveRequest {
    pub source_host: String,
    pub uri: String,
    pub backend: Backend,
}

/// Monotonic ids for the active-request table; `DashMap` needs a key and
/// `ActiveRequest` itself isn't unique (two requests can hit the same
/// backend with the same uri).
#[derive(Default)]
pub struct RequestIdGen(AtomicU64);

impl RequestIdGen {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}
