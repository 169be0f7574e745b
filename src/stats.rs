//! Bridge statistics for monitoring

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Point-in-time counters of one bridge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    pub types_registered: usize,
    pub methods_registered: usize,
    pub invocations: usize,
    pub marshal_errors: usize,
    pub live_objects: usize,
    pub bound_delegates: usize,
    pub modules_loaded: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub invocations: AtomicUsize,
    pub marshal_errors: AtomicUsize,
    pub bound_delegates: AtomicUsize,
    pub modules_loaded: AtomicUsize,
}

impl Counters {
    #[inline]
    pub fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn drop_one(counter: &AtomicUsize) {
        counter.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn read(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::Relaxed)
    }
}
