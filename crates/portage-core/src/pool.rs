//! Pool of idle, previously used workers.
//!
//! Workers land here when their job completes and they are still alive;
//! a later job to the same host (preferably) or any host picks them back
//! up instead of spawning. Workers idle for the full idle lifetime are
//! reaped on a timer that fires every half lifetime.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::worker::WorkerId;

#[derive(Debug, Default)]
pub struct WorkerPool {
    /// host -> (worker, idle since), in return order per host.
    idle: HashMap<String, Vec<(WorkerId, Instant)>>,
    count: usize,
    reap_pending: bool,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a worker to the pool. Returns true when the caller should
    /// arm a reap timer (none is pending yet).
    pub fn put(&mut self, host: &str, worker: WorkerId, now: Instant) -> bool {
        self.idle
            .entry(host.to_string())
            .or_default()
            .push((worker, now));
        self.count += 1;
        let arm = !self.reap_pending;
        self.reap_pending = true;
        arm
    }

    /// Take an idle worker, preferring one already connected to `host`.
    /// A worker from another host is handed out too (it gets re-identified
    /// on bind); None when the pool is empty.
    pub fn take(&mut self, host: &str) -> Option<WorkerId> {
        if let Some(list) = self.idle.get_mut(host) {
            if let Some((worker, _)) = list.pop() {
                if list.is_empty() {
                    self.idle.remove(host);
                }
                self.count -= 1;
                return Some(worker);
            }
        }
        let any_host = self.idle.keys().next()?.clone();
        let list = self.idle.get_mut(&any_host).expect("key just seen");
        let (worker, _) = list.pop().expect("non-empty list");
        if list.is_empty() {
            self.idle.remove(&any_host);
        }
        self.count -= 1;
        Some(worker)
    }

    /// Drop a specific worker (e.g. its process died while idle).
    /// Returns true if it was pooled.
    pub fn remove(&mut self, worker: WorkerId) -> bool {
        let mut found = false;
        self.idle.retain(|_, list| {
            let before = list.len();
            list.retain(|(w, _)| *w != worker);
            found |= list.len() != before;
            !list.is_empty()
        });
        if found {
            self.count -= 1;
        }
        found
    }

    /// Evict all workers idle for at least `lifetime`. Returns the evicted
    /// workers and whether the reap timer should be re-armed (pool still
    /// non-empty).
    pub fn reap(&mut self, now: Instant, lifetime: Duration) -> (Vec<WorkerId>, bool) {
        let mut evicted = Vec::new();
        self.idle.retain(|_, list| {
            list.retain(|(worker, since)| {
                if now.duration_since(*since) >= lifetime {
                    evicted.push(*worker);
                    false
                } else {
                    true
                }
            });
            !list.is_empty()
        });
        self.count -= evicted.len();
        self.reap_pending = self.count > 0;
        (evicted, self.reap_pending)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}
