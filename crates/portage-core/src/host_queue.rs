//! Per-host queue of jobs for one protocol.

use std::collections::{BTreeMap, HashSet};

use crate::job::JobId;
use crate::serial::Serial;

/// Queued jobs ordered by serial plus the set currently running against
/// this host. Serials are unique within a protocol, so the map key is the
/// full ordering.
#[derive(Debug, Default)]
pub struct HostQueue {
    queued: BTreeMap<Serial, JobId>,
    running: HashSet<JobId>,
    /// Serial under which this queue is currently indexed in the
    /// protocol-level runnable map, if any.
    pub(crate) indexed_at: Option<Serial>,
}

impl HostQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a queued job by serial.
    pub fn enqueue(&mut self, serial: Serial, job: JobId) {
        debug_assert!(!serial.is_none());
        let prev = self.queued.insert(serial, job);
        debug_assert!(prev.is_none(), "serial reused within one host queue");
    }

    /// Remove and return the lowest-serial queued job, moving it into the
    /// running set.
    pub fn take_lowest(&mut self) -> Option<(Serial, JobId)> {
        let (&serial, &job) = self.queued.iter().next()?;
        self.queued.remove(&serial);
        self.running.insert(job);
        Some((serial, job))
    }

    /// Remove a job from either set. Returns true if it was present.
    pub fn remove(&mut self, job: JobId, serial: Serial) -> bool {
        if self.running.remove(&job) {
            return true;
        }
        self.queued.remove(&serial).is_some()
    }

    /// Move a running job back out of the running set without touching the
    /// queue (used when a start is rolled back).
    pub fn unrun(&mut self, job: JobId) -> bool {
        self.running.remove(&job)
    }

    /// Lowest queued serial, or the infinite sentinel when empty.
    pub fn lowest_serial(&self) -> Serial {
        self.queued
            .keys()
            .next()
            .copied()
            .unwrap_or(Serial::INFINITE)
    }

    pub fn queued_count(&self) -> usize {
        self.queued.len()
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn is_running(&self, job: JobId) -> bool {
        self.running.contains(&job)
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty() && self.running.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jid(n: u64) -> JobId {
        JobId(n)
    }

    #[test]
    fn take_lowest_follows_serial_order() {
        let mut q = HostQueue::new();
        q.enqueue(Serial(5), jid(1));
        q.enqueue(Serial(3), jid(2));
        q.enqueue(Serial(9), jid(3));

        assert_eq!(q.lowest_serial(), Serial(3));
        let (s, j) = q.take_lowest().unwrap();
        assert_eq!((s, j), (Serial(3), jid(2)));
        assert!(q.is_running(jid(2)));
        assert_eq!(q.lowest_serial(), Serial(5));
    }

    #[test]
    fn remove_covers_both_sets() {
        let mut q = HostQueue::new();
        q.enqueue(Serial(1), jid(1));
        q.enqueue(Serial(2), jid(2));
        q.take_lowest();

        assert!(q.remove(jid(1), Serial(1)), "running job");
        assert!(q.remove(jid(2), Serial(2)), "queued job");
        assert!(!q.remove(jid(3), Serial(3)), "absent job");
        assert!(q.is_empty());
    }

    #[test]
    fn empty_queue_reports_infinite_serial() {
        let q = HostQueue::new();
        assert_eq!(q.lowest_serial(), Serial::INFINITE);
    }
}
