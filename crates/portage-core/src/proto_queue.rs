//! Per-protocol aggregate: host queues, worker pool, concurrency caps.
//!
//! The runnable index orders host queues by their lowest queued serial and
//! only contains queues that are under their per-host cap, so picking the
//! next job to start is one BTreeMap lookup. This is a priority queue over
//! queues, not a flat job queue: per-host admission is enforced first,
//! global serial order second.

use std::collections::{BTreeMap, HashMap};

use crate::host_queue::HostQueue;
use crate::job::JobId;
use crate::pool::WorkerPool;
use crate::serial::{Serial, SerialPicker};

/// What `complete` found and removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removed {
    Running,
    Queued,
    NotFound,
}

#[derive(Debug)]
pub struct ProtoQueue {
    protocol: String,
    queues: HashMap<String, HostQueue>,
    /// Lowest queued serial -> host, for queues with runnable work.
    runnable: BTreeMap<Serial, String>,
    pub(crate) pool: WorkerPool,
    pub(crate) max_workers: usize,
    pub(crate) max_per_host: usize,
    running_total: usize,
    picker: SerialPicker,
    /// A deferred start-next tick is pending; submissions coalesce into it.
    pub(crate) tick_armed: bool,
}

impl ProtoQueue {
    pub fn new(protocol: impl Into<String>, max_workers: usize, max_per_host: usize) -> Self {
        Self {
            protocol: protocol.into(),
            queues: HashMap::new(),
            runnable: BTreeMap::new(),
            pool: WorkerPool::new(),
            max_workers: max_workers.max(1),
            max_per_host: max_per_host.max(1),
            running_total: 0,
            picker: SerialPicker::new(),
            tick_armed: false,
        }
    }

    /// Assign a serial and enqueue the job under `host`.
    pub fn submit(&mut self, job: JobId, host: &str, priority: i8) -> Serial {
        let serial = self.picker.next(priority);
        self.queues
            .entry(host.to_string())
            .or_default()
            .enqueue(serial, job);
        self.reindex(host);
        serial
    }

    /// Re-bucket a queued job's serial for a new priority. Must not be
    /// called for running jobs.
    pub fn reprioritize(&mut self, job: JobId, host: &str, old: Serial, priority: i8) -> Serial {
        let queue = self.queues.get_mut(host).expect("host queue exists");
        debug_assert!(!queue.is_running(job), "reprioritize on a running job");
        queue.remove(job, old);
        let serial = SerialPicker::rebucket(old, priority);
        queue.enqueue(serial, job);
        self.reindex(host);
        serial
    }

    /// Pop the host queue holding the globally lowest serial and take its
    /// lowest job, counting it as running. None when nothing is admissible.
    pub fn pop_runnable(&mut self) -> Option<(String, Serial, JobId)> {
        if self.running_total >= self.max_workers {
            return None;
        }
        let (&serial, host) = self.runnable.iter().next()?;
        let host = host.clone();
        self.runnable.remove(&serial);
        let queue = self.queues.get_mut(&host).expect("indexed host exists");
        queue.indexed_at = None;
        let (taken_serial, job) = queue.take_lowest().expect("indexed queue non-empty");
        debug_assert_eq!(taken_serial, serial);
        self.running_total += 1;
        self.reindex(&host);
        Some((host, serial, job))
    }

    /// Undo the bookkeeping of `pop_runnable` after a failed start. The job
    /// is not re-queued; it is failed by the caller.
    pub fn rollback_start(&mut self, host: &str, job: JobId) {
        if let Some(queue) = self.queues.get_mut(host) {
            if queue.unrun(job) {
                self.running_total -= 1;
            }
            self.reindex(host);
            self.drop_queue_if_empty(host);
        }
    }

    /// Remove a finished or cancelled job from its host queue, running or
    /// still queued.
    pub fn complete(&mut self, job: JobId, host: &str, serial: Serial) -> Removed {
        let Some(queue) = self.queues.get_mut(host) else {
            return Removed::NotFound;
        };
        let removed = if queue.unrun(job) {
            self.running_total -= 1;
            Removed::Running
        } else if queue.remove(job, serial) {
            Removed::Queued
        } else {
            Removed::NotFound
        };
        self.reindex(host);
        self.drop_queue_if_empty(host);
        removed
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// More work could start right now: something runnable and a free slot.
    pub fn has_runnable(&self) -> bool {
        !self.runnable.is_empty() && self.running_total < self.max_workers
    }

    pub fn running_total(&self) -> usize {
        self.running_total
    }

    pub fn running_for_host(&self, host: &str) -> usize {
        self.queues.get(host).map_or(0, |q| q.running_count())
    }

    pub fn queued_for_host(&self, host: &str) -> usize {
        self.queues.get(host).map_or(0, |q| q.queued_count())
    }

    /// Recompute the runnable index entry for `host`: indexed iff it has
    /// queued work and is under the per-host cap.
    fn reindex(&mut self, host: &str) {
        let queue = self.queues.entry(host.to_string()).or_default();
        if let Some(old) = queue.indexed_at.take() {
            self.runnable.remove(&old);
        }
        if queue.queued_count() > 0 && queue.running_count() < self.max_per_host {
            let serial = queue.lowest_serial();
            queue.indexed_at = Some(serial);
            self.runnable.insert(serial, host.to_string());
        }
    }

    fn drop_queue_if_empty(&mut self, host: &str) {
        let empty = self
            .queues
            .get(host)
            .map(|q| q.is_empty() && q.indexed_at.is_none())
            .unwrap_or(false);
        if empty {
            self.queues.remove(host);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jid(n: u64) -> JobId {
        JobId(n)
    }

    #[test]
    fn pop_runnable_respects_global_cap() {
        let mut q = ProtoQueue::new("http", 2, 2);
        q.submit(jid(1), "h", 0);
        q.submit(jid(2), "h", 0);
        q.submit(jid(3), "h", 0);

        assert!(q.pop_runnable().is_some());
        assert!(q.pop_runnable().is_some());
        assert_eq!(q.running_total(), 2);
        assert!(q.pop_runnable().is_none(), "global cap reached");
    }

    #[test]
    fn pop_runnable_respects_per_host_cap() {
        let mut q = ProtoQueue::new("http", 10, 1);
        q.submit(jid(1), "a", 0);
        q.submit(jid(2), "a", 0);
        q.submit(jid(3), "b", 0);

        let (host1, _, _) = q.pop_runnable().unwrap();
        assert_eq!(host1, "a");
        // "a" is at its cap; next start must come from "b".
        let (host2, _, _) = q.pop_runnable().unwrap();
        assert_eq!(host2, "b");
        assert!(q.pop_runnable().is_none());
        assert_eq!(q.queued_for_host("a"), 1);
    }

    #[test]
    fn fairness_tie_break_is_lowest_serial() {
        let mut q = ProtoQueue::new("http", 10, 2);
        // Host a gets the first (lower) serial, then host b.
        q.submit(jid(1), "a", 0);
        q.submit(jid(2), "b", 0);
        let (host, _, job) = q.pop_runnable().unwrap();
        assert_eq!((host.as_str(), job), ("a", jid(1)));
        let (host, _, job) = q.pop_runnable().unwrap();
        assert_eq!((host.as_str(), job), ("b", jid(2)));
    }

    #[test]
    fn priority_orders_across_hosts() {
        let mut q = ProtoQueue::new("http", 10, 2);
        q.submit(jid(1), "a", 0);
        q.submit(jid(2), "b", -5);
        // b's job has the lower serial despite arriving later.
        let (host, _, job) = q.pop_runnable().unwrap();
        assert_eq!((host.as_str(), job), ("b", jid(2)));
    }

    #[test]
    fn complete_frees_a_slot_and_reindexes() {
        let mut q = ProtoQueue::new("http", 10, 1);
        let s1 = q.submit(jid(1), "h", 0);
        q.submit(jid(2), "h", 0);
        let (_, _, job) = q.pop_runnable().unwrap();
        assert_eq!(job, jid(1));
        assert!(q.pop_runnable().is_none(), "host at cap");

        assert_eq!(q.complete(jid(1), "h", s1), Removed::Running);
        let (_, _, job) = q.pop_runnable().unwrap();
        assert_eq!(job, jid(2), "freed slot admits the queued job");
    }

    #[test]
    fn complete_removes_a_queued_job() {
        let mut q = ProtoQueue::new("http", 10, 2);
        let s = q.submit(jid(1), "h", 0);
        assert_eq!(q.complete(jid(1), "h", s), Removed::Queued);
        assert!(q.pop_runnable().is_none());
        assert_eq!(q.complete(jid(1), "h", s), Removed::NotFound);
    }

    #[test]
    fn reprioritize_moves_a_queued_job_ahead() {
        let mut q = ProtoQueue::new("http", 10, 2);
        let _s1 = q.submit(jid(1), "h", 0);
        let s2 = q.submit(jid(2), "h", 0);
        q.reprioritize(jid(2), "h", s2, -10);
        let (_, _, job) = q.pop_runnable().unwrap();
        assert_eq!(job, jid(2), "re-bucketed job starts first");
    }

    #[test]
    fn rollback_start_releases_the_slot() {
        let mut q = ProtoQueue::new("http", 1, 1);
        q.submit(jid(1), "h", 0);
        let (host, _, job) = q.pop_runnable().unwrap();
        q.rollback_start(&host, job);
        assert_eq!(q.running_total(), 0);
    }

    #[test]
    fn serials_are_unique_and_nonzero() {
        let mut q = ProtoQueue::new("http", 10, 10);
        let mut seen = std::collections::HashSet::new();
        for i in 0..100 {
            let s = q.submit(jid(i), "h", (i % 5) as i8 - 2);
            assert!(!s.is_none());
            assert!(seen.insert(s), "serial {s:?} reused");
        }
    }
}
