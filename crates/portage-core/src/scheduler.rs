//! The scheduler core: one synchronous state machine driving every queue,
//! pool, worker and job.
//!
//! All mutation happens on the single control task that owns the `Core`;
//! no locking is needed. The async driver feeds it external events
//! (control messages, worker frames, timer fires) and it reacts by sending
//! frames through worker ports, arming deferred start-next ticks, and
//! requesting timers.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use portage_wire::payload::{self, MessageBoxAnswer, MessageBoxKind, MessageBoxMsg, ANSWER_CANCEL, ANSWER_OK};
use portage_wire::{AuthInfo, Command, ErrorKind, Frame, JobError};

use crate::config::{PortageConfig, SessionConfig};
use crate::credentials::CredentialCache;
use crate::decision::DecisionProvider;
use crate::event::{JobRequest, JobSink, JobSpec, JobUpdate};
use crate::identity::{host_of, scheme_of, WorkerIdentity};
use crate::job::{
    CopyState, JobEntry, JobId, JobKind, JobState, ListState, SimpleCmd, SimpleState,
    TransferState,
};
use crate::proto_queue::ProtoQueue;
use crate::registry::ProtocolRegistry;
use crate::serial::{Serial, MAX_PRIORITY, MIN_PRIORITY};
use crate::spawn::{LaunchedWorker, WorkerLauncher};
use crate::worker::{decode_event, Worker, WorkerEvent, WorkerId};

/// Timer the driver should arm on the core's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerRequest {
    /// Fire `on_reap(protocol, now)` at `at`.
    Reap { protocol: String, at: Instant },
}

/// Work deferred to the next `drain` pass. Submissions coalesce into one
/// start-next tick per protocol; scheduling failures are delivered here
/// too so a parent never hears about a sub-job before it finished
/// registering it.
#[derive(Debug)]
enum InternalEvent {
    Tick(String),
    Fail(JobId, JobError),
}

pub struct Core {
    pub(crate) cfg: PortageConfig,
    pub(crate) registry: Arc<dyn ProtocolRegistry>,
    pub(crate) decisions: Arc<dyn DecisionProvider>,
    credentials: CredentialCache,
    launcher: Box<dyn WorkerLauncher>,
    pub(crate) queues: HashMap<String, ProtoQueue>,
    pub(crate) jobs: HashMap<JobId, JobEntry>,
    pub(crate) workers: HashMap<WorkerId, Worker>,
    next_job: u64,
    next_worker: u64,
    /// Deferred ticks and failures, in arrival order.
    pending: VecDeque<InternalEvent>,
    timer_requests: Vec<TimerRequest>,
    shut_down: bool,
}

impl Core {
    pub fn new(
        cfg: PortageConfig,
        registry: Arc<dyn ProtocolRegistry>,
        decisions: Arc<dyn DecisionProvider>,
        launcher: Box<dyn WorkerLauncher>,
    ) -> Self {
        Self {
            cfg,
            registry,
            decisions,
            credentials: CredentialCache::new(),
            launcher,
            queues: HashMap::new(),
            jobs: HashMap::new(),
            workers: HashMap::new(),
            next_job: 1,
            next_worker: 1,
            pending: VecDeque::new(),
            timer_requests: Vec::new(),
            shut_down: false,
        }
    }

    // ---- public control surface -------------------------------------

    /// Register a job. The result and all progress arrive on `sink`; the
    /// returned id is valid for cancel/priority/suspend until the terminal
    /// update.
    pub fn submit(&mut self, spec: JobSpec, sink: JobSink) -> JobId {
        let id = self.alloc_job();
        let priority = spec.priority.clamp(MIN_PRIORITY, MAX_PRIORITY);
        let (url, kind) = build_kind(spec.request);
        let mut entry = JobEntry::new(id, url, priority, kind);
        entry.sink = Some(sink);
        entry.meta_out = spec.metadata;
        let is_copy = matches!(entry.kind, JobKind::Copy(_));
        self.jobs.insert(id, entry);

        if self.shut_down {
            self.defer_fail(
                id,
                JobError::new(ErrorKind::UserCancelled, "scheduler shut down"),
            );
            return id;
        }
        if is_copy {
            // Composite jobs are never queued themselves; they orchestrate
            // sub-jobs from the start.
            if let Some(entry) = self.entry_mut(id) {
                entry.state = JobState::Running;
            }
            self.copy_start(id);
        } else {
            self.schedule(id);
        }
        id
    }

    /// Cancel a job: kill its worker outright, tear down sub-jobs quietly,
    /// report user-cancelled.
    pub fn cancel(&mut self, id: JobId) {
        self.cancel_inner(id, false);
    }

    /// Change a queued job's priority. Ignored for running jobs.
    pub fn set_priority(&mut self, id: JobId, priority: i8) {
        let priority = priority.clamp(MIN_PRIORITY, MAX_PRIORITY);
        let Some(entry) = self.entry_mut(id) else { return };
        entry.priority = priority;
        if entry.state != JobState::Queued || entry.serial.is_none() {
            if entry.state == JobState::Running {
                tracing::warn!("{}: priority change ignored for running job", id);
            }
            return;
        }
        let (protocol, host, old) = (entry.protocol.clone(), entry.host.clone(), entry.serial);
        if let Some(q) = self.queues.get_mut(&protocol) {
            let serial = q.reprioritize(id, &host, old, priority);
            if let Some(entry) = self.entry_mut(id) {
                entry.serial = serial;
            }
        }
    }

    /// Pause delivery for a job and all of its running sub-jobs. Queue
    /// position is unaffected.
    pub fn suspend(&mut self, id: JobId) {
        let Some(entry) = self.entry_mut(id) else { return };
        if entry.suspended {
            return;
        }
        entry.suspended = true;
        let children = entry.children.clone();
        self.sync_worker_gate(id);
        for child in children {
            self.suspend(child);
        }
    }

    pub fn resume(&mut self, id: JobId) {
        let Some(entry) = self.entry_mut(id) else { return };
        if !entry.suspended {
            return;
        }
        entry.suspended = false;
        let children = entry.children.clone();
        self.sync_worker_gate(id);
        for child in children {
            self.resume(child);
        }
    }

    /// Supply one upload chunk for a put job (empty = end of stream).
    /// Callers send exactly one chunk per [`JobUpdate::DataRequest`].
    pub fn supply_data(&mut self, id: JobId, bytes: Vec<u8>) {
        self.transfer_supply_data(id, bytes);
    }

    /// Replace the session configuration and re-push it to live workers.
    pub fn reconfigure(&mut self, session: SessionConfig) {
        self.cfg.session = session;
        let map = self.cfg.session.to_worker_map();
        let mut pushed = 0usize;
        for w in self.workers.values_mut() {
            if w.dead {
                continue;
            }
            w.send(Frame::new(Command::Config.tag(), payload::encode_map(&map)));
            w.config_pushed = true;
            pushed += 1;
        }
        tracing::info!("session configuration re-derived, pushed to {} workers", pushed);
    }

    /// Fail every outstanding job and kill every worker. Idempotent; new
    /// submissions fail immediately afterwards.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        let top_level: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|(_, e)| e.parent.is_none())
            .map(|(id, _)| *id)
            .collect();
        for id in top_level {
            self.cancel_inner(id, false);
        }
        let workers: Vec<WorkerId> = self.workers.keys().copied().collect();
        for wid in workers {
            self.kill_worker(wid);
        }
        self.queues.clear();
        self.pending.clear();
    }

    /// Process deferred ticks and failures until none remain.
    pub fn drain(&mut self) {
        while let Some(event) = self.pending.pop_front() {
            match event {
                InternalEvent::Tick(protocol) => self.start_next(&protocol),
                InternalEvent::Fail(id, err) => self.fail_job(id, err),
            }
        }
    }

    /// Timers the driver should arm since the last call.
    pub fn take_timer_requests(&mut self) -> Vec<TimerRequest> {
        std::mem::take(&mut self.timer_requests)
    }

    // ---- worker-driven entry points ----------------------------------

    /// A frame arrived from a worker connection.
    pub fn on_worker_frame(&mut self, wid: WorkerId, frame: Frame) {
        let Some(w) = self.workers.get_mut(&wid) else {
            tracing::debug!("{}: frame for unknown worker dropped", wid);
            return;
        };
        w.conn.push(frame);
        self.pump_worker(wid);
    }

    /// The worker's connection broke (EOF, write failure, connect timeout).
    pub fn on_worker_gone(&mut self, wid: WorkerId) {
        let Some(w) = self.workers.get_mut(&wid) else { return };
        w.dead = true;
        let job = w.job.take();
        let protocol = w.protocol.clone();
        match job {
            Some(job_id) => {
                tracing::warn!("{} died while bound to {}", wid, job_id);
                if let Some(mut entry) = self.jobs.remove(&job_id) {
                    let url = entry.url.clone();
                    let children = std::mem::take(&mut entry.children);
                    for child in children {
                        self.cancel_inner(child, true);
                    }
                    self.finalize(
                        entry,
                        Err(JobError::new(ErrorKind::WorkerDied, url)),
                        false,
                        false,
                    );
                } else {
                    self.workers.remove(&wid);
                }
            }
            None => {
                if let Some(q) = self.queues.get_mut(&protocol) {
                    q.pool.remove(wid);
                }
                self.workers.remove(&wid);
            }
        }
    }

    /// Reap timer fired for a protocol's pool.
    pub fn on_reap(&mut self, protocol: &str, now: Instant) {
        let lifetime = self.cfg.worker_idle_lifetime();
        let reap_at = now + self.cfg.reap_interval();
        let Some(q) = self.queues.get_mut(protocol) else { return };
        let (evicted, rearm) = q.pool.reap(now, lifetime);
        for wid in evicted {
            tracing::debug!("{}: reaping idle worker", wid);
            self.kill_worker(wid);
        }
        if rearm {
            self.timer_requests.push(TimerRequest::Reap {
                protocol: protocol.to_string(),
                at: reap_at,
            });
        }
    }

    // ---- observation helpers (tests, embedders) ----------------------

    pub fn running_count(&self, protocol: &str) -> usize {
        self.queues.get(protocol).map_or(0, |q| q.running_total())
    }

    pub fn pool_size(&self, protocol: &str) -> usize {
        self.queues.get(protocol).map_or(0, |q| q.pool.len())
    }

    pub fn job_state(&self, id: JobId) -> Option<JobState> {
        self.jobs.get(&id).map(|e| e.state)
    }

    /// Metadata the workers reported for a still-tracked job.
    pub fn job_metadata(&self, id: JobId) -> Option<&std::collections::BTreeMap<String, String>> {
        self.jobs.get(&id).map(|e| &e.meta_in)
    }

    pub fn live_workers(&self) -> usize {
        self.workers.len()
    }

    // ---- internals ----------------------------------------------------

    fn alloc_job(&mut self) -> JobId {
        let id = JobId(self.next_job);
        self.next_job += 1;
        id
    }

    pub(crate) fn entry(&self, id: JobId) -> Option<&JobEntry> {
        self.jobs.get(&id)
    }

    pub(crate) fn entry_mut(&mut self, id: JobId) -> Option<&mut JobEntry> {
        self.jobs.get_mut(&id)
    }

    /// Wire protocol a URL is routed to: its scheme after proxy
    /// substitution, which must be known to the registry.
    pub(crate) fn route_protocol(&self, url: &str) -> Result<String, JobError> {
        let scheme = scheme_of(url)?;
        let resolved = self.cfg.session.resolved_protocol(&scheme).to_string();
        if self.registry.lookup(&resolved).is_none() {
            return Err(JobError::new(ErrorKind::UnsupportedProtocol, url));
        }
        Ok(resolved)
    }

    fn queue_mut(&mut self, protocol: &str) -> &mut ProtoQueue {
        if !self.queues.contains_key(protocol) {
            let mut max_workers = self.cfg.max_workers;
            let mut max_per_host = self.cfg.max_workers_per_host;
            if let Some(caps) = self.registry.lookup(protocol) {
                if caps.max_workers > 0 {
                    max_workers = caps.max_workers;
                }
                if caps.max_workers_per_host > 0 {
                    max_per_host = caps.max_workers_per_host;
                }
            }
            self.queues.insert(
                protocol.to_string(),
                ProtoQueue::new(protocol, max_workers, max_per_host),
            );
        }
        self.queues.get_mut(protocol).expect("queue just ensured")
    }

    /// Enqueue a job into its protocol queue and arm the deferred tick.
    pub(crate) fn schedule(&mut self, id: JobId) {
        let Some(entry) = self.entry(id) else { return };
        let url = entry.url.clone();
        let priority = entry.priority;
        let protocol = match self.route_protocol(&url) {
            Ok(p) => p,
            Err(err) => return self.defer_fail(id, err),
        };
        let host = match host_of(&url) {
            Ok(h) => h,
            Err(err) => return self.defer_fail(id, err),
        };
        let serial = self.queue_mut(&protocol).submit(id, &host, priority);
        if let Some(entry) = self.entry_mut(id) {
            entry.serial = serial;
            entry.protocol = protocol.clone();
            entry.host = host;
            entry.state = JobState::Queued;
        }
        self.arm_tick(&protocol);
    }

    /// Create and schedule a sub-job owned by `parent`.
    pub(crate) fn submit_child(
        &mut self,
        parent: JobId,
        url: String,
        priority: i8,
        kind: JobKind,
    ) -> JobId {
        let id = self.alloc_job();
        let mut entry = JobEntry::new(id, url, priority.clamp(MIN_PRIORITY, MAX_PRIORITY), kind);
        entry.parent = Some(parent);
        if let Some(p) = self.entry_mut(parent) {
            p.children.push(id);
            entry.suspended = p.suspended;
        }
        self.jobs.insert(id, entry);
        self.schedule(id);
        id
    }

    /// Arm the coalesced start-next tick for a protocol if it could start
    /// work right now.
    pub(crate) fn arm_tick(&mut self, protocol: &str) {
        let Some(q) = self.queues.get_mut(protocol) else { return };
        if q.tick_armed || !q.has_runnable() {
            return;
        }
        q.tick_armed = true;
        self.pending
            .push_back(InternalEvent::Tick(protocol.to_string()));
    }

    /// One deferred tick: start at most one job, then re-arm while more
    /// work is admissible.
    fn start_next(&mut self, protocol: &str) {
        let popped = {
            let Some(q) = self.queues.get_mut(protocol) else { return };
            q.tick_armed = false;
            q.pop_runnable()
        };
        let Some((host, _serial, job_id)) = popped else { return };

        let pooled = self
            .queues
            .get_mut(protocol)
            .and_then(|q| q.pool.take(&host));
        let wid = match pooled {
            Some(wid) => Some(wid),
            None => match self.spawn_worker(protocol) {
                Ok(wid) => Some(wid),
                Err(err) => {
                    tracing::warn!("cannot obtain {} worker: {}", protocol, err);
                    if let Some(q) = self.queues.get_mut(protocol) {
                        q.rollback_start(&host, job_id);
                    }
                    self.fail_job(job_id, err);
                    None
                }
            },
        };
        if let Some(wid) = wid {
            self.bind_and_dispatch(wid, job_id);
        }
        self.arm_tick(protocol);
    }

    fn spawn_worker(&mut self, protocol: &str) -> Result<WorkerId, JobError> {
        let caps = self
            .registry
            .lookup(protocol)
            .ok_or_else(|| JobError::new(ErrorKind::UnsupportedProtocol, protocol))?;
        let wid = WorkerId(self.next_worker);
        self.next_worker += 1;
        let LaunchedWorker { pid, port } = self.launcher.launch(wid, protocol, &caps.exec)?;
        tracing::debug!("{}: spawned {} worker, pid {}", wid, protocol, pid);
        self.workers
            .insert(wid, Worker::new(wid, protocol, pid, port));
        Ok(wid)
    }

    /// Bind a worker to a job: push identity/config only when the worker is
    /// fresh or its identity differs, then dispatch the job's command.
    fn bind_and_dispatch(&mut self, wid: WorkerId, job_id: JobId) {
        let (url, protocol, meta_out, frame) = {
            let Some(entry) = self.entry(job_id) else {
                self.release_worker(wid);
                return;
            };
            let frame = match entry.initial_frame() {
                Ok(f) => f,
                Err(err) => {
                    self.release_worker(wid);
                    self.fail_job(job_id, err);
                    return;
                }
            };
            (
                entry.url.clone(),
                entry.protocol.clone(),
                entry.meta_out.clone(),
                frame,
            )
        };
        let target = match WorkerIdentity::from_url(&protocol, &url) {
            Ok(t) => t,
            Err(err) => {
                self.release_worker(wid);
                self.fail_job(job_id, err);
                return;
            }
        };
        let session_map = self.cfg.session.to_worker_map();
        {
            let Some(w) = self.workers.get_mut(&wid) else { return };
            let host_args = target.to_host_args();
            let moved = w.identity.as_ref() != Some(&target);
            if moved {
                w.send(Frame::new(Command::SetHost.tag(), host_args.encode()));
                w.identity = Some(target);
            }
            if moved || !w.config_pushed {
                w.send(Frame::new(
                    Command::Config.tag(),
                    payload::encode_map(&session_map),
                ));
                w.config_pushed = true;
            }
            if !meta_out.is_empty() {
                w.send(Frame::new(
                    Command::MetaData.tag(),
                    payload::encode_map(&meta_out),
                ));
            }
            w.job = Some(job_id);
            w.send(frame);
        }
        if let Some(entry) = self.entry_mut(job_id) {
            entry.state = JobState::Running;
            entry.worker = Some(wid);
            if let Some(sink) = &entry.sink {
                let _ = sink.send(JobUpdate::Started);
            }
        }
        let dead = self.workers.get(&wid).map(|w| w.dead).unwrap_or(true);
        if dead {
            self.on_worker_gone(wid);
            return;
        }
        self.sync_worker_gate(job_id);
    }

    /// Apply the effective delivery gate (user suspend or pump suspend) to
    /// the job's worker, pumping buffered frames when it opens.
    pub(crate) fn sync_worker_gate(&mut self, id: JobId) {
        let Some(entry) = self.entry(id) else { return };
        let internal = matches!(&entry.kind, JobKind::Transfer(t) if t.internal_suspended);
        let paused = entry.suspended || internal;
        let Some(wid) = entry.worker else { return };
        {
            let Some(w) = self.workers.get_mut(&wid) else { return };
            if paused {
                w.conn.suspend();
                w.port.pause_reads();
            } else {
                w.conn.resume();
                w.port.resume_reads();
            }
        }
        if !paused {
            self.pump_worker(wid);
        }
    }

    /// Deliver queued frames to the bound job until the gate closes or the
    /// queue empties.
    fn pump_worker(&mut self, wid: WorkerId) {
        loop {
            let (job_id, frame) = {
                let Some(w) = self.workers.get_mut(&wid) else { return };
                if w.dead {
                    return;
                }
                let Some(job_id) = w.job else {
                    // Idle workers have no listener; drop chatter.
                    while w.conn.next_frame().is_some() {}
                    return;
                };
                match w.conn.next_frame() {
                    Some(frame) => (job_id, frame),
                    None => return,
                }
            };
            match decode_event(&frame) {
                Ok(ev) => self.dispatch_worker_event(wid, job_id, ev),
                Err(err) => {
                    tracing::warn!("{}: undecodable frame (tag {}): {}", wid, frame.tag, err);
                }
            }
        }
    }

    fn dispatch_worker_event(&mut self, wid: WorkerId, job_id: JobId, ev: WorkerEvent) {
        match ev {
            WorkerEvent::MessageBox(req) => self.answer_message_box(wid, req),
            WorkerEvent::MetaData(map) => {
                if let Some(entry) = self.entry_mut(job_id) {
                    entry.meta_in.extend(map.clone());
                }
                self.bubble(job_id, JobUpdate::MetaData(map));
            }
            ev => {
                #[derive(Clone, Copy)]
                enum KindTag {
                    Simple,
                    Transfer,
                    List,
                    None,
                }
                let tag = match self.entry(job_id).map(|e| &e.kind) {
                    Some(JobKind::Simple(_)) => KindTag::Simple,
                    Some(JobKind::Transfer(_)) => KindTag::Transfer,
                    Some(JobKind::List(_)) => KindTag::List,
                    _ => KindTag::None,
                };
                match tag {
                    KindTag::Simple => self.simple_on_event(job_id, ev),
                    KindTag::Transfer => self.transfer_on_event(job_id, ev),
                    KindTag::List => self.list_on_event(job_id, ev),
                    KindTag::None => {
                        tracing::debug!("{}: event for vanished job {}", wid, job_id);
                    }
                }
            }
        }
    }

    /// Answer an interactive prompt. Auth prompts consult the credential
    /// cache before the decision provider; everything else goes straight
    /// to the provider.
    fn answer_message_box(&mut self, wid: WorkerId, req: MessageBoxMsg) {
        let (result, data) = if req.kind == MessageBoxKind::AuthPrompt {
            match AuthInfo::decode(&req.data) {
                Ok(info) => {
                    if let Some(hit) = self.credentials.check(&info) {
                        (ANSWER_OK, hit.encode())
                    } else if let Some(filled) = self.decisions.request_credentials(&info) {
                        self.credentials.store(&filled);
                        (ANSWER_OK, filled.encode())
                    } else {
                        (ANSWER_CANCEL, Vec::new())
                    }
                }
                Err(err) => {
                    tracing::warn!("{}: bad auth prompt payload: {}", wid, err);
                    (ANSWER_CANCEL, Vec::new())
                }
            }
        } else {
            (self.decisions.message_box(&req), Vec::new())
        };
        let frame = Frame::new(
            Command::MessageBoxAnswer.tag(),
            MessageBoxAnswer { result, data }.encode(),
        );
        if let Some(w) = self.workers.get_mut(&wid) {
            w.send(frame);
        }
    }

    /// Deliver an update to the nearest sink up the ownership chain.
    pub(crate) fn bubble(&self, id: JobId, update: JobUpdate) {
        let mut cursor = id;
        loop {
            let Some(entry) = self.jobs.get(&cursor) else { return };
            if let Some(sink) = &entry.sink {
                let _ = sink.send(update);
                return;
            }
            match entry.parent {
                Some(parent) => cursor = parent,
                None => return,
            }
        }
    }

    /// Send a frame to the worker bound to a job; a failed send reports the
    /// worker as gone.
    pub(crate) fn send_to_worker_of(&mut self, id: JobId, frame: Frame) {
        let Some(wid) = self.entry(id).and_then(|e| e.worker) else {
            return;
        };
        let dead = {
            let Some(w) = self.workers.get_mut(&wid) else { return };
            w.send(frame);
            w.dead
        };
        if dead {
            self.on_worker_gone(wid);
        }
    }

    /// Remove a job and finish it with `outcome`.
    pub(crate) fn finish(&mut self, id: JobId, outcome: Result<(), JobError>) {
        if let Some(entry) = self.jobs.remove(&id) {
            self.finalize(entry, outcome, false, false);
        }
    }

    fn fail_job(&mut self, id: JobId, err: JobError) {
        self.finish(id, Err(err));
    }

    /// Fail on the next drain pass instead of synchronously.
    fn defer_fail(&mut self, id: JobId, err: JobError) {
        self.pending.push_back(InternalEvent::Fail(id, err));
    }

    /// Cancel quietly-or-not: sub-jobs die first (always quietly), the
    /// bound worker is killed outright, bookkeeping completes immediately.
    pub(crate) fn cancel_inner(&mut self, id: JobId, quiet: bool) {
        let Some(mut entry) = self.jobs.remove(&id) else { return };
        let children = std::mem::take(&mut entry.children);
        for child in children {
            self.cancel_inner(child, true);
        }
        let url = entry.url.clone();
        self.finalize(
            entry,
            Err(JobError::new(ErrorKind::UserCancelled, url)),
            quiet,
            true,
        );
    }

    /// Tear down all of a composite job's sub-jobs without notifying it.
    pub(crate) fn cancel_children(&mut self, id: JobId) {
        let children = match self.entry_mut(id) {
            Some(entry) => std::mem::take(&mut entry.children),
            None => return,
        };
        for child in children {
            self.cancel_inner(child, true);
        }
    }

    /// Single exit point for a job leaving the system: detach the worker,
    /// release queue bookkeeping, and notify the parent or the sink.
    pub(crate) fn finalize(
        &mut self,
        mut entry: JobEntry,
        outcome: Result<(), JobError>,
        quiet: bool,
        kill_worker: bool,
    ) {
        debug_assert!(entry.children.is_empty(), "sub-jobs outlive their parent");
        if let Some(wid) = entry.worker.take() {
            if kill_worker {
                self.kill_worker(wid);
            } else {
                self.release_worker(wid);
            }
        }
        if !entry.serial.is_none() && !entry.protocol.is_empty() {
            if let Some(q) = self.queues.get_mut(&entry.protocol) {
                q.complete(entry.id, &entry.host, entry.serial);
            }
            let protocol = entry.protocol.clone();
            self.arm_tick(&protocol);
        }
        entry.serial = Serial::NONE;
        entry.state = if outcome.is_ok() {
            JobState::Finished
        } else {
            JobState::Errored
        };
        match &outcome {
            Ok(()) => tracing::debug!("{} finished: {}", entry.id, entry.url),
            Err(err) => tracing::debug!("{} errored: {}", entry.id, err),
        }
        if let Some(parent) = entry.parent {
            if let Some(p) = self.jobs.get_mut(&parent) {
                p.children.retain(|c| *c != entry.id);
            }
            if !quiet {
                self.dispatch_child_result(parent, &entry, outcome);
            }
        } else if !quiet {
            if let Some(sink) = &entry.sink {
                let _ = sink.send(JobUpdate::Finished(outcome));
            }
        }
    }

    fn dispatch_child_result(
        &mut self,
        parent: JobId,
        child: &JobEntry,
        outcome: Result<(), JobError>,
    ) {
        #[derive(Clone, Copy)]
        enum ParentKind {
            List,
            Copy,
            Other,
        }
        let kind = match self.entry(parent).map(|e| &e.kind) {
            Some(JobKind::List(_)) => ParentKind::List,
            Some(JobKind::Copy(_)) => ParentKind::Copy,
            Some(_) => ParentKind::Other,
            None => return,
        };
        match kind {
            ParentKind::List => self.list_child_done(parent, child, outcome),
            ParentKind::Copy => self.copy_child_done(parent, child, outcome),
            ParentKind::Other => {
                tracing::warn!("{}: sub-job completion for non-composite parent", parent);
            }
        }
    }

    /// Detach a live job from its worker and release its queue slot while
    /// the job object stays alive. Used when the wire exchange is over but
    /// the job is not (redirect restart, listing waiting on children).
    pub(crate) fn detach_and_complete(&mut self, id: JobId) {
        let Some(entry) = self.entry_mut(id) else { return };
        let wid = entry.worker.take();
        let (protocol, host, serial) = (entry.protocol.clone(), entry.host.clone(), entry.serial);
        entry.serial = Serial::NONE;
        if let Some(wid) = wid {
            self.release_worker(wid);
        }
        if !serial.is_none() && !protocol.is_empty() {
            if let Some(q) = self.queues.get_mut(&protocol) {
                q.complete(id, &host, serial);
            }
            self.arm_tick(&protocol);
        }
    }

    /// The restart-in-place transition: detach the worker, complete queue
    /// bookkeeping, mutate the target, and go back to Queued under the same
    /// job identity.
    pub(crate) fn restart_job(&mut self, id: JobId, new_url: String) {
        tracing::debug!("{} restarting against {}", id, new_url);
        self.detach_and_complete(id);
        let Some(entry) = self.entry_mut(id) else { return };
        entry.url = new_url;
        entry.state = JobState::Unscheduled;
        if let JobKind::Transfer(t) = &mut entry.kind {
            t.resume_answered = false;
            t.data_requested = false;
            t.internal_suspended = false;
        }
        self.schedule(id);
    }

    /// Detach a worker after its job: back into the pool when alive,
    /// discarded when dead.
    fn release_worker(&mut self, wid: WorkerId) {
        let now = Instant::now();
        let reap_at = now + self.cfg.reap_interval();
        let (host, protocol) = {
            let Some(w) = self.workers.get_mut(&wid) else { return };
            w.job = None;
            if w.dead {
                self.workers.remove(&wid);
                return;
            }
            // Stale frames from the finished job have no listener.
            w.conn.resume();
            while w.conn.next_frame().is_some() {}
            w.port.resume_reads();
            (w.pool_host().to_string(), w.protocol.clone())
        };
        match self.queues.get_mut(&protocol) {
            Some(q) => {
                if q.pool.put(&host, wid, now) {
                    self.timer_requests.push(TimerRequest::Reap {
                        protocol,
                        at: reap_at,
                    });
                }
            }
            None => self.kill_worker(wid),
        }
    }

    pub(crate) fn kill_worker(&mut self, wid: WorkerId) {
        if let Some(mut w) = self.workers.remove(&wid) {
            tracing::debug!("{}: killing pid {}", wid, w.pid);
            w.port.kill();
            if let Some(q) = self.queues.get_mut(&w.protocol) {
                q.pool.remove(wid);
            }
        }
    }
}

/// Map a request onto its routing URL and kind-specific state.
fn build_kind(request: JobRequest) -> (String, JobKind) {
    match request {
        JobRequest::Stat { url } => (url, JobKind::Simple(SimpleState::new(SimpleCmd::Stat))),
        JobRequest::Mkdir { url, permissions } => (
            url,
            JobKind::Simple(SimpleState::new(SimpleCmd::Mkdir { permissions })),
        ),
        JobRequest::Delete { url, is_file } => (
            url,
            JobKind::Simple(SimpleState::new(SimpleCmd::Delete { is_file })),
        ),
        JobRequest::Chmod { url, permissions } => (
            url,
            JobKind::Simple(SimpleState::new(SimpleCmd::Chmod { permissions })),
        ),
        JobRequest::Chown { url, owner, group } => (
            url,
            JobKind::Simple(SimpleState::new(SimpleCmd::Chown { owner, group })),
        ),
        JobRequest::SetModificationTime { url, mtime_secs } => (
            url,
            JobKind::Simple(SimpleState::new(SimpleCmd::SetModificationTime { mtime_secs })),
        ),
        JobRequest::Rename {
            src,
            dst,
            overwrite,
        } => (
            src.clone(),
            JobKind::Simple(SimpleState::new(SimpleCmd::Rename {
                src,
                dst,
                overwrite,
            })),
        ),
        JobRequest::Symlink {
            target,
            dst,
            overwrite,
        } => (
            dst.clone(),
            JobKind::Simple(SimpleState::new(SimpleCmd::Symlink {
                target,
                dst,
                overwrite,
            })),
        ),
        JobRequest::Special { url, data } => (
            url,
            JobKind::Simple(SimpleState::new(SimpleCmd::Special { data })),
        ),
        JobRequest::Get { url } => (url, JobKind::Transfer(TransferState::get())),
        JobRequest::Put {
            url,
            overwrite,
            resume,
            permissions,
        } => (
            url,
            JobKind::Transfer(TransferState::put(overwrite, resume, permissions)),
        ),
        JobRequest::List {
            url,
            recursive,
            include_hidden,
        } => (
            url,
            JobKind::List(ListState::new(recursive, include_hidden)),
        ),
        JobRequest::Copy {
            src,
            dst,
            permissions,
            overwrite,
            move_source,
        } => (
            src.clone(),
            JobKind::Copy(CopyState::new(src, dst, permissions, overwrite, move_source)),
        ),
    }
}
