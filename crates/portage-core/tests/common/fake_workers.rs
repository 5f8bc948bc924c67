//! Fake workers: every "spawned" worker is a shared frame recorder the
//! test inspects and answers by injecting frames into the core.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

use portage_core::config::PortageConfig;
use portage_core::decision::AutoDecline;
use portage_core::event::{JobSpec, JobUpdate};
use portage_core::job::JobId;
use portage_core::registry::{ProtocolCaps, StaticRegistry};
use portage_core::scheduler::Core;
use portage_core::spawn::{LaunchedWorker, WorkerLauncher};
use portage_core::worker::{WorkerId, WorkerPort};
use portage_wire::payload::ErrorMsg;
use portage_wire::{ErrorKind, Frame, JobError, Msg};
use tokio::sync::mpsc::UnboundedReceiver;

/// Everything one fake worker observed.
#[derive(Debug, Default)]
pub struct FakeWorkerState {
    pub sent: Vec<Frame>,
    pub paused: bool,
    pub killed: bool,
}

pub type SharedWorker = Arc<Mutex<FakeWorkerState>>;

struct FakePort {
    state: SharedWorker,
}

impl WorkerPort for FakePort {
    fn send(&mut self, frame: Frame) -> io::Result<()> {
        self.state.lock().unwrap().sent.push(frame);
        Ok(())
    }

    fn pause_reads(&mut self) {
        self.state.lock().unwrap().paused = true;
    }

    fn resume_reads(&mut self) {
        self.state.lock().unwrap().paused = false;
    }

    fn kill(&mut self) {
        self.state.lock().unwrap().killed = true;
    }
}

#[derive(Default)]
pub struct FakeLauncher {
    pub launched: Arc<Mutex<Vec<(WorkerId, String)>>>,
    pub states: Arc<Mutex<HashMap<WorkerId, SharedWorker>>>,
    pub fail_launches: Arc<Mutex<bool>>,
}

impl WorkerLauncher for FakeLauncher {
    fn launch(
        &mut self,
        id: WorkerId,
        protocol: &str,
        _exec: &str,
    ) -> Result<LaunchedWorker, JobError> {
        if *self.fail_launches.lock().unwrap() {
            return Err(JobError::new(ErrorKind::CannotLaunchWorker, protocol));
        }
        let state: SharedWorker = Arc::default();
        self.launched
            .lock()
            .unwrap()
            .push((id, protocol.to_string()));
        self.states.lock().unwrap().insert(id, Arc::clone(&state));
        Ok(LaunchedWorker {
            pid: 4200 + id.0 as u32,
            port: Box::new(FakePort { state }),
        })
    }
}

/// A core plus handles into its fake workers.
pub struct TestBed {
    pub core: Core,
    pub launched: Arc<Mutex<Vec<(WorkerId, String)>>>,
    pub states: Arc<Mutex<HashMap<WorkerId, SharedWorker>>>,
    pub fail_launches: Arc<Mutex<bool>>,
}

/// Registry with the protocols the tests use. "file" can be a rename/copy
/// partner for "ftp"; "http" is plain.
pub fn test_registry() -> StaticRegistry {
    let mut ftp = ProtocolCaps::new("portage-worker-ftp");
    ftp.can_copy_from_file = true;
    ftp.can_rename_from_file = true;
    let mut file = ProtocolCaps::new("portage-worker-file");
    file.class = portage_core::registry::ProtocolClass::Local;
    StaticRegistry::new()
        .with("http", ProtocolCaps::new("portage-worker-http"))
        .with("ftp", ftp)
        .with("file", file)
}

impl TestBed {
    pub fn new() -> Self {
        Self::with_config(PortageConfig::default())
    }

    pub fn with_config(cfg: PortageConfig) -> Self {
        let launcher = FakeLauncher::default();
        let launched = Arc::clone(&launcher.launched);
        let states = Arc::clone(&launcher.states);
        let fail_launches = Arc::clone(&launcher.fail_launches);
        let core = Core::new(
            cfg,
            Arc::new(test_registry()),
            Arc::new(AutoDecline),
            Box::new(launcher),
        );
        Self {
            core,
            launched,
            states,
            fail_launches,
        }
    }

    pub fn submit(&mut self, spec: JobSpec) -> (JobId, UnboundedReceiver<JobUpdate>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let id = self.core.submit(spec, tx);
        self.core.drain();
        (id, rx)
    }

    /// Inject one worker frame and settle the core.
    pub fn worker_sends(&mut self, wid: WorkerId, msg: Msg, payload: Vec<u8>) {
        self.core.on_worker_frame(wid, Frame::new(msg.tag(), payload));
        self.core.drain();
    }

    pub fn worker_finishes(&mut self, wid: WorkerId) {
        self.worker_sends(wid, Msg::Finished, Vec::new());
    }

    pub fn worker_errors(&mut self, wid: WorkerId, kind: ErrorKind, operand: &str) {
        let err = JobError::new(kind, operand);
        self.worker_sends(wid, Msg::Error, ErrorMsg::from_job_error(&err).encode());
    }

    pub fn launch_count(&self) -> usize {
        self.launched.lock().unwrap().len()
    }

    pub fn launched_id(&self, index: usize) -> WorkerId {
        self.launched.lock().unwrap()[index].0
    }

    /// Frames sent to a worker so far.
    pub fn frames_of(&self, wid: WorkerId) -> Vec<Frame> {
        self.states.lock().unwrap()[&wid].lock().unwrap().sent.clone()
    }

    pub fn is_paused(&self, wid: WorkerId) -> bool {
        self.states.lock().unwrap()[&wid].lock().unwrap().paused
    }

    pub fn is_killed(&self, wid: WorkerId) -> bool {
        self.states.lock().unwrap()[&wid].lock().unwrap().killed
    }

    /// Tags of all frames sent to a worker, in order.
    pub fn tags_of(&self, wid: WorkerId) -> Vec<u32> {
        self.frames_of(wid).iter().map(|f| f.tag).collect()
    }

    /// The most recent frame with `tag` sent to a worker.
    pub fn last_frame_with(&self, wid: WorkerId, tag: u32) -> Option<Frame> {
        self.frames_of(wid).into_iter().rev().find(|f| f.tag == tag)
    }
}

/// Collect all updates currently buffered on a job's receiver.
pub fn drain_updates(rx: &mut UnboundedReceiver<JobUpdate>) -> Vec<JobUpdate> {
    let mut out = Vec::new();
    while let Ok(update) = rx.try_recv() {
        out.push(update);
    }
    out
}

/// The terminal result among drained updates, if any.
pub fn final_result(updates: &[JobUpdate]) -> Option<Result<(), JobError>> {
    updates.iter().rev().find_map(|u| match u {
        JobUpdate::Finished(res) => Some(res.clone()),
        _ => None,
    })
}
