//! The async edge around the synchronous core.
//!
//! One control task owns the [`Core`] and is the only thing that mutates
//! it; this loop multiplexes control messages, worker traffic and reap
//! timers into it. The [`Orchestrator`] handle is the embedder-facing
//! surface: cheap to clone, safe from any task.

use std::time::Instant;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::config::{PortageConfig, SessionConfig};
use crate::decision::DecisionProvider;
use crate::event::{JobSpec, JobUpdate};
use crate::job::JobId;
use crate::registry::ProtocolRegistry;
use crate::scheduler::{Core, TimerRequest};
use crate::spawn::{ProcessLauncher, WorkerSignal};

enum ControlMsg {
    Submit {
        spec: JobSpec,
        sink: mpsc::UnboundedSender<JobUpdate>,
        reply: oneshot::Sender<JobId>,
    },
    Cancel(JobId),
    SetPriority(JobId, i8),
    Suspend(JobId),
    Resume(JobId),
    SupplyData(JobId, Vec<u8>),
    Reconfigure(SessionConfig),
    Shutdown,
}

/// Handle to a running orchestrator.
#[derive(Clone)]
pub struct Orchestrator {
    tx: mpsc::UnboundedSender<ControlMsg>,
}

impl Orchestrator {
    /// Start the control task. Must be called within a tokio runtime.
    pub fn start(
        cfg: PortageConfig,
        registry: Arc<dyn ProtocolRegistry>,
        decisions: Arc<dyn DecisionProvider>,
    ) -> Result<Self> {
        let socket_dir = match &cfg.socket_dir {
            Some(dir) => dir.clone(),
            None => xdg::BaseDirectories::with_prefix("portage")
                .context("resolve XDG dirs")?
                .get_state_home()
                .join("sockets"),
        };
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let launcher = ProcessLauncher::new(socket_dir, cfg.connect_timeout(), signal_tx);
        let core = Core::new(cfg, registry, decisions, Box::new(launcher));
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(control_loop(core, rx, signal_rx));
        Ok(Self { tx })
    }

    /// Submit a job; returns its id and the update stream ending with
    /// [`JobUpdate::Finished`].
    pub async fn submit(
        &self,
        spec: JobSpec,
    ) -> Result<(JobId, mpsc::UnboundedReceiver<JobUpdate>)> {
        let (sink, updates) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ControlMsg::Submit {
                spec,
                sink,
                reply: reply_tx,
            })
            .map_err(|_| anyhow::anyhow!("orchestrator stopped"))?;
        let id = reply_rx.await.context("orchestrator stopped")?;
        Ok((id, updates))
    }

    pub fn cancel(&self, id: JobId) {
        let _ = self.tx.send(ControlMsg::Cancel(id));
    }

    pub fn set_priority(&self, id: JobId, priority: i8) {
        let _ = self.tx.send(ControlMsg::SetPriority(id, priority));
    }

    pub fn suspend(&self, id: JobId) {
        let _ = self.tx.send(ControlMsg::Suspend(id));
    }

    pub fn resume(&self, id: JobId) {
        let _ = self.tx.send(ControlMsg::Resume(id));
    }

    /// Answer a [`JobUpdate::DataRequest`] with the next upload chunk
    /// (empty = end of stream).
    pub fn send_data(&self, id: JobId, bytes: Vec<u8>) {
        let _ = self.tx.send(ControlMsg::SupplyData(id, bytes));
    }

    /// Replace the session configuration (proxy, language, charset,
    /// timeouts) and re-push it to live workers.
    pub fn reconfigure(&self, session: SessionConfig) {
        let _ = self.tx.send(ControlMsg::Reconfigure(session));
    }

    /// Stop everything: outstanding jobs fail as cancelled, workers are
    /// killed.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ControlMsg::Shutdown);
    }
}

async fn control_loop(
    mut core: Core,
    mut rx: mpsc::UnboundedReceiver<ControlMsg>,
    mut signals: mpsc::UnboundedReceiver<WorkerSignal>,
) {
    let (timer_tx, mut timers) = mpsc::unbounded_channel::<String>();
    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(ControlMsg::Submit { spec, sink, reply }) => {
                    let id = core.submit(spec, sink);
                    let _ = reply.send(id);
                }
                Some(ControlMsg::Cancel(id)) => core.cancel(id),
                Some(ControlMsg::SetPriority(id, priority)) => core.set_priority(id, priority),
                Some(ControlMsg::Suspend(id)) => core.suspend(id),
                Some(ControlMsg::Resume(id)) => core.resume(id),
                Some(ControlMsg::SupplyData(id, bytes)) => core.supply_data(id, bytes),
                Some(ControlMsg::Reconfigure(session)) => core.reconfigure(session),
                Some(ControlMsg::Shutdown) | None => {
                    core.shutdown();
                    core.drain();
                    break;
                }
            },
            signal = signals.recv() => match signal {
                Some(WorkerSignal::Frame(wid, frame)) => core.on_worker_frame(wid, frame),
                Some(WorkerSignal::Gone(wid)) => core.on_worker_gone(wid),
                None => {}
            },
            fired = timers.recv() => {
                if let Some(protocol) = fired {
                    core.on_reap(&protocol, Instant::now());
                }
            }
        }
        core.drain();
        for request in core.take_timer_requests() {
            let TimerRequest::Reap { protocol, at } = request;
            let timer_tx = timer_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await;
                let _ = timer_tx.send(protocol);
            });
        }
    }
}
