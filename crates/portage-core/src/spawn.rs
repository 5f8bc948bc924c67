//! Worker spawn contract.
//!
//! A worker executable is started detached with a single argument: the
//! path of a Unix socket to connect back to. The orchestrator waits for
//! that connection under a timeout (short in production, long when a
//! human is debugging the worker), then reads frames off it from a
//! per-worker task. Failure to start or connect surfaces to the job that
//! triggered the spawn.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixListener;
use tokio::sync::{mpsc, watch};

use portage_wire::{ErrorKind, Frame, FrameDecoder, JobError};

use crate::worker::{WorkerId, WorkerPort};

/// A spawned worker: its pid and the outbound port the core talks through.
pub struct LaunchedWorker {
    pub pid: u32,
    pub port: Box<dyn WorkerPort>,
}

/// Spawns workers. The core calls this synchronously from the control
/// task; tests substitute scripted fakes.
pub trait WorkerLauncher: Send {
    fn launch(
        &mut self,
        id: WorkerId,
        protocol: &str,
        exec: &str,
    ) -> Result<LaunchedWorker, JobError>;
}

/// Inbound traffic from worker connections, delivered to the control loop.
#[derive(Debug)]
pub enum WorkerSignal {
    Frame(WorkerId, Frame),
    /// Connection broke: EOF, read/write error, or connect timeout.
    Gone(WorkerId),
}

enum PortOp {
    Frame(Frame),
    Kill,
}

/// Real launcher: one process plus one rendezvous socket per worker.
/// Must be driven from within a tokio runtime.
pub struct ProcessLauncher {
    socket_dir: PathBuf,
    connect_timeout: Duration,
    feed: mpsc::UnboundedSender<WorkerSignal>,
}

impl ProcessLauncher {
    pub fn new(
        socket_dir: PathBuf,
        connect_timeout: Duration,
        feed: mpsc::UnboundedSender<WorkerSignal>,
    ) -> Self {
        Self {
            socket_dir,
            connect_timeout,
            feed,
        }
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(
        &mut self,
        id: WorkerId,
        protocol: &str,
        exec: &str,
    ) -> Result<LaunchedWorker, JobError> {
        std::fs::create_dir_all(&self.socket_dir)
            .map_err(|e| JobError::internal(format!("socket dir: {e}"), protocol))?;
        let path = self
            .socket_dir
            .join(format!("portage-{}-{}.sock", std::process::id(), id.0));
        let _ = std::fs::remove_file(&path);

        let std_listener = std::os::unix::net::UnixListener::bind(&path)
            .map_err(|_| JobError::new(ErrorKind::CouldNotBind, path.display().to_string()))?;
        std_listener
            .set_nonblocking(true)
            .map_err(|_| JobError::new(ErrorKind::CouldNotListen, path.display().to_string()))?;
        let listener = UnixListener::from_std(std_listener)
            .map_err(|_| JobError::new(ErrorKind::CouldNotListen, path.display().to_string()))?;

        let child = tokio::process::Command::new(exec)
            .arg(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                JobError::new(ErrorKind::CannotLaunchWorker, format!("{exec}: {e}"))
            })?;
        let pid = child.id().unwrap_or(0);
        tracing::debug!(
            "{}: launched {} worker '{}' pid {} at {}",
            id,
            protocol,
            exec,
            pid,
            path.display()
        );

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (pause_tx, pause_rx) = watch::channel(false);
        tokio::spawn(connection_task(
            id,
            listener,
            path,
            child,
            out_rx,
            pause_rx,
            self.feed.clone(),
            self.connect_timeout,
        ));
        Ok(LaunchedWorker {
            pid,
            port: Box::new(ProcessPort {
                out: out_tx,
                pause: pause_tx,
            }),
        })
    }
}

struct ProcessPort {
    out: mpsc::UnboundedSender<PortOp>,
    pause: watch::Sender<bool>,
}

impl WorkerPort for ProcessPort {
    fn send(&mut self, frame: Frame) -> io::Result<()> {
        self.out
            .send(PortOp::Frame(frame))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "worker channel closed"))
    }

    fn pause_reads(&mut self) {
        let _ = self.pause.send(true);
    }

    fn resume_reads(&mut self) {
        let _ = self.pause.send(false);
    }

    fn kill(&mut self) {
        let _ = self.out.send(PortOp::Kill);
    }
}

/// Owns one worker connection end to end: rendezvous accept, the write
/// side, and the read side with pause support.
#[allow(clippy::too_many_arguments)]
async fn connection_task(
    id: WorkerId,
    listener: UnixListener,
    path: PathBuf,
    mut child: tokio::process::Child,
    mut out_rx: mpsc::UnboundedReceiver<PortOp>,
    mut pause_rx: watch::Receiver<bool>,
    feed: mpsc::UnboundedSender<WorkerSignal>,
    connect_timeout: Duration,
) {
    let stream = match tokio::time::timeout(connect_timeout, listener.accept()).await {
        Ok(Ok((stream, _))) => stream,
        Ok(Err(err)) => {
            tracing::warn!("{}: accept failed: {}", id, err);
            let _ = std::fs::remove_file(&path);
            let _ = child.start_kill();
            let _ = child.wait().await;
            let _ = feed.send(WorkerSignal::Gone(id));
            return;
        }
        Err(_) => {
            tracing::warn!("{}: worker did not connect within {:?}", id, connect_timeout);
            let _ = std::fs::remove_file(&path);
            let _ = child.start_kill();
            let _ = child.wait().await;
            let _ = feed.send(WorkerSignal::Gone(id));
            return;
        }
    };
    let _ = std::fs::remove_file(&path);

    let (mut reader, mut writer) = stream.into_split();
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut pause_closed = false;
    loop {
        let paused = *pause_rx.borrow();
        tokio::select! {
            op = out_rx.recv() => match op {
                Some(PortOp::Frame(frame)) => {
                    if writer.write_all(&frame.encode()).await.is_err() {
                        let _ = feed.send(WorkerSignal::Gone(id));
                        break;
                    }
                }
                Some(PortOp::Kill) | None => {
                    // Core-initiated kill or handle dropped; no Gone signal
                    // needed, the core already forgot this worker.
                    break;
                }
            },
            read = reader.read(&mut buf), if !paused => match read {
                Ok(0) => {
                    let _ = feed.send(WorkerSignal::Gone(id));
                    break;
                }
                Ok(n) => {
                    decoder.feed(&buf[..n]);
                    loop {
                        match decoder.next_frame() {
                            Ok(Some(frame)) => {
                                let _ = feed.send(WorkerSignal::Frame(id, frame));
                            }
                            Ok(None) => break,
                            Err(err) => {
                                tracing::warn!("{}: corrupt frame stream: {}", id, err);
                                let _ = feed.send(WorkerSignal::Gone(id));
                                let _ = child.start_kill();
                                let _ = child.wait().await;
                                return;
                            }
                        }
                    }
                }
                Err(err) => {
                    tracing::debug!("{}: read error: {}", id, err);
                    let _ = feed.send(WorkerSignal::Gone(id));
                    break;
                }
            },
            changed = pause_rx.changed(), if !pause_closed => {
                if changed.is_err() {
                    pause_closed = true;
                }
            }
        }
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}
