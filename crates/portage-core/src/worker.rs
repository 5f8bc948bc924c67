//! Orchestrator-side worker handle.
//!
//! One `Worker` per worker process: its identity, process id, inbound
//! [`Connection`] gate and outbound [`WorkerPort`]. The handle also decodes
//! generic frames into typed [`WorkerEvent`]s for the bound job.

use std::collections::BTreeMap;
use std::fmt;
use std::io;

use portage_wire::entry::decode_entries;
use portage_wire::payload::{self, ErrorMsg, MessageBoxMsg};
use portage_wire::{Connection, DirEntry, Frame, JobError, Msg, WireError};

use crate::identity::WorkerIdentity;
use crate::job::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Outbound side of a worker channel, plus process control.
///
/// The real implementation bridges to the driver's writer task and child
/// process handle; tests substitute a recording fake.
pub trait WorkerPort: Send {
    fn send(&mut self, frame: Frame) -> io::Result<()>;
    /// Stop reading from the worker socket so kernel backpressure applies.
    fn pause_reads(&mut self);
    fn resume_reads(&mut self);
    /// Kill the worker process outright. No graceful shutdown.
    fn kill(&mut self);
}

/// Typed view of one worker -> orchestrator frame.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Data(Vec<u8>),
    DataRequest,
    Opened,
    Connected,
    Finished,
    Error(JobError),
    StatResult(DirEntry),
    Entries(Vec<DirEntry>),
    ResumeOffer(u64),
    Written(u64),
    TotalSize(u64),
    ProcessedSize(u64),
    Position(u64),
    Speed(u64),
    Redirection(String),
    Mimetype(String),
    Warning(String),
    InfoMessage(String),
    MessageBox(MessageBoxMsg),
    MetaData(BTreeMap<String, String>),
    NeedSubUrlData,
}

/// Decode a raw frame into a typed event.
pub fn decode_event(frame: &Frame) -> Result<WorkerEvent, WireError> {
    let msg = Msg::from_tag(frame.tag)?;
    let p = &frame.payload;
    Ok(match msg {
        Msg::Data => WorkerEvent::Data(p.clone()),
        Msg::DataReq => WorkerEvent::DataRequest,
        Msg::Opened => WorkerEvent::Opened,
        Msg::Connected => WorkerEvent::Connected,
        Msg::Finished => WorkerEvent::Finished,
        Msg::Error => WorkerEvent::Error(ErrorMsg::decode(p)?.to_job_error()),
        Msg::StatEntry => WorkerEvent::StatResult(DirEntry::decode(p)?),
        Msg::ListEntries => WorkerEvent::Entries(decode_entries(p)?),
        Msg::ResumeOffer => WorkerEvent::ResumeOffer(payload::decode_u64(p, "resume offset")?),
        Msg::Written => WorkerEvent::Written(payload::decode_u64(p, "written")?),
        Msg::TotalSize => WorkerEvent::TotalSize(payload::decode_u64(p, "total size")?),
        Msg::ProcessedSize => {
            WorkerEvent::ProcessedSize(payload::decode_u64(p, "processed size")?)
        }
        Msg::Position => WorkerEvent::Position(payload::decode_u64(p, "position")?),
        Msg::Speed => WorkerEvent::Speed(payload::decode_u64(p, "speed")?),
        Msg::Redirection => WorkerEvent::Redirection(payload::decode_str(p, "redirect url")?),
        Msg::Mimetype => WorkerEvent::Mimetype(payload::decode_str(p, "mimetype")?),
        Msg::Warning => WorkerEvent::Warning(payload::decode_str(p, "warning")?),
        Msg::InfoMessage => WorkerEvent::InfoMessage(payload::decode_str(p, "info message")?),
        Msg::MessageBox => WorkerEvent::MessageBox(MessageBoxMsg::decode(p)?),
        Msg::MetaData => WorkerEvent::MetaData(payload::decode_map(p)?),
        Msg::NeedSubUrlData => WorkerEvent::NeedSubUrlData,
    })
}

/// One worker process as seen by the scheduler.
pub struct Worker {
    pub id: WorkerId,
    pub protocol: String,
    /// Identity last pushed with SetHost; None for a fresh worker.
    pub identity: Option<WorkerIdentity>,
    pub pid: u32,
    pub conn: Connection,
    pub port: Box<dyn WorkerPort>,
    /// Bound job; None while idle in the pool.
    pub job: Option<JobId>,
    pub dead: bool,
    /// Session config has been pushed and is current.
    pub config_pushed: bool,
}

impl Worker {
    pub fn new(id: WorkerId, protocol: impl Into<String>, pid: u32, port: Box<dyn WorkerPort>) -> Self {
        Self {
            id,
            protocol: protocol.into(),
            identity: None,
            pid,
            conn: Connection::new(),
            port,
            job: None,
            dead: false,
            config_pushed: false,
        }
    }

    /// Host this worker is connected to, for pool keying.
    pub fn pool_host(&self) -> &str {
        self.identity.as_ref().map(|i| i.host.as_str()).unwrap_or("")
    }

    pub fn send(&mut self, frame: Frame) {
        if self.dead {
            return;
        }
        if let Err(err) = self.port.send(frame) {
            tracing::warn!("{}: send failed, marking dead: {}", self.id, err);
            self.dead = true;
        }
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("protocol", &self.protocol)
            .field("pid", &self.pid)
            .field("job", &self.job)
            .field("dead", &self.dead)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portage_wire::payload::encode_u64;
    use portage_wire::ErrorKind;

    #[test]
    fn decode_finished_and_error() {
        let ev = decode_event(&Frame::new(Msg::Finished.tag(), vec![])).unwrap();
        assert!(matches!(ev, WorkerEvent::Finished));

        let err = JobError::new(ErrorKind::DoesNotExist, "ftp://x/y");
        let frame = Frame::new(Msg::Error.tag(), ErrorMsg::from_job_error(&err).encode());
        match decode_event(&frame).unwrap() {
            WorkerEvent::Error(e) => assert_eq!(e, err),
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[test]
    fn decode_resume_offer_offset() {
        let frame = Frame::new(Msg::ResumeOffer.tag(), encode_u64(4096));
        match decode_event(&frame).unwrap() {
            WorkerEvent::ResumeOffer(off) => assert_eq!(off, 4096),
            other => panic!("expected resume offer, got {other:?}"),
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(decode_event(&Frame::new(9999, vec![])).is_err());
    }
}
