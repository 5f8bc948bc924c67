//! Job model: one entry per request, polymorphic over a tagged variant.
//!
//! A job moves Unscheduled -> Queued -> Running -> {Finished | Errored};
//! suspension is an orthogonal flag on Queued/Running. Composite jobs
//! (copy, recursive listing) own their sub-jobs through `children`; the
//! redirect restart is the one transition that takes a Running job back to
//! Queued with a mutated target while keeping its identity.

mod copy;
mod list;
mod simple;
mod transfer;

pub(crate) use copy::CopyState;
pub(crate) use list::ListState;
pub(crate) use simple::{SimpleCmd, SimpleState};
pub(crate) use transfer::TransferState;

use std::collections::BTreeMap;
use std::fmt;

use portage_wire::payload::UrlArgs;
use portage_wire::{Command, Frame, JobError};

use crate::event::JobSink;
use crate::serial::Serial;
use crate::worker::WorkerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Unscheduled,
    Queued,
    Running,
    Finished,
    Errored,
}

/// Kind-specific state. Concrete job kinds are variants, not subclasses;
/// shared fields live on [`JobEntry`].
#[derive(Debug)]
pub(crate) enum JobKind {
    Simple(SimpleState),
    Transfer(TransferState),
    List(ListState),
    Copy(CopyState),
}

/// One job as tracked by the scheduler core.
#[derive(Debug)]
pub(crate) struct JobEntry {
    pub id: JobId,
    pub state: JobState,
    /// Non-zero exactly while queued or running.
    pub serial: Serial,
    pub priority: i8,
    /// Current target; mutated by the redirect restart.
    pub url: String,
    /// Resolved wire protocol used for routing (empty until scheduled).
    pub protocol: String,
    /// Host key within the protocol queue (empty until scheduled).
    pub host: String,
    pub suspended: bool,
    pub worker: Option<WorkerId>,
    pub parent: Option<JobId>,
    pub children: Vec<JobId>,
    /// Update stream; top-level jobs only, sub-jobs report via `parent`.
    pub sink: Option<JobSink>,
    /// Metadata pushed to the worker alongside the command.
    pub meta_out: BTreeMap<String, String>,
    /// Metadata reported back by the worker.
    pub meta_in: BTreeMap<String, String>,
    pub kind: JobKind,
}

impl JobEntry {
    pub fn new(id: JobId, url: String, priority: i8, kind: JobKind) -> Self {
        Self {
            id,
            state: JobState::Unscheduled,
            serial: Serial::NONE,
            priority,
            url,
            protocol: String::new(),
            host: String::new(),
            suspended: false,
            worker: None,
            parent: None,
            children: Vec::new(),
            sink: None,
            meta_out: BTreeMap::new(),
            meta_in: BTreeMap::new(),
            kind,
        }
    }

    /// Build the wire command that starts this job on its worker.
    pub fn initial_frame(&self) -> Result<Frame, JobError> {
        match &self.kind {
            JobKind::Simple(s) => Ok(s.cmd.to_frame(&self.url)),
            JobKind::Transfer(t) => Ok(t.to_frame(&self.url)),
            JobKind::List(_) => Ok(Frame::new(
                Command::ListDir.tag(),
                UrlArgs {
                    url: self.url.clone(),
                }
                .encode(),
            )),
            JobKind::Copy(_) => Err(JobError::internal(
                "composite job cannot be dispatched to a worker",
                &self.url,
            )),
        }
    }
}
