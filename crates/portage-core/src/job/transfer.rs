//! Streamed transfers: get and put.
//!
//! Redirects restart the same job in place against the new target; the
//! visited list bounds identical-target repeats. For puts the resume
//! negotiation gates payload bytes: nothing is sent until the worker's
//! resume offer has been answered.

use std::collections::VecDeque;

use portage_wire::payload::{self, GetArgs, PutArgs};
use portage_wire::{Command, ErrorKind, Frame, JobError};

use crate::event::JobUpdate;
use crate::job::{JobId, JobKind};
use crate::scheduler::Core;
use crate::worker::WorkerEvent;

/// Identical redirect targets tolerated before the chain counts as a cycle.
pub(crate) const REDIRECT_REPEAT_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferDirection {
    Get,
    Put,
}

#[derive(Debug)]
pub(crate) struct TransferState {
    pub dir: TransferDirection,
    pub overwrite: bool,
    /// Put: we are willing to resume a partial destination.
    pub resume: bool,
    pub permissions: i32,
    /// Get: start offset (non-zero when feeding a resumed put).
    pub offset: u64,
    pub handle_redirects: bool,
    /// Redirect targets seen, in order, for cycle detection.
    pub visited: Vec<String>,
    pub pending_redirect: Option<String>,
    pub pending_error: Option<JobError>,
    pub mimetype: Option<String>,
    /// Flow-control suspend owned by the copy pump, distinct from the
    /// user-visible suspended flag.
    pub internal_suspended: bool,
    pub resume_answered: bool,
    /// A data request arrived before the resume answer; serviced after.
    pub data_requested: bool,
    /// Caller-supplied chunks held back until they may be sent.
    pub pending_out: VecDeque<Vec<u8>>,
}

impl TransferState {
    fn new(dir: TransferDirection) -> Self {
        Self {
            dir,
            overwrite: false,
            resume: false,
            permissions: -1,
            offset: 0,
            handle_redirects: true,
            visited: Vec::new(),
            pending_redirect: None,
            pending_error: None,
            mimetype: None,
            internal_suspended: false,
            resume_answered: false,
            data_requested: false,
            pending_out: VecDeque::new(),
        }
    }

    pub fn get() -> Self {
        Self::new(TransferDirection::Get)
    }

    pub fn put(overwrite: bool, resume: bool, permissions: i32) -> Self {
        let mut state = Self::new(TransferDirection::Put);
        state.overwrite = overwrite;
        state.resume = resume;
        state.permissions = permissions;
        state
    }

    /// Command frame against the job's current URL; puts re-encode their
    /// arguments here after a redirect.
    pub fn to_frame(&self, url: &str) -> Frame {
        match self.dir {
            TransferDirection::Get => Frame::new(
                Command::Get.tag(),
                GetArgs {
                    url: url.into(),
                    offset: self.offset,
                }
                .encode(),
            ),
            TransferDirection::Put => Frame::new(
                Command::Put.tag(),
                PutArgs {
                    url: url.into(),
                    overwrite: self.overwrite,
                    resume: self.resume,
                    permissions: self.permissions,
                }
                .encode(),
            ),
        }
    }
}

impl Core {
    pub(crate) fn transfer_on_event(&mut self, id: JobId, ev: WorkerEvent) {
        match ev {
            WorkerEvent::Mimetype(m) => {
                if let Some(t) = self.transfer_mut(id) {
                    t.mimetype = Some(m.clone());
                }
                self.bubble(id, JobUpdate::Mimetype(m));
            }
            WorkerEvent::Data(bytes) => {
                if let Some(copy) = self.parent_copy(id) {
                    self.copy_pump_data(copy, id, bytes);
                } else {
                    self.bubble(id, JobUpdate::Data(bytes));
                }
            }
            WorkerEvent::DataRequest => {
                if let Some(copy) = self.parent_copy(id) {
                    self.copy_pump_datareq(copy, id);
                } else {
                    self.transfer_data_requested(id);
                }
            }
            WorkerEvent::ResumeOffer(offset) => {
                if let Some(copy) = self.parent_copy(id) {
                    self.copy_resume_offer(copy, id, offset);
                } else {
                    self.transfer_resume_offer(id, offset);
                }
            }
            WorkerEvent::Redirection(url) => self.transfer_redirection(id, url),
            WorkerEvent::Finished => self.transfer_finished(id),
            WorkerEvent::Error(err) => self.finish(id, Err(err)),
            WorkerEvent::TotalSize(n) => self.bubble(id, JobUpdate::TotalSize(n)),
            WorkerEvent::ProcessedSize(n) => self.bubble(id, JobUpdate::ProcessedSize(n)),
            WorkerEvent::Position(n) => self.bubble(id, JobUpdate::Position(n)),
            WorkerEvent::Speed(n) => self.bubble(id, JobUpdate::Speed(n)),
            WorkerEvent::Written(n) => self.bubble(id, JobUpdate::Written(n)),
            WorkerEvent::Warning(text) => self.bubble(id, JobUpdate::Warning(text)),
            WorkerEvent::InfoMessage(text) => self.bubble(id, JobUpdate::InfoMessage(text)),
            other => {
                tracing::debug!("{}: unexpected event for transfer job: {:?}", id, other);
            }
        }
    }

    pub(crate) fn transfer_mut(&mut self, id: JobId) -> Option<&mut TransferState> {
        match &mut self.entry_mut(id)?.kind {
            JobKind::Transfer(t) => Some(t),
            _ => None,
        }
    }

    /// Parent copy job, when this transfer is one side of a data pump.
    pub(crate) fn parent_copy(&self, id: JobId) -> Option<JobId> {
        let parent = self.entry(id)?.parent?;
        match self.entry(parent)?.kind {
            JobKind::Copy(_) => Some(parent),
            _ => None,
        }
    }

    /// Answer a resume offer on a top-level put, then unblock any gated
    /// payload.
    fn transfer_resume_offer(&mut self, id: JobId, offset: u64) {
        let Some(entry) = self.entry(id) else { return };
        let url = entry.url.clone();
        let resume = matches!(&entry.kind, JobKind::Transfer(t) if t.resume);
        let accept = resume && offset > 0 && self.decisions.confirm_resume(&url, offset);
        let answer = if accept { offset } else { 0 };
        self.send_to_worker_of(
            id,
            Frame::new(Command::ResumeAnswer.tag(), payload::encode_u64(answer)),
        );
        if let Some(t) = self.transfer_mut(id) {
            t.resume_answered = true;
            if t.data_requested {
                t.data_requested = false;
                self.bubble(id, JobUpdate::ResumeOffer(offset));
                self.transfer_data_requested(id);
                return;
            }
        }
        self.bubble(id, JobUpdate::ResumeOffer(offset));
    }

    /// The worker asked for the next upload chunk.
    fn transfer_data_requested(&mut self, id: JobId) {
        let Some(t) = self.transfer_mut(id) else { return };
        if t.resume && !t.resume_answered {
            // Resume gating: no payload before the offer is answered.
            t.data_requested = true;
            return;
        }
        if let Some(chunk) = t.pending_out.pop_front() {
            self.send_data_frame(id, chunk);
        } else {
            self.bubble(id, JobUpdate::DataRequest);
        }
    }

    /// Caller-supplied upload chunk (empty = end of stream).
    pub(crate) fn transfer_supply_data(&mut self, id: JobId, bytes: Vec<u8>) {
        let Some(entry) = self.entry_mut(id) else { return };
        let running = entry.worker.is_some();
        let JobKind::Transfer(t) = &mut entry.kind else {
            return;
        };
        if t.dir != TransferDirection::Put {
            return;
        }
        if !running || (t.resume && !t.resume_answered) {
            t.pending_out.push_back(bytes);
            return;
        }
        self.send_data_frame(id, bytes);
    }

    fn send_data_frame(&mut self, id: JobId, bytes: Vec<u8>) {
        self.send_to_worker_of(id, Frame::new(portage_wire::Msg::Data.tag(), bytes));
    }

    /// Record a redirect target; the actual restart happens on Finished.
    fn transfer_redirection(&mut self, id: JobId, url: String) {
        let Some(t) = self.transfer_mut(id) else { return };
        if !t.handle_redirects {
            self.bubble(id, JobUpdate::Redirected(url));
            return;
        }
        t.visited.push(url.clone());
        let repeats = t.visited.iter().filter(|u| **u == url).count();
        if repeats > REDIRECT_REPEAT_LIMIT {
            t.pending_error = Some(JobError::new(ErrorKind::CyclicRedirection, url.clone()));
        } else {
            t.pending_redirect = Some(url.clone());
        }
        self.bubble(id, JobUpdate::Redirected(url));
    }

    /// Terminal response: plain completion, a recorded cycle error, or the
    /// restart-in-place transition back to Queued with the new target.
    fn transfer_finished(&mut self, id: JobId) {
        let (pending_error, pending_redirect, mimetype) = match self.transfer_mut(id) {
            Some(t) => (
                t.pending_error.take(),
                t.pending_redirect.take(),
                t.mimetype.take(),
            ),
            None => (None, None, None),
        };
        if let Some(err) = pending_error {
            self.finish(id, Err(err));
        } else if let Some(url) = pending_redirect {
            self.restart_job(id, url);
        } else {
            if let Some(mime) = mimetype {
                tracing::debug!("{}: transfer complete ({})", id, mime);
            }
            self.finish(id, Ok(()));
        }
    }
}
