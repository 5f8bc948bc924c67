//! Compound copy/move with strategy selection and fallback.
//!
//! Strategies, in order: fast move (single rename), fast copy (single
//! worker-side copy), worker-side copy across a local boundary, and the
//! data pump (put + get wired together with one in-flight chunk). The
//! selection runs once at start and again whenever the chosen strategy
//! reports unsupported-action. After a fast strategy, requested
//! permissions are applied with a follow-up chmod; after a copy-based
//! move, the source is deleted.

use std::collections::VecDeque;

use portage_wire::payload;
use portage_wire::{Command, ErrorKind, Frame, JobError, Msg};

use crate::event::JobUpdate;
use crate::identity::{is_local, WorkerIdentity};
use crate::job::{JobEntry, JobId, JobKind, SimpleCmd, SimpleState, TransferState};
use crate::scheduler::Core;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CopyPhase {
    Starting,
    Renaming,
    WorkerCopying,
    Pumping,
    FixingPerms,
    DeletingSource,
}

#[derive(Debug)]
pub(crate) struct CopyState {
    pub src: String,
    pub dst: String,
    pub permissions: i32,
    pub overwrite: bool,
    pub move_source: bool,
    pub phase: CopyPhase,
    pub rename_job: Option<JobId>,
    pub copy_job: Option<JobId>,
    pub get_job: Option<JobId>,
    pub put_job: Option<JobId>,
    pub chmod_job: Option<JobId>,
    pub del_job: Option<JobId>,
    pub tried_rename: bool,
    pub tried_worker_copy: bool,
    /// The put's resume offer has been answered; payload may flow.
    pub resume_answered: bool,
    /// Chunks in flight between get and put; kept to what was already read
    /// before the get was paused.
    pub pending: VecDeque<Vec<u8>>,
    pub get_done: bool,
    pub put_done: bool,
    /// The put has an unanswered data request.
    pub put_waiting: bool,
    pub eof_sent: bool,
    /// A chmod fixup is followed by the source delete (copy-based move).
    pub chmod_then_delete: bool,
}

impl CopyState {
    pub fn new(src: String, dst: String, permissions: i32, overwrite: bool, move_source: bool) -> Self {
        Self {
            src,
            dst,
            permissions,
            overwrite,
            move_source,
            phase: CopyPhase::Starting,
            rename_job: None,
            copy_job: None,
            get_job: None,
            put_job: None,
            chmod_job: None,
            del_job: None,
            tried_rename: false,
            tried_worker_copy: false,
            resume_answered: false,
            pending: VecDeque::new(),
            get_done: false,
            put_done: false,
            put_waiting: false,
            eof_sent: false,
            chmod_then_delete: false,
        }
    }
}

impl Core {
    pub(crate) fn copy_mut(&mut self, id: JobId) -> Option<&mut CopyState> {
        match &mut self.entry_mut(id)?.kind {
            JobKind::Copy(state) => Some(state),
            _ => None,
        }
    }

    fn copy_snapshot(&self, id: JobId) -> Option<(String, String, i32, bool, bool, i8)> {
        let entry = self.entry(id)?;
        let JobKind::Copy(st) = &entry.kind else {
            return None;
        };
        Some((
            st.src.clone(),
            st.dst.clone(),
            st.permissions,
            st.overwrite,
            st.move_source,
            entry.priority,
        ))
    }

    pub(crate) fn copy_start(&mut self, id: JobId) {
        let Some((src, dst, ..)) = self.copy_snapshot(id) else {
            return;
        };
        let identical = match (url::Url::parse(&src), url::Url::parse(&dst)) {
            (Ok(a), Ok(b)) => a == b,
            _ => src == dst,
        };
        if identical {
            self.copy_fail(
                id,
                JobError::new(ErrorKind::IdenticalSourceAndDestination, dst),
            );
            return;
        }
        self.copy_pick_strategy(id);
    }

    /// Choose the best remaining strategy. Re-entered after an
    /// unsupported-action failure with the corresponding `tried_*` flag set.
    pub(crate) fn copy_pick_strategy(&mut self, id: JobId) {
        let Some((src, dst, _perms, overwrite, moving, priority)) = self.copy_snapshot(id) else {
            return;
        };
        let (tried_rename, tried_copy) = match self.copy_mut(id) {
            Some(st) => (st.tried_rename, st.tried_worker_copy),
            None => return,
        };

        let src_proto = match self.route_protocol(&src) {
            Ok(p) => p,
            Err(err) => return self.copy_fail(id, err),
        };
        let dst_proto = match self.route_protocol(&dst) {
            Ok(p) => p,
            Err(err) => return self.copy_fail(id, err),
        };
        let src_ident = match WorkerIdentity::from_url(&src_proto, &src) {
            Ok(i) => i,
            Err(err) => return self.copy_fail(id, err),
        };
        let dst_ident = match WorkerIdentity::from_url(&dst_proto, &dst) {
            Ok(i) => i,
            Err(err) => return self.copy_fail(id, err),
        };
        let same_identity = src_ident == dst_ident;
        let (Some(src_caps), Some(dst_caps)) = (
            self.registry.lookup(&src_proto),
            self.registry.lookup(&dst_proto),
        ) else {
            return self.copy_fail(id, JobError::new(ErrorKind::UnsupportedProtocol, src));
        };
        let src_local = is_local(&src);
        let dst_local = is_local(&dst);

        // Fast move: one rename on the side that can do it. The two
        // local-file capability checks are independent, not symmetric.
        if moving && !tried_rename {
            let route = if same_identity {
                Some(src.clone())
            } else if src_local && dst_caps.can_rename_from_file {
                Some(dst.clone())
            } else if dst_local && src_caps.can_rename_to_file {
                Some(src.clone())
            } else {
                None
            };
            if let Some(route_url) = route {
                let kind = JobKind::Simple(SimpleState::new(SimpleCmd::Rename {
                    src: src.clone(),
                    dst: dst.clone(),
                    overwrite,
                }));
                let child = self.submit_child(id, route_url, priority, kind);
                if let Some(st) = self.copy_mut(id) {
                    st.phase = CopyPhase::Renaming;
                    st.rename_job = Some(child);
                }
                return;
            }
        }

        // Fast copy: one worker-side copy command.
        if !tried_copy {
            let route = if same_identity {
                Some(src.clone())
            } else if src_local && dst_caps.can_copy_from_file {
                Some(dst.clone())
            } else if dst_local && src_caps.can_copy_to_file {
                Some(src.clone())
            } else {
                None
            };
            if let Some(route_url) = route {
                let (perms, ow) = match self.copy_mut(id) {
                    Some(st) => (st.permissions, st.overwrite),
                    None => return,
                };
                let kind = JobKind::Simple(SimpleState::new(SimpleCmd::WorkerCopy {
                    src: src.clone(),
                    dst: dst.clone(),
                    permissions: perms,
                    overwrite: ow,
                }));
                let child = self.submit_child(id, route_url, priority, kind);
                if let Some(st) = self.copy_mut(id) {
                    st.phase = CopyPhase::WorkerCopying;
                    st.copy_job = Some(child);
                }
                return;
            }
        }

        self.copy_start_pump(id);
    }

    /// Data-pump fallback: put first, get only after the resume offer is
    /// answered.
    fn copy_start_pump(&mut self, id: JobId) {
        let Some((_, dst, perms, overwrite, _, priority)) = self.copy_snapshot(id) else {
            return;
        };
        if let Some(st) = self.copy_mut(id) {
            st.phase = CopyPhase::Pumping;
        }
        let kind = JobKind::Transfer(TransferState::put(overwrite, true, perms));
        let put = self.submit_child(id, dst, priority, kind);
        if let Some(st) = self.copy_mut(id) {
            st.put_job = Some(put);
        }
    }

    /// The pump put offered to resume. Answer it, then start the get from
    /// the negotiated offset.
    pub(crate) fn copy_resume_offer(&mut self, id: JobId, put_id: JobId, offset: u64) {
        let Some((src, dst, .., priority)) = self.copy_snapshot(id) else {
            return;
        };
        let accept = offset > 0 && self.decisions.confirm_resume(&dst, offset);
        let answer = if accept { offset } else { 0 };
        self.send_to_worker_of(
            put_id,
            Frame::new(Command::ResumeAnswer.tag(), payload::encode_u64(answer)),
        );
        if let Some(t) = self.transfer_mut(put_id) {
            t.resume_answered = true;
        }
        let start_get = match self.copy_mut(id) {
            Some(st) => {
                st.resume_answered = true;
                st.get_job.is_none()
            }
            None => return,
        };
        if start_get {
            let mut t = TransferState::get();
            t.offset = answer;
            let get = self.submit_child(id, src, priority, JobKind::Transfer(t));
            if let Some(st) = self.copy_mut(id) {
                st.get_job = Some(get);
            }
        }
    }

    /// A chunk arrived from the get side: buffer it, pause the get, feed
    /// the put if it is waiting.
    pub(crate) fn copy_pump_data(&mut self, id: JobId, get_id: JobId, bytes: Vec<u8>) {
        if bytes.is_empty() {
            // End of stream is signalled by the get finishing.
            return;
        }
        let waiting = match self.copy_mut(id) {
            Some(st) => {
                st.pending.push_back(bytes);
                st.put_waiting
            }
            None => return,
        };
        if let Some(t) = self.transfer_mut(get_id) {
            t.internal_suspended = true;
        }
        self.sync_worker_gate(get_id);
        if waiting {
            self.copy_pump_feed(id);
        }
    }

    /// The put asked for its next chunk.
    pub(crate) fn copy_pump_datareq(&mut self, id: JobId, _put_id: JobId) {
        self.copy_pump_feed(id);
    }

    /// Move one chunk (or the end-of-stream marker) into the put, resuming
    /// the get once the buffer drains.
    fn copy_pump_feed(&mut self, id: JobId) {
        let Some(st) = self.copy_mut(id) else { return };
        if !st.resume_answered {
            // No payload may reach the put before the resume answer.
            st.put_waiting = true;
            return;
        }
        let put_job = st.put_job;
        let get_job = st.get_job;
        if let Some(chunk) = st.pending.pop_front() {
            st.put_waiting = false;
            let resume_get = st.pending.is_empty() && !st.get_done;
            let Some(put_id) = put_job else { return };
            self.send_to_worker_of(put_id, Frame::new(Msg::Data.tag(), chunk));
            if resume_get {
                if let Some(get_id) = get_job {
                    if let Some(t) = self.transfer_mut(get_id) {
                        t.internal_suspended = false;
                    }
                    self.sync_worker_gate(get_id);
                }
            }
        } else if st.get_done && !st.eof_sent {
            st.eof_sent = true;
            st.put_waiting = false;
            if let Some(put_id) = put_job {
                self.send_to_worker_of(put_id, Frame::new(Msg::Data.tag(), Vec::new()));
            }
        } else {
            st.put_waiting = true;
        }
    }

    /// A sub-job finished; advance the strategy machine.
    pub(crate) fn copy_child_done(
        &mut self,
        id: JobId,
        child: &JobEntry,
        outcome: Result<(), JobError>,
    ) {
        let Some(st) = self.copy_mut(id) else { return };
        let child_id = child.id;

        if st.rename_job == Some(child_id) {
            st.rename_job = None;
            match outcome {
                Ok(()) => self.copy_fast_move_done(id),
                Err(err) if err.kind == ErrorKind::UnsupportedAction => {
                    st.tried_rename = true;
                    self.copy_pick_strategy(id);
                }
                Err(err) => self.copy_fail(id, err),
            }
            return;
        }
        if st.copy_job == Some(child_id) {
            st.copy_job = None;
            match outcome {
                Ok(()) => self.copy_fast_copy_done(id),
                Err(err) if err.kind == ErrorKind::UnsupportedAction => {
                    st.tried_worker_copy = true;
                    self.copy_pick_strategy(id);
                }
                Err(err) => self.copy_fail(id, err),
            }
            return;
        }
        if st.get_job == Some(child_id) {
            st.get_job = None;
            match outcome {
                Ok(()) => {
                    st.get_done = true;
                    if st.put_waiting {
                        self.copy_pump_feed(id);
                    }
                }
                Err(err) => self.copy_fail(id, err),
            }
            return;
        }
        if st.put_job == Some(child_id) {
            st.put_job = None;
            match outcome {
                Ok(()) => {
                    st.put_done = true;
                    self.copy_pump_done(id);
                }
                Err(err) => self.copy_fail(id, err),
            }
            return;
        }
        if st.chmod_job == Some(child_id) {
            st.chmod_job = None;
            let and_delete = st.chmod_then_delete;
            if let Err(err) = outcome {
                self.bubble(id, JobUpdate::Warning(err.to_string()));
            }
            if and_delete {
                self.copy_begin_delete(id);
            } else {
                self.finish(id, Ok(()));
            }
            return;
        }
        if st.del_job == Some(child_id) {
            st.del_job = None;
            self.finish(id, outcome);
            return;
        }
        tracing::warn!("{}: completion from unknown sub-job {}", id, child_id);
    }

    /// Rename moved the file; apply permissions if asked, then done. The
    /// source is gone already, so no delete follows.
    fn copy_fast_move_done(&mut self, id: JobId) {
        let Some(st) = self.copy_mut(id) else { return };
        if st.permissions >= 0 {
            st.chmod_then_delete = false;
            self.copy_begin_chmod(id);
        } else {
            self.finish(id, Ok(()));
        }
    }

    /// Worker-side copy succeeded; chmod fixup, then delete the source on
    /// a move.
    fn copy_fast_copy_done(&mut self, id: JobId) {
        let Some(st) = self.copy_mut(id) else { return };
        let moving = st.move_source;
        if st.permissions >= 0 {
            st.chmod_then_delete = moving;
            self.copy_begin_chmod(id);
        } else if moving {
            self.copy_begin_delete(id);
        } else {
            self.finish(id, Ok(()));
        }
    }

    /// Both pump sides are done once the put completes; the put applied
    /// permissions itself.
    fn copy_pump_done(&mut self, id: JobId) {
        let Some(st) = self.copy_mut(id) else { return };
        if !st.put_done {
            return;
        }
        if let Some(get_id) = st.get_job.take() {
            // Put finished while the get lingers; tear it down quietly.
            self.cancel_inner(get_id, true);
        }
        let moving = match self.copy_mut(id) {
            Some(st) => st.move_source,
            None => return,
        };
        if moving {
            self.copy_begin_delete(id);
        } else {
            self.finish(id, Ok(()));
        }
    }

    fn copy_begin_chmod(&mut self, id: JobId) {
        let Some((_, dst, perms, .., priority)) = self.copy_snapshot(id) else {
            return;
        };
        let kind = JobKind::Simple(SimpleState::new(SimpleCmd::Chmod { permissions: perms }));
        let child = self.submit_child(id, dst, priority, kind);
        if let Some(st) = self.copy_mut(id) {
            st.phase = CopyPhase::FixingPerms;
            st.chmod_job = Some(child);
        }
    }

    fn copy_begin_delete(&mut self, id: JobId) {
        let Some((src, .., priority)) = self.copy_snapshot(id) else {
            return;
        };
        let kind = JobKind::Simple(SimpleState::new(SimpleCmd::Delete { is_file: true }));
        let child = self.submit_child(id, src, priority, kind);
        if let Some(st) = self.copy_mut(id) {
            st.phase = CopyPhase::DeletingSource;
            st.del_job = Some(child);
        }
    }

    /// Terminal failure: remaining sub-jobs die quietly first.
    pub(crate) fn copy_fail(&mut self, id: JobId, err: JobError) {
        if let Some(st) = self.copy_mut(id) {
            tracing::debug!("{}: copy failed during {:?}: {}", id, st.phase, err);
            st.rename_job = None;
            st.copy_job = None;
            st.get_job = None;
            st.put_job = None;
            st.chmod_job = None;
            st.del_job = None;
        }
        self.cancel_children(id);
        self.finish(id, Err(err));
    }
}
