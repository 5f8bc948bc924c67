//! Directory listings, flat or recursive.
//!
//! A recursive listing spawns one child ListJob per subdirectory and
//! flattens everything into the root job's entry stream. The top level
//! forwards every entry as-is; nested levels drop "." and "..", apply the
//! hidden filter, and prefix names with the accumulated path. A failed
//! nested listing is reported as a partial failure while the overall
//! listing still succeeds.

use portage_wire::ErrorKind;

use crate::event::JobUpdate;
use crate::job::{JobEntry, JobId, JobKind};
use crate::scheduler::Core;
use crate::serial::MIN_PRIORITY;
use crate::worker::WorkerEvent;

#[derive(Debug)]
pub(crate) struct ListState {
    pub recursive: bool,
    pub include_hidden: bool,
    /// Accumulated path prefix; empty exactly at the top level.
    pub prefix: String,
    pub entry_count: u64,
    /// Our own listing finished; the job completes once the children have
    /// drained too.
    pub own_finished: bool,
}

impl ListState {
    pub fn new(recursive: bool, include_hidden: bool) -> Self {
        Self {
            recursive,
            include_hidden,
            prefix: String::new(),
            entry_count: 0,
            own_finished: false,
        }
    }

    pub fn nested(recursive: bool, include_hidden: bool, prefix: String) -> Self {
        Self {
            prefix,
            ..Self::new(recursive, include_hidden)
        }
    }
}

impl Core {
    pub(crate) fn list_on_event(&mut self, id: JobId, ev: WorkerEvent) {
        match ev {
            WorkerEvent::Entries(batch) => self.list_entries(id, batch),
            WorkerEvent::Finished => {
                let done = match self.list_mut(id) {
                    Some(state) => {
                        state.own_finished = true;
                        true
                    }
                    None => false,
                };
                if done {
                    // The wire exchange is over; free the worker and the
                    // host slot so children are not starved while we wait
                    // for them.
                    self.detach_and_complete(id);
                    self.list_check_complete(id);
                }
            }
            WorkerEvent::Error(err) => {
                // Tear down any children before surfacing the error.
                self.cancel_children(id);
                self.finish(id, Err(err));
            }
            WorkerEvent::TotalSize(n) => self.bubble(id, JobUpdate::TotalSize(n)),
            WorkerEvent::ProcessedSize(n) => self.bubble(id, JobUpdate::ProcessedSize(n)),
            WorkerEvent::Speed(n) => self.bubble(id, JobUpdate::Speed(n)),
            WorkerEvent::Warning(text) => self.bubble(id, JobUpdate::Warning(text)),
            WorkerEvent::InfoMessage(text) => self.bubble(id, JobUpdate::InfoMessage(text)),
            WorkerEvent::Redirection(url) => self.bubble(id, JobUpdate::Redirected(url)),
            other => {
                tracing::debug!("{}: unexpected event for list job: {:?}", id, other);
            }
        }
    }

    pub(crate) fn list_mut(&mut self, id: JobId) -> Option<&mut ListState> {
        match &mut self.entry_mut(id)?.kind {
            JobKind::List(state) => Some(state),
            _ => None,
        }
    }

    /// One batch from the worker: filter, prefix, descend, forward.
    fn list_entries(&mut self, id: JobId, batch: Vec<portage_wire::DirEntry>) {
        let Some(entry) = self.entry(id) else { return };
        let url = entry.url.clone();
        let priority = entry.priority;
        let JobKind::List(state) = &entry.kind else {
            return;
        };
        let prefix = state.prefix.clone();
        let recursive = state.recursive;
        let include_hidden = state.include_hidden;
        let nested = !prefix.is_empty();

        let mut forwarded = Vec::with_capacity(batch.len());
        let mut descend = Vec::new();
        for mut e in batch {
            let is_dot = e.name == "." || e.name == "..";
            if recursive
                && e.is_dir()
                && !e.is_symlink()
                && !is_dot
                && (include_hidden || !e.name.starts_with('.'))
            {
                descend.push(e.name.clone());
            }
            if nested {
                if is_dot {
                    continue;
                }
                if !include_hidden && e.name.starts_with('.') {
                    continue;
                }
                e.name = format!("{prefix}{}", e.name);
                e.display_name = format!("{prefix}{}", e.display_name);
            }
            forwarded.push(e);
        }

        if let Some(state) = self.list_mut(id) {
            state.entry_count += forwarded.len() as u64;
        }
        if !forwarded.is_empty() {
            self.bubble(id, JobUpdate::Entries(forwarded));
        }

        // Children run ahead of later-queued siblings so an open subtree
        // drains instead of piling up behind new top-level work.
        let child_priority = (priority - 1).max(MIN_PRIORITY);
        for name in descend {
            let child_url = match crate::identity::join_url(&url, &name) {
                Ok(u) => u,
                Err(err) => {
                    self.bubble(
                        id,
                        JobUpdate::SubPathError {
                            url: format!("{url}/{name}"),
                            error: err,
                        },
                    );
                    continue;
                }
            };
            let child_prefix = format!("{prefix}{name}/");
            let kind = JobKind::List(ListState::nested(recursive, include_hidden, child_prefix));
            self.submit_child(id, child_url, child_priority, kind);
        }
    }

    /// A nested listing finished; failures are partial, not terminal.
    pub(crate) fn list_child_done(
        &mut self,
        id: JobId,
        child: &JobEntry,
        outcome: Result<(), portage_wire::JobError>,
    ) {
        if let Err(err) = outcome {
            if err.kind != ErrorKind::UserCancelled {
                self.bubble(
                    id,
                    JobUpdate::SubPathError {
                        url: child.url.clone(),
                        error: err,
                    },
                );
            }
        }
        self.list_check_complete(id);
    }

    fn list_check_complete(&mut self, id: JobId) {
        let Some(entry) = self.entry(id) else { return };
        let JobKind::List(state) = &entry.kind else {
            return;
        };
        if state.own_finished && entry.children.is_empty() {
            tracing::debug!("{}: listing complete, {} entries", id, state.entry_count);
            self.finish(id, Ok(()));
        }
    }
}
