//! Single command/response jobs: stat, mkdir, delete, chmod, chown,
//! set-mtime, rename, symlink, special, worker-side copy.

use portage_wire::payload::{
    ChmodArgs, ChownArgs, CopyArgs, DelArgs, MkdirArgs, RenameArgs, SetModificationTimeArgs,
    SpecialArgs, UrlArgs,
};
use portage_wire::{Command, Frame};

use crate::event::JobUpdate;
use crate::job::JobId;
use crate::scheduler::Core;
use crate::worker::WorkerEvent;

/// The one command a SimpleJob sends. The routing URL lives on the entry;
/// multi-URL commands carry their full operand set here so the frame can be
/// re-encoded against the entry's current URL at dispatch time.
#[derive(Debug, Clone)]
pub(crate) enum SimpleCmd {
    Stat,
    Mkdir {
        permissions: i32,
    },
    Delete {
        is_file: bool,
    },
    Chmod {
        permissions: i32,
    },
    Chown {
        owner: String,
        group: String,
    },
    SetModificationTime {
        mtime_secs: i64,
    },
    Rename {
        src: String,
        dst: String,
        overwrite: bool,
    },
    Symlink {
        target: String,
        dst: String,
        overwrite: bool,
    },
    Special {
        data: Vec<u8>,
    },
    /// Worker-side copy; routed to whichever side's worker can do it.
    WorkerCopy {
        src: String,
        dst: String,
        permissions: i32,
        overwrite: bool,
    },
}

impl SimpleCmd {
    pub fn to_frame(&self, url: &str) -> Frame {
        match self {
            SimpleCmd::Stat => Frame::new(
                Command::Stat.tag(),
                UrlArgs { url: url.into() }.encode(),
            ),
            SimpleCmd::Mkdir { permissions } => Frame::new(
                Command::Mkdir.tag(),
                MkdirArgs {
                    url: url.into(),
                    permissions: *permissions,
                }
                .encode(),
            ),
            SimpleCmd::Delete { is_file } => Frame::new(
                Command::Del.tag(),
                DelArgs {
                    url: url.into(),
                    is_file: *is_file,
                }
                .encode(),
            ),
            SimpleCmd::Chmod { permissions } => Frame::new(
                Command::Chmod.tag(),
                ChmodArgs {
                    url: url.into(),
                    permissions: *permissions,
                }
                .encode(),
            ),
            SimpleCmd::Chown { owner, group } => Frame::new(
                Command::Chown.tag(),
                ChownArgs {
                    url: url.into(),
                    owner: owner.clone(),
                    group: group.clone(),
                }
                .encode(),
            ),
            SimpleCmd::SetModificationTime { mtime_secs } => Frame::new(
                Command::SetModificationTime.tag(),
                SetModificationTimeArgs {
                    url: url.into(),
                    mtime_secs: *mtime_secs,
                }
                .encode(),
            ),
            SimpleCmd::Rename {
                src,
                dst,
                overwrite,
            } => Frame::new(
                Command::Rename.tag(),
                RenameArgs {
                    src: src.clone(),
                    dst: dst.clone(),
                    overwrite: *overwrite,
                }
                .encode(),
            ),
            SimpleCmd::Symlink {
                target,
                dst,
                overwrite,
            } => Frame::new(
                Command::Symlink.tag(),
                RenameArgs {
                    src: target.clone(),
                    dst: dst.clone(),
                    overwrite: *overwrite,
                }
                .encode(),
            ),
            SimpleCmd::Special { data } => Frame::new(
                Command::Special.tag(),
                SpecialArgs {
                    url: url.into(),
                    data: data.clone(),
                }
                .encode(),
            ),
            SimpleCmd::WorkerCopy {
                src,
                dst,
                permissions,
                overwrite,
            } => Frame::new(
                Command::Copy.tag(),
                CopyArgs {
                    src: src.clone(),
                    dst: dst.clone(),
                    permissions: *permissions,
                    overwrite: *overwrite,
                }
                .encode(),
            ),
        }
    }
}

#[derive(Debug)]
pub(crate) struct SimpleState {
    pub cmd: SimpleCmd,
}

impl SimpleState {
    pub fn new(cmd: SimpleCmd) -> Self {
        Self { cmd }
    }
}

impl Core {
    pub(crate) fn simple_on_event(&mut self, id: JobId, ev: WorkerEvent) {
        match ev {
            WorkerEvent::Finished => self.finish(id, Ok(())),
            WorkerEvent::Error(err) => self.finish(id, Err(err)),
            WorkerEvent::StatResult(entry) => self.bubble(id, JobUpdate::StatResult(entry)),
            WorkerEvent::TotalSize(n) => self.bubble(id, JobUpdate::TotalSize(n)),
            WorkerEvent::ProcessedSize(n) => self.bubble(id, JobUpdate::ProcessedSize(n)),
            WorkerEvent::Speed(n) => self.bubble(id, JobUpdate::Speed(n)),
            WorkerEvent::Position(n) => self.bubble(id, JobUpdate::Position(n)),
            WorkerEvent::Written(n) => self.bubble(id, JobUpdate::Written(n)),
            WorkerEvent::Warning(text) => self.bubble(id, JobUpdate::Warning(text)),
            WorkerEvent::InfoMessage(text) => self.bubble(id, JobUpdate::InfoMessage(text)),
            WorkerEvent::Redirection(url) => self.bubble(id, JobUpdate::Redirected(url)),
            other => {
                tracing::debug!("{}: unexpected event for simple job: {:?}", id, other);
            }
        }
    }
}
