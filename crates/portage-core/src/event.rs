//! Public job surface: requests, specs and the per-job update stream.

use std::collections::BTreeMap;

use portage_wire::{DirEntry, JobError};

/// What a job should do. One request maps to one top-level job.
#[derive(Debug, Clone)]
pub enum JobRequest {
    Stat {
        url: String,
    },
    Mkdir {
        url: String,
        permissions: i32,
    },
    Delete {
        url: String,
        is_file: bool,
    },
    Chmod {
        url: String,
        permissions: i32,
    },
    Chown {
        url: String,
        owner: String,
        group: String,
    },
    SetModificationTime {
        url: String,
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
    /// Protocol-private operation; the payload is opaque to the scheduler.
    Special {
        url: String,
        data: Vec<u8>,
    },
    /// Streamed download; chunks arrive as [`JobUpdate::Data`].
    Get {
        url: String,
    },
    /// Streamed upload; the caller answers [`JobUpdate::DataRequest`]
    /// through `Orchestrator::send_data` (empty chunk = end of stream).
    Put {
        url: String,
        overwrite: bool,
        resume: bool,
        permissions: i32,
    },
    List {
        url: String,
        recursive: bool,
        include_hidden: bool,
    },
    /// Copy or move with automatic strategy selection.
    Copy {
        src: String,
        dst: String,
        permissions: i32,
        overwrite: bool,
        move_source: bool,
    },
}

impl JobRequest {
    /// The operand shown in errors and used for routing.
    pub fn url(&self) -> &str {
        match self {
            JobRequest::Stat { url }
            | JobRequest::Mkdir { url, .. }
            | JobRequest::Delete { url, .. }
            | JobRequest::Chmod { url, .. }
            | JobRequest::Chown { url, .. }
            | JobRequest::SetModificationTime { url, .. }
            | JobRequest::Special { url, .. }
            | JobRequest::Get { url }
            | JobRequest::Put { url, .. }
            | JobRequest::List { url, .. } => url,
            JobRequest::Rename { dst, .. } | JobRequest::Symlink { dst, .. } => dst,
            JobRequest::Copy { src, .. } => src,
        }
    }
}

/// A request plus scheduling parameters.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub request: JobRequest,
    /// -10..=10; lower numbers are scheduled earlier. Default 0.
    pub priority: i8,
    /// Outbound metadata pushed to the worker for this job.
    pub metadata: BTreeMap<String, String>,
}

impl JobSpec {
    pub fn new(request: JobRequest) -> Self {
        Self {
            request,
            priority: 0,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: i8) -> Self {
        self.priority = priority;
        self
    }
}

/// Progress and result events delivered to the submitter.
#[derive(Debug, Clone)]
pub enum JobUpdate {
    /// The job was admitted and its command dispatched to a worker.
    Started,
    TotalSize(u64),
    ProcessedSize(u64),
    Speed(u64),
    Position(u64),
    Written(u64),
    Mimetype(String),
    /// Download payload chunk (empty = end of stream).
    Data(Vec<u8>),
    /// The upload worker wants the next chunk.
    DataRequest,
    /// The destination offered to resume from this offset.
    ResumeOffer(u64),
    Entries(Vec<DirEntry>),
    StatResult(DirEntry),
    /// The job restarted against a substitute URL.
    Redirected(String),
    /// A recursive listing failed below the top level; the listing itself
    /// continues.
    SubPathError { url: String, error: JobError },
    Warning(String),
    InfoMessage(String),
    /// Metadata reported by the worker.
    MetaData(BTreeMap<String, String>),
    /// Terminal result; nothing follows.
    Finished(Result<(), JobError>),
}

/// Sink for one job's updates. Send failures are ignored: a dropped
/// receiver means the submitter stopped listening, not that the job fails.
pub type JobSink = tokio::sync::mpsc::UnboundedSender<JobUpdate>;
