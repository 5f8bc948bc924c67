//! Error taxonomy shared by both ends of the wire.
//!
//! `ErrorKind` is the protocol-level classification carried in error frames
//! (a stable numeric code plus free text for the internal catch-all); it is
//! what composite jobs inspect to drive fallback logic. `WireError` covers
//! decode failures of the framing/payload layer itself.

use thiserror::Error;

/// Classification of a job failure, independent of message text.
///
/// Codes are part of the wire contract; variants must keep their numeric
/// value once released.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("malformed URL")]
    MalformedUrl,
    #[error("unsupported protocol")]
    UnsupportedProtocol,
    #[error("the requested action is not supported by this protocol")]
    UnsupportedAction,
    #[error("file or directory does not exist")]
    DoesNotExist,
    #[error("file or directory already exists")]
    AlreadyExists,
    #[error("access denied while reading")]
    CannotRead,
    #[error("access denied while writing")]
    CannotWrite,
    #[error("access denied while entering directory")]
    CannotEnter,
    #[error("access denied while deleting")]
    CannotDelete,
    #[error("access denied while changing permissions")]
    CannotChmod,
    #[error("access denied while changing ownership")]
    CannotChown,
    #[error("could not connect")]
    CouldNotConnect,
    #[error("connection broken")]
    ConnectionBroken,
    #[error("could not bind")]
    CouldNotBind,
    #[error("could not listen")]
    CouldNotListen,
    #[error("could not accept")]
    CouldNotAccept,
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("out of memory")]
    OutOfMemory,
    #[error("disk full")]
    DiskFull,
    #[error("cyclic redirection")]
    CyclicRedirection,
    #[error("source and destination are identical")]
    IdenticalSourceAndDestination,
    #[error("worker process died")]
    WorkerDied,
    #[error("could not launch worker process")]
    CannotLaunchWorker,
    #[error("cancelled by user")]
    UserCancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorKind {
    /// Stable wire code for this kind.
    pub fn code(&self) -> u32 {
        match self {
            ErrorKind::MalformedUrl => 1,
            ErrorKind::UnsupportedProtocol => 2,
            ErrorKind::UnsupportedAction => 3,
            ErrorKind::DoesNotExist => 4,
            ErrorKind::AlreadyExists => 5,
            ErrorKind::CannotRead => 6,
            ErrorKind::CannotWrite => 7,
            ErrorKind::CannotEnter => 8,
            ErrorKind::CannotDelete => 9,
            ErrorKind::CannotChmod => 10,
            ErrorKind::CannotChown => 11,
            ErrorKind::CouldNotConnect => 12,
            ErrorKind::ConnectionBroken => 13,
            ErrorKind::CouldNotBind => 14,
            ErrorKind::CouldNotListen => 15,
            ErrorKind::CouldNotAccept => 16,
            ErrorKind::AuthenticationFailed => 17,
            ErrorKind::OutOfMemory => 18,
            ErrorKind::DiskFull => 19,
            ErrorKind::CyclicRedirection => 20,
            ErrorKind::IdenticalSourceAndDestination => 21,
            ErrorKind::WorkerDied => 22,
            ErrorKind::CannotLaunchWorker => 23,
            ErrorKind::UserCancelled => 24,
            ErrorKind::Internal(_) => 25,
        }
    }

    /// Reconstruct a kind from a wire code. Unknown codes map to `Internal`
    /// carrying the supplied text, so newer workers stay decodable.
    pub fn from_code(code: u32, text: &str) -> Self {
        match code {
            1 => ErrorKind::MalformedUrl,
            2 => ErrorKind::UnsupportedProtocol,
            3 => ErrorKind::UnsupportedAction,
            4 => ErrorKind::DoesNotExist,
            5 => ErrorKind::AlreadyExists,
            6 => ErrorKind::CannotRead,
            7 => ErrorKind::CannotWrite,
            8 => ErrorKind::CannotEnter,
            9 => ErrorKind::CannotDelete,
            10 => ErrorKind::CannotChmod,
            11 => ErrorKind::CannotChown,
            12 => ErrorKind::CouldNotConnect,
            13 => ErrorKind::ConnectionBroken,
            14 => ErrorKind::CouldNotBind,
            15 => ErrorKind::CouldNotListen,
            16 => ErrorKind::CouldNotAccept,
            17 => ErrorKind::AuthenticationFailed,
            18 => ErrorKind::OutOfMemory,
            19 => ErrorKind::DiskFull,
            20 => ErrorKind::CyclicRedirection,
            21 => ErrorKind::IdenticalSourceAndDestination,
            22 => ErrorKind::WorkerDied,
            23 => ErrorKind::CannotLaunchWorker,
            24 => ErrorKind::UserCancelled,
            _ => ErrorKind::Internal(text.to_string()),
        }
    }
}

/// A terminal job failure: the kind plus the operand (URL or path) that
/// triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {operand}")]
pub struct JobError {
    pub kind: ErrorKind,
    pub operand: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, operand: impl Into<String>) -> Self {
        Self {
            kind,
            operand: operand.into(),
        }
    }

    /// Catch-all for failures without a protocol classification.
    pub fn internal(text: impl Into<String>, operand: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Internal(text.into()),
            operand: operand.into(),
        }
    }
}

/// Failure to decode a frame or payload.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("truncated payload while reading {0}")]
    Truncated(&'static str),
    #[error("unknown wire tag {0}")]
    UnknownTag(u32),
    #[error("payload string is not valid UTF-8")]
    BadUtf8,
    #[error("frame payload of {got} bytes exceeds limit {limit}")]
    Oversize { got: usize, limit: usize },
    #[error("bad value for {0}")]
    BadValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_roundtrip() {
        let kinds = [
            ErrorKind::MalformedUrl,
            ErrorKind::UnsupportedAction,
            ErrorKind::DoesNotExist,
            ErrorKind::CannotWrite,
            ErrorKind::CyclicRedirection,
            ErrorKind::WorkerDied,
            ErrorKind::UserCancelled,
        ];
        for kind in kinds {
            let back = ErrorKind::from_code(kind.code(), "");
            assert_eq!(back, kind);
        }
    }

    #[test]
    fn unknown_code_becomes_internal_with_text() {
        let kind = ErrorKind::from_code(9999, "proto said no");
        assert_eq!(kind, ErrorKind::Internal("proto said no".to_string()));
    }

    #[test]
    fn job_error_displays_kind_and_operand() {
        let err = JobError::new(ErrorKind::DoesNotExist, "ftp://example.org/missing");
        let text = err.to_string();
        assert!(text.contains("does not exist"));
        assert!(text.contains("ftp://example.org/missing"));
    }
}
