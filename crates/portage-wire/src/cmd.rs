//! Command and message tags.
//!
//! Commands flow orchestrator -> worker, messages flow worker ->
//! orchestrator. The numeric values are the on-wire tags and must stay
//! stable; the two ranges are disjoint so a misrouted frame is detectable.

use crate::error::WireError;

/// Orchestrator -> worker command tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    /// Worker identity: host, port, user, password for subsequent commands.
    SetHost = 10,
    Stat = 11,
    Get = 12,
    Put = 13,
    ListDir = 14,
    Mkdir = 15,
    Rename = 16,
    Copy = 17,
    Del = 18,
    Chmod = 19,
    Chown = 20,
    SetModificationTime = 21,
    Symlink = 22,
    /// Protocol-private operation with an opaque payload.
    Special = 23,
    /// Session configuration push (string map).
    Config = 24,
    /// Per-job metadata push (string map).
    MetaData = 25,
    /// Re-read configuration sources.
    Reparse = 26,
    /// Answer to an earlier message-box request.
    MessageBoxAnswer = 27,
    /// Answer to a resume offer: the offset to resume from (0 = none).
    ResumeAnswer = 28,
}

impl Command {
    pub fn from_tag(tag: u32) -> Result<Self, WireError> {
        Ok(match tag {
            10 => Command::SetHost,
            11 => Command::Stat,
            12 => Command::Get,
            13 => Command::Put,
            14 => Command::ListDir,
            15 => Command::Mkdir,
            16 => Command::Rename,
            17 => Command::Copy,
            18 => Command::Del,
            19 => Command::Chmod,
            20 => Command::Chown,
            21 => Command::SetModificationTime,
            22 => Command::Symlink,
            23 => Command::Special,
            24 => Command::Config,
            25 => Command::MetaData,
            26 => Command::Reparse,
            27 => Command::MessageBoxAnswer,
            28 => Command::ResumeAnswer,
            other => return Err(WireError::UnknownTag(other)),
        })
    }

    pub fn tag(self) -> u32 {
        self as u32
    }
}

/// Worker -> orchestrator message tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Msg {
    /// A chunk of payload bytes; an empty chunk marks end of stream.
    Data = 100,
    /// The worker wants the next chunk for an upload.
    DataReq = 101,
    Opened = 102,
    Finished = 103,
    StatEntry = 104,
    /// A batch of directory entries: count plus repeated entries.
    ListEntries = 105,
    /// The worker can resume a put from the given offset; for a non-zero
    /// offset it blocks for the ResumeAnswer.
    ResumeOffer = 106,
    /// Terminal failure: error code plus text.
    Error = 107,
    Connected = 108,
    /// Bytes accepted by the destination so far.
    Written = 109,
    TotalSize = 110,
    ProcessedSize = 111,
    Position = 112,
    Speed = 113,
    /// Substitute target URL; the job restarts against it.
    Redirection = 114,
    Mimetype = 115,
    Warning = 116,
    InfoMessage = 117,
    /// Interactive prompt; the worker blocks for MessageBoxAnswer.
    MessageBox = 118,
    /// Metadata produced by the worker for the current job.
    MetaData = 119,
    NeedSubUrlData = 120,
}

impl Msg {
    pub fn from_tag(tag: u32) -> Result<Self, WireError> {
        Ok(match tag {
            100 => Msg::Data,
            101 => Msg::DataReq,
            102 => Msg::Opened,
            103 => Msg::Finished,
            104 => Msg::StatEntry,
            105 => Msg::ListEntries,
            106 => Msg::ResumeOffer,
            107 => Msg::Error,
            108 => Msg::Connected,
            109 => Msg::Written,
            110 => Msg::TotalSize,
            111 => Msg::ProcessedSize,
            112 => Msg::Position,
            113 => Msg::Speed,
            114 => Msg::Redirection,
            115 => Msg::Mimetype,
            116 => Msg::Warning,
            117 => Msg::InfoMessage,
            118 => Msg::MessageBox,
            119 => Msg::MetaData,
            120 => Msg::NeedSubUrlData,
            other => return Err(WireError::UnknownTag(other)),
        })
    }

    pub fn tag(self) -> u32 {
        self as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_tags_roundtrip() {
        for cmd in [
            Command::SetHost,
            Command::Get,
            Command::Put,
            Command::ListDir,
            Command::Rename,
            Command::ResumeAnswer,
        ] {
            assert_eq!(Command::from_tag(cmd.tag()).unwrap(), cmd);
        }
    }

    #[test]
    fn msg_tags_roundtrip() {
        for msg in [Msg::Data, Msg::Finished, Msg::Error, Msg::ResumeOffer, Msg::ListEntries] {
            assert_eq!(Msg::from_tag(msg.tag()).unwrap(), msg);
        }
    }

    #[test]
    fn ranges_are_disjoint() {
        assert!(Command::from_tag(Msg::Data.tag()).is_err());
        assert!(Msg::from_tag(Command::Get.tag()).is_err());
    }
}
