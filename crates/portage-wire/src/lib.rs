//! Wire protocol between the Portage orchestrator and its protocol workers.
//!
//! Both ends speak frames of `(tag, opaque payload)` over a duplex byte
//! stream. Command tags flow orchestrator -> worker, message tags flow
//! worker -> orchestrator; payload layouts are fixed per tag and encoded
//! with [`payload::PayloadWriter`] / [`payload::PayloadReader`].

pub mod auth;
pub mod cmd;
pub mod connection;
pub mod entry;
pub mod error;
pub mod frame;
pub mod payload;

pub use auth::AuthInfo;
pub use cmd::{Command, Msg};
pub use connection::Connection;
pub use entry::{DirEntry, EntryKind};
pub use error::{ErrorKind, JobError, WireError};
pub use frame::{Frame, FrameDecoder, MAX_FRAME_PAYLOAD};
pub use payload::{PayloadReader, PayloadWriter};
