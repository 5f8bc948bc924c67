//! Command dispatch loop and response primitives.
//!
//! The dispatcher decodes `(command, payload)` frames into handler calls
//! and enforces the terminal-response contract: every job command ends in
//! exactly one finished() or error(). Built-in commands (config push,
//! metadata push, reparse) are applied transparently, including while a
//! handler blocks waiting for an answer frame, so a prompt can never stall
//! configuration delivery.

use std::collections::BTreeMap;

use anyhow::Result;

use portage_wire::entry::encode_entries;
use portage_wire::payload::{
    self, ChmodArgs, ChownArgs, CopyArgs, DelArgs, ErrorMsg, GetArgs, HostArgs, MessageBoxAnswer,
    MessageBoxKind, MessageBoxMsg, MkdirArgs, PutArgs, RenameArgs, SetModificationTimeArgs,
    SpecialArgs, UrlArgs, ANSWER_OK,
};
use portage_wire::{AuthInfo, Command, DirEntry, ErrorKind, Frame, JobError, Msg};

use crate::channel::WorkerChannel;
use crate::handler::ProtocolHandler;

/// Session state and response primitives handed to every handler call.
pub struct WorkerContext {
    channel: WorkerChannel,
    config: BTreeMap<String, String>,
    metadata: BTreeMap<String, String>,
    in_command: bool,
    terminal_sent: bool,
    pending_reparse: bool,
}

impl WorkerContext {
    fn new(channel: WorkerChannel) -> Self {
        Self {
            channel,
            config: BTreeMap::new(),
            metadata: BTreeMap::new(),
            in_command: false,
            terminal_sent: false,
            pending_reparse: false,
        }
    }

    /// Session configuration pushed by the orchestrator.
    pub fn config(&self) -> &BTreeMap<String, String> {
        &self.config
    }

    /// Metadata pushed for the current job.
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    // ---- response primitives -----------------------------------------

    /// A chunk of download payload; empty marks end of stream.
    pub fn data(&mut self, bytes: &[u8]) -> Result<()> {
        self.send(Msg::Data.tag(), bytes.to_vec())
    }

    /// Ask for the next upload chunk.
    pub fn data_request(&mut self) -> Result<()> {
        self.send(Msg::DataReq.tag(), Vec::new())
    }

    pub fn opened(&mut self) -> Result<()> {
        self.send(Msg::Opened.tag(), Vec::new())
    }

    pub fn connected(&mut self) -> Result<()> {
        self.send(Msg::Connected.tag(), Vec::new())
    }

    /// Terminal success. Exactly one terminal response per command; a
    /// second call is flagged and dropped.
    pub fn finished(&mut self) -> Result<()> {
        if self.terminal_sent {
            tracing::error!("finished() after a terminal response; dropping (contract violation)");
            return Ok(());
        }
        self.terminal_sent = true;
        self.send(Msg::Finished.tag(), Vec::new())
    }

    /// Terminal failure. Same contract as [`Self::finished`].
    pub fn error(&mut self, err: JobError) -> Result<()> {
        if self.terminal_sent {
            tracing::error!(
                "error() after a terminal response; dropping (contract violation): {}",
                err
            );
            return Ok(());
        }
        self.terminal_sent = true;
        self.send(Msg::Error.tag(), ErrorMsg::from_job_error(&err).encode())
    }

    /// Standard answer for operations this protocol does not implement.
    pub fn unsupported(&mut self, action: &str, operand: &str) -> Result<()> {
        tracing::debug!("unsupported action {} for {}", action, operand);
        self.error(JobError::new(ErrorKind::UnsupportedAction, operand))
    }

    pub fn total_size(&mut self, bytes: u64) -> Result<()> {
        self.send(Msg::TotalSize.tag(), payload::encode_u64(bytes))
    }

    pub fn processed_size(&mut self, bytes: u64) -> Result<()> {
        self.send(Msg::ProcessedSize.tag(), payload::encode_u64(bytes))
    }

    pub fn position(&mut self, offset: u64) -> Result<()> {
        self.send(Msg::Position.tag(), payload::encode_u64(offset))
    }

    pub fn speed(&mut self, bytes_per_sec: u64) -> Result<()> {
        self.send(Msg::Speed.tag(), payload::encode_u64(bytes_per_sec))
    }

    pub fn written(&mut self, bytes: u64) -> Result<()> {
        self.send(Msg::Written.tag(), payload::encode_u64(bytes))
    }

    pub fn mimetype(&mut self, mime: &str) -> Result<()> {
        self.send(Msg::Mimetype.tag(), payload::encode_str(mime))
    }

    /// Report a substitute target; the orchestrator restarts the job
    /// against it after this command finishes.
    pub fn redirection(&mut self, url: &str) -> Result<()> {
        self.send(Msg::Redirection.tag(), payload::encode_str(url))
    }

    pub fn warning(&mut self, text: &str) -> Result<()> {
        self.send(Msg::Warning.tag(), payload::encode_str(text))
    }

    pub fn info_message(&mut self, text: &str) -> Result<()> {
        self.send(Msg::InfoMessage.tag(), payload::encode_str(text))
    }

    pub fn stat_entry(&mut self, entry: &DirEntry) -> Result<()> {
        self.send(Msg::StatEntry.tag(), entry.encode())
    }

    pub fn list_entries(&mut self, entries: &[DirEntry]) -> Result<()> {
        self.send(Msg::ListEntries.tag(), encode_entries(entries))
    }

    /// Report metadata for the current job.
    pub fn send_metadata(&mut self, map: &BTreeMap<String, String>) -> Result<()> {
        self.send(Msg::MetaData.tag(), payload::encode_map(map))
    }

    // ---- blocking negotiations ---------------------------------------

    /// Offer to resume a put from `offset`. For a non-zero offset this
    /// blocks until the orchestrator answers; the return value is the
    /// offset to actually resume from (0 = start over).
    pub fn can_resume(&mut self, offset: u64) -> Result<u64> {
        self.send(Msg::ResumeOffer.tag(), payload::encode_u64(offset))?;
        if offset == 0 {
            return Ok(0);
        }
        let frame = self.wait_for(Command::ResumeAnswer)?;
        Ok(payload::decode_u64(&frame.payload, "resume answer")?)
    }

    /// Block for the next upload chunk (empty = end of stream).
    pub fn wait_for_data(&mut self) -> Result<Vec<u8>> {
        let frame = self.wait_for_tag(Msg::Data.tag())?;
        Ok(frame.payload)
    }

    /// Raise an interactive prompt and block for the user's answer.
    pub fn message_box(
        &mut self,
        kind: MessageBoxKind,
        title: &str,
        text: &str,
        data: Vec<u8>,
    ) -> Result<MessageBoxAnswer> {
        let msg = MessageBoxMsg {
            kind,
            title: title.to_string(),
            text: text.to_string(),
            data,
        };
        self.send(Msg::MessageBox.tag(), msg.encode())?;
        let frame = self.wait_for(Command::MessageBoxAnswer)?;
        Ok(MessageBoxAnswer::decode(&frame.payload)?)
    }

    /// Ask for credentials. The orchestrator checks its cache first, then
    /// its decision provider; None means the user declined.
    pub fn request_auth(&mut self, info: &AuthInfo) -> Result<Option<AuthInfo>> {
        let answer = self.message_box(
            MessageBoxKind::AuthPrompt,
            &info.realm,
            &info.prompt,
            info.encode(),
        )?;
        if answer.result != ANSWER_OK {
            return Ok(None);
        }
        Ok(Some(AuthInfo::decode(&answer.data)?))
    }

    // ---- internals ----------------------------------------------------

    fn send(&mut self, tag: u32, bytes: Vec<u8>) -> Result<()> {
        self.channel.send(&Frame::new(tag, bytes))
    }

    fn begin_command(&mut self) {
        self.in_command = true;
        self.terminal_sent = false;
    }

    fn end_command(&mut self, name: &'static str) -> Result<()> {
        self.in_command = false;
        if !self.terminal_sent {
            tracing::error!(
                "handler for {} returned without finished() or error() (contract violation)",
                name
            );
            self.error(JobError::internal(
                format!("{name} handler produced no terminal response"),
                "",
            ))?;
        }
        Ok(())
    }

    fn merge_config(&mut self, map: BTreeMap<String, String>) {
        self.config.extend(map);
    }

    fn merge_metadata(&mut self, map: BTreeMap<String, String>) {
        self.metadata.extend(map);
    }

    /// Wait for a specific command, applying built-ins that arrive in the
    /// meantime. A reparse is deferred to after the current handler call
    /// (it needs the handler, which is busy right now).
    fn wait_for(&mut self, expected: Command) -> Result<Frame> {
        self.wait_for_tag(expected.tag())
    }

    fn wait_for_tag(&mut self, expected: u32) -> Result<Frame> {
        loop {
            let frame = self.channel.recv()?;
            if frame.tag == expected {
                return Ok(frame);
            }
            match Command::from_tag(frame.tag) {
                Ok(Command::Config) => self.merge_config(payload::decode_map(&frame.payload)?),
                Ok(Command::MetaData) => self.merge_metadata(payload::decode_map(&frame.payload)?),
                Ok(Command::Reparse) => self.pending_reparse = true,
                _ => {
                    tracing::debug!("frame tag {} dropped while waiting for {}", frame.tag, expected);
                }
            }
        }
    }
}

/// Decodes commands into handler calls for one worker process.
pub struct Dispatcher<H: ProtocolHandler> {
    handler: H,
    ctx: WorkerContext,
}

impl<H: ProtocolHandler> Dispatcher<H> {
    pub fn new(handler: H, channel: WorkerChannel) -> Self {
        Self {
            handler,
            ctx: WorkerContext::new(channel),
        }
    }

    /// Serve commands until the orchestrator closes the connection.
    pub fn run(&mut self) -> Result<()> {
        loop {
            let frame = match self.ctx.channel.recv() {
                Ok(frame) => frame,
                Err(err) => {
                    tracing::debug!("connection closed: {}", err);
                    return Ok(());
                }
            };
            self.dispatch(frame)?;
        }
    }

    /// Handle one frame. Returns Err only for unrecoverable channel
    /// failures; per-command problems answer with an error response.
    pub fn dispatch(&mut self, frame: Frame) -> Result<()> {
        let cmd = match Command::from_tag(frame.tag) {
            Ok(cmd) => cmd,
            Err(_) => {
                tracing::debug!("ignoring frame with non-command tag {}", frame.tag);
                return Ok(());
            }
        };
        match cmd {
            Command::Config => {
                self.ctx.merge_config(payload::decode_map(&frame.payload)?);
                Ok(())
            }
            Command::MetaData => {
                self.ctx
                    .merge_metadata(payload::decode_map(&frame.payload)?);
                Ok(())
            }
            Command::Reparse => self.handler.reparse_configuration(&mut self.ctx),
            Command::SetHost => {
                let args = HostArgs::decode(&frame.payload)?;
                // New identity, new job context.
                self.ctx.metadata.clear();
                self.handler.set_host(&mut self.ctx, &args)
            }
            Command::MessageBoxAnswer | Command::ResumeAnswer => {
                // An answer nobody is waiting for (e.g. a resume answer to
                // a zero offer); harmless.
                tracing::debug!("stray answer frame (tag {})", frame.tag);
                Ok(())
            }
            Command::Stat => self.guarded("stat", &frame, |h, ctx, p| {
                let args = UrlArgs::decode(p)?;
                h.stat(ctx, &args.url)
            }),
            Command::Get => self.guarded("get", &frame, |h, ctx, p| {
                let args = GetArgs::decode(p)?;
                h.get(ctx, &args.url, args.offset)
            }),
            Command::Put => self.guarded("put", &frame, |h, ctx, p| {
                let args = PutArgs::decode(p)?;
                h.put(ctx, &args)
            }),
            Command::ListDir => self.guarded("listDir", &frame, |h, ctx, p| {
                let args = UrlArgs::decode(p)?;
                h.list_dir(ctx, &args.url)
            }),
            Command::Mkdir => self.guarded("mkdir", &frame, |h, ctx, p| {
                let args = MkdirArgs::decode(p)?;
                h.mkdir(ctx, &args)
            }),
            Command::Rename => self.guarded("rename", &frame, |h, ctx, p| {
                let args = RenameArgs::decode(p)?;
                h.rename(ctx, &args)
            }),
            Command::Symlink => self.guarded("symlink", &frame, |h, ctx, p| {
                let args = RenameArgs::decode(p)?;
                h.symlink(ctx, &args)
            }),
            Command::Copy => self.guarded("copy", &frame, |h, ctx, p| {
                let args = CopyArgs::decode(p)?;
                h.copy(ctx, &args)
            }),
            Command::Del => self.guarded("del", &frame, |h, ctx, p| {
                let args = DelArgs::decode(p)?;
                h.del(ctx, &args)
            }),
            Command::Chmod => self.guarded("chmod", &frame, |h, ctx, p| {
                let args = ChmodArgs::decode(p)?;
                h.chmod(ctx, &args)
            }),
            Command::Chown => self.guarded("chown", &frame, |h, ctx, p| {
                let args = ChownArgs::decode(p)?;
                h.chown(ctx, &args)
            }),
            Command::SetModificationTime => {
                self.guarded("setModificationTime", &frame, |h, ctx, p| {
                    let args = SetModificationTimeArgs::decode(p)?;
                    h.set_modification_time(ctx, &args)
                })
            }
            Command::Special => self.guarded("special", &frame, |h, ctx, p| {
                let args = SpecialArgs::decode(p)?;
                h.special(ctx, &args)
            }),
        }
    }

    /// Run one job command under the terminal-response contract, then
    /// deliver any reparse that arrived while the handler was blocked.
    fn guarded<F>(&mut self, name: &'static str, frame: &Frame, f: F) -> Result<()>
    where
        F: FnOnce(&mut H, &mut WorkerContext, &[u8]) -> Result<()>,
    {
        self.ctx.begin_command();
        f(&mut self.handler, &mut self.ctx, &frame.payload)?;
        self.ctx.end_command(name)?;
        if std::mem::take(&mut self.ctx.pending_reparse) {
            self.handler.reparse_configuration(&mut self.ctx)?;
        }
        Ok(())
    }
}
