//! Protocol handler trait implemented by worker executables.
//!
//! Every operation defaults to answering unsupported-action, so a protocol
//! implements exactly the commands it can serve. Each dispatched command
//! must end in exactly one `ctx.finished()` or `ctx.error(..)`; the
//! dispatcher flags violations.

use anyhow::Result;

use portage_wire::payload::{
    ChmodArgs, ChownArgs, CopyArgs, DelArgs, HostArgs, MkdirArgs, PutArgs, RenameArgs,
    SetModificationTimeArgs, SpecialArgs,
};

use crate::dispatcher::WorkerContext;

pub trait ProtocolHandler {
    /// New identity for subsequent commands. Not a job command: no
    /// finished/error expected.
    fn set_host(&mut self, _ctx: &mut WorkerContext, _host: &HostArgs) -> Result<()> {
        Ok(())
    }

    /// Configuration sources changed; re-read what applies.
    fn reparse_configuration(&mut self, _ctx: &mut WorkerContext) -> Result<()> {
        Ok(())
    }

    fn get(&mut self, ctx: &mut WorkerContext, url: &str, _offset: u64) -> Result<()> {
        ctx.unsupported("get", url)
    }

    fn put(&mut self, ctx: &mut WorkerContext, args: &PutArgs) -> Result<()> {
        ctx.unsupported("put", &args.url)
    }

    fn stat(&mut self, ctx: &mut WorkerContext, url: &str) -> Result<()> {
        ctx.unsupported("stat", url)
    }

    fn list_dir(&mut self, ctx: &mut WorkerContext, url: &str) -> Result<()> {
        ctx.unsupported("listDir", url)
    }

    fn mkdir(&mut self, ctx: &mut WorkerContext, args: &MkdirArgs) -> Result<()> {
        ctx.unsupported("mkdir", &args.url)
    }

    fn rename(&mut self, ctx: &mut WorkerContext, args: &RenameArgs) -> Result<()> {
        ctx.unsupported("rename", &args.dst)
    }

    fn symlink(&mut self, ctx: &mut WorkerContext, args: &RenameArgs) -> Result<()> {
        ctx.unsupported("symlink", &args.dst)
    }

    fn copy(&mut self, ctx: &mut WorkerContext, args: &CopyArgs) -> Result<()> {
        ctx.unsupported("copy", &args.dst)
    }

    fn del(&mut self, ctx: &mut WorkerContext, args: &DelArgs) -> Result<()> {
        ctx.unsupported("del", &args.url)
    }

    fn chmod(&mut self, ctx: &mut WorkerContext, args: &ChmodArgs) -> Result<()> {
        ctx.unsupported("chmod", &args.url)
    }

    fn chown(&mut self, ctx: &mut WorkerContext, args: &ChownArgs) -> Result<()> {
        ctx.unsupported("chown", &args.url)
    }

    fn set_modification_time(
        &mut self,
        ctx: &mut WorkerContext,
        args: &SetModificationTimeArgs,
    ) -> Result<()> {
        ctx.unsupported("setModificationTime", &args.url)
    }

    fn special(&mut self, ctx: &mut WorkerContext, args: &SpecialArgs) -> Result<()> {
        ctx.unsupported("special", &args.url)
    }
}
