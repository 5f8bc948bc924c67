//! Worker-process side of Portage.
//!
//! A worker executable implements [`ProtocolHandler`] for its protocol and
//! hands it to [`run_worker`]; the dispatcher decodes incoming commands
//! into handler calls and provides the response primitives that encode
//! back onto the same connection. Workers may block freely; the
//! orchestrator never blocks on them.

pub mod channel;
pub mod dispatcher;
pub mod handler;

pub use channel::WorkerChannel;
pub use dispatcher::{Dispatcher, WorkerContext};
pub use handler::ProtocolHandler;

use anyhow::{Context, Result};

/// Entry point for a worker executable: connect back to the orchestrator
/// using the rendezvous address passed as the sole argument and serve
/// commands until the connection closes.
pub fn run_worker<H: ProtocolHandler>(handler: H) -> Result<()> {
    let address = std::env::args()
        .nth(1)
        .context("missing rendezvous address argument")?;
    let channel = WorkerChannel::connect(&address)?;
    Dispatcher::new(handler, channel).run()
}
