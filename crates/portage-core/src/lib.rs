//! Portage orchestrator.
//!
//! Accepts jobs (stat, get, put, list, copy, ...), routes each to a worker
//! process speaking the target protocol, enforces per-protocol and per-host
//! concurrency caps, reuses idle workers, and drives multi-step operations
//! (copy/move, recursive listing) to a single user-visible result.
//!
//! All scheduling state is mutated by one control task; tokio is confined
//! to the edges (worker spawn, socket reads, timers) in [`driver`].

pub mod config;
pub mod logging;

pub mod credentials;
pub mod decision;
pub mod driver;
pub mod event;
pub mod host_queue;
pub mod identity;
pub mod job;
pub mod pool;
pub mod proto_queue;
pub mod registry;
pub mod scheduler;
pub mod serial;
pub mod spawn;
pub mod worker;

pub use config::{PortageConfig, SessionConfig};
pub use decision::{AutoDecline, DecisionProvider};
pub use driver::Orchestrator;
pub use event::{JobRequest, JobSink, JobSpec, JobUpdate};
pub use job::JobId;
pub use registry::{ProtocolCaps, ProtocolClass, ProtocolRegistry, StaticRegistry};
pub use scheduler::Core;
pub use worker::WorkerId;

pub use portage_wire::{DirEntry, EntryKind, ErrorKind, JobError};
