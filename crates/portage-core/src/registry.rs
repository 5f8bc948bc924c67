//! Protocol capability registry.
//!
//! The orchestrator consults this to resolve a protocol name into a worker
//! executable and its declared capabilities. The desktop-file registry of
//! the host environment is behind this trait; tests and embedders use
//! [`StaticRegistry`].

use std::collections::HashMap;

/// Broad locality class of a protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolClass {
    /// Operates on the local machine (file, trash).
    Local,
    /// Talks to remote hosts.
    Internet,
    Other,
}

/// Declared capabilities of one protocol.
#[derive(Debug, Clone)]
pub struct ProtocolCaps {
    /// Worker executable name or path.
    pub exec: String,
    /// Total worker cap for this protocol; 0 = use the configured default.
    pub max_workers: usize,
    /// Per-host worker cap; 0 = use the configured default.
    pub max_workers_per_host: usize,
    /// The protocol's rename command accepts a local file as source.
    pub can_rename_from_file: bool,
    /// The protocol's rename command accepts a local file as destination.
    pub can_rename_to_file: bool,
    /// The protocol's copy command accepts a local file as source.
    pub can_copy_from_file: bool,
    /// The protocol's copy command accepts a local file as destination.
    pub can_copy_to_file: bool,
    pub default_mimetype: String,
    pub class: ProtocolClass,
}

impl ProtocolCaps {
    /// Capabilities with everything optional disabled.
    pub fn new(exec: impl Into<String>) -> Self {
        Self {
            exec: exec.into(),
            max_workers: 0,
            max_workers_per_host: 0,
            can_rename_from_file: false,
            can_rename_to_file: false,
            can_copy_from_file: false,
            can_copy_to_file: false,
            default_mimetype: "application/octet-stream".to_string(),
            class: ProtocolClass::Internet,
        }
    }
}

pub trait ProtocolRegistry: Send + Sync {
    /// Capabilities for a protocol, or None when unknown.
    fn lookup(&self, protocol: &str) -> Option<ProtocolCaps>;
}

/// In-memory registry for embedders and tests.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    entries: HashMap<String, ProtocolCaps>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, protocol: impl Into<String>, caps: ProtocolCaps) -> &mut Self {
        self.entries.insert(protocol.into(), caps);
        self
    }

    pub fn with(mut self, protocol: impl Into<String>, caps: ProtocolCaps) -> Self {
        self.insert(protocol, caps);
        self
    }
}

impl ProtocolRegistry for StaticRegistry {
    fn lookup(&self, protocol: &str) -> Option<ProtocolCaps> {
        self.entries.get(protocol).cloned()
    }
}
