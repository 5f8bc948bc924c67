//! Shared test harness: a scheduler core wired to scripted in-process
//! workers instead of spawned processes.

pub mod fake_workers;

pub use fake_workers::{FakeLauncher, TestBed};
