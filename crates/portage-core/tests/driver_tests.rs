//! The async edge: orchestrator handle, control loop, real spawn path.

mod common;

use std::sync::Arc;

use common::fake_workers::test_registry;
use portage_core::config::PortageConfig;
use portage_core::decision::AutoDecline;
use portage_core::event::{JobRequest, JobSpec, JobUpdate};
use portage_core::Orchestrator;
use portage_wire::ErrorKind;
use tempfile::tempdir;

#[tokio::test]
async fn unlaunchable_worker_fails_the_job_through_the_driver() {
    let sockets = tempdir().unwrap();
    let mut cfg = PortageConfig::default();
    cfg.socket_dir = Some(sockets.path().to_path_buf());

    // The registry's exec names do not exist on this system, so the spawn
    // itself fails and the error must travel back through the control loop.
    let orch = Orchestrator::start(cfg, Arc::new(test_registry()), Arc::new(AutoDecline)).unwrap();
    let (_id, mut updates) = orch
        .submit(JobSpec::new(JobRequest::Get {
            url: "http://example.org/x".into(),
        }))
        .await
        .unwrap();

    let mut result = None;
    while let Some(update) = updates.recv().await {
        if let JobUpdate::Finished(res) = update {
            result = Some(res);
            break;
        }
    }
    let err = result.expect("terminal update").unwrap_err();
    assert_eq!(err.kind, ErrorKind::CannotLaunchWorker);

    orch.shutdown();
}

#[tokio::test]
async fn shutdown_fails_later_submissions() {
    let sockets = tempdir().unwrap();
    let mut cfg = PortageConfig::default();
    cfg.socket_dir = Some(sockets.path().to_path_buf());

    let orch = Orchestrator::start(cfg, Arc::new(test_registry()), Arc::new(AutoDecline)).unwrap();
    orch.shutdown();

    // The control loop has exited; the submission is rejected rather than
    // hanging.
    let submitted = orch
        .submit(JobSpec::new(JobRequest::Stat {
            url: "http://example.org/x".into(),
        }))
        .await;
    assert!(submitted.is_err());
}
