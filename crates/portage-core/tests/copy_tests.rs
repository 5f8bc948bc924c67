//! Copy/move strategy selection, fallback, and the data pump.

mod common;

use common::fake_workers::{drain_updates, final_result};
use common::TestBed;
use portage_core::event::{JobRequest, JobSpec};
use portage_wire::payload::{self, CopyArgs, DelArgs, RenameArgs};
use portage_wire::{Command, ErrorKind, Msg};

fn copy_spec(src: &str, dst: &str, move_source: bool) -> JobSpec {
    JobSpec::new(JobRequest::Copy {
        src: src.into(),
        dst: dst.into(),
        permissions: -1,
        overwrite: true,
        move_source,
    })
}

#[test]
fn identical_source_and_destination_fail_immediately() {
    let mut bed = TestBed::new();
    let (_job, mut rx) = bed.submit(copy_spec("ftp://h.example.org/a", "ftp://h.example.org/a", false));
    let result = final_result(&drain_updates(&mut rx)).expect("terminal update");
    assert_eq!(
        result.unwrap_err().kind,
        ErrorKind::IdenticalSourceAndDestination
    );
    assert_eq!(bed.launch_count(), 0);
}

#[test]
fn move_within_one_identity_is_a_single_rename() {
    let mut bed = TestBed::new();
    let (_job, mut rx) = bed.submit(copy_spec("ftp://h.example.org/a", "ftp://h.example.org/b", true));
    let w1 = bed.launched_id(0);

    let frame = bed.last_frame_with(w1, Command::Rename.tag()).expect("rename sent");
    let args = RenameArgs::decode(&frame.payload).unwrap();
    assert_eq!(args.src, "ftp://h.example.org/a");
    assert_eq!(args.dst, "ftp://h.example.org/b");
    assert!(args.overwrite);

    bed.worker_finishes(w1);
    assert_eq!(final_result(&drain_updates(&mut rx)), Some(Ok(())));
    // Rename IS the move: no copy, no source delete.
    let tags = bed.tags_of(w1);
    assert!(!tags.contains(&Command::Copy.tag()));
    assert!(!tags.contains(&Command::Del.tag()));
}

#[test]
fn local_source_uses_the_remote_side_worker_copy() {
    let mut bed = TestBed::new();
    // Plain copy: the ftp protocol declares copy-from-file, so the remote
    // worker handles the local file directly.
    let (_job, mut rx) = bed.submit(copy_spec("file:///tmp/x", "ftp://h.example.org/y", false));
    assert_eq!(bed.launch_count(), 1);
    let (wid, protocol) = bed.launched.lock().unwrap()[0].clone();
    assert_eq!(protocol, "ftp", "routed to the side that declared the capability");

    let frame = bed.last_frame_with(wid, Command::Copy.tag()).expect("copy sent");
    let args = CopyArgs::decode(&frame.payload).unwrap();
    assert_eq!(args.src, "file:///tmp/x");
    assert_eq!(args.dst, "ftp://h.example.org/y");

    bed.worker_finishes(wid);
    assert_eq!(final_result(&drain_updates(&mut rx)), Some(Ok(())));
}

#[test]
fn move_by_copy_deletes_the_source_afterwards() {
    let mut bed = TestBed::new();
    let (_job, mut rx) = bed.submit(copy_spec("file:///tmp/x", "ftp://h.example.org/y", true));
    let w1 = bed.launched_id(0);

    // The ftp side declares rename-from-file, so the fast move is tried
    // first; refuse it to force the copy strategy.
    assert!(bed.last_frame_with(w1, Command::Rename.tag()).is_some());
    bed.worker_errors(w1, ErrorKind::UnsupportedAction, "ftp://h.example.org/y");

    // Fallback: worker-side copy on the same (pooled) ftp worker.
    let frame = bed.last_frame_with(w1, Command::Copy.tag()).expect("copy fallback");
    let args = CopyArgs::decode(&frame.payload).unwrap();
    assert_eq!(args.src, "file:///tmp/x");
    bed.worker_finishes(w1);

    // Move semantics: the local source is deleted by a file worker.
    assert_eq!(bed.launch_count(), 2);
    let (w2, protocol) = bed.launched.lock().unwrap()[1].clone();
    assert_eq!(protocol, "file");
    let frame = bed.last_frame_with(w2, Command::Del.tag()).expect("source delete");
    let args = DelArgs::decode(&frame.payload).unwrap();
    assert_eq!(args.url, "file:///tmp/x");
    assert!(args.is_file);

    bed.worker_finishes(w2);
    assert_eq!(final_result(&drain_updates(&mut rx)), Some(Ok(())));
}

#[test]
fn pump_copies_between_unrelated_protocols_with_flow_control() {
    let mut bed = TestBed::new();
    let (_job, mut rx) = bed.submit(copy_spec(
        "ftp://src.example.org/a",
        "http://dst.example.org/b",
        false,
    ));

    // Neither side is local and identities differ: the pump starts with
    // the put; no get yet.
    assert_eq!(bed.launch_count(), 1);
    let (put_w, protocol) = bed.launched.lock().unwrap()[0].clone();
    assert_eq!(protocol, "http");
    assert!(bed.last_frame_with(put_w, Command::Put.tag()).is_some());

    // Resume offer answered, then the get side starts.
    bed.worker_sends(put_w, Msg::ResumeOffer, payload::encode_u64(0));
    assert!(bed
        .tags_of(put_w)
        .contains(&Command::ResumeAnswer.tag()));
    assert_eq!(bed.launch_count(), 2);
    let (get_w, protocol) = bed.launched.lock().unwrap()[1].clone();
    assert_eq!(protocol, "ftp");
    assert!(bed.last_frame_with(get_w, Command::Get.tag()).is_some());

    // First chunk: buffered, and the get pauses while the put digests.
    bed.worker_sends(get_w, Msg::Data, b"hello".to_vec());
    assert!(bed.is_paused(get_w), "one in-flight chunk: get suspended");
    assert!(
        !bed.tags_of(put_w).contains(&Msg::Data.tag()),
        "nothing forwarded until the put asks"
    );

    bed.worker_sends(put_w, Msg::DataReq, Vec::new());
    let chunk = bed.last_frame_with(put_w, Msg::Data.tag()).unwrap();
    assert_eq!(chunk.payload, b"hello");
    assert!(!bed.is_paused(get_w), "get resumed once the buffer drained");

    // Gating property: zero payload bytes before the resume answer.
    let tags = bed.tags_of(put_w);
    let answer_at = tags
        .iter()
        .position(|t| *t == Command::ResumeAnswer.tag())
        .unwrap();
    let first_data = tags.iter().position(|t| *t == Msg::Data.tag()).unwrap();
    assert!(answer_at < first_data);

    // Second chunk, then the get ends.
    bed.worker_sends(get_w, Msg::Data, b" world".to_vec());
    bed.worker_finishes(get_w);
    bed.worker_sends(put_w, Msg::DataReq, Vec::new());
    assert_eq!(
        bed.last_frame_with(put_w, Msg::Data.tag()).unwrap().payload,
        b" world"
    );

    // Drained and done: the next request gets the end-of-stream marker.
    bed.worker_sends(put_w, Msg::DataReq, Vec::new());
    assert_eq!(
        bed.last_frame_with(put_w, Msg::Data.tag()).unwrap().payload,
        Vec::<u8>::new()
    );

    bed.worker_sends(put_w, Msg::Written, payload::encode_u64(11));
    bed.worker_finishes(put_w);
    assert_eq!(final_result(&drain_updates(&mut rx)), Some(Ok(())));
}

#[test]
fn strategy_falls_back_from_rename_to_copy_to_pump() {
    let mut bed = TestBed::new();
    let (_job, mut rx) = bed.submit(copy_spec("ftp://h.example.org/a", "ftp://h.example.org/b", true));
    let w1 = bed.launched_id(0);

    // 1. Fast move refused.
    assert!(bed.last_frame_with(w1, Command::Rename.tag()).is_some());
    bed.worker_errors(w1, ErrorKind::UnsupportedAction, "ftp://h.example.org/b");

    // 2. Fast copy refused (same pooled worker).
    assert!(bed.last_frame_with(w1, Command::Copy.tag()).is_some());
    bed.worker_errors(w1, ErrorKind::UnsupportedAction, "ftp://h.example.org/b");

    // 3. Data pump: put to the destination on the pooled worker.
    assert!(bed.last_frame_with(w1, Command::Put.tag()).is_some());
    bed.worker_sends(w1, Msg::ResumeOffer, payload::encode_u64(0));

    // The get runs on a second worker (same host, cap 2).
    assert_eq!(bed.launch_count(), 2);
    let get_w = bed.launched_id(1);
    assert!(bed.last_frame_with(get_w, Command::Get.tag()).is_some());

    bed.worker_sends(get_w, Msg::Data, b"payload".to_vec());
    bed.worker_sends(w1, Msg::DataReq, Vec::new());
    bed.worker_finishes(get_w);
    bed.worker_sends(w1, Msg::DataReq, Vec::new());
    bed.worker_finishes(w1);

    // 4. Move semantics: source deleted after the pump.
    let deleted_on = [w1, get_w]
        .into_iter()
        .find(|w| bed.last_frame_with(*w, Command::Del.tag()).is_some())
        .expect("source delete dispatched");
    let frame = bed.last_frame_with(deleted_on, Command::Del.tag()).unwrap();
    let args = DelArgs::decode(&frame.payload).unwrap();
    assert_eq!(args.url, "ftp://h.example.org/a");

    let del_worker = deleted_on;
    bed.worker_finishes(del_worker);
    assert_eq!(final_result(&drain_updates(&mut rx)), Some(Ok(())));
}

#[test]
fn permissions_are_fixed_up_after_a_fast_move() {
    let mut bed = TestBed::new();
    let spec = JobSpec::new(JobRequest::Copy {
        src: "ftp://h.example.org/a".into(),
        dst: "ftp://h.example.org/b".into(),
        permissions: 0o600,
        overwrite: false,
        move_source: true,
    });
    let (_job, mut rx) = bed.submit(spec);
    let w1 = bed.launched_id(0);

    bed.worker_finishes(w1); // rename done

    // Rename does not apply permissions; a chmod follows on the
    // destination.
    let frame = bed.last_frame_with(w1, Command::Chmod.tag()).expect("chmod follow-up");
    let args = portage_wire::payload::ChmodArgs::decode(&frame.payload).unwrap();
    assert_eq!(args.url, "ftp://h.example.org/b");
    assert_eq!(args.permissions, 0o600);

    bed.worker_finishes(w1);
    assert_eq!(final_result(&drain_updates(&mut rx)), Some(Ok(())));
}

#[test]
fn non_recoverable_sub_job_error_tears_down_the_pump() {
    let mut bed = TestBed::new();
    let (_job, mut rx) = bed.submit(copy_spec(
        "ftp://src.example.org/a",
        "http://dst.example.org/b",
        false,
    ));
    let put_w = bed.launched_id(0);
    bed.worker_sends(put_w, Msg::ResumeOffer, payload::encode_u64(0));
    let get_w = bed.launched_id(1);

    // The get fails hard: the put is torn down quietly and the copy
    // reports the get's error.
    bed.worker_errors(get_w, ErrorKind::CannotRead, "ftp://src.example.org/a");

    let result = final_result(&drain_updates(&mut rx)).expect("terminal update");
    assert_eq!(result.unwrap_err().kind, ErrorKind::CannotRead);
    assert!(bed.is_killed(put_w), "sibling killed, not drained");
    // The worker that reported the error stays alive and goes back to the
    // pool; only the cancelled sibling's worker is killed.
    assert!(!bed.is_killed(get_w));
    assert_eq!(bed.core.pool_size("ftp"), 1);
    assert_eq!(bed.core.live_workers(), 1);
}
