//! Streamed transfers: data flow, redirect restarts, resume gating.

mod common;

use common::fake_workers::{drain_updates, final_result};
use common::TestBed;
use portage_core::event::{JobRequest, JobSpec, JobUpdate};
use portage_wire::payload::{self, GetArgs};
use portage_wire::{Command, ErrorKind, Msg};

fn get_spec(url: &str) -> JobSpec {
    JobSpec::new(JobRequest::Get { url: url.into() })
}

fn put_spec(url: &str, resume: bool) -> JobSpec {
    JobSpec::new(JobRequest::Put {
        url: url.into(),
        overwrite: true,
        resume,
        permissions: 0o644,
    })
}

#[test]
fn get_streams_mimetype_size_and_data() {
    let mut bed = TestBed::new();
    let (_job, mut rx) = bed.submit(get_spec("http://example.org/file"));
    let w1 = bed.launched_id(0);

    bed.worker_sends(w1, Msg::Mimetype, payload::encode_str("text/plain"));
    bed.worker_sends(w1, Msg::TotalSize, payload::encode_u64(11));
    bed.worker_sends(w1, Msg::Data, b"hello ".to_vec());
    bed.worker_sends(w1, Msg::Data, b"world".to_vec());
    bed.worker_sends(w1, Msg::Data, Vec::new());
    bed.worker_finishes(w1);

    let updates = drain_updates(&mut rx);
    assert!(updates
        .iter()
        .any(|u| matches!(u, JobUpdate::Mimetype(m) if m == "text/plain")));
    assert!(updates
        .iter()
        .any(|u| matches!(u, JobUpdate::TotalSize(11))));
    let data: Vec<u8> = updates
        .iter()
        .filter_map(|u| match u {
            JobUpdate::Data(b) => Some(b.clone()),
            _ => None,
        })
        .flatten()
        .collect();
    assert_eq!(data, b"hello world");
    assert_eq!(final_result(&updates), Some(Ok(())));
}

#[test]
fn redirect_restarts_the_same_job_in_place() {
    let mut bed = TestBed::new();
    let (_job, mut rx) = bed.submit(get_spec("http://example.org/old"));
    let w1 = bed.launched_id(0);

    bed.worker_sends(w1, Msg::Redirection, payload::encode_str("http://example.org/new"));
    bed.worker_finishes(w1);

    // Same worker came back out of the pool for the restarted command.
    assert_eq!(bed.launch_count(), 1);
    let gets: Vec<GetArgs> = bed
        .frames_of(w1)
        .iter()
        .filter(|f| f.tag == Command::Get.tag())
        .map(|f| GetArgs::decode(&f.payload).unwrap())
        .collect();
    assert_eq!(gets.len(), 2, "restart dispatched a second get");
    assert_eq!(gets[1].url, "http://example.org/new");

    let updates = drain_updates(&mut rx);
    assert!(updates
        .iter()
        .any(|u| matches!(u, JobUpdate::Redirected(u2) if u2 == "http://example.org/new")));
    assert!(final_result(&updates).is_none(), "job identity survives the redirect");

    bed.worker_finishes(w1);
    assert_eq!(final_result(&drain_updates(&mut rx)), Some(Ok(())));
}

#[test]
fn five_repeats_of_one_target_are_tolerated() {
    let mut bed = TestBed::new();
    let (_job, mut rx) = bed.submit(get_spec("http://example.org/start"));
    let w1 = bed.launched_id(0);

    for _ in 0..5 {
        bed.worker_sends(w1, Msg::Redirection, payload::encode_str("http://example.org/loop"));
        bed.worker_finishes(w1);
    }
    bed.worker_finishes(w1);

    assert_eq!(final_result(&drain_updates(&mut rx)), Some(Ok(())));
}

#[test]
fn six_repeats_of_one_target_are_a_cycle() {
    let mut bed = TestBed::new();
    let (_job, mut rx) = bed.submit(get_spec("http://example.org/start"));
    let w1 = bed.launched_id(0);

    for _ in 0..5 {
        bed.worker_sends(w1, Msg::Redirection, payload::encode_str("http://example.org/loop"));
        bed.worker_finishes(w1);
    }
    bed.worker_sends(w1, Msg::Redirection, payload::encode_str("http://example.org/loop"));
    bed.worker_finishes(w1);

    let result = final_result(&drain_updates(&mut rx)).expect("terminal update");
    assert_eq!(result.unwrap_err().kind, ErrorKind::CyclicRedirection);
}

#[test]
fn put_payload_is_gated_behind_the_resume_answer() {
    let mut bed = TestBed::new();
    let (job, mut rx) = bed.submit(put_spec("ftp://example.org/up.bin", true));
    let w1 = bed.launched_id(0);

    // Caller data arrives before the negotiation: it must be held back.
    bed.core.supply_data(job, b"early".to_vec());
    bed.core.drain();
    assert!(
        !bed.tags_of(w1).contains(&Msg::Data.tag()),
        "no payload before the resume answer"
    );

    bed.worker_sends(w1, Msg::ResumeOffer, payload::encode_u64(4096));
    let tags = bed.tags_of(w1);
    assert!(tags.contains(&Command::ResumeAnswer.tag()));

    bed.worker_sends(w1, Msg::DataReq, Vec::new());
    let tags = bed.tags_of(w1);
    let answer_at = tags
        .iter()
        .position(|t| *t == Command::ResumeAnswer.tag())
        .unwrap();
    let data_at = tags.iter().position(|t| *t == Msg::Data.tag()).unwrap();
    assert!(answer_at < data_at, "payload strictly after the answer");
    let chunk = bed.last_frame_with(w1, Msg::Data.tag()).unwrap();
    assert_eq!(chunk.payload, b"early");

    let updates = drain_updates(&mut rx);
    assert!(updates
        .iter()
        .any(|u| matches!(u, JobUpdate::ResumeOffer(4096))));

    // Next request reaches the caller; answer with end of stream.
    bed.worker_sends(w1, Msg::DataReq, Vec::new());
    assert!(drain_updates(&mut rx)
        .iter()
        .any(|u| matches!(u, JobUpdate::DataRequest)));
    bed.core.supply_data(job, Vec::new());
    bed.core.drain();
    bed.worker_sends(w1, Msg::Written, payload::encode_u64(5));
    bed.worker_finishes(w1);
    assert_eq!(final_result(&drain_updates(&mut rx)), Some(Ok(())));
}
