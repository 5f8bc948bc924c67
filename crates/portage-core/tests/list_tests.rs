//! Flat and recursive listings: prefixing, filtering, partial failures.

mod common;

use common::fake_workers::{drain_updates, final_result};
use common::TestBed;
use portage_core::event::{JobRequest, JobSpec, JobUpdate};
use portage_wire::entry::encode_entries;
use portage_wire::payload::UrlArgs;
use portage_wire::{Command, DirEntry, EntryKind, ErrorKind, Msg};

fn list_spec(url: &str, recursive: bool) -> JobSpec {
    JobSpec::new(JobRequest::List {
        url: url.into(),
        recursive,
        include_hidden: false,
    })
}

/// One worker per host: nested listings must wait for the parent's slot,
/// which the parent releases as soon as its own wire exchange is over.
fn single_worker_bed() -> TestBed {
    let mut cfg = portage_core::config::PortageConfig::default();
    cfg.max_workers_per_host = 1;
    TestBed::with_config(cfg)
}

fn dir(name: &str) -> DirEntry {
    DirEntry::new(name, EntryKind::Dir)
}

fn file(name: &str) -> DirEntry {
    DirEntry::new(name, EntryKind::File)
}

fn entry_names(updates: &[JobUpdate]) -> Vec<Vec<String>> {
    updates
        .iter()
        .filter_map(|u| match u {
            JobUpdate::Entries(batch) => {
                Some(batch.iter().map(|e| e.name.clone()).collect())
            }
            _ => None,
        })
        .collect()
}

#[test]
fn recursive_listing_flattens_with_prefixes_and_no_duplicate_dots() {
    let mut bed = single_worker_bed();
    let (_job, mut rx) = bed.submit(list_spec("ftp://example.org/a", true));
    let w1 = bed.launched_id(0);

    // Top level of /a: x is a file, y is a directory.
    bed.worker_sends(
        w1,
        Msg::ListEntries,
        encode_entries(&[dir("."), dir(".."), file("x"), dir("y")]),
    );
    bed.worker_finishes(w1);

    // The nested listing reuses the pooled worker.
    assert_eq!(bed.launch_count(), 1);
    let lists: Vec<UrlArgs> = bed
        .frames_of(w1)
        .iter()
        .filter(|f| f.tag == Command::ListDir.tag())
        .map(|f| UrlArgs::decode(&f.payload).unwrap())
        .collect();
    assert_eq!(lists.len(), 2);
    assert_eq!(lists[1].url, "ftp://example.org/a/y");

    bed.worker_sends(
        w1,
        Msg::ListEntries,
        encode_entries(&[dir("."), dir(".."), file("z")]),
    );
    bed.worker_finishes(w1);

    let updates = drain_updates(&mut rx);
    let batches = entry_names(&updates);
    assert_eq!(batches[0], vec![".", "..", "x", "y"], "top level keeps . and ..");
    assert_eq!(batches[1], vec!["y/z"], "nested entries are prefixed, dots dropped");
    assert_eq!(final_result(&updates), Some(Ok(())));
}

#[test]
fn symlinked_directories_are_not_descended() {
    let mut bed = single_worker_bed();
    let (_job, mut rx) = bed.submit(list_spec("ftp://example.org/a", true));
    let w1 = bed.launched_id(0);

    let mut link = DirEntry::new("link", EntryKind::Symlink);
    link.link_target = "/elsewhere".into();
    bed.worker_sends(w1, Msg::ListEntries, encode_entries(&[dir("sub"), link]));
    bed.worker_finishes(w1);

    let lists = bed
        .frames_of(w1)
        .iter()
        .filter(|f| f.tag == Command::ListDir.tag())
        .count();
    assert_eq!(lists, 2, "only the real directory spawned a nested listing");

    bed.worker_sends(w1, Msg::ListEntries, encode_entries(&[file("inner")]));
    bed.worker_finishes(w1);
    assert_eq!(final_result(&drain_updates(&mut rx)), Some(Ok(())));
}

#[test]
fn hidden_names_are_dropped_at_nested_levels_and_not_descended() {
    let mut bed = single_worker_bed();
    let (_job, mut rx) = bed.submit(list_spec("ftp://example.org/a", true));
    let w1 = bed.launched_id(0);

    // Top level forwards everything, hidden included, but only descends
    // into visible directories.
    bed.worker_sends(
        w1,
        Msg::ListEntries,
        encode_entries(&[dir(".git"), dir("src")]),
    );
    bed.worker_finishes(w1);

    let lists = bed
        .frames_of(w1)
        .iter()
        .filter(|f| f.tag == Command::ListDir.tag())
        .count();
    assert_eq!(lists, 2, "hidden directory not descended");

    bed.worker_sends(
        w1,
        Msg::ListEntries,
        encode_entries(&[file(".hidden"), file("main.rs")]),
    );
    bed.worker_finishes(w1);

    let updates = drain_updates(&mut rx);
    let batches = entry_names(&updates);
    assert_eq!(batches[0], vec![".git", "src"]);
    assert_eq!(batches[1], vec!["src/main.rs"], "hidden nested names dropped");
    assert_eq!(final_result(&updates), Some(Ok(())));
}

#[test]
fn nested_failure_is_a_partial_error_not_a_terminal_one() {
    let mut bed = single_worker_bed();
    let (_job, mut rx) = bed.submit(list_spec("ftp://example.org/a", true));
    let w1 = bed.launched_id(0);

    bed.worker_sends(w1, Msg::ListEntries, encode_entries(&[dir("restricted")]));
    bed.worker_finishes(w1);

    // The nested listing fails outright.
    bed.worker_errors(w1, ErrorKind::CannotEnter, "ftp://example.org/a/restricted");

    let updates = drain_updates(&mut rx);
    assert!(updates.iter().any(|u| matches!(
        u,
        JobUpdate::SubPathError { url, error }
            if url == "ftp://example.org/a/restricted" && error.kind == ErrorKind::CannotEnter
    )));
    assert_eq!(
        final_result(&updates),
        Some(Ok(())),
        "overall listing still succeeds"
    );
}

#[test]
fn flat_listing_does_not_descend() {
    let mut bed = single_worker_bed();
    let (_job, mut rx) = bed.submit(list_spec("ftp://example.org/a", false));
    let w1 = bed.launched_id(0);

    bed.worker_sends(w1, Msg::ListEntries, encode_entries(&[dir("sub"), file("f")]));
    bed.worker_finishes(w1);

    let lists = bed
        .frames_of(w1)
        .iter()
        .filter(|f| f.tag == Command::ListDir.tag())
        .count();
    assert_eq!(lists, 1);
    let updates = drain_updates(&mut rx);
    assert_eq!(entry_names(&updates)[0], vec!["sub", "f"]);
    assert_eq!(final_result(&updates), Some(Ok(())));
}
