//! Engine-level checks of the quantified invariants.

use crate::harness::{MockClock, TestWorkspace};
use sback_core::{ChangeOp, RollbackOptions, SbError, TrackMeta, Trigger};

/// Inverse correctness over a mixed session: every touched file returns to
/// its pre-session bytes, untouched files stay untouched.
#[test]
fn test_mixed_session_rolls_back_to_initial_state() {
    let ws = TestWorkspace::with_files(&[
        ("modify.txt", b"modify v1"),
        ("delete.txt", b"delete v1"),
        ("old_name.txt", b"rename v1"),
        ("untouched.txt", b"leave me"),
    ])
    .unwrap();
    let clock = MockClock::new();
    let mut engine = ws.engine(&clock).unwrap();

    // create
    ws.write_file("create.txt", b"created").unwrap();
    engine.track(&ws.abs("create.txt"), ChangeOp::Created, None).unwrap();
    // modify
    engine.track(&ws.abs("modify.txt"), ChangeOp::Modified, None).unwrap();
    ws.write_file("modify.txt", b"modify v2").unwrap();
    // delete
    engine.track(&ws.abs("delete.txt"), ChangeOp::Deleted, None).unwrap();
    ws.remove_file("delete.txt").unwrap();
    // rename
    std::fs::rename(ws.abs("old_name.txt"), ws.abs("new_name.txt")).unwrap();
    engine
        .track(
            &ws.abs("new_name.txt"),
            ChangeOp::Renamed,
            Some(TrackMeta {
                from_path: Some(ws.abs("old_name.txt")),
                ..Default::default()
            }),
        )
        .unwrap();

    let outcome = engine.finalize(&[Trigger::Manual]).unwrap();
    let result = engine
        .rollback(&outcome.session_id, &RollbackOptions::default(), None)
        .unwrap();
    assert!(result.success);
    assert!(result.files_skipped.is_empty());

    assert!(!ws.file_exists("create.txt"));
    assert_eq!(ws.read_file("modify.txt").unwrap(), b"modify v1");
    assert_eq!(ws.read_file("delete.txt").unwrap(), b"delete v1");
    assert_eq!(ws.read_file("old_name.txt").unwrap(), b"rename v1");
    assert!(!ws.file_exists("new_name.txt"));
    assert_eq!(ws.read_file("untouched.txt").unwrap(), b"leave me");
    assert!(ws.backup_files().is_empty());
}

/// Rollback overwrites diverged content: no three-way merge.
#[test]
fn test_rollback_overwrites_diverged_file() {
    let ws = TestWorkspace::with_files(&[("a.txt", b"A")]).unwrap();
    let clock = MockClock::new();
    let mut engine = ws.engine(&clock).unwrap();

    engine.track(&ws.abs("a.txt"), ChangeOp::Modified, None).unwrap();
    ws.write_file("a.txt", b"B").unwrap();
    let outcome = engine.finalize(&[Trigger::Manual]).unwrap();

    // The workspace diverges further after the session.
    ws.write_file("a.txt", b"C, much later").unwrap();

    engine
        .rollback(&outcome.session_id, &RollbackOptions::default(), None)
        .unwrap();
    assert_eq!(ws.read_file("a.txt").unwrap(), b"A");
}

/// Path safety: traversal and out-of-root paths never reach a manifest.
#[test]
fn test_unsafe_paths_are_rejected() {
    let ws = TestWorkspace::empty().unwrap();
    let clock = MockClock::new();
    let mut engine = ws.engine(&clock).unwrap();

    let escape = ws.root().join("../outside.txt");
    assert!(matches!(
        engine.track(&escape, ChangeOp::Created, None),
        Err(SbError::InvalidPath { .. })
    ));

    assert!(matches!(
        engine.track(std::path::Path::new("/etc/hosts"), ChangeOp::Modified, None),
        Err(SbError::InvalidPath { .. })
    ));

    // Nothing was buffered by the rejected events.
    assert!(engine.current().is_none());
}

/// Ordering: manifests preserve arrival order modulo ignore filtering.
#[test]
fn test_manifest_preserves_event_order() {
    let ws = TestWorkspace::empty().unwrap();
    let clock = MockClock::new();
    let mut engine = ws.engine(&clock).unwrap();

    let order = ["z.txt", "m.txt", "a.txt"];
    for name in order {
        ws.write_file(name, name.as_bytes()).unwrap();
        engine.track(&ws.abs(name), ChangeOp::Created, None).unwrap();
    }
    // An ignored path in the middle of the stream leaves no record.
    ws.write_file("target/out.bin", b"obj").unwrap();
    engine
        .track(&ws.abs("target/out.bin"), ChangeOp::Created, None)
        .unwrap();

    let outcome = engine.finalize(&[Trigger::Manual]).unwrap();
    let manifest = engine.get_manifest(&outcome.session_id).unwrap();

    let paths: Vec<&str> = manifest.changes.iter().map(|c| c.path.as_str()).collect();
    assert_eq!(paths, vec!["z.txt", "m.txt", "a.txt"]);
}

/// The last event for a path determines its terminal state.
#[test]
fn test_repeated_path_uses_terminal_content() {
    let ws = TestWorkspace::with_files(&[("a.txt", b"v0")]).unwrap();
    let clock = MockClock::new();
    let mut engine = ws.engine(&clock).unwrap();

    engine.track(&ws.abs("a.txt"), ChangeOp::Modified, None).unwrap();
    ws.write_file("a.txt", b"v1").unwrap();
    engine.track(&ws.abs("a.txt"), ChangeOp::Modified, None).unwrap();
    ws.write_file("a.txt", b"v2 terminal").unwrap();

    let outcome = engine.finalize(&[Trigger::Manual]).unwrap();
    let manifest = engine.get_manifest(&outcome.session_id).unwrap();
    assert_eq!(manifest.change_count, 2);
    for change in &manifest.changes {
        assert_eq!(
            change.digest_after,
            Some(sback_core::Digest::of(b"v2 terminal"))
        );
    }

    engine
        .rollback(&outcome.session_id, &RollbackOptions::default(), None)
        .unwrap();
    assert_eq!(ws.read_file("a.txt").unwrap(), b"v0");
}

/// Manifest wire form carries the schema tag and ISO-8601 timestamps.
#[test]
fn test_manifest_wire_form() {
    let ws = TestWorkspace::empty().unwrap();
    let clock = MockClock::new();
    let mut engine = ws.engine(&clock).unwrap();

    ws.write_file("a.txt", b"x").unwrap();
    engine.track(&ws.abs("a.txt"), ChangeOp::Created, None).unwrap();
    let outcome = engine.finalize(&[Trigger::Manual]).unwrap();

    let wire = engine.get_manifest(&outcome.session_id).unwrap().wire_json();
    assert_eq!(wire["schema"], "session.v1");
    assert!(wire["startedAt"].as_str().unwrap().contains('T'));
    assert_eq!(wire["changeCount"], 1);
    assert_eq!(wire["changes"][0]["op"], "created");
}

/// Summaries and tags are deterministic functions of the manifest.
#[test]
fn test_names_and_tags() {
    let ws = TestWorkspace::empty().unwrap();
    let clock = MockClock::new();
    let mut engine = ws.engine(&clock).unwrap();

    for name in ["alpha.rs", "beta.rs", "gamma.rs", "delta.rs", "epsilon.rs", "zeta.rs"] {
        ws.write_file(name, name.as_bytes()).unwrap();
        engine.track(&ws.abs(name), ChangeOp::Created, None).unwrap();
    }
    clock.advance_minutes(45);
    // One more event so the session is not idle-split artificially.
    ws.write_file("alpha.rs", b"more").unwrap();
    engine.track(&ws.abs("alpha.rs"), ChangeOp::Modified, None).unwrap();

    let outcome = engine.finalize(&[Trigger::Manual]).unwrap();
    let manifest = engine.get_manifest(&outcome.session_id).unwrap();

    assert_eq!(manifest.name, "Updated alpha, beta, gamma");
    assert!(manifest.tags.iter().any(|t| t == "multi-file"));
    assert!(manifest.tags.iter().any(|t| t == "long-session"));
    assert!(manifest.tags.iter().any(|t| t == "manual"));
}
