//! Single-operation record-then-revert scenarios.

use crate::harness::{MockClock, TestWorkspace};
use sback_core::{ChangeOp, RollbackOptions, TrackMeta, Trigger};

#[test]
fn test_create_then_revert_removes_file() {
    let ws = TestWorkspace::empty().unwrap();
    let clock = MockClock::new();
    let mut engine = ws.engine(&clock).unwrap();

    ws.write_file("a.txt", b"hello, world!").unwrap();
    engine
        .track(&ws.abs("a.txt"), ChangeOp::Created, None)
        .unwrap();
    let outcome = engine.finalize(&[Trigger::Manual]).unwrap();

    let manifest = engine.get_manifest(&outcome.session_id).unwrap();
    assert_eq!(manifest.change_count, 1);
    assert_eq!(manifest.changes[0].op, ChangeOp::Created);
    assert_eq!(
        manifest.changes[0].digest_after.unwrap().as_hex(),
        "315f5bdb76d078c43b8ac0064e4a0164612b1fce77c869345bfc94c75894edd3"
    );
    assert_eq!(manifest.changes[0].size_after, Some(13));

    let result = engine
        .rollback(&outcome.session_id, &RollbackOptions::default(), None)
        .unwrap();
    assert!(result.success);
    assert!(!ws.file_exists("a.txt"));
    assert!(ws.backup_files().is_empty());
}

#[test]
fn test_modify_then_revert_restores_content_and_metadata() {
    let ws = TestWorkspace::with_files(&[("a.txt", b"A")]).unwrap();
    let clock = MockClock::new();

    // Give the pre-session file distinctive metadata to restore.
    let pre_mtime_ms: i64 = 1_600_000_000_000;
    filetime::set_file_mtime(
        ws.abs("a.txt"),
        filetime::FileTime::from_unix_time(pre_mtime_ms / 1000, 0),
    )
    .unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(ws.abs("a.txt"), std::fs::Permissions::from_mode(0o754)).unwrap();
    }

    let mut engine = ws.engine(&clock).unwrap();
    engine
        .track(&ws.abs("a.txt"), ChangeOp::Modified, None)
        .unwrap();
    ws.write_file("a.txt", b"B").unwrap();
    let outcome = engine.finalize(&[Trigger::Manual]).unwrap();

    let result = engine
        .rollback(&outcome.session_id, &RollbackOptions::default(), None)
        .unwrap();
    assert!(result.success);
    assert_eq!(result.files_reverted, vec!["a.txt"]);
    assert_eq!(ws.read_file("a.txt").unwrap(), b"A");

    let metadata = std::fs::metadata(ws.abs("a.txt")).unwrap();
    let restored_mtime = metadata
        .modified()
        .unwrap()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs();
    assert_eq!(restored_mtime, (pre_mtime_ms / 1000) as u64);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        assert_eq!(metadata.permissions().mode() & 0o777, 0o754);
    }
}

#[test]
fn test_delete_then_revert_restores_file() {
    let ws = TestWorkspace::with_files(&[("a.txt", b"A")]).unwrap();
    let clock = MockClock::new();
    let mut engine = ws.engine(&clock).unwrap();

    engine
        .track(&ws.abs("a.txt"), ChangeOp::Deleted, None)
        .unwrap();
    ws.remove_file("a.txt").unwrap();
    let outcome = engine.finalize(&[Trigger::Manual]).unwrap();

    let manifest = engine.get_manifest(&outcome.session_id).unwrap();
    assert_eq!(manifest.changes[0].op, ChangeOp::Deleted);
    assert!(manifest.changes[0].digest_before.is_some());
    assert!(manifest.changes[0].digest_after.is_none());

    let result = engine
        .rollback(&outcome.session_id, &RollbackOptions::default(), None)
        .unwrap();
    assert!(result.success);
    assert_eq!(ws.read_file("a.txt").unwrap(), b"A");
    assert!(ws.backup_files().is_empty());
}

#[test]
fn test_rename_then_revert_moves_back() {
    let ws = TestWorkspace::with_files(&[("old.txt", b"X")]).unwrap();
    let clock = MockClock::new();
    let mut engine = ws.engine(&clock).unwrap();

    // The editor renames, then reports the event.
    std::fs::rename(ws.abs("old.txt"), ws.abs("new.txt")).unwrap();
    engine
        .track(
            &ws.abs("new.txt"),
            ChangeOp::Renamed,
            Some(TrackMeta {
                from_path: Some(ws.abs("old.txt")),
                ..Default::default()
            }),
        )
        .unwrap();
    let outcome = engine.finalize(&[Trigger::Manual]).unwrap();

    let manifest = engine.get_manifest(&outcome.session_id).unwrap();
    assert_eq!(manifest.changes[0].op, ChangeOp::Renamed);
    assert_eq!(manifest.changes[0].path, "new.txt");
    assert_eq!(manifest.changes[0].from_path.as_deref(), Some("old.txt"));

    let result = engine
        .rollback(&outcome.session_id, &RollbackOptions::default(), None)
        .unwrap();
    assert!(result.success);
    assert_eq!(ws.read_file("old.txt").unwrap(), b"X");
    assert!(!ws.file_exists("new.txt"));
    assert!(ws.backup_files().is_empty());
}

#[test]
fn test_dry_run_reports_without_touching() {
    let ws = TestWorkspace::with_files(&[("a.txt", b"A")]).unwrap();
    let clock = MockClock::new();
    let mut engine = ws.engine(&clock).unwrap();

    engine
        .track(&ws.abs("a.txt"), ChangeOp::Modified, None)
        .unwrap();
    ws.write_file("a.txt", b"B").unwrap();
    let outcome = engine.finalize(&[Trigger::Manual]).unwrap();

    let result = engine
        .rollback(
            &outcome.session_id,
            &RollbackOptions {
                dry_run: true,
                skip_verification: false,
            },
            None,
        )
        .unwrap();
    assert!(result.success);
    assert_eq!(result.files_reverted, vec!["a.txt"]);
    assert_eq!(ws.read_file("a.txt").unwrap(), b"B");
    assert!(ws.backup_files().is_empty());
}
